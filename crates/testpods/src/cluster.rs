//! Cluster connections and translation of in-cluster addresses into
//! host-reachable endpoints.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::{client::Client, host_and_port::HostAndPort};

type Result<T, E = Error> = std::result::Result<T, E>;

/// Environment variable overriding the tooling binary used for node lookups.
const KUBECTL_ENV: &str = "TESTPODS_KUBECTL";

const NODE_IP_JSONPATH: &str =
    "jsonpath={.items[0].status.addresses[?(@.type==\"InternalIP\")].address}";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to discover a cluster from the environment"))]
    Discover { source: kube::Error },

    #[snafu(display("failed to run {command:?} to look up the cluster node IP"))]
    NodeIpCommand {
        source: std::io::Error,
        command: String,
    },

    #[snafu(display("node IP lookup via {command:?} failed: {stderr}"))]
    NodeIpLookup { command: String, stderr: String },

    #[snafu(display("node IP lookup via {command:?} returned no address"))]
    NodeIpEmpty { command: String },

    #[snafu(display("failed to look up service {service:?} in namespace {namespace:?}"))]
    ServiceLookup {
        source: crate::client::Error,
        service: String,
        namespace: String,
    },

    #[snafu(display("service {service:?} in namespace {namespace:?} does not expose port {port}"))]
    PortNotExposed {
        service: String,
        namespace: String,
        port: u16,
    },

    // A missing NodePort means the service was addressed from outside the
    // cluster but is only reachable from inside it. That is a configuration
    // error, not a transient condition.
    #[snafu(display(
        "service {service:?} in namespace {namespace:?} has no NodePort allocated for port \
         {port}; only NodePort services are reachable from outside the cluster"
    ))]
    NoNodePortAllocated {
        service: String,
        namespace: String,
        port: u16,
    },
}

/// Translates an in-cluster service port into a host-reachable endpoint.
#[async_trait]
pub trait ExternalAccessStrategy: Send + Sync {
    async fn external_endpoint(
        &self,
        client: &Client,
        namespace: &str,
        service: &str,
        port: u16,
    ) -> Result<HostAndPort>;
}

/// An abstract cluster connection: an API client plus the strategy used to
/// reach services from the host the tests run on.
pub trait ClusterHandle: Send + Sync {
    fn client(&self) -> &Client;
    fn access(&self) -> &dyn ExternalAccessStrategy;
}

/// A connection to the local development cluster (kind, minikube, k3d, …).
///
/// The client configuration is discovered from the environment the way any
/// other tooling does it (kubeconfig or in-cluster service account). External
/// access goes through [`NodePortAccess`].
pub struct LocalCluster {
    client: Client,
    access: NodePortAccess,
}

impl LocalCluster {
    /// Discovers the cluster from the environment.
    pub async fn discover() -> Result<Self> {
        let kube_client = kube::Client::try_default().await.context(DiscoverSnafu)?;
        Ok(Self::new(Client::new(kube_client)))
    }

    pub fn new(client: Client) -> Self {
        Self {
            client,
            access: NodePortAccess::new(),
        }
    }
}

impl ClusterHandle for LocalCluster {
    fn client(&self) -> &Client {
        &self.client
    }

    fn access(&self) -> &dyn ExternalAccessStrategy {
        &self.access
    }
}

/// Reaches services through the NodePort allocated on the cluster nodes.
///
/// The node IP is retrieved once by shelling out to the cluster tooling and
/// cached for the lifetime of the strategy.
pub struct NodePortAccess {
    kubectl: String,
    node_ip: OnceCell<String>,
}

impl Default for NodePortAccess {
    fn default() -> Self {
        Self::new()
    }
}

impl NodePortAccess {
    pub fn new() -> Self {
        Self {
            kubectl: std::env::var(KUBECTL_ENV).unwrap_or_else(|_| "kubectl".to_string()),
            node_ip: OnceCell::new(),
        }
    }

    async fn node_ip(&self) -> Result<&str> {
        self.node_ip
            .get_or_try_init(|| query_node_ip(&self.kubectl))
            .await
            .map(String::as_str)
    }
}

#[async_trait]
impl ExternalAccessStrategy for NodePortAccess {
    async fn external_endpoint(
        &self,
        client: &Client,
        namespace: &str,
        service: &str,
        port: u16,
    ) -> Result<HostAndPort> {
        let found: Service = client
            .get(service, namespace)
            .await
            .context(ServiceLookupSnafu { service, namespace })?;

        let service_port = found
            .spec
            .as_ref()
            .and_then(|spec| spec.ports.as_ref())
            .and_then(|ports| {
                ports
                    .iter()
                    .find(|service_port| service_port.port == i32::from(port))
            })
            .context(PortNotExposedSnafu {
                service,
                namespace,
                port,
            })?;

        let node_port = service_port.node_port.context(NoNodePortAllocatedSnafu {
            service,
            namespace,
            port,
        })?;

        let node_ip = self.node_ip().await?;
        let endpoint = HostAndPort::new(node_ip, node_port as u16);
        debug!(service, namespace, port, %endpoint, "resolved external endpoint");
        Ok(endpoint)
    }
}

async fn query_node_ip(kubectl: &str) -> Result<String> {
    let output = tokio::process::Command::new(kubectl)
        .args(["get", "nodes", "-o", NODE_IP_JSONPATH])
        .output()
        .await
        .context(NodeIpCommandSnafu { command: kubectl })?;

    ensure!(
        output.status.success(),
        NodeIpLookupSnafu {
            command: kubectl,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    // Multi-node clusters print several addresses; any node carries the
    // NodePort, so the first one works.
    let ip = stdout
        .split_whitespace()
        .next()
        .context(NodeIpEmptySnafu { command: kubectl })?;

    Ok(ip.to_string())
}

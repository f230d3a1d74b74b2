//! Endpoint exposure: how a pod's declared ports turn into services.

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use snafu::Snafu;

use crate::{builder::ObjectMetaBuilder, client, client::Client};

mod cluster_ip;
mod composite;
mod headless;
mod node_port;

pub use cluster_ip::ClusterIpService;
pub use composite::CompositeService;
pub use headless::HeadlessService;
pub use node_port::NodePortService;

type Result<T, E = Error> = std::result::Result<T, E>;

/// The NodePort range Kubernetes allocates from by default.
pub const NODE_PORT_RANGE: std::ops::RangeInclusive<u16> = 30000..=32767;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to create {kind} service {name:?} in namespace {namespace:?}"))]
    CreateService {
        source: client::Error,
        kind: ServiceKind,
        name: String,
        namespace: String,
    },

    #[snafu(display("failed to delete service {name:?} in namespace {namespace:?}"))]
    DeleteService {
        source: client::Error,
        name: String,
        namespace: String,
    },

    #[snafu(display(
        "node port {port} is outside the allocatable range {}-{}",
        NODE_PORT_RANGE.start(),
        NODE_PORT_RANGE.end()
    ))]
    NodePortOutOfRange { port: u16 },
}

/// A transformation applied to the built [`Service`] right before creation.
/// This is how pods tune selectors, timeouts, traffic policies and other
/// knobs without the service manager knowing about every one of them.
pub type ServiceCustomizer = Arc<dyn Fn(&mut Service) + Send + Sync>;

/// The per-start snapshot a service manager consumes.
#[derive(Clone, Default)]
pub struct ServiceConfig {
    pub name: String,
    pub namespace: String,
    pub ports: Vec<u16>,
    pub selector: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub customizers: Vec<ServiceCustomizer>,
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("ports", &self.ports)
            .field("selector", &self.selector)
            .field("labels", &self.labels)
            .field("customizers", &self.customizers.len())
            .finish()
    }
}

impl ServiceConfig {
    /// The same config under a different name; used by composites to fan
    /// one base name out into suffixed sibling names.
    pub(crate) fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum ServiceKind {
    #[strum(serialize = "ClusterIP")]
    ClusterIp,
    #[strum(serialize = "Headless")]
    Headless,
    #[strum(serialize = "NodePort")]
    NodePort,
    #[strum(serialize = "Composite")]
    Composite,
}

/// One endpoint-exposure policy of a pod.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    fn kind(&self) -> ServiceKind;

    /// The name of the created service, once created.
    fn name(&self) -> Option<&str>;

    /// The created service as returned by the cluster. For composites, the
    /// primary (first created) one.
    fn service(&self) -> Option<&Service>;

    /// Every service this manager created, in creation order.
    fn created_services(&self) -> Vec<(ServiceKind, &Service)>;

    /// Creates the service(s) and returns the primary one.
    async fn create(&mut self, config: &ServiceConfig, client: &Client) -> Result<Service>;

    /// Deletes whatever [`Self::create`] managed to create, including
    /// partial state after a failed create.
    async fn delete(&mut self, client: &Client) -> Result<()>;
}

/// Builds the service object shared by all concrete managers, then lets the
/// manager shape the [`ServiceSpec`] and the config's customizers have the
/// last word.
pub(crate) fn build_service(
    config: &ServiceConfig,
    mutate_spec: impl FnOnce(&mut ServiceSpec),
) -> Service {
    let ports = config
        .ports
        .iter()
        .map(|&port| ServicePort {
            name: Some(format!("port-{port}")),
            port: i32::from(port),
            ..ServicePort::default()
        })
        .collect();

    let mut spec = ServiceSpec {
        ports: Some(ports),
        selector: Some(config.selector.clone()),
        ..ServiceSpec::default()
    };
    mutate_spec(&mut spec);

    let mut service = Service {
        metadata: ObjectMetaBuilder::new()
            .name(&config.name)
            .namespace(&config.namespace)
            .with_labels(config.labels.clone())
            .build(),
        spec: Some(spec),
        status: None,
    };

    for customizer in &config.customizers {
        customizer(&mut service);
    }
    service
}

/// An in-cluster virtual IP; the default exposure for in-cluster clients.
pub fn cluster_ip() -> ClusterIpService {
    ClusterIpService::default()
}

/// Per-pod DNS records without a virtual IP; required by ordered workloads.
pub fn headless() -> HeadlessService {
    HeadlessService::default()
}

/// A host-reachable port opened on every cluster node.
pub fn node_port() -> NodePortService {
    NodePortService::default()
}

/// An ordered collection of exposure policies with name suffixes.
pub fn composite() -> CompositeService {
    CompositeService::default()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::labels;

    pub(crate) fn config(name: &str, ports: Vec<u16>) -> ServiceConfig {
        ServiceConfig {
            name: name.to_string(),
            namespace: "testpods-suite-a1b2c".to_string(),
            ports,
            selector: labels::app_selector(name),
            labels: labels::canonical(name),
            customizers: vec![],
        }
    }
}

//! NodePort exposure.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use snafu::{ResultExt, ensure};
use tracing::info;

use super::{
    CreateServiceSnafu, DeleteServiceSnafu, NODE_PORT_RANGE, NodePortOutOfRangeSnafu, Result,
    ServiceConfig, ServiceKind, ServiceManager, build_service,
};
use crate::client::Client;

/// A port opened on every cluster node, reachable from the host the tests
/// run on. Required whenever the test process lives outside the cluster.
///
/// The node port is auto-assigned by the cluster unless pinned with
/// [`Self::with_node_port`]; pinning only applies when the pod exposes a
/// single port.
#[derive(Default)]
pub struct NodePortService {
    fixed_node_port: Option<u16>,
    created: Option<Service>,
}

impl NodePortService {
    /// Pins the allocated node port instead of letting the cluster pick one
    /// from its range.
    pub fn with_node_port(mut self, node_port: u16) -> Result<Self> {
        ensure!(
            NODE_PORT_RANGE.contains(&node_port),
            NodePortOutOfRangeSnafu { port: node_port }
        );
        self.fixed_node_port = Some(node_port);
        Ok(self)
    }
}

#[async_trait]
impl ServiceManager for NodePortService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::NodePort
    }

    fn name(&self) -> Option<&str> {
        self.created
            .as_ref()
            .and_then(|service| service.metadata.name.as_deref())
    }

    fn service(&self) -> Option<&Service> {
        self.created.as_ref()
    }

    fn created_services(&self) -> Vec<(ServiceKind, &Service)> {
        self.created
            .iter()
            .map(|service| (self.kind(), service))
            .collect()
    }

    async fn create(&mut self, config: &ServiceConfig, client: &Client) -> Result<Service> {
        let fixed_node_port = self.fixed_node_port;
        let service = build_service(config, |spec| {
            spec.type_ = Some("NodePort".to_string());
            if let (Some(node_port), Some(ports)) = (fixed_node_port, spec.ports.as_mut()) {
                if let [port] = ports.as_mut_slice() {
                    port.node_port = Some(i32::from(node_port));
                }
            }
        });

        let created = client.create(&service).await.context(CreateServiceSnafu {
            kind: self.kind(),
            name: &config.name,
            namespace: &config.namespace,
        })?;

        info!(service = config.name, namespace = config.namespace, "created NodePort service");
        self.created = Some(created.clone());
        Ok(created)
    }

    async fn delete(&mut self, client: &Client) -> Result<()> {
        let Some(service) = self.created.take() else {
            return Ok(());
        };
        let name = service.metadata.name.unwrap_or_default();
        let namespace = service.metadata.namespace.unwrap_or_default();
        client
            .delete_if_exists::<Service>(&name, &namespace)
            .await
            .context(DeleteServiceSnafu { name, namespace })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{Error, testing::config};

    #[test]
    fn spec_requests_the_node_port_type() {
        let service = build_service(&config("web", vec![80]), |spec| {
            spec.type_ = Some("NodePort".to_string());
        });
        assert_eq!(service.spec.unwrap().type_.as_deref(), Some("NodePort"));
    }

    #[test]
    fn pinned_node_ports_must_sit_in_the_allocatable_range() {
        assert!(NodePortService::default().with_node_port(30080).is_ok());
        assert!(matches!(
            NodePortService::default().with_node_port(8080),
            Err(Error::NodePortOutOfRange { port: 8080 })
        ));
    }
}

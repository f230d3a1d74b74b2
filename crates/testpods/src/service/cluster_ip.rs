//! ClusterIP exposure.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use snafu::ResultExt;
use tracing::info;

use super::{
    CreateServiceSnafu, DeleteServiceSnafu, Result, ServiceConfig, ServiceKind, ServiceManager,
    build_service,
};
use crate::client::Client;

/// The default service type: an in-cluster virtual IP. Reachable by
/// in-cluster clients only.
#[derive(Default)]
pub struct ClusterIpService {
    created: Option<Service>,
}

#[async_trait]
impl ServiceManager for ClusterIpService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::ClusterIp
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
        let service = build_service(config, |_spec| {});
        let created = client.create(&service).await.context(CreateServiceSnafu {
            kind: self.kind(),
            name: &config.name,
            namespace: &config.namespace,
        })?;

        info!(service = config.name, namespace = config.namespace, "created ClusterIP service");
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
    use crate::service::testing::config;

    #[test]
    fn spec_leaves_the_service_type_defaulted() {
        let service = build_service(&config("web", vec![80]), |_| {});
        let spec = service.spec.unwrap();
        assert_eq!(spec.type_, None);
        assert_eq!(spec.cluster_ip, None);
    }

    #[test]
    fn nothing_cached_before_create() {
        let manager = ClusterIpService::default();
        assert!(manager.service().is_none());
        assert!(manager.name().is_none());
        assert!(manager.created_services().is_empty());
    }
}

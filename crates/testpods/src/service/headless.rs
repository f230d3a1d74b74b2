//! Headless exposure.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use snafu::ResultExt;
use tracing::info;

use super::{
    CreateServiceSnafu, DeleteServiceSnafu, Result, ServiceConfig, ServiceKind, ServiceManager,
    build_service,
};
use crate::client::Client;

/// A service without a cluster IP. Exposes per-pod DNS records, which is how
/// the replicas of an ordered workload get stable addresses; it must exist
/// before the replicas start so their DNS is registered in time.
#[derive(Default)]
pub struct HeadlessService {
    created: Option<Service>,
}

#[async_trait]
impl ServiceManager for HeadlessService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Headless
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
        let service = build_service(config, |spec| {
            spec.cluster_ip = Some("None".to_string());
        });
        let created = client.create(&service).await.context(CreateServiceSnafu {
            kind: self.kind(),
            name: &config.name,
            namespace: &config.namespace,
        })?;

        info!(service = config.name, namespace = config.namespace, "created headless service");
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
    fn spec_disables_cluster_ip_allocation() {
        let service = build_service(&config("db", vec![5432]), |spec| {
            spec.cluster_ip = Some("None".to_string());
        });
        assert_eq!(
            service.spec.unwrap().cluster_ip.as_deref(),
            Some("None")
        );
    }
}

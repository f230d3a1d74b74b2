//! The stateless workload controller.

use async_trait::async_trait;
use k8s_openapi::{
    api::apps::v1::{Deployment, DeploymentSpec},
    apimachinery::pkg::apis::meta::v1::LabelSelector,
};
use snafu::ResultExt;
use tracing::info;

use super::{
    CreateWorkloadSnafu, DeleteWorkloadSnafu, ReadStatusSnafu, Result, WorkloadConfig,
    WorkloadKind, WorkloadManager, deployment_is_ready, deployment_is_running,
};
use crate::{builder::ObjectMetaBuilder, client::Client};

#[derive(Clone, Debug)]
struct CreatedWorkload {
    name: String,
    namespace: String,
}

/// Schedules interchangeable replicas behind a label selector.
///
/// Storage arrives pre-wired: the pod template already references the
/// standalone claims the storage plan created, so scheduling blocks until
/// those claims are bound.
#[derive(Default)]
pub struct DeploymentWorkload {
    created: Option<CreatedWorkload>,
}

#[async_trait]
impl WorkloadManager for DeploymentWorkload {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::Stateless
    }

    fn name(&self) -> Option<&str> {
        self.created.as_ref().map(|created| created.name.as_str())
    }

    async fn create(&mut self, config: &WorkloadConfig, client: &Client) -> Result<()> {
        let deployment = Deployment {
            metadata: ObjectMetaBuilder::new()
                .name(&config.name)
                .namespace(&config.namespace)
                .with_labels(config.labels.clone())
                .build(),
            spec: Some(DeploymentSpec {
                replicas: Some(config.replicas),
                selector: LabelSelector {
                    match_labels: Some(config.selector.clone()),
                    ..LabelSelector::default()
                },
                template: config.template.clone(),
                ..DeploymentSpec::default()
            }),
            ..Deployment::default()
        };

        client.create(&deployment).await.context(CreateWorkloadSnafu {
            kind: self.kind(),
            name: &config.name,
            namespace: &config.namespace,
        })?;

        info!(
            deployment = config.name,
            namespace = config.namespace,
            replicas = config.replicas,
            "created Deployment"
        );
        self.created = Some(CreatedWorkload {
            name: config.name.clone(),
            namespace: config.namespace.clone(),
        });
        Ok(())
    }

    async fn delete(&mut self, client: &Client) -> Result<()> {
        let Some(created) = self.created.take() else {
            return Ok(());
        };
        client
            .delete_if_exists::<Deployment>(&created.name, &created.namespace)
            .await
            .context(DeleteWorkloadSnafu {
                kind: self.kind(),
                name: created.name.clone(),
                namespace: created.namespace.clone(),
            })?;
        Ok(())
    }

    async fn is_running(&self, client: &Client) -> Result<bool> {
        let Some(created) = &self.created else {
            return Ok(false);
        };
        let deployment = client
            .try_get::<Deployment>(&created.name, &created.namespace)
            .await
            .context(ReadStatusSnafu {
                kind: self.kind(),
                name: &created.name,
                namespace: &created.namespace,
            })?;
        Ok(deployment.as_ref().is_some_and(deployment_is_running))
    }

    async fn is_ready(&self, client: &Client) -> Result<bool> {
        let Some(created) = &self.created else {
            return Ok(false);
        };
        let deployment = client
            .try_get::<Deployment>(&created.name, &created.namespace)
            .await
            .context(ReadStatusSnafu {
                kind: self.kind(),
                name: &created.name,
                namespace: &created.namespace,
            })?;
        Ok(deployment.as_ref().is_some_and(deployment_is_ready))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::testing::config;

    #[test]
    fn kind_maps_to_the_controller_name() {
        assert_eq!(DeploymentWorkload::default().kind().to_string(), "Deployment");
    }

    #[test]
    fn nothing_cached_before_create() {
        assert!(DeploymentWorkload::default().name().is_none());
    }

    #[test]
    fn config_snapshot_carries_selector_and_template() {
        let config = config("web", WorkloadKind::Stateless);
        assert_eq!(config.selector.get("app"), Some(&"web".to_string()));
        assert!(config.claim_templates.is_empty());
        assert!(config.headless_service.is_none());
    }
}

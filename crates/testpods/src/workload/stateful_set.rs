//! The ordered workload controller.

use async_trait::async_trait;
use k8s_openapi::{
    api::apps::v1::{StatefulSet, StatefulSetSpec},
    apimachinery::pkg::apis::meta::v1::LabelSelector,
};
use snafu::{OptionExt, ResultExt};
use tracing::info;

use super::{
    CreateWorkloadSnafu, DeleteWorkloadSnafu, MissingHeadlessServiceSnafu, ReadStatusSnafu, Result,
    WorkloadConfig, WorkloadKind, WorkloadManager, stateful_set_is_ready, stateful_set_is_running,
};
use crate::{builder::ObjectMetaBuilder, client::Client};

#[derive(Clone, Debug)]
struct CreatedWorkload {
    name: String,
    namespace: String,
}

/// Schedules identity-bearing replicas that start in ordinal order; the
/// replicas are named `{workload}-{ordinal}` by the controller.
///
/// Requires the headless service name provided by the composition layer and
/// accepts claim templates inline in the workload spec. Deleting the
/// workload does not cascade to the claims created from templates; the
/// namespace-scoped cleanup reclaims those.
#[derive(Default)]
pub struct StatefulSetWorkload {
    created: Option<CreatedWorkload>,
}

#[async_trait]
impl WorkloadManager for StatefulSetWorkload {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::Ordered
    }

    fn name(&self) -> Option<&str> {
        self.created.as_ref().map(|created| created.name.as_str())
    }

    async fn create(&mut self, config: &WorkloadConfig, client: &Client) -> Result<()> {
        let headless_service = config
            .headless_service
            .as_ref()
            .context(MissingHeadlessServiceSnafu { name: &config.name })?;

        let stateful_set = StatefulSet {
            metadata: ObjectMetaBuilder::new()
                .name(&config.name)
                .namespace(&config.namespace)
                .with_labels(config.labels.clone())
                .build(),
            spec: Some(StatefulSetSpec {
                replicas: Some(config.replicas),
                selector: LabelSelector {
                    match_labels: Some(config.selector.clone()),
                    ..LabelSelector::default()
                },
                service_name: Some(headless_service.clone()),
                template: config.template.clone(),
                volume_claim_templates: (!config.claim_templates.is_empty())
                    .then(|| config.claim_templates.clone()),
                ..StatefulSetSpec::default()
            }),
            ..StatefulSet::default()
        };

        client
            .create(&stateful_set)
            .await
            .context(CreateWorkloadSnafu {
                kind: self.kind(),
                name: &config.name,
                namespace: &config.namespace,
            })?;

        info!(
            stateful_set = config.name,
            namespace = config.namespace,
            replicas = config.replicas,
            headless_service,
            "created StatefulSet"
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
            .delete_if_exists::<StatefulSet>(&created.name, &created.namespace)
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
        let stateful_set = client
            .try_get::<StatefulSet>(&created.name, &created.namespace)
            .await
            .context(ReadStatusSnafu {
                kind: self.kind(),
                name: &created.name,
                namespace: &created.namespace,
            })?;
        Ok(stateful_set.as_ref().is_some_and(stateful_set_is_running))
    }

    async fn is_ready(&self, client: &Client) -> Result<bool> {
        let Some(created) = &self.created else {
            return Ok(false);
        };
        let stateful_set = client
            .try_get::<StatefulSet>(&created.name, &created.namespace)
            .await
            .context(ReadStatusSnafu {
                kind: self.kind(),
                name: &created.name,
                namespace: &created.namespace,
            })?;
        Ok(stateful_set.as_ref().is_some_and(stateful_set_is_ready))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::{Error, testing::config};

    #[test]
    fn kind_maps_to_the_controller_name() {
        assert_eq!(
            StatefulSetWorkload::default().kind().to_string(),
            "StatefulSet"
        );
    }

    #[test]
    fn config_snapshot_carries_claim_templates_and_headless_service() {
        let config = config("db", WorkloadKind::Ordered);
        assert_eq!(config.claim_templates.len(), 1);
        assert_eq!(config.headless_service.as_deref(), Some("db-headless"));
    }

    #[tokio::test]
    async fn create_without_a_headless_service_is_a_configuration_error() {
        // The config error fires before any cluster call, so a client that
        // cannot connect anywhere is never exercised.
        let kube_client = kube::Client::try_from(
            kube::Config::new("http://127.0.0.1:1".parse().unwrap()),
        )
        .unwrap();
        let client = Client::new(kube_client);

        let mut config = config("db", WorkloadKind::Ordered);
        config.headless_service = None;

        let err = StatefulSetWorkload::default()
            .create(&config, &client)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingHeadlessService { .. }));
    }
}

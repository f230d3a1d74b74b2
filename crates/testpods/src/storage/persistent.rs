//! Persistent storage: a claim template under ordered workloads, a
//! standalone claim under stateless ones.

use async_trait::async_trait;
use k8s_openapi::{
    api::core::v1::{
        PersistentVolumeClaim, PersistentVolumeClaimSpec, Volume, VolumeMount,
        VolumeResourceRequirements,
    },
    apimachinery::pkg::api::resource::Quantity,
};
use snafu::ResultExt;
use tracing::warn;

use super::{CreateClaimSnafu, DeleteClaimSnafu, Result, StorageContext, StorageManager};
use crate::{
    builder::{ObjectMetaBuilder, VolumeBuilder, VolumeMountBuilder},
    client::Client,
    workload::WorkloadKind,
};

/// A persistent volume of caller-selected size and storage class.
///
/// Under an ordered workload the claim becomes an inline template whose name
/// equals the volume name, so every replica gets its own claim. Under a
/// stateless workload a single standalone claim named `{pod}-{volume}` is
/// created up front and referenced by the pod volume.
pub struct PersistentStorage {
    volume_name: String,
    mount_path: String,
    size: String,
    storage_class: Option<String>,
    access_modes: Vec<String>,
}

impl PersistentStorage {
    pub fn new(size: impl Into<String>, mount_path: impl Into<String>) -> Self {
        Self {
            volume_name: "data".to_string(),
            mount_path: mount_path.into(),
            size: size.into(),
            storage_class: None,
            access_modes: vec!["ReadWriteOnce".to_string()],
        }
    }

    pub fn with_volume_name(mut self, volume_name: impl Into<String>) -> Self {
        self.volume_name = volume_name.into();
        self
    }

    pub fn with_storage_class(mut self, storage_class: impl Into<String>) -> Self {
        self.storage_class = Some(storage_class.into());
        self
    }

    pub fn with_access_modes(
        mut self,
        access_modes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.access_modes = access_modes.into_iter().map(Into::into).collect();
        self
    }

    /// The standalone claim name used under stateless workloads. Also the
    /// claim name the pod volume references, by construction.
    fn standalone_claim_name(&self, ctx: &StorageContext<'_>) -> String {
        format!("{}-{}", ctx.pod_name, self.volume_name)
    }

    fn claim_spec(&self) -> PersistentVolumeClaimSpec {
        PersistentVolumeClaimSpec {
            access_modes: Some(self.access_modes.clone()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(
                    [("storage".to_string(), Quantity(self.size.clone()))].into(),
                ),
                ..VolumeResourceRequirements::default()
            }),
            storage_class_name: self.storage_class.clone(),
            ..PersistentVolumeClaimSpec::default()
        }
    }

    fn standalone_claim(&self, ctx: &StorageContext<'_>) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMetaBuilder::new()
                .name(self.standalone_claim_name(ctx))
                .namespace(ctx.namespace)
                .with_labels(ctx.labels.clone())
                .build(),
            spec: Some(self.claim_spec()),
            ..PersistentVolumeClaim::default()
        }
    }
}

#[async_trait]
impl StorageManager for PersistentStorage {
    fn volumes(&self, ctx: &StorageContext<'_>) -> Vec<Volume> {
        match ctx.workload_kind {
            // Claim templates materialize per-replica volumes under the
            // template name, no pod-level volume entry needed.
            WorkloadKind::Ordered => vec![],
            WorkloadKind::Stateless => vec![
                VolumeBuilder::new(&self.volume_name)
                    .with_persistent_volume_claim(self.standalone_claim_name(ctx), false)
                    .build(),
            ],
        }
    }

    fn mounts_for(&self, _container: &str, _ctx: &StorageContext<'_>) -> Vec<VolumeMount> {
        vec![VolumeMountBuilder::new(&self.volume_name, &self.mount_path).build()]
    }

    fn claim_templates(&self, ctx: &StorageContext<'_>) -> Vec<PersistentVolumeClaim> {
        match ctx.workload_kind {
            WorkloadKind::Ordered => vec![PersistentVolumeClaim {
                // The template name equals the volume name the container
                // mounts, which is what makes the pairing line up.
                metadata: ObjectMetaBuilder::new()
                    .name(&self.volume_name)
                    .with_labels(ctx.labels.clone())
                    .build(),
                spec: Some(self.claim_spec()),
                ..PersistentVolumeClaim::default()
            }],
            WorkloadKind::Stateless => vec![],
        }
    }

    async fn create_standalone_claims(
        &self,
        client: &Client,
        ctx: &StorageContext<'_>,
    ) -> Result<Vec<String>> {
        if ctx.workload_kind != WorkloadKind::Stateless {
            return Ok(vec![]);
        }

        let claim = self.standalone_claim(ctx);
        let name = self.standalone_claim_name(ctx);
        client.create(&claim).await.context(CreateClaimSnafu {
            name: &name,
            namespace: ctx.namespace,
        })?;
        Ok(vec![name])
    }

    async fn delete_standalone_claims(
        &self,
        client: &Client,
        ctx: &StorageContext<'_>,
    ) -> Result<()> {
        if ctx.workload_kind != WorkloadKind::Stateless {
            return Ok(());
        }

        let name = self.standalone_claim_name(ctx);
        match client
            .delete_if_exists::<PersistentVolumeClaim>(&name, ctx.namespace)
            .await
        {
            Ok(_) => Ok(()),
            Err(source) => {
                warn!(claim = name, error = %source, "failed to delete standalone claim");
                Err(source).context(DeleteClaimSnafu {
                    name,
                    namespace: ctx.namespace,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{labels, storage::testing::ctx};

    #[test]
    fn ordered_mode_inlines_a_claim_template() {
        let labels = labels::canonical("db");
        let ctx = ctx(&labels, WorkloadKind::Ordered);
        let storage = PersistentStorage::new("1Gi", "/var/lib/postgresql/data");

        assert!(storage.volumes(&ctx).is_empty());

        let templates = storage.claim_templates(&ctx);
        assert_eq!(templates.len(), 1);
        let template = &templates[0];
        assert_eq!(template.metadata.name.as_deref(), Some("data"));

        // Template name and mount volume-name line up.
        let mounts = storage.mounts_for("db", &ctx);
        assert_eq!(mounts[0].name, "data");
        assert_eq!(mounts[0].mount_path, "/var/lib/postgresql/data");

        let spec = template.spec.as_ref().unwrap();
        assert_eq!(
            spec.access_modes.as_deref(),
            Some(&["ReadWriteOnce".to_string()][..])
        );
        let requests = spec.resources.as_ref().unwrap().requests.as_ref().unwrap();
        assert_eq!(requests.get("storage"), Some(&Quantity("1Gi".to_string())));
    }

    #[test]
    fn stateless_mode_uses_a_standalone_claim() {
        let labels = labels::canonical("db");
        let ctx = ctx(&labels, WorkloadKind::Stateless);
        let storage = PersistentStorage::new("1Gi", "/data");

        assert!(storage.claim_templates(&ctx).is_empty());

        let volumes = storage.volumes(&ctx);
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].name, "data");

        // The volume's claim reference equals the standalone claim name.
        let claim_ref = volumes[0].persistent_volume_claim.as_ref().unwrap();
        assert_eq!(claim_ref.claim_name, "db-data");
        assert_eq!(storage.standalone_claim_name(&ctx), "db-data");
    }

    #[test]
    fn storage_class_and_volume_name_are_configurable() {
        let labels = labels::canonical("db");
        let ctx = ctx(&labels, WorkloadKind::Ordered);
        let storage = PersistentStorage::new("10Gi", "/data")
            .with_volume_name("wal")
            .with_storage_class("fast-ssd");

        let templates = storage.claim_templates(&ctx);
        assert_eq!(templates[0].metadata.name.as_deref(), Some("wal"));
        assert_eq!(
            templates[0].spec.as_ref().unwrap().storage_class_name.as_deref(),
            Some("fast-ssd")
        );
    }
}

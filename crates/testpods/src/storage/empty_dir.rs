//! Ephemeral scratch storage.

use async_trait::async_trait;
use k8s_openapi::{
    api::core::v1::{Volume, VolumeMount},
    apimachinery::pkg::api::resource::Quantity,
};

use super::{StorageContext, StorageManager};
use crate::builder::{VolumeBuilder, VolumeMountBuilder};

/// An emptyDir volume: scratch space that lives and dies with the pod.
pub struct EmptyDirStorage {
    volume_name: String,
    mount_path: String,
    medium: Option<String>,
    size_limit: Option<String>,
}

impl EmptyDirStorage {
    pub fn new(mount_path: impl Into<String>) -> Self {
        Self {
            volume_name: "scratch".to_string(),
            mount_path: mount_path.into(),
            medium: None,
            size_limit: None,
        }
    }

    pub fn with_volume_name(mut self, volume_name: impl Into<String>) -> Self {
        self.volume_name = volume_name.into();
        self
    }

    /// Backs the volume with memory instead of node disk.
    pub fn with_memory_medium(mut self) -> Self {
        self.medium = Some("Memory".to_string());
        self
    }

    pub fn with_size_limit(mut self, size_limit: impl Into<String>) -> Self {
        self.size_limit = Some(size_limit.into());
        self
    }
}

#[async_trait]
impl StorageManager for EmptyDirStorage {
    fn volumes(&self, _ctx: &StorageContext<'_>) -> Vec<Volume> {
        vec![
            VolumeBuilder::new(&self.volume_name)
                .with_empty_dir(
                    self.medium.clone(),
                    self.size_limit.clone().map(Quantity),
                )
                .build(),
        ]
    }

    fn mounts_for(&self, _container: &str, _ctx: &StorageContext<'_>) -> Vec<VolumeMount> {
        vec![VolumeMountBuilder::new(&self.volume_name, &self.mount_path).build()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{labels, storage::testing::ctx, workload::WorkloadKind};

    #[test]
    fn volume_and_mount_share_a_name() {
        let labels = labels::canonical("broker");
        let ctx = ctx(&labels, WorkloadKind::Stateless);
        let storage = EmptyDirStorage::new("/tmp/scratch");

        let volumes = storage.volumes(&ctx);
        let mounts = storage.mounts_for("broker", &ctx);
        assert_eq!(volumes[0].name, mounts[0].name);
        assert!(volumes[0].empty_dir.is_some());
        assert!(storage.claim_templates(&ctx).is_empty());
    }

    #[test]
    fn memory_medium_and_size_limit() {
        let labels = labels::canonical("broker");
        let ctx = ctx(&labels, WorkloadKind::Stateless);
        let storage = EmptyDirStorage::new("/dev/shm-backed")
            .with_memory_medium()
            .with_size_limit("256Mi");

        let empty_dir = storage.volumes(&ctx)[0].empty_dir.clone().unwrap();
        assert_eq!(empty_dir.medium.as_deref(), Some("Memory"));
        assert_eq!(empty_dir.size_limit, Some(Quantity("256Mi".to_string())));
    }
}

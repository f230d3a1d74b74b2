//! Mounting an existing config map.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Volume, VolumeMount};

use super::{StorageContext, StorageManager};
use crate::builder::{VolumeBuilder, VolumeMountBuilder};

/// Mounts a config map the user created themselves, read-only.
///
/// The config map is consumed, not owned: it is neither created nor deleted
/// by the harness. For config maps generated from inline file material, see
/// [`super::FileStorage`].
pub struct ConfigMapStorage {
    config_map: String,
    volume_name: String,
    mount_path: String,
}

impl ConfigMapStorage {
    pub fn new(config_map: impl Into<String>, mount_path: impl Into<String>) -> Self {
        let config_map = config_map.into();
        Self {
            volume_name: config_map.clone(),
            config_map,
            mount_path: mount_path.into(),
        }
    }

    pub fn with_volume_name(mut self, volume_name: impl Into<String>) -> Self {
        self.volume_name = volume_name.into();
        self
    }
}

#[async_trait]
impl StorageManager for ConfigMapStorage {
    fn volumes(&self, _ctx: &StorageContext<'_>) -> Vec<Volume> {
        vec![
            VolumeBuilder::new(&self.volume_name)
                .with_config_map(&self.config_map)
                .build(),
        ]
    }

    fn mounts_for(&self, _container: &str, _ctx: &StorageContext<'_>) -> Vec<VolumeMount> {
        vec![
            VolumeMountBuilder::new(&self.volume_name, &self.mount_path)
                .read_only(true)
                .build(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{labels, storage::testing::ctx, workload::WorkloadKind};

    #[test]
    fn mounts_the_config_map_read_only() {
        let labels = labels::canonical("app");
        let ctx = ctx(&labels, WorkloadKind::Stateless);
        let storage = ConfigMapStorage::new("app-settings", "/etc/app");

        let volumes = storage.volumes(&ctx);
        assert_eq!(
            volumes[0].config_map.as_ref().map(|cm| cm.name.as_str()),
            Some("app-settings")
        );

        let mounts = storage.mounts_for("app", &ctx);
        assert_eq!(mounts[0].name, volumes[0].name);
        assert_eq!(mounts[0].read_only, Some(true));

        // Nothing generated: the config map belongs to the user.
        assert!(storage.config_maps(&ctx).is_empty());
    }
}

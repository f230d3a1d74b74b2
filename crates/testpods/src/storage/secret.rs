//! Mounting an existing secret.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Volume, VolumeMount};

use super::{StorageContext, StorageManager};
use crate::builder::{VolumeBuilder, VolumeMountBuilder};

/// Mounts a secret the user created themselves, read-only. Consumed, not
/// owned.
pub struct SecretStorage {
    secret: String,
    volume_name: String,
    mount_path: String,
}

impl SecretStorage {
    pub fn new(secret: impl Into<String>, mount_path: impl Into<String>) -> Self {
        let secret = secret.into();
        Self {
            volume_name: secret.clone(),
            secret,
            mount_path: mount_path.into(),
        }
    }

    pub fn with_volume_name(mut self, volume_name: impl Into<String>) -> Self {
        self.volume_name = volume_name.into();
        self
    }
}

#[async_trait]
impl StorageManager for SecretStorage {
    fn volumes(&self, _ctx: &StorageContext<'_>) -> Vec<Volume> {
        vec![
            VolumeBuilder::new(&self.volume_name)
                .with_secret(&self.secret, false)
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
    fn mounts_the_secret_read_only() {
        let labels = labels::canonical("app");
        let ctx = ctx(&labels, WorkloadKind::Stateless);
        let storage = SecretStorage::new("db-credentials", "/etc/credentials");

        let volumes = storage.volumes(&ctx);
        assert_eq!(
            volumes[0]
                .secret
                .as_ref()
                .and_then(|s| s.secret_name.as_deref()),
            Some("db-credentials")
        );

        let mounts = storage.mounts_for("app", &ctx);
        assert_eq!(mounts[0].name, volumes[0].name);
        assert_eq!(mounts[0].read_only, Some(true));
    }
}

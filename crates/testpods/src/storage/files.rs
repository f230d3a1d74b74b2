//! File material: inline files rendered into a generated config map.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Volume, VolumeMount};

use super::{StorageContext, StorageManager};
use crate::builder::{ObjectMetaBuilder, VolumeBuilder, VolumeMountBuilder};

/// Renders a list of (file name, contents) items into a generated config
/// map, a config-map-backed volume and a read-only mount, all emitted as a
/// unit.
///
/// The typical use is init scripts: files mounted at
/// `/docker-entrypoint-initdb.d` end up in a config map named `{pod}-init`,
/// created before the workload so the mount can never reference a config map
/// that does not exist yet.
pub struct FileStorage {
    volume_name: String,
    mount_path: String,
    name_suffix: String,
    items: BTreeMap<String, String>,
}

impl FileStorage {
    pub fn new(mount_path: impl Into<String>) -> Self {
        Self {
            volume_name: "init-scripts".to_string(),
            mount_path: mount_path.into(),
            name_suffix: "init".to_string(),
            items: BTreeMap::new(),
        }
    }

    /// Adds one file. The name becomes the config map key and therefore the
    /// file name below the mount path.
    pub fn add_file(mut self, name: impl Into<String>, contents: impl Into<String>) -> Self {
        self.items.insert(name.into(), contents.into());
        self
    }

    pub fn with_volume_name(mut self, volume_name: impl Into<String>) -> Self {
        self.volume_name = volume_name.into();
        self
    }

    /// Changes the derived config map name from `{pod}-init` to
    /// `{pod}-{suffix}`.
    pub fn with_name_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.name_suffix = suffix.into();
        self
    }

    fn config_map_name(&self, ctx: &StorageContext<'_>) -> String {
        format!("{}-{}", ctx.pod_name, self.name_suffix)
    }
}

#[async_trait]
impl StorageManager for FileStorage {
    fn volumes(&self, ctx: &StorageContext<'_>) -> Vec<Volume> {
        vec![
            VolumeBuilder::new(&self.volume_name)
                .with_config_map(self.config_map_name(ctx))
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

    fn config_maps(&self, ctx: &StorageContext<'_>) -> Vec<ConfigMap> {
        vec![ConfigMap {
            metadata: ObjectMetaBuilder::new()
                .name(self.config_map_name(ctx))
                .namespace(ctx.namespace)
                .with_labels(ctx.labels.clone())
                .build(),
            data: Some(self.items.clone()),
            ..ConfigMap::default()
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{labels, storage::testing::ctx, workload::WorkloadKind};

    #[test]
    fn emits_config_map_volume_and_mount_as_a_unit() {
        let labels = labels::canonical("db");
        let ctx = ctx(&labels, WorkloadKind::Stateless);
        let storage = FileStorage::new("/docker-entrypoint-initdb.d")
            .add_file("00-schema.sql", "CREATE TABLE users (id int);")
            .add_file("01-seed.sql", "INSERT INTO users VALUES (1);");

        let config_maps = storage.config_maps(&ctx);
        assert_eq!(config_maps.len(), 1);
        let config_map = &config_maps[0];
        assert_eq!(config_map.metadata.name.as_deref(), Some("db-init"));
        assert_eq!(
            config_map.metadata.labels.as_ref().unwrap().get("managed-by"),
            Some(&"testpods".to_string())
        );
        assert_eq!(config_map.data.as_ref().unwrap().len(), 2);

        // The volume points at the generated config map, the mount at the
        // volume, read-only.
        let volumes = storage.volumes(&ctx);
        assert_eq!(volumes[0].name, "init-scripts");
        assert_eq!(
            volumes[0].config_map.as_ref().map(|cm| cm.name.as_str()),
            Some("db-init")
        );

        let mounts = storage.mounts_for("db", &ctx);
        assert_eq!(mounts[0].name, "init-scripts");
        assert_eq!(mounts[0].mount_path, "/docker-entrypoint-initdb.d");
        assert_eq!(mounts[0].read_only, Some(true));
    }

    #[test]
    fn custom_suffix_changes_the_derived_name() {
        let labels = labels::canonical("db");
        let ctx = ctx(&labels, WorkloadKind::Stateless);
        let storage = FileStorage::new("/etc/conf.d")
            .with_name_suffix("conf")
            .add_file("app.conf", "listen = 8080");

        assert_eq!(
            storage.config_maps(&ctx)[0].metadata.name.as_deref(),
            Some("db-conf")
        );
    }
}

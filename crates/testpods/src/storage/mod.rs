//! Storage composition: how a pod's declared storage turns into volumes,
//! container mounts, claim templates and generated dependencies.
//!
//! A [`StorageManager`] is pure data until the orchestrator asks it to
//! create standalone claims; everything else (volumes, mounts, templates,
//! generated config maps) is produced as values and applied by the caller.
//!
//! The classic "mount references a nonexistent volume" bug is ruled out by
//! construction: a variant derives its volume name, mount reference, claim
//! template name and claim reference from the same field, so they cannot
//! drift apart.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Volume, VolumeMount};
use snafu::Snafu;

use crate::{client, client::Client, workload::WorkloadKind};

mod config_map;
mod empty_dir;
mod files;
mod persistent;
mod secret;

pub use config_map::ConfigMapStorage;
pub use empty_dir::EmptyDirStorage;
pub use files::FileStorage;
pub use persistent::PersistentStorage;
pub use secret::SecretStorage;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to create claim {name:?} in namespace {namespace:?}"))]
    CreateClaim {
        source: client::Error,
        name: String,
        namespace: String,
    },

    #[snafu(display("failed to delete claim {name:?} in namespace {namespace:?}"))]
    DeleteClaim {
        source: client::Error,
        name: String,
        namespace: String,
    },
}

/// Everything a storage manager needs to know about the pod it serves.
#[derive(Clone, Debug)]
pub struct StorageContext<'a> {
    pub pod_name: &'a str,
    pub namespace: &'a str,
    pub labels: &'a BTreeMap<String, String>,
    pub workload_kind: WorkloadKind,
}

/// One orthogonal slice of a pod's storage plan.
#[async_trait]
pub trait StorageManager: Send + Sync {
    /// Volumes to add to the pod spec.
    fn volumes(&self, ctx: &StorageContext<'_>) -> Vec<Volume>;

    /// Mounts to add to the named container.
    fn mounts_for(&self, container: &str, ctx: &StorageContext<'_>) -> Vec<VolumeMount>;

    /// Claim templates to inline into an ordered workload's spec.
    fn claim_templates(&self, ctx: &StorageContext<'_>) -> Vec<PersistentVolumeClaim> {
        let _ = ctx;
        vec![]
    }

    /// Config maps this storage generates and therefore owns (file-material
    /// rendering). Created before the workload, deleted at teardown.
    fn config_maps(&self, ctx: &StorageContext<'_>) -> Vec<ConfigMap> {
        let _ = ctx;
        vec![]
    }

    /// Secrets this storage generates and therefore owns. Created before the
    /// workload, deleted at teardown.
    fn secrets(&self, ctx: &StorageContext<'_>) -> Vec<Secret> {
        let _ = ctx;
        vec![]
    }

    /// Creates the standalone claims a stateless workload needs bound before
    /// its pods can schedule. Returns the created claim names so the caller
    /// can record them for rollback.
    async fn create_standalone_claims(
        &self,
        client: &Client,
        ctx: &StorageContext<'_>,
    ) -> Result<Vec<String>> {
        let _ = (client, ctx);
        Ok(vec![])
    }

    /// Best-effort removal of the claims created by
    /// [`Self::create_standalone_claims`].
    async fn delete_standalone_claims(
        &self,
        client: &Client,
        ctx: &StorageContext<'_>,
    ) -> Result<()> {
        let _ = (client, ctx);
        Ok(())
    }
}

/// The storage plan of a pod without storage.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoStorage;

#[async_trait]
impl StorageManager for NoStorage {
    fn volumes(&self, _ctx: &StorageContext<'_>) -> Vec<Volume> {
        vec![]
    }

    fn mounts_for(&self, _container: &str, _ctx: &StorageContext<'_>) -> Vec<VolumeMount> {
        vec![]
    }
}

/// Union of several storage slices.
#[derive(Default)]
pub struct CompositeStorage {
    children: Vec<Box<dyn StorageManager>>,
}

impl CompositeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, child: impl StorageManager + 'static) -> Self {
        self.children.push(Box::new(child));
        self
    }
}

#[async_trait]
impl StorageManager for CompositeStorage {
    fn volumes(&self, ctx: &StorageContext<'_>) -> Vec<Volume> {
        self.children
            .iter()
            .flat_map(|child| child.volumes(ctx))
            .collect()
    }

    fn mounts_for(&self, container: &str, ctx: &StorageContext<'_>) -> Vec<VolumeMount> {
        self.children
            .iter()
            .flat_map(|child| child.mounts_for(container, ctx))
            .collect()
    }

    fn claim_templates(&self, ctx: &StorageContext<'_>) -> Vec<PersistentVolumeClaim> {
        self.children
            .iter()
            .flat_map(|child| child.claim_templates(ctx))
            .collect()
    }

    fn config_maps(&self, ctx: &StorageContext<'_>) -> Vec<ConfigMap> {
        self.children
            .iter()
            .flat_map(|child| child.config_maps(ctx))
            .collect()
    }

    fn secrets(&self, ctx: &StorageContext<'_>) -> Vec<Secret> {
        self.children
            .iter()
            .flat_map(|child| child.secrets(ctx))
            .collect()
    }

    async fn create_standalone_claims(
        &self,
        client: &Client,
        ctx: &StorageContext<'_>,
    ) -> Result<Vec<String>> {
        let mut created = vec![];
        for child in &self.children {
            created.extend(child.create_standalone_claims(client, ctx).await?);
        }
        Ok(created)
    }

    async fn delete_standalone_claims(
        &self,
        client: &Client,
        ctx: &StorageContext<'_>,
    ) -> Result<()> {
        for child in self.children.iter().rev() {
            child.delete_standalone_claims(client, ctx).await?;
        }
        Ok(())
    }
}

/// No storage at all.
pub fn none() -> NoStorage {
    NoStorage
}

/// A persistent volume of the given size, mounted at `mount_path`.
pub fn persistent(size: impl Into<String>, mount_path: impl Into<String>) -> PersistentStorage {
    PersistentStorage::new(size, mount_path)
}

/// An ephemeral scratch volume mounted at `mount_path`.
pub fn empty_dir(mount_path: impl Into<String>) -> EmptyDirStorage {
    EmptyDirStorage::new(mount_path)
}

/// An existing config map mounted read-only at `mount_path`.
pub fn config_map(name: impl Into<String>, mount_path: impl Into<String>) -> ConfigMapStorage {
    ConfigMapStorage::new(name, mount_path)
}

/// An existing secret mounted read-only at `mount_path`.
pub fn secret(name: impl Into<String>, mount_path: impl Into<String>) -> SecretStorage {
    SecretStorage::new(name, mount_path)
}

/// File material (e.g. init scripts) rendered into a generated config map
/// and mounted read-only at `mount_path`.
pub fn files(mount_path: impl Into<String>) -> FileStorage {
    FileStorage::new(mount_path)
}

/// Union of several storage slices.
pub fn composite() -> CompositeStorage {
    CompositeStorage::new()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub(crate) fn ctx<'a>(
        labels: &'a BTreeMap<String, String>,
        workload_kind: WorkloadKind,
    ) -> StorageContext<'a> {
        StorageContext {
            pod_name: "db",
            namespace: "testpods-suite-a1b2c",
            labels,
            workload_kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::ctx, *};
    use crate::labels;

    #[test]
    fn no_storage_is_empty() {
        let labels = labels::canonical("db");
        let ctx = ctx(&labels, WorkloadKind::Stateless);

        assert!(NoStorage.volumes(&ctx).is_empty());
        assert!(NoStorage.mounts_for("db", &ctx).is_empty());
        assert!(NoStorage.claim_templates(&ctx).is_empty());
        assert!(NoStorage.config_maps(&ctx).is_empty());
    }

    #[test]
    fn composite_unions_children() {
        let labels = labels::canonical("db");
        let ctx = ctx(&labels, WorkloadKind::Ordered);

        let storage = composite()
            .add(persistent("1Gi", "/var/lib/postgresql/data"))
            .add(files("/docker-entrypoint-initdb.d").add_file("00-init.sql", "CREATE TABLE t ();"));

        // The persistent slice contributes a claim template (ordered mode),
        // the file slice a config-map volume, and both contribute mounts.
        assert_eq!(storage.claim_templates(&ctx).len(), 1);
        assert_eq!(storage.volumes(&ctx).len(), 1);
        assert_eq!(storage.mounts_for("db", &ctx).len(), 2);
        assert_eq!(storage.config_maps(&ctx).len(), 1);
    }
}

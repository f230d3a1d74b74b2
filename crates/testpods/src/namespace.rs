//! Per-test-class namespaces: naming, idempotent creation and scope-aware
//! cleanup.

use std::time::Duration;

use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    core::v1::{ConfigMap, Namespace, PersistentVolumeClaim, Secret, Service},
};
use rand::Rng;
use snafu::{ResultExt, Snafu};
use tracing::{debug, info, warn};

use crate::{
    builder::ObjectMetaBuilder,
    client::{self, Client, NamespacedResource},
    cluster::ClusterHandle,
    labels, validation,
};

type Result<T, E = Error> = std::result::Result<T, E>;

const NAMESPACE_PREFIX: &str = "testpods-";
const SUFFIX_LENGTH: usize = 5;
const MAX_NAME_LENGTH: usize = 63;
// Leaves room for the separating dash and the random suffix.
const MAX_BASE_LENGTH: usize = MAX_NAME_LENGTH - 1 - SUFFIX_LENGTH;

/// How long [`TestNamespace::delete`] waits for the namespace to disappear.
pub const NAMESPACE_DELETE_BUDGET: Duration = Duration::from_secs(120);

const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("namespace name {name:?} is invalid: {reasons}"))]
    InvalidName { name: String, reasons: String },

    #[snafu(display("failed to create namespace {name:?}"))]
    CreateNamespace {
        source: client::Error,
        name: String,
    },

    #[snafu(display("failed to look up namespace {name:?}"))]
    Lookup {
        source: client::Error,
        name: String,
    },

    #[snafu(display("failed to initiate deletion of namespace {name:?}"))]
    DeleteNamespace {
        source: client::Error,
        name: String,
    },

    #[snafu(display("namespace {name:?} still existed after {budget:?}"))]
    DeleteTimeout { name: String, budget: Duration },

    #[snafu(display("failed to list managed resources in namespace {name:?}"))]
    ListManaged {
        source: client::Error,
        name: String,
    },
}

/// Derives a namespace name from a test-class identity:
/// `testpods-<sanitized-identity>-<5-char-suffix>`, at most 63 characters.
///
/// Sanitization lowercases the identity and strips everything outside
/// `[a-z0-9-]`. The suffix is drawn from a cryptographically secure generator
/// so concurrently running suites cannot collide.
pub fn for_test_class(identity: &str) -> String {
    let slug: String = identity
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect();

    let mut base = if slug.is_empty() {
        NAMESPACE_PREFIX.trim_end_matches('-').to_string()
    } else {
        format!("{NAMESPACE_PREFIX}{slug}")
    };
    base.truncate(MAX_BASE_LENGTH);

    format!("{base}-{}", random_suffix())
}

/// Validates a caller-chosen namespace name and passes it through unchanged.
pub fn fixed(name: &str) -> Result<String> {
    validation::validate_namespace_name(name).map_err(|reasons| Error::InvalidName {
        name: name.to_string(),
        reasons: reasons.join(", "),
    })?;
    Ok(name.to_string())
}

fn random_suffix() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    // rand's thread-local generator is a CSPRNG.
    let mut rng = rand::rng();
    (0..SUFFIX_LENGTH)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// A cluster namespace shared by the pods of one test class.
///
/// The `created_by_us` flag records whether this instance actually created
/// the namespace, so framework scopes can decide whether tearing it down is
/// theirs to do.
pub struct TestNamespace {
    client: Client,
    name: String,
    created_by_us: bool,
}

impl TestNamespace {
    pub fn new(cluster: &dyn ClusterHandle, name: impl Into<String>) -> Self {
        Self::with_client(cluster.client().clone(), name)
    }

    pub fn with_client(client: Client, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
            created_by_us: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_by_us(&self) -> bool {
        self.created_by_us
    }

    pub async fn exists(&self) -> Result<bool> {
        let found = self
            .client
            .try_get_cluster_scoped::<Namespace>(&self.name)
            .await
            .context(LookupSnafu { name: &self.name })?;
        Ok(found.is_some())
    }

    /// Creates the namespace if it does not exist yet. Safe to call multiple
    /// times and from concurrent tests; a lost create race counts as
    /// "already existed".
    pub async fn create_if_not_exists(&mut self) -> Result<()> {
        if self.exists().await? {
            debug!(namespace = self.name, "namespace already exists");
            return Ok(());
        }

        let namespace = Namespace {
            metadata: ObjectMetaBuilder::new()
                .name(&self.name)
                .with_labels(labels::namespace_labels())
                .build(),
            ..Namespace::default()
        };

        match self.client.create_cluster_scoped(&namespace).await {
            Ok(_) => {
                info!(namespace = self.name, "created namespace");
                self.created_by_us = true;
                Ok(())
            }
            Err(err) => {
                if let client::Error::Create { source, .. } = &err {
                    if client::is_conflict(source) {
                        debug!(namespace = self.name, "lost create race, namespace exists");
                        return Ok(());
                    }
                }
                Err(err).context(CreateNamespaceSnafu { name: &self.name })
            }
        }
    }

    /// Initiates deletion and waits until the namespace is gone, bounded by
    /// [`NAMESPACE_DELETE_BUDGET`].
    pub async fn delete(&mut self) -> Result<()> {
        self.client
            .delete_cluster_scoped::<Namespace>(&self.name)
            .await
            .context(DeleteNamespaceSnafu { name: &self.name })?;

        let deadline = tokio::time::Instant::now() + NAMESPACE_DELETE_BUDGET;
        loop {
            if !self.exists().await? {
                info!(namespace = self.name, "namespace deleted");
                self.created_by_us = false;
                return Ok(());
            }
            if tokio::time::Instant::now() + DELETE_POLL_INTERVAL > deadline {
                return DeleteTimeoutSnafu {
                    name: &self.name,
                    budget: NAMESPACE_DELETE_BUDGET,
                }
                .fail();
            }
            tokio::time::sleep(DELETE_POLL_INTERVAL).await;
        }
    }

    /// Deletes every resource in this namespace carrying the
    /// `managed-by=testpods` label. Resources the user created alongside are
    /// left untouched, as is the namespace itself.
    pub async fn delete_managed_resources(&self) -> Result<()> {
        self.delete_all_managed::<StatefulSet>().await?;
        self.delete_all_managed::<Deployment>().await?;
        self.delete_all_managed::<Service>().await?;
        self.delete_all_managed::<ConfigMap>().await?;
        self.delete_all_managed::<Secret>().await?;
        self.delete_all_managed::<PersistentVolumeClaim>().await?;
        Ok(())
    }

    async fn delete_all_managed<T: NamespacedResource>(&self) -> Result<()> {
        let items = self
            .client
            .list_labeled::<T>(&self.name, labels::MANAGED_BY_SELECTOR)
            .await
            .context(ListManagedSnafu { name: &self.name })?;

        for item in items {
            let Some(resource) = item.meta().name.clone() else {
                continue;
            };
            if let Err(err) = self
                .client
                .delete_if_exists::<T>(&resource, &self.name)
                .await
            {
                warn!(
                    namespace = self.name,
                    resource,
                    error = %err,
                    "failed to delete managed resource, continuing"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use rstest::rstest;

    use super::*;

    #[test]
    fn test_class_names_are_valid() {
        let name = for_test_class("PostgresIntegrationTest");
        assert!(name.starts_with("testpods-postgresintegrationtest-"));
        assert!(validation::validate_namespace_name(&name).is_ok());
    }

    #[test]
    fn test_class_names_strip_disallowed_characters() {
        let name = for_test_class("com.example.KafkaIT$Nested");
        assert!(name.starts_with("testpods-comexamplekafkaitnested-"));
    }

    #[test]
    fn long_identities_truncate_to_exactly_63() {
        let name = for_test_class(&"a".repeat(200));
        assert_eq!(name.len(), 63);
        assert!(validation::validate_namespace_name(&name).is_ok());
    }

    #[test]
    fn empty_identity_still_produces_a_name() {
        let name = for_test_class("$$$");
        assert!(name.starts_with("testpods-"));
        assert_eq!(name.len(), "testpods-".len() + SUFFIX_LENGTH);
        assert!(validation::validate_namespace_name(&name).is_ok());
    }

    #[test]
    fn names_are_distinct_across_calls() {
        let names: BTreeSet<_> = (0..64).map(|_| for_test_class("SameSuite")).collect();
        assert_eq!(names.len(), 64);
    }

    #[test]
    fn suffix_uses_the_documented_alphabet() {
        let name = for_test_class("suite");
        let suffix = name.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), SUFFIX_LENGTH);
        assert!(
            suffix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        );
    }

    #[rstest]
    #[case("testpods-fixed")]
    #[case("my-namespace")]
    #[case("a")]
    fn fixed_accepts_valid_names(#[case] name: &str) {
        assert_eq!(fixed(name).unwrap(), name);
    }

    #[rstest]
    #[case("Not-Valid")]
    #[case("has.dots")]
    #[case("-leading-dash")]
    #[case("")]
    fn fixed_rejects_invalid_names(#[case] name: &str) {
        assert!(matches!(fixed(name), Err(Error::InvalidName { .. })));
    }
}

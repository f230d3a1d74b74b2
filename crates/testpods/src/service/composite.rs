//! Composite exposure: several services from one base name.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use tracing::warn;

use super::{Result, ServiceConfig, ServiceKind, ServiceManager};
use crate::client::Client;

struct Entry {
    manager: Box<dyn ServiceManager>,
    suffix: String,
}

/// Holds an ordered list of concrete managers and a parallel list of name
/// suffixes. On create, sub-manager `i` receives the config renamed to
/// `{base}{suffix[i]}`; the first created service is the primary. Deletion
/// runs in reverse order and swallows individual failures.
#[derive(Default)]
pub struct CompositeService {
    entries: Vec<Entry>,
}

impl CompositeService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sub-manager under the base name (no suffix). Conventionally
    /// the first entry.
    pub fn add(self, manager: impl ServiceManager + 'static) -> Self {
        self.add_suffixed(manager, "")
    }

    /// Adds a sub-manager whose service name is `{base}{suffix}`.
    pub fn add_suffixed(
        mut self,
        manager: impl ServiceManager + 'static,
        suffix: impl Into<String>,
    ) -> Self {
        self.entries.push(Entry {
            manager: Box::new(manager),
            suffix: suffix.into(),
        });
        self
    }
}

#[async_trait]
impl ServiceManager for CompositeService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Composite
    }

    fn name(&self) -> Option<&str> {
        self.entries.first().and_then(|entry| entry.manager.name())
    }

    fn service(&self) -> Option<&Service> {
        self.entries
            .first()
            .and_then(|entry| entry.manager.service())
    }

    fn created_services(&self) -> Vec<(ServiceKind, &Service)> {
        self.entries
            .iter()
            .flat_map(|entry| entry.manager.created_services())
            .collect()
    }

    async fn create(&mut self, config: &ServiceConfig, client: &Client) -> Result<Service> {
        let mut primary = None;
        for entry in &mut self.entries {
            let sub_config = config.renamed(format!("{}{}", config.name, entry.suffix));
            // A failure mid-way leaves earlier sub-services recorded in
            // their managers; `delete` cleans them up.
            let created = entry.manager.create(&sub_config, client).await?;
            if primary.is_none() {
                primary = Some(created);
            }
        }

        // An empty composite produces no services; hand back a default
        // object so the caller has something inert to cache.
        Ok(primary.unwrap_or_default())
    }

    async fn delete(&mut self, client: &Client) -> Result<()> {
        for entry in self.entries.iter_mut().rev() {
            if let Err(err) = entry.manager.delete(client).await {
                warn!(error = %err, "failed to delete sub-service, continuing");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{cluster_ip, headless, node_port};

    #[test]
    fn primary_is_the_first_entry() {
        let composite = CompositeService::new()
            .add_suffixed(headless(), "-headless")
            .add(node_port());

        // Nothing created yet, so no primary either.
        assert!(composite.service().is_none());
        assert_eq!(composite.kind(), ServiceKind::Composite);
        assert_eq!(composite.entries.len(), 2);
        assert_eq!(composite.entries[0].suffix, "-headless");
        assert_eq!(composite.entries[1].suffix, "");
    }

    #[test]
    fn suffixes_compose_with_the_base_name() {
        let config = crate::service::testing::config("db", vec![5432]);
        let renamed = config.renamed(format!("{}{}", config.name, "-headless"));
        assert_eq!(renamed.name, "db-headless");
    }

    #[test]
    fn created_services_aggregates_children() {
        let composite = CompositeService::new()
            .add(cluster_ip())
            .add_suffixed(node_port(), "-external");
        assert!(composite.created_services().is_empty());
    }
}

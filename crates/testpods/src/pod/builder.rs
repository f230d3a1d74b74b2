//! Configuration-time assembly of a [`TestPod`].

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use k8s_openapi::api::core::v1::{Container, PodSpec, Service};

use super::{
    ContainerCustomizer, Error, LifecycleState, PodSpecCustomizer, Result, TestPod,
};
use crate::{
    cluster::ClusterHandle,
    labels, service,
    service::ServiceManager,
    storage,
    storage::{StorageContext, StorageManager},
    validation, wait,
    wait::WaitStrategy,
    workload,
    workload::{WorkloadKind, WorkloadManager},
};

/// An owned, mutable builder finalizing into an immutable [`TestPod`]
/// descriptor.
///
/// Component choices (workload kind, services, storage, wait strategy) get
/// type-appropriate defaults: a stateless pod becomes a Deployment behind a
/// NodePort service, an ordered pod a StatefulSet behind a headless sibling
/// plus a NodePort, both gated on the cluster's readiness signal.
pub struct TestPodBuilder {
    name: String,
    image: Option<String>,
    ports: Vec<u16>,
    env: Vec<(String, String)>,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    command: Option<Vec<String>>,
    args: Option<Vec<String>>,
    image_pull_policy: Option<String>,
    replicas: i32,
    workload_kind: WorkloadKind,
    namespace: Option<String>,
    cluster: Option<Arc<dyn ClusterHandle>>,
    service: Option<Box<dyn ServiceManager>>,
    storage: Option<Box<dyn StorageManager>>,
    wait: Option<Box<dyn WaitStrategy>>,
    wait_timeout: Option<Duration>,
    container_customizers: Vec<ContainerCustomizer>,
    pod_customizers: Vec<PodSpecCustomizer>,
    service_customizers: Vec<service::ServiceCustomizer>,
}

impl TestPodBuilder {
    pub(super) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: None,
            ports: vec![],
            env: vec![],
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            command: None,
            args: None,
            image_pull_policy: None,
            replicas: 1,
            workload_kind: WorkloadKind::Stateless,
            namespace: None,
            cluster: None,
            service: None,
            storage: None,
            wait: None,
            wait_timeout: None,
            container_customizers: vec![],
            pod_customizers: vec![],
            service_customizers: vec![],
        }
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Declares a port the container listens on. Also becomes a service
    /// port.
    pub fn port(mut self, port: u16) -> Self {
        self.ports.push(port);
        self
    }

    pub fn ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.ports.extend(ports);
        self
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((name.into(), value.into()));
        self
    }

    /// An extra label applied to every created resource, on top of the
    /// canonical `app` and `managed-by` labels.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn command(mut self, command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = Some(command.into_iter().map(Into::into).collect());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn image_pull_policy(mut self, policy: impl Into<String>) -> Self {
        self.image_pull_policy = Some(policy.into());
        self
    }

    pub fn replicas(mut self, replicas: i32) -> Self {
        self.replicas = replicas;
        self
    }

    /// Runs the pod as an ordered workload (StatefulSet) instead of the
    /// default stateless one.
    pub fn ordered(mut self) -> Self {
        self.workload_kind = WorkloadKind::Ordered;
        self
    }

    pub fn workload_kind(mut self, kind: WorkloadKind) -> Self {
        self.workload_kind = kind;
        self
    }

    /// Pins the namespace instead of resolving it from the ambient defaults
    /// or deriving it from the pod name.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Pins the cluster instead of resolving it from the ambient defaults
    /// or discovering the local one.
    pub fn cluster(mut self, cluster: Arc<dyn ClusterHandle>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Replaces the default endpoint exposure.
    pub fn service(mut self, service: impl ServiceManager + 'static) -> Self {
        self.service = Some(Box::new(service));
        self
    }

    /// Replaces the default (empty) storage plan.
    pub fn storage(mut self, storage: impl StorageManager + 'static) -> Self {
        self.storage = Some(Box::new(storage));
        self
    }

    /// Replaces the default readiness strategy.
    pub fn wait_for(mut self, wait: impl WaitStrategy + 'static) -> Self {
        self.wait = Some(Box::new(wait));
        self
    }

    /// Overrides the effective readiness deadline, taking precedence over
    /// the strategy's own timeout and the workload-kind default.
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    pub fn customize_container(
        mut self,
        customizer: impl Fn(&mut Container) + Send + Sync + 'static,
    ) -> Self {
        self.container_customizers.push(Arc::new(customizer));
        self
    }

    pub fn customize_pod_spec(
        mut self,
        customizer: impl Fn(&mut PodSpec) + Send + Sync + 'static,
    ) -> Self {
        self.pod_customizers.push(Arc::new(customizer));
        self
    }

    pub fn customize_service(
        mut self,
        customizer: impl Fn(&mut Service) + Send + Sync + 'static,
    ) -> Self {
        self.service_customizers.push(Arc::new(customizer));
        self
    }

    /// Validates the configuration and freezes it into a [`TestPod`].
    pub fn build(self) -> Result<TestPod> {
        let configuration_error = |reason: String| Error::Configuration {
            pod: self.name.clone(),
            reason,
        };

        validation::validate_pod_name(&self.name)
            .map_err(|reasons| configuration_error(reasons.join(", ")))?;

        let image = self
            .image
            .clone()
            .ok_or_else(|| configuration_error("an image is required".to_string()))?;

        if self.replicas < 1 {
            return Err(configuration_error(format!(
                "replicas must be at least 1, got {}",
                self.replicas
            )));
        }

        if let Some(namespace) = &self.namespace {
            validation::validate_namespace_name(namespace).map_err(|reasons| {
                configuration_error(format!("namespace {namespace:?}: {}", reasons.join(", ")))
            })?;
        }

        let storage = self
            .storage
            .unwrap_or_else(|| Box::new(storage::none()));
        Self::check_storage_plan(&self.name, self.workload_kind, storage.as_ref())?;

        let workload: Box<dyn WorkloadManager> = match self.workload_kind {
            WorkloadKind::Stateless => Box::new(workload::stateless()),
            WorkloadKind::Ordered => Box::new(workload::ordered()),
        };

        let services = self
            .service
            .unwrap_or_else(|| Self::default_services(self.workload_kind));

        let wait = self
            .wait
            .unwrap_or_else(|| Box::new(wait::readiness_probe()));

        Ok(TestPod {
            name: self.name,
            image,
            ports: self.ports,
            env: self.env,
            extra_labels: self.labels,
            annotations: self.annotations,
            command: self.command,
            args: self.args,
            image_pull_policy: self.image_pull_policy,
            replicas: self.replicas,
            workload_kind: self.workload_kind,
            explicit_namespace: self.namespace,
            explicit_cluster: self.cluster,
            wait_timeout: self.wait_timeout,
            container_customizers: self.container_customizers,
            pod_customizers: self.pod_customizers,
            service_customizers: self.service_customizers,
            workload,
            services,
            storage,
            wait,
            state: LifecycleState::Configured,
            runtime: None,
            external: None,
            rollback: vec![],
        })
    }

    /// The exposure a pod gets when the test does not choose one.
    ///
    /// Stateless pods get a single NodePort service so the test process can
    /// reach them from outside the cluster. Ordered pods additionally need
    /// the headless sibling, created first so pod DNS is registered before
    /// the replicas start.
    fn default_services(kind: WorkloadKind) -> Box<dyn ServiceManager> {
        match kind {
            WorkloadKind::Stateless => Box::new(service::node_port()),
            WorkloadKind::Ordered => Box::new(
                service::composite()
                    .add_suffixed(service::headless(), "-headless")
                    .add(service::node_port()),
            ),
        }
    }

    /// Rules the "mount references a nonexistent volume" class of bugs out
    /// before anything reaches the cluster.
    fn check_storage_plan(
        name: &str,
        kind: WorkloadKind,
        storage: &dyn StorageManager,
    ) -> Result<()> {
        let probe_labels = labels::canonical(name);
        let ctx = StorageContext {
            pod_name: name,
            namespace: "default",
            labels: &probe_labels,
            workload_kind: kind,
        };

        let mut volume_names = std::collections::BTreeSet::new();
        let declared = storage
            .volumes(&ctx)
            .into_iter()
            .map(|volume| volume.name)
            .chain(
                storage
                    .claim_templates(&ctx)
                    .into_iter()
                    .filter_map(|template| template.metadata.name),
            );
        for volume_name in declared {
            if !volume_names.insert(volume_name.clone()) {
                return Err(Error::Configuration {
                    pod: name.to_string(),
                    reason: format!("duplicate volume name {volume_name:?} in the storage plan"),
                });
            }
        }

        for mount in storage.mounts_for(name, &ctx) {
            if !volume_names.contains(&mount.name) {
                return Err(Error::Configuration {
                    pod: name.to_string(),
                    reason: format!(
                        "mount at {:?} references volume {:?} which no storage slice declares",
                        mount.mount_path, mount.name
                    ),
                });
            }
        }
        Ok(())
    }
}

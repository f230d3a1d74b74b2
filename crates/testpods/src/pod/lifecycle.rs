//! The start/stop protocol: ordered resource creation, readiness gating,
//! endpoint resolution, rollback and reverse-order teardown.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    core::v1::{ConfigMap, PersistentVolumeClaim, Pod, PodSpec, PodTemplateSpec, Secret},
};
use snafu::{OptionExt, ResultExt, ensure};
use tracing::{debug, info, warn};

use super::{
    ClusterResolutionSnafu, CreatedResource, DEFAULT_ORDERED_WAIT, DEFAULT_STATELESS_WAIT,
    EndpointUnavailableSnafu, Error, ExecCommandSnafu, FetchLogsSnafu, LifecycleState,
    ListReplicasSnafu, NoExternalServiceSnafu, NoPodsScheduledSnafu, NotStartedSnafu, Result,
    RollbackOutcome, Runtime, StartPreconditionSnafu, StartStep, StepError, StopFailure,
    StopReport, TestPod, WorkloadStateSnafu,
};
use crate::{
    builder::{ContainerBuilder, ObjectMetaBuilder},
    client::{Client, ExecStatus},
    cluster::{ClusterHandle, LocalCluster},
    defaults::Defaults,
    host_and_port::HostAndPort,
    labels, namespace,
    namespace::TestNamespace,
    service::{ServiceConfig, ServiceKind},
    storage::StorageContext,
    wait::{TargetError, WaitTarget},
    workload::{WorkloadConfig, WorkloadKind, deployment_is_ready, stateful_set_is_ready},
};

impl TestPod {
    /// Provisions the pod into the cluster and blocks until it is ready.
    ///
    /// Creation order is strict: namespace, generated config maps and
    /// secrets, standalone claims, services (headless first for ordered
    /// workloads), workload, readiness gate, external endpoint. Any failure
    /// after the namespace step rolls the recorded resources back in
    /// reverse order and leaves the namespace in place for debugging.
    pub async fn start(&mut self) -> Result<()> {
        ensure!(
            self.state == LifecycleState::Configured,
            StartPreconditionSnafu {
                pod: &self.name,
                state: self.state,
            }
        );
        self.state = LifecycleState::Starting;
        info!(pod = self.name, "starting pod");

        let cluster = self.resolve_cluster().await?;
        let namespace = self.resolve_namespace();
        self.runtime = Some(Runtime {
            cluster: Arc::clone(&cluster),
            namespace: namespace.clone(),
        });

        match self.run_start(&cluster, &namespace).await {
            Ok(endpoint) => {
                self.external = endpoint;
                self.state = LifecycleState::Ready;
                info!(pod = self.name, namespace, "pod ready");
                Ok(())
            }
            Err((step, source)) => {
                warn!(
                    pod = self.name,
                    namespace,
                    step = %step,
                    error = %source,
                    "start failed, rolling back created resources"
                );
                let rollback = self.roll_back(cluster.client(), &namespace).await;
                self.state = LifecycleState::Failed;
                Err(Error::StartFailed {
                    pod: self.name.clone(),
                    namespace,
                    step,
                    source,
                    rollback,
                })
            }
        }
    }

    /// Dismantles the pod's resources in reverse creation order.
    ///
    /// Deletion is best-effort: a failure on one resource does not prevent
    /// attempts on the rest, and failures are reported in the returned
    /// summary instead of being raised. Calling `stop` on a pod that is not
    /// ready (never started, already stopped, failed and rolled back) is a
    /// no-op.
    pub async fn stop(&mut self) -> StopReport {
        let mut report = StopReport::default();
        if self.state != LifecycleState::Ready {
            debug!(pod = self.name, state = %self.state, "stop is a no-op");
            return report;
        }
        let Some(runtime) = self.runtime.clone() else {
            return report;
        };
        self.state = LifecycleState::Stopping;
        info!(pod = self.name, namespace = runtime.namespace, "stopping pod");

        let client = runtime.cluster.client().clone();
        let all_labels = self.all_labels();
        let pod_name = self.name.clone();
        let ctx = StorageContext {
            pod_name: &pod_name,
            namespace: &runtime.namespace,
            labels: &all_labels,
            workload_kind: self.workload_kind,
        };

        // Reverse creation order: workload, services, standalone claims,
        // generated config and secret resources. Claims materialized from
        // ordered-workload templates are left for the namespace cleanup.
        let workload_kind = self.workload.kind();
        match self.workload.delete(&client).await {
            Ok(()) => report.deleted.push(format!("{workload_kind} {pod_name}")),
            Err(err) => record_stop_failure(
                &mut report,
                format!("{workload_kind} {pod_name}"),
                err.to_string(),
            ),
        }

        match self.services.delete(&client).await {
            Ok(()) => report.deleted.push("services".to_string()),
            Err(err) => record_stop_failure(&mut report, "services".to_string(), err.to_string()),
        }

        if let Err(err) = self.storage.delete_standalone_claims(&client, &ctx).await {
            record_stop_failure(&mut report, "standalone claims".to_string(), err.to_string());
        }

        for config_map in self.storage.config_maps(&ctx) {
            let name = config_map.metadata.name.unwrap_or_default();
            match client
                .delete_if_exists::<ConfigMap>(&name, &runtime.namespace)
                .await
            {
                Ok(_) => report.deleted.push(format!("configmap {name}")),
                Err(err) => {
                    record_stop_failure(&mut report, format!("configmap {name}"), err.to_string());
                }
            }
        }

        for secret in self.storage.secrets(&ctx) {
            let name = secret.metadata.name.unwrap_or_default();
            match client
                .delete_if_exists::<Secret>(&name, &runtime.namespace)
                .await
            {
                Ok(_) => report.deleted.push(format!("secret {name}")),
                Err(err) => {
                    record_stop_failure(&mut report, format!("secret {name}"), err.to_string());
                }
            }
        }

        self.external = None;
        self.rollback.clear();
        self.state = LifecycleState::Stopped;
        info!(pod = self.name, clean = report.is_clean(), "pod stopped");
        report
    }

    /// Whether at least one replica exists. `false` before start and after
    /// stop.
    pub async fn is_running(&self) -> Result<bool> {
        let Some(runtime) = &self.runtime else {
            return Ok(false);
        };
        self.workload
            .is_running(runtime.cluster.client())
            .await
            .context(WorkloadStateSnafu { pod: &self.name })
    }

    /// Whether every desired replica reports ready. `false` before start
    /// and after stop.
    pub async fn is_ready(&self) -> Result<bool> {
        let Some(runtime) = &self.runtime else {
            return Ok(false);
        };
        self.workload
            .is_ready(runtime.cluster.client())
            .await
            .context(WorkloadStateSnafu { pod: &self.name })
    }

    /// The cached host-reachable endpoint. Readable only while the pod is
    /// ready; fails loudly outside that window.
    pub fn external_endpoint(&self) -> Result<&HostAndPort> {
        ensure!(
            self.state == LifecycleState::Ready,
            EndpointUnavailableSnafu {
                pod: &self.name,
                state: self.state,
            }
        );
        self.external
            .as_ref()
            .context(NoExternalServiceSnafu { pod: &self.name })
    }

    pub fn external_host(&self) -> Result<String> {
        Ok(self.external_endpoint()?.host().to_string())
    }

    pub fn external_port(&self) -> Result<u16> {
        Ok(self.external_endpoint()?.port())
    }

    /// Fetches the current logs of the first replica.
    pub async fn logs(&self) -> Result<String> {
        let runtime = self
            .runtime
            .as_ref()
            .context(NotStartedSnafu { pod: &self.name })?;
        let client = runtime.cluster.client();
        let pod = self
            .first_replica(client, &runtime.namespace)
            .await?
            .context(NoPodsScheduledSnafu {
                pod: &self.name,
                namespace: &runtime.namespace,
            })?;
        client
            .pod_logs(&runtime.namespace, &pod, Some(&self.name))
            .await
            .context(FetchLogsSnafu { pod: &self.name })
    }

    /// Executes a command inside the first replica's container.
    pub async fn exec(
        &self,
        command: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<ExecStatus> {
        let runtime = self
            .runtime
            .as_ref()
            .context(NotStartedSnafu { pod: &self.name })?;
        let client = runtime.cluster.client();
        let pod = self
            .first_replica(client, &runtime.namespace)
            .await?
            .context(NoPodsScheduledSnafu {
                pod: &self.name,
                namespace: &runtime.namespace,
            })?;

        let command: Vec<String> = command.into_iter().map(Into::into).collect();
        client
            .pod_exec(&runtime.namespace, &pod, Some(&self.name), &command)
            .await
            .context(ExecCommandSnafu { pod: &self.name })
    }

    async fn resolve_cluster(&self) -> Result<Arc<dyn ClusterHandle>> {
        if let Some(cluster) = &self.explicit_cluster {
            return Ok(Arc::clone(cluster));
        }
        if let Some(cluster) = Defaults::resolve_cluster() {
            return Ok(cluster);
        }
        let discovered = LocalCluster::discover()
            .await
            .context(ClusterResolutionSnafu { pod: &self.name })?;
        Ok(Arc::new(discovered))
    }

    fn resolve_namespace(&self) -> String {
        self.explicit_namespace
            .clone()
            .or_else(Defaults::namespace)
            .unwrap_or_else(|| namespace::for_test_class(&self.name))
    }

    fn all_labels(&self) -> std::collections::BTreeMap<String, String> {
        let mut all = labels::canonical(&self.name);
        all.extend(self.extra_labels.clone());
        all
    }

    fn effective_wait_budget(&self) -> Duration {
        self.wait_timeout
            .or_else(|| self.wait.configured_timeout())
            .unwrap_or(match self.workload_kind {
                WorkloadKind::Stateless => DEFAULT_STATELESS_WAIT,
                WorkloadKind::Ordered => DEFAULT_ORDERED_WAIT,
            })
    }

    async fn run_start(
        &mut self,
        cluster: &Arc<dyn ClusterHandle>,
        namespace: &str,
    ) -> std::result::Result<Option<HostAndPort>, (StartStep, StepError)> {
        let client = cluster.client();
        let pod_name = self.name.clone();
        let all_labels = self.all_labels();
        let ctx = StorageContext {
            pod_name: &pod_name,
            namespace,
            labels: &all_labels,
            workload_kind: self.workload_kind,
        };

        // 1. Make sure the namespace exists (idempotent).
        let mut test_namespace = TestNamespace::with_client(client.clone(), namespace);
        test_namespace
            .create_if_not_exists()
            .await
            .map_err(|err| (StartStep::ResolveNamespace, err.into()))?;

        // 2. Generated config map and secret dependencies. These must exist
        //    before any pod template that mounts them.
        for config_map in self.storage.config_maps(&ctx) {
            let name = config_map.metadata.name.clone().unwrap_or_default();
            client
                .create(&config_map)
                .await
                .map_err(|err| (StartStep::Dependencies, err.into()))?;
            self.rollback.push(CreatedResource::ConfigMap(name));
        }
        for secret in self.storage.secrets(&ctx) {
            let name = secret.metadata.name.clone().unwrap_or_default();
            client
                .create(&secret)
                .await
                .map_err(|err| (StartStep::Dependencies, err.into()))?;
            self.rollback.push(CreatedResource::Secret(name));
        }

        // 3. Standalone claims for workloads without inline templates.
        let created_claims = self
            .storage
            .create_standalone_claims(client, &ctx)
            .await
            .map_err(|err| (StartStep::StorageClaims, err.into()))?;
        for claim in created_claims {
            self.rollback.push(CreatedResource::Claim(claim));
        }

        // 4. Services. Recorded before the create so sub-services of a
        //    partially created composite are still rolled back through
        //    their manager.
        let service_config = ServiceConfig {
            name: pod_name.clone(),
            namespace: namespace.to_string(),
            ports: self.ports.clone(),
            selector: labels::app_selector(&pod_name),
            labels: all_labels.clone(),
            customizers: self.service_customizers.clone(),
        };
        self.rollback.push(CreatedResource::Services);
        self.services
            .create(&service_config, client)
            .await
            .map_err(|err| (StartStep::Services, err.into()))?;

        let headless_service = self.created_service_of_kind(ServiceKind::Headless);
        let external_service = self.created_service_of_kind(ServiceKind::NodePort);

        // 5. The workload, with claim templates inlined for ordered kinds.
        let template = self
            .build_pod_template(&ctx)
            .map_err(|err| (StartStep::Workload, err))?;
        let workload_config = WorkloadConfig {
            name: pod_name.clone(),
            namespace: namespace.to_string(),
            replicas: self.replicas,
            labels: all_labels.clone(),
            selector: labels::app_selector(&pod_name),
            template,
            claim_templates: match self.workload_kind {
                WorkloadKind::Ordered => self.storage.claim_templates(&ctx),
                WorkloadKind::Stateless => vec![],
            },
            headless_service,
        };
        self.rollback.push(CreatedResource::Workload);
        self.workload
            .create(&workload_config, client)
            .await
            .map_err(|err| (StartStep::Workload, err.into()))?;

        // 6. Gate on the wait strategy under the effective deadline.
        let target = PodWaitTarget {
            cluster: Arc::clone(cluster),
            namespace: namespace.to_string(),
            app: pod_name.clone(),
            container: pod_name.clone(),
            workload_kind: self.workload_kind,
            workload_name: pod_name.clone(),
            external_service: external_service.clone(),
        };
        let budget = self.effective_wait_budget();
        self.wait
            .wait_until_ready(&target, budget)
            .await
            .map_err(|err| (StartStep::ReadinessWait, err.into()))?;

        // 7. Resolve and cache the external endpoint, when the pod exposes
        //    a host-reachable service at all.
        match (external_service, self.ports.first().copied()) {
            (Some(service), Some(port)) => {
                let endpoint = cluster
                    .access()
                    .external_endpoint(client, namespace, &service, port)
                    .await
                    .map_err(|err| (StartStep::ExternalEndpoint, err.into()))?;
                Ok(Some(endpoint))
            }
            _ => Ok(None),
        }
    }

    fn created_service_of_kind(&self, kind: ServiceKind) -> Option<String> {
        self.services
            .created_services()
            .into_iter()
            .find(|(created_kind, _)| *created_kind == kind)
            .and_then(|(_, service)| service.metadata.name.clone())
    }

    fn build_pod_template(
        &self,
        ctx: &StorageContext<'_>,
    ) -> std::result::Result<PodTemplateSpec, StepError> {
        let mut container_builder = ContainerBuilder::new(&self.name)
            .map_err(|err| StepError::from(err))?;
        container_builder.image(&self.image);
        if let Some(policy) = &self.image_pull_policy {
            container_builder.image_pull_policy(policy);
        }
        if let Some(command) = &self.command {
            container_builder.command(command.clone());
        }
        if let Some(args) = &self.args {
            container_builder.args(args.clone());
        }
        for &port in &self.ports {
            container_builder.add_container_port(format!("port-{port}"), i32::from(port));
        }
        for (name, value) in &self.env {
            container_builder.add_env_var(name, value);
        }
        container_builder.add_volume_mounts(self.storage.mounts_for(&self.name, ctx));

        let mut container = container_builder.build();
        for customizer in &self.container_customizers {
            customizer(&mut container);
        }

        let volumes = self.storage.volumes(ctx);
        let mut pod_spec = PodSpec {
            containers: vec![container],
            volumes: (!volumes.is_empty()).then_some(volumes),
            ..PodSpec::default()
        };
        for customizer in &self.pod_customizers {
            customizer(&mut pod_spec);
        }

        Ok(PodTemplateSpec {
            metadata: Some(
                ObjectMetaBuilder::new()
                    .with_labels(self.all_labels())
                    .with_annotations(self.annotations.clone())
                    .build(),
            ),
            spec: Some(pod_spec),
        })
    }

    /// Deletes the recorded resources in reverse insertion order, swallowing
    /// individual failures. The namespace is not touched; its lifecycle
    /// belongs to the framework scope.
    async fn roll_back(&mut self, client: &Client, namespace: &str) -> RollbackOutcome {
        let entries: Vec<CreatedResource> = self.rollback.drain(..).collect();
        let mut outcome = RollbackOutcome {
            attempted: entries.len(),
            failed: vec![],
        };

        for entry in entries.into_iter().rev() {
            let result = match &entry {
                CreatedResource::Workload => self
                    .workload
                    .delete(client)
                    .await
                    .map_err(|err| err.to_string()),
                CreatedResource::Services => self
                    .services
                    .delete(client)
                    .await
                    .map_err(|err| err.to_string()),
                CreatedResource::Claim(name) => client
                    .delete_if_exists::<PersistentVolumeClaim>(name, namespace)
                    .await
                    .map(|_| ())
                    .map_err(|err| err.to_string()),
                CreatedResource::ConfigMap(name) => client
                    .delete_if_exists::<ConfigMap>(name, namespace)
                    .await
                    .map(|_| ())
                    .map_err(|err| err.to_string()),
                CreatedResource::Secret(name) => client
                    .delete_if_exists::<Secret>(name, namespace)
                    .await
                    .map(|_| ())
                    .map_err(|err| err.to_string()),
            };

            if let Err(err) = result {
                warn!(pod = self.name, resource = %entry, error = err, "rollback delete failed");
                outcome.failed.push(format!("{entry}: {err}"));
            }
        }
        outcome
    }

    async fn first_replica(&self, client: &Client, namespace: &str) -> Result<Option<String>> {
        let pods = client
            .list_labeled::<Pod>(namespace, &labels::app_selector_string(&self.name))
            .await
            .context(ListReplicasSnafu { pod: &self.name })?;
        Ok(pods
            .into_iter()
            .filter_map(|pod| pod.metadata.name)
            .next())
    }
}

/// The live wait target the orchestrator hands to strategies: endpoint
/// resolution through the cluster's access strategy, readiness from the
/// workload status, exec and logs against the first scheduled replica.
struct PodWaitTarget {
    cluster: Arc<dyn ClusterHandle>,
    namespace: String,
    app: String,
    container: String,
    workload_kind: WorkloadKind,
    workload_name: String,
    external_service: Option<String>,
}

impl PodWaitTarget {
    async fn first_pod(&self) -> Result<Option<String>, TargetError> {
        let pods = self
            .cluster
            .client()
            .list_labeled::<Pod>(&self.namespace, &labels::app_selector_string(&self.app))
            .await
            .map_err(|err| TargetError::with_source("failed to list the pod's replicas", err))?;
        Ok(pods
            .into_iter()
            .filter_map(|pod| pod.metadata.name)
            .next())
    }
}

#[async_trait]
impl WaitTarget for PodWaitTarget {
    fn describe(&self) -> String {
        format!("pod {} in namespace {}", self.app, self.namespace)
    }

    async fn endpoint_for(&self, port: u16) -> Result<HostAndPort, TargetError> {
        let service = self.external_service.as_deref().ok_or_else(|| {
            TargetError::message(
                "no host-reachable service; expose the pod through a NodePort to poll it from \
                 outside the cluster",
            )
        })?;
        self.cluster
            .access()
            .external_endpoint(self.cluster.client(), &self.namespace, service, port)
            .await
            .map_err(|err| TargetError::with_source("failed to resolve the external endpoint", err))
    }

    async fn workload_ready(&self) -> Result<bool, TargetError> {
        let client = self.cluster.client();
        let ready = match self.workload_kind {
            WorkloadKind::Stateless => client
                .try_get::<Deployment>(&self.workload_name, &self.namespace)
                .await
                .map_err(|err| TargetError::with_source("failed to read workload status", err))?
                .as_ref()
                .is_some_and(deployment_is_ready),
            WorkloadKind::Ordered => client
                .try_get::<StatefulSet>(&self.workload_name, &self.namespace)
                .await
                .map_err(|err| TargetError::with_source("failed to read workload status", err))?
                .as_ref()
                .is_some_and(stateful_set_is_ready),
        };
        Ok(ready)
    }

    async fn exec(&self, command: &[String]) -> Result<Option<i32>, TargetError> {
        let Some(pod) = self.first_pod().await? else {
            return Ok(None);
        };
        let status = self
            .cluster
            .client()
            .pod_exec(&self.namespace, &pod, Some(&self.container), command)
            .await
            .map_err(|err| TargetError::with_source("in-container command failed", err))?;
        Ok(Some(status.exit_code))
    }

    async fn log_lines(
        &self,
    ) -> Result<Option<BoxStream<'static, Result<String, TargetError>>>, TargetError> {
        let Some(pod) = self.first_pod().await? else {
            return Ok(None);
        };
        let stream = self
            .cluster
            .client()
            .pod_log_lines(&self.namespace, &pod, Some(&self.container), true)
            .await
            .map_err(|err| TargetError::with_source("failed to open the log stream", err))?;
        Ok(Some(
            stream
                .map_err(|err| TargetError::with_source("log stream failed", err))
                .boxed(),
        ))
    }
}

fn record_stop_failure(report: &mut StopReport, resource: String, error: String) {
    warn!(resource, error, "teardown delete failed, continuing");
    report.failed.push(StopFailure { resource, error });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{pod::StartStep, storage, wait};

    fn dead_client() -> Client {
        // Points at a port nothing listens on; every request fails fast.
        let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
        Client::new(kube::Client::try_from(config).unwrap())
    }

    fn minimal() -> TestPod {
        TestPod::builder("web")
            .image("nginx:alpine")
            .port(80)
            .build()
            .unwrap()
    }

    #[test]
    fn endpoints_are_unreadable_before_start() {
        let pod = minimal();
        assert!(matches!(
            pod.external_endpoint(),
            Err(Error::EndpointUnavailable { .. })
        ));
        assert!(matches!(
            pod.external_host(),
            Err(Error::EndpointUnavailable { .. })
        ));
        assert!(matches!(
            pod.external_port(),
            Err(Error::EndpointUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn is_running_and_is_ready_are_false_before_start() {
        let pod = minimal();
        assert!(!pod.is_running().await.unwrap());
        assert!(!pod.is_ready().await.unwrap());
    }

    #[tokio::test]
    async fn logs_and_exec_require_a_started_pod() {
        let pod = minimal();
        assert!(matches!(pod.logs().await, Err(Error::NotStarted { .. })));
        assert!(matches!(
            pod.exec(["true"]).await,
            Err(Error::NotStarted { .. })
        ));
    }

    #[tokio::test]
    async fn start_refuses_to_run_twice() {
        let mut pod = minimal();
        pod.state = LifecycleState::Ready;
        assert!(matches!(
            pod.start().await,
            Err(Error::StartPrecondition { .. })
        ));

        pod.state = LifecycleState::Stopped;
        assert!(matches!(
            pod.start().await,
            Err(Error::StartPrecondition { .. })
        ));
    }

    #[tokio::test]
    async fn stop_before_start_is_a_no_op() {
        let mut pod = minimal();
        let report = pod.stop().await;
        assert!(report.is_clean());
        assert!(report.deleted.is_empty());
        assert_eq!(pod.state(), LifecycleState::Configured);
    }

    #[tokio::test]
    async fn rollback_runs_in_reverse_insertion_order() {
        let mut pod = minimal();
        pod.rollback = vec![
            CreatedResource::ConfigMap("web-init".to_string()),
            CreatedResource::Claim("web-data".to_string()),
            CreatedResource::Services,
            CreatedResource::Workload,
        ];

        let outcome = pod.roll_back(&dead_client(), "testpods-suite-a1b2c").await;

        // Manager-backed entries are no-ops (nothing was created); the
        // client-backed deletes hit the dead endpoint and fail in reverse
        // insertion order.
        assert_eq!(outcome.attempted, 4);
        assert_eq!(outcome.failed.len(), 2);
        assert!(outcome.failed[0].starts_with("claim web-data"));
        assert!(outcome.failed[1].starts_with("configmap web-init"));
        assert!(pod.rollback.is_empty());
    }

    #[test]
    fn wait_budget_prefers_pod_override_then_strategy_then_kind_default() {
        let pod = minimal();
        assert_eq!(pod.effective_wait_budget(), DEFAULT_STATELESS_WAIT);

        let pod = TestPod::builder("db")
            .image("postgres:16")
            .ordered()
            .build()
            .unwrap();
        assert_eq!(pod.effective_wait_budget(), DEFAULT_ORDERED_WAIT);

        let pod = TestPod::builder("db")
            .image("postgres:16")
            .wait_for(wait::tcp(5432).with_timeout(Duration::from_secs(30)))
            .build()
            .unwrap();
        assert_eq!(pod.effective_wait_budget(), Duration::from_secs(30));

        let pod = TestPod::builder("db")
            .image("postgres:16")
            .wait_for(wait::tcp(5432).with_timeout(Duration::from_secs(30)))
            .wait_timeout(Duration::from_secs(7))
            .build()
            .unwrap();
        assert_eq!(pod.effective_wait_budget(), Duration::from_secs(7));
    }

    #[test]
    fn pod_template_wires_storage_env_and_customizers() {
        let pod = TestPod::builder("db")
            .image("postgres:16")
            .port(5432)
            .env("POSTGRES_PASSWORD", "secret")
            .storage(storage::files("/docker-entrypoint-initdb.d").add_file("i.sql", "SELECT 1;"))
            .customize_container(|container| {
                container.tty = Some(true);
            })
            .build()
            .unwrap();

        let all_labels = pod.all_labels();
        let ctx = StorageContext {
            pod_name: "db",
            namespace: "testpods-suite-a1b2c",
            labels: &all_labels,
            workload_kind: WorkloadKind::Stateless,
        };
        let template = pod.build_pod_template(&ctx).unwrap();

        let spec = template.spec.unwrap();
        let container = &spec.containers[0];
        assert_eq!(container.name, "db");
        assert_eq!(container.image.as_deref(), Some("postgres:16"));
        assert_eq!(container.tty, Some(true));
        assert_eq!(
            container.env.as_ref().unwrap()[0].name,
            "POSTGRES_PASSWORD"
        );

        // The file-material mount and its volume arrive as a unit.
        let mounts = container.volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].name, "init-scripts");
        assert_eq!(mounts[0].read_only, Some(true));
        let volumes = spec.volumes.unwrap();
        assert_eq!(volumes[0].name, "init-scripts");
        assert_eq!(
            volumes[0].config_map.as_ref().map(|cm| cm.name.as_str()),
            Some("db-init")
        );

        // Canonical labels land on the template metadata.
        let template_labels = template.metadata.unwrap().labels.unwrap();
        assert_eq!(template_labels.get("app"), Some(&"db".to_string()));
        assert_eq!(
            template_labels.get("managed-by"),
            Some(&"testpods".to_string())
        );
    }

    #[test]
    fn start_steps_render_kebab_case() {
        assert_eq!(StartStep::ResolveNamespace.to_string(), "resolve-namespace");
        assert_eq!(StartStep::ReadinessWait.to_string(), "readiness-wait");
    }

    #[test]
    fn rollback_outcome_renders_clean_and_partial() {
        let clean = RollbackOutcome {
            attempted: 3,
            failed: vec![],
        };
        assert_eq!(clean.to_string(), "clean (3 resources removed)");

        let partial = RollbackOutcome {
            attempted: 3,
            failed: vec!["configmap db-init: boom".to_string()],
        };
        assert!(partial.to_string().starts_with("partial (2/3 removed"));
    }
}

//! The pod lifecycle: a configured descriptor driven through
//! created → provisioned → ready → stopped, with rollback in between.

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use k8s_openapi::api::core::v1::{Container, PodSpec};
use snafu::Snafu;

use crate::{
    client, cluster,
    cluster::ClusterHandle,
    host_and_port::HostAndPort,
    namespace, service,
    service::{ServiceCustomizer, ServiceManager},
    storage,
    storage::StorageManager,
    wait,
    wait::WaitStrategy,
    workload,
    workload::{WorkloadKind, WorkloadManager},
};

mod builder;
mod lifecycle;

pub use builder::TestPodBuilder;

type Result<T, E = Error> = std::result::Result<T, E>;

/// Default readiness budget for stateless workloads.
pub const DEFAULT_STATELESS_WAIT: Duration = Duration::from_secs(60);

/// Default readiness budget for ordered workloads, which start their
/// replicas one ordinal at a time.
pub const DEFAULT_ORDERED_WAIT: Duration = Duration::from_secs(120);

/// A transformation of the pod's container, applied at template build time.
pub type ContainerCustomizer = Arc<dyn Fn(&mut Container) + Send + Sync>;

/// A transformation of the pod spec, applied after the container is placed.
pub type PodSpecCustomizer = Arc<dyn Fn(&mut PodSpec) + Send + Sync>;

/// Where a pod is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum LifecycleState {
    Configured,
    Starting,
    Ready,
    Failed,
    Stopping,
    Stopped,
}

/// The step of the start protocol that failed, for error context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum StartStep {
    ResolveNamespace,
    Dependencies,
    StorageClaims,
    Services,
    Workload,
    ReadinessWait,
    ExternalEndpoint,
}

/// What rollback achieved after a failed start.
#[derive(Clone, Debug, Default)]
pub struct RollbackOutcome {
    /// Number of recorded resources rollback tried to remove.
    pub attempted: usize,
    /// Descriptions of resources whose removal failed; these are left
    /// behind in the (preserved) namespace.
    pub failed: Vec<String>,
}

impl fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failed.is_empty() {
            write!(f, "clean ({} resources removed)", self.attempted)
        } else {
            write!(
                f,
                "partial ({}/{} removed, leftover: {})",
                self.attempted - self.failed.len(),
                self.attempted,
                self.failed.join(", ")
            )
        }
    }
}

/// Best-effort summary of a [`TestPod::stop`] call. Partial failure is
/// reported here and logged, never raised.
#[derive(Debug, Default)]
pub struct StopReport {
    pub deleted: Vec<String>,
    pub failed: Vec<StopFailure>,
}

#[derive(Debug)]
pub struct StopFailure {
    pub resource: String,
    pub error: String,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// The cause behind a failed start step.
#[derive(Debug, Snafu)]
pub enum StepError {
    #[snafu(transparent)]
    Namespace { source: namespace::Error },

    #[snafu(transparent)]
    Client { source: client::Error },

    #[snafu(transparent)]
    Storage { source: storage::Error },

    #[snafu(transparent)]
    Service { source: service::Error },

    #[snafu(transparent)]
    Workload { source: workload::Error },

    #[snafu(transparent)]
    Wait { source: wait::Error },

    #[snafu(transparent)]
    Access { source: cluster::Error },

    #[snafu(transparent)]
    Template { source: crate::builder::Error },
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("pod {pod:?} is misconfigured: {reason}"))]
    Configuration { pod: String, reason: String },

    #[snafu(display(
        "pod {pod:?} cannot start from state {state}; a pod instance starts once"
    ))]
    StartPrecondition { pod: String, state: LifecycleState },

    #[snafu(display(
        "pod {pod:?} has no external endpoint in state {state}; endpoints are readable after \
         start() succeeded and before stop()"
    ))]
    EndpointUnavailable { pod: String, state: LifecycleState },

    #[snafu(display(
        "pod {pod:?} is ready but exposes no host-reachable service; add a NodePort service to \
         reach it from outside the cluster"
    ))]
    NoExternalService { pod: String },

    #[snafu(display("pod {pod:?} is not started"))]
    NotStarted { pod: String },

    #[snafu(display("no replicas of pod {pod:?} found in namespace {namespace:?}"))]
    NoPodsScheduled { pod: String, namespace: String },

    #[snafu(display("failed to resolve a cluster for pod {pod:?}"))]
    ClusterResolution {
        source: cluster::Error,
        pod: String,
    },

    #[snafu(display(
        "failed to start pod {pod:?} in namespace {namespace:?} at step {step}; rollback: {rollback}"
    ))]
    StartFailed {
        pod: String,
        namespace: String,
        step: StartStep,
        source: StepError,
        rollback: RollbackOutcome,
    },

    #[snafu(display("failed to list the replicas of pod {pod:?}"))]
    ListReplicas {
        source: client::Error,
        pod: String,
    },

    #[snafu(display("failed to fetch logs of pod {pod:?}"))]
    FetchLogs {
        source: client::Error,
        pod: String,
    },

    #[snafu(display("failed to execute a command in pod {pod:?}"))]
    ExecCommand {
        source: client::Error,
        pod: String,
    },

    #[snafu(display("failed to query the workload state of pod {pod:?}"))]
    WorkloadState {
        source: workload::Error,
        pod: String,
    },
}

/// A resource created during start, recorded for reverse-order rollback.
///
/// Workload and services delegate to their managers, which track their own
/// created state (including partial state after a failed create).
enum CreatedResource {
    ConfigMap(String),
    Secret(String),
    Claim(String),
    Services,
    Workload,
}

impl fmt::Display for CreatedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigMap(name) => write!(f, "configmap {name}"),
            Self::Secret(name) => write!(f, "secret {name}"),
            Self::Claim(name) => write!(f, "claim {name}"),
            Self::Services => write!(f, "services"),
            Self::Workload => write!(f, "workload"),
        }
    }
}

#[derive(Clone)]
pub(crate) struct Runtime {
    pub(crate) cluster: Arc<dyn ClusterHandle>,
    pub(crate) namespace: String,
}

/// A logical unit under test: one workload controller, its endpoint
/// exposure, its storage plan and a readiness strategy.
///
/// The descriptor part is frozen once [`Self::start`] is called. A pod
/// instance is single-owner: it is not meant to be started twice or shared
/// between concurrently starting callers.
pub struct TestPod {
    // Frozen descriptor
    name: String,
    image: String,
    ports: Vec<u16>,
    env: Vec<(String, String)>,
    extra_labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    command: Option<Vec<String>>,
    args: Option<Vec<String>>,
    image_pull_policy: Option<String>,
    replicas: i32,
    workload_kind: WorkloadKind,
    explicit_namespace: Option<String>,
    explicit_cluster: Option<Arc<dyn ClusterHandle>>,
    wait_timeout: Option<Duration>,
    container_customizers: Vec<ContainerCustomizer>,
    pod_customizers: Vec<PodSpecCustomizer>,
    service_customizers: Vec<ServiceCustomizer>,

    // Component composition
    workload: Box<dyn WorkloadManager>,
    services: Box<dyn ServiceManager>,
    storage: Box<dyn StorageManager>,
    wait: Box<dyn WaitStrategy>,

    // Lifecycle state
    state: LifecycleState,
    runtime: Option<Runtime>,
    external: Option<HostAndPort>,
    rollback: Vec<CreatedResource>,
}

impl TestPod {
    /// Starts configuring a pod with the given name. The name becomes the
    /// workload name, the service base name and the `app` label value.
    pub fn builder(name: impl Into<String>) -> TestPodBuilder {
        TestPodBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn workload_kind(&self) -> WorkloadKind {
        self.workload_kind
    }

    /// The namespace the pod was started into. `None` before start.
    pub fn namespace(&self) -> Option<&str> {
        self.runtime.as_ref().map(|runtime| runtime.namespace.as_str())
    }
}

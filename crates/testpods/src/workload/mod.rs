//! Workload controllers: the replica-managing resource behind a pod.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    core::v1::{PersistentVolumeClaim, PodTemplateSpec},
};
use snafu::Snafu;

use crate::{client, client::Client};

mod deployment;
mod stateful_set;

pub use deployment::DeploymentWorkload;
pub use stateful_set::StatefulSetWorkload;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to create {kind} {name:?} in namespace {namespace:?}"))]
    CreateWorkload {
        source: client::Error,
        kind: WorkloadKind,
        name: String,
        namespace: String,
    },

    #[snafu(display("failed to delete {kind} {name:?} in namespace {namespace:?}"))]
    DeleteWorkload {
        source: client::Error,
        kind: WorkloadKind,
        name: String,
        namespace: String,
    },

    #[snafu(display("failed to read status of {kind} {name:?} in namespace {namespace:?}"))]
    ReadStatus {
        source: client::Error,
        kind: WorkloadKind,
        name: String,
        namespace: String,
    },

    #[snafu(display(
        "an ordered workload requires a headless service, but none was configured for {name:?}"
    ))]
    MissingHeadlessService { name: String },
}

/// The two replica-management disciplines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum WorkloadKind {
    /// Interchangeable replicas behind a label selector (a Deployment).
    #[strum(serialize = "Deployment")]
    Stateless,
    /// Identity-bearing replicas starting in ordinal order (a StatefulSet).
    #[strum(serialize = "StatefulSet")]
    Ordered,
}

/// The per-start snapshot a workload manager consumes. Built by the
/// orchestrator, never retained.
#[derive(Clone, Debug)]
pub struct WorkloadConfig {
    pub name: String,
    pub namespace: String,
    pub replicas: i32,
    pub labels: BTreeMap<String, String>,
    pub selector: BTreeMap<String, String>,
    pub template: PodTemplateSpec,
    /// Claim templates inlined into ordered workload specs.
    pub claim_templates: Vec<PersistentVolumeClaim>,
    /// The headless service an ordered workload registers its pod DNS with.
    pub headless_service: Option<String>,
}

/// A workload controller behind a single pod.
#[async_trait]
pub trait WorkloadManager: Send + Sync {
    fn kind(&self) -> WorkloadKind;

    /// The created workload's name, `None` before creation and after
    /// deletion.
    fn name(&self) -> Option<&str>;

    async fn create(&mut self, config: &WorkloadConfig, client: &Client) -> Result<()>;

    async fn delete(&mut self, client: &Client) -> Result<()>;

    /// Whether at least one replica exists. `false` when the workload was
    /// never created or has been deleted.
    async fn is_running(&self, client: &Client) -> Result<bool>;

    /// Whether every desired replica reports ready. `false` when the
    /// workload was never created or has been deleted.
    async fn is_ready(&self, client: &Client) -> Result<bool>;
}

/// Ready means every desired replica is ready and there is at least one.
pub(crate) fn deployment_is_ready(deployment: &Deployment) -> bool {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or_default();
    let ready = deployment
        .status
        .as_ref()
        .and_then(|status| status.ready_replicas)
        .unwrap_or_default();

    desired == ready && desired >= 1
}

/// Running means at least one replica exists, ready or not.
pub(crate) fn deployment_is_running(deployment: &Deployment) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|status| status.replicas)
        .unwrap_or_default()
        >= 1
}

/// Ready requires all ordinals ready.
pub(crate) fn stateful_set_is_ready(stateful_set: &StatefulSet) -> bool {
    let desired = stateful_set
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or_default();
    let ready = stateful_set
        .status
        .as_ref()
        .map(|status| status.ready_replicas.unwrap_or_default())
        .unwrap_or_default();

    desired == ready && desired >= 1
}

pub(crate) fn stateful_set_is_running(stateful_set: &StatefulSet) -> bool {
    stateful_set
        .status
        .as_ref()
        .map(|status| status.replicas)
        .unwrap_or_default()
        >= 1
}

/// A stateless workload with the given number of interchangeable replicas.
pub fn stateless() -> DeploymentWorkload {
    DeploymentWorkload::default()
}

/// An ordered workload whose replicas carry stable identities.
pub fn ordered() -> StatefulSetWorkload {
    StatefulSetWorkload::default()
}


#[cfg(test)]
mod tests {
    use k8s_openapi::api::apps::v1::{
        DeploymentSpec, DeploymentStatus, StatefulSetSpec, StatefulSetStatus,
    };
    use rstest::rstest;

    use super::*;

    fn deployment(desired: i32, ready: i32, total: i32) -> Deployment {
        Deployment {
            spec: Some(DeploymentSpec {
                replicas: Some(desired),
                ..DeploymentSpec::default()
            }),
            status: Some(DeploymentStatus {
                ready_replicas: Some(ready),
                replicas: Some(total),
                ..DeploymentStatus::default()
            }),
            ..Deployment::default()
        }
    }

    fn stateful_set(desired: i32, ready: i32, total: i32) -> StatefulSet {
        StatefulSet {
            spec: Some(StatefulSetSpec {
                replicas: Some(desired),
                ..StatefulSetSpec::default()
            }),
            status: Some(StatefulSetStatus {
                ready_replicas: Some(ready),
                replicas: total,
                ..StatefulSetStatus::default()
            }),
            ..StatefulSet::default()
        }
    }

    #[rstest]
    #[case(3, 3, true)]
    #[case(3, 2, false)]
    #[case(1, 1, true)]
    #[case(0, 0, false)]
    fn deployment_readiness(#[case] desired: i32, #[case] ready: i32, #[case] expected: bool) {
        assert_eq!(
            deployment_is_ready(&deployment(desired, ready, desired)),
            expected
        );
    }

    #[rstest]
    #[case(1, true)]
    #[case(0, false)]
    fn deployment_running(#[case] total: i32, #[case] expected: bool) {
        assert_eq!(deployment_is_running(&deployment(1, 0, total)), expected);
    }

    #[rstest]
    #[case(3, 3, true)]
    #[case(3, 1, false)]
    #[case(0, 0, false)]
    fn stateful_set_readiness(#[case] desired: i32, #[case] ready: i32, #[case] expected: bool) {
        assert_eq!(
            stateful_set_is_ready(&stateful_set(desired, ready, desired)),
            expected
        );
    }

    #[test]
    fn missing_status_reads_as_not_ready() {
        assert!(!deployment_is_ready(&Deployment::default()));
        assert!(!stateful_set_is_ready(&StatefulSet::default()));
        assert!(!deployment_is_running(&Deployment::default()));
        assert!(!stateful_set_is_running(&StatefulSet::default()));
    }
}

//! A thin facade over [`kube::Client`].
//!
//! It wraps the underlying client with the few operations the harness needs
//! (typed create/get/delete/list, a poll-based condition primitive, log
//! streaming and in-container command execution) and attaches resource
//! identity to every error.

use std::{fmt::Debug, time::Duration};

use futures::{AsyncBufReadExt, StreamExt, TryStreamExt, stream::BoxStream};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    Api, Client as KubeClient, Resource,
    api::{AttachParams, DeleteParams, ListParams, LogParams, PostParams},
    core::{ClusterResourceScope, NamespaceResourceScope},
};
use serde::{Serialize, de::DeserializeOwned};
use snafu::{OptionExt, ResultExt, Snafu};
use tokio::io::AsyncReadExt;
use tracing::debug;

type Result<T, E = Error> = std::result::Result<T, E>;

/// Interval between polls of [`Client::wait_until`].
const CONDITION_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to create {kind} {name:?} in namespace {namespace:?}"))]
    Create {
        source: kube::Error,
        kind: String,
        name: String,
        namespace: String,
    },

    #[snafu(display("failed to get {kind} {name:?} in namespace {namespace:?}"))]
    Get {
        source: kube::Error,
        kind: String,
        name: String,
        namespace: String,
    },

    #[snafu(display("failed to delete {kind} {name:?} in namespace {namespace:?}"))]
    Delete {
        source: kube::Error,
        kind: String,
        name: String,
        namespace: String,
    },

    #[snafu(display("failed to list {kind} in namespace {namespace:?}"))]
    List {
        source: kube::Error,
        kind: String,
        namespace: String,
    },

    #[snafu(display(
        "condition on {kind} {name:?} in namespace {namespace:?} was not met within {timeout:?}"
    ))]
    ConditionTimeout {
        kind: String,
        name: String,
        namespace: String,
        timeout: Duration,
    },

    #[snafu(display("failed to fetch logs of pod {pod:?} in namespace {namespace:?}"))]
    Logs {
        source: kube::Error,
        pod: String,
        namespace: String,
    },

    #[snafu(display("failed to read log line of pod {pod:?} in namespace {namespace:?}"))]
    LogLine {
        source: std::io::Error,
        pod: String,
        namespace: String,
    },

    #[snafu(display("failed to execute {command:?} in pod {pod:?}"))]
    Exec {
        source: kube::Error,
        pod: String,
        command: Vec<String>,
    },

    #[snafu(display("command {command:?} in pod {pod:?} returned no status"))]
    ExecStatusMissing { pod: String, command: Vec<String> },
}

/// Marker for namespaced resources usable with the typed [`Client`] methods.
pub trait NamespacedResource:
    Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Resource<DynamicType = (), Scope = NamespaceResourceScope>
{
}

impl<T> NamespacedResource for T where
    T: Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Resource<DynamicType = (), Scope = NamespaceResourceScope>
{
}

/// Marker for cluster-scoped resources (namespaces, mostly).
pub trait ClusterScopedResource:
    Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Resource<DynamicType = (), Scope = ClusterResourceScope>
{
}

impl<T> ClusterScopedResource for T where
    T: Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Resource<DynamicType = (), Scope = ClusterResourceScope>
{
}

/// Outcome of an in-container command execution.
#[derive(Clone, Debug)]
pub struct ExecStatus {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// This `Client` can be used to access Kubernetes.
/// It wraps an underlying [`kube::Client`] and provides some common functionality.
#[derive(Clone)]
pub struct Client {
    client: KubeClient,
    post_params: PostParams,
    delete_params: DeleteParams,
}

impl Client {
    pub fn new(client: KubeClient) -> Self {
        Self {
            client,
            post_params: PostParams::default(),
            delete_params: DeleteParams::default(),
        }
    }

    /// Returns a [`kube::Client`] that can be freely used.
    /// It does not need to be cloned before first use.
    pub fn kube_client(&self) -> KubeClient {
        self.client.clone()
    }

    pub fn api<T: NamespacedResource>(&self, namespace: &str) -> Api<T> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn cluster_api<T: ClusterScopedResource>(&self) -> Api<T> {
        Api::all(self.client.clone())
    }

    pub async fn create<T: NamespacedResource>(&self, resource: &T) -> Result<T> {
        let name = resource.meta().name.clone().unwrap_or_default();
        let namespace = resource.meta().namespace.clone().unwrap_or_default();
        debug!(kind = %kind::<T>(), name, namespace, "creating resource");
        self.api(&namespace)
            .create(&self.post_params, resource)
            .await
            .context(CreateSnafu {
                kind: kind::<T>(),
                name,
                namespace,
            })
    }

    pub async fn create_cluster_scoped<T: ClusterScopedResource>(&self, resource: &T) -> Result<T> {
        let name = resource.meta().name.clone().unwrap_or_default();
        debug!(kind = %kind::<T>(), name, "creating cluster-scoped resource");
        self.cluster_api()
            .create(&self.post_params, resource)
            .await
            .context(CreateSnafu {
                kind: kind::<T>(),
                name,
                namespace: String::new(),
            })
    }

    pub async fn get<T: NamespacedResource>(&self, name: &str, namespace: &str) -> Result<T> {
        self.api(namespace).get(name).await.context(GetSnafu {
            kind: kind::<T>(),
            name,
            namespace,
        })
    }

    /// Like [`Self::get`], but maps a missing resource to `None`.
    pub async fn try_get<T: NamespacedResource>(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<T>> {
        match self.api(namespace).get(name).await {
            Ok(resource) => Ok(Some(resource)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err).context(GetSnafu {
                kind: kind::<T>(),
                name,
                namespace,
            }),
        }
    }

    pub async fn try_get_cluster_scoped<T: ClusterScopedResource>(
        &self,
        name: &str,
    ) -> Result<Option<T>> {
        match self.cluster_api::<T>().get(name).await {
            Ok(resource) => Ok(Some(resource)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err).context(GetSnafu {
                kind: kind::<T>(),
                name,
                namespace: String::new(),
            }),
        }
    }

    /// Deletes a resource. Returns `false` when it did not exist, which
    /// callers treat as "already gone".
    pub async fn delete_if_exists<T: NamespacedResource>(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<bool> {
        debug!(kind = %kind::<T>(), name, namespace, "deleting resource");
        match self
            .api::<T>(namespace)
            .delete(name, &self.delete_params)
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(err).context(DeleteSnafu {
                kind: kind::<T>(),
                name,
                namespace,
            }),
        }
    }

    pub async fn delete_cluster_scoped<T: ClusterScopedResource>(
        &self,
        name: &str,
    ) -> Result<bool> {
        debug!(kind = %kind::<T>(), name, "deleting cluster-scoped resource");
        match self
            .cluster_api::<T>()
            .delete(name, &self.delete_params)
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(err).context(DeleteSnafu {
                kind: kind::<T>(),
                name,
                namespace: String::new(),
            }),
        }
    }

    pub async fn list_labeled<T: NamespacedResource>(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<T>> {
        let params = ListParams::default().labels(label_selector);
        let list = self
            .api::<T>(namespace)
            .list(&params)
            .await
            .context(ListSnafu {
                kind: kind::<T>(),
                namespace,
            })?;
        Ok(list.items)
    }

    /// Polls a resource until `condition` holds for it, or until `timeout`
    /// expires. The condition sees `None` while the resource does not exist.
    pub async fn wait_until<T, F>(
        &self,
        name: &str,
        namespace: &str,
        condition: F,
        timeout: Duration,
    ) -> Result<()>
    where
        T: NamespacedResource,
        F: Fn(Option<&T>) -> bool + Send,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let resource = self.try_get::<T>(name, namespace).await?;
            if condition(resource.as_ref()) {
                return Ok(());
            }
            if tokio::time::Instant::now() + CONDITION_POLL_INTERVAL > deadline {
                return ConditionTimeoutSnafu {
                    kind: kind::<T>(),
                    name,
                    namespace,
                    timeout,
                }
                .fail();
            }
            tokio::time::sleep(CONDITION_POLL_INTERVAL).await;
        }
    }

    /// Fetches the current logs of a single container.
    pub async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
    ) -> Result<String> {
        let params = LogParams {
            container: container.map(str::to_string),
            ..LogParams::default()
        };
        self.api::<Pod>(namespace)
            .logs(pod, &params)
            .await
            .context(LogsSnafu { pod, namespace })
    }

    /// Streams log lines of a single container. With `follow`, the stream
    /// stays open and yields lines as the container produces them; the
    /// reader task ends when the stream is dropped.
    pub async fn pod_log_lines(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        follow: bool,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let params = LogParams {
            container: container.map(str::to_string),
            follow,
            ..LogParams::default()
        };
        let reader = self
            .api::<Pod>(namespace)
            .log_stream(pod, &params)
            .await
            .context(LogsSnafu { pod, namespace })?;

        let pod = pod.to_string();
        let namespace = namespace.to_string();
        Ok(reader
            .lines()
            .map_err(move |source| Error::LogLine {
                source,
                pod: pod.clone(),
                namespace: namespace.clone(),
            })
            .boxed())
    }

    /// Executes a command inside a container and waits for it to finish.
    pub async fn pod_exec(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        command: &[String],
    ) -> Result<ExecStatus> {
        let mut params = AttachParams::default().stdin(false).stdout(true).stderr(true);
        if let Some(container) = container {
            params = params.container(container);
        }

        let mut attached = self
            .api::<Pod>(namespace)
            .exec(pod, command.iter().map(String::as_str), &params)
            .await
            .context(ExecSnafu { pod, command })?;

        let mut stdout_reader = attached.stdout();
        let mut stderr_reader = attached.stderr();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        // Drain both pipes concurrently so a full stderr buffer cannot stall
        // stdout (and vice versa).
        let stdout_fut = async {
            if let Some(reader) = stdout_reader.as_mut() {
                let _ = reader.read_to_end(&mut stdout).await;
            }
        };
        let stderr_fut = async {
            if let Some(reader) = stderr_reader.as_mut() {
                let _ = reader.read_to_end(&mut stderr).await;
            }
        };
        tokio::join!(stdout_fut, stderr_fut);

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };
        let _ = attached.join().await;

        let status = status.context(ExecStatusMissingSnafu { pod, command })?;

        Ok(ExecStatus {
            exit_code: exit_code_from_status(&status),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

fn kind<T: Resource<DynamicType = ()>>() -> String {
    T::kind(&()).into_owned()
}

fn exit_code_from_status(status: &k8s_openapi::apimachinery::pkg::apis::meta::v1::Status) -> i32 {
    if status.status.as_deref() == Some("Success") {
        return 0;
    }

    status
        .details
        .as_ref()
        .and_then(|details| details.causes.as_ref())
        .and_then(|causes| {
            causes
                .iter()
                .find(|cause| cause.reason.as_deref() == Some("ExitCode"))
        })
        .and_then(|cause| cause.message.as_ref())
        .and_then(|message| message.parse().ok())
        .unwrap_or(1)
}

pub(crate) fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(status) if status.code == 404)
}

pub(crate) fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(status) if status.code == 409)
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Status, StatusCause, StatusDetails};

    use super::*;

    fn status(state: &str, causes: Vec<StatusCause>) -> Status {
        Status {
            status: Some(state.to_string()),
            details: Some(StatusDetails {
                causes: Some(causes),
                ..StatusDetails::default()
            }),
            ..Status::default()
        }
    }

    #[test]
    fn exec_success_maps_to_zero() {
        assert_eq!(exit_code_from_status(&status("Success", vec![])), 0);
    }

    #[test]
    fn exec_failure_extracts_exit_code() {
        let status = status(
            "Failure",
            vec![StatusCause {
                reason: Some("ExitCode".to_string()),
                message: Some("2".to_string()),
                ..StatusCause::default()
            }],
        );
        assert_eq!(exit_code_from_status(&status), 2);
    }

    #[test]
    fn exec_failure_without_cause_defaults_to_one() {
        assert_eq!(exit_code_from_status(&status("Failure", vec![])), 1);
    }

    #[test]
    fn not_found_detection() {
        let err = kube::Error::Api(Box::new(kube::core::Status {
            status: Some(kube::core::response::StatusSummary::Failure),
            message: "not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
            ..kube::core::Status::default()
        }));
        assert!(is_not_found(&err));
        assert!(!is_conflict(&err));
    }
}

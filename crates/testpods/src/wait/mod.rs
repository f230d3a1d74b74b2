//! Readiness evaluation: pluggable, deadline-bounded strategies polling
//! heterogeneous signals.
//!
//! Strategies run against a [`WaitTarget`], the seam between the polling
//! logic and the cluster. The orchestrator provides a live target wired to
//! the pod under test; tests provide stubs.
//!
//! Every strategy distinguishes two outcomes per attempt:
//!
//! - *not yet*: the signal is absent (connection refused, 5xx, log line not
//!   matched, non-zero exit code). Retried until the deadline.
//! - *failure*: the attempt itself broke (API error, exec transport error).
//!   Tolerated up to a per-strategy number of consecutive failures, then the
//!   strategy terminates with the last failure as cause.
//!
//! Attempts are cancellable at sub-poll granularity: when the deadline fires
//! mid-attempt, the in-flight attempt is abandoned and a timeout error is
//! returned.

use std::{fmt, future::Future, time::Duration};

use async_trait::async_trait;
use futures::stream::BoxStream;
use snafu::Snafu;
use tokio::time::{Instant, sleep, timeout};
use tracing::debug;

use crate::host_and_port::HostAndPort;

mod command;
mod http;
mod log;
mod probe;
mod tcp;

pub use command::CommandWait;
pub use http::HttpWait;
pub use log::LogMessageWait;
pub use probe::ReadinessProbeWait;
pub use tcp::TcpWait;

pub use regex::Regex;

type Result<T, E = Error> = std::result::Result<T, E>;

/// Default pause between attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default per-strategy timeout when neither the strategy nor the pod
/// overrides it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of consecutive attempt failures before a strategy gives up.
pub const DEFAULT_FAILURES_ALLOWED: u32 = 3;

/// An error raised by a [`WaitTarget`] implementation.
#[derive(Debug, Snafu)]
#[snafu(whatever, display("{message}"))]
pub struct TargetError {
    message: String,
    #[snafu(source(from(Box<dyn std::error::Error + Send + Sync>, Some)))]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TargetError {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// What a strategy polls against.
///
/// `exec` and `log_lines` return `Ok(None)` while the target pod has not
/// been scheduled yet; strategies treat that as "not yet" rather than as a
/// failure.
#[async_trait]
pub trait WaitTarget: Send + Sync {
    /// Identity used in log and error messages.
    fn describe(&self) -> String;

    /// Resolves the host-reachable endpoint behind a declared port.
    async fn endpoint_for(&self, port: u16) -> Result<HostAndPort, TargetError>;

    /// Whether the cluster's own readiness signal reports the workload ready.
    async fn workload_ready(&self) -> Result<bool, TargetError>;

    /// Runs a command inside the target container, returning its exit code.
    async fn exec(&self, command: &[String]) -> Result<Option<i32>, TargetError>;

    /// Opens a follow-stream over the target container's log lines.
    async fn log_lines(
        &self,
    ) -> Result<Option<BoxStream<'static, Result<String, TargetError>>>, TargetError>;
}

/// Outcome of a single strategy attempt.
pub enum Attempt {
    Ready,
    NotYet(String),
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{strategy} readiness check timed out after {budget:?} ({last})"))]
    Timeout {
        strategy: &'static str,
        budget: Duration,
        last: String,
    },

    #[snafu(display("{strategy} readiness check failed {failures} consecutive times"))]
    AttemptsExhausted {
        strategy: &'static str,
        failures: u32,
        source: TargetError,
    },

    #[snafu(display("an any-of composite needs at least one strategy"))]
    EmptyAny,

    #[snafu(display("no strategy of the any-of composite succeeded"))]
    AnyExhausted {
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },
}

/// A cancellable, deadline-bounded readiness predicate.
#[async_trait]
pub trait WaitStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// The timeout configured on the strategy itself, if any. The caller
    /// falls back to a workload-kind default otherwise.
    fn configured_timeout(&self) -> Option<Duration>;

    /// Polls until ready or until `budget` is used up.
    async fn wait_until_ready(&self, target: &dyn WaitTarget, budget: Duration) -> Result<()>;
}

/// Per-strategy polling knobs.
#[derive(Clone, Debug)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Option<Duration>,
    pub failures_allowed: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
            failures_allowed: DEFAULT_FAILURES_ALLOWED,
        }
    }
}

/// The shared polling loop: sleep-separated attempts under a deadline, with
/// a consecutive-failure budget. Never busy-waits.
pub(crate) async fn poll_until<F, Fut>(
    strategy: &'static str,
    settings: &PollSettings,
    budget: Duration,
    mut attempt: F,
) -> Result<()>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Attempt, TargetError>> + Send,
{
    let deadline = Instant::now() + budget;
    let mut consecutive_failures = 0u32;
    let mut last = String::from("no attempts made");

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return TimeoutSnafu {
                strategy,
                budget,
                last,
            }
            .fail();
        }

        match timeout(remaining, attempt()).await {
            // The deadline fired mid-attempt, abandoning it.
            Err(_elapsed) => {
                return TimeoutSnafu {
                    strategy,
                    budget,
                    last: "in-flight attempt abandoned at deadline",
                }
                .fail();
            }
            Ok(Ok(Attempt::Ready)) => return Ok(()),
            Ok(Ok(Attempt::NotYet(reason))) => {
                debug!(strategy, reason, "not ready yet");
                consecutive_failures = 0;
                last = reason;
            }
            Ok(Err(err)) => {
                consecutive_failures += 1;
                if consecutive_failures > settings.failures_allowed {
                    return Err(Error::AttemptsExhausted {
                        strategy,
                        failures: consecutive_failures,
                        source: err,
                    });
                }
                debug!(strategy, error = %err, consecutive_failures, "attempt failed");
                last = err.to_string();
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        sleep(settings.interval.min(remaining)).await;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CompositeMode {
    /// Every sub-strategy must pass, in order.
    All,
    /// The first passing sub-strategy wins.
    Any,
}

/// Runs sub-strategies sequentially under one shared budget.
pub struct CompositeWait {
    mode: CompositeMode,
    strategies: Vec<Box<dyn WaitStrategy>>,
    timeout: Option<Duration>,
}

impl CompositeWait {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn child_budget(child: &dyn WaitStrategy, remaining: Duration) -> Duration {
        match child.configured_timeout() {
            Some(configured) => configured.min(remaining),
            None => remaining,
        }
    }
}

#[async_trait]
impl WaitStrategy for CompositeWait {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn configured_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn wait_until_ready(&self, target: &dyn WaitTarget, budget: Duration) -> Result<()> {
        let deadline = Instant::now() + budget;

        match self.mode {
            CompositeMode::All => {
                for strategy in &self.strategies {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return TimeoutSnafu {
                            strategy: self.name(),
                            budget,
                            last: format!("budget exhausted before {:?}", strategy.name()),
                        }
                        .fail();
                    }
                    strategy
                        .wait_until_ready(target, Self::child_budget(strategy.as_ref(), remaining))
                        .await?;
                }
                Ok(())
            }
            CompositeMode::Any => {
                if self.strategies.is_empty() {
                    return EmptyAnySnafu.fail();
                }

                let mut last = Error::Timeout {
                    strategy: self.name(),
                    budget,
                    last: "no strategy attempted".to_string(),
                };
                for strategy in &self.strategies {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    match strategy
                        .wait_until_ready(target, Self::child_budget(strategy.as_ref(), remaining))
                        .await
                    {
                        Ok(()) => return Ok(()),
                        Err(err) => {
                            debug!(strategy = strategy.name(), error = %err, "sub-strategy failed");
                            last = err;
                        }
                    }
                }
                Err(Error::AnyExhausted {
                    source: Box::new(last),
                })
            }
        }
    }
}

impl fmt::Debug for CompositeWait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeWait")
            .field("mode", &self.mode)
            .field("strategies", &self.strategies.len())
            .finish()
    }
}

/// Waits until a TCP connection to the pod's endpoint succeeds.
pub fn tcp(port: u16) -> TcpWait {
    TcpWait::new(port)
}

/// Waits until an HTTP GET against the pod's endpoint returns an acceptable
/// status code (200–399 unless configured otherwise).
pub fn http(port: u16, path: impl Into<String>) -> HttpWait {
    HttpWait::new(port, path)
}

/// Waits until the container log matched `pattern` `times` times.
pub fn log_message(pattern: Regex, times: usize) -> LogMessageWait {
    LogMessageWait::new(pattern, times)
}

/// Waits until the command exits with code 0 inside the container.
pub fn command(command: impl IntoIterator<Item = impl Into<String>>) -> CommandWait {
    CommandWait::new(command)
}

/// Waits until the cluster's own readiness signal reports the workload ready.
pub fn readiness_probe() -> ReadinessProbeWait {
    ReadinessProbeWait::new()
}

/// All strategies must pass, in order. An empty list passes immediately.
pub fn all(strategies: Vec<Box<dyn WaitStrategy>>) -> CompositeWait {
    CompositeWait {
        mode: CompositeMode::All,
        strategies,
        timeout: None,
    }
}

/// The first passing strategy wins. An empty list fails immediately.
pub fn any(strategies: Vec<Box<dyn WaitStrategy>>) -> CompositeWait {
    CompositeWait {
        mode: CompositeMode::Any,
        strategies,
        timeout: None,
    }
}

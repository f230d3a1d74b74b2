//! Workload-status readiness.

use std::time::Duration;

use async_trait::async_trait;

use super::{Attempt, PollSettings, Result, TargetError, WaitStrategy, WaitTarget, poll_until};

/// Polls the cluster's own readiness signal on the workload. The cheapest
/// strategy when the image ships readiness probes.
#[derive(Default)]
pub struct ReadinessProbeWait {
    settings: PollSettings,
}

impl ReadinessProbeWait {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.settings.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout = Some(timeout);
        self
    }

    pub fn with_failures_allowed(mut self, failures_allowed: u32) -> Self {
        self.settings.failures_allowed = failures_allowed;
        self
    }

    async fn attempt(&self, target: &dyn WaitTarget) -> Result<Attempt, TargetError> {
        if target.workload_ready().await? {
            Ok(Attempt::Ready)
        } else {
            Ok(Attempt::NotYet("workload does not report ready".to_string()))
        }
    }
}

#[async_trait]
impl WaitStrategy for ReadinessProbeWait {
    fn name(&self) -> &'static str {
        "readiness-probe"
    }

    fn configured_timeout(&self) -> Option<Duration> {
        self.settings.timeout
    }

    async fn wait_until_ready(&self, target: &dyn WaitTarget, budget: Duration) -> Result<()> {
        poll_until(self.name(), &self.settings, budget, || self.attempt(target)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::{Error, testing::StubTarget};

    #[tokio::test]
    async fn polls_until_the_workload_reports_ready() {
        let target = StubTarget::ready_sequence([Ok(false), Ok(false), Ok(true)]);

        ReadinessProbeWait::new()
            .with_poll_interval(Duration::from_millis(5))
            .wait_until_ready(&target, Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn api_errors_beyond_tolerance_surface_the_cause() {
        let target = StubTarget::ready_sequence([Err("api unreachable"); 4]);

        let err = ReadinessProbeWait::new()
            .with_poll_interval(Duration::from_millis(5))
            .with_failures_allowed(2)
            .wait_until_ready(&target, Duration::from_secs(5))
            .await
            .unwrap_err();

        match err {
            Error::AttemptsExhausted { failures, source, .. } => {
                assert_eq!(failures, 3);
                assert_eq!(source.to_string(), "api unreachable");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

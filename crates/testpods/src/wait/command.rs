//! In-container command readiness.

use std::time::Duration;

use async_trait::async_trait;

use super::{Attempt, PollSettings, Result, TargetError, WaitStrategy, WaitTarget, poll_until};

/// Runs a command inside the container (e.g. `pg_isready`) and succeeds on
/// exit code 0. Non-zero exit codes are the expected not-ready signal.
pub struct CommandWait {
    command: Vec<String>,
    settings: PollSettings,
}

impl CommandWait {
    pub fn new(command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            settings: PollSettings::default(),
        }
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
        match target.exec(&self.command).await? {
            None => Ok(Attempt::NotYet("target pod is not scheduled yet".to_string())),
            Some(0) => Ok(Attempt::Ready),
            Some(code) => Ok(Attempt::NotYet(format!(
                "{:?} exited with code {code}",
                self.command
            ))),
        }
    }
}

#[async_trait]
impl WaitStrategy for CommandWait {
    fn name(&self) -> &'static str {
        "command"
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
    async fn retries_until_exit_code_zero() {
        let target = StubTarget::exec_sequence([Ok(Some(1)), Ok(Some(1)), Ok(Some(0))]);

        CommandWait::new(["pg_isready"])
            .with_poll_interval(Duration::from_millis(5))
            .wait_until_ready(&target, Duration::from_secs(5))
            .await
            .unwrap();

        assert!(target.exec_codes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn an_unscheduled_pod_is_not_a_failure() {
        let target = StubTarget::exec_sequence([Ok(None), Ok(None), Ok(Some(0))]);

        CommandWait::new(["pg_isready"])
            .with_poll_interval(Duration::from_millis(5))
            .with_failures_allowed(0)
            .wait_until_ready(&target, Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn transport_errors_count_against_the_tolerance() {
        let target =
            StubTarget::exec_sequence([Err("exec transport broke"), Err("exec transport broke")]);

        let err = CommandWait::new(["pg_isready"])
            .with_poll_interval(Duration::from_millis(5))
            .with_failures_allowed(1)
            .wait_until_ready(&target, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::AttemptsExhausted { failures: 2, .. }));
    }

    #[tokio::test]
    async fn a_success_resets_the_failure_count() {
        let target = StubTarget::exec_sequence([
            Err("blip"),
            Ok(Some(1)),
            Err("blip"),
            Ok(Some(0)),
        ]);

        CommandWait::new(["pg_isready"])
            .with_poll_interval(Duration::from_millis(5))
            .with_failures_allowed(1)
            .wait_until_ready(&target, Duration::from_secs(5))
            .await
            .unwrap();
    }
}

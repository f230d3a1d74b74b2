//! Log-pattern readiness.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;

use super::{Attempt, PollSettings, Result, TargetError, WaitStrategy, WaitTarget, poll_until};

/// Streams container logs and succeeds after the pattern matched the
/// configured number of times (once by default).
///
/// Each attempt opens a fresh stream and counts matches from the beginning
/// of the log, so a restarted container does not leave stale counts behind.
/// The stream reader lives only for the duration of the attempt; when the
/// deadline fires mid-stream, the attempt is abandoned with it.
pub struct LogMessageWait {
    pattern: Regex,
    times: usize,
    settings: PollSettings,
}

impl LogMessageWait {
    pub fn new(pattern: Regex, times: usize) -> Self {
        Self {
            pattern,
            times: times.max(1),
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
        let Some(mut lines) = target.log_lines().await? else {
            return Ok(Attempt::NotYet("target pod is not scheduled yet".to_string()));
        };

        let mut found = 0;
        while let Some(line) = lines.next().await {
            let line = line?;
            if self.pattern.is_match(&line) {
                found += 1;
                if found >= self.times {
                    return Ok(Attempt::Ready);
                }
            }
        }

        Ok(Attempt::NotYet(format!(
            "pattern {:?} matched {found}/{} times",
            self.pattern.as_str(),
            self.times
        )))
    }
}

#[async_trait]
impl WaitStrategy for LogMessageWait {
    fn name(&self) -> &'static str {
        "log-message"
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

    fn pattern(s: &str) -> Regex {
        Regex::new(s).unwrap()
    }

    #[tokio::test]
    async fn succeeds_once_the_pattern_matched() {
        let target = StubTarget::log_batches([vec![
            "starting up",
            "database system is ready to accept connections",
        ]]);

        LogMessageWait::new(pattern("ready to accept connections"), 1)
            .with_poll_interval(Duration::from_millis(5))
            .wait_until_ready(&target, Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn counts_matches_across_one_stream() {
        // Postgres restarts once during init; readiness is the second
        // occurrence of the marker line.
        let target = StubTarget::log_batches([
            vec!["ready to accept connections"],
            vec![
                "ready to accept connections",
                "shutting down",
                "ready to accept connections",
            ],
        ]);

        LogMessageWait::new(pattern("ready to accept connections"), 2)
            .with_poll_interval(Duration::from_millis(5))
            .wait_until_ready(&target, Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn times_out_when_the_pattern_never_shows() {
        let target = StubTarget::log_batches([vec!["nothing of note"]]);

        let err = LogMessageWait::new(pattern("ready"), 1)
            .with_poll_interval(Duration::from_millis(5))
            .wait_until_ready(&target, Duration::from_millis(50))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout { strategy: "log-message", .. }));
    }

    #[tokio::test]
    async fn a_zero_match_count_is_bumped_to_one() {
        let strategy = LogMessageWait::new(pattern("x"), 0);
        assert_eq!(strategy.times, 1);
    }
}

//! TCP connect readiness.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use super::{Attempt, PollSettings, Result, TargetError, WaitStrategy, WaitTarget, poll_until};

/// Succeeds on the first clean TCP connect to the pod's endpoint.
///
/// A refused or reset connection is the expected signal while the workload
/// is still coming up and is retried until the deadline.
pub struct TcpWait {
    port: u16,
    settings: PollSettings,
}

impl TcpWait {
    pub fn new(port: u16) -> Self {
        Self {
            port,
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
        let endpoint = target.endpoint_for(self.port).await?;

        match TcpStream::connect((endpoint.host(), endpoint.port())).await {
            // Connected cleanly; dropping the stream closes it again.
            Ok(_stream) => Ok(Attempt::Ready),
            Err(err) => Ok(Attempt::NotYet(format!("cannot connect to {endpoint}: {err}"))),
        }
    }
}

#[async_trait]
impl WaitStrategy for TcpWait {
    fn name(&self) -> &'static str {
        "tcp"
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
    use tokio::net::TcpListener;

    use super::*;
    use crate::{
        HostAndPort,
        wait::{Error, testing::StubTarget},
    };

    #[tokio::test]
    async fn succeeds_against_a_listening_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let target = StubTarget::with_endpoint(HostAndPort::new("127.0.0.1", port));

        // Keep the listener alive while the strategy connects.
        let accept = tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        TcpWait::new(80)
            .with_poll_interval(Duration::from_millis(5))
            .wait_until_ready(&target, Duration::from_secs(5))
            .await
            .unwrap();

        accept.abort();
    }

    #[tokio::test]
    async fn refused_connections_retry_until_the_deadline() {
        // Bind a listener to reserve a port, then drop it so connects are
        // refused for the rest of the test.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = StubTarget::with_endpoint(HostAndPort::new("127.0.0.1", port));

        let err = TcpWait::new(80)
            .with_poll_interval(Duration::from_millis(5))
            .wait_until_ready(&target, Duration::from_millis(50))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout { strategy: "tcp", .. }));
    }

    #[tokio::test]
    async fn missing_endpoint_exhausts_the_failure_tolerance() {
        let target = StubTarget::default();

        let err = TcpWait::new(80)
            .with_poll_interval(Duration::from_millis(5))
            .with_failures_allowed(1)
            .wait_until_ready(&target, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::AttemptsExhausted { failures: 2, .. }));
    }
}

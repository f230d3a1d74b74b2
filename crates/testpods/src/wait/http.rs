//! HTTP GET readiness.

use std::time::Duration;

use async_trait::async_trait;
use snafu::ResultExt;
use tokio::sync::OnceCell;

use super::{Attempt, PollSettings, Result, TargetError, WaitStrategy, WaitTarget, poll_until};

/// Issues a GET against a URL derived from the pod endpoint and a path, and
/// succeeds once the response status is acceptable (200–399 unless
/// configured otherwise).
///
/// Redirects are not followed; a redirect status is judged as-is against the
/// acceptable set.
pub struct HttpWait {
    port: u16,
    path: String,
    acceptable: Option<Vec<u16>>,
    client: OnceCell<reqwest::Client>,
    settings: PollSettings,
}

impl HttpWait {
    pub fn new(port: u16, path: impl Into<String>) -> Self {
        Self {
            port,
            path: path.into(),
            acceptable: None,
            client: OnceCell::new(),
            settings: PollSettings::default(),
        }
    }

    /// Replaces the default 200–399 acceptance range with an explicit set.
    pub fn with_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.acceptable = Some(codes.into_iter().collect());
        self
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

    fn is_acceptable(&self, status: u16) -> bool {
        match &self.acceptable {
            Some(codes) => codes.contains(&status),
            None => (200..400).contains(&status),
        }
    }

    async fn client(&self) -> Result<&reqwest::Client, TargetError> {
        self.client
            .get_or_try_init(|| async {
                reqwest::Client::builder()
                    .redirect(reqwest::redirect::Policy::none())
                    .build()
            })
            .await
            .whatever_context("failed to build the HTTP client")
    }

    async fn attempt(&self, target: &dyn WaitTarget) -> Result<Attempt, TargetError> {
        let endpoint = target.endpoint_for(self.port).await?;
        let url = endpoint
            .url("http", &self.path)
            .whatever_context("failed to derive the readiness URL")?;

        match self.client().await?.get(url.clone()).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if self.is_acceptable(status) {
                    Ok(Attempt::Ready)
                } else {
                    Ok(Attempt::NotYet(format!("GET {url} returned status {status}")))
                }
            }
            // Refused connections and resets are the normal startup signal.
            Err(err) => Ok(Attempt::NotYet(format!("GET {url} failed: {err}"))),
        }
    }
}

#[async_trait]
impl WaitStrategy for HttpWait {
    fn name(&self) -> &'static str {
        "http"
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
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;
    use crate::{HostAndPort, wait::Error, wait::testing::StubTarget};

    /// Serves a fixed HTTP status on every connection until aborted.
    async fn serve_status(status: &'static str) -> (HostAndPort, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response =
                    format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });

        (HostAndPort::new("127.0.0.1", port), server)
    }

    #[tokio::test]
    async fn accepts_a_200_response() {
        let (endpoint, server) = serve_status("200 OK").await;
        let target = StubTarget::with_endpoint(endpoint);

        HttpWait::new(80, "/healthz")
            .with_poll_interval(Duration::from_millis(5))
            .wait_until_ready(&target, Duration::from_secs(5))
            .await
            .unwrap();

        server.abort();
    }

    #[tokio::test]
    async fn rejects_a_500_response_until_the_deadline() {
        let (endpoint, server) = serve_status("500 Internal Server Error").await;
        let target = StubTarget::with_endpoint(endpoint);

        let err = HttpWait::new(80, "/healthz")
            .with_poll_interval(Duration::from_millis(5))
            .wait_until_ready(&target, Duration::from_millis(60))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout { strategy: "http", .. }));
        server.abort();
    }

    #[tokio::test]
    async fn custom_status_codes_override_the_default_range() {
        let (endpoint, server) = serve_status("401 Unauthorized").await;
        let target = StubTarget::with_endpoint(endpoint);

        HttpWait::new(80, "/")
            .with_status_codes([401])
            .with_poll_interval(Duration::from_millis(5))
            .wait_until_ready(&target, Duration::from_secs(5))
            .await
            .unwrap();

        server.abort();
    }

    #[tokio::test]
    async fn redirects_are_not_followed() {
        let (endpoint, server) = serve_status("302 Found").await;
        let target = StubTarget::with_endpoint(endpoint);

        // 302 sits inside the default acceptable range, so the strategy
        // succeeds on the redirect itself instead of chasing it.
        HttpWait::new(80, "/")
            .with_poll_interval(Duration::from_millis(5))
            .wait_until_ready(&target, Duration::from_secs(5))
            .await
            .unwrap();

        server.abort();
    }
}

//! A host/port pair as handed out to tests after a pod became ready.

use std::{fmt, num::ParseIntError, str::FromStr};

use snafu::{OptionExt, ResultExt, Snafu, ensure};
use url::Url;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu, PartialEq)]
pub enum Error {
    #[snafu(display("address {input:?} is missing a port"))]
    MissingPort { input: String },

    #[snafu(display("address {input:?} contains an invalid port"))]
    InvalidPort {
        source: ParseIntError,
        input: String,
    },

    #[snafu(display("address {input:?} has an empty host"))]
    EmptyHost { input: String },
}

#[derive(Debug, Snafu)]
#[snafu(display("cannot build a {scheme:?} URL from {endpoint}"))]
pub struct UrlError {
    source: url::ParseError,
    scheme: String,
    endpoint: HostAndPort,
}

/// A host-reachable `(host, port)` pair.
///
/// This is what external access resolution produces once a pod is ready: the
/// address a test process outside the cluster can actually connect to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HostAndPort {
    host: String,
    port: u16,
}

impl HostAndPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Formats the endpoint as a URL, e.g. `http://10.0.0.1:30080/healthz`.
    ///
    /// The path is normalized to start with a single `/`.
    pub fn url(&self, scheme: &str, path: &str) -> Result<Url, UrlError> {
        let path = path.trim_start_matches('/');
        Url::parse(&format!("{scheme}://{self}/{path}")).context(UrlSnafu {
            scheme,
            endpoint: self.clone(),
        })
    }
}

impl fmt::Display for HostAndPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostAndPort {
    type Err = Error;

    /// Parses `host:port`. IPv6 hosts use the usual bracket form,
    /// e.g. `[::1]:8080`.
    fn from_str(input: &str) -> Result<Self> {
        let (host, port) = input
            .rsplit_once(':')
            .context(MissingPortSnafu { input })?;

        let port = port.parse::<u16>().context(InvalidPortSnafu { input })?;

        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        ensure!(!host.is_empty(), EmptyHostSnafu { input });

        Ok(Self::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("localhost:5432", "localhost", 5432)]
    #[case("10.96.17.4:30080", "10.96.17.4", 30080)]
    #[case("[::1]:8080", "::1", 8080)]
    #[case("db.testpods.svc:5432", "db.testpods.svc", 5432)]
    fn parse_good(#[case] input: &str, #[case] host: &str, #[case] port: u16) {
        let parsed = input.parse::<HostAndPort>().unwrap();
        assert_eq!(parsed.host(), host);
        assert_eq!(parsed.port(), port);
    }

    #[rstest]
    #[case("localhost")]
    #[case("")]
    #[case("localhost:")]
    #[case("localhost:notaport")]
    #[case("localhost:99999")]
    #[case(":8080")]
    fn parse_bad(#[case] input: &str) {
        assert!(input.parse::<HostAndPort>().is_err());
    }

    #[test]
    fn display_round_trips() {
        let endpoint = HostAndPort::new("node-1", 30123);
        assert_eq!(endpoint.to_string(), "node-1:30123");
        assert_eq!("node-1:30123".parse::<HostAndPort>().unwrap(), endpoint);
    }

    #[rstest]
    #[case("/actuator/health", "http://10.0.0.1:30080/actuator/health")]
    #[case("actuator/health", "http://10.0.0.1:30080/actuator/health")]
    #[case("", "http://10.0.0.1:30080/")]
    fn url_formatting(#[case] path: &str, #[case] expected: &str) {
        let endpoint = HostAndPort::new("10.0.0.1", 30080);
        assert_eq!(endpoint.url("http", path).unwrap().as_str(), expected);
    }
}

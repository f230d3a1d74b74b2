//! Throwaway Kubernetes workloads for integration tests.
//!
//! A test declares one or more [`TestPod`]s (a database, a message broker, a
//! custom service), starts them against a local cluster, reads back
//! host-reachable connection endpoints, runs its assertions and tears
//! everything down again, surviving test failure, partial startup failure
//! and concurrent execution.
//!
//! ```no_run
//! use testpods::{TestPod, wait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut web = TestPod::builder("web")
//!     .image("nginx:alpine")
//!     .port(80)
//!     .wait_for(wait::tcp(80))
//!     .build()?;
//!
//! web.start().await?;
//! let endpoint = web.external_endpoint()?;
//! // ... connect to `endpoint` and assert ...
//! web.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod client;
pub mod cluster;
pub mod defaults;
pub mod host_and_port;
pub mod labels;
pub mod namespace;
pub mod pod;
pub mod service;
pub mod storage;
pub mod validation;
pub mod wait;
pub mod workload;

// External re-exports
pub use k8s_openapi;
pub use kube;
// Internal re-exports
pub use host_and_port::HostAndPort;
pub use pod::{TestPod, TestPodBuilder};

//! Hetki - ephemeral service instances for cluster integration tests
//!
//! Hetki provisions short-lived application instances inside a Kubernetes
//! cluster on behalf of a test run, detects when each one is ready to
//! receive traffic, and tears everything down afterwards. Declare a
//! workload, start it, poll for readiness, make requests, close it.
//!
//! # Example
//!
//! ```no_run
//! use hetki::{eventually, ClusterClient, ContainerWorkload, ManagedService, ServiceContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     hetki::init_logging();
//!
//!     let client = ClusterClient::attach("tests").await?;
//!     let context = ServiceContext::new("greetings", "app-greetings").with_client(client);
//!     let workload = ContainerWorkload::new("quay.io/myorg/greetings:1.0")
//!         .port(8080)
//!         .expected_log("Installed features: (.*), resteasy-reactive, (.*)");
//!
//!     let mut service = ManagedService::new(context, workload);
//!     service.start().await?;
//!
//!     eventually(|| async { service.is_running() }).await_condition().await?;
//!
//!     let url = format!("http://{}:{}", service.host().await?, service.first_mapped_port()?);
//!     println!("service ready at {url}");
//!
//!     service.close().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod context;
pub mod manifest;
pub mod poll;
pub mod service;
pub mod telemetry;
pub mod watcher;
pub mod workload;

// Re-export commonly used types
pub use client::{ClusterClient, ClusterError};
pub use config::{ConfigError, ServiceConfiguration};
pub use context::ServiceContext;
pub use manifest::ManifestError;
pub use poll::{eventually, PollError};
pub use service::{Lifecycle, ManagedService, ServiceError};
pub use telemetry::init_logging;
pub use watcher::LogWatcher;
pub use workload::{ContainerWorkload, WorkloadDescriptor, WorkloadSpec};

//! Workload descriptions
//!
//! A [`WorkloadDescriptor`] tells the lifecycle engine what to run: the
//! container image, the ports the application listens on, the log line that
//! signals readiness, and an optional command override. Each workload kind
//! (prebuilt container image, locally built artifact, ...) implements the
//! trait once; [`ManagedService`](crate::ManagedService) supplies the
//! lifecycle around it.

/// Everything the lifecycle engine needs to know about one workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    /// Container image reference, e.g. `quay.io/myorg/myapp:1.0`
    pub image: String,

    /// Ports the application listens on. The first entry is the default
    /// port callers get back from `first_mapped_port()`.
    pub ports: Vec<i32>,

    /// Regex matched against captured log lines to detect readiness
    pub expected_log: String,

    /// Optional command override for the application container
    pub command: Option<Vec<String>>,
}

/// Capability interface implemented per workload kind
///
/// Replaces a subclass-per-kind hierarchy: implementors only describe the
/// workload, the state machine stays in one place.
pub trait WorkloadDescriptor: Send + Sync {
    /// Describe the workload to run
    fn describe(&self) -> WorkloadSpec;
}

/// A workload backed by a prebuilt container image
///
/// The common case: point at an image, declare its ports and the log line
/// that marks it ready.
///
/// # Example
///
/// ```
/// use hetki::ContainerWorkload;
///
/// let app = ContainerWorkload::new("quay.io/myorg/greetings:1.0")
///     .port(8080)
///     .expected_log("Installed features: (.*), resteasy-reactive, (.*)");
/// ```
#[derive(Debug, Clone)]
pub struct ContainerWorkload {
    image: String,
    ports: Vec<i32>,
    expected_log: String,
    command: Option<Vec<String>>,
}

impl ContainerWorkload {
    /// Create a workload for the given image
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ports: Vec::new(),
            expected_log: String::new(),
            command: None,
        }
    }

    /// Declare an application port
    #[must_use]
    pub fn port(mut self, port: i32) -> Self {
        self.ports.push(port);
        self
    }

    /// Declare multiple application ports
    #[must_use]
    pub fn ports(mut self, ports: impl IntoIterator<Item = i32>) -> Self {
        self.ports.extend(ports);
        self
    }

    /// Set the readiness log pattern
    #[must_use]
    pub fn expected_log(mut self, pattern: impl Into<String>) -> Self {
        self.expected_log = pattern.into();
        self
    }

    /// Override the container command
    #[must_use]
    pub fn command(mut self, command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = Some(command.into_iter().map(Into::into).collect());
        self
    }
}

impl WorkloadDescriptor for ContainerWorkload {
    fn describe(&self) -> WorkloadSpec {
        WorkloadSpec {
            image: self.image.clone(),
            ports: self.ports.clone(),
            expected_log: self.expected_log.clone(),
            command: self.command.clone(),
        }
    }
}

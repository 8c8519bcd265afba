//! Managed service lifecycle
//!
//! [`ManagedService`] is the orchestration core: one instance per declared
//! service, sequencing init → reconcile → scale-up → log-watch → running,
//! and running → stop-watch → scale-down → stopped. The workload itself is
//! described by a [`WorkloadDescriptor`]; the state machine stays the same
//! for every workload kind.
//!
//! `start` blocks until the manifest is applied and the scale/expose calls
//! round-trip, but not until the application is ready. Readiness is
//! level-triggered: callers poll [`ManagedService::is_running`], which
//! matches the workload's expected-log pattern against the captured log
//! buffer.
//!
//! # Example
//!
//! ```ignore
//! use hetki::{eventually, ClusterClient, ContainerWorkload, ManagedService, ServiceContext};
//!
//! let client = ClusterClient::attach("tests").await?;
//! let context = ServiceContext::new("greetings", "app-greetings").with_client(client);
//! let workload = ContainerWorkload::new("quay.io/myorg/greetings:1.0")
//!     .port(8080)
//!     .expected_log("Installed features: (.*), resteasy-reactive, (.*)");
//!
//! let mut service = ManagedService::new(context, workload);
//! service.start().await?;
//! eventually(|| async { service.is_running() }).await_condition().await?;
//! ```

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::client::ClusterError;
use crate::config::{ConfigError, ServiceConfiguration};
use crate::context::ServiceContext;
use crate::manifest::{self, ManifestError};
use crate::watcher::LogWatcher;
use crate::workload::WorkloadDescriptor;

/// Externally mapped HTTP port for route-exposed services
///
/// External traffic always enters through the ingress HTTP port, whatever
/// port the application listens on internally.
const EXTERNAL_HTTP_PORT: i32 = 80;

/// Errors from lifecycle operations
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("service is not running")]
    NotRunning,

    #[error("workload declares no ports")]
    NoDeclaredPorts,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// Lifecycle state of a managed service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

/// Record of facade calls, for asserting call sequences without a cluster
#[cfg(test)]
type CallRecorder = std::sync::Arc<std::sync::Mutex<Vec<&'static str>>>;

/// One ephemeral service instance inside the cluster
pub struct ManagedService {
    context: ServiceContext,
    descriptor: Box<dyn WorkloadDescriptor>,
    watcher: Option<LogWatcher>,
    state: Lifecycle,
    // First-time provisioning (expose) happened; later starts only re-apply.
    provisioned: bool,
    #[cfg(test)]
    recorded_calls: Option<CallRecorder>,
}

impl ManagedService {
    /// Create a managed service around a context and a workload
    pub fn new(context: ServiceContext, descriptor: impl WorkloadDescriptor + 'static) -> Self {
        Self {
            context,
            descriptor: Box::new(descriptor),
            watcher: None,
            state: Lifecycle::Uninitialized,
            provisioned: false,
            #[cfg(test)]
            recorded_calls: None,
        }
    }

    /// Record facade calls instead of reaching a cluster
    #[cfg(test)]
    fn record_cluster_calls(&mut self) -> CallRecorder {
        let recorder = CallRecorder::default();
        self.recorded_calls = Some(std::sync::Arc::clone(&recorder));
        recorder
    }

    /// The service's identity and working state
    pub fn context(&self) -> &ServiceContext {
        &self.context
    }

    /// Current lifecycle state
    pub fn state(&self) -> Lifecycle {
        self.state
    }

    /// Bind configuration and prepare the working directory, once
    ///
    /// Subsequent calls are no-ops. `start` performs this implicitly when
    /// needed.
    pub fn init(&mut self) -> Result<(), ServiceError> {
        if self.state != Lifecycle::Uninitialized {
            return Ok(());
        }

        self.context.resolve_configuration()?;
        self.context.ensure_folder()?;
        self.state = Lifecycle::Initialized;

        debug!(service = %self.context.name(), "Service initialized");
        Ok(())
    }

    /// Reconcile the manifest and bring the service up
    ///
    /// A no-op while already running. The first start exposes the
    /// service's ports; a start after `stop` only re-applies the manifest
    /// and scales back up. Any failure leaves the state unchanged, so a
    /// later `start` is a clean retry.
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        if self.state == Lifecycle::Running {
            debug!(service = %self.context.name(), "Service already running");
            return Ok(());
        }

        self.init()?;

        let manifest_path = self.reconcile()?;
        self.bring_up(&manifest_path).await?;

        self.provisioned = true;
        self.state = Lifecycle::Running;

        info!(
            service = %self.context.name(),
            owner = %self.context.owner(),
            "Service started"
        );
        Ok(())
    }

    /// Scale the service down and end log capture
    ///
    /// Idempotent and safe in any state, including before the first
    /// `start`.
    pub async fn stop(&mut self) -> Result<(), ServiceError> {
        if let Some(watcher) = self.watcher.as_mut() {
            watcher.stop_watching().await;
        }

        if self.provisioned {
            self.scale_down().await?;
        }

        self.state = Lifecycle::Stopped;

        info!(service = %self.context.name(), "Service stopped");
        Ok(())
    }

    /// Whether the service has printed its expected-log pattern
    ///
    /// Non-blocking and level-triggered: callers poll it, typically with
    /// [`eventually`](crate::eventually). `false` whenever the service is
    /// not in the `Running` state or no log watcher is active.
    pub fn is_running(&self) -> bool {
        if self.state != Lifecycle::Running {
            return false;
        }

        let expected = self.descriptor.describe().expected_log;
        self.watcher
            .as_ref()
            .is_some_and(|w| w.logs_contains(&expected))
    }

    /// Host callers should address the service by
    ///
    /// In internal mode this is the logical service name, resolvable from
    /// inside the cluster; otherwise the externally assigned route host.
    pub async fn host(&self) -> Result<String, ServiceError> {
        if self.configuration()?.use_internal_service {
            return Ok(self.context.name().to_string());
        }

        let host = self.context.client()?.host(self.context.owner()).await?;
        Ok(host)
    }

    /// Map a declared port to the port callers should connect to
    ///
    /// Internal mode passes the port through unchanged; external mode
    /// always maps to the ingress HTTP port.
    pub fn mapped_port(&self, port: i32) -> Result<i32, ServiceError> {
        if self.configuration()?.use_internal_service {
            Ok(port)
        } else {
            Ok(EXTERNAL_HTTP_PORT)
        }
    }

    /// Map the first effective port, the workload's default
    pub fn first_mapped_port(&self) -> Result<i32, ServiceError> {
        let first = self
            .effective_ports()
            .first()
            .copied()
            .ok_or(ServiceError::NoDeclaredPorts)?;

        self.mapped_port(first)
    }

    /// Snapshot of the captured log lines
    ///
    /// Fails with [`ServiceError::NotRunning`] before the first `start`.
    /// After `stop`, the buffer of the last run remains readable for
    /// failure diagnosis.
    pub fn logs(&self) -> Result<Vec<String>, ServiceError> {
        self.watcher
            .as_ref()
            .map(LogWatcher::logs)
            .ok_or(ServiceError::NotRunning)
    }

    /// Whether the captured logs match a pattern
    pub fn logs_contain(&self, pattern: &str) -> Result<bool, ServiceError> {
        self.watcher
            .as_ref()
            .map(|w| w.logs_contains(pattern))
            .ok_or(ServiceError::NotRunning)
    }

    /// Declared application ports plus configured additional ports
    ///
    /// In declaration order, not deduplicated; the manifest port union
    /// dedups by port number later. The first entry is the workload's
    /// default port.
    pub fn effective_ports(&self) -> Vec<i32> {
        let mut ports = self.descriptor.describe().ports;

        if let Some(conf) = self.context.configuration() {
            ports.extend(&conf.additional_ports);
        }

        ports
    }

    /// Stop the service and tear down its working directory
    ///
    /// The directory is removed (subject to `delete-folder-on-close`) even
    /// when scaling down fails, so a broken cluster never leaks local
    /// state.
    pub async fn close(mut self) -> Result<(), ServiceError> {
        let stopped = self.stop().await;
        self.context.close();
        stopped
    }

    /// Apply the manifest, expose (first time only) and scale up
    async fn bring_up(&mut self, manifest_path: &Path) -> Result<(), ServiceError> {
        #[cfg(test)]
        if let Some(recorder) = self.recorded_calls.as_ref() {
            let mut calls = recorder.lock().unwrap();
            calls.push("apply");
            if !self.provisioned {
                calls.push("expose");
            }
            calls.push("scale-up");
            return Ok(());
        }

        let client = self.context.client()?.clone();
        let owner = self.context.owner().to_string();

        client.apply_manifest(manifest_path).await?;

        if !self.provisioned {
            client.expose(&owner, &self.effective_ports()).await?;
        }

        client.scale_to(&owner, 1).await?;

        self.watcher = Some(LogWatcher::watch_service(client, &owner));
        Ok(())
    }

    /// Scale the service's deployments down to zero
    async fn scale_down(&mut self) -> Result<(), ServiceError> {
        #[cfg(test)]
        if let Some(recorder) = self.recorded_calls.as_ref() {
            recorder.lock().unwrap().push("scale-down");
            return Ok(());
        }

        let client = self.context.client()?.clone();
        client.stop_service(self.context.owner()).await?;
        Ok(())
    }

    fn configuration(&self) -> Result<&ServiceConfiguration, ServiceError> {
        self.context
            .configuration()
            .ok_or(ServiceError::Config(ConfigError::Unresolved))
    }

    /// Merge template and generated fields into the manifest and persist it
    fn reconcile(&self) -> Result<PathBuf, ServiceError> {
        let conf = self.configuration()?;
        let workload = self.descriptor.describe();
        let ports = self.effective_ports();

        let template = manifest::load_template(conf.template.as_deref())?;
        let mut deployment = manifest::merge(template, self.context.name(), &workload, &ports);
        manifest::enrich(&mut deployment, self.context.owner());

        let path = self.context.service_folder().join(manifest::DEPLOYMENT_FILE);
        manifest::write(&path, &deployment)?;

        debug!(
            service = %self.context.name(),
            manifest = %path.display(),
            "Reconciled deployment manifest"
        );

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfiguration;
    use crate::workload::ContainerWorkload;

    fn service_in(tmp: &tempfile::TempDir, conf: ServiceConfiguration) -> ManagedService {
        let context = ServiceContext::new("greetings", "app-greetings")
            .service_folder_at(tmp.path().join("svc"))
            .with_configuration(conf);

        let workload = ContainerWorkload::new("quay.io/myorg/greetings:1.0")
            .port(8080)
            .expected_log("started in .*s");

        ManagedService::new(context, workload)
    }

    #[tokio::test]
    async fn test_stop_before_start_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let mut service = service_in(&tmp, ServiceConfiguration::new());

        service.stop().await.expect("stop should not fail");
        assert_eq!(service.state(), Lifecycle::Stopped);

        // Stopping again is fine too.
        service.stop().await.expect("stop is idempotent");
    }

    #[tokio::test]
    async fn test_logs_without_start_is_not_running() {
        let tmp = tempfile::tempdir().unwrap();
        let mut service = service_in(&tmp, ServiceConfiguration::new());

        service.stop().await.unwrap();

        assert!(matches!(service.logs(), Err(ServiceError::NotRunning)));
        assert!(!service.is_running());
    }

    #[test]
    fn test_init_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut service = service_in(&tmp, ServiceConfiguration::new());

        service.init().expect("first init");
        service.init().expect("second init is a no-op");
        assert_eq!(service.state(), Lifecycle::Initialized);
    }

    #[test]
    fn test_internal_mode_passes_host_and_port_through() {
        let tmp = tempfile::tempdir().unwrap();
        let mut service = service_in(&tmp, ServiceConfiguration::new().use_internal_service(true));
        service.init().unwrap();

        assert_eq!(service.mapped_port(8080).unwrap(), 8080);
        assert_eq!(service.first_mapped_port().unwrap(), 8080);

        let host = futures::executor::block_on(service.host()).unwrap();
        assert_eq!(host, "greetings");
    }

    #[test]
    fn test_external_mode_maps_every_port_to_http() {
        let tmp = tempfile::tempdir().unwrap();
        let mut service = service_in(&tmp, ServiceConfiguration::new());
        service.init().unwrap();

        assert_eq!(service.mapped_port(8080).unwrap(), 80);
        assert_eq!(service.mapped_port(6000).unwrap(), 80);
        assert_eq!(service.first_mapped_port().unwrap(), 80);
    }

    #[test]
    fn test_first_mapped_port_requires_a_declared_port() {
        let tmp = tempfile::tempdir().unwrap();
        let context = ServiceContext::new("portless", "app-portless")
            .service_folder_at(tmp.path().join("svc"))
            .with_configuration(ServiceConfiguration::new());

        let mut service = ManagedService::new(context, ContainerWorkload::new("portless:v1"));
        service.init().unwrap();

        assert!(matches!(
            service.first_mapped_port(),
            Err(ServiceError::NoDeclaredPorts)
        ));
    }

    #[test]
    fn test_effective_ports_appends_additional_ports() {
        let tmp = tempfile::tempdir().unwrap();
        let mut service = service_in(&tmp, ServiceConfiguration::new().additional_port(6000));
        service.init().unwrap();

        assert_eq!(service.effective_ports(), vec![8080, 6000]);
    }

    #[test]
    fn test_effective_ports_are_not_deduplicated() {
        let tmp = tempfile::tempdir().unwrap();
        let mut service = service_in(&tmp, ServiceConfiguration::new().additional_port(8080));
        service.init().unwrap();

        // Dedup happens by port number during the manifest port union.
        assert_eq!(service.effective_ports(), vec![8080, 8080]);
    }

    #[test]
    fn test_reconcile_persists_the_merged_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let mut service = service_in(&tmp, ServiceConfiguration::new().additional_port(6000));
        service.init().unwrap();

        let path = service.reconcile().expect("reconcile");
        assert!(path.exists());
        assert!(path.ends_with(manifest::DEPLOYMENT_FILE));

        let raw = std::fs::read_to_string(&path).unwrap();
        let deployment: k8s_openapi::api::apps::v1::Deployment =
            serde_yaml::from_str(&raw).unwrap();

        let spec = deployment.spec.as_ref().unwrap();
        let container = &spec.template.spec.as_ref().unwrap().containers[0];
        assert_eq!(container.name, "greetings");
        assert_eq!(container.image.as_deref(), Some("quay.io/myorg/greetings:1.0"));

        let ports: Vec<i32> = container
            .ports
            .as_ref()
            .unwrap()
            .iter()
            .map(|p| p.container_port)
            .collect();
        assert_eq!(ports, vec![8080, 6000]);
    }

    #[tokio::test]
    async fn test_second_start_issues_no_cluster_calls() {
        let tmp = tempfile::tempdir().unwrap();
        let mut service = service_in(&tmp, ServiceConfiguration::new());
        let calls = service.record_cluster_calls();

        service.start().await.expect("first start");
        assert_eq!(service.state(), Lifecycle::Running);
        assert_eq!(*calls.lock().unwrap(), vec!["apply", "expose", "scale-up"]);

        // Exactly one apply + expose + scale-up in total.
        service.start().await.expect("second start is a no-op");
        assert_eq!(*calls.lock().unwrap(), vec!["apply", "expose", "scale-up"]);
    }

    #[tokio::test]
    async fn test_restart_reapplies_without_reexposing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut service = service_in(&tmp, ServiceConfiguration::new());
        let calls = service.record_cluster_calls();

        service.start().await.expect("first start");
        service.stop().await.expect("stop");
        service.start().await.expect("restart");

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["apply", "expose", "scale-up", "scale-down", "apply", "scale-up"]
        );
        assert_eq!(service.state(), Lifecycle::Running);
    }

    #[test]
    fn test_start_without_client_leaves_state_retryable() {
        let tmp = tempfile::tempdir().unwrap();
        let mut service = service_in(&tmp, ServiceConfiguration::new());

        let err = futures::executor::block_on(service.start()).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Config(ConfigError::MissingClient)
        ));

        // Initialization succeeded; a later start with a client retries cleanly.
        assert_eq!(service.state(), Lifecycle::Initialized);
    }

    #[tokio::test]
    #[ignore] // Requires real cluster
    async fn test_full_lifecycle_against_cluster() {
        use crate::client::ClusterClient;
        use crate::poll::eventually;
        use std::time::Duration;

        let client = ClusterClient::attach("default").await.expect("client");
        let tmp = tempfile::tempdir().expect("tempdir");

        let context = ServiceContext::new("lifecycle-test", "lifecycle-test")
            .service_folder_at(tmp.path().join("svc"))
            .with_client(client);

        let workload = ContainerWorkload::new("nginx:alpine")
            .port(80)
            .expected_log("start worker process");

        let mut service = ManagedService::new(context, workload);
        service.start().await.expect("start");

        eventually(|| async { service.is_running() })
            .timeout(Duration::from_secs(120))
            .await_condition()
            .await
            .expect("service should become ready");

        service.start().await.expect("second start is a no-op");
        assert!(service.is_running());

        assert!(!service.logs().expect("logs").is_empty());

        service.close().await.expect("close");
    }
}

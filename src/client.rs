//! Cluster client facade
//!
//! [`ClusterClient`] is a thin wrapper around the orchestrator API: apply a
//! persisted manifest, scale everything owned by a service, expose its
//! ports, resolve its external host, and tail its logs. It owns no state
//! beyond the connection handle and the target namespace, and it never
//! retries — transport failures propagate to the caller, who applies
//! retry/backoff policy externally.

use std::path::Path;

use futures::stream::BoxStream;
use futures::{AsyncBufReadExt, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, ListParams, LogParams, ObjectMeta, Patch, PatchParams};
use kube::Client;
use tracing::{debug, info, warn};

use crate::manifest::{owner_selector, OWNER_LABEL};

/// Field manager identifying this crate's server-side applies
const FIELD_MANAGER: &str = "hetki";

/// Errors from cluster operations
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("Failed to create Kubernetes client: {0}")]
    ClientError(String),

    #[error("Failed to apply manifest: {0}")]
    ApplyError(String),

    #[error("Failed to scale service: {0}")]
    ScaleError(String),

    #[error("Failed to expose service: {0}")]
    ExposeError(String),

    #[error("Failed to resolve external host: {0}")]
    HostError(String),

    #[error("Failed to list resources: {0}")]
    ListError(String),

    #[error("Failed to get logs: {0}")]
    LogsError(String),

    #[error("Failed to subscribe to log stream: {0}")]
    LogStreamError(String),
}

/// Connection to the orchestrator for one namespace
///
/// Cheap to clone; the underlying client is shared and reentrant, so one
/// `ClusterClient` serves any number of managed services.
#[derive(Clone)]
pub struct ClusterClient {
    client: Client,
    namespace: String,
}

impl ClusterClient {
    /// Connect using the ambient kubeconfig / in-cluster configuration
    pub async fn attach(namespace: impl Into<String>) -> Result<Self, ClusterError> {
        let client = Client::try_default()
            .await
            .map_err(|e| ClusterError::ClientError(e.to_string()))?;

        Ok(Self::new(client, namespace))
    }

    /// Wrap an existing client
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Target namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Apply a persisted deployment manifest, idempotently
    ///
    /// Server-side apply with a forced field manager, so repeated applies
    /// of the same manifest converge instead of conflicting.
    pub async fn apply_manifest(&self, path: &Path) -> Result<Deployment, ClusterError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ClusterError::ApplyError(format!("{}: {e}", path.display())))?;
        let deployment: Deployment =
            serde_yaml::from_str(&raw).map_err(|e| ClusterError::ApplyError(e.to_string()))?;

        let name = deployment
            .metadata
            .name
            .clone()
            .ok_or_else(|| ClusterError::ApplyError("manifest has no name".to_string()))?;

        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
        let params = PatchParams::apply(FIELD_MANAGER).force();
        let applied = api
            .patch(&name, &params, &Patch::Apply(&deployment))
            .await
            .map_err(|e| ClusterError::ApplyError(e.to_string()))?;

        info!(
            namespace = %self.namespace,
            deployment = %name,
            "Applied deployment manifest"
        );

        Ok(applied)
    }

    /// Scale every deployment owned by the service
    ///
    /// Targets by owner label rather than name, so templates that rename
    /// the deployment still scale correctly.
    pub async fn scale_to(&self, owner: &str, replicas: i32) -> Result<(), ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
        let selector = format!("{OWNER_LABEL}={owner}");

        let list = api
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| ClusterError::ScaleError(e.to_string()))?;

        if list.items.is_empty() {
            warn!(
                namespace = %self.namespace,
                owner = %owner,
                "No deployments found for owner, nothing to scale"
            );
            return Ok(());
        }

        let patch = serde_json::json!({
            "spec": {
                "replicas": replicas
            }
        });

        for deployment in list.items {
            let Some(name) = deployment.metadata.name else {
                continue;
            };
            api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
                .map_err(|e| ClusterError::ScaleError(e.to_string()))?;

            info!(
                namespace = %self.namespace,
                deployment = %name,
                replicas = %replicas,
                "Scaled deployment"
            );
        }

        Ok(())
    }

    /// Scale the service down to zero replicas
    pub async fn stop_service(&self, owner: &str) -> Result<(), ClusterError> {
        self.scale_to(owner, 0).await
    }

    /// Expose the service's ports
    ///
    /// Creates (or converges) a ClusterIP Service selecting the owner label
    /// and an Ingress routing external HTTP traffic to the first port.
    pub async fn expose(&self, owner: &str, ports: &[i32]) -> Result<(), ClusterError> {
        let service = service_for(owner, ports);
        let params = PatchParams::apply(FIELD_MANAGER).force();

        let services: Api<Service> = Api::namespaced(self.client.clone(), &self.namespace);
        services
            .patch(owner, &params, &Patch::Apply(&service))
            .await
            .map_err(|e| ClusterError::ExposeError(e.to_string()))?;

        if let Some(&first_port) = ports.first() {
            let ingress = ingress_for(owner, first_port);
            let ingresses: Api<Ingress> = Api::namespaced(self.client.clone(), &self.namespace);
            ingresses
                .patch(owner, &params, &Patch::Apply(&ingress))
                .await
                .map_err(|e| ClusterError::ExposeError(e.to_string()))?;
        }

        info!(
            namespace = %self.namespace,
            owner = %owner,
            ports = ?ports,
            "Exposed service"
        );

        Ok(())
    }

    /// Resolve the externally visible host of the service
    ///
    /// Reads the owner's Ingress: an explicit rule host wins, otherwise the
    /// load balancer status. Errors until the orchestrator has assigned one.
    pub async fn host(&self, owner: &str) -> Result<String, ClusterError> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), &self.namespace);
        let ingress = api
            .get(owner)
            .await
            .map_err(|e| ClusterError::HostError(e.to_string()))?;

        let rule_host = ingress
            .spec
            .as_ref()
            .and_then(|s| s.rules.as_ref())
            .and_then(|rules| rules.first())
            .and_then(|rule| rule.host.clone())
            .filter(|h| !h.is_empty());

        if let Some(host) = rule_host {
            return Ok(host);
        }

        ingress
            .status
            .and_then(|s| s.load_balancer)
            .and_then(|lb| lb.ingress)
            .and_then(|entries| {
                entries
                    .into_iter()
                    .find_map(|e| e.hostname.or(e.ip).filter(|h| !h.is_empty()))
            })
            .ok_or_else(|| {
                ClusterError::HostError(format!("no external host assigned for '{owner}' yet"))
            })
    }

    /// One-shot log snapshot from the service's first pod
    pub async fn logs(&self, owner: &str) -> Result<String, ClusterError> {
        let pod = self
            .first_pod(owner)
            .await?
            .ok_or_else(|| ClusterError::LogsError(format!("no pods found for '{owner}'")))?;

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        pods.logs(&pod, &LogParams::default())
            .await
            .map_err(|e| ClusterError::LogsError(e.to_string()))
    }

    /// Follow-mode line stream from the service's first pod
    ///
    /// Fails with [`ClusterError::LogStreamError`] when the subscription
    /// cannot be established, e.g. before any pod of the service exists.
    pub async fn log_stream(
        &self,
        owner: &str,
    ) -> Result<BoxStream<'static, Result<String, std::io::Error>>, ClusterError> {
        let pod = self
            .first_pod(owner)
            .await
            .map_err(|e| ClusterError::LogStreamError(e.to_string()))?
            .ok_or_else(|| ClusterError::LogStreamError(format!("no pods found for '{owner}'")))?;

        self.pod_log_stream(&pod).await
    }

    /// Follow-mode line stream from one specific pod
    pub(crate) async fn pod_log_stream(
        &self,
        pod: &str,
    ) -> Result<BoxStream<'static, Result<String, std::io::Error>>, ClusterError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let params = LogParams {
            follow: true,
            ..Default::default()
        };

        debug!(
            namespace = %self.namespace,
            pod = %pod,
            "Subscribing to log stream"
        );

        let stream = pods
            .log_stream(pod, &params)
            .await
            .map_err(|e| ClusterError::LogStreamError(e.to_string()))?;

        Ok(stream.lines().boxed())
    }

    /// Name of the service's first pod, if one exists yet
    pub(crate) async fn first_pod(&self, owner: &str) -> Result<Option<String>, ClusterError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let selector = format!("{OWNER_LABEL}={owner}");

        let list = pods
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| ClusterError::ListError(e.to_string()))?;

        Ok(list.items.into_iter().find_map(|p| p.metadata.name))
    }
}

/// Generate the ClusterIP Service publishing the effective ports
fn service_for(owner: &str, ports: &[i32]) -> Service {
    let service_ports = ports
        .iter()
        .map(|&port| ServicePort {
            name: Some(format!("port-{port}")),
            port,
            target_port: Some(IntOrString::Int(port)),
            ..Default::default()
        })
        .collect();

    Service {
        metadata: ObjectMeta {
            name: Some(owner.to_string()),
            labels: Some(owner_selector(owner)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(owner_selector(owner)),
            ports: Some(service_ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the Ingress routing external HTTP traffic to the first port
fn ingress_for(owner: &str, port: i32) -> Ingress {
    Ingress {
        metadata: ObjectMeta {
            name: Some(owner.to_string()),
            labels: Some(owner_selector(owner)),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: None,
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: owner.to_string(),
                                port: Some(ServiceBackendPort {
                                    number: Some(port),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

//! Deployment manifest loading, merging and enrichment
//!
//! A user-supplied template is a partially specified Deployment. Before
//! submission it is completed in three steps, all pure over the manifest
//! tree:
//!
//! 1. [`load_template`] parses the optional template file (absent file
//!    means an empty skeleton).
//! 2. [`merge`] materializes missing structure with safe defaults and
//!    injects the generated container fields, never overwriting values the
//!    template set explicitly. Ports are unioned by number.
//! 3. [`enrich`] stamps the ownership labels and selectors that make every
//!    object of the service addressable and garbage-collectable as a unit.
//!
//! The final manifest is persisted with [`write`] into the service working
//! directory before every apply, for inspection and debugging.

use std::collections::BTreeMap;
use std::path::Path;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, PodSecurityContext, PodSpec, SecurityContext,
};
use kube::api::ObjectMeta;

use crate::workload::WorkloadSpec;

/// Label scoping every orchestrator object belonging to one service
pub const OWNER_LABEL: &str = "hetki.dev/owner";

/// Standard managed-by label stamped on generated objects
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY: &str = "hetki";

/// File name of the persisted manifest inside the service working directory
pub const DEPLOYMENT_FILE: &str = "deployment.yml";

/// Errors from manifest handling
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read template '{path}': {source}")]
    TemplateRead {
        path: String,
        source: std::io::Error,
    },

    #[error("malformed deployment template: {0}")]
    Parse(serde_yaml::Error),

    #[error("failed to serialize manifest: {0}")]
    Serialize(serde_yaml::Error),

    #[error("failed to write manifest '{path}': {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// Load the base manifest from an optional template file
///
/// No path, or an empty file, yields an empty skeleton. Malformed content
/// is fatal and surfaced to the caller of `start`.
pub fn load_template(path: Option<&Path>) -> Result<Deployment, ManifestError> {
    let Some(path) = path else {
        return Ok(Deployment::default());
    };

    let raw = std::fs::read_to_string(path).map_err(|source| ManifestError::TemplateRead {
        path: path.display().to_string(),
        source,
    })?;

    if raw.trim().is_empty() {
        return Ok(Deployment::default());
    }

    serde_yaml::from_str(&raw).map_err(ManifestError::Parse)
}

/// Merge generated fields into a template, returning the completed manifest
///
/// Only absent values are filled: a template image wins over the generated
/// one, a non-empty template command wins over the generated command. The
/// container name is the one exception — identity is owned by this crate,
/// so it is always set to the service name. Effective ports are unioned in
/// by port number; entries the template already declares keep their name.
pub fn merge(
    template: Deployment,
    name: &str,
    workload: &WorkloadSpec,
    effective_ports: &[i32],
) -> Deployment {
    let mut deployment = template;
    scaffold(&mut deployment);

    // Scaffolding guarantees at least one container
    let container = first_container(&mut deployment);
    container.name = name.to_string();

    if container.image.as_deref().is_none_or(str::is_empty) {
        container.image = Some(workload.image.clone());
    }

    let has_template_command = container.command.as_ref().is_some_and(|c| !c.is_empty());
    if !has_template_command {
        if let Some(command) = workload.command.as_ref().filter(|c| !c.is_empty()) {
            container.command = Some(command.clone());
        }
    }

    let ports = container.ports.get_or_insert_with(Vec::new);
    for &port in effective_ports {
        if !ports.iter().any(|p| p.container_port == port) {
            ports.push(ContainerPort {
                name: Some(format!("port-{port}")),
                container_port: port,
                ..Default::default()
            });
        }
    }

    deployment
}

/// Stamp ownership labels and selectors onto the merged manifest
///
/// Labels the template already carries are preserved; only the owner and
/// managed-by keys are (re)written, on the deployment metadata, the
/// selector, and the pod template, so label-based discovery finds every
/// pod of the service.
pub fn enrich(deployment: &mut Deployment, owner: &str) {
    scaffold(deployment);

    if deployment.metadata.name.is_none() {
        deployment.metadata.name = Some(owner.to_string());
    }
    stamp(&mut deployment.metadata.labels, owner);

    // Scaffolding ensured spec is present
    if let Some(spec) = deployment.spec.as_mut() {
        stamp(&mut spec.selector.match_labels, owner);

        let template_meta = spec.template.metadata.get_or_insert_with(ObjectMeta::default);
        stamp(&mut template_meta.labels, owner);
    }
}

/// Persist the manifest as YAML
pub fn write(path: &Path, deployment: &Deployment) -> Result<(), ManifestError> {
    let yaml = serde_yaml::to_string(deployment).map_err(ManifestError::Serialize)?;

    std::fs::write(path, yaml).map_err(|source| ManifestError::Write {
        path: path.display().to_string(),
        source,
    })
}

/// Owner selector map used by generated Services and scale targeting
pub(crate) fn owner_selector(owner: &str) -> BTreeMap<String, String> {
    [(OWNER_LABEL.to_string(), owner.to_string())]
        .into_iter()
        .collect()
}

/// Materialize missing intermediate structure with safe defaults
///
/// Pod security context defaults to run-as-non-root; an empty container
/// list gets exactly one container with a locked-down security profile.
fn scaffold(deployment: &mut Deployment) {
    let spec = deployment.spec.get_or_insert_with(DeploymentSpec::default);
    let pod_spec = spec.template.spec.get_or_insert_with(PodSpec::default);

    if pod_spec.security_context.is_none() {
        pod_spec.security_context = Some(PodSecurityContext {
            run_as_non_root: Some(true),
            ..Default::default()
        });
    }

    if pod_spec.containers.is_empty() {
        pod_spec.containers.push(Container {
            security_context: Some(SecurityContext {
                allow_privilege_escalation: Some(false),
                capabilities: Some(Capabilities {
                    drop: Some(vec!["ALL".to_string()]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
}

fn first_container(deployment: &mut Deployment) -> &mut Container {
    // Callers run scaffold() first, which guarantees the path exists
    &mut deployment
        .spec
        .as_mut()
        .expect("scaffolded deployment has a spec")
        .template
        .spec
        .as_mut()
        .expect("scaffolded deployment has a pod spec")
        .containers[0]
}

fn stamp(labels: &mut Option<BTreeMap<String, String>>, owner: &str) {
    let labels = labels.get_or_insert_with(BTreeMap::new);
    labels.insert(OWNER_LABEL.to_string(), owner.to_string());
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
}

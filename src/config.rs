//! Per-service configuration
//!
//! [`ServiceConfiguration`] is the typed view over the free-form properties
//! a test declares for one service: an optional deployment template, extra
//! ports to expose, whether callers should address the service through its
//! internal DNS name, and whether to keep the working folder after the run.
//!
//! Build it programmatically or resolve it from string properties:
//!
//! ```
//! use hetki::ServiceConfiguration;
//!
//! let conf = ServiceConfiguration::new()
//!     .template("./templates/deployment.yml")
//!     .additional_port(6000)
//!     .use_internal_service(true);
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Errors from configuration resolution and lookup
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for property '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("service has not been initialized")]
    Unresolved,

    #[error("no cluster client registered for this service")]
    MissingClient,

    #[error("failed to prepare service working directory: {0}")]
    Workdir(String),
}

/// Typed configuration for one managed service
///
/// Immutable after resolution; resolved exactly once when the owning
/// service is initialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServiceConfiguration {
    /// Path to a partial deployment manifest completed with generated fields
    pub template: Option<PathBuf>,

    /// Address the service by its internal DNS name and raw ports instead
    /// of the externally exposed route
    pub use_internal_service: bool,

    /// Ports to expose beyond the ones the workload declares
    pub additional_ports: Vec<i32>,

    /// Remove the service working folder when the service is closed
    pub delete_folder_on_close: bool,
}

impl Default for ServiceConfiguration {
    fn default() -> Self {
        Self {
            template: None,
            use_internal_service: false,
            additional_ports: Vec::new(),
            delete_folder_on_close: true,
        }
    }
}

impl ServiceConfiguration {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the deployment template path
    #[must_use]
    pub fn template(mut self, path: impl Into<PathBuf>) -> Self {
        self.template = Some(path.into());
        self
    }

    /// Address the service internally instead of through the external route
    #[must_use]
    pub fn use_internal_service(mut self, internal: bool) -> Self {
        self.use_internal_service = internal;
        self
    }

    /// Expose an extra port beyond the workload-declared ones
    #[must_use]
    pub fn additional_port(mut self, port: i32) -> Self {
        self.additional_ports.push(port);
        self
    }

    /// Keep or remove the working folder on close
    #[must_use]
    pub fn delete_folder_on_close(mut self, delete: bool) -> Self {
        self.delete_folder_on_close = delete;
        self
    }

    /// Resolve a configuration from free-form string properties
    ///
    /// Recognized keys: `template`, `use-internal-service`,
    /// `additional-ports` (comma-separated), `delete-folder-on-close`.
    /// Unknown keys are ignored so callers can share one property bag
    /// across concerns.
    pub fn from_properties(properties: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let mut conf = Self::default();

        if let Some(template) = properties.get("template") {
            if !template.is_empty() {
                conf.template = Some(PathBuf::from(template));
            }
        }

        if let Some(value) = properties.get("use-internal-service") {
            conf.use_internal_service = parse_bool("use-internal-service", value)?;
        }

        if let Some(value) = properties.get("additional-ports") {
            conf.additional_ports = parse_ports(value)?;
        }

        if let Some(value) = properties.get("delete-folder-on-close") {
            conf.delete_folder_on_close = parse_bool("delete-folder-on-close", value)?;
        }

        Ok(conf)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: "expected 'true' or 'false'".to_string(),
    })
}

fn parse_ports(value: &str) -> Result<Vec<i32>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse().map_err(|_| ConfigError::InvalidValue {
                key: "additional-ports".to_string(),
                value: p.to_string(),
                reason: "expected a port number".to_string(),
            })
        })
        .collect()
}

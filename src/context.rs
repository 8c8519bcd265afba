//! Service identity and working state
//!
//! A [`ServiceContext`] carries everything one managed service owns outside
//! the cluster: its logical name, the owner label value scoping all of its
//! orchestrator objects, a private working directory for generated
//! manifests, the declarative properties it was configured with, and the
//! cluster client handle registered for it. Exactly one
//! [`ManagedService`](crate::ManagedService) owns each context.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::client::ClusterClient;
use crate::config::{ConfigError, ServiceConfiguration};

/// Identity and working state for one declared service
pub struct ServiceContext {
    name: String,
    owner: String,
    service_folder: PathBuf,
    properties: BTreeMap<String, String>,
    configuration: Option<ServiceConfiguration>,
    client: Option<ClusterClient>,
}

impl ServiceContext {
    /// Create a context for a service
    ///
    /// The working directory defaults to `<tmp>/hetki/<owner>` and is
    /// created lazily when the service is initialized.
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        let owner = owner.into();
        let service_folder = std::env::temp_dir().join("hetki").join(&owner);

        Self {
            name: name.into(),
            owner,
            service_folder,
            properties: BTreeMap::new(),
            configuration: None,
            client: None,
        }
    }

    /// Override the working directory
    #[must_use]
    pub fn service_folder_at(mut self, folder: impl Into<PathBuf>) -> Self {
        self.service_folder = folder.into();
        self
    }

    /// Attach free-form configuration properties
    ///
    /// Resolved into a [`ServiceConfiguration`] at initialization unless an
    /// explicit configuration was supplied.
    #[must_use]
    pub fn with_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.properties = properties;
        self
    }

    /// Supply an already-resolved configuration
    #[must_use]
    pub fn with_configuration(mut self, configuration: ServiceConfiguration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    /// Register the cluster client this service should use
    #[must_use]
    pub fn with_client(mut self, client: ClusterClient) -> Self {
        self.client = Some(client);
        self
    }

    /// Logical service name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owner label value scoping all orchestrator objects of this service
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Working directory for generated manifests
    pub fn service_folder(&self) -> &Path {
        &self.service_folder
    }

    /// The resolved configuration, if the service has been initialized
    pub fn configuration(&self) -> Option<&ServiceConfiguration> {
        self.configuration.as_ref()
    }

    /// The registered cluster client
    pub fn client(&self) -> Result<&ClusterClient, ConfigError> {
        self.client.as_ref().ok_or(ConfigError::MissingClient)
    }

    /// Resolve the typed configuration from properties, once
    ///
    /// A configuration supplied via [`with_configuration`](Self::with_configuration)
    /// wins over property resolution. Subsequent calls are no-ops.
    pub(crate) fn resolve_configuration(&mut self) -> Result<(), ConfigError> {
        if self.configuration.is_none() {
            let conf = ServiceConfiguration::from_properties(&self.properties)?;
            debug!(service = %self.name, configuration = ?conf, "Resolved service configuration");
            self.configuration = Some(conf);
        }

        Ok(())
    }

    /// Create the working directory if it does not exist yet
    pub(crate) fn ensure_folder(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.service_folder)
            .map_err(|e| ConfigError::Workdir(format!("{}: {e}", self.service_folder.display())))
    }

    /// Tear down the working directory, honoring `delete-folder-on-close`
    ///
    /// Best-effort: a failed removal is logged, not raised, since teardown
    /// must not mask the test outcome.
    pub fn close(&self) {
        let delete = self
            .configuration
            .as_ref()
            .is_none_or(|c| c.delete_folder_on_close);

        if !delete {
            debug!(
                service = %self.name,
                folder = %self.service_folder.display(),
                "Keeping service folder on close"
            );
            return;
        }

        if self.service_folder.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.service_folder) {
                warn!(
                    service = %self.name,
                    folder = %self.service_folder.display(),
                    error = %e,
                    "Failed to remove service folder"
                );
            }
        }
    }
}

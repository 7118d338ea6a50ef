//! Name-to-constructor table for pipeline stages.
//!
//! Stages are registered through explicit calls on a [`RegistryBuilder`],
//! which is then frozen into an immutable [`Registry`]. A process that wants
//! one shared table installs it once with [`install`]; later lookups go
//! through [`global`] without locking.
//!
//! Configured stage names may carry an instance suffix (`db_filter/common`).
//! The part before the first `/` selects the constructor; the full name is
//! what the pipeline reports in logs and failures.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde_json::Value;
use strata_types::ConfigError;
use strata_types::config::SubConfig;
use tracing::debug;

use super::{Processor, ProcessorError};

/// Builds a stage from its raw config and tenant overrides.
pub type Constructor = Arc<
    dyn Fn(&Value, &[SubConfig]) -> Result<Arc<dyn Processor>, ProcessorError> + Send + Sync,
>;

/// Configuration-time failures. Any of these aborts a pipeline build.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BuildError {
    /// A second constructor was registered under an existing name.
    #[error("processor '{0}' is already registered")]
    DuplicateProcessor(String),

    /// A configured stage names no registered constructor.
    #[error("unknown processor '{name}'")]
    UnknownProcessor {
        /// The configured instance name.
        name: String,
    },

    /// A constructor rejected its configuration.
    #[error("failed to construct processor '{stage}': {source}")]
    Construction {
        /// The configured instance name.
        stage: String,
        #[source]
        source: ProcessorError,
    },

    /// The pipeline configuration itself is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The process-wide registry was already installed.
    #[error("processor registry is already installed")]
    AlreadyInstalled,
}

/// Registry key for a configured instance name.
pub fn kind_of(name: &str) -> &str {
    name.split('/').next().unwrap_or(name)
}

/// Mutable registration phase.
#[derive(Default)]
pub struct RegistryBuilder {
    constructors: HashMap<String, Constructor>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `name`.
    ///
    /// Returns [`BuildError::DuplicateProcessor`] if the name is taken; the
    /// existing constructor is kept.
    pub fn register<F>(&mut self, name: impl Into<String>, ctor: F) -> Result<&mut Self, BuildError>
    where
        F: Fn(&Value, &[SubConfig]) -> Result<Arc<dyn Processor>, ProcessorError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        if self.constructors.contains_key(&name) {
            return Err(BuildError::DuplicateProcessor(name));
        }
        debug!(processor = %name, "registered processor");
        self.constructors.insert(name, Arc::new(ctor));
        Ok(self)
    }

    /// Finish registration.
    pub fn freeze(self) -> Registry {
        Registry {
            constructors: self.constructors,
        }
    }
}

/// Immutable name-to-constructor table.
pub struct Registry {
    constructors: HashMap<String, Constructor>,
}

impl Registry {
    /// Whether a configured name (with or without instance suffix) resolves.
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(kind_of(name))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }

    /// Construct the stage configured as `name`.
    pub fn build(
        &self,
        name: &str,
        raw: &Value,
        overrides: &[SubConfig],
    ) -> Result<Arc<dyn Processor>, BuildError> {
        let ctor = self
            .constructors
            .get(kind_of(name))
            .ok_or_else(|| BuildError::UnknownProcessor {
                name: name.to_owned(),
            })?;
        ctor(raw, overrides).map_err(|source| BuildError::Construction {
            stage: name.to_owned(),
            source,
        })
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("processors", &self.names())
            .finish()
    }
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// Install the process-wide registry. Only the first call succeeds.
pub fn install(registry: Registry) -> Result<&'static Registry, BuildError> {
    GLOBAL
        .set(registry)
        .map_err(|_| BuildError::AlreadyInstalled)?;
    GLOBAL.get().ok_or(BuildError::AlreadyInstalled)
}

/// The process-wide registry, if one was installed.
pub fn global() -> Option<&'static Registry> {
    GLOBAL.get()
}

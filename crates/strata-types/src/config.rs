//! Configuration schema.
//!
//! A collector config names one pipeline: its admission gate and an
//! ordered list of stages, each with a raw (stage-specific) configuration
//! and optional tenant overrides. Tenant overrides can be written inline on
//! the stage or grouped per tenant in top-level `tenants` sections; the
//! latter are folded into the stages by [`CollectorConfig::into_pipeline`].
//!
//! ```yaml
//! pipeline:
//!   name: traces
//!   validator:
//!     max_in_flight: 256
//!     rate_limit: { window_seconds: 1, per_token: 500 }
//!   processors:
//!     - name: token_checker
//!     - name: db_filter/common
//!       config:
//!         slow_query:
//!           destination: db.is_slow
//!           rules: [{ match: mysql, threshold: 1s }]
//! tenants:
//!   - token: abc
//!     processors:
//!       - name: db_filter/common
//!         config:
//!           slow_query:
//!             destination: db.is_slow
//!             rules: [{ match: mysql, threshold: 200ms }]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_pipeline_name() -> String {
    "default".into()
}

fn default_window_seconds() -> u32 {
    1
}

fn default_max_tracked_tokens() -> usize {
    10_000
}

/// Root of a collector configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub pipeline: PipelineConfig,

    /// Per-tenant stage overrides, grouped by tenant.
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
}

impl CollectorConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Load a config file, choosing the format by extension (`.json` is
    /// JSON, anything else is YAML).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&contents),
            _ => Self::from_yaml_str(&contents),
        }
    }

    /// Fold every `tenants` section into the matching stage's overrides.
    ///
    /// Returns the pipeline config plus the names referenced by tenant
    /// sections that match no configured stage, so the caller can report
    /// them.
    pub fn into_pipeline(self) -> (PipelineConfig, Vec<String>) {
        let mut pipeline = self.pipeline;
        let mut unmatched = Vec::new();

        for tenant in self.tenants {
            for section in tenant.processors {
                match pipeline
                    .processors
                    .iter_mut()
                    .find(|p| p.name == section.name)
                {
                    Some(stage) => stage.overrides.push(SubConfig {
                        token: tenant.token.clone(),
                        scope_type: tenant.scope_type.clone(),
                        scope_id: tenant.scope_id.clone(),
                        config: section.config,
                    }),
                    None => unmatched.push(section.name),
                }
            }
        }

        (pipeline, unmatched)
    }
}

/// One pipeline: an admission gate and an ordered stage list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_pipeline_name")]
    pub name: String,

    #[serde(default)]
    pub validator: ValidatorConfig,

    #[serde(default)]
    pub processors: Vec<ProcessorConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: default_pipeline_name(),
            validator: ValidatorConfig::default(),
            processors: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Reject stage lists with blank or repeated instance names. An empty
    /// list is valid: records go straight from the gate to the sink.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, p) in self.processors.iter().enumerate() {
            if p.name.trim().is_empty() {
                return Err(ConfigError::invalid(format!(
                    "processor #{i} in pipeline '{}' has an empty name",
                    self.name
                )));
            }
            if self.processors[..i].iter().any(|q| q.name == p.name) {
                return Err(ConfigError::invalid(format!(
                    "processor '{}' appears twice in pipeline '{}'",
                    p.name, self.name
                )));
            }
        }
        Ok(())
    }
}

/// A configured stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Instance name. The part before the first `/` selects the registered
    /// constructor, the whole name identifies the instance.
    pub name: String,

    /// Raw, stage-specific configuration.
    #[serde(default)]
    pub config: serde_json::Value,

    /// Tenant-scoped overrides of `config`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<SubConfig>,
}

impl ProcessorConfig {
    pub fn new(name: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            config,
            overrides: Vec::new(),
        }
    }
}

/// A tenant-scoped override of one stage's raw configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubConfig {
    pub token: String,

    #[serde(default, rename = "type")]
    pub scope_type: String,

    #[serde(default, rename = "id")]
    pub scope_id: String,

    #[serde(default)]
    pub config: serde_json::Value,
}

impl SubConfig {
    /// An override keyed by token only.
    pub fn for_token(token: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            token: token.into(),
            config,
            ..Self::default()
        }
    }
}

/// Overrides for one tenant, grouped by stage name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantConfig {
    pub token: String,

    #[serde(default, rename = "type")]
    pub scope_type: String,

    #[serde(default, rename = "id")]
    pub scope_id: String,

    #[serde(default)]
    pub processors: Vec<TenantProcessorConfig>,
}

/// One stage section inside a tenant block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantProcessorConfig {
    pub name: String,

    #[serde(default)]
    pub config: serde_json::Value,
}

/// Admission gate settings. Every check is off unless configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Reject records that arrive without a tenant credential.
    #[serde(default)]
    pub require_token: bool,

    /// Reject empty batches.
    #[serde(default)]
    pub reject_empty: bool,

    /// Maximum number of items (spans, points, log lines) in one record.
    #[serde(default)]
    pub max_items: Option<usize>,

    /// Maximum number of records in flight across the pipeline.
    #[serde(default)]
    pub max_in_flight: Option<usize>,

    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

/// Sliding-window rate limit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u32,

    /// Records per window per token. 0 = unlimited.
    #[serde(default)]
    pub per_token: u32,

    /// Records per window across all tokens. 0 = unlimited.
    #[serde(default)]
    pub global: u32,

    #[serde(default = "default_max_tracked_tokens")]
    pub max_tracked_tokens: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            per_token: 0,
            global: 0,
            max_tracked_tokens: default_max_tracked_tokens(),
        }
    }
}

//! CLI command implementations for `strata`.
//!
//! - [`run`] -- Build the pipeline and submit records from a file or stdin.
//! - [`check`] -- Validate a configuration by building its pipeline.
//! - [`processors`] -- List registered processors.

pub mod check;
pub mod processors;
pub mod run;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_core::pipeline::publisher::Publisher;
use strata_core::pipeline::validator::build_validator;
use strata_core::processor::registry::{self, Registry};
use strata_core::processors::builtin_registry;
use strata_core::Pipeline;
use strata_types::config::{CollectorConfig, PipelineConfig};
use tracing::warn;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "STRATA_CONFIG";

/// Config file looked up in the working directory when nothing else is set.
pub const DEFAULT_CONFIG_FILE: &str = "strata.yaml";

/// Pick the config path: explicit flag, then `STRATA_CONFIG`, then
/// `./strata.yaml`.
pub fn resolve_config_path(explicit: Option<&str>, env_value: Option<String>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }
    if let Some(path) = env_value.filter(|v| !v.trim().is_empty()) {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

/// Load the configuration from the given path override or via discovery,
/// folding tenant sections into their stages.
pub fn load_config(config_override: Option<&str>) -> anyhow::Result<(PathBuf, PipelineConfig)> {
    let path = resolve_config_path(config_override, std::env::var(CONFIG_ENV).ok());
    let config = load_from(&path)?;
    Ok((path, config))
}

fn load_from(path: &Path) -> anyhow::Result<PipelineConfig> {
    if !path.exists() {
        anyhow::bail!("config file not found: {}", path.display());
    }
    let (config, unmatched) = CollectorConfig::load(path)?.into_pipeline();
    for name in unmatched {
        warn!(processor = %name, "tenant section names a processor that is not in the pipeline");
    }
    config.validate()?;
    Ok(config)
}

/// The process-wide processor registry, installing the shipped stages on
/// first use.
pub fn processor_registry() -> anyhow::Result<&'static Registry> {
    if let Some(installed) = registry::global() {
        return Ok(installed);
    }
    match registry::install(builtin_registry()?) {
        Ok(installed) => Ok(installed),
        // Lost a race with another installer; use theirs.
        Err(_) => registry::global().ok_or_else(|| anyhow::anyhow!("processor registry unavailable")),
    }
}

/// Build the pipeline described by `config` with its configured gate.
pub async fn build_pipeline(
    config: &PipelineConfig,
    publisher: Arc<dyn Publisher>,
) -> anyhow::Result<Pipeline> {
    let registry = processor_registry()?;
    let pipeline = Pipeline::build(config, registry, build_validator(&config.validator), publisher).await?;
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn explicit_path_wins() {
        let path = resolve_config_path(Some("a.yaml"), Some("b.yaml".into()));
        assert_eq!(path, PathBuf::from("a.yaml"));
    }

    #[test]
    fn env_used_when_no_flag() {
        let path = resolve_config_path(None, Some("/etc/strata/prod.yaml".into()));
        assert_eq!(path, PathBuf::from("/etc/strata/prod.yaml"));
    }

    #[test]
    fn blank_env_falls_back_to_default() {
        assert_eq!(
            resolve_config_path(None, Some("  ".into())),
            PathBuf::from(DEFAULT_CONFIG_FILE)
        );
        assert_eq!(resolve_config_path(None, None), PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn load_from_missing_file_fails() {
        let err = load_from(Path::new("/nonexistent/strata.yaml")).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn load_from_folds_tenants() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "pipeline:\n  processors:\n    - name: token_checker\ntenants:\n  - token: abc\n    processors:\n      - name: token_checker\n        config: {{ allowed: [abc] }}"
        )
        .unwrap();

        let config = load_from(file.path()).unwrap();
        assert_eq!(config.processors.len(), 1);
        assert_eq!(config.processors[0].overrides[0].token, "abc");
    }

    #[test]
    fn load_from_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"pipeline": {{"name": "j", "processors": []}}}}"#).unwrap();
        let config = load_from(file.path()).unwrap();
        assert_eq!(config.name, "j");
    }

    #[test]
    fn registry_has_builtins() {
        let registry = processor_registry().unwrap();
        assert!(registry.contains("forwarder"));
        // Second call returns the same table.
        assert!(std::ptr::eq(registry, processor_registry().unwrap()));
    }
}

use serde_json::Value;
use strata_types::config::SubConfig;

/// Raw configuration kept by every shipped stage for introspection.
#[derive(Debug, Clone, Default)]
pub struct CommonProcessor {
    main_config: Value,
    sub_configs: Vec<SubConfig>,
}

impl CommonProcessor {
    pub fn new(main_config: &Value, sub_configs: &[SubConfig]) -> Self {
        Self {
            main_config: main_config.clone(),
            sub_configs: sub_configs.to_vec(),
        }
    }

    pub fn main_config(&self) -> &Value {
        &self.main_config
    }

    pub fn sub_configs(&self) -> &[SubConfig] {
        &self.sub_configs
    }
}

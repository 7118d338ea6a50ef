//! Pre-check stage guarding tenant credentials.
//!
//! Refuses records without a token. When the resolved config lists
//! `allowed` tokens, the record's token must be one of them; when it lists
//! `kinds`, the record's kind must be one of those.
//!
//! ```yaml
//! - name: token_checker
//!   config:
//!     allowed: [abc, def]
//!   overrides:
//!     - token: abc
//!       config: { allowed: [abc], kinds: [traces] }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use strata_types::config::SubConfig;
use strata_types::{Record, RecordKind};

use crate::confengine::{TieredConfig, decode_tiered};
use crate::processor::common::CommonProcessor;
use crate::processor::{Flow, ProcessContext, Processor, ProcessorError};

pub const NAME: &str = "token_checker";

#[derive(Debug, Clone, Default, Deserialize)]
struct Config {
    #[serde(default)]
    allowed: Vec<String>,
    #[serde(default)]
    kinds: Vec<RecordKind>,
}

pub struct TokenChecker {
    common: CommonProcessor,
    configs: TieredConfig<Config>,
}

impl TokenChecker {
    pub fn new(raw: &Value, subs: &[SubConfig]) -> Result<Self, ProcessorError> {
        Ok(Self {
            common: CommonProcessor::new(raw, subs),
            configs: decode_tiered(NAME, raw, subs)?,
        })
    }

    /// Registry constructor.
    pub fn build(raw: &Value, subs: &[SubConfig]) -> Result<Arc<dyn Processor>, ProcessorError> {
        Ok(Arc::new(Self::new(raw, subs)?))
    }
}

#[async_trait]
impl Processor for TokenChecker {
    fn name(&self) -> &str {
        NAME
    }

    async fn process(&self, record: Record, _ctx: &ProcessContext) -> Result<Flow, ProcessorError> {
        let token = record.token();
        if token.is_empty() {
            return Err(ProcessorError::Unauthorized("empty token".into()));
        }

        let config = self.configs.get_for(token);
        if !config.allowed.is_empty() && !config.allowed.iter().any(|t| t == token.original()) {
            return Err(ProcessorError::Unauthorized(format!(
                "token '{}' is not allowed",
                token.original()
            )));
        }
        if !config.kinds.is_empty() && !config.kinds.contains(&record.kind()) {
            return Err(ProcessorError::Unauthorized(format!(
                "{} are not enabled for token '{}'",
                record.kind(),
                token.original()
            )));
        }

        Ok(Flow::Continue(record))
    }

    fn is_pre_check(&self) -> bool {
        true
    }

    fn main_config(&self) -> Option<&Value> {
        Some(self.common.main_config())
    }

    fn sub_configs(&self) -> &[SubConfig] {
        self.common.sub_configs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_types::Token;
    use strata_types::record::{Logs, Traces};

    async fn check(checker: &TokenChecker, record: Record) -> Result<Flow, ProcessorError> {
        checker.process(record, &ProcessContext::default()).await
    }

    #[tokio::test]
    async fn empty_token_refused() {
        let checker = TokenChecker::new(&Value::Null, &[]).unwrap();
        let res = check(&checker, Record::logs(Token::new(""), Logs::default())).await;
        assert!(matches!(res, Err(ProcessorError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn any_token_passes_without_allow_list() {
        let checker = TokenChecker::new(&Value::Null, &[]).unwrap();
        let res = check(&checker, Record::logs(Token::new("abc"), Logs::default())).await;
        assert!(matches!(res, Ok(Flow::Continue(_))));
        assert!(checker.is_pre_check());
    }

    #[tokio::test]
    async fn allow_list_enforced() {
        let checker = TokenChecker::new(&json!({"allowed": ["abc"]}), &[]).unwrap();
        assert!(check(&checker, Record::logs(Token::new("abc"), Logs::default())).await.is_ok());
        assert!(check(&checker, Record::logs(Token::new("xyz"), Logs::default())).await.is_err());
    }

    #[tokio::test]
    async fn tenant_override_limits_kinds() {
        let subs = vec![SubConfig::for_token("abc", json!({"kinds": ["traces"]}))];
        let checker = TokenChecker::new(&Value::Null, &subs).unwrap();

        assert!(check(&checker, Record::traces(Token::new("abc"), Traces::default())).await.is_ok());
        let err = check(&checker, Record::logs(Token::new("abc"), Logs::default()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "unauthorized: logs are not enabled for token 'abc'");
        assert!(check(&checker, Record::logs(Token::new("def"), Logs::default())).await.is_ok());
    }
}

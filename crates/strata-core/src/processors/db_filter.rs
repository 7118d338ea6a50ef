//! Slow database query marking.
//!
//! For every span carrying a `db.system` attribute, the rule for that system
//! (or the catch-all rule with an empty `match`) gives a threshold; the span
//! gets `destination = true` when it ran longer than the threshold and
//! `false` otherwise. Spans without `db.system`, or whose system has no rule
//! and no catch-all exists, are left untouched. Non-trace records pass
//! through unchanged.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use strata_types::Record;
use strata_types::config::SubConfig;

use super::duration;
use crate::confengine::{TieredConfig, decode_tiered};
use crate::processor::common::CommonProcessor;
use crate::processor::{Flow, ProcessContext, Processor, ProcessorError};

pub const NAME: &str = "db_filter";

/// Span attribute naming the database system.
pub const DB_SYSTEM: &str = "db.system";

#[derive(Debug, Clone, Default, Deserialize)]
struct Config {
    #[serde(default)]
    slow_query: SlowQueryConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SlowQueryConfig {
    #[serde(default)]
    destination: String,
    #[serde(default)]
    rules: Vec<Rule>,
}

#[derive(Debug, Clone, Deserialize)]
struct Rule {
    #[serde(default, rename = "match")]
    system: String,
    #[serde(deserialize_with = "duration::deserialize")]
    threshold: Duration,
}

/// Rules indexed by database system.
#[derive(Debug, Clone, Default)]
struct SlowQuery {
    destination: String,
    thresholds: HashMap<String, Duration>,
}

impl SlowQuery {
    fn threshold(&self, system: &str) -> Option<Duration> {
        self.thresholds
            .get(system)
            .or_else(|| self.thresholds.get(""))
            .copied()
    }
}

impl From<Config> for SlowQuery {
    fn from(c: Config) -> Self {
        Self {
            destination: c.slow_query.destination,
            thresholds: c
                .slow_query
                .rules
                .into_iter()
                .map(|r| (r.system, r.threshold))
                .collect(),
        }
    }
}

pub struct DbFilter {
    common: CommonProcessor,
    configs: TieredConfig<SlowQuery>,
}

impl DbFilter {
    pub fn new(raw: &Value, subs: &[SubConfig]) -> Result<Self, ProcessorError> {
        let configs = decode_tiered::<Config>(NAME, raw, subs)?.map(SlowQuery::from);
        Ok(Self {
            common: CommonProcessor::new(raw, subs),
            configs,
        })
    }

    pub fn build(raw: &Value, subs: &[SubConfig]) -> Result<Arc<dyn Processor>, ProcessorError> {
        Ok(Arc::new(Self::new(raw, subs)?))
    }

    /// The global threshold for `system`, after the catch-all fallback.
    pub fn threshold(&self, system: &str) -> Option<Duration> {
        self.configs.global().threshold(system)
    }
}

#[async_trait]
impl Processor for DbFilter {
    fn name(&self) -> &str {
        NAME
    }

    async fn process(&self, mut record: Record, _ctx: &ProcessContext) -> Result<Flow, ProcessorError> {
        let conf = self.configs.get_for(record.token());
        if conf.destination.is_empty() || conf.thresholds.is_empty() {
            return Ok(Flow::Continue(record));
        }

        if let Some(traces) = record.as_traces_mut() {
            for span in &mut traces.spans {
                let Some(threshold) = span.attr_str(DB_SYSTEM).and_then(|s| conf.threshold(s)) else {
                    continue;
                };
                let slow = span.duration() > threshold;
                span.attributes
                    .insert(conf.destination.clone(), Value::Bool(slow));
            }
        }

        Ok(Flow::Continue(record))
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
    use strata_types::record::{Logs, Span, Traces};

    const SEC: u64 = 1_000_000_000;

    fn db_span(system: Option<&str>, start: u64, end: u64) -> Span {
        let mut span = Span {
            trace_id: "t".into(),
            span_id: "s".into(),
            name: "query".into(),
            start_time_unix_nano: start,
            end_time_unix_nano: end,
            ..Span::default()
        };
        if let Some(system) = system {
            span.attributes.insert(DB_SYSTEM.into(), json!(system));
        }
        span
    }

    fn traces(token: &str, span: Span) -> Record {
        Record::traces(
            Token::new(token),
            Traces {
                spans: vec![span],
                ..Traces::default()
            },
        )
    }

    async fn first_span(filter: &DbFilter, record: Record) -> Span {
        match filter.process(record, &ProcessContext::default()).await.unwrap() {
            Flow::Continue(mut r) => r.as_traces_mut().unwrap().spans.remove(0),
            other => panic!("unexpected flow: {other:?}"),
        }
    }

    fn mysql_filter() -> DbFilter {
        DbFilter::new(
            &json!({"slow_query": {
                "destination": "db.is_slow",
                "rules": [
                    {"match": "mysql", "threshold": "1s"},
                    {"match": "redis", "threshold": "2s"},
                ]
            }}),
            &[],
        )
        .unwrap()
    }

    #[test]
    fn factory_exposes_config() {
        let raw = json!({"slow_query": {"destination": "d", "rules": [{"match": "mysql", "threshold": "1s"}]}});
        let filter = DbFilter::new(&raw, &[]).unwrap();
        assert_eq!(filter.main_config(), Some(&raw));
        assert_eq!(filter.threshold("mysql"), Some(Duration::from_secs(1)));
        assert_eq!(filter.name(), NAME);
        assert!(!filter.is_pre_check());
        assert!(!filter.is_derived());
    }

    #[tokio::test]
    async fn marks_slow_mysql_query() {
        let span = first_span(&mysql_filter(), traces("abc", db_span(Some("mysql"), SEC, 3 * SEC))).await;
        assert_eq!(span.attributes["db.is_slow"], json!(true));
    }

    #[tokio::test]
    async fn marks_normal_mysql_query() {
        let span = first_span(&mysql_filter(), traces("abc", db_span(Some("mysql"), SEC, SEC + SEC / 2))).await;
        assert_eq!(span.attributes["db.is_slow"], json!(false));
    }

    #[tokio::test]
    async fn catch_all_rule_applies_to_unknown_system() {
        let filter = DbFilter::new(
            &json!({"slow_query": {"destination": "slow", "rules": [{"match": "", "threshold": "3s"}]}}),
            &[],
        )
        .unwrap();
        let span = first_span(&filter, traces("abc", db_span(Some("elasticsearch"), SEC, 10 * SEC))).await;
        assert_eq!(span.attributes["slow"], json!(true));
    }

    #[tokio::test]
    async fn span_without_db_system_untouched() {
        let span = first_span(&mysql_filter(), traces("abc", db_span(None, SEC, 10 * SEC))).await;
        assert!(!span.attributes.contains_key("db.is_slow"));
    }

    #[tokio::test]
    async fn system_without_rule_untouched() {
        let span = first_span(&mysql_filter(), traces("abc", db_span(Some("mongodb"), SEC, 10 * SEC))).await;
        assert!(!span.attributes.contains_key("db.is_slow"));
    }

    #[tokio::test]
    async fn tenant_override_changes_threshold() {
        let subs = vec![SubConfig::for_token(
            "strict",
            json!({"slow_query": {"destination": "db.is_slow", "rules": [{"match": "mysql", "threshold": "100ms"}]}}),
        )];
        let filter = DbFilter::new(
            &json!({"slow_query": {"destination": "db.is_slow", "rules": [{"match": "mysql", "threshold": "1s"}]}}),
            &subs,
        )
        .unwrap();

        let half_second = db_span(Some("mysql"), SEC, SEC + SEC / 2);
        let strict = first_span(&filter, traces("strict", half_second.clone())).await;
        let relaxed = first_span(&filter, traces("other", half_second)).await;
        assert_eq!(strict.attributes["db.is_slow"], json!(true));
        assert_eq!(relaxed.attributes["db.is_slow"], json!(false));
    }

    #[tokio::test]
    async fn scoped_override_applies_to_scoped_token() {
        let subs = vec![SubConfig {
            token: "abc".into(),
            scope_type: "service".into(),
            scope_id: "checkout".into(),
            config: json!({"slow_query": {"destination": "db.is_slow", "rules": [{"match": "mysql", "threshold": "100ms"}]}}),
        }];
        let filter = DbFilter::new(
            &json!({"slow_query": {"destination": "db.is_slow", "rules": [{"match": "mysql", "threshold": "1s"}]}}),
            &subs,
        )
        .unwrap();

        assert_eq!(filter.sub_configs(), subs.as_slice());

        let half_second = Traces {
            spans: vec![db_span(Some("mysql"), SEC, SEC + SEC / 2)],
            ..Traces::default()
        };
        let scoped = Record::traces(Token::scoped("abc", "service", "checkout"), half_second.clone());
        let other_service = Record::traces(Token::scoped("abc", "service", "cart"), half_second.clone());
        let bare = Record::traces(Token::new("abc"), half_second);

        assert_eq!(first_span(&filter, scoped).await.attributes["db.is_slow"], json!(true));
        assert_eq!(first_span(&filter, other_service).await.attributes["db.is_slow"], json!(false));
        assert_eq!(first_span(&filter, bare).await.attributes["db.is_slow"], json!(false));
    }

    #[tokio::test]
    async fn non_trace_records_pass_through() {
        let record = Record::logs(Token::new("abc"), Logs::default());
        let flow = mysql_filter()
            .process(record, &ProcessContext::default())
            .await
            .unwrap();
        assert!(matches!(flow, Flow::Continue(_)));
    }

    #[test]
    fn bad_threshold_fails_construction() {
        let res = DbFilter::new(
            &json!({"slow_query": {"destination": "d", "rules": [{"match": "mysql", "threshold": "soon"}]}}),
            &[],
        );
        assert!(matches!(res, Err(ProcessorError::Config(_))));
    }
}

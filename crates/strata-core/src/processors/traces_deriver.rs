//! Derives RED-style metrics from trace batches.
//!
//! For each non-empty trace record, emits one metrics record carrying, per
//! span name, the number of spans (`span_count`) and their total duration
//! in seconds (`span_duration_seconds_sum`). The trace record itself
//! continues unchanged; the metrics record is resubmitted by the pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use strata_types::config::SubConfig;
use strata_types::record::{MetricPoint, Metrics, Traces};
use strata_types::{Payload, Record};

use crate::confengine::{TieredConfig, decode_tiered};
use crate::processor::common::CommonProcessor;
use crate::processor::{Flow, ProcessContext, Processor, ProcessorError};

pub const NAME: &str = "traces_deriver";

pub const SPAN_COUNT: &str = "span_count";
pub const SPAN_DURATION_SUM: &str = "span_duration_seconds_sum";

/// Label carrying the span name on derived points.
pub const SPAN_NAME_LABEL: &str = "span_name";

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct Config {
    #[serde(default = "default_enabled")]
    enabled: bool,
    /// Prepended to every derived metric name.
    #[serde(default)]
    metric_prefix: String,
}

pub struct TracesDeriver {
    common: CommonProcessor,
    configs: TieredConfig<Config>,
}

impl TracesDeriver {
    pub fn new(raw: &Value, subs: &[SubConfig]) -> Result<Self, ProcessorError> {
        Ok(Self {
            common: CommonProcessor::new(raw, subs),
            configs: decode_tiered(NAME, raw, subs)?,
        })
    }

    pub fn build(raw: &Value, subs: &[SubConfig]) -> Result<Arc<dyn Processor>, ProcessorError> {
        Ok(Arc::new(Self::new(raw, subs)?))
    }
}

fn derive(traces: &Traces, prefix: &str, timestamp: u64) -> Metrics {
    let mut per_name: BTreeMap<&str, (u64, f64)> = BTreeMap::new();
    for span in &traces.spans {
        let entry = per_name.entry(span.name.as_str()).or_default();
        entry.0 += 1;
        entry.1 += span.duration().as_secs_f64();
    }

    let mut points = Vec::with_capacity(per_name.len() * 2);
    for (name, (count, seconds)) in per_name {
        let labels = BTreeMap::from([(SPAN_NAME_LABEL.to_owned(), name.to_owned())]);
        points.push(MetricPoint {
            name: format!("{prefix}{SPAN_COUNT}"),
            value: count as f64,
            timestamp_unix_nano: timestamp,
            labels: labels.clone(),
        });
        points.push(MetricPoint {
            name: format!("{prefix}{SPAN_DURATION_SUM}"),
            value: seconds,
            timestamp_unix_nano: timestamp,
            labels,
        });
    }

    Metrics {
        resource: traces.resource.clone(),
        points,
    }
}

#[async_trait]
impl Processor for TracesDeriver {
    fn name(&self) -> &str {
        NAME
    }

    async fn process(&self, record: Record, _ctx: &ProcessContext) -> Result<Flow, ProcessorError> {
        let config = self.configs.get_for(record.token());
        let Payload::Traces(traces) = record.payload() else {
            return Ok(Flow::Continue(record));
        };
        if !config.enabled || traces.spans.is_empty() {
            return Ok(Flow::Continue(record));
        }

        let timestamp = record
            .received_at()
            .timestamp_nanos_opt()
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or_default();
        let metrics = derive(traces, &config.metric_prefix, timestamp);
        let derived = Record::metrics(record.token().clone(), metrics);

        Ok(Flow::Derive(record, vec![derived]))
    }

    fn is_derived(&self) -> bool {
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
    use strata_types::record::{Logs, Span};
    use strata_types::{RecordKind, Token};

    fn span(name: &str, millis: u64) -> Span {
        Span {
            trace_id: "t".into(),
            span_id: "s".into(),
            name: name.into(),
            start_time_unix_nano: 0,
            end_time_unix_nano: millis * 1_000_000,
            ..Span::default()
        }
    }

    fn traces(token: &str, spans: Vec<Span>) -> Record {
        Record::traces(
            Token::new(token),
            Traces {
                spans,
                ..Traces::default()
            },
        )
    }

    #[tokio::test]
    async fn derives_count_and_duration_per_name() {
        let deriver = TracesDeriver::new(&Value::Null, &[]).unwrap();
        let input = traces("abc", vec![span("GET", 500), span("GET", 1500), span("SELECT", 250)]);

        let Flow::Derive(primary, derived) = deriver
            .process(input, &ProcessContext::default())
            .await
            .unwrap()
        else {
            panic!("expected derived records");
        };
        assert_eq!(primary.kind(), RecordKind::Traces);
        assert_eq!(derived.len(), 1);
        assert_eq!(derived[0].token().original(), "abc");

        let Payload::Metrics(m) = derived[0].payload() else {
            panic!("expected metrics");
        };
        assert_eq!(m.points.len(), 4);
        let get = |metric: &str, span_name: &str| {
            m.points
                .iter()
                .find(|p| p.name == metric && p.labels[SPAN_NAME_LABEL] == span_name)
                .map(|p| p.value)
                .unwrap()
        };
        assert_eq!(get(SPAN_COUNT, "GET"), 2.0);
        assert_eq!(get(SPAN_DURATION_SUM, "GET"), 2.0);
        assert_eq!(get(SPAN_COUNT, "SELECT"), 1.0);
        assert_eq!(get(SPAN_DURATION_SUM, "SELECT"), 0.25);
    }

    #[tokio::test]
    async fn disabled_tenant_gets_nothing() {
        let subs = vec![SubConfig::for_token("quiet", json!({"enabled": false}))];
        let deriver = TracesDeriver::new(&Value::Null, &subs).unwrap();
        let flow = deriver
            .process(traces("quiet", vec![span("GET", 1)]), &ProcessContext::default())
            .await
            .unwrap();
        assert!(matches!(flow, Flow::Continue(_)));
    }

    #[tokio::test]
    async fn prefix_applied() {
        let deriver = TracesDeriver::new(&json!({"metric_prefix": "apm_"}), &[]).unwrap();
        let Flow::Derive(_, derived) = deriver
            .process(traces("abc", vec![span("GET", 1)]), &ProcessContext::default())
            .await
            .unwrap()
        else {
            panic!("expected derived records");
        };
        let Payload::Metrics(m) = derived[0].payload() else {
            panic!("expected metrics");
        };
        assert!(m.points.iter().all(|p| p.name.starts_with("apm_")));
    }

    #[tokio::test]
    async fn other_kinds_and_empty_batches_continue() {
        let deriver = TracesDeriver::new(&Value::Null, &[]).unwrap();
        let ctx = ProcessContext::default();
        let logs = Record::logs(Token::new("abc"), Logs::default());
        assert!(matches!(deriver.process(logs, &ctx).await.unwrap(), Flow::Continue(_)));
        assert!(matches!(
            deriver.process(traces("abc", vec![]), &ctx).await.unwrap(),
            Flow::Continue(_)
        ));
        assert!(deriver.is_derived());
    }
}

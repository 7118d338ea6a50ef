//! The unit of data moving through the pipeline.
//!
//! A [`Record`] pairs a tenant [`Token`] with a typed [`Payload`]. The
//! record's [`RecordKind`] is derived from its payload, so a record can
//! never claim to carry traces while holding logs. Stages may mutate the
//! payload in place or swap it through [`Record::replace_payload`], which
//! refuses a payload of a different kind.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StrataError;

/// Free-form attribute map shared by resources, spans and log entries.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

// ── Token ───────────────────────────────────────────────────────────────

/// Tenant identity attached to a record.
///
/// `original` is the opaque credential the agent presented. The
/// `(scope_type, scope_id)` pair is derived from it by the ingress adapter
/// and narrows tenant overrides (e.g. `("service", "checkout")`). Both are
/// empty when the adapter knows nothing beyond the credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    original: String,
    #[serde(default, rename = "type")]
    scope_type: String,
    #[serde(default, rename = "id")]
    scope_id: String,
}

impl Token {
    /// A token carrying only the original credential.
    pub fn new(original: impl Into<String>) -> Self {
        Self {
            original: original.into(),
            scope_type: String::new(),
            scope_id: String::new(),
        }
    }

    /// A token with a derived override scope.
    pub fn scoped(
        original: impl Into<String>,
        scope_type: impl Into<String>,
        scope_id: impl Into<String>,
    ) -> Self {
        Self {
            original: original.into(),
            scope_type: scope_type.into(),
            scope_id: scope_id.into(),
        }
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn scope_type(&self) -> &str {
        &self.scope_type
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    /// True when the agent presented no credential at all.
    pub fn is_empty(&self) -> bool {
        self.original.is_empty()
    }
}

// ── Payloads ────────────────────────────────────────────────────────────

/// The three telemetry signal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Traces,
    Metrics,
    Logs,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Traces => "traces",
            Self::Metrics => "metrics",
            Self::Logs => "logs",
        })
    }
}

/// A single span.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub name: String,
    pub start_time_unix_nano: u64,
    pub end_time_unix_nano: u64,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Span {
    /// Wall-clock duration of the span. Inverted timestamps yield zero.
    pub fn duration(&self) -> Duration {
        Duration::from_nanos(
            self.end_time_unix_nano
                .saturating_sub(self.start_time_unix_nano),
        )
    }

    /// String value of an attribute, if present and a string.
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }
}

/// A batch of spans sharing one resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Traces {
    #[serde(default)]
    pub resource: Attributes,
    #[serde(default)]
    pub spans: Vec<Span>,
}

/// One metric sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub name: String,
    pub value: f64,
    pub timestamp_unix_nano: u64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// A batch of metric samples sharing one resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default)]
    pub resource: Attributes,
    #[serde(default)]
    pub points: Vec<MetricPoint>,
}

/// One log line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp_unix_nano: u64,
    #[serde(default)]
    pub severity: String,
    pub body: String,
    #[serde(default)]
    pub attributes: Attributes,
}

/// A batch of log lines sharing one resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Logs {
    #[serde(default)]
    pub resource: Attributes,
    #[serde(default)]
    pub entries: Vec<LogEntry>,
}

/// Typed telemetry data, keyed by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Traces(Traces),
    Metrics(Metrics),
    Logs(Logs),
}

impl Payload {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Traces(_) => RecordKind::Traces,
            Self::Metrics(_) => RecordKind::Metrics,
            Self::Logs(_) => RecordKind::Logs,
        }
    }

    /// Number of items (spans, points or log entries) in the batch.
    pub fn item_count(&self) -> usize {
        match self {
            Self::Traces(t) => t.spans.len(),
            Self::Metrics(m) => m.points.len(),
            Self::Logs(l) => l.entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }
}

// ── Record ──────────────────────────────────────────────────────────────

/// One unit of telemetry moving through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default = "Uuid::new_v4")]
    id: Uuid,
    token: Token,
    payload: Payload,
    #[serde(default = "Utc::now")]
    received_at: DateTime<Utc>,
}

impl Record {
    /// Create a record received now.
    pub fn new(token: Token, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            token,
            payload,
            received_at: Utc::now(),
        }
    }

    /// A record carrying a trace batch.
    pub fn traces(token: Token, traces: Traces) -> Self {
        Self::new(token, Payload::Traces(traces))
    }

    /// A record carrying a metric batch.
    pub fn metrics(token: Token, metrics: Metrics) -> Self {
        Self::new(token, Payload::Metrics(metrics))
    }

    /// A record carrying a log batch.
    pub fn logs(token: Token, logs: Logs) -> Self {
        Self::new(token, Payload::Logs(logs))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> RecordKind {
        self.payload.kind()
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Mutable access to the payload. The enum variant cannot be changed
    /// through this reference without going through `replace_payload`.
    pub fn payload_mut(&mut self) -> PayloadMut<'_> {
        match &mut self.payload {
            Payload::Traces(t) => PayloadMut::Traces(t),
            Payload::Metrics(m) => PayloadMut::Metrics(m),
            Payload::Logs(l) => PayloadMut::Logs(l),
        }
    }

    /// Swap the payload for one of the same kind, returning the old one.
    pub fn replace_payload(&mut self, payload: Payload) -> Result<Payload, StrataError> {
        if payload.kind() != self.kind() {
            return Err(StrataError::KindMismatch {
                expected: self.kind(),
                actual: payload.kind(),
            });
        }
        Ok(std::mem::replace(&mut self.payload, payload))
    }

    /// Span batch, if this is a trace record.
    pub fn as_traces_mut(&mut self) -> Option<&mut Traces> {
        match &mut self.payload {
            Payload::Traces(t) => Some(t),
            _ => None,
        }
    }
}

/// Kind-preserving mutable view of a record's payload.
#[derive(Debug)]
pub enum PayloadMut<'a> {
    Traces(&'a mut Traces),
    Metrics(&'a mut Metrics),
    Logs(&'a mut Logs),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(name: &str, start: u64, end: u64) -> Span {
        Span {
            trace_id: "t1".into(),
            span_id: "s1".into(),
            name: name.into(),
            start_time_unix_nano: start,
            end_time_unix_nano: end,
            ..Span::default()
        }
    }

    #[test]
    fn kind_follows_payload() {
        let rec = Record::logs(Token::new("abc"), Logs::default());
        assert_eq!(rec.kind(), RecordKind::Logs);
        assert_eq!(rec.token().original(), "abc");
    }

    #[test]
    fn replace_payload_same_kind() {
        let mut rec = Record::traces(Token::new("abc"), Traces::default());
        let mut next = Traces::default();
        next.spans.push(span("GET /", 0, 10));
        let old = rec.replace_payload(Payload::Traces(next)).unwrap();
        assert!(old.is_empty());
        assert_eq!(rec.payload().item_count(), 1);
    }

    #[test]
    fn replace_payload_rejects_other_kind() {
        let mut rec = Record::traces(Token::new("abc"), Traces::default());
        let err = rec
            .replace_payload(Payload::Metrics(Metrics::default()))
            .unwrap_err();
        assert!(matches!(
            err,
            StrataError::KindMismatch {
                expected: RecordKind::Traces,
                actual: RecordKind::Metrics
            }
        ));
        assert_eq!(rec.kind(), RecordKind::Traces);
    }

    #[test]
    fn span_duration_saturates() {
        assert_eq!(span("x", 1_000, 3_000).duration(), Duration::from_nanos(2_000));
        assert_eq!(span("x", 5_000, 1_000).duration(), Duration::ZERO);
    }

    #[test]
    fn token_scope_accessors() {
        let token = Token::scoped("abc", "service", "checkout");
        assert_eq!(token.scope_type(), "service");
        assert_eq!(token.scope_id(), "checkout");
        assert!(!token.is_empty());
        assert!(Token::new("").is_empty());
    }

    #[test]
    fn record_deserializes_with_defaults() {
        let json = r#"{
            "token": {"original": "abc"},
            "payload": {"kind": "logs", "data": {"entries": [
                {"timestamp_unix_nano": 1, "body": "hello"}
            ]}}
        }"#;
        let rec: Record = serde_json::from_str(json).unwrap();
        assert_eq!(rec.kind(), RecordKind::Logs);
        assert_eq!(rec.token().scope_type(), "");
        assert_eq!(rec.payload().item_count(), 1);
    }

    #[test]
    fn payload_mut_keeps_variant() {
        let mut rec = Record::traces(Token::new("abc"), Traces::default());
        if let PayloadMut::Traces(t) = rec.payload_mut() {
            t.spans.push(span("db", 0, 1));
        }
        assert_eq!(rec.payload().item_count(), 1);
        assert!(rec.as_traces_mut().is_some());
    }
}

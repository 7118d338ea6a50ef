//! `strata run` -- push newline-delimited JSON records through the pipeline.
//!
//! Each input line is one serialized [`Record`]. Every line produces one
//! JSON report on stdout; a line that does not parse is reported as a
//! `bad_request` and the remaining lines still run. Records that reach the
//! end of the chain are drained from the sink and counted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use futures::StreamExt;
use serde::Serialize;
use strata_core::pipeline::publisher::ChannelPublisher;
use strata_core::processors::duration;
use strata_core::{Outcome, PipelineHandle, ProcessContext};
use strata_types::{Record, StatusCode};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Arguments for the `run` subcommand.
#[derive(Args)]
pub struct RunArgs {
    /// Config file path (overrides STRATA_CONFIG and ./strata.yaml).
    #[arg(short, long)]
    pub config: Option<String>,

    /// Newline-delimited JSON records to submit (defaults to stdin).
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Maximum number of records submitted concurrently.
    #[arg(long, default_value_t = 1)]
    pub concurrency: usize,

    /// Per-record deadline (e.g. `500ms`, `2s`).
    #[arg(long, value_parser = duration::parse)]
    pub timeout: Option<Duration>,

    /// Capacity of the sink channel.
    #[arg(long, default_value_t = 1024)]
    pub sink_capacity: usize,
}

/// Report for one input line.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LineReport {
    pub line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<String>,
    pub outcome: String,
    pub status: StatusCode,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl LineReport {
    fn from_outcome(line: usize, record: String, outcome: &Outcome) -> Self {
        let detail = match outcome {
            Outcome::Rejected(r) => Some(r.message().to_owned()),
            Outcome::Failed(f) => Some(f.to_string()),
            Outcome::Delivered | Outcome::EndOfPipeline => None,
        };
        let status = outcome.status();
        Self {
            line,
            record: Some(record),
            outcome: outcome.label().to_owned(),
            status,
            code: status.as_http(),
            detail,
        }
    }

    fn malformed(line: usize, error: &serde_json::Error) -> Self {
        let status = StatusCode::BadRequest;
        Self {
            line,
            record: None,
            outcome: "malformed".to_owned(),
            status,
            code: status.as_http(),
            detail: Some(error.to_string()),
        }
    }
}

/// Run the `run` subcommand.
pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let (path, config) = super::load_config(args.config.as_deref())?;
    info!(path = %path.display(), pipeline = %config.name, "loaded config");

    let (publisher, mut sink) = ChannelPublisher::new(args.sink_capacity);
    let publisher = Arc::new(publisher);
    let pipeline = super::build_pipeline(&config, publisher.clone()).await?;
    let handle = PipelineHandle::new(pipeline);

    let drain = tokio::spawn(async move {
        let mut drained = 0u64;
        while let Some(record) = sink.recv().await {
            debug!(record = %record.id(), kind = %record.kind(), "record reached sink");
            drained += 1;
        }
        drained
    });

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling in-flight records");
            on_signal.cancel();
        }
    });

    let reports = match &args.input {
        Some(file) => {
            let reader = tokio::fs::File::open(file).await?;
            submit_lines(&handle, reader, args.concurrency, args.timeout, &cancel).await?
        }
        None => {
            submit_lines(&handle, tokio::io::stdin(), args.concurrency, args.timeout, &cancel)
                .await?
        }
    };

    for report in &reports {
        println!("{}", serde_json::to_string(report)?);
    }

    let stats = handle.current().stats();
    handle.shutdown().await;
    drop(handle);
    drop(publisher);
    let drained = drain.await?;

    eprintln!("{}", serde_json::to_string_pretty(&stats)?);
    info!(lines = reports.len(), drained, "run complete");
    Ok(())
}

/// Submit every line read from `reader`, at most `concurrency` at a time.
///
/// Reports come back in input order. Lines not yet started when `cancel`
/// fires are skipped; in-flight ones fail with a cancellation.
pub async fn submit_lines<R>(
    handle: &PipelineHandle,
    reader: R,
    concurrency: usize,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> anyhow::Result<Vec<LineReport>>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut input = Vec::new();
    let mut number = 0usize;
    while let Some(line) = lines.next_line().await? {
        number += 1;
        if !line.trim().is_empty() {
            input.push((number, line));
        }
    }

    let mut reports: Vec<LineReport> = futures::stream::iter(input)
        .map(|(line, text)| {
            let cancel = cancel.clone();
            async move {
                let record = match serde_json::from_str::<Record>(&text) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(line, error = %e, "skipping malformed record");
                        return LineReport::malformed(line, &e);
                    }
                };
                let mut ctx = ProcessContext::new().with_cancel(cancel);
                if let Some(timeout) = timeout {
                    ctx = ctx.with_timeout(timeout);
                }
                let id = record.id().to_string();
                let outcome = handle.submit_with(record, &ctx).await;
                LineReport::from_outcome(line, id, &outcome)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .take_until(cancel.cancelled())
        .collect()
        .await;

    reports.sort_by_key(|r| r.line);
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::Pipeline;
    use strata_core::pipeline::publisher::NoopPublisher;
    use strata_core::pipeline::validator::build_validator;
    use strata_types::config::CollectorConfig;

    async fn handle(yaml: &str) -> PipelineHandle {
        let (config, _) = CollectorConfig::from_yaml_str(yaml).unwrap().into_pipeline();
        let pipeline = Pipeline::build(
            &config,
            super::super::processor_registry().unwrap(),
            build_validator(&config.validator),
            Arc::new(NoopPublisher),
        )
        .await
        .unwrap();
        PipelineHandle::new(pipeline)
    }

    const LOGS: &str =
        r#"{"token":{"original":"abc"},"payload":{"kind":"logs","data":{"entries":[{"timestamp_unix_nano":0,"body":"hi"}]}}}"#;

    #[tokio::test]
    async fn reports_each_line_in_order() {
        let handle = handle(
            "pipeline:\n  validator:\n    require_token: true\n  processors:\n    - name: token_checker\n      config: { allowed: [abc] }\n",
        )
        .await;
        let input = format!(
            "{LOGS}\nnot json\n\n{}\n",
            LOGS.replace("\"abc\"", "\"xyz\"")
        );

        let reports = submit_lines(&handle, input.as_bytes(), 4, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].line, 1);
        assert_eq!(reports[0].outcome, "delivered");
        assert_eq!(reports[0].code, 200);
        assert_eq!(reports[1].outcome, "malformed");
        assert_eq!(reports[1].status, StatusCode::BadRequest);
        assert!(reports[1].record.is_none());
        // Blank line 3 is skipped; line 4 fails the stage.
        assert_eq!(reports[2].line, 4);
        assert_eq!(reports[2].outcome, "failed");
        assert!(reports[2].detail.as_deref().unwrap().contains("token_checker"));

        let stats = handle.current().stats();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn gate_rejection_is_reported() {
        let handle = handle("pipeline:\n  validator:\n    require_token: true\n").await;
        let input = LOGS.replace("\"abc\"", "\"\"");

        let reports = submit_lines(&handle, input.as_bytes(), 1, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reports[0].outcome, "rejected");
        assert_eq!(reports[0].code, 401);
        assert!(reports[0].detail.is_some());
    }

    #[tokio::test]
    async fn cancelled_before_start_submits_nothing() {
        let handle = handle("pipeline:\n  name: empty\n").await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let reports = submit_lines(&handle, LOGS.as_bytes(), 1, None, &cancel)
            .await
            .unwrap();

        assert!(reports.is_empty());
        assert_eq!(handle.current().stats().submitted, 0);
    }

    #[test]
    fn report_serializes_without_empty_fields() {
        let report = LineReport::from_outcome(7, "id-1".into(), &Outcome::Delivered);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["line"], 7);
        assert_eq!(json["status"], "ok");
        assert!(json.get("detail").is_none());
    }
}

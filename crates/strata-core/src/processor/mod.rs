//! The stage contract.
//!
//! A [`Processor`] is one named unit of work over a [`Record`]. Each call
//! returns an explicit [`Flow`]: keep going with a record, keep going and
//! emit extra records, or stop because the stage already handled delivery.
//! Failures travel on the `Err` side only.

pub mod common;
pub mod registry;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use strata_types::config::SubConfig;
use strata_types::{Record, RecordKind, StrataError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Errors a stage can raise while constructing, processing or releasing.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProcessorError {
    /// The raw configuration could not be decoded or is semantically wrong.
    #[error("invalid config: {0}")]
    Config(String),

    /// The record's tenant credential was refused.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The stage does not accept records of this kind.
    #[error("unsupported record kind: {0}")]
    UnsupportedKind(RecordKind),

    /// An outbound call failed.
    #[error("egress failed: {0}")]
    Egress(String),

    /// The caller's cancellation token fired.
    #[error("cancelled by caller")]
    Cancelled,

    /// The caller's deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A per-tenant resource could not be released cleanly.
    #[error("release failed: {0}")]
    Release(String),

    /// The stage returned a result it is not allowed to produce.
    #[error("stage contract violated: {0}")]
    Contract(String),

    /// Mutating the record failed.
    #[error(transparent)]
    Record(#[from] StrataError),
}

impl From<serde_json::Error> for ProcessorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Config(e.to_string())
    }
}

/// Result of one stage invocation.
#[derive(Debug)]
pub enum Flow {
    /// Hand the record to the next stage (or the sink after the last).
    Continue(Record),
    /// Continue with the record and resubmit the extra records at the start
    /// of the pipeline. Only derived stages may return this.
    Derive(Record, Vec<Record>),
    /// The stage fully handled the record. Later stages and the sink are
    /// skipped and the submission reports end-of-pipeline.
    Done,
}

/// Caller-supplied execution context for one submission.
///
/// The pipeline never cancels work on its own. Stages that make external
/// calls wrap them in [`ProcessContext::run`] so the caller's token and
/// deadline are honored.
#[derive(Debug, Clone, Default)]
pub struct ProcessContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl ProcessContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Drive `fut` until it completes, the token fires or the deadline
    /// passes, whichever comes first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, ProcessorError>
    where
        F: Future<Output = Result<T, ProcessorError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(ProcessorError::Cancelled);
        }
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.cancel.cancelled() => Err(ProcessorError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => Err(ProcessorError::DeadlineExceeded),
                res = fut => res,
            },
            None => tokio::select! {
                _ = self.cancel.cancelled() => Err(ProcessorError::Cancelled),
                res = fut => res,
            },
        }
    }
}

/// A pipeline stage.
///
/// Implementations are shared across concurrent submissions, so any
/// per-tenant mutable state must synchronize internally.
#[async_trait]
pub trait Processor: Send + Sync {
    /// The registered kind of this stage.
    fn name(&self) -> &str;

    /// Process one record.
    async fn process(&self, record: Record, ctx: &ProcessContext) -> Result<Flow, ProcessorError>;

    /// Pre-check stages are hoisted ahead of every other stage.
    fn is_pre_check(&self) -> bool {
        false
    }

    /// Derived stages may return [`Flow::Derive`].
    fn is_derived(&self) -> bool {
        false
    }

    /// The raw main configuration the stage was built from, if it keeps one.
    fn main_config(&self) -> Option<&Value> {
        None
    }

    /// The tenant overrides the stage was built with.
    fn sub_configs(&self) -> &[SubConfig] {
        &[]
    }

    /// Release per-tenant resources. Called once at pipeline teardown,
    /// possibly while earlier `process` calls are still draining.
    async fn clean(&self) -> Result<(), ProcessorError> {
        Ok(())
    }
}

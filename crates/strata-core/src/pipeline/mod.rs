//! The processing pipeline.
//!
//! A [`Pipeline`] is an admission gate followed by an ordered chain of
//! stages and a terminal sink. It is built once from configuration and is
//! immutable afterwards; every submission runs on the caller's task.
//!
//! Chain order: pre-check stages first (in their configured relative
//! order), then the remaining stages in configured order. For each record
//! the chain stops at the first of:
//!
//! - a stage returning [`Flow::Done`] -> [`Outcome::EndOfPipeline`]
//! - a stage returning an error -> [`Outcome::Failed`], attributed to that
//!   stage's configured name
//! - the end of the chain -> the record goes to the sink, [`Outcome::Delivered`]
//!
//! Records emitted by derived stages are resubmitted from the top, gate
//! included, after the primary record finishes.

pub mod handle;
pub mod publisher;
pub mod rate_limiter;
pub mod validator;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use strata_types::config::PipelineConfig;
use strata_types::{Record, StatusCode};
use tracing::{debug, error, info, warn};

use crate::processor::registry::{BuildError, Registry};
use crate::processor::{Flow, ProcessContext, Processor, ProcessorError};
use publisher::Publisher;
use validator::{Rejection, Validator};

/// How many generations of derived records are followed.
pub const MAX_DERIVE_DEPTH: usize = 4;

// ── Outcome ─────────────────────────────────────────────────────────────

/// A failure attributed to one stage.
#[derive(Debug, thiserror::Error)]
#[error("stage '{stage}' failed: {error}")]
pub struct StageFailure {
    /// Configured instance name of the failing stage.
    pub stage: String,
    #[source]
    pub error: ProcessorError,
}

/// Result of one submission.
#[derive(Debug)]
pub enum Outcome {
    /// The record reached the sink.
    Delivered,
    /// A stage fully handled the record.
    EndOfPipeline,
    /// The gate refused the record; no stage ran.
    Rejected(Rejection),
    /// A stage failed; later stages did not run.
    Failed(StageFailure),
}

impl Outcome {
    /// The ingress status for this outcome.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Delivered | Self::EndOfPipeline => StatusCode::Ok,
            Self::Rejected(r) => r.status(),
            Self::Failed(_) => StatusCode::InternalError,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Delivered | Self::EndOfPipeline)
    }

    /// Short label for logs and reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::EndOfPipeline => "end_of_pipeline",
            Self::Rejected(_) => "rejected",
            Self::Failed(_) => "failed",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delivered | Self::EndOfPipeline => f.write_str(self.label()),
            Self::Rejected(r) => write!(f, "rejected ({r})"),
            Self::Failed(e) => write!(f, "failed ({e})"),
        }
    }
}

// ── Stats ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct PipelineStats {
    submitted: AtomicU64,
    delivered: AtomicU64,
    end_of_pipeline: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
    derived: AtomicU64,
}

impl PipelineStats {
    fn count(&self, outcome: &Outcome) {
        let counter = match outcome {
            Outcome::Delivered => &self.delivered,
            Outcome::EndOfPipeline => &self.end_of_pipeline,
            Outcome::Rejected(_) => &self.rejected,
            Outcome::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of a pipeline's counters.
///
/// `submitted` counts primary submissions; `derived` counts resubmitted
/// derived records. The outcome counters cover both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatsSnapshot {
    pub submitted: u64,
    pub delivered: u64,
    pub end_of_pipeline: u64,
    pub rejected: u64,
    pub failed: u64,
    pub derived: u64,
}

// ── Pipeline ────────────────────────────────────────────────────────────

struct Stage {
    name: String,
    processor: Arc<dyn Processor>,
    failures: AtomicU64,
}

/// Gate, ordered stages and sink.
pub struct Pipeline {
    name: String,
    stages: Vec<Stage>,
    validator: Arc<dyn Validator>,
    publisher: Arc<dyn Publisher>,
    stats: PipelineStats,
    cleaned: AtomicBool,
}

impl Pipeline {
    /// Build a pipeline. All-or-nothing: every configured name is resolved
    /// before any constructor runs, and if a constructor fails the stages
    /// built so far are cleaned and dropped.
    pub async fn build(
        config: &PipelineConfig,
        registry: &Registry,
        validator: Arc<dyn Validator>,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Self, BuildError> {
        config.validate()?;

        if let Some(missing) = config.processors.iter().find(|p| !registry.contains(&p.name)) {
            return Err(BuildError::UnknownProcessor {
                name: missing.name.clone(),
            });
        }

        let mut built: Vec<Stage> = Vec::with_capacity(config.processors.len());
        for p in &config.processors {
            match registry.build(&p.name, &p.config, &p.overrides) {
                Ok(processor) => {
                    debug!(
                        pipeline = %config.name,
                        stage = %p.name,
                        overrides = p.overrides.len(),
                        pre_check = processor.is_pre_check(),
                        derived = processor.is_derived(),
                        "constructed stage"
                    );
                    built.push(Stage {
                        name: p.name.clone(),
                        processor,
                        failures: AtomicU64::new(0),
                    });
                }
                Err(e) => {
                    error!(pipeline = %config.name, stage = %p.name, error = %e, "pipeline build failed");
                    clean_stages(&config.name, &built).await;
                    return Err(e);
                }
            }
        }

        let (mut stages, rest): (Vec<_>, Vec<_>) =
            built.into_iter().partition(|s| s.processor.is_pre_check());
        stages.extend(rest);

        info!(
            pipeline = %config.name,
            stages = stages.len(),
            order = ?stages.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            "pipeline built"
        );

        Ok(Self {
            name: config.name.clone(),
            stages,
            validator,
            publisher,
            stats: PipelineStats::default(),
            cleaned: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured stage names in execution order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// The stages themselves, in execution order.
    pub fn processors(&self) -> impl Iterator<Item = (&str, &Arc<dyn Processor>)> {
        self.stages.iter().map(|s| (s.name.as_str(), &s.processor))
    }

    /// Submit with a default (never-cancelled, no deadline) context.
    pub async fn submit(&self, record: Record) -> Outcome {
        self.submit_with(record, &ProcessContext::default()).await
    }

    /// Submit one record. Derived records it produces are processed before
    /// this returns; their outcomes are logged and counted but do not
    /// affect the returned outcome.
    pub async fn submit_with(&self, record: Record, ctx: &ProcessContext) -> Outcome {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);

        let (outcome, derived) = self.run_chain(record, ctx).await;
        self.stats.count(&outcome);

        let mut queue: VecDeque<(Record, usize)> = derived.into_iter().map(|r| (r, 1)).collect();
        while let Some((record, depth)) = queue.pop_front() {
            if depth > MAX_DERIVE_DEPTH {
                warn!(
                    pipeline = %self.name,
                    record_id = %record.id(),
                    depth,
                    "dropping derived record beyond max depth"
                );
                continue;
            }
            self.stats.derived.fetch_add(1, Ordering::Relaxed);
            let id = record.id();
            let (child_outcome, children) = self.run_chain(record, ctx).await;
            self.stats.count(&child_outcome);
            if child_outcome.is_success() {
                debug!(pipeline = %self.name, record_id = %id, depth, outcome = child_outcome.label(), "derived record processed");
            } else {
                warn!(pipeline = %self.name, record_id = %id, depth, outcome = %child_outcome, "derived record not processed");
            }
            queue.extend(children.into_iter().map(|r| (r, depth + 1)));
        }

        outcome
    }

    /// Gate plus chain for one record. Returns its outcome and any records
    /// derived along the way (empty unless the chain succeeded).
    async fn run_chain(&self, record: Record, ctx: &ProcessContext) -> (Outcome, Vec<Record>) {
        let permit = match self.validator.evaluate(&record) {
            Ok(permit) => permit,
            Err(rejection) => {
                warn!(
                    pipeline = %self.name,
                    record_id = %record.id(),
                    token = %record.token().original(),
                    status = rejection.status().as_http(),
                    reason = %rejection.message(),
                    "record rejected by gate"
                );
                return (Outcome::Rejected(rejection), Vec::new());
            }
        };

        let mut current = record;
        let mut derived = Vec::new();

        for stage in &self.stages {
            let id = current.id();
            let kind = current.kind();
            let token = current.token().clone();
            debug!(pipeline = %self.name, stage = %stage.name, record_id = %id, "processing");

            let result = match stage.processor.process(current, ctx).await {
                Ok(Flow::Derive(_, _)) if !stage.processor.is_derived() => Err(ProcessorError::Contract(
                    "non-derived stage returned derived records".into(),
                )),
                Ok(Flow::Continue(ref next) | Flow::Derive(ref next, _)) if next.kind() != kind => {
                    Err(ProcessorError::Contract(format!(
                        "stage turned a {kind} record into {}",
                        next.kind()
                    )))
                }
                Ok(Flow::Continue(ref next) | Flow::Derive(ref next, _)) if *next.token() != token => {
                    Err(ProcessorError::Contract("stage replaced the record token".into()))
                }
                other => other,
            };

            match result {
                Ok(Flow::Continue(next)) => current = next,
                Ok(Flow::Derive(next, extra)) => {
                    debug!(pipeline = %self.name, stage = %stage.name, record_id = %id, derived = extra.len(), "stage derived records");
                    derived.extend(extra);
                    current = next;
                }
                Ok(Flow::Done) => {
                    debug!(pipeline = %self.name, stage = %stage.name, record_id = %id, "end of pipeline");
                    drop(permit);
                    return (Outcome::EndOfPipeline, derived);
                }
                Err(error) => {
                    stage.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        pipeline = %self.name,
                        stage = %stage.name,
                        record_id = %id,
                        error = %error,
                        "stage failed"
                    );
                    drop(permit);
                    return (
                        Outcome::Failed(StageFailure {
                            stage: stage.name.clone(),
                            error,
                        }),
                        Vec::new(),
                    );
                }
            }
        }

        self.publisher.publish(current);
        drop(permit);
        (Outcome::Delivered, derived)
    }

    /// Release every stage's resources. Only the first call does anything.
    /// Safe to run while earlier submissions are still draining.
    pub async fn clean(&self) {
        if self.cleaned.swap(true, Ordering::AcqRel) {
            debug!(pipeline = %self.name, "pipeline already cleaned");
            return;
        }
        clean_stages(&self.name, &self.stages).await;
        info!(pipeline = %self.name, "pipeline cleaned");
    }

    pub fn is_cleaned(&self) -> bool {
        self.cleaned.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        let s = &self.stats;
        PipelineStatsSnapshot {
            submitted: s.submitted.load(Ordering::Relaxed),
            delivered: s.delivered.load(Ordering::Relaxed),
            end_of_pipeline: s.end_of_pipeline.load(Ordering::Relaxed),
            rejected: s.rejected.load(Ordering::Relaxed),
            failed: s.failed.load(Ordering::Relaxed),
            derived: s.derived.load(Ordering::Relaxed),
        }
    }

    /// Failure count per stage, in execution order.
    pub fn stage_failures(&self) -> Vec<(&str, u64)> {
        self.stages
            .iter()
            .map(|s| (s.name.as_str(), s.failures.load(Ordering::Relaxed)))
            .collect()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .field("cleaned", &self.is_cleaned())
            .finish()
    }
}

async fn clean_stages(pipeline: &str, stages: &[Stage]) {
    for stage in stages {
        if let Err(e) = stage.processor.clean().await {
            warn!(pipeline, stage = %stage.name, error = %e, "failed to release stage resources");
        }
    }
}

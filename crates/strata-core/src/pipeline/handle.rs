//! Reloadable pipeline holder.
//!
//! Submissions clone the current `Arc<Pipeline>` and run against it, so a
//! reload only contends with them for a pointer copy. The replaced pipeline
//! is cleaned after the swap while submissions that already hold it drain.

use std::sync::{Arc, PoisonError, RwLock};

use strata_types::Record;
use tracing::info;

use super::{Outcome, Pipeline};
use crate::processor::ProcessContext;

/// Owns the live pipeline.
#[derive(Debug)]
pub struct PipelineHandle {
    current: RwLock<Arc<Pipeline>>,
}

impl PipelineHandle {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            current: RwLock::new(Arc::new(pipeline)),
        }
    }

    /// The pipeline new submissions will use.
    pub fn current(&self) -> Arc<Pipeline> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub async fn submit(&self, record: Record) -> Outcome {
        self.current().submit(record).await
    }

    pub async fn submit_with(&self, record: Record, ctx: &ProcessContext) -> Outcome {
        self.current().submit_with(record, ctx).await
    }

    /// Swap in `next` and clean the pipeline it replaces.
    pub async fn reload(&self, next: Pipeline) {
        let next = Arc::new(next);
        let previous = {
            let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *slot, Arc::clone(&next))
        };
        info!(
            previous = %previous.name(),
            next = %next.name(),
            stages = ?next.stage_names(),
            "pipeline reloaded"
        );
        previous.clean().await;
    }

    /// Clean the live pipeline. Further submissions still reach it, but its
    /// stages have released their resources.
    pub async fn shutdown(&self) {
        self.current().clean().await;
    }
}

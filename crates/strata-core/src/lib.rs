//! # strata-core
//!
//! Processing engine for the strata telemetry collector.
//!
//! - **[`confengine`]** -- [`TieredConfig`], the global-plus-tenant-override
//!   configuration resolver every stage keys its settings by
//! - **[`processor`]** -- the [`Processor`] stage contract and the
//!   name-to-constructor [`Registry`]
//! - **[`pipeline`]** -- admission gate, ordered stage chain, sinks and the
//!   reloadable [`PipelineHandle`]
//! - **[`processors`]** -- stages shipped with the collector
//!
//! A pipeline is built once from a [`PipelineConfig`](strata_types::config::PipelineConfig)
//! and is immutable afterwards. Reloading builds a fresh pipeline and swaps
//! it in through the handle.

pub mod confengine;
pub mod pipeline;
pub mod processor;
pub mod processors;

pub use confengine::TieredConfig;
pub use pipeline::handle::PipelineHandle;
pub use pipeline::publisher::Publisher;
pub use pipeline::validator::{Permit, Rejection, Validator};
pub use pipeline::{Outcome, Pipeline, StageFailure};
pub use processor::registry::{BuildError, Registry, RegistryBuilder};
pub use processor::{Flow, ProcessContext, Processor, ProcessorError};

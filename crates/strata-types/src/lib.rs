//! # strata-types
//!
//! Core type definitions for the strata telemetry collector.
//!
//! This crate is the foundation of the dependency graph -- every other
//! strata crate depends on it. It contains:
//!
//! - **[`error`]** -- [`StrataError`] and [`ConfigError`] error types
//! - **[`record`]** -- [`Record`], [`Token`] and the typed telemetry payloads
//! - **[`status`]** -- [`StatusCode`], the ingress-facing outcome vocabulary
//! - **[`config`]** -- Pipeline configuration schema (stages, overrides, gate)

pub mod config;
pub mod error;
pub mod record;
pub mod status;

pub use error::{ConfigError, Result, StrataError};
pub use record::{Payload, Record, RecordKind, Token};
pub use status::StatusCode;

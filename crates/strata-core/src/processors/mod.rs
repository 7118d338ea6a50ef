//! Stages shipped with the collector.
//!
//! | name             | kind      | effect                                        |
//! |------------------|-----------|-----------------------------------------------|
//! | `token_checker`  | pre-check | refuses missing or disallowed tenant tokens   |
//! | `db_filter`      | regular   | marks slow database spans                     |
//! | `traces_deriver` | derived   | emits per-span-name metrics from traces       |
//! | `forwarder`      | terminal  | posts records upstream, ends the pipeline     |

pub mod db_filter;
pub mod duration;
pub mod forwarder;
pub mod token_checker;
pub mod traces_deriver;

use crate::processor::registry::{BuildError, Registry, RegistryBuilder};

/// Register every shipped stage on `builder`.
pub fn register_builtins(builder: &mut RegistryBuilder) -> Result<(), BuildError> {
    builder
        .register(token_checker::NAME, token_checker::TokenChecker::build)?
        .register(db_filter::NAME, db_filter::DbFilter::build)?
        .register(forwarder::NAME, forwarder::Forwarder::build)?
        .register(traces_deriver::NAME, traces_deriver::TracesDeriver::build)?;
    Ok(())
}

/// A registry holding only the shipped stages.
pub fn builtin_registry() -> Result<Registry, BuildError> {
    let mut builder = RegistryBuilder::new();
    register_builtins(&mut builder)?;
    Ok(builder.freeze())
}

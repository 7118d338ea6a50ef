//! Admission gate.
//!
//! A [`Validator`] decides, before any stage runs, whether a record enters
//! the pipeline. Decisions are local and bounded: no network calls. An
//! accepted record receives a [`Permit`] that the pipeline holds until the
//! record's chain finishes, which is how in-flight limits are enforced.
//!
//! A refusal is a [`Rejection`]: an ingress status paired with the
//! [`GateError`] that caused it. The status is derived from the error, so
//! a rejection can never claim success.

use std::any::Any;
use std::sync::Arc;

use strata_types::config::ValidatorConfig;
use strata_types::{Record, StatusCode};
use tokio::sync::Semaphore;
use tracing::warn;

use super::rate_limiter::{LimitScope, RateLimiter};

/// Why the gate refused a record.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum GateError {
    #[error("missing tenant token")]
    MissingToken,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("empty {0} payload")]
    EmptyPayload(strata_types::RecordKind),

    #[error("batch of {items} items exceeds the limit of {max}")]
    TooLarge { items: usize, max: usize },

    #[error("{scope} rate limit exceeded")]
    RateLimited { scope: LimitScope },

    #[error("more than {limit} records in flight")]
    Overloaded { limit: usize },
}

impl GateError {
    /// The ingress status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingToken => StatusCode::Unauthorized,
            Self::Forbidden(_) => StatusCode::Forbidden,
            Self::EmptyPayload(_) => StatusCode::BadRequest,
            Self::TooLarge { .. } => StatusCode::RequestEntityTooLarge,
            Self::RateLimited { .. } | Self::Overloaded { .. } => StatusCode::TooManyRequests,
        }
    }
}

/// A gate refusal: status, human-readable message and cause.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{status}: {message}")]
pub struct Rejection {
    status: StatusCode,
    message: String,
    #[source]
    error: GateError,
}

impl Rejection {
    /// A rejection whose message is the error text.
    pub fn new(error: GateError) -> Self {
        Self {
            status: error.status(),
            message: error.to_string(),
            error,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn error(&self) -> &GateError {
        &self.error
    }
}

impl From<GateError> for Rejection {
    fn from(error: GateError) -> Self {
        Self::new(error)
    }
}

/// Proof of admission. Guards held inside are released on drop.
#[derive(Default)]
pub struct Permit {
    guards: Vec<Box<dyn Any + Send + Sync>>,
}

impl Permit {
    /// A permit holding nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// A permit holding `guard` until it is dropped.
    pub fn guarded(guard: impl Any + Send + Sync) -> Self {
        Self {
            guards: vec![Box::new(guard)],
        }
    }

    /// Take over the guards of `other`.
    pub fn merge(&mut self, mut other: Permit) {
        self.guards.append(&mut other.guards);
    }
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit")
            .field("guards", &self.guards.len())
            .finish()
    }
}

/// Pre-chain admission decision.
pub trait Validator: Send + Sync {
    fn evaluate(&self, record: &Record) -> Result<Permit, Rejection>;
}

// ── Implementations ─────────────────────────────────────────────────────

/// Admits everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl Validator for AcceptAll {
    fn evaluate(&self, _record: &Record) -> Result<Permit, Rejection> {
        Ok(Permit::new())
    }
}

/// Closure-backed validator for ingress adapters and tests.
pub struct FnValidator<F>(F);

impl<F> FnValidator<F>
where
    F: Fn(&Record) -> Result<(), Rejection> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Validator for FnValidator<F>
where
    F: Fn(&Record) -> Result<(), Rejection> + Send + Sync,
{
    fn evaluate(&self, record: &Record) -> Result<Permit, Rejection> {
        (self.0)(record).map(|()| Permit::new())
    }
}

/// Refuses records whose token carries no credential.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenValidator;

impl Validator for TokenValidator {
    fn evaluate(&self, record: &Record) -> Result<Permit, Rejection> {
        if record.token().is_empty() {
            return Err(GateError::MissingToken.into());
        }
        Ok(Permit::new())
    }
}

/// Refuses empty batches and batches above an item limit.
#[derive(Debug, Default, Clone)]
pub struct ShapeValidator {
    reject_empty: bool,
    max_items: Option<usize>,
}

impl ShapeValidator {
    pub fn new(reject_empty: bool, max_items: Option<usize>) -> Self {
        Self {
            reject_empty,
            max_items,
        }
    }
}

impl Validator for ShapeValidator {
    fn evaluate(&self, record: &Record) -> Result<Permit, Rejection> {
        let items = record.payload().item_count();
        if self.reject_empty && items == 0 {
            return Err(GateError::EmptyPayload(record.kind()).into());
        }
        if let Some(max) = self.max_items
            && items > max
        {
            return Err(GateError::TooLarge { items, max }.into());
        }
        Ok(Permit::new())
    }
}

/// Caps the number of records being processed at once.
///
/// The permit carries a semaphore slot, so the count drops as soon as the
/// pipeline releases the record.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    limit: usize,
    slots: Arc<Semaphore>,
}

impl ConcurrencyLimiter {
    /// A limiter admitting `limit` records at once. Limits above
    /// [`Semaphore::MAX_PERMITS`] are clamped to it.
    pub fn new(limit: usize) -> Self {
        if limit > Semaphore::MAX_PERMITS {
            warn!(limit, max = Semaphore::MAX_PERMITS, "in-flight limit clamped");
        }
        let limit = limit.min(Semaphore::MAX_PERMITS);
        Self {
            limit,
            slots: Arc::new(Semaphore::new(limit)),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Records currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.limit - self.slots.available_permits()
    }
}

impl Validator for ConcurrencyLimiter {
    fn evaluate(&self, _record: &Record) -> Result<Permit, Rejection> {
        match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(slot) => Ok(Permit::guarded(slot)),
            Err(_) => Err(GateError::Overloaded { limit: self.limit }.into()),
        }
    }
}

/// Per-token sliding-window rate limit with an optional global cap.
pub struct RateLimitValidator {
    limiter: RateLimiter,
}

impl RateLimitValidator {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

impl Validator for RateLimitValidator {
    fn evaluate(&self, record: &Record) -> Result<Permit, Rejection> {
        self.limiter
            .check(record.token().original())
            .map(|()| Permit::new())
            .map_err(|scope| {
                Rejection::new(GateError::RateLimited { scope }).with_message(format!(
                    "{scope} rate limit exceeded for token '{}'",
                    record.token().original()
                ))
            })
    }
}

/// Runs validators in order. The first refusal wins; permits from earlier
/// validators are released with it.
#[derive(Default)]
pub struct ValidatorChain {
    validators: Vec<Arc<dyn Validator>>,
}

impl ValidatorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

impl Validator for ValidatorChain {
    fn evaluate(&self, record: &Record) -> Result<Permit, Rejection> {
        let mut permit = Permit::new();
        for v in &self.validators {
            permit.merge(v.evaluate(record)?);
        }
        Ok(permit)
    }
}

/// Assemble the gate described by `config`.
///
/// Stateless checks run first. The concurrency slot is taken before the
/// rate window is charged: a slot held by a later-refused record is released
/// with its permit, but a window charge cannot be given back.
pub fn build_validator(config: &ValidatorConfig) -> Arc<dyn Validator> {
    let mut chain = ValidatorChain::new();

    if config.require_token {
        chain = chain.with(Arc::new(TokenValidator));
    }
    if config.reject_empty || config.max_items.is_some() {
        chain = chain.with(Arc::new(ShapeValidator::new(
            config.reject_empty,
            config.max_items,
        )));
    }
    if let Some(limit) = config.max_in_flight {
        chain = chain.with(Arc::new(ConcurrencyLimiter::new(limit)));
    }
    if let Some(rl) = &config.rate_limit {
        let limiter = RateLimiter::new(rl.window_seconds, rl.per_token, rl.global)
            .with_max_tracked_tokens(rl.max_tracked_tokens);
        chain = chain.with(Arc::new(RateLimitValidator::new(limiter)));
    }

    if chain.is_empty() {
        Arc::new(AcceptAll)
    } else {
        Arc::new(chain)
    }
}

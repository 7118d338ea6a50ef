//! Per-tenant forwarding to a remote collector.
//!
//! Each tenant scope with an override gets its own [`ForwardClient`]; every
//! other record uses the global client. A forwarded record is fully handled,
//! so the stage ends the pipeline for it.
//!
//! Clients follow a drain-then-close protocol: [`ForwardClient::stop`]
//! refuses new sends, then waits (up to `drain_timeout`) for sends already
//! in flight. Pipeline teardown can therefore overlap with submissions that
//! are still using a client.
//!
//! ```yaml
//! - name: forwarder
//!   config:
//!     endpoint: http://upstream:4318/v1/records
//!     timeout: 5s
//!   overrides:
//!     - token: abc
//!       config: { endpoint: http://dedicated:4318/v1/records }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use strata_types::{Record, Token};
use strata_types::config::SubConfig;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use super::duration;
use crate::confengine::{TieredConfig, decode_tiered};
use crate::processor::common::CommonProcessor;
use crate::processor::{Flow, ProcessContext, Processor, ProcessorError};

pub const NAME: &str = "forwarder";

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Client settings for one tenant scope.
#[derive(Debug, Clone, Deserialize)]
pub struct ForwarderConfig {
    /// Target URL. Required.
    pub endpoint: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout", deserialize_with = "duration::deserialize")]
    pub timeout: Duration,

    /// How long `stop` waits for in-flight sends.
    #[serde(default = "default_drain_timeout", deserialize_with = "duration::deserialize")]
    pub drain_timeout: Duration,

    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

// ── Egress ──────────────────────────────────────────────────────────────

/// Transport used by forwarding clients.
#[async_trait]
pub trait Egress: Send + Sync {
    async fn send(&self, config: &ForwarderConfig, record: &Record) -> Result<(), ProcessorError>;
}

/// JSON-over-HTTP transport.
#[derive(Debug, Clone, Default)]
pub struct HttpEgress {
    client: reqwest::Client,
}

impl HttpEgress {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Egress for HttpEgress {
    async fn send(&self, config: &ForwarderConfig, record: &Record) -> Result<(), ProcessorError> {
        let mut req = self
            .client
            .post(&config.endpoint)
            .timeout(config.timeout)
            .json(record);
        for (k, v) in &config.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ProcessorError::Egress(format!("POST {}: {e}", config.endpoint)))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProcessorError::Egress(format!(
                "POST {} returned {status}",
                config.endpoint
            )));
        }
        Ok(())
    }
}

// ── ForwardClient ───────────────────────────────────────────────────────

/// One tenant's forwarding client.
pub struct ForwardClient {
    config: ForwarderConfig,
    egress: Arc<dyn Egress>,
    in_flight: AtomicUsize,
    closed: AtomicBool,
    stopped: AtomicBool,
    drained: Notify,
    sent: AtomicU64,
}

/// Decrements the in-flight count when a send finishes.
struct InFlight<'a>(&'a ForwardClient);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.drained.notify_waiters();
        }
    }
}

impl ForwardClient {
    pub fn new(config: ForwarderConfig, egress: Arc<dyn Egress>) -> Self {
        Self {
            config,
            egress,
            in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            drained: Notify::new(),
            sent: AtomicU64::new(0),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Forward one record, honoring the caller's cancellation and deadline.
    pub async fn send(&self, record: &Record, ctx: &ProcessContext) -> Result<(), ProcessorError> {
        // `send` bumps in_flight then reads closed; `stop` sets closed then
        // reads in_flight. Both sides need SeqCst so one always sees the other.
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight(self);
        if self.is_closed() {
            return Err(ProcessorError::Egress(format!(
                "client for {} is closed",
                self.config.endpoint
            )));
        }

        ctx.run(self.egress.send(&self.config, record)).await?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Refuse new sends and wait for in-flight ones. Calling it again is a
    /// no-op.
    pub async fn stop(&self) -> Result<(), ProcessorError> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.closed.store(true, Ordering::SeqCst);

        let drain = async {
            loop {
                let notified = self.drained.notified();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };

        match tokio::time::timeout(self.config.drain_timeout, drain).await {
            Ok(()) => {
                debug!(endpoint = %self.config.endpoint, sent = self.sent(), "forward client stopped");
                Ok(())
            }
            Err(_) => Err(ProcessorError::Release(format!(
                "{} sends to {} still in flight after {:?}",
                self.in_flight(),
                self.config.endpoint,
                self.config.drain_timeout
            ))),
        }
    }
}

// ── Forwarder ───────────────────────────────────────────────────────────

pub struct Forwarder {
    common: CommonProcessor,
    clients: TieredConfig<Arc<ForwardClient>>,
}

impl Forwarder {
    /// Forwarder over HTTP.
    pub fn new(raw: &Value, subs: &[SubConfig]) -> Result<Self, ProcessorError> {
        Self::with_egress(raw, subs, Arc::new(HttpEgress::default()))
    }

    /// Forwarder over a caller-supplied transport.
    pub fn with_egress(
        raw: &Value,
        subs: &[SubConfig],
        egress: Arc<dyn Egress>,
    ) -> Result<Self, ProcessorError> {
        let clients = decode_tiered::<ForwarderConfig>(NAME, raw, subs)?
            .map(|c| Arc::new(ForwardClient::new(c, Arc::clone(&egress))));
        info!(
            endpoint = %clients.global().endpoint(),
            tenants = clients.len(),
            "forwarder configured"
        );
        Ok(Self {
            common: CommonProcessor::new(raw, subs),
            clients,
        })
    }

    pub fn build(raw: &Value, subs: &[SubConfig]) -> Result<Arc<dyn Processor>, ProcessorError> {
        Ok(Arc::new(Self::new(raw, subs)?))
    }

    /// The client a record's token resolves to.
    pub fn client_for(&self, token: &Token) -> &Arc<ForwardClient> {
        self.clients.get_for(token)
    }
}

#[async_trait]
impl Processor for Forwarder {
    fn name(&self) -> &str {
        NAME
    }

    async fn process(&self, record: Record, ctx: &ProcessContext) -> Result<Flow, ProcessorError> {
        let client = Arc::clone(self.client_for(record.token()));
        client.send(&record, ctx).await?;
        Ok(Flow::Done)
    }

    fn main_config(&self) -> Option<&Value> {
        Some(self.common.main_config())
    }

    fn sub_configs(&self) -> &[SubConfig] {
        self.common.sub_configs()
    }

    async fn clean(&self) -> Result<(), ProcessorError> {
        let mut failed = 0usize;
        for client in self.clients.all() {
            if let Err(e) = client.stop().await {
                error!(endpoint = %client.endpoint(), error = %e, "failed to stop forward client");
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(ProcessorError::Release(format!(
                "{failed} forward client(s) did not drain"
            )));
        }
        Ok(())
    }
}

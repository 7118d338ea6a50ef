//! Terminal sinks.
//!
//! A [`Publisher`] receives every record that reaches the end of the chain.
//! Publishing is fire-and-observe: a sink that cannot take a record reports
//! it through its own counters and logs, never back to the submitter.

use std::sync::atomic::{AtomicU64, Ordering};

use strata_types::Record;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{trace, warn};

/// Hand-off point to egress.
pub trait Publisher: Send + Sync {
    fn publish(&self, record: Record);
}

/// Pushes records into a bounded tokio channel.
///
/// A full or closed channel drops the record and bumps the drop counter.
#[derive(Debug)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<Record>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl ChannelPublisher {
    /// A publisher and the receiving end of its channel.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Record>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Publisher for ChannelPublisher {
    fn publish(&self, record: Record) {
        let id = record.id();
        match self.tx.try_send(record) {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(record_id = %id, "sink channel full (backpressure), record dropped");
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(record_id = %id, "sink channel closed, record dropped");
            }
        }
    }
}

/// Closure-backed sink.
pub struct FnPublisher<F>(F);

impl<F> FnPublisher<F>
where
    F: Fn(Record) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Publisher for FnPublisher<F>
where
    F: Fn(Record) + Send + Sync,
{
    fn publish(&self, record: Record) {
        (self.0)(record)
    }
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl Publisher for NoopPublisher {
    fn publish(&self, record: Record) {
        trace!(record_id = %record.id(), "discarding record");
    }
}

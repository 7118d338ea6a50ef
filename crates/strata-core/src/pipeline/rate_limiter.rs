//! Sliding-window rate limiter with per-token and global limits.
//!
//! Two checks run for every record:
//! 1. **Global limit** -- caps records per window across all tokens.
//! 2. **Per-token limit** -- caps records per window for one tenant token.
//!
//! Per-token windows live in a [`DashMap`], so tenants hashing to different
//! shards never contend. The global window is a single counter guarded by a
//! short mutex for the read-check-reset step.
//!
//! # Algorithm
//!
//! Each accepted record's `Instant` is appended to its token's window. On
//! every check, timestamps older than the window are pruned; if the
//! remaining count is at the limit the record is refused.
//!
//! # Eviction
//!
//! When more than `max_tracked_tokens` windows exist, the least recently
//! used one is dropped. This bounds memory for deployments with many
//! short-lived tenants.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Which limit refused a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    Global,
    Token,
}

impl std::fmt::Display for LimitScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Global => "global",
            Self::Token => "token",
        })
    }
}

struct SlidingWindow {
    /// Accepted timestamps, oldest first.
    timestamps: Vec<Instant>,
    /// Access counter value at last use.
    last_access: u64,
}

struct GlobalWindow {
    started: Instant,
    count: u64,
}

/// Sliding-window limiter keyed by tenant token.
pub struct RateLimiter {
    windows: DashMap<String, SlidingWindow>,
    window: Duration,
    per_token_limit: u32,
    global_limit: u32,
    global: Mutex<GlobalWindow>,
    max_tracked_tokens: usize,
    access_counter: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter. A limit of 0 disables that check.
    pub fn new(window_seconds: u32, per_token_limit: u32, global_limit: u32) -> Self {
        Self {
            windows: DashMap::new(),
            window: Duration::from_secs(u64::from(window_seconds.max(1))),
            per_token_limit,
            global_limit,
            global: Mutex::new(GlobalWindow {
                started: Instant::now(),
                count: 0,
            }),
            max_tracked_tokens: 10_000,
            access_counter: AtomicU64::new(0),
        }
    }

    pub fn with_max_tracked_tokens(mut self, max: usize) -> Self {
        self.max_tracked_tokens = max.max(1);
        self
    }

    /// Record one request for `token`, or say which limit refuses it.
    ///
    /// The global limit is checked first. A record refused by the per-token
    /// limit still counts against the global window.
    pub fn check(&self, token: &str) -> Result<(), LimitScope> {
        if !self.check_global() {
            return Err(LimitScope::Global);
        }
        if self.per_token_limit == 0 {
            return Ok(());
        }

        let now = Instant::now();
        let order = self.access_counter.fetch_add(1, Ordering::Relaxed);

        let allowed = {
            let mut entry = self
                .windows
                .entry(token.to_owned())
                .or_insert_with(|| SlidingWindow {
                    timestamps: Vec::new(),
                    last_access: order,
                });
            entry.last_access = order;
            let window = self.window;
            entry
                .timestamps
                .retain(|ts| now.duration_since(*ts) < window);

            if entry.timestamps.len() >= self.per_token_limit as usize {
                false
            } else {
                entry.timestamps.push(now);
                true
            }
        };

        if self.windows.len() > self.max_tracked_tokens {
            self.evict_oldest();
        }

        if allowed { Ok(()) } else { Err(LimitScope::Token) }
    }

    fn check_global(&self) -> bool {
        if self.global_limit == 0 {
            return true;
        }
        let now = Instant::now();
        let mut global = self
            .global
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if now.duration_since(global.started) >= self.window {
            global.started = now;
            global.count = 0;
        }
        if global.count >= u64::from(self.global_limit) {
            return false;
        }
        global.count += 1;
        true
    }

    /// Accepted records for `token` within the current window.
    pub fn count(&self, token: &str) -> usize {
        let now = Instant::now();
        self.windows.get(token).map_or(0, |entry| {
            entry
                .timestamps
                .iter()
                .filter(|ts| now.duration_since(**ts) < self.window)
                .count()
        })
    }

    pub fn tracked_tokens(&self) -> usize {
        self.windows.len()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn evict_oldest(&self) {
        let oldest = self
            .windows
            .iter()
            .min_by_key(|entry| entry.value().last_access)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.windows.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn allows_under_limit() {
        let limiter = RateLimiter::new(60, 10, 0);
        for _ in 0..10 {
            assert!(limiter.check("abc").is_ok());
        }
        assert_eq!(limiter.count("abc"), 10);
    }

    #[test]
    fn rejects_at_limit() {
        let limiter = RateLimiter::new(60, 5, 0);
        for _ in 0..5 {
            limiter.check("abc").unwrap();
        }
        assert_eq!(limiter.check("abc"), Err(LimitScope::Token));
    }

    #[test]
    fn window_expiry() {
        let limiter = RateLimiter::new(1, 2, 0);
        limiter.check("abc").unwrap();
        limiter.check("abc").unwrap();
        assert!(limiter.check("abc").is_err());

        thread::sleep(Duration::from_millis(1100));
        assert!(limiter.check("abc").is_ok());
    }

    #[test]
    fn global_limit_applies_across_tokens() {
        let limiter = RateLimiter::new(60, 0, 3);
        for i in 0..3 {
            limiter.check(&format!("t{i}")).unwrap();
        }
        assert_eq!(limiter.check("fresh"), Err(LimitScope::Global));
    }

    #[test]
    fn zero_per_token_limit_tracks_nothing() {
        let limiter = RateLimiter::new(60, 0, 0);
        for _ in 0..1000 {
            limiter.check("abc").unwrap();
        }
        assert_eq!(limiter.tracked_tokens(), 0);
    }

    #[test]
    fn tokens_are_independent() {
        let limiter = RateLimiter::new(60, 2, 0);
        limiter.check("a").unwrap();
        limiter.check("a").unwrap();
        assert!(limiter.check("a").is_err());
        assert!(limiter.check("b").is_ok());
    }

    #[test]
    fn evicts_least_recently_used() {
        let limiter = RateLimiter::new(60, 5, 0).with_max_tracked_tokens(2);
        limiter.check("a").unwrap();
        limiter.check("b").unwrap();
        limiter.check("a").unwrap();
        limiter.check("c").unwrap();

        assert_eq!(limiter.tracked_tokens(), 2);
        assert_eq!(limiter.count("b"), 0);
        assert_eq!(limiter.count("a"), 2);
    }

    #[test]
    fn concurrent_checks_respect_limit() {
        let limiter = Arc::new(RateLimiter::new(60, 50, 0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                thread::spawn(move || (0..20).filter(|_| limiter.check("abc").is_ok()).count())
            })
            .collect();
        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(accepted, 50);
    }
}

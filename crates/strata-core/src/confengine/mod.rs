//! Tiered configuration: one global value plus tenant-scoped overrides.
//!
//! Every stage resolves its per-record settings through a [`TieredConfig`].
//! Overrides are keyed by the full `(token, scope_type, scope_id)` triple and
//! there is no partial matching: a lookup either hits that exact key or falls
//! back to the global value. An empty token means "no override requested".
//!
//! Tables are filled at pipeline build time and only read afterwards, so the
//! read path takes no locks. A reload builds a new table.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value;
use strata_types::Token;
use strata_types::config::SubConfig;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TierKey {
    token: String,
    scope_type: String,
    scope_id: String,
}

impl TierKey {
    fn new(token: &str, scope_type: &str, scope_id: &str) -> Self {
        Self {
            token: token.to_owned(),
            scope_type: scope_type.to_owned(),
            scope_id: scope_id.to_owned(),
        }
    }
}

/// A global value plus overrides keyed by tenant scope.
#[derive(Debug, Clone)]
pub struct TieredConfig<T> {
    global: T,
    tiers: HashMap<TierKey, T>,
}

impl<T> TieredConfig<T> {
    /// A table holding only the mandatory global value.
    pub fn new(global: T) -> Self {
        Self {
            global,
            tiers: HashMap::new(),
        }
    }

    /// Replace the global value.
    pub fn set_global(&mut self, value: T) {
        self.global = value;
    }

    pub fn global(&self) -> &T {
        &self.global
    }

    /// Install an override. The last write for an identical key wins.
    pub fn set(&mut self, token: &str, scope_type: &str, scope_id: &str, value: T) {
        self.tiers
            .insert(TierKey::new(token, scope_type, scope_id), value);
    }

    /// Resolve the value for a scope. Never fails: a miss yields the global.
    pub fn get(&self, token: &str, scope_type: &str, scope_id: &str) -> &T {
        if token.is_empty() || self.tiers.is_empty() {
            return &self.global;
        }
        self.tiers
            .get(&TierKey::new(token, scope_type, scope_id))
            .unwrap_or(&self.global)
    }

    /// Resolve by token alone (empty scope pair).
    pub fn get_by_token(&self, token: &str) -> &T {
        self.get(token, "", "")
    }

    /// Resolve for a record's token, including its derived scope.
    pub fn get_for(&self, token: &Token) -> &T {
        self.get(token.original(), token.scope_type(), token.scope_id())
    }

    /// The global value followed by every override, in no particular order.
    pub fn all(&self) -> impl Iterator<Item = &T> {
        std::iter::once(&self.global).chain(self.tiers.values())
    }

    /// Number of installed overrides (the global value is not counted).
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Convert every value, keeping the key layout.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> TieredConfig<U> {
        TieredConfig {
            global: f(self.global),
            tiers: self.tiers.into_iter().map(|(k, v)| (k, f(v))).collect(),
        }
    }
}

impl<T: Default> Default for TieredConfig<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Decode a stage's raw configuration and its tenant overrides.
///
/// A `null` raw config decodes as an empty object, so stages whose fields
/// all have defaults need no config block. A global decode failure is
/// returned to the caller. An override that fails to decode is logged and
/// skipped; the remaining overrides are still installed.
pub fn decode_tiered<T: DeserializeOwned>(
    stage: &str,
    raw: &Value,
    overrides: &[SubConfig],
) -> Result<TieredConfig<T>, serde_json::Error> {
    let mut table = TieredConfig::new(decode_value(raw)?);

    for sub in overrides {
        match decode_value::<T>(&sub.config) {
            Ok(value) => {
                debug!(
                    stage,
                    token = %sub.token,
                    scope_type = %sub.scope_type,
                    scope_id = %sub.scope_id,
                    "installed tenant override"
                );
                table.set(&sub.token, &sub.scope_type, &sub.scope_id, value);
            }
            Err(e) => {
                error!(
                    stage,
                    token = %sub.token,
                    scope_type = %sub.scope_type,
                    scope_id = %sub.scope_id,
                    error = %e,
                    "skipping tenant override that failed to decode"
                );
            }
        }
    }

    Ok(table)
}

fn decode_value<T: DeserializeOwned>(raw: &Value) -> Result<T, serde_json::Error> {
    match raw {
        Value::Null => serde_json::from_value(Value::Object(Default::default())),
        other => T::deserialize(other),
    }
}

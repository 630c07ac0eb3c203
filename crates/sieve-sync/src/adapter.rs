//! Boundaries to the world outside the compiler.
//!
//! The rule engine enforces rules out-of-process, storage persists state
//! across restarts and the fetcher supplies raw list text. All three are
//! opaque async calls; nothing is assumed about their relative ordering
//! unless the caller awaits them in sequence.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::{Map, Value};

use sieve_core::ids::Tier;
use sieve_core::types::RuleId;

use crate::error::{EngineError, FetchError, StorageError};
use crate::reconciler::RuleDiff;

/// Declarative rule engine that actually enforces rules.
#[async_trait]
pub trait RuleEngine: Send + Sync {
    /// Ids currently active in `tier`.
    async fn active_rule_ids(&self, tier: &Tier) -> Result<BTreeSet<RuleId>, EngineError>;

    /// Apply removals then additions. Either the whole diff applies or none of it.
    async fn apply_rule_diff(&self, tier: &Tier, diff: &RuleDiff) -> Result<(), EngineError>;

    async fn set_tier_enabled(&self, tier: &Tier, enabled: bool) -> Result<(), EngineError>;
}

/// Persistent key-value storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Values for the requested keys; absent keys are omitted.
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StorageError>;

    async fn set(&self, items: Map<String, Value>) -> Result<(), StorageError>;
}

/// Source of raw filter list text.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError>;
}

/// Wall clock in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// The set of collaborators a [`crate::Blocker`] talks to.
#[derive(Clone)]
pub struct Adapters {
    pub engine: Arc<dyn RuleEngine>,
    pub storage: Arc<dyn KeyValueStore>,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub clock: Arc<dyn Clock>,
}

impl Adapters {
    pub fn new(
        engine: Arc<dyn RuleEngine>,
        storage: Arc<dyn KeyValueStore>,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Self {
        Self {
            engine,
            storage,
            fetcher,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

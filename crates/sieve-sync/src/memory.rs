//! In-memory adapters, used by tests and by the CLI's dry runs.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use sieve_core::ids::Tier;
use sieve_core::types::{Rule, RuleId};

use crate::adapter::{Clock, KeyValueStore, RuleEngine, SourceFetcher};
use crate::error::{EngineError, FetchError, StorageError};
use crate::reconciler::RuleDiff;

#[derive(Debug, Default)]
struct EngineState {
    rules: HashMap<Tier, BTreeMap<RuleId, Rule>>,
    disabled: HashSet<Tier>,
    failures_left: u32,
    apply_calls: usize,
}

impl EngineState {
    fn take_failure(&mut self) -> Result<(), EngineError> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(EngineError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

/// Rule engine that keeps rules in memory and applies diffs atomically.
#[derive(Debug, Default)]
pub struct MemoryRuleEngine {
    state: Mutex<EngineState>,
}

impl MemoryRuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` engine calls fail with [`EngineError::Unavailable`].
    pub fn fail_next(&self, n: u32) {
        self.state.lock().failures_left = n;
    }

    /// Active rules of `tier` in id order.
    pub fn rules(&self, tier: &Tier) -> Vec<Rule> {
        self.state
            .lock()
            .rules
            .get(tier)
            .map(|rules| rules.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_enabled(&self, tier: &Tier) -> bool {
        !self.state.lock().disabled.contains(tier)
    }

    /// Number of successful diff applications.
    pub fn apply_calls(&self) -> usize {
        self.state.lock().apply_calls
    }
}

#[async_trait]
impl RuleEngine for MemoryRuleEngine {
    async fn active_rule_ids(&self, tier: &Tier) -> Result<BTreeSet<RuleId>, EngineError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        Ok(state
            .rules
            .get(tier)
            .map(|rules| rules.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn apply_rule_diff(&self, tier: &Tier, diff: &RuleDiff) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.take_failure()?;

        let mut next = state.rules.get(tier).cloned().unwrap_or_default();
        for id in &diff.remove {
            next.remove(id);
        }
        for rule in &diff.add {
            if next.insert(rule.id, rule.clone()).is_some() {
                return Err(EngineError::Rejected(format!(
                    "rule id {} already active in {}",
                    rule.id, tier
                )));
            }
        }

        state.rules.insert(tier.clone(), next);
        state.apply_calls += 1;
        Ok(())
    }

    async fn set_tier_enabled(&self, tier: &Tier, enabled: bool) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        if enabled {
            state.disabled.remove(tier);
        } else {
            state.disabled.insert(tier.clone());
        }
        Ok(())
    }
}

/// Key-value storage backed by a JSON map.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    items: Mutex<Map<String, Value>>,
    write_failures: Mutex<u32>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: Map<String, Value>) -> Self {
        Self {
            items: Mutex::new(items),
            write_failures: Mutex::new(0),
        }
    }

    /// Make the next `n` writes fail with [`StorageError::Backend`] and
    /// leave the stored items untouched.
    pub fn fail_writes(&self, n: u32) {
        *self.write_failures.lock() = n;
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.items.lock().clone()
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        self.items.lock().get(key).cloned()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StorageError> {
        let items = self.items.lock();
        Ok(keys
            .iter()
            .filter_map(|key| items.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, items: Map<String, Value>) -> Result<(), StorageError> {
        {
            let mut failures = self.write_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(StorageError::Backend("injected write failure".into()));
            }
        }
        self.items.lock().extend(items);
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Source {
    Text(String),
    Status(u16),
}

/// Fetcher serving canned responses keyed by URL.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    sources: Mutex<HashMap<String, Source>>,
    fetches: Mutex<HashMap<String, usize>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(self, url: &str, text: &str) -> Self {
        self.set_text(url, text);
        self
    }

    pub fn set_text(&self, url: &str, text: &str) {
        self.sources
            .lock()
            .insert(url.to_string(), Source::Text(text.to_string()));
    }

    /// Answer `url` with an HTTP error status.
    pub fn set_status(&self, url: &str, status: u16) {
        self.sources
            .lock()
            .insert(url.to_string(), Source::Status(status));
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetches.lock().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl SourceFetcher for StaticFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        *self.fetches.lock().entry(url.to_string()).or_default() += 1;

        match self.sources.lock().get(url).cloned() {
            Some(Source::Text(text)) => Ok(text),
            Some(Source::Status(status)) => Err(FetchError::Status {
                url: url.to_string(),
                status,
            }),
            None => Err(FetchError::NotFound(url.to_string())),
        }
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

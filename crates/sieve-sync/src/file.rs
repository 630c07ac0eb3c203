//! Adapters backed by JSON files on disk.
//!
//! `JsonFileStore` keeps every key in one JSON object file. `RulesetDirEngine`
//! writes one `<ruleset>.json` array of rules per tier, in the wire shape a
//! browser extension would bundle, plus `enabled.json` for ruleset toggles.

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use sieve_core::ids::Tier;
use sieve_core::types::{Rule, RuleId};

use crate::adapter::{KeyValueStore, RuleEngine};
use crate::error::{EngineError, StorageError};
use crate::reconciler::RuleDiff;

const ENABLED_FILE: &str = "enabled.json";

async fn read_json<T: DeserializeOwned + Default>(path: &Path) -> std::io::Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write `value` next to `path` and rename over it, so readers never see a
/// partial file.
async fn write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Key-value storage persisted as a single JSON object.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    cache: Mutex<Option<Map<String, Value>>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self, cache: &mut Option<Map<String, Value>>) -> Result<(), StorageError> {
        if cache.is_none() {
            let items = read_json(&self.path).await?.unwrap_or_default();
            *cache = Some(items);
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StorageError> {
        let mut cache = self.cache.lock().await;
        self.load(&mut cache).await?;
        let items = cache.as_ref().ok_or_else(|| StorageError::Backend("cache not loaded".into()))?;

        Ok(keys
            .iter()
            .filter_map(|key| items.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, items: Map<String, Value>) -> Result<(), StorageError> {
        let mut cache = self.cache.lock().await;
        self.load(&mut cache).await?;

        let mut next = cache.clone().unwrap_or_default();
        next.extend(items);
        write_json(&self.path, &next).await?;
        *cache = Some(next);
        Ok(())
    }
}

/// Rule engine that materializes each tier as a JSON ruleset file.
#[derive(Debug)]
pub struct RulesetDirEngine {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl RulesetDirEngine {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn ruleset_path(&self, tier: &Tier) -> PathBuf {
        self.dir.join(format!("{}.json", tier.ruleset_id()))
    }

    /// Rules currently written for `tier`, in id order.
    pub async fn rules(&self, tier: &Tier) -> Result<Vec<Rule>, EngineError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_ruleset(tier).await?.into_values().collect())
    }

    pub async fn is_enabled(&self, tier: &Tier) -> Result<bool, EngineError> {
        let _guard = self.lock.lock().await;
        let enabled = self.read_enabled().await?;
        Ok(enabled.get(tier.ruleset_id()).copied().unwrap_or(true))
    }

    async fn read_ruleset(&self, tier: &Tier) -> Result<BTreeMap<RuleId, Rule>, EngineError> {
        let rules: Vec<Rule> = read_json(&self.ruleset_path(tier)).await?.unwrap_or_default();
        Ok(rules.into_iter().map(|rule| (rule.id, rule)).collect())
    }

    async fn read_enabled(&self) -> Result<BTreeMap<String, bool>, EngineError> {
        Ok(read_json(&self.dir.join(ENABLED_FILE)).await?.unwrap_or_default())
    }
}

#[async_trait]
impl RuleEngine for RulesetDirEngine {
    async fn active_rule_ids(&self, tier: &Tier) -> Result<BTreeSet<RuleId>, EngineError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_ruleset(tier).await?.into_keys().collect())
    }

    async fn apply_rule_diff(&self, tier: &Tier, diff: &RuleDiff) -> Result<(), EngineError> {
        let _guard = self.lock.lock().await;
        let mut rules = self.read_ruleset(tier).await?;
        for id in &diff.remove {
            rules.remove(id);
        }
        for rule in &diff.add {
            if rules.insert(rule.id, rule.clone()).is_some() {
                return Err(EngineError::Rejected(format!(
                    "rule id {} already active in {}",
                    rule.id, tier
                )));
            }
        }

        let rules: Vec<&Rule> = rules.values().collect();
        write_json(&self.ruleset_path(tier), &rules).await?;
        debug!("wrote {} rules to {}", rules.len(), self.ruleset_path(tier).display());
        Ok(())
    }

    async fn set_tier_enabled(&self, tier: &Tier, enabled: bool) -> Result<(), EngineError> {
        let _guard = self.lock.lock().await;
        let mut states = self.read_enabled().await?;
        states.insert(tier.ruleset_id().to_string(), enabled);
        write_json(&self.dir.join(ENABLED_FILE), &states).await?;
        Ok(())
    }
}

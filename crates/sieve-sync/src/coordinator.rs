//! Static filter list refresh.
//!
//! The coordinator owns the per-list bookkeeping (`last_update`, source
//! fingerprint, enabled flag) and drives fetch, compile, store and engine
//! sync for each list independently. A list that fails leaves its previous
//! rules and timestamp untouched; the other lists still advance.

use std::collections::HashMap;
use std::hash::Hasher;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use twox_hash::XxHash64;

use sieve_compiler::compile_filter_list;
use sieve_core::ids::{IdRange, Tier};

use crate::adapter::{Adapters, KeyValueStore};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::reconciler::{set_tier_enabled, sync_tier};
use crate::retry::RetryPolicy;
use crate::store::RuleStore;

pub const FILTER_LIST_STATE_KEY: &str = "filterListState";
pub const LAST_FILTER_UPDATE_KEY: &str = "lastFilterUpdate";

/// A static filter list and its refresh state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterList {
    pub id: String,
    pub name: String,
    pub url: Option<String>,
    pub enabled: bool,
    /// Milliseconds since the epoch of the last successful refresh
    pub last_update: Option<u64>,
    /// xxHash64 of the source text last compiled
    pub fingerprint: Option<u64>,
    pub window: IdRange,
}

impl FilterList {
    pub fn tier(&self) -> Tier {
        Tier::static_list(self.id.as_str())
    }
}

/// Persisted subset of [`FilterList`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListState {
    enabled: Option<bool>,
    last_update: Option<u64>,
    fingerprint: Option<u64>,
}

/// Outcome of one refresh pass, per list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub succeeded: Vec<String>,
    /// `(list id, reason)` for each list that failed
    pub failed: Vec<(String, String)>,
    pub skipped: Vec<String>,
    /// Set when the lists refreshed but their state could not be saved
    pub persist_error: Option<String>,
}

impl RefreshReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.persist_error.is_none()
    }
}

/// xxHash64 of a list's source text.
pub fn fingerprint(text: &str) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(text.as_bytes());
    hasher.finish()
}

#[derive(Debug)]
pub struct FilterListCoordinator {
    lists: Vec<FilterList>,
    refresh_interval: Duration,
    retry: RetryPolicy,
    suspended: bool,
}

impl FilterListCoordinator {
    pub fn new(config: &SyncConfig) -> Self {
        let lists = config
            .lists
            .iter()
            .map(|list| FilterList {
                id: list.id.clone(),
                name: list.name.clone(),
                url: list.url.clone(),
                enabled: list.enabled,
                last_update: None,
                fingerprint: None,
                window: list.window(),
            })
            .collect();

        Self {
            lists,
            refresh_interval: config.refresh_interval(),
            retry: config.retry,
            suspended: false,
        }
    }

    /// Confine each list's tier in `store` to its id window.
    pub fn register_windows(&self, store: &mut RuleStore) {
        for list in &self.lists {
            store.register_static_list(&list.id, list.window);
        }
    }

    pub fn lists(&self) -> &[FilterList] {
        &self.lists
    }

    pub fn list(&self, id: &str) -> Option<&FilterList> {
        self.lists.iter().find(|list| list.id == id)
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub fn is_due(&self, list: &FilterList, now_ms: u64) -> bool {
        match list.last_update {
            None => true,
            Some(last) => {
                let elapsed = u128::from(now_ms.saturating_sub(last));
                elapsed > self.refresh_interval.as_millis()
            }
        }
    }

    /// Restore per-list state persisted by an earlier run. Unknown or
    /// malformed entries are ignored.
    pub async fn load_state(&mut self, storage: &dyn KeyValueStore) -> Result<()> {
        let mut items = storage.get(&[FILTER_LIST_STATE_KEY]).await?;
        let Some(raw) = items.remove(FILTER_LIST_STATE_KEY) else {
            return Ok(());
        };

        let states: HashMap<String, ListState> = match serde_json::from_value(raw) {
            Ok(states) => states,
            Err(e) => {
                warn!("ignoring malformed {}: {}", FILTER_LIST_STATE_KEY, e);
                return Ok(());
            }
        };

        for list in &mut self.lists {
            if let Some(state) = states.get(&list.id) {
                list.enabled = state.enabled.unwrap_or(list.enabled);
                list.last_update = state.last_update;
                list.fingerprint = state.fingerprint;
            }
        }
        debug!("restored state for {} filter lists", states.len());
        Ok(())
    }

    pub async fn persist_state(&self, storage: &dyn KeyValueStore) -> Result<()> {
        let states: HashMap<&str, ListState> = self
            .lists
            .iter()
            .map(|list| {
                let state = ListState {
                    enabled: Some(list.enabled),
                    last_update: list.last_update,
                    fingerprint: list.fingerprint,
                };
                (list.id.as_str(), state)
            })
            .collect();

        let mut items = Map::new();
        items.insert(
            FILTER_LIST_STATE_KEY.to_string(),
            serde_json::to_value(&states).map_err(crate::error::StorageError::from)?,
        );
        if let Some(latest) = self.lists.iter().filter_map(|l| l.last_update).max() {
            items.insert(LAST_FILTER_UPDATE_KEY.to_string(), Value::from(latest));
        }
        storage.set(items).await?;
        Ok(())
    }

    /// Whether `list` must be fetched now: its interval has elapsed, or its
    /// tier has not been loaded into `store` since start-up.
    pub fn needs_refresh(&self, list: &FilterList, store: &RuleStore, now_ms: u64) -> bool {
        !store.has_tier(&list.tier()) || self.is_due(list, now_ms)
    }

    /// Refresh every list that has a source URL and needs it, or all of
    /// them when `force` is set.
    ///
    /// A failure to save the list state afterwards is reported in
    /// [`RefreshReport::persist_error`]; the per-list outcome is kept.
    pub async fn refresh(
        &mut self,
        store: &mut RuleStore,
        adapters: &Adapters,
        force: bool,
    ) -> Result<RefreshReport> {
        let now = adapters.clock.now_ms();
        let mut report = RefreshReport::default();

        for index in 0..self.lists.len() {
            let list = &self.lists[index];
            let Some(url) = list.url.clone() else {
                report.skipped.push(list.id.clone());
                continue;
            };
            if !force && !self.needs_refresh(list, store, now) {
                debug!("{} is up to date", list.id);
                report.skipped.push(list.id.clone());
                continue;
            }

            let id = list.id.clone();
            match self.refresh_list(index, &url, store, adapters).await {
                Ok(hash) => {
                    let list = &mut self.lists[index];
                    list.last_update = Some(now);
                    list.fingerprint = Some(hash);
                    report.succeeded.push(id);
                }
                Err(e) => {
                    warn!("failed to refresh {}: {}", id, e);
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        if !report.succeeded.is_empty() {
            if let Err(e) = self.persist_state(adapters.storage.as_ref()).await {
                warn!("could not save filter list state: {}", e);
                report.persist_error = Some(e.to_string());
            }
        }
        info!(
            "filter list refresh: {} updated, {} failed, {} skipped",
            report.succeeded.len(),
            report.failed.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    async fn refresh_list(
        &self,
        index: usize,
        url: &str,
        store: &mut RuleStore,
        adapters: &Adapters,
    ) -> std::result::Result<u64, RefreshFailure> {
        let list = &self.lists[index];
        let tier = list.tier();

        let text = adapters.fetcher.fetch_text(url).await?;
        let hash = fingerprint(&text);
        if list.fingerprint == Some(hash) && store.count(&tier) > 0 {
            info!("{} unchanged, keeping {} rules", list.id, store.count(&tier));
            return Ok(hash);
        }

        let compiled = compile_filter_list(&text, list.window);
        info!(
            "compiled {}: {} rules from {} lines ({} rejected, {} duplicates)",
            list.id,
            compiled.stats.rules,
            compiled.stats.lines,
            compiled.stats.rejected(),
            compiled.stats.duplicates
        );

        let was_loaded = store.has_tier(&tier);
        let previous = store.replace_all(&tier, compiled.rules)?;
        let desired = store.rules(&tier);
        if let Err(e) = sync_tier(adapters.engine.as_ref(), &tier, &desired, &self.retry).await {
            if !was_loaded {
                store.drop_tier(&tier);
            } else if let Err(restore) = store.replace_all(&tier, previous) {
                warn!("could not restore previous {} rules: {}", tier, restore);
            }
            return Err(e.into());
        }
        Ok(hash)
    }

    /// Enable or disable one list in the engine without recompiling it.
    pub async fn set_list_enabled(
        &mut self,
        id: &str,
        enabled: bool,
        adapters: &Adapters,
    ) -> Result<()> {
        let index = self
            .lists
            .iter()
            .position(|list| list.id == id)
            .ok_or_else(|| SyncError::UnknownList(id.to_string()))?;

        if !self.suspended {
            let tier = self.lists[index].tier();
            set_tier_enabled(adapters.engine.as_ref(), &tier, enabled, &self.retry).await?;
        }
        self.lists[index].enabled = enabled;
        self.persist_state(adapters.storage.as_ref()).await
    }

    /// Turn all lists off in the engine, or back on to their own flags.
    pub async fn set_suspended(&mut self, suspended: bool, adapters: &Adapters) -> Result<()> {
        for list in &self.lists {
            let enabled = list.enabled && !suspended;
            set_tier_enabled(adapters.engine.as_ref(), &list.tier(), enabled, &self.retry).await?;
        }
        self.suspended = suspended;
        Ok(())
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }
}

/// Why a single list failed to refresh.
#[derive(Debug, thiserror::Error)]
enum RefreshFailure {
    #[error("fetch failed: {0}")]
    Fetch(#[from] crate::error::FetchError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Store(#[from] crate::error::StoreError),
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::FilterListConfig;
    use crate::memory::{ManualClock, MemoryKeyValueStore, MemoryRuleEngine, StaticFetcher};

    use super::*;

    const DAY_MS: u64 = 24 * 60 * 60 * 1000;

    struct Harness {
        engine: Arc<MemoryRuleEngine>,
        storage: Arc<MemoryKeyValueStore>,
        fetcher: Arc<StaticFetcher>,
        clock: Arc<ManualClock>,
        adapters: Adapters,
    }

    fn harness() -> Harness {
        let engine = Arc::new(MemoryRuleEngine::new());
        let storage = Arc::new(MemoryKeyValueStore::new());
        let fetcher = Arc::new(
            StaticFetcher::new()
                .with_text("mem://a", "||ads.example.com^\n/banner/*\n")
                .with_text("mem://b", "||tracker.example.net^\n"),
        );
        let clock = Arc::new(ManualClock::new(DAY_MS * 10));
        let adapters = Adapters::new(engine.clone(), storage.clone(), fetcher.clone())
            .with_clock(clock.clone());
        Harness {
            engine,
            storage,
            fetcher,
            clock,
            adapters,
        }
    }

    fn config() -> SyncConfig {
        let list = |id: &str, url: Option<&str>, base: u32| FilterListConfig {
            id: id.into(),
            name: id.to_uppercase(),
            url: url.map(str::to_string),
            enabled: true,
            id_base: base,
            capacity: 1_000,
        };
        SyncConfig {
            lists: vec![
                list("a", Some("mem://a"), 1),
                list("b", Some("mem://b"), 50_000),
                list("bundled", None, 90_000),
            ],
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 1,
                max_delay_ms: 1,
            },
            ..SyncConfig::default()
        }
    }

    fn setup() -> (FilterListCoordinator, RuleStore) {
        let coordinator = FilterListCoordinator::new(&config());
        let mut store = RuleStore::default();
        coordinator.register_windows(&mut store);
        (coordinator, store)
    }

    #[test]
    fn due_only_after_interval_elapses() {
        let (coordinator, _) = setup();
        let mut list = coordinator.lists()[0].clone();
        assert!(coordinator.is_due(&list, 0));

        list.last_update = Some(1_000);
        assert!(!coordinator.is_due(&list, 1_000 + DAY_MS));
        assert!(coordinator.is_due(&list, 1_001 + DAY_MS));
    }

    #[tokio::test]
    async fn refresh_compiles_into_list_windows() {
        let h = harness();
        let (mut coordinator, mut store) = setup();

        let report = coordinator.refresh(&mut store, &h.adapters, false).await.unwrap();
        assert_eq!(report.succeeded, vec!["a", "b"]);
        assert_eq!(report.skipped, vec!["bundled"]);
        assert!(report.is_complete());

        let a: Vec<_> = h.engine.rules(&Tier::static_list("a")).iter().map(|r| r.id).collect();
        assert_eq!(a, vec![1, 2]);
        let b: Vec<_> = h.engine.rules(&Tier::static_list("b")).iter().map(|r| r.id).collect();
        assert_eq!(b, vec![50_000]);
        assert_eq!(coordinator.list("a").unwrap().last_update, Some(DAY_MS * 10));
        assert_eq!(
            h.storage.value(LAST_FILTER_UPDATE_KEY),
            Some(Value::from(DAY_MS * 10))
        );
    }

    #[tokio::test]
    async fn failed_list_keeps_its_timestamp() {
        let h = harness();
        let (mut coordinator, mut store) = setup();
        coordinator.refresh(&mut store, &h.adapters, false).await.unwrap();
        let first = DAY_MS * 10;

        h.clock.advance(Duration::from_millis(DAY_MS + 1));
        h.fetcher.set_status("mem://b", 500);
        h.fetcher.set_text("mem://a", "||other.example.com^\n");

        let report = coordinator.refresh(&mut store, &h.adapters, false).await.unwrap();
        assert_eq!(report.succeeded, vec!["a"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "b");

        assert_eq!(coordinator.list("a").unwrap().last_update, Some(first + DAY_MS + 1));
        assert_eq!(coordinator.list("b").unwrap().last_update, Some(first));
        assert_eq!(store.count(&Tier::static_list("b")), 1);
        assert_eq!(h.engine.rules(&Tier::static_list("a")).len(), 1);
    }

    #[tokio::test]
    async fn not_due_lists_are_skipped_unless_forced() {
        let h = harness();
        let (mut coordinator, mut store) = setup();
        coordinator.refresh(&mut store, &h.adapters, false).await.unwrap();

        let report = coordinator.refresh(&mut store, &h.adapters, false).await.unwrap();
        assert!(report.succeeded.is_empty());
        assert_eq!(h.fetcher.fetch_count("mem://a"), 1);

        let report = coordinator.refresh(&mut store, &h.adapters, true).await.unwrap();
        assert_eq!(report.succeeded, vec!["a", "b"]);
        assert_eq!(h.fetcher.fetch_count("mem://a"), 2);
    }

    #[tokio::test]
    async fn unchanged_source_skips_engine_update() {
        let h = harness();
        let (mut coordinator, mut store) = setup();
        coordinator.refresh(&mut store, &h.adapters, false).await.unwrap();
        let applied = h.engine.apply_calls();

        coordinator.refresh(&mut store, &h.adapters, true).await.unwrap();
        assert_eq!(h.engine.apply_calls(), applied);
    }

    #[tokio::test]
    async fn engine_failure_restores_previous_rules() {
        let h = harness();
        let (mut coordinator, mut store) = setup();
        coordinator.refresh(&mut store, &h.adapters, false).await.unwrap();
        let before = store.rules(&Tier::static_list("a"));

        h.fetcher.set_text("mem://a", "||new.example.com^\n");
        h.engine.fail_next(100);
        let report = coordinator.refresh(&mut store, &h.adapters, true).await.unwrap();
        h.engine.fail_next(0);

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "a");
        assert_eq!(report.succeeded, vec!["b"]);
        assert_eq!(store.rules(&Tier::static_list("a")), before);
        assert_eq!(h.engine.rules(&Tier::static_list("a")).len(), 2);
    }

    #[tokio::test]
    async fn restart_reloads_lists_that_are_not_due() {
        let h = harness();
        let (mut coordinator, mut store) = setup();
        coordinator.refresh(&mut store, &h.adapters, false).await.unwrap();

        let (mut restarted, mut fresh) = setup();
        restarted.load_state(h.storage.as_ref()).await.unwrap();
        let list = restarted.list("a").unwrap().clone();
        assert!(!restarted.is_due(&list, DAY_MS * 10));
        assert!(restarted.needs_refresh(&list, &fresh, DAY_MS * 10));

        let report = restarted.refresh(&mut fresh, &h.adapters, false).await.unwrap();
        assert_eq!(report.succeeded, vec!["a", "b"]);
        for id in ["a", "b"] {
            let tier = Tier::static_list(id);
            assert_eq!(fresh.count(&tier), h.engine.rules(&tier).len());
            assert!(fresh.count(&tier) > 0);
        }

        let report = restarted.refresh(&mut fresh, &h.adapters, false).await.unwrap();
        assert!(report.succeeded.is_empty());
    }

    #[tokio::test]
    async fn failed_first_load_does_not_mark_tier_loaded() {
        let h = harness();
        let (mut coordinator, mut store) = setup();
        coordinator.refresh(&mut store, &h.adapters, false).await.unwrap();

        let (mut restarted, mut fresh) = setup();
        restarted.load_state(h.storage.as_ref()).await.unwrap();
        h.engine.fail_next(100);
        let report = restarted.refresh(&mut fresh, &h.adapters, false).await.unwrap();
        h.engine.fail_next(0);
        assert_eq!(report.failed.len(), 2);
        assert!(!fresh.has_tier(&Tier::static_list("a")));

        let report = restarted.refresh(&mut fresh, &h.adapters, false).await.unwrap();
        assert_eq!(report.succeeded, vec!["a", "b"]);
        assert_eq!(fresh.count(&Tier::static_list("a")), 2);
        assert_eq!(h.engine.rules(&Tier::static_list("a")).len(), 2);
    }

    #[tokio::test]
    async fn unsaved_state_keeps_the_report() {
        let h = harness();
        let (mut coordinator, mut store) = setup();
        h.storage.fail_writes(1);

        let report = coordinator.refresh(&mut store, &h.adapters, false).await.unwrap();
        assert_eq!(report.succeeded, vec!["a", "b"]);
        assert!(report.persist_error.is_some());
        assert!(!report.is_complete());
        assert_eq!(coordinator.list("a").unwrap().last_update, Some(DAY_MS * 10));
        assert_eq!(h.storage.value(FILTER_LIST_STATE_KEY), None);
    }

    #[tokio::test]
    async fn state_round_trips_through_storage() {
        let h = harness();
        let (mut coordinator, mut store) = setup();
        coordinator.refresh(&mut store, &h.adapters, false).await.unwrap();
        coordinator.set_list_enabled("b", false, &h.adapters).await.unwrap();
        assert!(!h.engine.is_enabled(&Tier::static_list("b")));

        let (mut restored, _) = setup();
        restored.load_state(h.storage.as_ref()).await.unwrap();
        assert_eq!(restored.lists(), coordinator.lists());
        assert!(!restored.list("b").unwrap().enabled);
    }

    #[tokio::test]
    async fn unknown_list_cannot_be_toggled() {
        let h = harness();
        let (mut coordinator, _) = setup();
        assert!(matches!(
            coordinator.set_list_enabled("nope", true, &h.adapters).await,
            Err(SyncError::UnknownList(_))
        ));
    }

    #[tokio::test]
    async fn suspension_keeps_list_flags() {
        let h = harness();
        let (mut coordinator, _) = setup();
        coordinator.set_suspended(true, &h.adapters).await.unwrap();
        assert!(!h.engine.is_enabled(&Tier::static_list("a")));

        coordinator.set_list_enabled("b", false, &h.adapters).await.unwrap();
        coordinator.set_suspended(false, &h.adapters).await.unwrap();
        assert!(h.engine.is_enabled(&Tier::static_list("a")));
        assert!(!h.engine.is_enabled(&Tier::static_list("b")));
    }
}

//! The blocker context: every operation the extension glue calls.
//!
//! `Blocker` owns the rule store, the filter list coordinator, the custom
//! filter and whitelist sources of truth, and the adapters. Methods take
//! `&mut self`, so there is a single writer. Each mutation writes its
//! source of truth to storage before touching memory; a failed write leaves
//! the blocker as it was. The affected tier is then reconciled with the
//! engine.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use sieve_compiler::{normalize_domain, normalize_whitelist, parse_filter, whitelist_rules};
use sieve_core::ids::Tier;
use sieve_core::types::RuleId;

use crate::adapter::Adapters;
use crate::config::SyncConfig;
use crate::coordinator::{FilterList, FilterListCoordinator, RefreshReport};
use crate::error::{Result, StorageError, StoreError, SyncError};
use crate::reconciler::{set_tier_enabled, sync_tier};
use crate::store::RuleStore;

pub const CUSTOM_FILTERS_KEY: &str = "customFilters";
pub const WHITELISTED_DOMAINS_KEY: &str = "whitelistedDomains";
pub const IS_ENABLED_KEY: &str = "isEnabled";

/// A user-entered filter and the dynamic rule id it compiled to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFilter {
    pub id: RuleId,
    pub filter: String,
}

pub struct Blocker {
    config: SyncConfig,
    store: RuleStore,
    coordinator: FilterListCoordinator,
    custom_filters: Vec<CustomFilter>,
    whitelist: Vec<String>,
    enabled: bool,
    adapters: Adapters,
}

impl Blocker {
    pub fn new(config: SyncConfig, adapters: Adapters) -> Result<Self> {
        config.validate()?;

        let mut store = RuleStore::new(config.limits);
        let coordinator = FilterListCoordinator::new(&config);
        coordinator.register_windows(&mut store);

        Ok(Self {
            config,
            store,
            coordinator,
            custom_filters: Vec::new(),
            whitelist: Vec::new(),
            enabled: true,
            adapters,
        })
    }

    /// Restore persisted state, bring every tier in line with it and
    /// refresh the lists that are due.
    pub async fn initialize(&mut self) -> Result<RefreshReport> {
        self.restore().await?;
        self.refresh_due_lists().await
    }

    /// Like [`Self::initialize`] without touching the static lists' sources.
    pub async fn restore(&mut self) -> Result<()> {
        let storage = self.adapters.storage.clone();
        self.coordinator.load_state(storage.as_ref()).await?;

        let mut items = storage
            .get(&[CUSTOM_FILTERS_KEY, WHITELISTED_DOMAINS_KEY, IS_ENABLED_KEY])
            .await?;

        let stored: Vec<CustomFilter> = take_or_default(&mut items, CUSTOM_FILTERS_KEY);
        self.replay_custom_filters(stored).await?;

        let domains: Vec<String> = take_or_default(&mut items, WHITELISTED_DOMAINS_KEY);
        self.apply_whitelist(normalize_whitelist(&domains)).await?;

        let enabled = items
            .remove(IS_ENABLED_KEY)
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        self.apply_enabled(enabled).await
    }

    async fn replay_custom_filters(&mut self, stored: Vec<CustomFilter>) -> Result<()> {
        let stored_len = stored.len();
        let mut kept = Vec::with_capacity(stored_len);
        for custom in stored {
            let added = parse_filter(&custom.filter, custom.id)
                .map_err(SyncError::from)
                .and_then(|rule| Ok(self.store.add(&Tier::Dynamic, rule)?));
            match added {
                Ok(()) => kept.push(custom),
                Err(e) => warn!("dropping stored custom filter '{}': {}", custom.filter, e),
            }
        }

        if kept.len() != stored_len {
            if let Err(e) = self.persist_custom_filters(&kept).await {
                warn!("could not save pruned custom filters: {}", e);
            }
        }
        self.custom_filters = kept;
        info!("restored {} custom filters", self.custom_filters.len());
        self.sync(&Tier::Dynamic).await
    }

    /// Compile `text` into the dynamic tier. A filter the compiler cannot
    /// express is rejected with the exact reason. Nothing changes unless the
    /// updated filter list was saved.
    pub async fn add_custom_filter(&mut self, text: &str) -> Result<RuleId> {
        let text = text.trim();
        let id = self.store.allocate_dynamic_id()?;

        let rule = match parse_filter(text, id) {
            Ok(rule) => rule,
            Err(rejection) => {
                self.store.release_dynamic_id(id);
                return Err(rejection.into());
            }
        };
        if let Err(e) = self.store.add(&Tier::Dynamic, rule) {
            self.store.release_dynamic_id(id);
            return Err(e.into());
        }

        let mut next = self.custom_filters.clone();
        next.push(CustomFilter {
            id,
            filter: text.to_string(),
        });
        if let Err(e) = self.persist_custom_filters(&next).await {
            self.store.remove(&Tier::Dynamic, id);
            return Err(e);
        }

        self.custom_filters = next;
        self.sync(&Tier::Dynamic).await?;
        Ok(id)
    }

    pub async fn remove_custom_filter(&mut self, id: RuleId) -> Result<CustomFilter> {
        let index = self
            .custom_filters
            .iter()
            .position(|custom| custom.id == id)
            .ok_or(SyncError::UnknownFilter(id))?;

        let mut next = self.custom_filters.clone();
        let removed = next.remove(index);
        self.persist_custom_filters(&next).await?;

        self.custom_filters = next;
        self.store.remove(&Tier::Dynamic, id);
        self.sync(&Tier::Dynamic).await?;
        Ok(removed)
    }

    pub fn custom_filters(&self) -> &[CustomFilter] {
        &self.custom_filters
    }

    /// Replace the whitelist and recompile the session tier from it. Blank
    /// entries are ignored; anything else that is not a domain is rejected.
    pub async fn recompute_whitelist<S: AsRef<str>>(&mut self, domains: &[S]) -> Result<()> {
        for domain in domains {
            let domain = domain.as_ref();
            if !domain.trim().is_empty() && normalize_domain(domain).is_none() {
                return Err(SyncError::InvalidDomain(domain.trim().to_string()));
            }
        }
        self.apply_whitelist(normalize_whitelist(domains)).await
    }

    /// Add `domain` to the whitelist, or remove it if present. Returns
    /// whether the domain is whitelisted afterwards.
    pub async fn toggle_whitelist(&mut self, domain: &str) -> Result<bool> {
        let domain = normalize_domain(domain)
            .ok_or_else(|| SyncError::InvalidDomain(domain.trim().to_string()))?;

        let mut domains = self.whitelist.clone();
        let now_whitelisted = match domains.iter().position(|d| *d == domain) {
            Some(index) => {
                domains.remove(index);
                false
            }
            None => {
                domains.push(domain);
                true
            }
        };
        self.apply_whitelist(domains).await?;
        Ok(now_whitelisted)
    }

    /// Save `domains`, then swap the session tier over to them. A failed
    /// save leaves the whitelist and its rules as they were.
    async fn apply_whitelist(&mut self, domains: Vec<String>) -> Result<()> {
        let rules = whitelist_rules(&domains);
        let capacity = self.store.capacity(&Tier::Session);
        if rules.len() > capacity {
            return Err(StoreError::CapacityExceeded {
                tier: Tier::Session,
                capacity,
            }
            .into());
        }

        let value = serde_json::to_value(&domains).map_err(StorageError::from)?;
        self.persist(WHITELISTED_DOMAINS_KEY, value).await?;

        self.store.replace_all(&Tier::Session, rules)?;
        self.whitelist = domains;
        self.sync(&Tier::Session).await
    }

    pub fn whitelist(&self) -> &[String] {
        &self.whitelist
    }

    /// Whether `host` or any of its parent domains is whitelisted.
    pub fn is_whitelisted(&self, host: &str) -> bool {
        let host = host.trim().trim_matches('.').to_ascii_lowercase();
        let mut candidate = host.as_str();
        loop {
            if self.whitelist.iter().any(|d| d == candidate) {
                return true;
            }
            match candidate.split_once('.') {
                Some((_, parent)) if !parent.is_empty() => candidate = parent,
                _ => return false,
            }
        }
    }

    /// Refetch and recompile every static list now.
    pub async fn refresh_static_lists(&mut self) -> Result<RefreshReport> {
        self.coordinator
            .refresh(&mut self.store, &self.adapters, true)
            .await
    }

    /// Refresh the lists whose refresh interval has elapsed.
    pub async fn refresh_due_lists(&mut self) -> Result<RefreshReport> {
        self.coordinator
            .refresh(&mut self.store, &self.adapters, false)
            .await
    }

    pub async fn set_list_enabled(&mut self, list_id: &str, enabled: bool) -> Result<()> {
        self.coordinator
            .set_list_enabled(list_id, enabled, &self.adapters)
            .await
    }

    /// Global on/off. Turns the static lists and custom filters off in the
    /// engine; the whitelist tier stays as it is.
    pub async fn set_enabled(&mut self, enabled: bool) -> Result<()> {
        self.persist(IS_ENABLED_KEY, Value::Bool(enabled)).await?;
        self.apply_enabled(enabled).await
    }

    async fn apply_enabled(&mut self, enabled: bool) -> Result<()> {
        self.coordinator
            .set_suspended(!enabled, &self.adapters)
            .await?;
        set_tier_enabled(
            self.adapters.engine.as_ref(),
            &Tier::Dynamic,
            enabled,
            &self.config.retry,
        )
        .await?;
        self.enabled = enabled;
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn compiled_rule_count(&self, tier: &Tier) -> usize {
        self.store.count(tier)
    }

    pub fn filter_lists(&self) -> &[FilterList] {
        self.coordinator.lists()
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    async fn sync(&self, tier: &Tier) -> Result<()> {
        let desired = self.store.rules(tier);
        sync_tier(
            self.adapters.engine.as_ref(),
            tier,
            &desired,
            &self.config.retry,
        )
        .await?;
        Ok(())
    }

    async fn persist_custom_filters(&self, filters: &[CustomFilter]) -> Result<()> {
        let value = serde_json::to_value(filters).map_err(StorageError::from)?;
        self.persist(CUSTOM_FILTERS_KEY, value).await
    }

    async fn persist(&self, key: &str, value: Value) -> Result<()> {
        let mut items = Map::new();
        items.insert(key.to_string(), value);
        self.adapters.storage.set(items).await?;
        Ok(())
    }
}

fn take_or_default<T: serde::de::DeserializeOwned + Default>(
    items: &mut Map<String, Value>,
    key: &str,
) -> T {
    match items.remove(key).map(serde_json::from_value::<T>) {
        Some(Ok(value)) => value,
        Some(Err(e)) => {
            warn!("ignoring malformed {}: {}", key, e);
            T::default()
        }
        None => T::default(),
    }
}

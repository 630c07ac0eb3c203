//! In-memory rule store partitioned by tier.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use sieve_core::ids::{IdRange, Tier, DYNAMIC_IDS};
use sieve_core::types::{Rule, RuleId};

use crate::allocator::IdAllocator;
use crate::error::StoreError;

/// Per-tier rule count limits imposed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CapacityLimits {
    pub dynamic: usize,
    pub session: usize,
}

impl Default for CapacityLimits {
    fn default() -> Self {
        Self {
            dynamic: 30_000,
            session: 5_000,
        }
    }
}

/// Owns every compiled rule, keyed by tier then id.
#[derive(Debug)]
pub struct RuleStore {
    tiers: HashMap<Tier, BTreeMap<RuleId, Rule>>,
    static_windows: HashMap<String, IdRange>,
    dynamic_ids: IdAllocator,
    limits: CapacityLimits,
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new(CapacityLimits::default())
    }
}

impl RuleStore {
    pub fn new(limits: CapacityLimits) -> Self {
        Self {
            tiers: HashMap::new(),
            static_windows: HashMap::new(),
            dynamic_ids: IdAllocator::new(DYNAMIC_IDS),
            limits,
        }
    }

    /// Confine a static list's rules to `window`.
    pub fn register_static_list(&mut self, list_id: &str, window: IdRange) {
        self.static_windows.insert(list_id.to_string(), window);
    }

    pub fn id_range(&self, tier: &Tier) -> IdRange {
        match tier {
            Tier::Static(list) => self
                .static_windows
                .get(list)
                .copied()
                .unwrap_or_else(|| tier.id_range()),
            _ => tier.id_range(),
        }
    }

    pub fn capacity(&self, tier: &Tier) -> usize {
        let range = self.id_range(tier).len();
        match tier {
            Tier::Static(_) => range,
            Tier::Dynamic => self.limits.dynamic.min(range),
            Tier::Session => self.limits.session.min(range),
        }
    }

    pub fn add(&mut self, tier: &Tier, rule: Rule) -> Result<(), StoreError> {
        let range = self.id_range(tier);
        if !range.contains(rule.id) {
            return Err(StoreError::IdOutOfRange {
                tier: tier.clone(),
                id: rule.id,
                range,
            });
        }

        let capacity = self.capacity(tier);
        let rules = self.tiers.entry(tier.clone()).or_default();
        if rules.contains_key(&rule.id) {
            return Err(StoreError::DuplicateId {
                tier: tier.clone(),
                id: rule.id,
            });
        }
        if rules.len() >= capacity {
            return Err(StoreError::CapacityExceeded {
                tier: tier.clone(),
                capacity,
            });
        }

        if *tier == Tier::Dynamic {
            self.dynamic_ids.reserve(rule.id);
        }
        rules.insert(rule.id, rule);
        Ok(())
    }

    pub fn remove(&mut self, tier: &Tier, id: RuleId) -> Option<Rule> {
        let removed = self.tiers.get_mut(tier)?.remove(&id)?;
        if *tier == Tier::Dynamic {
            self.dynamic_ids.release(id);
        }
        Some(removed)
    }

    pub fn get(&self, tier: &Tier, id: RuleId) -> Option<&Rule> {
        self.tiers.get(tier)?.get(&id)
    }

    /// Rules of `tier` in id order.
    pub fn list_by_tier<'a>(&'a self, tier: &Tier) -> impl Iterator<Item = &'a Rule> + 'a {
        self.tiers
            .get(tier)
            .into_iter()
            .flat_map(|rules| rules.values())
    }

    /// Owned copy of a tier's rules, in id order.
    pub fn rules(&self, tier: &Tier) -> Vec<Rule> {
        self.list_by_tier(tier).cloned().collect()
    }

    pub fn count(&self, tier: &Tier) -> usize {
        self.tiers.get(tier).map_or(0, BTreeMap::len)
    }

    /// Whether `tier` has been populated since start-up, even if empty.
    pub fn has_tier(&self, tier: &Tier) -> bool {
        self.tiers.contains_key(tier)
    }

    /// Forget `tier` entirely, so [`Self::has_tier`] reports it as never
    /// populated. Returns the rules it held.
    pub fn drop_tier(&mut self, tier: &Tier) -> Vec<Rule> {
        let dropped = self.tiers.remove(tier).unwrap_or_default();
        if *tier == Tier::Dynamic {
            self.dynamic_ids.reset(std::iter::empty());
        }
        dropped.into_values().collect()
    }

    /// Swap a tier's contents for `rules`, returning the previous rules.
    ///
    /// The whole set is validated first; on error nothing changes.
    pub fn replace_all(&mut self, tier: &Tier, rules: Vec<Rule>) -> Result<Vec<Rule>, StoreError> {
        let range = self.id_range(tier);
        let capacity = self.capacity(tier);
        if rules.len() > capacity {
            return Err(StoreError::CapacityExceeded {
                tier: tier.clone(),
                capacity,
            });
        }

        let mut next = BTreeMap::new();
        for rule in rules {
            if !range.contains(rule.id) {
                return Err(StoreError::IdOutOfRange {
                    tier: tier.clone(),
                    id: rule.id,
                    range,
                });
            }
            if next.contains_key(&rule.id) {
                return Err(StoreError::DuplicateId {
                    tier: tier.clone(),
                    id: rule.id,
                });
            }
            next.insert(rule.id, rule);
        }

        if *tier == Tier::Dynamic {
            self.dynamic_ids.reset(next.keys().copied());
        }

        let previous = self.tiers.insert(tier.clone(), next).unwrap_or_default();
        Ok(previous.into_values().collect())
    }

    /// Reserve a fresh dynamic-tier id.
    pub fn allocate_dynamic_id(&mut self) -> Result<RuleId, StoreError> {
        self.dynamic_ids
            .allocate()
            .ok_or(StoreError::IdSpaceExhausted(DYNAMIC_IDS))
    }

    /// Give back an id from [`Self::allocate_dynamic_id`] that was never stored.
    pub fn release_dynamic_id(&mut self, id: RuleId) {
        if self.get(&Tier::Dynamic, id).is_none() {
            self.dynamic_ids.release(id);
        }
    }
}

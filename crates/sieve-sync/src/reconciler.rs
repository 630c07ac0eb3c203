//! Bring the engine's active rules in line with the store.
//!
//! Reconciliation is deliberately non-incremental: every active id of the
//! tier is removed and the full desired set re-added in one diff. Tiers are
//! capacity-bounded and updated rarely, and a full swap cannot drift.

use std::collections::BTreeSet;

use log::info;

use sieve_core::ids::Tier;
use sieve_core::types::{Rule, RuleId};

use crate::adapter::RuleEngine;
use crate::error::SyncError;
use crate::retry::{RetryExhausted, RetryPolicy};

/// Operations that turn the engine's active set into the desired set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleDiff {
    pub remove: Vec<RuleId>,
    pub add: Vec<Rule>,
}

impl RuleDiff {
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty()
    }

    pub fn added_ids(&self) -> BTreeSet<RuleId> {
        self.add.iter().map(|rule| rule.id).collect()
    }

    /// Active id set after applying this diff to `active`.
    pub fn apply_to(&self, active: &BTreeSet<RuleId>) -> BTreeSet<RuleId> {
        let mut next: BTreeSet<RuleId> = active
            .iter()
            .copied()
            .filter(|id| !self.remove.contains(id))
            .collect();
        next.extend(self.add.iter().map(|rule| rule.id));
        next
    }
}

/// Remove every active id of `tier` (within its reconcile scope) and add
/// all of `desired`.
pub fn reconcile(tier: &Tier, desired: &[Rule], active: &BTreeSet<RuleId>) -> RuleDiff {
    let scope = tier.reconcile_scope();
    let remove = active
        .iter()
        .copied()
        .filter(|id| scope.map_or(true, |range| range.contains(*id)))
        .collect();

    RuleDiff {
        remove,
        add: desired.to_vec(),
    }
}

/// Read the engine's active ids, reconcile and apply, retrying each engine
/// call per `retry`.
pub async fn sync_tier(
    engine: &dyn RuleEngine,
    tier: &Tier,
    desired: &[Rule],
    retry: &RetryPolicy,
) -> Result<RuleDiff, SyncError> {
    let exhausted = |e: RetryExhausted<_>| SyncError::EngineApplyFailed {
        tier: tier.clone(),
        attempts: e.attempts,
        source: e.last_error,
    };

    let active = retry
        .run("reading active rules", || engine.active_rule_ids(tier))
        .await
        .map_err(exhausted)?;

    let diff = reconcile(tier, desired, &active);

    retry
        .run("applying rule diff", || engine.apply_rule_diff(tier, &diff))
        .await
        .map_err(exhausted)?;

    info!(
        "synced {}: removed {}, added {}",
        tier,
        diff.remove.len(),
        diff.add.len()
    );
    Ok(diff)
}

/// Enable or disable a tier in the engine, retrying per `retry`.
pub async fn set_tier_enabled(
    engine: &dyn RuleEngine,
    tier: &Tier,
    enabled: bool,
    retry: &RetryPolicy,
) -> Result<(), SyncError> {
    retry
        .run("toggling ruleset", || engine.set_tier_enabled(tier, enabled))
        .await
        .map_err(|e| SyncError::EngineApplyFailed {
            tier: tier.clone(),
            attempts: e.attempts,
            source: e.last_error,
        })
}

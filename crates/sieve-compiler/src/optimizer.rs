use std::collections::HashSet;

use sieve_core::types::{Rule, RuleAction, RuleCondition};

/// Drops rules that behave identically to one already seen.
///
/// Large lists repeat the same filter under different comments; every copy
/// would cost a slot in the capacity-bounded tier.
#[derive(Debug, Default)]
pub struct Deduper {
    seen: HashSet<RuleKey>,
}

impl Deduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if an equivalent rule was inserted before.
    pub fn insert(&mut self, rule: &Rule) -> bool {
        self.seen.insert(RuleKey::from(rule))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Everything that affects matching; ids and source text are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RuleKey {
    action: RuleAction,
    priority: u32,
    condition: RuleCondition,
}

impl From<&Rule> for RuleKey {
    fn from(rule: &Rule) -> Self {
        Self {
            action: rule.action,
            priority: rule.priority,
            condition: rule.condition.clone(),
        }
    }
}

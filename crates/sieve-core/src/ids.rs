//! Rule tiers and their id namespaces
//!
//! The engine keeps one flat id space per rule store, so each tier owns a
//! disjoint range:
//!
//! | Tier    | Range             | Allocation                         |
//! |---------|-------------------|------------------------------------|
//! | Static  | `1..100000`       | sequential per list from its base  |
//! | Dynamic | `100000..900000`  | allocator over issued ids          |
//! | Session | `900000..1000000` | `900000 + whitelist index`         |

use std::fmt;

use crate::types::RuleId;

/// Half-open id range `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdRange {
    pub start: RuleId,
    pub end: RuleId,
}

impl IdRange {
    pub const fn new(start: RuleId, end: RuleId) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, id: RuleId) -> bool {
        id >= self.start && id < self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn overlaps(&self, other: &IdRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_range(&self, other: &IdRange) -> bool {
        other.start >= self.start && other.end <= self.end
    }
}

impl fmt::Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

pub const STATIC_IDS: IdRange = IdRange::new(1, 100_000);
pub const DYNAMIC_IDS: IdRange = IdRange::new(100_000, 900_000);
pub const SESSION_IDS: IdRange = IdRange::new(900_000, 1_000_000);

/// Id window of static list `index` when `count` lists share the static range.
///
/// With two lists this yields `1..50000` and `50000..100000`.
pub fn static_list_window(index: usize, count: usize) -> IdRange {
    let count = count.max(1) as RuleId;
    let stride = STATIC_IDS.end / count;
    let index = index as RuleId;
    let start = (index * stride).max(STATIC_IDS.start);
    IdRange::new(start, (index + 1) * stride)
}

/// Rule tier. Each tier is reconciled against the engine independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    /// Rules compiled from the named static filter list
    Static(String),
    /// User-entered custom filters
    Dynamic,
    /// Whitelist overrides, recomputed on every whitelist change
    Session,
}

impl Tier {
    pub fn static_list(id: impl Into<String>) -> Self {
        Self::Static(id.into())
    }

    /// Ruleset name used by the engine and for on-disk rulesets.
    pub fn ruleset_id(&self) -> &str {
        match self {
            Self::Static(list) => list,
            Self::Dynamic => "custom",
            Self::Session => "whitelist",
        }
    }

    /// Namespace the tier's ids must come from.
    pub fn id_range(&self) -> IdRange {
        match self {
            Self::Static(_) => STATIC_IDS,
            Self::Dynamic => DYNAMIC_IDS,
            Self::Session => SESSION_IDS,
        }
    }

    /// Range of engine ids a reconcile may remove. `None` means every
    /// active id of the tier. The session store is shared with rules we do
    /// not own, so only our range is touched there.
    pub fn reconcile_scope(&self) -> Option<IdRange> {
        match self {
            Self::Session => Some(SESSION_IDS),
            _ => None,
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, Self::Static(_))
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(list) => write!(f, "static:{list}"),
            Self::Dynamic => f.write_str("dynamic"),
            Self::Session => f.write_str("session"),
        }
    }
}

use std::collections::BTreeSet;

use sieve_core::ids::IdRange;
use sieve_core::types::RuleId;

/// Hands out ids from a range without ever returning one that is still issued.
///
/// A cursor walks the range forward and wraps once it reaches the end, so
/// freshly released ids are not reused until the rest of the range has
/// been offered.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    range: IdRange,
    cursor: RuleId,
    issued: BTreeSet<RuleId>,
}

impl IdAllocator {
    pub fn new(range: IdRange) -> Self {
        Self {
            range,
            cursor: range.start,
            issued: BTreeSet::new(),
        }
    }

    pub fn range(&self) -> IdRange {
        self.range
    }

    /// Next free id, or `None` once every id in the range is issued.
    pub fn allocate(&mut self) -> Option<RuleId> {
        if self.issued.len() >= self.range.len() {
            return None;
        }

        let mut candidate = self.cursor;
        loop {
            if !self.range.contains(candidate) {
                candidate = self.range.start;
            }
            if !self.issued.contains(&candidate) {
                break;
            }
            candidate += 1;
        }

        self.issued.insert(candidate);
        self.cursor = candidate + 1;
        Some(candidate)
    }

    /// Mark an externally chosen id as issued. Returns `false` if it was
    /// already issued or lies outside the range.
    pub fn reserve(&mut self, id: RuleId) -> bool {
        self.range.contains(id) && self.issued.insert(id)
    }

    pub fn release(&mut self, id: RuleId) -> bool {
        self.issued.remove(&id)
    }

    pub fn is_issued(&self, id: RuleId) -> bool {
        self.issued.contains(&id)
    }

    pub fn issued_count(&self) -> usize {
        self.issued.len()
    }

    /// Forget everything and treat exactly `ids` as issued.
    pub fn reset(&mut self, ids: impl IntoIterator<Item = RuleId>) {
        self.issued = ids.into_iter().filter(|id| self.range.contains(*id)).collect();
    }
}

//! Whole-list compilation into a static id window.

use log::{debug, warn};

use sieve_core::ids::IdRange;
use sieve_core::types::Rule;

use crate::optimizer::Deduper;
use crate::parser::{parse_filter, Rejection};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileStats {
    pub lines: usize,
    pub rules: usize,
    pub skipped: usize,
    pub cosmetic: usize,
    pub empty: usize,
    pub unsupported: usize,
    pub duplicates: usize,
    pub truncated: usize,
}

impl CompileStats {
    fn record(&mut self, rejection: &Rejection) {
        match rejection {
            Rejection::Skip => self.skipped += 1,
            Rejection::UnsupportedCosmetic => self.cosmetic += 1,
            Rejection::EmptyPattern => self.empty += 1,
            Rejection::UnsupportedOption(_) => self.unsupported += 1,
        }
    }

    pub fn rejected(&self) -> usize {
        self.cosmetic + self.empty + self.unsupported
    }
}

#[derive(Debug, Clone)]
pub struct CompiledList {
    pub rules: Vec<Rule>,
    pub stats: CompileStats,
}

/// Compile a filter list, numbering accepted rules sequentially from
/// `window.start`. At most `window.len()` rules are kept.
pub fn compile_filter_list(text: &str, window: IdRange) -> CompiledList {
    let capacity = window.len();
    let mut stats = CompileStats::default();
    let mut rules = Vec::new();
    let mut deduper = Deduper::new();
    let mut next_id = window.start;

    for line in text.lines() {
        stats.lines += 1;

        let rule = match parse_filter(line, next_id) {
            Ok(rule) => rule,
            Err(rejection) => {
                if rejection != Rejection::Skip {
                    debug!("rejected filter {:?}: {}", line.trim(), rejection);
                }
                stats.record(&rejection);
                continue;
            }
        };

        if !deduper.insert(&rule) {
            stats.duplicates += 1;
            continue;
        }

        if rules.len() >= capacity {
            stats.truncated += 1;
            continue;
        }

        rules.push(rule);
        next_id += 1;
    }

    if stats.truncated > 0 {
        warn!(
            "id window {} holds {} rules, dropped {}",
            window, capacity, stats.truncated
        );
    }

    stats.rules = rules.len();
    CompiledList { rules, stats }
}

//! Whitelist override rules.

use log::warn;
use sieve_core::ids::SESSION_IDS;
use sieve_core::types::{
    ResourceType, Rule, RuleAction, RuleCondition, RuleId, WHITELIST_PRIORITY,
};

const MAX_DOMAIN_LEN: usize = 253;

/// Trimmed, lower-cased form of `domain`, or `None` when it is blank or not
/// a host name (labels of ASCII letters, digits, `-` and `_`).
pub fn normalize_domain(domain: &str) -> Option<String> {
    let domain = domain.trim().trim_matches('.').to_ascii_lowercase();
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN {
        return None;
    }
    let valid = domain.split('.').all(|label| {
        !label.is_empty()
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    });
    valid.then_some(domain)
}

/// Normalize and de-duplicate whitelist input, keeping first-seen order.
/// Entries that are not host names are dropped.
///
/// Rule ids are derived from positions in this list, so every caller must
/// compile from the normalized form.
pub fn normalize_whitelist<S: AsRef<str>>(domains: &[S]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(domains.len());
    for raw in domains {
        let raw = raw.as_ref();
        let Some(domain) = normalize_domain(raw) else {
            if !raw.trim().is_empty() {
                warn!("ignoring invalid whitelist entry '{}'", raw);
            }
            continue;
        };
        if !normalized.contains(&domain) {
            normalized.push(domain);
        }
    }
    normalized
}

/// One allow rule per domain: id `900000 + index`, priority above every
/// list rule, covering every resource type.
pub fn whitelist_rules<S: AsRef<str>>(domains: &[S]) -> Vec<Rule> {
    domains
        .iter()
        .enumerate()
        .map(|(index, domain)| Rule {
            id: SESSION_IDS.start + index as RuleId,
            priority: WHITELIST_PRIORITY,
            action: RuleAction::Allow,
            condition: RuleCondition {
                request_domains: Some(vec![domain.as_ref().to_string()]),
                resource_types: ResourceType::ALL,
                ..RuleCondition::default()
            },
            source_text: None,
        })
        .collect()
}

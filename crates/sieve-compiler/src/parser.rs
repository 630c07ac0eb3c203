use sieve_core::types::{RuleAction, Rule, RuleId, EXCEPTION_PRIORITY};

use crate::options::{parse_options, ParsedOptions};

/// Why a filter line did not produce a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum Rejection {
    #[error("comment, metadata or empty line")]
    Skip,
    #[error("element hiding rules cannot be expressed as network rules")]
    UnsupportedCosmetic,
    #[error("filter has neither a URL pattern nor a domain")]
    EmptyPattern,
    /// An option the rule engine cannot express. Such filters are rejected
    /// rather than compiled without the option, which would match more.
    #[error("unsupported filter option: {0}")]
    UnsupportedOption(String),
}

const COSMETIC_SEPARATORS: [&str; 4] = ["##", "#@#", "#?#", "#$#"];

/// Parse one filter line into a rule carrying `id`.
pub fn parse_filter(line: &str, id: RuleId) -> Result<Rule, Rejection> {
    let line = line.trim();
    if line.is_empty() {
        return Err(Rejection::Skip);
    }

    if is_cosmetic_line(line) {
        return Err(Rejection::UnsupportedCosmetic);
    }

    if is_comment_line(line) {
        return Err(Rejection::Skip);
    }

    let mut rule = Rule::block(id);
    let mut body = line;

    if let Some(rest) = body.strip_prefix("@@") {
        rule.action = RuleAction::Allow;
        rule.priority = EXCEPTION_PRIORITY;
        body = rest;
    }

    let (pattern_part, options_text) = split_rule_options(body);
    let options = match options_text {
        Some(options_text) => parse_options(options_text)?,
        None => ParsedOptions::default(),
    };

    let (domain, pattern) = split_domain_anchor(pattern_part.trim());
    if let Some(domain) = domain {
        rule.condition.request_domains = Some(vec![domain]);
    }

    let url_filter = normalize_url_pattern(pattern);
    if url_filter.contains('*') {
        rule.condition.is_url_filter_case_sensitive = Some(false);
    }
    if options.match_case {
        rule.condition.is_url_filter_case_sensitive = Some(true);
    }
    if !url_filter.is_empty() {
        rule.condition.url_filter = Some(url_filter);
    }

    apply_options(&mut rule, options);
    rule.source_text = Some(line.to_string());

    if !rule.has_pattern() {
        return Err(Rejection::EmptyPattern);
    }

    Ok(rule)
}

fn apply_options(rule: &mut Rule, options: ParsedOptions) {
    let condition = &mut rule.condition;
    condition.resource_types = options.resource_types;
    condition.domain_type = options.domain_type;
    if !options.initiator_domains.is_empty() {
        condition.initiator_domains = Some(options.initiator_domains);
    }
    if !options.excluded_initiator_domains.is_empty() {
        condition.excluded_initiator_domains = Some(options.excluded_initiator_domains);
    }
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with('!') || line.starts_with('[')
}

fn is_cosmetic_line(line: &str) -> bool {
    COSMETIC_SEPARATORS.iter().any(|sep| line.contains(sep))
}

/// Split at the first `$` that is not escaped with a backslash.
fn split_rule_options(line: &str) -> (&str, Option<&str>) {
    let bytes = line.as_bytes();
    let position = bytes
        .iter()
        .enumerate()
        .position(|(i, &b)| b == b'$' && (i == 0 || bytes[i - 1] != b'\\'));

    match position {
        Some(pos) => (&line[..pos], Some(&line[pos + 1..])),
        None => (line, None),
    }
}

/// Strip a `||` anchor and pull out its host.
///
/// Returns the literal domain (if any) and what remains of the pattern. The
/// remainder starts at the first `/`; without a path the pattern is empty.
/// Hosts that are not literal domains (wildcards, ports) keep the whole
/// text as a URL pattern instead.
fn split_domain_anchor(pattern: &str) -> (Option<String>, &str) {
    let Some(rest) = pattern.strip_prefix("||") else {
        return (None, pattern);
    };

    let host_end = rest.find(['/', '^']).unwrap_or(rest.len());
    match normalize_domain(&rest[..host_end]) {
        Some(domain) => {
            let remainder = rest.find('/').map_or("", |slash| &rest[slash..]);
            (Some(domain), remainder)
        }
        None => (None, rest),
    }
}

fn normalize_domain(host: &str) -> Option<String> {
    let trimmed = host.trim().trim_matches('.');
    if trimmed.is_empty() {
        return None;
    }

    if !trimmed
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b'_')
    {
        return None;
    }

    Some(trimmed.to_ascii_lowercase())
}

/// Drop start/end anchors and separator markers; anchoring is left to the
/// engine's substring matcher.
fn normalize_url_pattern(pattern: &str) -> String {
    let mut pattern = pattern;
    if let Some(rest) = pattern.strip_prefix('|') {
        pattern = rest;
    }
    if let Some(rest) = pattern.strip_suffix('|') {
        pattern = rest;
    }

    pattern.replace('^', "").replace("\\$", "$")
}

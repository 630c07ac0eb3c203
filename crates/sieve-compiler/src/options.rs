use log::debug;

use sieve_core::types::{DomainType, ResourceType};

use crate::parser::Rejection;

/// Modifiers collected from the `$...` tail of a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOptions {
    pub resource_types: ResourceType,
    pub domain_type: Option<DomainType>,
    pub initiator_domains: Vec<String>,
    pub excluded_initiator_domains: Vec<String>,
    pub match_case: bool,
}

impl Default for ParsedOptions {
    fn default() -> Self {
        Self {
            resource_types: ResourceType::DEFAULT,
            domain_type: None,
            initiator_domains: Vec::new(),
            excluded_initiator_domains: Vec::new(),
            match_case: false,
        }
    }
}

/// Parse a comma separated option string.
///
/// Options the declarative engine cannot express are rejected instead of
/// dropped: ignoring `$removeparam=` or `$popup` would turn the filter into
/// a much broader block rule.
pub fn parse_options(text: &str) -> Result<ParsedOptions, Rejection> {
    let mut options = ParsedOptions::default();
    let mut type_include = ResourceType::empty();
    let mut type_exclude = ResourceType::empty();

    for raw in text.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let raw_lower = raw.to_ascii_lowercase();
        let raw_lower = raw_lower.as_str();

        if let Some(domain_value) = raw_lower.strip_prefix("domain=") {
            let (include, exclude) = parse_domain_option(domain_value);
            options.initiator_domains.extend(include);
            options.excluded_initiator_domains.extend(exclude);
            continue;
        }

        let (negated, name) = match raw_lower.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw_lower),
        };

        if let Some(flag) = resource_type_keyword(name) {
            if negated {
                type_exclude |= flag;
            } else {
                type_include |= flag;
            }
            continue;
        }

        match name {
            "third-party" | "thirdparty" | "3p" => {
                options.domain_type = Some(if negated {
                    DomainType::FirstParty
                } else {
                    DomainType::ThirdParty
                });
            }
            "first-party" | "firstparty" | "1p" => {
                options.domain_type = Some(if negated {
                    DomainType::ThirdParty
                } else {
                    DomainType::FirstParty
                });
            }
            "match-case" | "match_case" if !negated => options.match_case = true,
            "important" if !negated => debug!("ignoring $important (no declarative equivalent)"),
            _ => return Err(Rejection::UnsupportedOption(raw.to_string())),
        }
    }

    options.resource_types = finalize_types(type_include, type_exclude)
        .ok_or_else(|| Rejection::UnsupportedOption(text.trim().to_string()))?;

    Ok(options)
}

/// Explicit types win outright; negations only shape the fallback set.
fn finalize_types(include: ResourceType, exclude: ResourceType) -> Option<ResourceType> {
    let types = if !include.is_empty() {
        include
    } else if !exclude.is_empty() {
        ResourceType::FILTERABLE.difference(exclude)
    } else {
        ResourceType::DEFAULT
    };
    (!types.is_empty()).then_some(types)
}

fn parse_domain_option(value: &str) -> (Vec<String>, Vec<String>) {
    let mut include = Vec::new();
    let mut exclude = Vec::new();

    for raw in value.split('|') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        match raw.strip_prefix('~') {
            Some(domain) if !domain.is_empty() => exclude.push(domain.to_string()),
            Some(_) => {}
            None => include.push(raw.to_string()),
        }
    }

    (include, exclude)
}

fn resource_type_keyword(name: &str) -> Option<ResourceType> {
    match name {
        "script" => Some(ResourceType::SCRIPT),
        "image" => Some(ResourceType::IMAGE),
        "stylesheet" => Some(ResourceType::STYLESHEET),
        "object" => Some(ResourceType::OBJECT),
        "xmlhttprequest" | "xhr" => Some(ResourceType::XMLHTTPREQUEST),
        "ping" => Some(ResourceType::PING),
        "websocket" => Some(ResourceType::WEBSOCKET),
        "media" => Some(ResourceType::MEDIA),
        "font" => Some(ResourceType::FONT),
        "other" => Some(ResourceType::OTHER),
        "subdocument" => Some(ResourceType::SUB_FRAME),
        _ => None,
    }
}

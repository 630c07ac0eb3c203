//! Core type definitions for sieve
//!
//! These types map directly to the declarative rule wire format consumed
//! by the browser rule engine and are shared by the compiler and the sync layer.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Rule identifier. Unique within the id namespace of its tier.
pub type RuleId = u32;

/// Priority of plain blocking rules.
pub const BLOCK_PRIORITY: u32 = 1;
/// Priority of `@@` exception rules; strictly above [`BLOCK_PRIORITY`].
pub const EXCEPTION_PRIORITY: u32 = 2;
/// Priority of whitelist overrides; above anything a filter list can produce.
pub const WHITELIST_PRIORITY: u32 = 10_000;

// =============================================================================
// Rule Actions
// =============================================================================

/// Action to take for a matched request.
///
/// Serialized as `{"type": "block"}` / `{"type": "allow"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RuleAction {
    /// Cancel the request
    Block,
    /// Exception rule (@@...) - lets the request through
    Allow,
}

// =============================================================================
// Domain Type
// =============================================================================

/// Whether the request must be first- or third-party relative to the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DomainType {
    FirstParty,
    ThirdParty,
}

// =============================================================================
// Resource Types (bit mask for type filtering)
// =============================================================================

bitflags::bitflags! {
    /// Request category bit mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceType: u32 {
        const MAIN_FRAME = 1 << 0;
        const SUB_FRAME = 1 << 1;    // iframe/frame
        const STYLESHEET = 1 << 2;
        const SCRIPT = 1 << 3;
        const IMAGE = 1 << 4;
        const FONT = 1 << 5;
        const OBJECT = 1 << 6;
        const XMLHTTPREQUEST = 1 << 7;
        const PING = 1 << 8;
        const CSP_REPORT = 1 << 9;
        const MEDIA = 1 << 10;
        const WEBSOCKET = 1 << 11;
        const WEBTRANSPORT = 1 << 12;
        const WEBBUNDLE = 1 << 13;
        const OTHER = 1 << 14;

        /// Every type the engine knows about
        const ALL = 0x7FFF;
        /// Types addressable through filter option keywords
        const FILTERABLE = Self::SCRIPT.bits()
            | Self::IMAGE.bits()
            | Self::STYLESHEET.bits()
            | Self::OBJECT.bits()
            | Self::XMLHTTPREQUEST.bits()
            | Self::PING.bits()
            | Self::WEBSOCKET.bits()
            | Self::MEDIA.bits()
            | Self::FONT.bits()
            | Self::OTHER.bits()
            | Self::SUB_FRAME.bits();
        /// Applied when a filter carries no type options
        const DEFAULT = Self::SCRIPT.bits()
            | Self::IMAGE.bits()
            | Self::STYLESHEET.bits()
            | Self::XMLHTTPREQUEST.bits()
            | Self::SUB_FRAME.bits()
            | Self::OTHER.bits();
        /// Document types (main_frame + sub_frame)
        const DOCUMENT = Self::MAIN_FRAME.bits() | Self::SUB_FRAME.bits();
    }
}

const WIRE_NAMES: [(ResourceType, &str); 15] = [
    (ResourceType::MAIN_FRAME, "main_frame"),
    (ResourceType::SUB_FRAME, "sub_frame"),
    (ResourceType::STYLESHEET, "stylesheet"),
    (ResourceType::SCRIPT, "script"),
    (ResourceType::IMAGE, "image"),
    (ResourceType::FONT, "font"),
    (ResourceType::OBJECT, "object"),
    (ResourceType::XMLHTTPREQUEST, "xmlhttprequest"),
    (ResourceType::PING, "ping"),
    (ResourceType::CSP_REPORT, "csp_report"),
    (ResourceType::MEDIA, "media"),
    (ResourceType::WEBSOCKET, "websocket"),
    (ResourceType::WEBTRANSPORT, "webtransport"),
    (ResourceType::WEBBUNDLE, "webbundle"),
    (ResourceType::OTHER, "other"),
];

impl ResourceType {
    /// Parse a single engine type name (`"sub_frame"`, `"script"`, ...).
    pub fn from_wire_name(name: &str) -> Option<Self> {
        WIRE_NAMES
            .iter()
            .find(|(_, wire)| *wire == name)
            .map(|(flag, _)| *flag)
    }

    /// Engine names of the contained types, in canonical order.
    pub fn wire_names(self) -> impl Iterator<Item = &'static str> {
        WIRE_NAMES
            .iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, wire)| *wire)
    }
}

impl Serialize for ResourceType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.wire_names())
    }
}

impl<'de> Deserialize<'de> for ResourceType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let names = Vec::<String>::deserialize(deserializer)?;
        names.iter().try_fold(ResourceType::empty(), |acc, name| {
            ResourceType::from_wire_name(name)
                .map(|flag| acc | flag)
                .ok_or_else(|| D::Error::custom(format!("unknown resource type: {name}")))
        })
    }
}

fn default_resource_types() -> ResourceType {
    ResourceType::DEFAULT
}

// =============================================================================
// Rule
// =============================================================================

/// Conditions under which a rule applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_domains: Option<Vec<String>>,
    #[serde(default = "default_resource_types")]
    pub resource_types: ResourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator_domains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded_initiator_domains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_type: Option<DomainType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_url_filter_case_sensitive: Option<bool>,
}

impl Default for RuleCondition {
    fn default() -> Self {
        Self {
            url_filter: None,
            request_domains: None,
            resource_types: ResourceType::DEFAULT,
            initiator_domains: None,
            excluded_initiator_domains: None,
            domain_type: None,
            is_url_filter_case_sensitive: None,
        }
    }
}

/// A normalized declarative rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub priority: u32,
    pub action: RuleAction,
    pub condition: RuleCondition,
    /// Filter line this rule was compiled from (not part of the wire shape)
    #[serde(skip)]
    pub source_text: Option<String>,
}

impl Rule {
    /// Create a blocking rule with default conditions.
    pub fn block(id: RuleId) -> Self {
        Self {
            id,
            priority: BLOCK_PRIORITY,
            action: RuleAction::Block,
            condition: RuleCondition::default(),
            source_text: None,
        }
    }

    /// Whether the rule has something to match on. Rules without a URL
    /// filter and without request domains would match every request.
    pub fn has_pattern(&self) -> bool {
        let has_url = self
            .condition
            .url_filter
            .as_deref()
            .is_some_and(|f| !f.is_empty());
        let has_domains = self
            .condition
            .request_domains
            .as_ref()
            .is_some_and(|d| !d.is_empty());
        has_url || has_domains
    }

    pub fn is_exception(&self) -> bool {
        self.action == RuleAction::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_wire_shape() {
        let mut rule = Rule::block(7);
        rule.condition.request_domains = Some(vec!["ads.example.com".to_string()]);
        rule.condition.resource_types = ResourceType::SCRIPT | ResourceType::SUB_FRAME;
        rule.condition.domain_type = Some(DomainType::ThirdParty);
        rule.source_text = Some("||ads.example.com^$script,subdocument,third-party".to_string());

        let value = serde_json::to_value(&rule).expect("rule should serialize");
        assert_eq!(
            value,
            serde_json::json!({
                "id": 7,
                "priority": 1,
                "action": { "type": "block" },
                "condition": {
                    "requestDomains": ["ads.example.com"],
                    "resourceTypes": ["sub_frame", "script"],
                    "domainType": "thirdParty"
                }
            })
        );
    }

    #[test]
    fn deserializes_wire_shape() {
        let json = r#"{
            "id": 900001,
            "priority": 10000,
            "action": { "type": "allow" },
            "condition": {
                "urlFilter": "/banner/*",
                "resourceTypes": ["main_frame", "image"],
                "isUrlFilterCaseSensitive": false
            }
        }"#;
        let rule: Rule = serde_json::from_str(json).expect("rule should parse");
        assert_eq!(rule.action, RuleAction::Allow);
        assert_eq!(rule.condition.url_filter.as_deref(), Some("/banner/*"));
        assert_eq!(
            rule.condition.resource_types,
            ResourceType::MAIN_FRAME | ResourceType::IMAGE
        );
        assert_eq!(rule.condition.is_url_filter_case_sensitive, Some(false));
        assert_eq!(rule.source_text, None);
    }

    #[test]
    fn rejects_unknown_resource_type() {
        let json = r#"{"id":1,"priority":1,"action":{"type":"block"},
            "condition":{"urlFilter":"x","resourceTypes":["beacon"]}}"#;
        assert!(serde_json::from_str::<Rule>(json).is_err());
    }

    #[test]
    fn missing_resource_types_fall_back_to_default() {
        let json = r#"{"id":1,"priority":1,"action":{"type":"block"},"condition":{"urlFilter":"x"}}"#;
        let rule: Rule = serde_json::from_str(json).expect("rule should parse");
        assert_eq!(rule.condition.resource_types, ResourceType::DEFAULT);
    }

    #[test]
    fn filterable_types_exclude_main_frame() {
        assert!(!ResourceType::FILTERABLE.contains(ResourceType::MAIN_FRAME));
        assert!(ResourceType::FILTERABLE.contains(ResourceType::SUB_FRAME));
        assert_eq!(ResourceType::FILTERABLE.wire_names().count(), 11);
        assert!(ResourceType::ALL.contains(ResourceType::DOCUMENT));
    }

    #[test]
    fn has_pattern_requires_url_or_domain() {
        let mut rule = Rule::block(1);
        assert!(!rule.has_pattern());
        rule.condition.url_filter = Some(String::new());
        assert!(!rule.has_pattern());
        rule.condition.request_domains = Some(vec!["example.com".to_string()]);
        assert!(rule.has_pattern());
    }
}

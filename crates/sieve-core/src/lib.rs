//! sieve Core Library
//!
//! Shared rule model for the sieve filter compiler.
//!
//! # Modules
//!
//! - `types`: Declarative rule representation and its wire (serde) shape
//! - `ids`: Rule tiers and their disjoint id namespaces

pub mod ids;
pub mod types;

// Re-export commonly used types
pub use ids::{IdRange, Tier, DYNAMIC_IDS, SESSION_IDS, STATIC_IDS};
pub use types::{
    DomainType, ResourceType, Rule, RuleAction, RuleCondition, RuleId, BLOCK_PRIORITY,
    EXCEPTION_PRIORITY, WHITELIST_PRIORITY,
};

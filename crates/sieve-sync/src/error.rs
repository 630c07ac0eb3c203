//! Error types for sieve-sync.

use thiserror::Error;

use sieve_compiler::Rejection;
use sieve_core::ids::{IdRange, Tier};
use sieve_core::types::RuleId;

/// Rule store invariant violations. The store is unchanged when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("rule id {id} already exists in {tier}")]
    DuplicateId { tier: Tier, id: RuleId },

    #[error("rule id {id} is outside the {tier} range {range}")]
    IdOutOfRange { tier: Tier, id: RuleId, range: IdRange },

    #[error("{tier} holds at most {capacity} rules")]
    CapacityExceeded { tier: Tier, capacity: usize },

    #[error("no free rule ids left in {0}")]
    IdSpaceExhausted(IdRange),
}

/// Failure reported by the rule engine adapter.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("rule engine rejected the update: {0}")]
    Rejected(String),

    #[error("rule engine unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure reported by the key-value storage adapter.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Failure fetching a filter list source.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no source available for {0}")]
    NotFound(String),
}

/// Error surfaced by the produced operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("filter rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("updating {tier} rules failed after {attempts} attempts: {source}")]
    EngineApplyFailed {
        tier: Tier,
        attempts: u32,
        #[source]
        source: EngineError,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("unknown filter list: {0}")]
    UnknownList(String),

    #[error("no custom filter with id {0}")]
    UnknownFilter(RuleId),

    #[error("'{0}' is not a valid domain")]
    InvalidDomain(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type alias for sieve-sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

//! sieve Rule Sync
//!
//! Keeps compiled rules in a tiered store and reconciles each tier with a
//! declarative rule engine. Static filter lists are refreshed on a fixed
//! interval, custom filters and the whitelist are recompiled on every change.

pub mod adapter;
pub mod allocator;
pub mod blocker;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod file;
pub mod http;
pub mod memory;
pub mod reconciler;
pub mod retry;
pub mod store;

pub use adapter::{Adapters, Clock, KeyValueStore, RuleEngine, SourceFetcher, SystemClock};
pub use allocator::IdAllocator;
pub use blocker::{Blocker, CustomFilter};
pub use config::{FilterListConfig, SyncConfig};
pub use coordinator::{FilterList, FilterListCoordinator, RefreshReport};
pub use error::{EngineError, FetchError, Result, StorageError, StoreError, SyncError};
pub use file::{JsonFileStore, RulesetDirEngine};
pub use http::HttpFetcher;
pub use memory::{ManualClock, MemoryKeyValueStore, MemoryRuleEngine, StaticFetcher};
pub use reconciler::{reconcile, sync_tier, RuleDiff};
pub use retry::RetryPolicy;
pub use store::{CapacityLimits, RuleStore};

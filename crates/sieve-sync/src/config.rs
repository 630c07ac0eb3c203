//! Workspace configuration: which static lists exist, how often they
//! refresh and the engine's capacity limits.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sieve_core::ids::{static_list_window, IdRange, Tier, STATIC_IDS};

use crate::error::{Result, SyncError};
use crate::retry::RetryPolicy;
use crate::store::CapacityLimits;

pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 24 * 60 * 60;

const EASYLIST_URL: &str = "https://easylist.to/easylist/easylist.txt";
const EASYPRIVACY_URL: &str = "https://easylist.to/easylist/easyprivacy.txt";

/// One static filter list and the id window its rules live in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterListConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub id_base: u32,
    pub capacity: u32,
}

fn default_enabled() -> bool {
    true
}

impl FilterListConfig {
    pub fn window(&self) -> IdRange {
        IdRange::new(self.id_base, self.id_base.saturating_add(self.capacity))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    pub lists: Vec<FilterListConfig>,
    pub refresh_interval_secs: u64,
    pub retry: RetryPolicy,
    pub limits: CapacityLimits,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let defaults = [
            ("easylist", "EasyList", EASYLIST_URL),
            ("easyprivacy", "EasyPrivacy", EASYPRIVACY_URL),
        ];
        let lists = defaults
            .iter()
            .enumerate()
            .map(|(i, (id, name, url))| {
                let window = static_list_window(i, defaults.len());
                FilterListConfig {
                    id: id.to_string(),
                    name: name.to_string(),
                    url: Some(url.to_string()),
                    enabled: true,
                    id_base: window.start,
                    capacity: window.len() as u32,
                }
            })
            .collect();

        Self {
            lists,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            retry: RetryPolicy::default(),
            limits: CapacityLimits::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("failed to read '{}': {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Check list ids are unique and id windows are disjoint and inside the
    /// static range.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        let reserved = [Tier::Dynamic.ruleset_id(), Tier::Session.ruleset_id()];

        for (i, list) in self.lists.iter().enumerate() {
            if list.id.is_empty() {
                return Err(SyncError::Config("filter list id must not be empty".into()));
            }
            if reserved.contains(&list.id.as_str()) {
                return Err(SyncError::Config(format!(
                    "filter list id '{}' is reserved",
                    list.id
                )));
            }
            if !seen.insert(list.id.as_str()) {
                return Err(SyncError::Config(format!(
                    "duplicate filter list id '{}'",
                    list.id
                )));
            }

            let window = list.window();
            if window.is_empty() || !STATIC_IDS.contains_range(&window) {
                return Err(SyncError::Config(format!(
                    "list '{}' window {} is not inside {}",
                    list.id, window, STATIC_IDS
                )));
            }
            if let Some(other) = self.lists[..i].iter().find(|o| o.window().overlaps(&window)) {
                return Err(SyncError::Config(format!(
                    "list '{}' window {} overlaps list '{}'",
                    list.id, window, other.id
                )));
            }
        }

        if self.refresh_interval_secs == 0 {
            return Err(SyncError::Config("refresh interval must be positive".into()));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn list(&self, id: &str) -> Option<&FilterListConfig> {
        self.lists.iter().find(|list| list.id == id)
    }
}

//! FILENAME: core/cube-engine/src/config.rs
//! Engine and cache settings.
//!
//! Both structs deserialize from JSON with every field optional, so a caller
//! only spells out what differs from the defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::query::PlanMode;
use crate::store::Durability;

/// Settings for one cube build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Per-query timeout handed to the aggregation source. `None` waits forever.
    pub timeout_ms: Option<u64>,

    pub plan_mode: PlanMode,

    /// Header text of the grand-total row and column.
    #[serde(default = "default_total_label")]
    pub total_label: String,
}

fn default_total_label() -> String {
    "Total".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            timeout_ms: None,
            plan_mode: PlanMode::default(),
            total_label: default_total_label(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_plan_mode(mut self, mode: PlanMode) -> Self {
        self.plan_mode = mode;
        self
    }

    pub fn with_total_label(mut self, label: impl Into<String>) -> Self {
        self.total_label = label.into();
        self
    }
}

/// Settings for the materialized query cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Prefix of every materialization name.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    pub durability: Durability,
}

fn default_namespace() -> String {
    "cube_cache".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            namespace: default_namespace(),
            durability: Durability::default(),
        }
    }
}

impl CacheConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }
}

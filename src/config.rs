//! Coordinator configuration.

use crate::error::{Result, SyncError};
use crate::types::CollectionId;
use serde::{Deserialize, Serialize};

/// Coordinator configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Collections consumers may subscribe to.
    pub collections: Vec<String>,

    /// Return invariant violations as errors instead of logging them.
    /// Default: on in debug builds.
    pub strict_invariants: bool,

    /// Prime a new listener's cache with a one-shot read of each initial query.
    pub bootstrap_with_get_once: bool,

    /// Pagination window around the viewed date.
    pub window: WindowConfig,

    /// Buffer size for a [`ChannelSink`](crate::ChannelSink) built from this config.
    /// Default: 1024
    pub sink_buffer: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            collections: ["bookings", "calendar", "customers", "rinks", "slots"]
                .into_iter()
                .map(String::from)
                .collect(),
            strict_invariants: cfg!(debug_assertions),
            bootstrap_with_get_once: false,
            window: WindowConfig::default(),
            sink_buffer: 1024,
        }
    }
}

impl CoordinatorConfig {
    /// Parse a JSON config; missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(blank) = self.collections.iter().find(|name| name.trim().is_empty()) {
            return Err(SyncError::Config(format!(
                "collection names must not be blank: {blank:?}"
            )));
        }
        if self.sink_buffer == 0 {
            return Err(SyncError::Config("sink_buffer must be positive".to_string()));
        }
        Ok(())
    }

    /// Resolve `name` against the whitelist.
    pub fn collection(&self, name: &str) -> Result<CollectionId> {
        if self.collections.iter().any(|allowed| allowed == name) {
            Ok(CollectionId::new(name))
        } else {
            Err(SyncError::UnknownCollection(name.to_string()))
        }
    }
}

/// Months covered on either side of the viewed date.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub months_before: u32,
    pub months_after: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            months_before: 1,
            months_after: 1,
        }
    }
}

//! Engine configuration.
//!
//! Plain struct with defaults and builder setters. It can also be loaded from
//! JSON; missing fields fall back to their defaults.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for a [`VisibilityEngine`](crate::VisibilityEngine).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
    /// Quiet period before a coalesced "visibility changed" notification fires.
    ///
    /// 0 coalesces everything raised within one scheduler turn.
    pub debounce_ms: u64,

    /// Capacity of the change-queue channel. Producers wait when it is full.
    pub queue_capacity: usize,

    /// Elements processed between cooperative yields inside one batch
    /// (0 = never yield).
    pub yield_every: usize,

    /// Element filters up to this size are checked directly against the
    /// always/never-drawn sets instead of going through the element set cache.
    pub direct_lookup_limit: usize,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 0,
            queue_capacity: 64,
            yield_every: 500,
            direct_lookup_limit: 16,
        }
    }
}

impl VisibilityConfig {
    /// Parse a JSON document; absent keys keep their defaults.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        anyhow::ensure!(config.queue_capacity > 0, "queue_capacity must be > 0");
        Ok(config)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn yield_every(mut self, count: usize) -> Self {
        self.yield_every = count;
        self
    }

    pub fn direct_lookup_limit(mut self, limit: usize) -> Self {
        self.direct_lookup_limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = VisibilityConfig::default();
        assert_eq!(config.debounce(), Duration::ZERO);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.yield_every, 500);
        assert_eq!(config.direct_lookup_limit, 16);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = VisibilityConfig::from_json_str(r#"{ "debounce_ms": 20 }"#).unwrap();
        assert_eq!(config.debounce(), Duration::from_millis(20));
        assert_eq!(config.queue_capacity, 64);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(VisibilityConfig::from_json_str(r#"{ "queue_capacity": 0 }"#).is_err());
    }

    #[test]
    fn test_builder_pattern() {
        let config = VisibilityConfig::default()
            .debounce_ms(5)
            .queue_capacity(0)
            .yield_every(0);
        assert_eq!(config.debounce_ms, 5);
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.yield_every, 0);
    }
}

//! Idle configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing of idle mode entry and exit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    /// How long to wait for idle to exit before dropping the connection
    pub idle_timeout_ms: u64,
    /// Quiet period before entering idle
    pub idle_debounce_ms: u64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 10_000,
            idle_debounce_ms: 10,
        }
    }
}

impl IdleConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn idle_debounce(&self) -> Duration {
        Duration::from_millis(self.idle_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: IdleConfig = serde_json::from_str(r#"{"idle_timeout_ms": 2500}"#).unwrap();
        assert_eq!(config.idle_timeout(), Duration::from_millis(2500));
        assert_eq!(config.idle_debounce(), Duration::from_millis(10));
    }
}

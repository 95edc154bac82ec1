//! Store configuration

use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tidemail_worker::{SortCriterion, WorkerError};

/// View and timing settings for one message store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Start in threaded view
    pub threaded: bool,
    /// Build threads locally even when the backend can thread
    pub client_threads: bool,
    /// Debounce window for local thread rebuilds
    pub client_threads_delay_ms: u64,
    /// Debounce window for batched flag refreshes
    pub flags_delay_ms: u64,
    /// Iterate listings oldest first
    pub reverse_order: bool,
    /// Show replies above their parents
    pub reverse_thread_order: bool,
    /// Order siblings by the listing order rather than by arrival
    pub sort_thread_siblings: bool,
    /// Ask the backend for messages from other folders that complete a thread
    pub thread_context: bool,
    /// Default sort, e.g. `["-r date"]`
    pub default_sort: Vec<String>,
    /// Visible rows until the listing is drawn once
    pub scroll_len: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            threaded: false,
            client_threads: false,
            client_threads_delay_ms: 50,
            flags_delay_ms: 50,
            reverse_order: false,
            reverse_thread_order: false,
            sort_thread_siblings: false,
            thread_context: false,
            default_sort: Vec::new(),
            scroll_len: 25,
        }
    }
}

impl StoreConfig {
    pub fn client_threads_delay(&self) -> Duration {
        Duration::from_millis(self.client_threads_delay_ms)
    }

    pub fn flags_delay(&self) -> Duration {
        Duration::from_millis(self.flags_delay_ms)
    }

    /// Parse `default_sort` into criteria
    pub fn default_sort_criteria(&self) -> CoreResult<Vec<SortCriterion>> {
        let args: Vec<&str> = self
            .default_sort
            .iter()
            .flat_map(|s| s.split_whitespace())
            .collect();
        SortCriterion::parse_args(&args).map_err(|e| match e {
            WorkerError::InvalidAction(msg) => CoreError::InvalidSortCriterion(msg),
            other => CoreError::Worker(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemail_worker::SortField;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"threaded": true, "default_sort": ["-r date", "subject"]}"#).unwrap();
        assert!(config.threaded);
        assert_eq!(config.flags_delay(), Duration::from_millis(50));
        assert_eq!(config.scroll_len, 25);
        assert_eq!(
            config.default_sort_criteria().unwrap(),
            vec![
                SortCriterion::reversed(SortField::Date),
                SortCriterion::new(SortField::Subject),
            ]
        );
    }

    #[test]
    fn test_bad_default_sort() {
        let config = StoreConfig {
            default_sort: vec!["bogus".into()],
            ..Default::default()
        };
        assert!(matches!(
            config.default_sort_criteria(),
            Err(crate::CoreError::InvalidSortCriterion(_))
        ));
    }
}

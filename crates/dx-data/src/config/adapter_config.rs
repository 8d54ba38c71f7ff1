//! Adapter configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::null_handling::NullConfig;
use crate::AdapterError;

/// Columns the portal datastore adds to every table
pub const DEFAULT_EXCLUDED_COLUMNS: &[&str] = &["_id", "id", "_full_text"];

/// Retry policy for transient store failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based), doubling each time
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

/// Configuration for the whole adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Reservoir capacity used for schema inference on large sources
    pub sample_size: usize,

    /// Sources at or below this many rows are read in full for inference
    pub materialization_ceiling: usize,

    /// Upper bound on rows read while filling the reservoir
    pub max_sample_scan: usize,

    /// Rows returned when a request does not say
    pub default_window: usize,

    /// Largest window a single request may ask for
    pub max_window: usize,

    /// Largest number of rows requested from the store in one call
    pub store_batch_limit: usize,

    /// Distinct values over sampled rows (null rows included) below which a column is low cardinality
    pub low_cardinality_ratio: f64,

    /// Columns hidden from schema and rows
    pub excluded_columns: Vec<String>,

    pub retry: RetryConfig,

    pub null_config: NullConfig,

    /// Extra chrono layouts recognized as temporal
    pub datetime_formats: Vec<String>,

    /// Fixed reservoir seed, for reproducible sampling
    pub reservoir_seed: Option<u64>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            sample_size: 500,
            materialization_ceiling: 50_000,
            max_sample_scan: 10_000,
            default_window: 100,
            max_window: 10_000,
            store_batch_limit: 1_000,
            low_cardinality_ratio: 0.5,
            excluded_columns: DEFAULT_EXCLUDED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            retry: RetryConfig::default(),
            null_config: NullConfig::default(),
            datetime_formats: Vec::new(),
            reservoir_seed: None,
        }
    }
}

impl AdapterConfig {
    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, AdapterError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the adapter cannot work with
    pub fn validate(&self) -> Result<(), AdapterError> {
        let positive = [
            ("sample_size", self.sample_size),
            ("default_window", self.default_window),
            ("max_window", self.max_window),
            ("store_batch_limit", self.store_batch_limit),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(AdapterError::Config(format!("{} must be greater than zero", name)));
            }
        }

        if self.default_window > self.max_window {
            return Err(AdapterError::Config(format!(
                "default_window ({}) exceeds max_window ({})",
                self.default_window, self.max_window
            )));
        }
        if !(0.0..=1.0).contains(&self.low_cardinality_ratio) {
            return Err(AdapterError::Config(format!(
                "low_cardinality_ratio must be within 0..=1, got {}",
                self.low_cardinality_ratio
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(AdapterError::Config("retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn is_excluded(&self, column: &str) -> bool {
        self.excluded_columns.iter().any(|c| c == column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AdapterConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.is_excluded("_full_text"));
        assert!(!config.is_excluded("name"));
    }

    #[test]
    fn test_partial_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"sample_size": 50, "retry": {{"max_attempts": 5}}}}"#).unwrap();

        let config = AdapterConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.sample_size, 50);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 100);
        assert_eq!(config.default_window, 100);
    }

    #[test]
    fn test_invalid_windows_rejected() {
        let config = AdapterConfig {
            default_window: 500,
            max_window: 100,
            ..AdapterConfig::default()
        };
        assert!(matches!(config.validate(), Err(AdapterError::Config(_))));
    }

    #[test]
    fn test_backoff_is_bounded() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for(10), Duration::from_millis(2_000));
    }
}

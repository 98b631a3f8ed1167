//! Configuration types

use crate::{ConfigError, StrataError, StrataResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Channel names used on the publish/subscribe transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Device -> edge single-record retrieval requests.
    pub edge_request: String,
    /// Edge -> device retrieval responses.
    pub edge_response: String,
    /// Device -> edge bulk offload publishes.
    pub offload: String,
    /// Collector -> device point and range queries.
    pub query: String,
    /// Where query answers go when the request names no response topic.
    pub default_response: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            edge_request: "edge/measurement/request".to_string(),
            edge_response: "esp32/measurement/response".to_string(),
            offload: "esp32/temperature".to_string(),
            query: "esp32/query".to_string(),
            default_response: "esp32/response".to_string(),
        }
    }
}

/// Master configuration struct.
///
/// The core consumes these values; loading them from disk or flash is the
/// host's job. Every field has a default so partial TOML documents work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    // Cache
    /// Ring buffer capacity `C`.
    pub cache_capacity: usize,
    /// Occupancy percentage that triggers a half-capacity flush.
    pub flush_threshold_pct: u8,
    /// Range results are promoted into the cache only while the total is at
    /// most this percentage of `C`.
    pub promotion_limit_pct: u8,

    // Persistent tier
    /// Key-slot capacity of the partition, used for usage accounting.
    pub partition_max_entries: usize,
    /// Persistent usage percentage that triggers a bulk offload.
    pub offload_threshold_pct: u8,
    /// Oldest entries pushed per offload pass (`N`).
    pub offload_batch_size: usize,

    // Edge channel
    /// Bound on the wait for a correlated edge response, in milliseconds.
    pub edge_request_timeout_ms: u64,
    /// Edge requests allowed in flight at once.
    pub edge_max_in_flight: usize,

    // Sampling and queries
    /// Sampling cadence in seconds; also drives range coverage estimation.
    pub sampling_interval_secs: u32,
    /// Period of the persistent-usage monitor, in seconds.
    pub monitor_interval_secs: u64,
    /// Result cap applied to inbound range queries.
    pub range_response_cap: usize,

    pub topics: TopicConfig,
}

impl Default for StrataConfig {
    fn default() -> Self {
        let cache_capacity = 10;
        Self {
            cache_capacity,
            flush_threshold_pct: 80,
            promotion_limit_pct: 80,
            partition_max_entries: 256,
            offload_threshold_pct: 80,
            offload_batch_size: 10,
            edge_request_timeout_ms: 10_000,
            edge_max_in_flight: 1,
            sampling_interval_secs: 20,
            monitor_interval_secs: 30,
            range_response_cap: cache_capacity * 3,
            topics: TopicConfig::default(),
        }
    }
}

impl StrataConfig {
    /// Bound on the edge await.
    pub fn edge_request_timeout(&self) -> Duration {
        Duration::from_millis(self.edge_request_timeout_ms)
    }

    /// Period of the sampling job.
    pub fn sampling_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.sampling_interval_secs))
    }

    /// Period of the persistent-usage monitor.
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    /// Largest range result that may still be promoted into the cache.
    pub fn promotion_limit(&self) -> usize {
        self.cache_capacity * usize::from(self.promotion_limit_pct) / 100
    }

    /// Parse a TOML document, falling back to defaults for absent fields.
    pub fn from_toml_str(source: &str) -> StrataResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `STRATA_CACHE_CAPACITY`
    /// - `STRATA_FLUSH_THRESHOLD_PCT`
    /// - `STRATA_OFFLOAD_THRESHOLD_PCT`
    /// - `STRATA_OFFLOAD_BATCH_SIZE`
    /// - `STRATA_PARTITION_MAX_ENTRIES`
    /// - `STRATA_EDGE_REQUEST_TIMEOUT_MS`
    /// - `STRATA_EDGE_MAX_IN_FLIGHT`
    /// - `STRATA_SAMPLING_INTERVAL_SECS`
    /// - `STRATA_MONITOR_INTERVAL_SECS`
    /// - `STRATA_RANGE_RESPONSE_CAP`
    pub fn from_env() -> Self {
        fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
            std::env::var(name)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        }

        let defaults = Self::default();
        let cache_capacity = env_or("STRATA_CACHE_CAPACITY", defaults.cache_capacity);

        Self {
            cache_capacity,
            flush_threshold_pct: env_or("STRATA_FLUSH_THRESHOLD_PCT", defaults.flush_threshold_pct),
            promotion_limit_pct: defaults.promotion_limit_pct,
            partition_max_entries: env_or(
                "STRATA_PARTITION_MAX_ENTRIES",
                defaults.partition_max_entries,
            ),
            offload_threshold_pct: env_or(
                "STRATA_OFFLOAD_THRESHOLD_PCT",
                defaults.offload_threshold_pct,
            ),
            offload_batch_size: env_or("STRATA_OFFLOAD_BATCH_SIZE", defaults.offload_batch_size),
            edge_request_timeout_ms: env_or(
                "STRATA_EDGE_REQUEST_TIMEOUT_MS",
                defaults.edge_request_timeout_ms,
            ),
            edge_max_in_flight: env_or("STRATA_EDGE_MAX_IN_FLIGHT", defaults.edge_max_in_flight),
            sampling_interval_secs: env_or(
                "STRATA_SAMPLING_INTERVAL_SECS",
                defaults.sampling_interval_secs,
            ),
            monitor_interval_secs: env_or(
                "STRATA_MONITOR_INTERVAL_SECS",
                defaults.monitor_interval_secs,
            ),
            range_response_cap: env_or("STRATA_RANGE_RESPONSE_CAP", cache_capacity * 3),
            topics: defaults.topics,
        }
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(StrataError::Config) if invalid.
    pub fn validate(&self) -> StrataResult<()> {
        fn invalid(field: &str, value: impl ToString, reason: &str) -> StrataError {
            StrataError::Config(ConfigError::InvalidValue {
                field: field.to_string(),
                value: value.to_string(),
                reason: reason.to_string(),
            })
        }

        if self.cache_capacity == 0 {
            return Err(invalid(
                "cache_capacity",
                self.cache_capacity,
                "cache_capacity must be greater than 0",
            ));
        }

        for (field, pct) in [
            ("flush_threshold_pct", self.flush_threshold_pct),
            ("offload_threshold_pct", self.offload_threshold_pct),
            ("promotion_limit_pct", self.promotion_limit_pct),
        ] {
            if pct == 0 || pct > 100 {
                return Err(invalid(field, pct, "percentage must be within 1..=100"));
            }
        }

        if self.partition_max_entries == 0 {
            return Err(invalid(
                "partition_max_entries",
                self.partition_max_entries,
                "partition_max_entries must be greater than 0",
            ));
        }

        if self.offload_batch_size == 0 {
            return Err(invalid(
                "offload_batch_size",
                self.offload_batch_size,
                "offload_batch_size must be greater than 0",
            ));
        }

        if self.edge_request_timeout_ms == 0 {
            return Err(invalid(
                "edge_request_timeout_ms",
                self.edge_request_timeout_ms,
                "edge_request_timeout_ms must be positive",
            ));
        }

        if self.edge_max_in_flight == 0 {
            return Err(invalid(
                "edge_max_in_flight",
                self.edge_max_in_flight,
                "edge_max_in_flight must be greater than 0",
            ));
        }

        if self.sampling_interval_secs == 0 {
            return Err(invalid(
                "sampling_interval_secs",
                self.sampling_interval_secs,
                "sampling_interval_secs must be positive",
            ));
        }

        if self.monitor_interval_secs == 0 {
            return Err(invalid(
                "monitor_interval_secs",
                self.monitor_interval_secs,
                "monitor_interval_secs must be positive",
            ));
        }

        if self.range_response_cap == 0 {
            return Err(invalid(
                "range_response_cap",
                self.range_response_cap,
                "range_response_cap must be greater than 0",
            ));
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

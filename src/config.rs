//! Configuration for a partition's state engine.
//!
//! All settings can be loaded from the environment with [`EngineConfig::from_env`]:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `PARTITION_ID` | `1` |
//! | `PARTITION_COUNT` | `1` |
//! | `CONSISTENCY_CHECKS_PRECONDITIONS` | `true` |
//! | `CONSISTENCY_CHECKS_FOREIGN_KEYS` | `true` |
//! | `REDISTRIBUTION_INTERVAL_MS` | `10000` |
//! | `MAX_REDISTRIBUTION_INTERVAL_MS` | `300000` |
//! | `ENABLE_PARTITION_METRICS` | `true` |

use std::time::Duration;

use crate::constants::{
    DEFAULT_MAX_REDISTRIBUTION_INTERVAL_MS, DEFAULT_REDISTRIBUTION_INTERVAL_MS,
    MAXIMUM_PARTITIONS, START_PARTITION_ID,
};

/// Which store preconditions are enforced.
///
/// With `preconditions` off, `insert`/`update` behave like `upsert` and
/// `delete_existing` like `delete`. With `foreign_keys` off, references are not
/// looked up on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsistencyChecks {
    pub preconditions: bool,
    pub foreign_keys: bool,
}

impl ConsistencyChecks {
    /// All checks disabled.
    pub fn disabled() -> Self {
        Self {
            preconditions: false,
            foreign_keys: false,
        }
    }
}

impl Default for ConsistencyChecks {
    fn default() -> Self {
        Self {
            preconditions: true,
            foreign_keys: true,
        }
    }
}

/// Engine configuration for one partition.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// This partition's id (1-based).
    pub partition_id: i32,

    /// Number of partitions in the cluster.
    pub partition_count: i32,

    /// Store consistency checks.
    pub consistency_checks: ConsistencyChecks,

    /// Interval between redistribution cycles while everything is delivered.
    pub redistribution_interval: Duration,

    /// Cap of the redistribution backoff.
    pub max_redistribution_interval: Duration,

    /// Whether partition metrics are installed by the transition pipeline.
    pub enable_partition_metrics: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            partition_id: START_PARTITION_ID,
            partition_count: 1,
            consistency_checks: ConsistencyChecks::default(),
            redistribution_interval: Duration::from_millis(DEFAULT_REDISTRIBUTION_INTERVAL_MS),
            max_redistribution_interval: Duration::from_millis(
                DEFAULT_MAX_REDISTRIBUTION_INTERVAL_MS,
            ),
            enable_partition_metrics: true,
        }
    }
}

impl EngineConfig {
    /// Create a config for `partition_id` of `partition_count`, other settings default.
    pub fn for_partition(partition_id: i32, partition_count: i32) -> Self {
        Self {
            partition_id,
            partition_count,
            ..Self::default()
        }
    }

    /// All partition ids of the cluster, in order.
    pub fn partition_ids(&self) -> impl Iterator<Item = i32> + use<> {
        START_PARTITION_ID..=self.partition_count
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let defaults = Self::default();

        let partition_id: i32 = std::env::var("PARTITION_ID")
            .unwrap_or_else(|_| defaults.partition_id.to_string())
            .parse()
            .map_err(|e| format!("Invalid PARTITION_ID: {}", e))?;

        let partition_count: i32 = std::env::var("PARTITION_COUNT")
            .unwrap_or_else(|_| defaults.partition_count.to_string())
            .parse()
            .map_err(|e| format!("Invalid PARTITION_COUNT: {}", e))?;

        let preconditions = std::env::var("CONSISTENCY_CHECKS_PRECONDITIONS")
            .map(|v| parse_flag(&v))
            .unwrap_or(defaults.consistency_checks.preconditions);

        let foreign_keys = std::env::var("CONSISTENCY_CHECKS_FOREIGN_KEYS")
            .map(|v| parse_flag(&v))
            .unwrap_or(defaults.consistency_checks.foreign_keys);

        let redistribution_interval_ms: u64 = std::env::var("REDISTRIBUTION_INTERVAL_MS")
            .unwrap_or_else(|_| DEFAULT_REDISTRIBUTION_INTERVAL_MS.to_string())
            .parse()
            .map_err(|e| format!("Invalid REDISTRIBUTION_INTERVAL_MS: {}", e))?;

        let max_redistribution_interval_ms: u64 = std::env::var("MAX_REDISTRIBUTION_INTERVAL_MS")
            .unwrap_or_else(|_| DEFAULT_MAX_REDISTRIBUTION_INTERVAL_MS.to_string())
            .parse()
            .map_err(|e| format!("Invalid MAX_REDISTRIBUTION_INTERVAL_MS: {}", e))?;

        let enable_partition_metrics = std::env::var("ENABLE_PARTITION_METRICS")
            .map(|v| parse_flag(&v))
            .unwrap_or(defaults.enable_partition_metrics);

        let config = Self {
            partition_id,
            partition_count,
            consistency_checks: ConsistencyChecks {
                preconditions,
                foreign_keys,
            },
            redistribution_interval: Duration::from_millis(redistribution_interval_ms),
            max_redistribution_interval: Duration::from_millis(max_redistribution_interval_ms),
            enable_partition_metrics,
        };

        config.validate().map_err(|errors| errors.join("; "))?;
        Ok(config)
    }

    /// Validate the configuration and return any errors found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let partition_range = START_PARTITION_ID..=MAXIMUM_PARTITIONS;
        if !partition_range.contains(&self.partition_id) {
            errors.push(format!(
                "partition_id ({}) must be between {} and {}",
                self.partition_id, START_PARTITION_ID, MAXIMUM_PARTITIONS
            ));
        }
        if !partition_range.contains(&self.partition_count) {
            errors.push(format!(
                "partition_count ({}) must be between {} and {}",
                self.partition_count, START_PARTITION_ID, MAXIMUM_PARTITIONS
            ));
        }
        if self.partition_id > self.partition_count {
            errors.push(format!(
                "partition_id ({}) must not exceed partition_count ({})",
                self.partition_id, self.partition_count
            ));
        }

        if self.redistribution_interval.is_zero() {
            errors.push("redistribution_interval must be non-zero".to_string());
        }
        if self.max_redistribution_interval.is_zero() {
            errors.push("max_redistribution_interval must be non-zero".to_string());
        }
        if self.redistribution_interval > self.max_redistribution_interval {
            errors.push(format!(
                "redistribution_interval ({:?}) must not exceed max_redistribution_interval ({:?})",
                self.redistribution_interval, self.max_redistribution_interval
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn parse_flag(value: &str) -> bool {
    value.to_lowercase() != "false" && value != "0"
}

//! Centralized engine constants.
//!
//! # Categories
//!
//! - **Partition Constants**: partition id range
//! - **Key Constants**: layout of generated keys
//! - **Redistribution Constants**: retry cadence for pending distributions

// =============================================================================
// Partition Constants
// =============================================================================

/// The id of the first partition. Partition ids are 1-based.
pub const START_PARTITION_ID: i32 = 1;

/// Maximum number of partitions a cluster can have.
///
/// Bounded by [`PARTITION_BITS`]: the partition id is encoded in the upper bits
/// of every generated key.
pub const MAXIMUM_PARTITIONS: i32 = (1 << PARTITION_BITS) - 1;

// =============================================================================
// Key Constants
// =============================================================================

/// Number of low bits of a generated key holding the per-partition counter.
pub const KEY_BITS: u32 = 51;

/// Number of high bits of a generated key holding the partition id.
pub const PARTITION_BITS: u32 = 13;

/// Largest counter value a partition may hand out.
pub const MAX_KEY_COUNTER: u64 = (1 << KEY_BITS) - 1;

// =============================================================================
// Redistribution Constants
// =============================================================================

/// Default interval between redistribution cycles.
pub const DEFAULT_REDISTRIBUTION_INTERVAL_MS: u64 = 10_000;

/// Default cap for the exponential backoff of a redistribution cycle.
pub const DEFAULT_MAX_REDISTRIBUTION_INTERVAL_MS: u64 = 5 * 60 * 1000;

// =============================================================================
// Metrics Constants
// =============================================================================

/// Prefix of every metric registered in the startup registry.
pub const METRICS_PREFIX: &str = "statehouse";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout_fills_u64() {
        assert_eq!(KEY_BITS + PARTITION_BITS, 64);
        assert_eq!(MAXIMUM_PARTITIONS, 8191);
    }

    #[test]
    fn test_redistribution_defaults_are_ordered() {
        assert!(DEFAULT_REDISTRIBUTION_INTERVAL_MS < DEFAULT_MAX_REDISTRIBUTION_INTERVAL_MS);
    }
}

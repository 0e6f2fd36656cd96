//! Entity state of a partition.
//!
//! Each module owns one or more column families of the partition's
//! [`StateDb`](crate::db::StateDb) and keeps its entity-specific invariants.
//! Read-only consumers depend on the `*StateReader` traits only.

pub mod command;
pub mod distribution;
pub mod key_generator;
pub mod processing;
pub mod user;

pub use command::{DistributionCommand, EngineCommand, EngineResponse, UserCommand};
pub use distribution::{
    CommandDistributionRecord, DistributionState, DistributionStateReader, QueuedDistribution,
    RECORD_VERSION,
};
pub use key_generator::{KeyGenerator, decode_counter, decode_partition_id, encode_partition_id};
pub use processing::ProcessingState;
pub use user::{PersistedUser, UserRecord, UserState, UserStateReader};

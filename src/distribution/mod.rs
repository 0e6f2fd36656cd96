//! Cross-partition command distribution.
//!
//! - [`behavior`]: what distributing and acknowledging a command does to state
//! - [`sender`]: the transport seam to other partitions
//! - [`redistributor`]: leader-side retry of unacknowledged distributions

pub mod behavior;
pub mod redistributor;
pub mod sender;

pub use behavior::{CommandDistributionBehavior, DistributionEffects, DistributionSend};
pub use redistributor::{CommandRedistributor, RedistributorHandle};
pub use sender::{DeliveryError, DistributionSender, NoopSender};

#[cfg(any(test, feature = "test-utilities"))]
pub use sender::{RecordingSender, SentDistribution};

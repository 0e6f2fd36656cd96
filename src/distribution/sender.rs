//! The transport seam for distributed commands.
//!
//! The engine only tracks distribution state. Delivering a command to another
//! partition is the job of a [`DistributionSender`] supplied by the embedding
//! broker. Delivery failures are logged and retried by the redistributor; they
//! never fail a command.

use async_trait::async_trait;
use thiserror::Error;

use crate::state::CommandDistributionRecord;

/// A failed delivery attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Failed to deliver distribution {distribution_key} to partition {partition}: {reason}")]
pub struct DeliveryError {
    pub partition: i32,
    pub distribution_key: u64,
    pub reason: String,
}

impl DeliveryError {
    pub fn new(partition: i32, distribution_key: u64, reason: impl Into<String>) -> Self {
        Self {
            partition,
            distribution_key,
            reason: reason.into(),
        }
    }
}

/// Delivers distributed commands to their target partitions.
#[async_trait]
pub trait DistributionSender: Send + Sync {
    /// Send `record` to `partition`. Sending the same distribution twice must be harmless.
    async fn send(
        &self,
        partition: i32,
        distribution_key: u64,
        record: &CommandDistributionRecord,
    ) -> Result<(), DeliveryError>;
}

/// A sender that drops everything, for replicas that never lead.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSender;

#[async_trait]
impl DistributionSender for NoopSender {
    async fn send(
        &self,
        _partition: i32,
        _distribution_key: u64,
        _record: &CommandDistributionRecord,
    ) -> Result<(), DeliveryError> {
        Ok(())
    }
}

#[cfg(any(test, feature = "test-utilities"))]
pub use recording::{RecordingSender, SentDistribution};

#[cfg(any(test, feature = "test-utilities"))]
mod recording {
    //! In-memory sender recording every send, with injectable failures.
    //!
    //! Available when the `test-utilities` feature is enabled, or during unit tests.

    use std::collections::HashSet;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    use async_trait::async_trait;

    use super::{DeliveryError, DistributionSender};
    use crate::state::CommandDistributionRecord;

    /// One recorded send attempt.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SentDistribution {
        pub partition: i32,
        pub distribution_key: u64,
        pub record: CommandDistributionRecord,
        pub delivered: bool,
    }

    #[derive(Default)]
    struct Inner {
        sent: Vec<SentDistribution>,
        unreachable: HashSet<i32>,
    }

    /// Records all send attempts. Sends to unreachable partitions fail.
    #[derive(Default)]
    pub struct RecordingSender {
        inner: Mutex<Inner>,
    }

    impl RecordingSender {
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> MutexGuard<'_, Inner> {
            self.inner.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Make sends to `partition` fail until it is reachable again.
        pub fn set_unreachable(&self, partition: i32, unreachable: bool) {
            let mut inner = self.lock();
            if unreachable {
                inner.unreachable.insert(partition);
            } else {
                inner.unreachable.remove(&partition);
            }
        }

        /// All attempts, in order.
        pub fn attempts(&self) -> Vec<SentDistribution> {
            self.lock().sent.clone()
        }

        /// Successful sends as (partition, distribution key), in order.
        pub fn delivered(&self) -> Vec<(i32, u64)> {
            self.lock()
                .sent
                .iter()
                .filter(|s| s.delivered)
                .map(|s| (s.partition, s.distribution_key))
                .collect()
        }

        pub fn clear(&self) {
            self.lock().sent.clear();
        }
    }

    #[async_trait]
    impl DistributionSender for RecordingSender {
        async fn send(
            &self,
            partition: i32,
            distribution_key: u64,
            record: &CommandDistributionRecord,
        ) -> Result<(), DeliveryError> {
            let mut inner = self.lock();
            let delivered = !inner.unreachable.contains(&partition);
            inner.sent.push(SentDistribution {
                partition,
                distribution_key,
                record: record.clone(),
                delivered,
            });
            if delivered {
                Ok(())
            } else {
                Err(DeliveryError::new(
                    partition,
                    distribution_key,
                    "partition unreachable",
                ))
            }
        }
    }
}

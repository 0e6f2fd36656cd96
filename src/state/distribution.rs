//! Command distribution state.
//!
//! Three independently keyed families track the distribution of a command to
//! other partitions:
//!
//! | Family | Key | Value |
//! |--------|-----|-------|
//! | `COMMAND_DISTRIBUTION_RECORD` | distribution key | [`CommandDistributionRecord`] |
//! | `PENDING_DISTRIBUTION` | (FK distribution key, partition) | nil |
//! | `QUEUED_DISTRIBUTION` | (queue, partition, insertion key) | FK distribution key |
//!
//! A pending entry means the partition has not acknowledged the distribution
//! yet. A queued entry waits for its turn before it becomes pending; queues
//! are FIFO per (queue, partition), ordered by insertion key. A distribution
//! is complete only once it is neither pending nor queued for any partition.

use std::collections::BTreeSet;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::{ColumnFamily, ColumnFamilyName, DbForeignKey, DbNil, StateDb};
use crate::error::{StateError, StateResult, ViolationKind};
use crate::impl_bincode_value;

/// Current version of the distribution record payload.
pub const RECORD_VERSION: u16 = 1;

/// A command that must be applied on a set of partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDistributionRecord {
    /// Payload format version.
    pub version: u16,
    /// The partition the command was first applied on.
    pub origin_partition: i32,
    /// Queue serializing delivery, if any.
    pub queue: Option<String>,
    /// Kind of the distributed command, e.g. `USER`.
    pub value_type: String,
    /// What to do with the value, e.g. `CREATE`.
    pub intent: String,
    /// Opaque encoded command to re-apply on the target partition.
    pub command_value: Bytes,
    /// Partitions the command must reach. Empty means all other partitions.
    pub target_partitions: BTreeSet<i32>,
}

impl CommandDistributionRecord {
    pub fn new(
        origin_partition: i32,
        value_type: impl Into<String>,
        intent: impl Into<String>,
        command_value: impl Into<Bytes>,
    ) -> Self {
        Self {
            version: RECORD_VERSION,
            origin_partition,
            queue: None,
            value_type: value_type.into(),
            intent: intent.into(),
            command_value: command_value.into(),
            target_partitions: BTreeSet::new(),
        }
    }

    /// Deliver through `queue`, one distribution in flight per target partition.
    pub fn in_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Restrict delivery to `partitions`.
    pub fn with_targets(mut self, partitions: impl IntoIterator<Item = i32>) -> Self {
        self.target_partitions = partitions.into_iter().collect();
        self
    }
}

impl_bincode_value!(CommandDistributionRecord);

/// An entry of a distribution queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueuedDistribution {
    pub partition: i32,
    pub insertion_key: u64,
    pub distribution_key: u64,
}

/// Narrow read access to distribution state.
pub trait DistributionStateReader {
    fn get_command_distribution_record(
        &self,
        distribution_key: u64,
    ) -> StateResult<Option<CommandDistributionRecord>>;

    /// Returns true if any partition still owes an acknowledgment for the distribution.
    fn has_pending_distribution(&self, distribution_key: u64) -> StateResult<bool>;

    fn has_pending_distribution_for(
        &self,
        distribution_key: u64,
        partition: i32,
    ) -> StateResult<bool>;

    /// Partitions still owing an acknowledgment, in ascending order.
    fn pending_partitions(&self, distribution_key: u64) -> StateResult<Vec<i32>>;

    /// Visit all pending (distribution key, partition) pairs until `visitor` returns false.
    fn for_each_pending_distribution(
        &self,
        visitor: &mut dyn FnMut(u64, i32) -> bool,
    ) -> StateResult<()>;

    /// The head of the queue for `partition`, without removing it.
    fn next_queued_distribution(
        &self,
        queue: &str,
        partition: i32,
    ) -> StateResult<Option<QueuedDistribution>>;

    /// All entries of the queue for `partition`, head first.
    fn queued_distributions(
        &self,
        queue: &str,
        partition: i32,
    ) -> StateResult<Vec<QueuedDistribution>>;

    /// Returns true if any partition's queue named `queue` has entries.
    fn has_queued_distributions(&self, queue: &str) -> StateResult<bool>;

    /// Returns true if the distribution still waits in the queue of any of its targets.
    fn is_queued(&self, distribution_key: u64) -> StateResult<bool>;
}

type PendingKey = (DbForeignKey<u64>, i32);
type QueuedKey = (String, i32, u64);

/// Mutable distribution state.
#[derive(Clone)]
pub struct DistributionState {
    records: ColumnFamily<u64, CommandDistributionRecord>,
    pending: ColumnFamily<PendingKey, DbNil>,
    queued: ColumnFamily<QueuedKey, DbForeignKey<u64>>,
    preconditions: bool,
}

fn record_fk(distribution_key: u64) -> DbForeignKey<u64> {
    DbForeignKey::new(distribution_key, ColumnFamilyName::CommandDistributionRecord)
}

impl DistributionState {
    pub fn new(db: &StateDb) -> Self {
        Self {
            records: db.create_column_family(ColumnFamilyName::CommandDistributionRecord),
            pending: db.create_column_family(ColumnFamilyName::PendingDistribution),
            queued: db.create_column_family(ColumnFamilyName::QueuedDistribution),
            preconditions: db.checks().preconditions,
        }
    }

    /// Store the record of a new distribution. Fails if the key is taken.
    pub fn add_command_distribution(
        &self,
        distribution_key: u64,
        record: &CommandDistributionRecord,
    ) -> StateResult<()> {
        self.records.insert(&distribution_key, record)
    }

    /// Delete the record of a distribution.
    ///
    /// Fails while a pending or queued entry still refers to it, unless
    /// preconditions are disabled.
    pub fn remove_command_distribution(&self, distribution_key: u64) -> StateResult<()> {
        if self.preconditions {
            let referencing = if self.has_pending_distribution(distribution_key)? {
                Some(ColumnFamilyName::PendingDistribution)
            } else if self.is_queued(distribution_key)? {
                Some(ColumnFamilyName::QueuedDistribution)
            } else {
                None
            };
            if let Some(referencing) = referencing {
                return Err(StateError::violation(
                    ColumnFamilyName::CommandDistributionRecord,
                    ViolationKind::DanglingReference { referencing },
                    distribution_key.to_string(),
                ));
            }
        }
        self.records.delete_existing(&distribution_key)
    }

    /// Mark `partition` as owing an acknowledgment.
    pub fn add_pending_distribution(&self, distribution_key: u64, partition: i32) -> StateResult<()> {
        self.pending
            .insert(&(record_fk(distribution_key), partition), &DbNil)
    }

    /// Record the acknowledgment of `partition`. A no-op if it was not pending.
    pub fn remove_pending_distribution(
        &self,
        distribution_key: u64,
        partition: i32,
    ) -> StateResult<()> {
        let removed = self
            .pending
            .delete(&(record_fk(distribution_key), partition))?;
        if !removed {
            debug!(distribution_key, partition, "Pending distribution already removed");
        }
        Ok(())
    }

    /// Append to the tail of the queue for `partition`.
    ///
    /// `insertion_key` must be strictly increasing per (queue, partition).
    pub fn enqueue_command_distribution(
        &self,
        queue: &str,
        insertion_key: u64,
        distribution_key: u64,
        partition: i32,
    ) -> StateResult<()> {
        self.queued.insert(
            &(queue.to_string(), partition, insertion_key),
            &record_fk(distribution_key),
        )
    }

    /// Remove and return the head of the queue for `partition`.
    ///
    /// A no-op returning `None` if the queue is empty.
    pub fn pop_queued_distribution(
        &self,
        queue: &str,
        partition: i32,
    ) -> StateResult<Option<QueuedDistribution>> {
        let Some(head) = self.next_queued_distribution(queue, partition)? else {
            return Ok(None);
        };
        self.queued
            .delete_existing(&(queue.to_string(), partition, head.insertion_key))?;
        Ok(Some(head))
    }

    /// Committed pending distributions with their records, ignoring any open transaction.
    pub fn committed_pending_distributions(
        &self,
    ) -> StateResult<Vec<(u64, i32, CommandDistributionRecord)>> {
        let mut pairs = Vec::new();
        self.pending.for_each_committed(|(fk, partition), _| {
            pairs.push((*fk.inner(), partition));
            true
        })?;

        let mut pending = Vec::with_capacity(pairs.len());
        for (distribution_key, partition) in pairs {
            if let Some(record) = self.records.get_committed(&distribution_key)? {
                pending.push((distribution_key, partition, record));
            }
        }
        Ok(pending)
    }
}

impl DistributionStateReader for DistributionState {
    fn get_command_distribution_record(
        &self,
        distribution_key: u64,
    ) -> StateResult<Option<CommandDistributionRecord>> {
        self.records.get(&distribution_key)
    }

    fn has_pending_distribution(&self, distribution_key: u64) -> StateResult<bool> {
        self.pending.exists_with_prefix(&record_fk(distribution_key))
    }

    fn has_pending_distribution_for(
        &self,
        distribution_key: u64,
        partition: i32,
    ) -> StateResult<bool> {
        self.pending.exists(&(record_fk(distribution_key), partition))
    }

    fn pending_partitions(&self, distribution_key: u64) -> StateResult<Vec<i32>> {
        let mut partitions = Vec::new();
        self.pending
            .while_prefix(&record_fk(distribution_key), |(_, partition), _| {
                partitions.push(partition);
                true
            })?;
        Ok(partitions)
    }

    fn for_each_pending_distribution(
        &self,
        visitor: &mut dyn FnMut(u64, i32) -> bool,
    ) -> StateResult<()> {
        self.pending
            .for_each(|(fk, partition), _| visitor(*fk.inner(), partition))
    }

    fn next_queued_distribution(
        &self,
        queue: &str,
        partition: i32,
    ) -> StateResult<Option<QueuedDistribution>> {
        Ok(self
            .queued
            .first_with_prefix(&(queue.to_string(), partition))?
            .map(|((_, partition, insertion_key), fk)| QueuedDistribution {
                partition,
                insertion_key,
                distribution_key: fk.into_inner(),
            }))
    }

    fn queued_distributions(
        &self,
        queue: &str,
        partition: i32,
    ) -> StateResult<Vec<QueuedDistribution>> {
        let mut entries = Vec::new();
        self.queued
            .while_prefix(&(queue.to_string(), partition), |(_, partition, insertion_key), fk| {
                entries.push(QueuedDistribution {
                    partition,
                    insertion_key,
                    distribution_key: fk.into_inner(),
                });
                true
            })?;
        Ok(entries)
    }

    fn has_queued_distributions(&self, queue: &str) -> StateResult<bool> {
        self.queued.exists_with_prefix(&queue.to_string())
    }

    fn is_queued(&self, distribution_key: u64) -> StateResult<bool> {
        let Some(record) = self.records.get(&distribution_key)? else {
            return Ok(false);
        };
        let Some(queue) = record.queue else {
            return Ok(false);
        };

        for partition in record.target_partitions {
            let mut found = false;
            self.queued
                .while_prefix(&(queue.clone(), partition), |_, fk| {
                    found = *fk.inner() == distribution_key;
                    !found
                })?;
            if found {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

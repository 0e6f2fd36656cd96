//! Distribution and acknowledgment of commands across partitions.
//!
//! # Lifecycle
//!
//! ```text
//! distribute ──► record stored
//!     │
//!     ├─ unqueued: every target pending, sent immediately
//!     └─ queued:   every target enqueued; a target whose queue was empty
//!                  gets the new entry as head, which is made pending and sent
//!
//! acknowledge(key, p) ──► pending (key, p) removed
//!     ├─ queued: head of (queue, p) popped, next head made pending and sent
//!     └─ neither pending nor queued anywhere: record removed (distribution complete)
//! ```
//!
//! The head of a queue stays queued while it is in flight, so at most one
//! distribution per (queue, partition) is pending at any time. Queues of
//! different targets advance independently: a queued distribution may be
//! acknowledged by one target while it still waits behind another
//! distribution in the queue of the next. Sends are only
//! described here; the leader performs them after the transaction commits.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StateResult;
use crate::state::{
    CommandDistributionRecord, DistributionState, DistributionStateReader, KeyGenerator,
};

/// A send the leader must perform once the transaction has committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionSend {
    pub partition: i32,
    pub distribution_key: u64,
    pub record: CommandDistributionRecord,
}

/// Outcome of a distribution command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionEffects {
    /// The distribution the command was about.
    pub distribution_key: Option<u64>,
    /// Sends to perform after commit.
    pub sends: Vec<DistributionSend>,
    /// True if every target acknowledged and the record is gone.
    pub completed: bool,
}

/// Distributes commands and processes acknowledgments for one partition.
#[derive(Clone)]
pub struct CommandDistributionBehavior {
    partition_id: i32,
    partition_count: i32,
    state: DistributionState,
    key_generator: KeyGenerator,
}

impl CommandDistributionBehavior {
    pub fn new(
        partition_id: i32,
        partition_count: i32,
        state: DistributionState,
        key_generator: KeyGenerator,
    ) -> Self {
        Self {
            partition_id,
            partition_count,
            state,
            key_generator,
        }
    }

    /// Register `record` for distribution to its target partitions.
    ///
    /// Without explicit targets the command goes to every other partition. A
    /// distribution without any target completes immediately and stores nothing.
    pub fn distribute(&self, record: CommandDistributionRecord) -> StateResult<DistributionEffects> {
        let distribution_key = self.key_generator.next_key()?;
        let targets = self.targets(&record);

        if targets.is_empty() {
            debug!(distribution_key, "Distribution has no target partitions");
            return Ok(DistributionEffects {
                distribution_key: Some(distribution_key),
                sends: Vec::new(),
                completed: true,
            });
        }

        let record = CommandDistributionRecord {
            origin_partition: self.partition_id,
            target_partitions: targets.clone(),
            ..record
        };
        self.state.add_command_distribution(distribution_key, &record)?;

        let mut effects = DistributionEffects {
            distribution_key: Some(distribution_key),
            ..DistributionEffects::default()
        };

        for partition in targets {
            match &record.queue {
                None => {
                    self.state
                        .add_pending_distribution(distribution_key, partition)?;
                    effects.sends.push(DistributionSend {
                        partition,
                        distribution_key,
                        record: record.clone(),
                    });
                }
                Some(queue) => {
                    self.state.enqueue_command_distribution(
                        queue,
                        distribution_key,
                        distribution_key,
                        partition,
                    )?;
                    let head = self.state.next_queued_distribution(queue, partition)?;
                    if head.is_some_and(|head| head.distribution_key == distribution_key) {
                        self.state
                            .add_pending_distribution(distribution_key, partition)?;
                        effects.sends.push(DistributionSend {
                            partition,
                            distribution_key,
                            record: record.clone(),
                        });
                    }
                }
            }
        }

        debug!(
            distribution_key,
            queue = ?record.queue,
            sends = effects.sends.len(),
            "Registered command distribution"
        );
        Ok(effects)
    }

    /// Process the acknowledgment of `partition` for `distribution_key`.
    ///
    /// Acknowledging a pair that is not pending is a no-op.
    pub fn acknowledge(
        &self,
        distribution_key: u64,
        partition: i32,
    ) -> StateResult<DistributionEffects> {
        let mut effects = DistributionEffects {
            distribution_key: Some(distribution_key),
            ..DistributionEffects::default()
        };

        if !self
            .state
            .has_pending_distribution_for(distribution_key, partition)?
        {
            debug!(distribution_key, partition, "Ignoring duplicate acknowledgment");
            return Ok(effects);
        }

        let record = self
            .state
            .get_command_distribution_record(distribution_key)?;
        self.state
            .remove_pending_distribution(distribution_key, partition)?;

        if let Some(queue) = record.as_ref().and_then(|r| r.queue.as_deref()) {
            self.continue_queue(queue, distribution_key, partition, &mut effects)?;
        }

        if !self.state.has_pending_distribution(distribution_key)?
            && !self.state.is_queued(distribution_key)?
        {
            self.state.remove_command_distribution(distribution_key)?;
            effects.completed = true;
            debug!(distribution_key, "Command distribution completed");
        }

        Ok(effects)
    }

    fn continue_queue(
        &self,
        queue: &str,
        acknowledged: u64,
        partition: i32,
        effects: &mut DistributionEffects,
    ) -> StateResult<()> {
        match self.state.next_queued_distribution(queue, partition)? {
            Some(head) if head.distribution_key == acknowledged => {
                self.state.pop_queued_distribution(queue, partition)?;
            }
            Some(head) => {
                warn!(
                    queue,
                    partition,
                    acknowledged,
                    head = head.distribution_key,
                    "Acknowledged distribution is not at the head of its queue"
                );
                return Ok(());
            }
            None => return Ok(()),
        }

        let Some(next) = self.state.next_queued_distribution(queue, partition)? else {
            return Ok(());
        };
        let Some(record) = self
            .state
            .get_command_distribution_record(next.distribution_key)?
        else {
            warn!(
                queue,
                partition,
                distribution_key = next.distribution_key,
                "Queued distribution has no record, queue is stuck"
            );
            return Ok(());
        };
        self.state
            .add_pending_distribution(next.distribution_key, partition)?;
        effects.sends.push(DistributionSend {
            partition,
            distribution_key: next.distribution_key,
            record,
        });
        Ok(())
    }

    fn targets(&self, record: &CommandDistributionRecord) -> BTreeSet<i32> {
        if record.target_partitions.is_empty() {
            (1..=self.partition_count)
                .filter(|p| *p != self.partition_id)
                .collect()
        } else {
            record
                .target_partitions
                .iter()
                .copied()
                .filter(|p| *p != self.partition_id)
                .collect()
        }
    }
}

//! Leader-side retry of unacknowledged distributions.
//!
//! The leader sends a distribution once when the distributing command is
//! processed. Sends can be lost, and a new leader never saw the original sends,
//! so every pending distribution is periodically sent again until it is
//! acknowledged. Only committed state is read, which makes the redistributor
//! safe to start right after failover.
//!
//! Each pending (distribution key, partition) pair gets its own exponential
//! backoff: first retry one `interval` after the pair was first seen, then
//! doubling, capped at `max_interval`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::sender::DistributionSender;
use crate::metrics;
use crate::state::DistributionState;

/// How long [`RedistributorHandle::stop`] waits before aborting the task.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct RetrySchedule {
    due: Instant,
    backoff: ExponentialBackoff,
}

/// Periodically re-sends pending distributions of one partition.
pub struct CommandRedistributor {
    partition_id: i32,
    state: DistributionState,
    sender: Arc<dyn DistributionSender>,
    interval: Duration,
    max_interval: Duration,
    retries: HashMap<(u64, i32), RetrySchedule>,
}

impl CommandRedistributor {
    pub fn new(
        partition_id: i32,
        state: DistributionState,
        sender: Arc<dyn DistributionSender>,
        interval: Duration,
        max_interval: Duration,
    ) -> Self {
        Self {
            partition_id,
            state,
            sender,
            interval,
            max_interval: max_interval.max(interval),
            retries: HashMap::new(),
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBuilder::default()
            .with_min_delay(self.interval)
            .with_max_delay(self.max_interval)
            .with_max_times(usize::MAX)
            .build()
    }

    /// Number of pending distributions currently tracked.
    pub fn tracked(&self) -> usize {
        self.retries.len()
    }

    /// Run one redistribution cycle at `now`, returning the number of sends attempted.
    pub async fn run_cycle(&mut self, now: Instant) -> usize {
        let pending = match self.state.committed_pending_distributions() {
            Ok(pending) => pending,
            Err(e) => {
                warn!(
                    partition_id = self.partition_id,
                    error = %e,
                    "Failed to read pending distributions"
                );
                return 0;
            }
        };

        self.retries.retain(|pair, _| {
            pending
                .iter()
                .any(|(key, partition, _)| (*key, *partition) == *pair)
        });

        let mut attempted = 0;
        for (distribution_key, partition, record) in &pending {
            let pair = (*distribution_key, *partition);
            if !self.retries.contains_key(&pair) {
                let mut backoff = self.backoff();
                let first = backoff.next().unwrap_or(self.interval);
                self.retries.insert(
                    pair,
                    RetrySchedule {
                        due: now + first,
                        backoff,
                    },
                );
                continue;
            }

            let Some(schedule) = self.retries.get_mut(&pair) else {
                continue;
            };
            if schedule.due > now {
                continue;
            }

            attempted += 1;
            match self
                .sender
                .send(*partition, *distribution_key, record)
                .await
            {
                Ok(()) => {
                    debug!(
                        partition_id = self.partition_id,
                        distribution_key, partition, "Redistributed command"
                    );
                    metrics::record_redistribution(true);
                }
                Err(e) => {
                    warn!(
                        partition_id = self.partition_id,
                        distribution_key,
                        partition,
                        error = %e,
                        "Failed to redistribute command"
                    );
                    metrics::record_redistribution(false);
                }
            }
            schedule.due = now + schedule.backoff.next().unwrap_or(self.max_interval);
        }

        metrics::set_pending_distributions(self.partition_id, pending.len());
        attempted
    }

    /// Run cycles every `interval` on a background task until stopped.
    pub fn spawn(mut self) -> RedistributorHandle {
        let partition_id = self.partition_id;
        let interval = self.interval;
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        self.run_cycle(Instant::now()).await;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!(partition_id, "Command redistribution received shutdown signal");
                        break;
                    }
                }
            }
        });

        info!(partition_id, ?interval, "Started command redistribution");
        RedistributorHandle {
            partition_id,
            shutdown_tx,
            task,
        }
    }
}

/// Handle to a running redistributor. Dropping it aborts the task.
pub struct RedistributorHandle {
    partition_id: i32,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl RedistributorHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signal the task to stop and wait for it, aborting it after a timeout.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(());
        match tokio::time::timeout(STOP_TIMEOUT, &mut self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(partition_id = self.partition_id, error = %e, "Command redistribution panicked");
            }
            Err(_) => {
                warn!(
                    partition_id = self.partition_id,
                    "Command redistribution did not respond to shutdown, aborting"
                );
                self.task.abort();
            }
        }
        info!(partition_id = self.partition_id, "Stopped command redistribution");
    }
}

impl Drop for RedistributorHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

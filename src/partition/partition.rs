//! A partition replica: its state, its role and the pipeline between roles.

use std::sync::Arc;

use prometheus::Registry;
use tracing::{info, warn};

use super::context::PartitionTransitionContext;
use super::role::RaftRole;
use super::transition::{PartitionTransition, TermFence, TransitionStatus};
use crate::config::EngineConfig;
use crate::db::StateDb;
use crate::distribution::DistributionSender;
use crate::error::{StateError, StateResult};
use crate::metrics::REGISTRY;
use crate::state::{EngineCommand, EngineResponse, ProcessingState};

/// One replica of a partition.
///
/// Commands are applied on every replica in log order through [`process`].
/// The consensus layer reports role changes through [`on_role_change`].
///
/// [`process`]: Partition::process
/// [`on_role_change`]: Partition::on_role_change
pub struct Partition {
    context: PartitionTransitionContext,
    transition: PartitionTransition,
}

impl Partition {
    /// Create a partition whose role-scoped metrics forward into the global registry.
    pub fn new(config: EngineConfig, sender: Arc<dyn DistributionSender>) -> StateResult<Self> {
        Self::with_startup_registry(config, sender, REGISTRY.clone())
    }

    pub fn with_startup_registry(
        config: EngineConfig,
        sender: Arc<dyn DistributionSender>,
        startup_registry: Registry,
    ) -> StateResult<Self> {
        config
            .validate()
            .map_err(|errors| StateError::Config(errors.join("; ")))?;

        let db = StateDb::new(config.consistency_checks);
        let state = ProcessingState::new(db, config.partition_id, config.partition_count);
        info!(
            partition_id = config.partition_id,
            partition_count = config.partition_count,
            "Created partition"
        );

        Ok(Self {
            context: PartitionTransitionContext::new(config, state, sender, startup_registry),
            transition: PartitionTransition::with_default_steps(),
        })
    }

    /// Replace the transition pipeline.
    pub fn with_transition(mut self, transition: PartitionTransition) -> Self {
        self.transition = transition;
        self
    }

    pub fn partition_id(&self) -> i32 {
        self.context.partition_id()
    }

    pub fn role(&self) -> RaftRole {
        self.context.current_role()
    }

    pub fn term(&self) -> u64 {
        self.context.current_term()
    }

    pub fn transition_status(&self) -> TransitionStatus {
        self.transition.status()
    }

    /// A handle for announcing new terms while a transition is running.
    pub fn term_fence(&self) -> TermFence {
        self.transition.fence().clone()
    }

    pub fn state(&self) -> &ProcessingState {
        self.context.state()
    }

    pub fn db(&self) -> &StateDb {
        self.context.db()
    }

    pub fn context(&self) -> &PartitionTransitionContext {
        &self.context
    }

    /// Apply `command`. As leader, also send the distributions it produced.
    ///
    /// Failed sends are logged; the redistributor retries them.
    pub async fn process(&self, command: EngineCommand) -> StateResult<EngineResponse> {
        let response = self.context.state().apply(command)?;

        if self.role().is_leader()
            && let Some(effects) = response.distribution_effects()
        {
            for send in &effects.sends {
                if let Err(e) = self
                    .context
                    .sender()
                    .send(send.partition, send.distribution_key, &send.record)
                    .await
                {
                    warn!(
                        partition_id = self.partition_id(),
                        distribution_key = send.distribution_key,
                        target = send.partition,
                        error = %e,
                        "Failed to send command distribution"
                    );
                }
            }
        }

        Ok(response)
    }

    /// Entry point for the consensus layer: this replica is now `role` in `term`.
    pub async fn on_role_change(&mut self, term: u64, role: RaftRole) -> StateResult<()> {
        self.transition
            .transition_to(&mut self.context, term, role)
            .await
    }

    /// Serialize the committed state.
    pub fn snapshot(&self) -> StateResult<Vec<u8>> {
        self.db().snapshot()
    }

    /// Replace the state with a snapshot of another replica.
    pub fn restore(&self, snapshot: &[u8]) -> StateResult<()> {
        self.db().restore(snapshot)
    }
}

//! Resources a partition's transition steps install and tear down.

use std::sync::Arc;

use prometheus::Registry;

use super::role::RaftRole;
use crate::config::EngineConfig;
use crate::db::StateDb;
use crate::distribution::{DistributionSender, RedistributorHandle};
use crate::metrics::TransitionMeterRegistry;
use crate::state::ProcessingState;

/// Context owned by a partition and mutated by its transition steps.
///
/// Role-scoped resources live here rather than in globals, so each step
/// only sees what the partition hands it.
pub struct PartitionTransitionContext {
    config: EngineConfig,
    startup_registry: Registry,
    transition_registry: Option<Arc<TransitionMeterRegistry>>,
    state: ProcessingState,
    sender: Arc<dyn DistributionSender>,
    redistributor: Option<RedistributorHandle>,
    current_term: u64,
    current_role: RaftRole,
}

impl PartitionTransitionContext {
    pub fn new(
        config: EngineConfig,
        state: ProcessingState,
        sender: Arc<dyn DistributionSender>,
        startup_registry: Registry,
    ) -> Self {
        Self {
            config,
            startup_registry,
            transition_registry: None,
            state,
            sender,
            redistributor: None,
            current_term: 0,
            current_role: RaftRole::Inactive,
        }
    }

    pub fn partition_id(&self) -> i32 {
        self.config.partition_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The long-lived registry transition registries forward into.
    pub fn startup_registry(&self) -> &Registry {
        &self.startup_registry
    }

    pub fn transition_registry(&self) -> Option<&Arc<TransitionMeterRegistry>> {
        self.transition_registry.as_ref()
    }

    pub fn set_transition_registry(&mut self, registry: Option<Arc<TransitionMeterRegistry>>) {
        self.transition_registry = registry;
    }

    pub fn take_transition_registry(&mut self) -> Option<Arc<TransitionMeterRegistry>> {
        self.transition_registry.take()
    }

    pub fn state(&self) -> &ProcessingState {
        &self.state
    }

    pub fn db(&self) -> &StateDb {
        self.state.db()
    }

    pub fn sender(&self) -> &Arc<dyn DistributionSender> {
        &self.sender
    }

    pub fn has_redistributor(&self) -> bool {
        self.redistributor.is_some()
    }

    pub fn set_redistributor(&mut self, handle: RedistributorHandle) {
        self.redistributor = Some(handle);
    }

    pub fn take_redistributor(&mut self) -> Option<RedistributorHandle> {
        self.redistributor.take()
    }

    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    pub fn current_role(&self) -> RaftRole {
        self.current_role
    }

    pub(crate) fn set_current(&mut self, term: u64, role: RaftRole) {
        self.current_term = term;
        self.current_role = role;
    }
}

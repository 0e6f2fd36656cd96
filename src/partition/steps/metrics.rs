use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::metrics::TransitionMeterRegistry;
use crate::partition::context::PartitionTransitionContext;
use crate::partition::role::RaftRole;
use crate::partition::step::{PartitionTransitionStep, StepResult};

/// Owns the transition-scoped meter registry.
///
/// Prepare clears, detaches and closes the registry of the previous role;
/// transition installs a fresh one forwarding into the startup registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsStep;

impl MetricsStep {
    /// Returns true if a registry was installed.
    fn release(context: &mut PartitionTransitionContext) -> bool {
        let Some(registry) = context.take_transition_registry() else {
            return false;
        };
        registry.clear();
        registry.detach();
        registry.close();
        debug!(
            partition_id = context.partition_id(),
            "Closed transition meter registry"
        );
        true
    }
}

#[async_trait]
impl PartitionTransitionStep for MetricsStep {
    fn name(&self) -> &'static str {
        "Metrics"
    }

    async fn prepare_transition(
        &self,
        context: &mut PartitionTransitionContext,
        _term: u64,
        _target_role: RaftRole,
    ) -> StepResult {
        Self::release(context);
        Ok(())
    }

    async fn transition_to(
        &self,
        context: &mut PartitionTransitionContext,
        term: u64,
        target_role: RaftRole,
    ) -> StepResult {
        if Self::release(context) {
            debug!(
                partition_id = context.partition_id(),
                term,
                role = %target_role,
                "Released transition meter registry left over from a skipped prepare"
            );
        }
        let registry = TransitionMeterRegistry::new(context.startup_registry().clone());
        context.set_transition_registry(Some(Arc::new(registry)));
        Ok(())
    }
}

use async_trait::async_trait;

use crate::distribution::CommandRedistributor;
use crate::partition::context::PartitionTransitionContext;
use crate::partition::role::RaftRole;
use crate::partition::step::{PartitionTransitionStep, StepResult};

/// Runs the command redistributor while the partition leads.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRedistributionStep;

#[async_trait]
impl PartitionTransitionStep for CommandRedistributionStep {
    fn name(&self) -> &'static str {
        "CommandRedistribution"
    }

    async fn prepare_transition(
        &self,
        context: &mut PartitionTransitionContext,
        _term: u64,
        _target_role: RaftRole,
    ) -> StepResult {
        if let Some(handle) = context.take_redistributor() {
            handle.stop().await;
        }
        Ok(())
    }

    async fn transition_to(
        &self,
        context: &mut PartitionTransitionContext,
        _term: u64,
        target_role: RaftRole,
    ) -> StepResult {
        if !target_role.is_leader() || context.has_redistributor() {
            return Ok(());
        }

        let config = context.config();
        let redistributor = CommandRedistributor::new(
            context.partition_id(),
            context.state().distribution_state().clone(),
            context.sender().clone(),
            config.redistribution_interval,
            config.max_redistribution_interval,
        );
        context.set_redistributor(redistributor.spawn());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use prometheus::Registry;

    use super::*;
    use crate::config::EngineConfig;
    use crate::db::StateDb;
    use crate::distribution::NoopSender;
    use crate::state::ProcessingState;

    fn context() -> PartitionTransitionContext {
        PartitionTransitionContext::new(
            EngineConfig::default(),
            ProcessingState::new(StateDb::default(), 1, 1),
            Arc::new(NoopSender),
            Registry::new(),
        )
    }

    #[tokio::test]
    async fn test_runs_only_while_leader() {
        let mut ctx = context();
        let step = CommandRedistributionStep;

        step.transition_to(&mut ctx, 1, RaftRole::Follower)
            .await
            .unwrap();
        assert!(!ctx.has_redistributor());

        step.prepare_transition(&mut ctx, 2, RaftRole::Leader)
            .await
            .unwrap();
        step.transition_to(&mut ctx, 2, RaftRole::Leader)
            .await
            .unwrap();
        assert!(ctx.has_redistributor());

        // a second transition keeps the running task
        step.transition_to(&mut ctx, 2, RaftRole::Leader)
            .await
            .unwrap();
        assert!(ctx.has_redistributor());

        step.prepare_transition(&mut ctx, 3, RaftRole::Follower)
            .await
            .unwrap();
        assert!(!ctx.has_redistributor());
    }
}

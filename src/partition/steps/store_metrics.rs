use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::metrics::StoreMetrics;
use crate::partition::context::PartitionTransitionContext;
use crate::partition::role::RaftRole;
use crate::partition::step::{PartitionTransitionStep, StepResult};

/// Attaches commit metrics to the partition's store for active roles.
///
/// Must run after [`MetricsStep`](super::MetricsStep), whose registry the
/// store metrics are registered on.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreMetricsStep;

#[async_trait]
impl PartitionTransitionStep for StoreMetricsStep {
    fn name(&self) -> &'static str {
        "StoreMetrics"
    }

    async fn prepare_transition(
        &self,
        context: &mut PartitionTransitionContext,
        _term: u64,
        _target_role: RaftRole,
    ) -> StepResult {
        context.db().set_metrics(None);
        Ok(())
    }

    async fn transition_to(
        &self,
        context: &mut PartitionTransitionContext,
        _term: u64,
        target_role: RaftRole,
    ) -> StepResult {
        context.db().set_metrics(None);
        if !target_role.is_active() || !context.config().enable_partition_metrics {
            return Ok(());
        }

        let registry = context
            .transition_registry()
            .ok_or("no transition meter registry installed")?;
        let metrics = StoreMetrics::register(context.partition_id(), registry)
            .map_err(|e| format!("failed to register store metrics: {e}"))?;
        context.db().set_metrics(Some(Arc::new(metrics)));
        debug!(
            partition_id = context.partition_id(),
            role = %target_role,
            "Attached store metrics"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use prometheus::Registry;

    use super::*;
    use crate::config::EngineConfig;
    use crate::db::StateDb;
    use crate::distribution::NoopSender;
    use crate::partition::steps::MetricsStep;
    use crate::state::ProcessingState;

    fn context(config: EngineConfig) -> PartitionTransitionContext {
        PartitionTransitionContext::new(
            config,
            ProcessingState::new(StateDb::default(), 1, 1),
            Arc::new(NoopSender),
            Registry::new(),
        )
    }

    #[tokio::test]
    async fn test_attaches_metrics_for_active_role() {
        let mut ctx = context(EngineConfig::default());
        MetricsStep
            .transition_to(&mut ctx, 1, RaftRole::Follower)
            .await
            .unwrap();
        StoreMetricsStep
            .transition_to(&mut ctx, 1, RaftRole::Follower)
            .await
            .unwrap();
        assert!(ctx.db().has_metrics());
        assert_eq!(ctx.transition_registry().unwrap().len(), 3);

        StoreMetricsStep
            .prepare_transition(&mut ctx, 2, RaftRole::Inactive)
            .await
            .unwrap();
        assert!(!ctx.db().has_metrics());
    }

    #[tokio::test]
    async fn test_inactive_role_gets_no_metrics() {
        let mut ctx = context(EngineConfig::default());
        MetricsStep
            .transition_to(&mut ctx, 1, RaftRole::Inactive)
            .await
            .unwrap();
        StoreMetricsStep
            .transition_to(&mut ctx, 1, RaftRole::Inactive)
            .await
            .unwrap();
        assert!(!ctx.db().has_metrics());
    }

    #[tokio::test]
    async fn test_disabled_partition_metrics() {
        let config = EngineConfig {
            enable_partition_metrics: false,
            ..EngineConfig::default()
        };
        let mut ctx = context(config);
        StoreMetricsStep
            .transition_to(&mut ctx, 1, RaftRole::Leader)
            .await
            .unwrap();
        assert!(!ctx.db().has_metrics());
    }

    #[tokio::test]
    async fn test_missing_registry_fails() {
        let mut ctx = context(EngineConfig::default());
        let err = StoreMetricsStep
            .transition_to(&mut ctx, 1, RaftRole::Leader)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no transition meter registry"));
    }
}

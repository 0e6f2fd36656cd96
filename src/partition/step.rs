//! The transition step contract.

use async_trait::async_trait;

use super::context::PartitionTransitionContext;
use super::role::RaftRole;

/// Result of a transition hook.
pub type StepResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A unit of role-scoped resource setup and teardown.
///
/// `prepare_transition` runs before the role changes and releases what the
/// current role installed; `transition_to` runs after and installs what the
/// target role needs. Both must be idempotent: a step may be prepared without
/// having been transitioned, and transitioned twice to the same role.
#[async_trait]
pub trait PartitionTransitionStep: Send + Sync {
    /// Stable name, used in logs, metrics and errors.
    fn name(&self) -> &'static str;

    async fn prepare_transition(
        &self,
        context: &mut PartitionTransitionContext,
        term: u64,
        target_role: RaftRole,
    ) -> StepResult;

    async fn transition_to(
        &self,
        context: &mut PartitionTransitionContext,
        term: u64,
        target_role: RaftRole,
    ) -> StepResult;
}

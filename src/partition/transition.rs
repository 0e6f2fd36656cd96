//! The partition transition pipeline.
//!
//! # Ordering
//!
//! ```text
//! on_role_change(term, role)
//!   ├─ prepare_transition: step 1, step 2, ... step n
//!   └─ transition_to:      step 1, step 2, ... step n
//! ```
//!
//! Hooks run sequentially; each is awaited before the next starts, and the
//! first failure stops the pipeline. The pipeline never retries; the consensus
//! layer decides whether to request the transition again or demote the replica.
//!
//! # Term fencing
//!
//! A request for a term older than the partition's current term is rejected.
//! Every request announces its term on a shared [`TermFence`]; an in-flight
//! transition checks the fence before each hook and once more after the last
//! one, and aborts with [`StateError::StaleTransition`] once a newer term was
//! announced.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::{debug, info, warn};

use super::context::PartitionTransitionContext;
use super::role::RaftRole;
use super::step::{PartitionTransitionStep, StepResult};
use super::steps::{CommandRedistributionStep, MetricsStep, StoreMetricsStep};
use crate::error::{StateError, StateResult, TransitionPhase};
use crate::metrics;

/// The latest term a transition was requested for.
///
/// Cloning yields another handle to the same fence, so the consensus layer
/// can announce a new term while an older transition is still running.
#[derive(Debug, Clone, Default)]
pub struct TermFence {
    latest: Arc<AtomicU64>,
}

impl TermFence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a transition for `term` was requested.
    pub fn announce(&self, term: u64) {
        self.latest.fetch_max(term, Ordering::SeqCst);
    }

    pub fn latest(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }

    /// Fail if a term newer than `term` was announced.
    pub fn check(&self, term: u64) -> StateResult<()> {
        let latest = self.latest();
        if latest > term {
            return Err(StateError::StaleTransition {
                term,
                current_term: latest,
            });
        }
        Ok(())
    }
}

/// Where the pipeline stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransitionStatus {
    #[default]
    Idle,
    InProgress,
    Completed,
    /// The last transition failed; the partition waits for the consensus layer.
    Failed,
}

/// Ordered transition steps of one partition.
pub struct PartitionTransition {
    steps: Vec<Box<dyn PartitionTransitionStep>>,
    fence: TermFence,
    status: TransitionStatus,
    last_completed: Option<(u64, RaftRole)>,
}

impl PartitionTransition {
    pub fn new(steps: Vec<Box<dyn PartitionTransitionStep>>) -> Self {
        Self {
            steps,
            fence: TermFence::new(),
            status: TransitionStatus::Idle,
            last_completed: None,
        }
    }

    /// The pipeline every partition runs: metrics, store metrics, command redistribution.
    pub fn with_default_steps() -> Self {
        Self::new(vec![
            Box::new(MetricsStep),
            Box::new(StoreMetricsStep),
            Box::new(CommandRedistributionStep),
        ])
    }

    /// Use `fence` instead of the pipeline's own.
    pub fn with_fence(mut self, fence: TermFence) -> Self {
        self.fence = fence;
        self
    }

    pub fn fence(&self) -> &TermFence {
        &self.fence
    }

    pub fn status(&self) -> TransitionStatus {
        self.status
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Transition the partition to `role` in `term`.
    pub async fn transition_to(
        &mut self,
        context: &mut PartitionTransitionContext,
        term: u64,
        role: RaftRole,
    ) -> StateResult<()> {
        let current_term = context.current_term();
        if term < current_term {
            return Err(StateError::StaleTransition { term, current_term });
        }
        self.fence.announce(term);
        self.fence.check(term)?;

        if self.status == TransitionStatus::Completed && self.last_completed == Some((term, role)) {
            debug!(
                partition_id = context.partition_id(),
                term,
                role = %role,
                "Partition already transitioned"
            );
            return Ok(());
        }

        info!(
            partition_id = context.partition_id(),
            term,
            from = %context.current_role(),
            to = %role,
            "Transitioning partition"
        );
        self.status = TransitionStatus::InProgress;
        let started = Instant::now();

        match self.run_steps(context, term, role).await {
            Ok(()) => {
                context.set_current(term, role);
                self.status = TransitionStatus::Completed;
                self.last_completed = Some((term, role));
                metrics::record_transition(role.as_str(), "success");
                info!(
                    partition_id = context.partition_id(),
                    term,
                    role = %role,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Partition transition completed"
                );
                Ok(())
            }
            Err(e) => {
                self.status = TransitionStatus::Failed;
                let status = match &e {
                    StateError::StaleTransition { .. } => "stale",
                    _ => "failure",
                };
                metrics::record_transition(role.as_str(), status);
                warn!(
                    partition_id = context.partition_id(),
                    term,
                    role = %role,
                    error = %e,
                    "Partition transition failed"
                );
                Err(e)
            }
        }
    }

    async fn run_steps(
        &self,
        context: &mut PartitionTransitionContext,
        term: u64,
        role: RaftRole,
    ) -> StateResult<()> {
        for step in &self.steps {
            self.fence.check(term)?;
            let started = Instant::now();
            let result = step.prepare_transition(context, term, role).await;
            self.finish_hook(step.name(), TransitionPhase::Prepare, term, role, started, result)?;
        }

        for step in &self.steps {
            self.fence.check(term)?;
            let started = Instant::now();
            let result = step.transition_to(context, term, role).await;
            self.finish_hook(step.name(), TransitionPhase::Transition, term, role, started, result)?;
        }

        self.fence.check(term)
    }

    fn finish_hook(
        &self,
        step: &'static str,
        phase: TransitionPhase,
        term: u64,
        role: RaftRole,
        started: Instant,
        result: StepResult,
    ) -> StateResult<()> {
        let phase_label = phase.to_string();
        metrics::record_transition_step(step, &phase_label, started.elapsed().as_secs_f64());
        match result {
            Ok(()) => {
                debug!(step, phase = %phase, term, role = %role, "Transition step finished");
                Ok(())
            }
            Err(e) => Err(StateError::TransitionStepFailed {
                step,
                phase,
                term,
                role,
                reason: e.to_string(),
            }),
        }
    }
}

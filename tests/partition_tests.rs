//! Integration tests for the partition transition pipeline and the partition facade.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use prometheus::Registry;
use statehouse::config::EngineConfig;
use statehouse::distribution::RecordingSender;
use statehouse::error::{StateError, TransitionPhase};
use statehouse::partition::{
    Partition, PartitionTransition, PartitionTransitionContext, PartitionTransitionStep, RaftRole,
    StepResult, TermFence, TransitionStatus,
};
use statehouse::state::{
    CommandDistributionRecord, DistributionCommand, EngineCommand, UserCommand, UserRecord,
    UserStateReader,
};

type Log = Arc<Mutex<Vec<String>>>;

/// A step that records its hook invocations.
struct RecordingStep {
    name: &'static str,
    log: Log,
    fail_transition: bool,
    /// Announce a newer term on this fence while preparing.
    supersede: Option<(TermFence, u64)>,
    /// Announce a newer term on this fence while transitioning.
    supersede_late: Option<(TermFence, u64)>,
}

impl RecordingStep {
    fn new(name: &'static str, log: &Log) -> Self {
        Self {
            name,
            log: log.clone(),
            fail_transition: false,
            supersede: None,
            supersede_late: None,
        }
    }

    fn failing(mut self) -> Self {
        self.fail_transition = true;
        self
    }

    fn superseding(mut self, fence: TermFence, term: u64) -> Self {
        self.supersede = Some((fence, term));
        self
    }

    fn superseding_late(mut self, fence: TermFence, term: u64) -> Self {
        self.supersede_late = Some((fence, term));
        self
    }

    fn record(&self, hook: &str, term: u64, role: RaftRole) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}.{}({},{})", self.name, hook, term, role));
    }
}

#[async_trait]
impl PartitionTransitionStep for RecordingStep {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn prepare_transition(
        &self,
        _context: &mut PartitionTransitionContext,
        term: u64,
        target_role: RaftRole,
    ) -> StepResult {
        self.record("prepare", term, target_role);
        if let Some((fence, newer)) = &self.supersede {
            fence.announce(*newer);
        }
        Ok(())
    }

    async fn transition_to(
        &self,
        _context: &mut PartitionTransitionContext,
        term: u64,
        target_role: RaftRole,
    ) -> StepResult {
        self.record("transition", term, target_role);
        if let Some((fence, newer)) = &self.supersede_late {
            fence.announce(*newer);
        }
        if self.fail_transition {
            return Err("boom".into());
        }
        Ok(())
    }
}

fn partition_with(steps: Vec<Box<dyn PartitionTransitionStep>>) -> Partition {
    partition_with_transition(PartitionTransition::new(steps))
}

fn partition_with_transition(transition: PartitionTransition) -> Partition {
    Partition::with_startup_registry(
        EngineConfig::for_partition(1, 3),
        Arc::new(RecordingSender::new()),
        Registry::new(),
    )
    .unwrap()
    .with_transition(transition)
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

// ============================================================================
// Pipeline ordering
// ============================================================================

#[tokio::test]
async fn test_steps_run_in_declared_order() {
    let log = Log::default();
    let mut partition = partition_with(vec![
        Box::new(RecordingStep::new("A", &log)),
        Box::new(RecordingStep::new("B", &log)),
        Box::new(RecordingStep::new("C", &log)),
    ]);

    partition.on_role_change(1, RaftRole::Leader).await.unwrap();

    assert_eq!(
        entries(&log),
        vec![
            "A.prepare(1,LEADER)",
            "B.prepare(1,LEADER)",
            "C.prepare(1,LEADER)",
            "A.transition(1,LEADER)",
            "B.transition(1,LEADER)",
            "C.transition(1,LEADER)",
        ]
    );
    assert_eq!(partition.role(), RaftRole::Leader);
    assert_eq!(partition.term(), 1);
    assert_eq!(partition.transition_status(), TransitionStatus::Completed);
}

#[tokio::test]
async fn test_failing_step_stops_pipeline() {
    let log = Log::default();
    let mut partition = partition_with(vec![
        Box::new(RecordingStep::new("A", &log)),
        Box::new(RecordingStep::new("B", &log).failing()),
        Box::new(RecordingStep::new("C", &log)),
    ]);

    let err = partition
        .on_role_change(1, RaftRole::Follower)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        StateError::TransitionStepFailed {
            step: "B",
            phase: TransitionPhase::Transition,
            term: 1,
            role: RaftRole::Follower,
            reason: "boom".to_string(),
        }
    );
    assert!(!entries(&log).contains(&"C.transition(1,FOLLOWER)".to_string()));
    assert_eq!(partition.transition_status(), TransitionStatus::Failed);
    assert_eq!(partition.role(), RaftRole::Inactive);
}

#[tokio::test]
async fn test_failed_transition_can_be_requested_again() {
    let log = Log::default();
    let mut partition = partition_with(vec![
        Box::new(RecordingStep::new("A", &log)),
        Box::new(RecordingStep::new("B", &log).failing()),
    ]);

    assert!(partition.on_role_change(1, RaftRole::Leader).await.is_err());
    let before = entries(&log).len();
    assert!(partition.on_role_change(1, RaftRole::Leader).await.is_err());
    assert!(entries(&log).len() > before);
}

// ============================================================================
// Term fencing
// ============================================================================

#[tokio::test]
async fn test_older_term_is_rejected() {
    let log = Log::default();
    let mut partition = partition_with(vec![Box::new(RecordingStep::new("A", &log))]);

    partition.on_role_change(3, RaftRole::Follower).await.unwrap();
    let err = partition
        .on_role_change(2, RaftRole::Leader)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        StateError::StaleTransition {
            term: 2,
            current_term: 3
        }
    );
    assert_eq!(partition.role(), RaftRole::Follower);
    assert_eq!(entries(&log).len(), 2);
}

#[tokio::test]
async fn test_newer_term_aborts_in_flight_transition() {
    let log = Log::default();
    let fence = TermFence::new();
    let transition = PartitionTransition::new(vec![
        Box::new(RecordingStep::new("A", &log).superseding(fence.clone(), 5)),
        Box::new(RecordingStep::new("B", &log)),
    ])
    .with_fence(fence);
    let mut partition = partition_with_transition(transition);

    let err = partition
        .on_role_change(2, RaftRole::Leader)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        StateError::StaleTransition {
            term: 2,
            current_term: 5
        }
    );
    assert_eq!(entries(&log), vec!["A.prepare(2,LEADER)"]);
    assert_eq!(partition.role(), RaftRole::Inactive);

    // the newer term goes through
    partition.on_role_change(5, RaftRole::Follower).await.unwrap();
    assert_eq!(partition.term(), 5);
}

#[tokio::test]
async fn test_newer_term_during_last_hook_prevents_completion() {
    let log = Log::default();
    let fence = TermFence::new();
    let transition = PartitionTransition::new(vec![Box::new(
        RecordingStep::new("A", &log).superseding_late(fence.clone(), 9),
    )])
    .with_fence(fence);
    let mut partition = partition_with_transition(transition);

    let err = partition
        .on_role_change(2, RaftRole::Leader)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        StateError::StaleTransition {
            term: 2,
            current_term: 9
        }
    );
    assert_eq!(partition.role(), RaftRole::Inactive);
    assert_eq!(partition.term(), 0);
    assert_eq!(partition.transition_status(), TransitionStatus::Failed);
}

#[tokio::test]
async fn test_announced_term_fences_partition() {
    let log = Log::default();
    let mut partition = partition_with(vec![Box::new(RecordingStep::new("A", &log))]);

    partition.term_fence().announce(4);
    assert!(matches!(
        partition.on_role_change(3, RaftRole::Leader).await,
        Err(StateError::StaleTransition { .. })
    ));
    assert!(entries(&log).is_empty());
}

#[tokio::test]
async fn test_repeated_transition_is_noop() {
    let log = Log::default();
    let mut partition = partition_with(vec![Box::new(RecordingStep::new("A", &log))]);

    partition.on_role_change(1, RaftRole::Leader).await.unwrap();
    partition.on_role_change(1, RaftRole::Leader).await.unwrap();
    assert_eq!(entries(&log).len(), 2);

    partition.on_role_change(1, RaftRole::Follower).await.unwrap();
    assert_eq!(entries(&log).len(), 4);
}

// ============================================================================
// Default steps
// ============================================================================

fn family_names(registry: &Registry) -> Vec<String> {
    registry
        .gather()
        .iter()
        .map(|f| f.get_name().to_string())
        .collect()
}

#[tokio::test]
async fn test_default_steps_follow_role() {
    let startup = Registry::new();
    let sender = Arc::new(RecordingSender::new());
    let mut partition = Partition::with_startup_registry(
        EngineConfig::for_partition(1, 3),
        sender.clone(),
        startup.clone(),
    )
    .unwrap();

    partition.on_role_change(1, RaftRole::Leader).await.unwrap();
    assert!(partition.db().has_metrics());
    assert!(partition.context().has_redistributor());
    assert!(
        family_names(&startup).contains(&"store_commit_duration_seconds".to_string())
    );

    let record = CommandDistributionRecord::new(1, "USER", "CREATE", Bytes::from_static(b"x"));
    let response = partition
        .process(EngineCommand::Distribution(DistributionCommand::Distribute {
            record: record.clone(),
        }))
        .await
        .unwrap();
    let key = response
        .distribution_effects()
        .unwrap()
        .distribution_key
        .unwrap();
    assert_eq!(sender.delivered(), vec![(2, key), (3, key)]);

    partition
        .on_role_change(2, RaftRole::Follower)
        .await
        .unwrap();
    assert!(!partition.context().has_redistributor());
    assert!(partition.db().has_metrics());

    sender.clear();
    partition
        .process(EngineCommand::Distribution(DistributionCommand::Distribute {
            record,
        }))
        .await
        .unwrap();
    assert!(sender.attempts().is_empty());

    partition
        .on_role_change(3, RaftRole::Inactive)
        .await
        .unwrap();
    assert!(!partition.db().has_metrics());
    assert!(startup.gather().is_empty());
}

#[tokio::test]
async fn test_failed_sends_do_not_fail_commands() {
    let sender = Arc::new(RecordingSender::new());
    sender.set_unreachable(2, true);
    let mut partition = Partition::with_startup_registry(
        EngineConfig::for_partition(1, 2),
        sender.clone(),
        Registry::new(),
    )
    .unwrap();
    partition.on_role_change(1, RaftRole::Leader).await.unwrap();

    let record = CommandDistributionRecord::new(1, "USER", "CREATE", Bytes::new());
    partition
        .process(EngineCommand::Distribution(DistributionCommand::Distribute {
            record,
        }))
        .await
        .unwrap();
    assert_eq!(sender.attempts().len(), 1);
    assert!(sender.delivered().is_empty());
}

#[tokio::test]
async fn test_process_user_commands() {
    let partition = Partition::with_startup_registry(
        EngineConfig::default(),
        Arc::new(RecordingSender::new()),
        Registry::new(),
    )
    .unwrap();

    partition
        .process(EngineCommand::User(UserCommand::Create {
            user: UserRecord::new(1, "alice"),
        }))
        .await
        .unwrap();
    let user = partition.state().user_state().get_user(1).unwrap().unwrap();
    assert_eq!(user.username(), "alice");
}

#[test]
fn test_invalid_config_is_rejected() {
    let result = Partition::with_startup_registry(
        EngineConfig::for_partition(4, 2),
        Arc::new(RecordingSender::new()),
        Registry::new(),
    );
    assert!(matches!(result, Err(StateError::Config(_))));
}

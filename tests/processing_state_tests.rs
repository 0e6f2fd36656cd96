//! Integration tests for deterministic command application and snapshots.

use bytes::Bytes;
use statehouse::config::ConsistencyChecks;
use statehouse::db::{ColumnFamilyName, SCHEMA_VERSION, StateDb};
use statehouse::error::StateError;
use statehouse::state::{
    CommandDistributionRecord, DistributionCommand, EngineCommand, ProcessingState, UserCommand,
    UserRecord, UserStateReader,
};

fn commands() -> Vec<EngineCommand> {
    let mut commands = vec![
        EngineCommand::User(UserCommand::Create {
            user: UserRecord::new(1, "alice"),
        }),
        EngineCommand::User(UserCommand::AddRole {
            user_key: 1,
            role_key: 42,
        }),
        // rejected: duplicate username
        EngineCommand::User(UserCommand::Create {
            user: UserRecord::new(2, "alice"),
        }),
        EngineCommand::Noop,
    ];
    for queue in [None, Some("deploy"), Some("deploy")] {
        let mut record = CommandDistributionRecord::new(1, "USER", "CREATE", Bytes::from_static(b"x"));
        if let Some(queue) = queue {
            record = record.in_queue(queue);
        }
        commands.push(EngineCommand::Distribution(DistributionCommand::Distribute {
            record,
        }));
    }
    commands
}

fn replay(commands: &[EngineCommand]) -> (ProcessingState, Vec<Result<(), StateError>>) {
    let state = ProcessingState::new(StateDb::default(), 2, 4);
    let results = commands
        .iter()
        .cloned()
        .map(|command| state.apply(command).map(|_| ()))
        .collect();
    (state, results)
}

#[test]
fn test_replay_is_deterministic() {
    let commands = commands();
    let (leader, leader_results) = replay(&commands);
    let (follower, follower_results) = replay(&commands);

    assert_eq!(leader_results, follower_results);
    assert!(leader_results[2].as_ref().unwrap_err().is_consistency_violation());
    assert_eq!(
        leader.db().snapshot().unwrap(),
        follower.db().snapshot().unwrap()
    );
}

#[test]
fn test_snapshot_restore_bootstraps_replica() {
    let (leader, _) = replay(&commands());

    let replica = ProcessingState::new(StateDb::default(), 2, 4);
    replica.db().restore(&leader.db().snapshot().unwrap()).unwrap();

    assert_eq!(
        replica.user_state().get_user(1).unwrap(),
        leader.user_state().get_user(1).unwrap()
    );
    assert_eq!(
        replica.db().column_family_sizes(),
        leader.db().column_family_sizes()
    );
    // keys continue where the leader stopped
    assert_eq!(
        replica.key_generator().next_key().unwrap(),
        leader.key_generator().next_key().unwrap()
    );
}

#[test]
fn test_restore_rejected_inside_transaction() {
    let db = StateDb::default();
    let snapshot = db.snapshot().unwrap();
    let _txn = db.begin().unwrap();
    assert!(matches!(db.restore(&snapshot), Err(StateError::Transaction(_))));
}

#[test]
fn test_restore_rejects_garbage() {
    let db = StateDb::default();
    assert!(db.restore(b"not a snapshot").is_err());
}

#[test]
fn test_registry_enumerates_all_families() {
    let (state, _) = replay(&commands());
    let sizes = state.db().column_family_sizes();

    assert_eq!(SCHEMA_VERSION, 1);
    assert_eq!(sizes.len(), ColumnFamilyName::all().len());
    assert_eq!(sizes[&ColumnFamilyName::Users], 1);
    assert_eq!(sizes[&ColumnFamilyName::Key], 1);
    assert_eq!(sizes[&ColumnFamilyName::CommandDistributionRecord], 3);
    // 3 targets pending for the unqueued distribution, the queue heads for the first queued one
    assert_eq!(sizes[&ColumnFamilyName::PendingDistribution], 6);
    assert_eq!(sizes[&ColumnFamilyName::QueuedDistribution], 6);
}

#[test]
fn test_disabled_foreign_keys_allow_orphans() {
    let db = StateDb::new(ConsistencyChecks {
        preconditions: true,
        foreign_keys: false,
    });
    let state = ProcessingState::new(db, 1, 2);
    state
        .distribution_state()
        .add_pending_distribution(99, 2)
        .unwrap();
    assert_eq!(
        state.db().column_family_sizes()[&ColumnFamilyName::PendingDistribution],
        1
    );
}

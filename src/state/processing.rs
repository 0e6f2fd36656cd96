//! The per-partition state machine.
//!
//! [`ProcessingState`] bundles the entity state modules of one partition over a
//! shared [`StateDb`] and applies [`EngineCommand`]s to them. Every command runs
//! in exactly one transaction: all of its writes commit together, or none do.

use tracing::{debug, error};

use super::command::{DistributionCommand, EngineCommand, EngineResponse, UserCommand};
use super::distribution::DistributionState;
use super::key_generator::KeyGenerator;
use super::user::UserState;
use crate::db::StateDb;
use crate::distribution::CommandDistributionBehavior;
use crate::error::StateResult;
use crate::metrics;

/// All state of one partition.
#[derive(Clone)]
pub struct ProcessingState {
    partition_id: i32,
    db: StateDb,
    user_state: UserState,
    distribution_state: DistributionState,
    key_generator: KeyGenerator,
    distribution: CommandDistributionBehavior,
}

impl ProcessingState {
    pub fn new(db: StateDb, partition_id: i32, partition_count: i32) -> Self {
        let user_state = UserState::new(&db);
        let distribution_state = DistributionState::new(&db);
        let key_generator = KeyGenerator::new(&db, partition_id);
        let distribution = CommandDistributionBehavior::new(
            partition_id,
            partition_count,
            distribution_state.clone(),
            key_generator.clone(),
        );
        Self {
            partition_id,
            db,
            user_state,
            distribution_state,
            key_generator,
            distribution,
        }
    }

    pub fn partition_id(&self) -> i32 {
        self.partition_id
    }

    pub fn db(&self) -> &StateDb {
        &self.db
    }

    pub fn user_state(&self) -> &UserState {
        &self.user_state
    }

    pub fn distribution_state(&self) -> &DistributionState {
        &self.distribution_state
    }

    pub fn key_generator(&self) -> &KeyGenerator {
        &self.key_generator
    }

    pub fn distribution(&self) -> &CommandDistributionBehavior {
        &self.distribution
    }

    /// Apply `command` in its own transaction.
    ///
    /// On error nothing the command wrote is kept. Consistency violations are
    /// logged at error level; they mean replicas can no longer be trusted to agree.
    pub fn apply(&self, command: EngineCommand) -> StateResult<EngineResponse> {
        let kind = command.kind();
        let result = self.db.run_in_transaction(|| self.apply_in_transaction(command));

        metrics::record_command(kind, result.is_ok());
        match &result {
            Ok(_) => debug!(partition_id = self.partition_id, command = kind, "Applied command"),
            Err(e) => {
                metrics::record_state_error(e.as_metric_label());
                if e.is_fatal() {
                    error!(
                        partition_id = self.partition_id,
                        command = kind,
                        error = %e,
                        "Command violated state consistency"
                    );
                } else {
                    debug!(
                        partition_id = self.partition_id,
                        command = kind,
                        error = %e,
                        "Command rejected"
                    );
                }
            }
        }
        result
    }

    fn apply_in_transaction(&self, command: EngineCommand) -> StateResult<EngineResponse> {
        match command {
            EngineCommand::Noop => Ok(EngineResponse::Ok),
            EngineCommand::User(cmd) => {
                self.apply_user(cmd)?;
                Ok(EngineResponse::Ok)
            }
            EngineCommand::Distribution(cmd) => {
                let effects = match cmd {
                    DistributionCommand::Distribute { record } => {
                        self.distribution.distribute(record)?
                    }
                    DistributionCommand::Acknowledge {
                        distribution_key,
                        partition,
                    } => self.distribution.acknowledge(distribution_key, partition)?,
                };
                Ok(EngineResponse::Distribution(effects))
            }
        }
    }

    fn apply_user(&self, cmd: UserCommand) -> StateResult<()> {
        let users = &self.user_state;
        match cmd {
            UserCommand::Create { user } => users.create(&user),
            UserCommand::Update { user } => users.update(&user),
            UserCommand::Delete { user_key } => users.delete(user_key),
            UserCommand::AddRole { user_key, role_key } => users.add_role(user_key, role_key),
            UserCommand::RemoveRole { user_key, role_key } => {
                users.remove_role(user_key, role_key)
            }
            UserCommand::AddGroup {
                user_key,
                group_key,
            } => users.add_group(user_key, group_key),
            UserCommand::RemoveGroup {
                user_key,
                group_key,
            } => users.remove_group(user_key, group_key),
            UserCommand::AddTenant {
                user_key,
                tenant_id,
            } => users.add_tenant_id(user_key, &tenant_id),
            UserCommand::RemoveTenant {
                user_key,
                tenant_id,
            } => users.remove_tenant_id(user_key, &tenant_id),
        }
    }
}

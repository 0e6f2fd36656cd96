//! Engine commands and responses.
//!
//! Commands are the inputs of a partition's state machine. They are replicated
//! and applied in log order on every replica, so applying them must be
//! deterministic.

use serde::{Deserialize, Serialize};

use super::distribution::CommandDistributionRecord;
use super::user::UserRecord;
use crate::distribution::DistributionEffects;

/// Commands that can be applied to a partition's state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum EngineCommand {
    /// No-op command.
    Noop,

    /// User domain command.
    #[serde(rename = "user_v1")]
    User(UserCommand),

    /// Command distribution domain command.
    #[serde(rename = "distribution_v1")]
    Distribution(DistributionCommand),
}

impl EngineCommand {
    /// Stable name of the command, used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineCommand::Noop => "noop",
            EngineCommand::User(command) => command.kind(),
            EngineCommand::Distribution(command) => command.kind(),
        }
    }
}

/// Commands for the user domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserCommand {
    Create { user: UserRecord },
    Update { user: UserRecord },
    Delete { user_key: u64 },
    AddRole { user_key: u64, role_key: u64 },
    RemoveRole { user_key: u64, role_key: u64 },
    AddGroup { user_key: u64, group_key: u64 },
    RemoveGroup { user_key: u64, group_key: u64 },
    AddTenant { user_key: u64, tenant_id: String },
    RemoveTenant { user_key: u64, tenant_id: String },
}

impl UserCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            UserCommand::Create { .. } => "user_create",
            UserCommand::Update { .. } => "user_update",
            UserCommand::Delete { .. } => "user_delete",
            UserCommand::AddRole { .. } => "user_add_role",
            UserCommand::RemoveRole { .. } => "user_remove_role",
            UserCommand::AddGroup { .. } => "user_add_group",
            UserCommand::RemoveGroup { .. } => "user_remove_group",
            UserCommand::AddTenant { .. } => "user_add_tenant",
            UserCommand::RemoveTenant { .. } => "user_remove_tenant",
        }
    }
}

/// Commands for the distribution domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DistributionCommand {
    /// Distribute a command from this partition to its targets.
    Distribute { record: CommandDistributionRecord },

    /// A target partition applied the distributed command.
    Acknowledge { distribution_key: u64, partition: i32 },
}

impl DistributionCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            DistributionCommand::Distribute { .. } => "distribution_distribute",
            DistributionCommand::Acknowledge { .. } => "distribution_acknowledge",
        }
    }
}

/// Responses from applying commands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum EngineResponse {
    /// Generic success.
    Ok,

    /// Distribution domain response.
    #[serde(rename = "distribution_response_v1")]
    Distribution(DistributionEffects),
}

impl EngineResponse {
    /// The distribution effects, if the command produced any.
    pub fn distribution_effects(&self) -> Option<&DistributionEffects> {
        match self {
            EngineResponse::Distribution(effects) => Some(effects),
            EngineResponse::Ok => None,
        }
    }
}

//! Raft roles a partition replica can transition between.

use std::fmt;

use openraft::ServerState;
use serde::{Deserialize, Serialize};

/// Role of a partition replica.
///
/// ```text
/// Inactive <-> Follower <-> Candidate -> Leader
///     ^                                    |
///     +------------------------------------+
/// ```
///
/// Any role may move to any other; the consensus layer decides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RaftRole {
    /// Not participating; no role-scoped resources installed.
    #[default]
    Inactive,
    Follower,
    Candidate,
    Leader,
}

impl RaftRole {
    pub fn is_leader(&self) -> bool {
        matches!(self, RaftRole::Leader)
    }

    /// Returns true if the replica participates in replication.
    pub fn is_active(&self) -> bool {
        !matches!(self, RaftRole::Inactive)
    }

    /// Get the role name as a string for logging and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            RaftRole::Inactive => "INACTIVE",
            RaftRole::Follower => "FOLLOWER",
            RaftRole::Candidate => "CANDIDATE",
            RaftRole::Leader => "LEADER",
        }
    }
}

impl fmt::Display for RaftRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ServerState> for RaftRole {
    fn from(state: ServerState) -> Self {
        match state {
            ServerState::Learner | ServerState::Follower => RaftRole::Follower,
            ServerState::Candidate => RaftRole::Candidate,
            ServerState::Leader => RaftRole::Leader,
            ServerState::Shutdown => RaftRole::Inactive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_server_state() {
        assert_eq!(RaftRole::from(ServerState::Learner), RaftRole::Follower);
        assert_eq!(RaftRole::from(ServerState::Follower), RaftRole::Follower);
        assert_eq!(RaftRole::from(ServerState::Candidate), RaftRole::Candidate);
        assert_eq!(RaftRole::from(ServerState::Leader), RaftRole::Leader);
        assert_eq!(RaftRole::from(ServerState::Shutdown), RaftRole::Inactive);
    }

    #[test]
    fn test_predicates() {
        assert!(RaftRole::Leader.is_leader());
        assert!(!RaftRole::Follower.is_leader());
        assert!(!RaftRole::Inactive.is_active());
        assert!(RaftRole::Candidate.is_active());
        assert_eq!(RaftRole::default(), RaftRole::Inactive);
    }

    #[test]
    fn test_display() {
        assert_eq!(RaftRole::Follower.to_string(), "FOLLOWER");
        assert_eq!(RaftRole::Leader.to_string(), "LEADER");
    }
}

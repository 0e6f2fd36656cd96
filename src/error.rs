//! Error types for the partition state machine.
//!
//! # Error Taxonomy
//!
//! - **Consistency violations** ([`StateError::ConsistencyViolation`]): insert on an
//!   existing key, update/delete of an absent key, a broken foreign-key reference.
//!   These are programming or replay-determinism bugs. They abort the enclosing
//!   transaction and must crash the partition's processing loop loudly; continuing
//!   would desynchronize replicas.
//! - **Entity not found** ([`StateError::EntityNotFound`]): an incremental mutator was
//!   invoked against an aggregate that does not exist. Propagated to the caller.
//! - **Transition failures** ([`StateError::TransitionStepFailed`],
//!   [`StateError::StaleTransition`]): surfaced to the consensus layer, which decides
//!   whether to retry the transition or demote the replica. The pipeline never retries.
//!
//! Distribution delivery failures (network) never surface here. The sender logs them
//! and the redistributor tries again on its next cycle.

use std::fmt;

use thiserror::Error;

use crate::db::ColumnFamilyName;
use crate::partition::RaftRole;

/// Result type for state machine operations.
pub type StateResult<T> = Result<T, StateError>;

/// The precondition a consistency violation broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// `insert` on a key that already exists.
    KeyExists,
    /// `update` or `delete_existing` on a key that does not exist.
    KeyMissing,
    /// A foreign key points at a key absent from the referenced family.
    ForeignKeyMissing {
        /// The family the foreign key must exist in.
        referenced: ColumnFamilyName,
    },
    /// The key is still referenced from another family and cannot be removed.
    DanglingReference {
        /// The family still holding references.
        referencing: ColumnFamilyName,
    },
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::KeyExists => write!(f, "key already exists"),
            ViolationKind::KeyMissing => write!(f, "key does not exist"),
            ViolationKind::ForeignKeyMissing { referenced } => {
                write!(f, "foreign key does not exist in {}", referenced)
            }
            ViolationKind::DanglingReference { referencing } => {
                write!(f, "key is still referenced from {}", referencing)
            }
        }
    }
}

/// Which hook of a transition step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPhase {
    Prepare,
    Transition,
}

impl fmt::Display for TransitionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionPhase::Prepare => write!(f, "prepare"),
            TransitionPhase::Transition => write!(f, "transition"),
        }
    }
}

/// Errors raised by the store, the entity state modules and the transition pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    /// A store precondition was violated. Fatal for the enclosing transaction.
    #[error("Consistency violation in {column_family}: {kind} (key {key})")]
    ConsistencyViolation {
        column_family: ColumnFamilyName,
        kind: ViolationKind,
        key: String,
    },

    /// An incremental mutator targeted an aggregate that does not exist.
    #[error("{entity} with key {key} not found")]
    EntityNotFound { entity: &'static str, key: String },

    /// A transition step's hook failed; the transition for `term` is failed.
    #[error("Transition step '{step}' failed during {phase} to {role} in term {term}: {reason}")]
    TransitionStepFailed {
        step: &'static str,
        phase: TransitionPhase,
        term: u64,
        role: RaftRole,
        reason: String,
    },

    /// A transition was superseded by, or is older than, a newer term.
    #[error("Stale transition for term {term}, current term is {current_term}")]
    StaleTransition { term: u64, current_term: u64 },

    /// A stored value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Misuse of the transaction lifecycle.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StateError {
    /// Create a consistency violation for a raw key rendering.
    pub fn violation(
        column_family: ColumnFamilyName,
        kind: ViolationKind,
        key: impl Into<String>,
    ) -> Self {
        StateError::ConsistencyViolation {
            column_family,
            kind,
            key: key.into(),
        }
    }

    /// Create an entity-not-found error.
    pub fn not_found(entity: &'static str, key: impl fmt::Display) -> Self {
        StateError::EntityNotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Returns true if the error indicates corrupted or diverging state.
    ///
    /// Fatal errors must stop the partition's processing loop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StateError::ConsistencyViolation { .. } | StateError::Serialization(_)
        )
    }

    /// Returns true if this is a consistency violation.
    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, StateError::ConsistencyViolation { .. })
    }

    /// Returns a string label for metrics.
    pub fn as_metric_label(&self) -> &'static str {
        match self {
            StateError::ConsistencyViolation { .. } => "consistency_violation",
            StateError::EntityNotFound { .. } => "entity_not_found",
            StateError::TransitionStepFailed { .. } => "transition_step_failed",
            StateError::StaleTransition { .. } => "stale_transition",
            StateError::Serialization(_) => "serialization",
            StateError::Transaction(_) => "transaction",
            StateError::Config(_) => "config",
        }
    }
}

impl From<bincode::Error> for StateError {
    fn from(e: bincode::Error) -> Self {
        StateError::Serialization(e.to_string())
    }
}

//! # Statehouse
//! Partitioned, transactionally consistent state machine for a replicated engine.
//!
//! Every partition keeps its state in a columnar transactional store and applies
//! commands to it one transaction at a time. Commands that must reach other
//! partitions are tracked durably until every target acknowledged them, so a new
//! leader resumes delivery exactly where the previous one stopped. Role changes
//! reported by the consensus layer run through an ordered, term-fenced pipeline
//! of transition steps that install and release role-scoped resources.
//!
//! # Modules
//! - [`db`]: column families, foreign keys, transactions and snapshots
//! - [`state`]: entity state (users, distributions, keys) and the command apply loop
//! - [`distribution`]: distributing and acknowledging commands across partitions
//! - [`partition`]: Raft roles, the transition pipeline and the [`Partition`](partition::Partition) facade
//! - [`metrics`], [`telemetry`], [`config`]: ambient plumbing
//!
//! ## Getting started
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use statehouse::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::from_env()?;
//!     let mut partition = Partition::new(config, Arc::new(NoopSender))?;
//!
//!     partition.on_role_change(1, RaftRole::Leader).await?;
//!     partition
//!         .process(EngineCommand::User(UserCommand::Create {
//!             user: UserRecord::new(1, "alice"),
//!         }))
//!         .await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod constants;
pub mod db;
pub mod distribution;
pub mod error;
pub mod metrics;
pub mod partition;
pub mod state;
pub mod telemetry;

pub mod prelude {
    //! The types needed to embed a partition.
    pub use crate::config::{ConsistencyChecks, EngineConfig};
    pub use crate::db::{ColumnFamilyName, StateDb};
    pub use crate::distribution::{
        DeliveryError, DistributionEffects, DistributionSender, NoopSender,
    };
    pub use crate::error::{StateError, StateResult};
    pub use crate::partition::{
        Partition, PartitionTransition, PartitionTransitionContext, PartitionTransitionStep,
        RaftRole, StepResult, TransitionStatus,
    };
    pub use crate::state::{
        CommandDistributionRecord, DistributionCommand, DistributionStateReader, EngineCommand,
        EngineResponse, UserCommand, UserRecord, UserStateReader,
    };

    pub use bytes;
}

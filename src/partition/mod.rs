//! Partition replicas and their role transitions.
//!
//! # Architecture
//!
//! ```text
//! consensus layer ── on_role_change(term, role) ──► Partition
//!                                                     │
//!                                     PartitionTransition (term fenced)
//!                                                     │
//!                          MetricsStep ─ StoreMetricsStep ─ CommandRedistributionStep
//!                                                     │
//!                                        PartitionTransitionContext
//! ```
//!
//! Steps install and release role-scoped resources on the context the
//! partition owns; nothing role-scoped is global.

pub mod context;
#[allow(clippy::module_inception)]
pub mod partition;
pub mod role;
pub mod step;
pub mod steps;
pub mod transition;

pub use context::PartitionTransitionContext;
pub use partition::Partition;
pub use role::RaftRole;
pub use step::{PartitionTransitionStep, StepResult};
pub use steps::{CommandRedistributionStep, MetricsStep, StoreMetricsStep};
pub use transition::{PartitionTransition, TermFence, TransitionStatus};

//! Transition steps every partition runs.

mod metrics;
mod redistribution;
mod store_metrics;

pub use metrics::MetricsStep;
pub use redistribution::CommandRedistributionStep;
pub use store_metrics::StoreMetricsStep;

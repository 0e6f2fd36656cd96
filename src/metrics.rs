//! Prometheus metrics for the partition state engine.
//!
//! Metrics cover:
//! - Store commits ("flush points"): latency, committed writes, rollbacks (per partition)
//! - Transition pipeline: per-step duration, transition outcomes per role
//! - Command distribution: pending distributions, redistribution attempts
//! - Command application: applied commands and state errors by kind
//!
//! # Registries
//!
//! [`REGISTRY`] is the long-lived *startup registry*: it lives as long as the
//! process and carries the `statehouse` prefix. Per-partition, per-role metrics
//! are registered through a [`TransitionMeterRegistry`], which forwards into a
//! startup registry until the transition pipeline clears and detaches it on the
//! next role change.
//!
//! Registration errors are handled gracefully: if a global metric fails to
//! register, an unregistered fallback is used instead of panicking.

use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::Lazy;
use prometheus::core::Collector;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramTimer, HistogramVec, IntCounter, IntCounterVec,
    IntGaugeVec, Opts, Registry, TextEncoder, opts,
};
use tracing::{debug, warn};

use crate::constants::METRICS_PREFIX;

/// Global startup registry for engine metrics.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some(METRICS_PREFIX.to_string()), None).unwrap_or_else(|_| Registry::new())
});

// =============================================================================
// Metric Declaration Macros
// =============================================================================

/// Declare an IntGaugeVec metric with labels.
macro_rules! define_gauge_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntGaugeVec> = Lazy::new(|| {
            register_int_gauge_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

/// Declare an IntCounterVec metric with labels.
macro_rules! define_counter_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounterVec> = Lazy::new(|| {
            register_int_counter_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

/// Declare a HistogramVec metric with labels and buckets.
macro_rules! define_histogram_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?], [$($bucket:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<HistogramVec> = Lazy::new(|| {
            register_histogram_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+], vec![$($bucket),+])
        });
    };
}

// =============================================================================
// Transition metrics
// =============================================================================

define_histogram_vec!(
    TRANSITION_STEP_DURATION,
    "transition_step_duration_seconds",
    "Duration of a transition step hook in seconds",
    ["step", "phase"],
    [0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
);
define_counter_vec!(
    TRANSITIONS_TOTAL,
    "transitions_total",
    "Total number of role transitions by target role and outcome",
    ["role", "status"]
);

// =============================================================================
// Distribution metrics
// =============================================================================

define_gauge_vec!(
    PENDING_DISTRIBUTIONS,
    "pending_distributions",
    "Number of (distribution, partition) pairs awaiting acknowledgment",
    ["partition"]
);
define_counter_vec!(
    DISTRIBUTION_REDISTRIBUTIONS,
    "distribution_redistributions_total",
    "Total number of pending distributions re-sent by the redistributor",
    ["status"]
);

// =============================================================================
// Command metrics
// =============================================================================

define_counter_vec!(
    COMMANDS_APPLIED,
    "commands_applied_total",
    "Total number of commands applied by command kind and outcome",
    ["command", "status"]
);
define_counter_vec!(
    STATE_ERRORS,
    "state_errors_total",
    "Total number of state errors by kind",
    ["error"]
);

// =============================================================================
// Registration helpers
// =============================================================================

/// Register an IntGaugeVec safely, returning a fallback on error.
fn register_int_gauge_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntGaugeVec {
    let gauge = IntGaugeVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    match registry.register(Box::new(gauge.clone())) {
        Ok(()) => gauge,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntGaugeVec metric, using unregistered fallback");
            gauge
        }
    }
}

/// Register an IntCounterVec safely, returning a fallback on error.
fn register_int_counter_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntCounterVec {
    let counter =
        IntCounterVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    match registry.register(Box::new(counter.clone())) {
        Ok(()) => counter,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntCounterVec metric, using unregistered fallback");
            counter
        }
    }
}

/// Register a HistogramVec safely, returning a fallback on error.
fn register_histogram_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
    buckets: Vec<f64>,
) -> HistogramVec {
    let histogram = HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets), labels)
        .expect("metric opts should be valid");
    match registry.register(Box::new(histogram.clone())) {
        Ok(()) => histogram,
        Err(e) => {
            warn!(name, error = %e, "Failed to register HistogramVec metric, using unregistered fallback");
            histogram
        }
    }
}

/// Force registration of all global metrics.
///
/// Idempotent. Metrics are otherwise registered lazily on first access.
pub fn init_metrics() {
    let _ = &*TRANSITION_STEP_DURATION;
    let _ = &*TRANSITIONS_TOTAL;
    let _ = &*PENDING_DISTRIBUTIONS;
    let _ = &*DISTRIBUTION_REDISTRIBUTIONS;
    let _ = &*COMMANDS_APPLIED;
    let _ = &*STATE_ERRORS;
}

/// Encode all metrics of the startup registry in Prometheus text format.
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    encode_registry(&REGISTRY)
}

/// Encode all metrics of `registry` in Prometheus text format.
pub fn encode_registry(registry: &Registry) -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record the duration of one transition step hook.
pub fn record_transition_step(step: &str, phase: &str, duration_secs: f64) {
    TRANSITION_STEP_DURATION
        .with_label_values(&[step, phase])
        .observe(duration_secs);
}

/// Record the outcome of a role transition.
pub fn record_transition(role: &str, status: &str) {
    TRANSITIONS_TOTAL.with_label_values(&[role, status]).inc();
}

/// Set the number of pending distributions owned by `partition`.
pub fn set_pending_distributions(partition: i32, count: usize) {
    PENDING_DISTRIBUTIONS
        .with_label_values(&[&partition.to_string()])
        .set(count as i64);
}

/// Record a redistribution attempt.
pub fn record_redistribution(success: bool) {
    let status = if success { "success" } else { "error" };
    DISTRIBUTION_REDISTRIBUTIONS
        .with_label_values(&[status])
        .inc();
}

/// Record an applied command.
pub fn record_command(command: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    COMMANDS_APPLIED.with_label_values(&[command, status]).inc();
}

/// Record a state error by its metric label.
pub fn record_state_error(label: &str) {
    STATE_ERRORS.with_label_values(&[label]).inc();
}

// =============================================================================
// Transition-scoped registry
// =============================================================================

struct Registered {
    local: Box<dyn Collector>,
    forwarded: Option<Box<dyn Collector>>,
}

/// A meter registry scoped to one role transition.
///
/// Collectors registered here are kept in a local registry and, while the
/// registry is attached, forwarded into the startup registry. [`clear`] removes
/// everything registered so far from both; [`detach`] stops forwarding;
/// [`close`] rejects further registrations.
///
/// [`clear`]: TransitionMeterRegistry::clear
/// [`detach`]: TransitionMeterRegistry::detach
/// [`close`]: TransitionMeterRegistry::close
pub struct TransitionMeterRegistry {
    startup: Registry,
    local: Registry,
    registered: Mutex<Vec<Registered>>,
    detached: AtomicBool,
    closed: AtomicBool,
}

impl TransitionMeterRegistry {
    /// Create a registry forwarding into `startup`.
    pub fn new(startup: Registry) -> Self {
        Self {
            startup,
            local: Registry::new(),
            registered: Mutex::new(Vec::new()),
            detached: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a collector, forwarding it to the startup registry while attached.
    pub fn register<C>(&self, collector: C) -> prometheus::Result<()>
    where
        C: Collector + Clone + 'static,
    {
        if self.is_closed() {
            return Err(prometheus::Error::Msg(
                "transition meter registry is closed".to_string(),
            ));
        }

        self.local.register(Box::new(collector.clone()))?;

        let forwarded = if self.is_detached() {
            None
        } else if let Err(e) = self.startup.register(Box::new(collector.clone())) {
            let _ = self.local.unregister(Box::new(collector));
            return Err(e);
        } else {
            Some(Box::new(collector.clone()) as Box<dyn Collector>)
        };

        self.lock().push(Registered {
            local: Box::new(collector),
            forwarded,
        });
        Ok(())
    }

    /// Remove every collector registered so far, locally and from the startup registry.
    pub fn clear(&self) {
        let registered: Vec<Registered> = self.lock().drain(..).collect();
        let count = registered.len();
        for entry in registered {
            let _ = self.local.unregister(entry.local);
            if let Some(forwarded) = entry.forwarded {
                let _ = self.startup.unregister(forwarded);
            }
        }
        debug!(count, "Cleared transition meter registry");
    }

    /// Stop forwarding to the startup registry, withdrawing forwarded collectors.
    pub fn detach(&self) {
        if self.detached.swap(true, Ordering::SeqCst) {
            return;
        }
        for entry in self.lock().iter_mut() {
            if let Some(forwarded) = entry.forwarded.take() {
                let _ = self.startup.unregister(forwarded);
            }
        }
    }

    /// Reject further registrations.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of collectors currently registered.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gather the collectors registered on this registry.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.local.gather()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Registered>> {
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// Store metrics
// =============================================================================

/// Commit ("flush point") instrumentation for one partition's store.
pub struct StoreMetrics {
    partition_id: i32,
    commit_latency: Histogram,
    committed_writes: IntCounter,
    rollbacks: IntCounter,
}

impl StoreMetrics {
    /// Create the partition's store metrics and register them on `registry`.
    pub fn register(
        partition_id: i32,
        registry: &TransitionMeterRegistry,
    ) -> prometheus::Result<Self> {
        let partition = partition_id.to_string();

        let commit_latency = Histogram::with_opts(
            HistogramOpts::new(
                "store_commit_duration_seconds",
                "Duration of store transaction commits in seconds",
            )
            .const_label("partition", &partition)
            .buckets(vec![
                0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1,
            ]),
        )?;
        let committed_writes = IntCounter::with_opts(
            Opts::new(
                "store_committed_writes_total",
                "Total number of key writes and deletes committed",
            )
            .const_label("partition", &partition),
        )?;
        let rollbacks = IntCounter::with_opts(
            Opts::new(
                "store_rollbacks_total",
                "Total number of rolled back transactions",
            )
            .const_label("partition", &partition),
        )?;

        registry.register(commit_latency.clone())?;
        registry.register(committed_writes.clone())?;
        registry.register(rollbacks.clone())?;

        Ok(Self {
            partition_id,
            commit_latency,
            committed_writes,
            rollbacks,
        })
    }

    pub fn partition_id(&self) -> i32 {
        self.partition_id
    }

    /// Start timing a commit; the duration is observed when the timer drops.
    pub fn observe_commit(&self) -> HistogramTimer {
        self.commit_latency.start_timer()
    }

    pub fn record_committed_writes(&self, count: usize) {
        self.committed_writes.inc_by(count as u64);
    }

    pub fn record_rollback(&self) {
        self.rollbacks.inc();
    }

    pub fn commit_count(&self) -> u64 {
        self.commit_latency.get_sample_count()
    }

    pub fn committed_writes(&self) -> u64 {
        self.committed_writes.get()
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.get()
    }
}

//! Operational counters for the controller
//!
//! Prometheus metrics on the process-global registry, exposed by the
//! binary's `/metrics` endpoint.

use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_gauge, GaugeVec,
    Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;

/// Histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<RouteMetricsInner> = OnceLock::new();

struct RouteMetricsInner {
    collection_latency_seconds: Histogram,
    decision_latency_seconds: Histogram,
    targets_tracked: IntGauge,
    snapshots_stored: IntGauge,
    training_samples: IntGauge,
    model_info: GaugeVec,
    decisions_total: IntCounter,
    commits_total: IntCounter,
    dry_run_skips_total: IntCounter,
    collection_errors_total: IntCounter,
    reconcile_errors_total: IntCounter,
    retrains_total: IntCounter,
    training_errors_total: IntCounter,
}

impl RouteMetricsInner {
    fn new() -> Self {
        Self {
            collection_latency_seconds: register_histogram!(
                "hydra_route_collection_latency_seconds",
                "Time spent on one metrics collection cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register collection_latency_seconds"),

            decision_latency_seconds: register_histogram!(
                "hydra_route_decision_latency_seconds",
                "Time spent computing one scaling decision",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register decision_latency_seconds"),

            targets_tracked: register_int_gauge!(
                "hydra_route_targets_tracked",
                "Number of targets with retained metric history"
            )
            .expect("Failed to register targets_tracked"),

            snapshots_stored: register_int_gauge!(
                "hydra_route_snapshots_stored",
                "Total metric snapshots currently retained"
            )
            .expect("Failed to register snapshots_stored"),

            training_samples: register_int_gauge!(
                "hydra_route_training_samples",
                "Samples currently held in the training buffer"
            )
            .expect("Failed to register training_samples"),

            model_info: register_gauge_vec!(
                "hydra_route_model_info",
                "Information about the active scaling model",
                &["model_type"]
            )
            .expect("Failed to register model_info"),

            decisions_total: register_int_counter!(
                "hydra_route_decisions_total",
                "Total scaling decisions emitted"
            )
            .expect("Failed to register decisions_total"),

            commits_total: register_int_counter!(
                "hydra_route_commits_total",
                "Total replica changes committed to workloads"
            )
            .expect("Failed to register commits_total"),

            dry_run_skips_total: register_int_counter!(
                "hydra_route_dry_run_skips_total",
                "Scaling decisions skipped because dry-run is enabled"
            )
            .expect("Failed to register dry_run_skips_total"),

            collection_errors_total: register_int_counter!(
                "hydra_route_collection_errors_total",
                "Total metric collection errors"
            )
            .expect("Failed to register collection_errors_total"),

            reconcile_errors_total: register_int_counter!(
                "hydra_route_reconcile_errors_total",
                "Total per-service reconcile errors"
            )
            .expect("Failed to register reconcile_errors_total"),

            retrains_total: register_int_counter!(
                "hydra_route_retrains_total",
                "Total successful model retraining passes"
            )
            .expect("Failed to register retrains_total"),

            training_errors_total: register_int_counter!(
                "hydra_route_training_errors_total",
                "Total failed model retraining passes"
            )
            .expect("Failed to register training_errors_total"),
        }
    }
}

/// Controller metrics for Prometheus exposition
///
/// Lightweight handle; clones share the same underlying metrics.
#[derive(Clone)]
pub struct RouteMetrics {
    _private: (),
}

impl Default for RouteMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteMetrics {
    /// Create a metrics handle, initializing the global registry if needed
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(RouteMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &RouteMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_collection_latency(&self, duration_secs: f64) {
        self.inner()
            .collection_latency_seconds
            .observe(duration_secs);
    }

    pub fn observe_decision_latency(&self, duration_secs: f64) {
        self.inner().decision_latency_seconds.observe(duration_secs);
    }

    pub fn set_targets_tracked(&self, count: i64) {
        self.inner().targets_tracked.set(count);
    }

    pub fn set_snapshots_stored(&self, count: i64) {
        self.inner().snapshots_stored.set(count);
    }

    pub fn set_training_samples(&self, count: i64) {
        self.inner().training_samples.set(count);
    }

    pub fn set_model_info(&self, model_type: &str) {
        self.inner().model_info.reset();
        self.inner()
            .model_info
            .with_label_values(&[model_type])
            .set(1.0);
    }

    pub fn inc_decisions(&self) {
        self.inner().decisions_total.inc();
    }

    pub fn inc_commits(&self) {
        self.inner().commits_total.inc();
    }

    pub fn inc_dry_run_skips(&self) {
        self.inner().dry_run_skips_total.inc();
    }

    pub fn inc_collection_errors(&self) {
        self.inner().collection_errors_total.inc();
    }

    pub fn inc_reconcile_errors(&self) {
        self.inner().reconcile_errors_total.inc();
    }

    pub fn inc_retrains(&self) {
        self.inner().retrains_total.inc();
    }

    pub fn inc_training_errors(&self) {
        self.inner().training_errors_total.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handle_is_usable() {
        let metrics = RouteMetrics::new();

        metrics.observe_collection_latency(0.001);
        metrics.observe_decision_latency(0.002);
        metrics.set_targets_tracked(3);
        metrics.set_snapshots_stored(42);
        metrics.set_training_samples(100);
        metrics.set_model_info("linear");
        metrics.inc_decisions();
        metrics.inc_commits();
        metrics.inc_collection_errors();
    }

    #[test]
    fn test_clones_share_registry() {
        let a = RouteMetrics::new();
        let b = a.clone();
        a.inc_decisions();
        b.inc_decisions();
    }
}

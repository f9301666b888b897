//! Health reporting for the controller
//!
//! Probe responses are derived from lifecycle signals the components push
//! while they run: collection cycle outcomes from the aggregator, model
//! state from the engine and queue state from the reconcile worker. The
//! registry stores raw signals, not verdicts; staleness is judged at read
//! time against the collection interval.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Collection cycles the aggregator may miss before it counts as stale
const STALE_CYCLE_LIMIT: i32 = 3;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health of one component, derived from its reported signals
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
        }
    }

    fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Degraded,
            message: Some(message.into()),
        }
    }

    fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// Overall health response served at `/healthz`
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub collector: ComponentHealth,
    pub engine: ComponentHealth,
    pub controller: ComponentHealth,
}

/// Readiness response served at `/readyz`
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Raw lifecycle signals; verdicts are computed from these on read
#[derive(Debug, Default)]
struct Signals {
    last_cycle_at: Option<DateTime<Utc>>,
    last_cycle_error: Option<String>,
    model_type: Option<String>,
    model_trained: bool,
    last_retrain_error: Option<String>,
    queue_closed: bool,
}

/// Registry the collector, engine and reconcile worker report into
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    stale_after: Duration,
    signals: Arc<RwLock<Signals>>,
}

impl HealthRegistry {
    pub fn new(collection_interval: std::time::Duration) -> Self {
        let interval = Duration::from_std(collection_interval)
            .unwrap_or_else(|_| Duration::seconds(30));
        Self {
            stale_after: interval * STALE_CYCLE_LIMIT,
            signals: Arc::new(RwLock::new(Signals::default())),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Signals> {
        self.signals.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Signals> {
        self.signals.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Aggregator: a collection cycle completed
    pub fn record_cycle(&self) {
        let mut signals = self.write();
        signals.last_cycle_at = Some(Utc::now());
        signals.last_cycle_error = None;
    }

    /// Aggregator: a collection cycle failed
    pub fn record_cycle_error(&self, error: impl Into<String>) {
        self.write().last_cycle_error = Some(error.into());
    }

    /// Engine: a scaling model is in place.
    ///
    /// Called at construction and again after each installed retrain;
    /// clears any previous retrain failure.
    pub fn record_model(&self, model_type: &str, trained: bool) {
        let mut signals = self.write();
        signals.model_type = Some(model_type.to_string());
        signals.model_trained = trained;
        signals.last_retrain_error = None;
    }

    /// Engine: a retraining pass failed; previous weights stay active
    pub fn record_retrain_error(&self, error: impl Into<String>) {
        self.write().last_retrain_error = Some(error.into());
    }

    /// Reconcile worker: the request queue closed and no more passes run
    pub fn record_queue_closed(&self) {
        self.write().queue_closed = true;
    }

    /// Derive the health response from the current signals
    pub fn health(&self) -> HealthResponse {
        let signals = self.read();
        let now = Utc::now();

        let collector = match signals.last_cycle_at {
            None => ComponentHealth::degraded("no collection cycle completed yet"),
            Some(at) if now - at > self.stale_after => ComponentHealth::unhealthy(format!(
                "last collection cycle finished at {}",
                at.to_rfc3339()
            )),
            Some(_) => match &signals.last_cycle_error {
                Some(error) => ComponentHealth::degraded(error.clone()),
                None => ComponentHealth::healthy(),
            },
        };

        let engine = match (&signals.model_type, &signals.last_retrain_error) {
            (None, _) => ComponentHealth::degraded("scaling model not initialized"),
            (Some(_), Some(error)) => {
                ComponentHealth::degraded(format!("last retrain failed: {error}"))
            }
            (Some(_), None) => ComponentHealth::healthy(),
        };

        let controller = if signals.queue_closed {
            ComponentHealth::unhealthy("reconcile queue closed")
        } else {
            ComponentHealth::healthy()
        };

        let status = collector
            .status
            .max(engine.status)
            .max(controller.status);

        HealthResponse {
            status,
            collector,
            engine,
            controller,
        }
    }

    /// Ready once the engine holds a model, the collector has completed a
    /// cycle and the reconcile queue is still open.
    pub fn readiness(&self) -> ReadinessResponse {
        let signals = self.read();

        let reason = if signals.queue_closed {
            Some("reconcile queue closed")
        } else if signals.model_type.is_none() {
            Some("scaling model not initialized")
        } else if signals.last_cycle_at.is_none() {
            Some("no collection cycle completed yet")
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason: reason.map(String::from),
        }
    }
}

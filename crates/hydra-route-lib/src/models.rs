//! Core data models for the scaling controller

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Identity of a scaling target: the service a participating ingress routes to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetRef {
    pub namespace: String,
    pub service: String,
}

impl TargetRef {
    pub fn new(namespace: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.service)
    }
}

/// Metrics observed for a target during one collection cycle
///
/// Snapshots are immutable once appended to the history; components hand
/// them around as `Arc<MetricsSnapshot>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub target: TargetRef,
    pub timestamp: DateTime<Utc>,

    /// CPU usage as a percentage of the summed pod requests
    pub cpu_utilization: f64,
    /// Memory usage as a percentage of the summed pod requests
    pub memory_utilization: f64,

    /// Requests per second at the ingress frontend
    pub request_rate: f64,
    /// Average response time in milliseconds
    pub response_time: f64,
    /// Error rate as a percentage
    pub error_rate: f64,

    /// Network bandwidth in MB/s
    pub network_bandwidth: f64,
    /// I/O bandwidth in MB/s
    pub io_bandwidth: f64,

    /// Replicas observed on the backing workload
    pub current_replicas: i32,
    /// Replicas requested in the workload spec
    pub desired_replicas: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress_class: Option<String>,
}

impl MetricsSnapshot {
    /// An empty snapshot for a target; phases fill in what they can observe
    pub fn empty(target: TargetRef, timestamp: DateTime<Utc>) -> Self {
        Self {
            target,
            timestamp,
            cpu_utilization: 0.0,
            memory_utilization: 0.0,
            request_rate: 0.0,
            response_time: 0.0,
            error_rate: 0.0,
            network_bandwidth: 0.0,
            io_bandwidth: 0.0,
            current_replicas: 0,
            desired_replicas: 0,
            ingress_class: None,
        }
    }
}

/// Statistics payload served by the ingress proxy endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NginxStats {
    #[serde(default)]
    pub requests_per_second: f64,
    #[serde(default)]
    pub response_time: f64,
    #[serde(default)]
    pub error_rate: f64,
    #[serde(default)]
    pub active_connections: i64,
    #[serde(default)]
    pub bytes_per_second: f64,
    #[serde(default)]
    pub upstream_metrics: HashMap<String, f64>,
}

/// Input features for a scaling model
///
/// Raw (unnormalized) values; see [`crate::engine::features::normalized`]
/// for the form handed to trained models.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub cpu_utilization: f64,
    pub memory_utilization: f64,
    pub request_rate: f64,
    pub network_bandwidth: f64,
    pub io_bandwidth: f64,
    pub response_time: f64,
    pub error_rate: f64,
    /// Hour of day in [0, 24)
    pub hour_of_day: f64,
    /// Day of week in [0, 7), Sunday = 0
    pub day_of_week: f64,
    pub trend_cpu: f64,
    pub trend_memory: f64,
    pub trend_requests: f64,
}

/// Output of a predictor: a scale factor in (0.5, 2.0) and a confidence in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub scale_factor: f64,
    pub confidence: f64,
}

/// One observed outcome used for online model training
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSample {
    pub features: FeatureVector,
    /// Scale factor that would have been correct in hindsight
    pub actual_scale: f64,
    /// Observed performance after the action, in [0, 1]
    pub performance: f64,
    pub timestamp: DateTime<Utc>,
}

/// Direction of a committed scaling action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleDirection {
    Up,
    Down,
}

/// Last committed scaling action for a target
#[derive(Debug, Clone, Copy)]
pub struct CooldownEntry {
    pub at: DateTime<Utc>,
    pub direction: ScaleDirection,
}

/// Effective replica bounds for a target after annotation overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaBounds {
    pub min: i32,
    pub max: i32,
}

impl ReplicaBounds {
    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, replicas: i32) -> i32 {
        replicas.clamp(self.min, self.max)
    }
}

/// A scaling decision produced by the engine and applied by the controller
#[derive(Debug, Clone)]
pub struct ScalingDecision {
    pub target: TargetRef,
    pub timestamp: DateTime<Utc>,
    pub current_replicas: i32,
    pub recommended_replicas: i32,
    pub scale_factor: f64,
    pub confidence: f64,
    pub reasoning: String,
    pub snapshot: Arc<MetricsSnapshot>,
}

impl ScalingDecision {
    /// Direction of the change, or `None` when the decision keeps the
    /// current replica count.
    pub fn direction(&self) -> Option<ScaleDirection> {
        match self.recommended_replicas.cmp(&self.current_replicas) {
            std::cmp::Ordering::Greater => Some(ScaleDirection::Up),
            std::cmp::Ordering::Less => Some(ScaleDirection::Down),
            std::cmp::Ordering::Equal => None,
        }
    }
}

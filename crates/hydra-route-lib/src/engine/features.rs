//! Feature extraction for scaling models
//!
//! Builds the model input from a snapshot plus temporal context, with trend
//! signals regressed over the recent history window.

use crate::models::{FeatureVector, MetricsSnapshot};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use std::sync::Arc;

/// Number of input features expected by trained models
pub const NUM_FEATURES: usize = 12;

/// Extracts model features from snapshots and history
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    request_rate_window: Duration,
}

impl FeatureExtractor {
    pub fn new(request_rate_window: std::time::Duration) -> Self {
        Self {
            request_rate_window: Duration::from_std(request_rate_window)
                .unwrap_or_else(|_| Duration::minutes(5)),
        }
    }

    /// Build a feature vector for a snapshot.
    ///
    /// `history` is the target's retained history, oldest first; trend
    /// signals use the part of it inside the regression window.
    pub fn extract(
        &self,
        snapshot: &MetricsSnapshot,
        history: &[Arc<MetricsSnapshot>],
        now: DateTime<Utc>,
    ) -> FeatureVector {
        let cutoff = snapshot.timestamp - self.request_rate_window;
        let window: Vec<&Arc<MetricsSnapshot>> = history
            .iter()
            .filter(|s| s.timestamp >= cutoff)
            .collect();

        // Trends run over the normalized series so the slope is dimensionless
        let cpu: Vec<f64> = window.iter().map(|s| s.cpu_utilization / 100.0).collect();
        let memory: Vec<f64> = window
            .iter()
            .map(|s| s.memory_utilization / 100.0)
            .collect();
        let requests: Vec<f64> = window.iter().map(|s| s.request_rate / 1000.0).collect();

        FeatureVector {
            cpu_utilization: snapshot.cpu_utilization,
            memory_utilization: snapshot.memory_utilization,
            request_rate: snapshot.request_rate,
            network_bandwidth: snapshot.network_bandwidth,
            io_bandwidth: snapshot.io_bandwidth,
            response_time: snapshot.response_time,
            error_rate: snapshot.error_rate,
            hour_of_day: now.hour() as f64,
            day_of_week: now.weekday().num_days_from_sunday() as f64,
            trend_cpu: linear_regression_slope(&cpu),
            trend_memory: linear_regression_slope(&memory),
            trend_requests: linear_regression_slope(&requests),
        }
    }
}

/// Normalize a feature vector into the fixed-order model input
pub fn normalized(features: &FeatureVector) -> [f64; NUM_FEATURES] {
    [
        features.cpu_utilization / 100.0,
        features.memory_utilization / 100.0,
        features.request_rate / 1000.0,
        features.network_bandwidth / 100.0,
        features.io_bandwidth / 100.0,
        features.response_time / 1000.0,
        features.error_rate / 100.0,
        features.hour_of_day / 24.0,
        features.day_of_week / 7.0,
        features.trend_cpu,
        features.trend_memory,
        features.trend_requests,
    ]
}

/// Least-squares slope of a series against its sample index
pub fn linear_regression_slope(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let sum_x: f64 = (0..values.len()).map(|i| i as f64).sum();
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_x2: f64 = (0..values.len()).map(|i| (i as f64).powi(2)).sum();
    let denom = n * sum_x2 - sum_x.powi(2);
    if denom.abs() < f64::EPSILON {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denom
}

//! Controller configuration
//!
//! Loaded from an optional YAML file plus `HYDRA_ROUTE_*` environment
//! overrides. Invalid settings are fatal at startup.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub scaling: ScalingConfig,
    #[serde(default)]
    pub general: GeneralConfig,
}

/// Metrics collection settings
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Period between collection cycles in seconds
    #[serde(default = "default_collection_interval")]
    pub collection_interval_secs: u64,

    /// History truncation horizon in seconds
    #[serde(default = "default_retention_period")]
    pub retention_period_secs: u64,

    /// Window used for trend regression in seconds
    #[serde(default = "default_request_rate_window")]
    pub request_rate_window_secs: u64,

    /// Ingress proxy statistics endpoint; empty disables that phase
    #[serde(default)]
    pub nginx_metrics_url: String,

    #[serde(default)]
    pub bandwidth_monitoring: BandwidthConfig,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            collection_interval_secs: default_collection_interval(),
            retention_period_secs: default_retention_period(),
            request_rate_window_secs: default_request_rate_window(),
            nginx_metrics_url: String::new(),
            bandwidth_monitoring: BandwidthConfig::default(),
        }
    }
}

impl MetricsConfig {
    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs)
    }

    pub fn retention_period(&self) -> Duration {
        Duration::from_secs(self.retention_period_secs)
    }

    pub fn request_rate_window(&self) -> Duration {
        Duration::from_secs(self.request_rate_window_secs)
    }
}

/// System bandwidth monitoring settings
#[derive(Debug, Clone, Deserialize)]
pub struct BandwidthConfig {
    #[serde(default)]
    pub enable_network_bandwidth: bool,
    #[serde(default)]
    pub enable_io_bandwidth: bool,
    /// Bandwidth measurement interval in seconds
    #[serde(default = "default_measurement_interval")]
    pub measurement_interval_secs: u64,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            enable_network_bandwidth: false,
            enable_io_bandwidth: false,
            measurement_interval_secs: default_measurement_interval(),
        }
    }
}

impl BandwidthConfig {
    pub fn enabled(&self) -> bool {
        self.enable_network_bandwidth || self.enable_io_bandwidth
    }
}

/// Scaling behavior settings
#[derive(Debug, Clone, Deserialize)]
pub struct ScalingConfig {
    /// Default lower replica bound
    #[serde(default = "default_min_replicas")]
    pub min_replicas: i32,

    /// Default upper replica bound
    #[serde(default = "default_max_replicas")]
    pub max_replicas: i32,

    /// Reserved; the controller requeue interval governs evaluation cadence
    #[serde(default = "default_evaluation_interval")]
    pub evaluation_interval_secs: u64,

    #[serde(default = "ThresholdConfig::scale_up_defaults")]
    pub scale_up_thresholds: ThresholdConfig,

    #[serde(default = "ThresholdConfig::scale_down_defaults")]
    pub scale_down_thresholds: ThresholdConfig,

    #[serde(default)]
    pub ai_model: AiModelConfig,

    #[serde(default)]
    pub cooldown: CooldownConfig,

    #[serde(default)]
    pub prediction: PredictionConfig,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_replicas: default_min_replicas(),
            max_replicas: default_max_replicas(),
            evaluation_interval_secs: default_evaluation_interval(),
            scale_up_thresholds: ThresholdConfig::scale_up_defaults(),
            scale_down_thresholds: ThresholdConfig::scale_down_defaults(),
            ai_model: AiModelConfig::default(),
            cooldown: CooldownConfig::default(),
            prediction: PredictionConfig::default(),
        }
    }
}

/// Threshold values feeding the heuristic rules and the reasoning summary
#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default)]
    pub cpu_utilization: f64,
    #[serde(default)]
    pub memory_utilization: f64,
    #[serde(default)]
    pub request_rate: f64,
    #[serde(default)]
    pub network_bandwidth: f64,
    #[serde(default)]
    pub io_bandwidth: f64,
    #[serde(default)]
    pub response_time: f64,
    #[serde(default)]
    pub error_rate: f64,
}

impl ThresholdConfig {
    pub fn scale_up_defaults() -> Self {
        Self {
            cpu_utilization: 80.0,
            memory_utilization: 80.0,
            request_rate: 100.0,
            network_bandwidth: 100.0,
            io_bandwidth: 50.0,
            response_time: 1000.0,
            error_rate: 5.0,
        }
    }

    pub fn scale_down_defaults() -> Self {
        Self {
            cpu_utilization: 30.0,
            memory_utilization: 30.0,
            request_rate: 10.0,
            network_bandwidth: 10.0,
            io_bandwidth: 5.0,
            response_time: 200.0,
            error_rate: 1.0,
        }
    }
}

/// Kind of predictor driving scaling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Heuristic,
    Linear,
    NeuralNetwork,
    Ensemble,
}

impl Default for ModelType {
    fn default() -> Self {
        ModelType::Linear
    }
}

/// Predictor settings
#[derive(Debug, Clone, Deserialize)]
pub struct AiModelConfig {
    #[serde(default)]
    pub model_type: ModelType,

    /// Learning rate for gradient-trained models, in (0, 1)
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    #[serde(default)]
    pub enable_online_learning: bool,

    /// Upper bound on retrain cadence in seconds
    #[serde(default = "default_retrain_interval")]
    pub retrain_interval_secs: u64,

    /// Initial linear weights used before training produces its own
    #[serde(default)]
    pub feature_weights: FeatureWeights,
}

impl Default for AiModelConfig {
    fn default() -> Self {
        Self {
            model_type: ModelType::default(),
            learning_rate: default_learning_rate(),
            enable_online_learning: false,
            retrain_interval_secs: default_retrain_interval(),
            feature_weights: FeatureWeights::default(),
        }
    }
}

impl AiModelConfig {
    pub fn retrain_interval(&self) -> Duration {
        Duration::from_secs(self.retrain_interval_secs)
    }
}

/// Importance weights for the raw metric signals
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureWeights {
    #[serde(default = "default_weight_cpu")]
    pub cpu_utilization: f64,
    #[serde(default = "default_weight_memory")]
    pub memory_utilization: f64,
    #[serde(default = "default_weight_request_rate")]
    pub request_rate: f64,
    #[serde(default = "default_weight_network")]
    pub network_bandwidth: f64,
    #[serde(default = "default_weight_io")]
    pub io_bandwidth: f64,
    #[serde(default = "default_weight_response_time")]
    pub response_time: f64,
    #[serde(default = "default_weight_error_rate")]
    pub error_rate: f64,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            cpu_utilization: default_weight_cpu(),
            memory_utilization: default_weight_memory(),
            request_rate: default_weight_request_rate(),
            network_bandwidth: default_weight_network(),
            io_bandwidth: default_weight_io(),
            response_time: default_weight_response_time(),
            error_rate: default_weight_error_rate(),
        }
    }
}

/// Direction-specific cooldown periods
#[derive(Debug, Clone, Deserialize)]
pub struct CooldownConfig {
    #[serde(default = "default_scale_up_cooldown")]
    pub scale_up_cooldown_secs: u64,
    #[serde(default = "default_scale_down_cooldown")]
    pub scale_down_cooldown_secs: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            scale_up_cooldown_secs: default_scale_up_cooldown(),
            scale_down_cooldown_secs: default_scale_down_cooldown(),
        }
    }
}

impl CooldownConfig {
    pub fn scale_up_cooldown(&self) -> Duration {
        Duration::from_secs(self.scale_up_cooldown_secs)
    }

    pub fn scale_down_cooldown(&self) -> Duration {
        Duration::from_secs(self.scale_down_cooldown_secs)
    }
}

/// Prediction handling settings
#[derive(Debug, Clone, Deserialize)]
pub struct PredictionConfig {
    /// Decisions below this confidence are logged but still emitted
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

/// General process settings
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Ingress class tag recorded on snapshots
    #[serde(default = "default_ingress_class")]
    pub ingress_class: String,

    /// Namespaces to watch; empty means all
    #[serde(default)]
    pub watch_namespaces: Vec<String>,

    /// When true the controller never commits workload updates
    #[serde(default)]
    pub dry_run: bool,

    /// Port for the health and metrics endpoints
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Controller requeue interval in seconds
    #[serde(default = "default_requeue_interval")]
    pub requeue_interval_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            ingress_class: default_ingress_class(),
            watch_namespaces: Vec::new(),
            dry_run: false,
            api_port: default_api_port(),
            requeue_interval_secs: default_requeue_interval(),
        }
    }
}

impl GeneralConfig {
    pub fn requeue_interval(&self) -> Duration {
        Duration::from_secs(self.requeue_interval_secs)
    }
}

fn default_collection_interval() -> u64 {
    30
}

fn default_retention_period() -> u64 {
    24 * 60 * 60
}

fn default_request_rate_window() -> u64 {
    5 * 60
}

fn default_measurement_interval() -> u64 {
    10
}

fn default_min_replicas() -> i32 {
    1
}

fn default_max_replicas() -> i32 {
    10
}

fn default_evaluation_interval() -> u64 {
    30
}

fn default_learning_rate() -> f64 {
    0.01
}

fn default_retrain_interval() -> u64 {
    60 * 60
}

fn default_weight_cpu() -> f64 {
    0.25
}

fn default_weight_memory() -> f64 {
    0.20
}

fn default_weight_request_rate() -> f64 {
    0.30
}

fn default_weight_network() -> f64 {
    0.10
}

fn default_weight_io() -> f64 {
    0.05
}

fn default_weight_response_time() -> f64 {
    0.08
}

fn default_weight_error_rate() -> f64 {
    0.02
}

fn default_scale_up_cooldown() -> u64 {
    3 * 60
}

fn default_scale_down_cooldown() -> u64 {
    5 * 60
}

fn default_confidence_threshold() -> f64 {
    0.8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ingress_class() -> String {
    "nginx".to_string()
}

fn default_api_port() -> u16 {
    8081
}

fn default_requeue_interval() -> u64 {
    30
}

impl Config {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("HYDRA_ROUTE").separator("__"),
        );

        let config: Config = builder
            .build()
            .context("failed to assemble configuration sources")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configured values; violations are fatal at startup
    pub fn validate(&self) -> Result<()> {
        if self.metrics.collection_interval_secs == 0 {
            anyhow::bail!("metrics.collection_interval must be at least 1 second");
        }
        if self.general.requeue_interval_secs == 0 {
            anyhow::bail!("general.requeue_interval must be at least 1 second");
        }
        if self.scaling.min_replicas < 1 {
            anyhow::bail!("scaling.min_replicas must be at least 1");
        }
        if self.scaling.max_replicas < self.scaling.min_replicas {
            anyhow::bail!("scaling.max_replicas must be greater than or equal to min_replicas");
        }
        let lr = self.scaling.ai_model.learning_rate;
        if lr <= 0.0 || lr >= 1.0 {
            anyhow::bail!("scaling.ai_model.learning_rate must be between 0 and 1");
        }
        let ct = self.scaling.prediction.confidence_threshold;
        if ct <= 0.0 || ct >= 1.0 {
            anyhow::bail!("scaling.prediction.confidence_threshold must be between 0 and 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.metrics.collection_interval(), Duration::from_secs(30));
        assert_eq!(
            config.metrics.retention_period(),
            Duration::from_secs(24 * 60 * 60)
        );
        assert_eq!(config.scaling.min_replicas, 1);
        assert_eq!(config.scaling.max_replicas, 10);
        assert_eq!(
            config.scaling.cooldown.scale_up_cooldown(),
            Duration::from_secs(180)
        );
        assert_eq!(
            config.scaling.cooldown.scale_down_cooldown(),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_rejects_zero_min_replicas() {
        let mut config = Config::default();
        config.scaling.min_replicas = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_max_below_min() {
        let mut config = Config::default();
        config.scaling.min_replicas = 5;
        config.scaling.max_replicas = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_learning_rate() {
        let mut config = Config::default();
        config.scaling.ai_model.learning_rate = 1.0;
        assert!(config.validate().is_err());

        config.scaling.ai_model.learning_rate = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_collection_interval() {
        let mut config = Config::default();
        config.metrics.collection_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_confidence_threshold() {
        let mut config = Config::default();
        config.scaling.prediction.confidence_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_model_type_deserialization() {
        #[derive(Deserialize)]
        struct Wrapper {
            model_type: ModelType,
        }
        let w: Wrapper = serde_json::from_str(r#"{"model_type": "neural_network"}"#).unwrap();
        assert_eq!(w.model_type, ModelType::NeuralNetwork);
        let w: Wrapper = serde_json::from_str(r#"{"model_type": "ensemble"}"#).unwrap();
        assert_eq!(w.model_type, ModelType::Ensemble);
    }

    #[test]
    fn test_heuristic_threshold_defaults() {
        let up = ThresholdConfig::scale_up_defaults();
        let down = ThresholdConfig::scale_down_defaults();
        assert_eq!(up.cpu_utilization, 80.0);
        assert_eq!(down.cpu_utilization, 30.0);
        assert_eq!(up.request_rate, 100.0);
        assert_eq!(down.request_rate, 10.0);
    }
}

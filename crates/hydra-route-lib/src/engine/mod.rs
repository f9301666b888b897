//! Scaling decision engine
//!
//! Turns the latest snapshot for a target into a replica recommendation:
//! feature extraction, a pluggable predictor, dead-band projection, bounds
//! clamping and per-direction cooldown. Owns the online training buffer and
//! retrains off the decision path.

pub mod features;

mod ensemble;
mod heuristic;
mod linear;
mod neural;

pub use ensemble::{EnsembleModel, DEFAULT_MEMBER_WEIGHTS};
pub use features::{FeatureExtractor, NUM_FEATURES};
pub use heuristic::{HeuristicModel, HEURISTIC_CONFIDENCE};
pub use linear::{LinearModel, LINEAR_CONFIDENCE};
pub use neural::{NeuralModel, HIDDEN_SIZE, NEURAL_CONFIDENCE};

use crate::collector::MetricsStore;
use crate::config::{ModelType, ScalingConfig};
use crate::health::HealthRegistry;
use crate::models::{
    CooldownEntry, FeatureVector, MetricsSnapshot, Prediction, ReplicaBounds, ScaleDirection,
    ScalingDecision, TargetRef, TrainingSample,
};
use crate::observability::RouteMetrics;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Scale factor floor enforced by every predictor
pub const SCALE_FACTOR_MIN: f64 = 0.5;
/// Scale factor ceiling enforced by every predictor
pub const SCALE_FACTOR_MAX: f64 = 2.0;

/// Factors above this project a scale-up
pub const SCALE_UP_DEAD_BAND: f64 = 1.1;
/// Factors below this project a scale-down
pub const SCALE_DOWN_DEAD_BAND: f64 = 0.9;

/// Minimum buffered samples before a training pass can run
pub const MIN_TRAINING_SAMPLES: usize = 10;
/// Capacity of the training ring
pub const MAX_TRAINING_SAMPLES: usize = 10_000;
/// A retrain is considered every this many appended samples
pub const RETRAIN_SAMPLE_BATCH: usize = 100;

pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Squash a raw model output into the open scale factor range
pub(crate) fn squash(raw: f64) -> f64 {
    SCALE_FACTOR_MIN + (SCALE_FACTOR_MAX - SCALE_FACTOR_MIN) * sigmoid(raw)
}

/// A scaling model: predicts a factor with confidence, trainable online
pub trait Predictor: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> Result<Prediction>;

    fn train(&mut self, samples: &[TrainingSample]) -> Result<()>;

    fn is_trained(&self) -> bool;

    fn model_type(&self) -> &'static str;

    /// Clone for off-path retraining; the trained clone replaces the
    /// original under a brief write lease.
    fn boxed_clone(&self) -> Box<dyn Predictor>;
}

/// Build the configured predictor variant
fn build_model(config: &ScalingConfig) -> Box<dyn Predictor> {
    let ai = &config.ai_model;
    let up = config.scale_up_thresholds.clone();
    let down = config.scale_down_thresholds.clone();
    match ai.model_type {
        ModelType::Heuristic => Box::new(HeuristicModel::new(up, down)),
        ModelType::Linear => Box::new(LinearModel::new(&ai.feature_weights, up, down)),
        ModelType::NeuralNetwork => Box::new(NeuralModel::new(ai.learning_rate, up, down)),
        ModelType::Ensemble => Box::new(EnsembleModel::new(
            vec![
                Box::new(LinearModel::new(
                    &ai.feature_weights,
                    up.clone(),
                    down.clone(),
                )),
                Box::new(NeuralModel::new(ai.learning_rate, up, down)),
            ],
            DEFAULT_MEMBER_WEIGHTS.to_vec(),
        )),
    }
}

/// Engine-owned mutable state behind a single reader-writer lock
struct EngineState {
    training: VecDeque<TrainingSample>,
    cooldowns: HashMap<TargetRef, CooldownEntry>,
    last_decisions: HashMap<TargetRef, ScalingDecision>,
    last_retrain: Option<Instant>,
    /// Appends since the last retrain dispatch; the ring staying full must
    /// not turn every append into a batch boundary
    samples_since_retrain: usize,
}

/// Produces scaling decisions and manages the predictor lifecycle
pub struct ScalingEngine {
    config: ScalingConfig,
    model: Arc<RwLock<Box<dyn Predictor>>>,
    fallback: HeuristicModel,
    extractor: FeatureExtractor,
    store: Arc<MetricsStore>,
    state: RwLock<EngineState>,
    metrics: RouteMetrics,
    health: HealthRegistry,
}

impl ScalingEngine {
    pub fn new(
        config: ScalingConfig,
        request_rate_window: std::time::Duration,
        store: Arc<MetricsStore>,
        metrics: RouteMetrics,
        health: HealthRegistry,
    ) -> Self {
        let model = build_model(&config);
        metrics.set_model_info(model.model_type());
        health.record_model(model.model_type(), model.is_trained());
        let fallback = HeuristicModel::new(
            config.scale_up_thresholds.clone(),
            config.scale_down_thresholds.clone(),
        );

        Self {
            config,
            model: Arc::new(RwLock::new(model)),
            fallback,
            extractor: FeatureExtractor::new(request_rate_window),
            store,
            state: RwLock::new(EngineState {
                training: VecDeque::new(),
                cooldowns: HashMap::new(),
                last_decisions: HashMap::new(),
                last_retrain: None,
                samples_since_retrain: 0,
            }),
            metrics,
            health,
        }
    }

    /// Process-wide default bounds; per-ingress annotations override them
    pub fn default_bounds(&self) -> ReplicaBounds {
        ReplicaBounds::new(self.config.min_replicas, self.config.max_replicas)
    }

    /// Decide whether and how to scale a target.
    ///
    /// Returns `None` when the target is in cooldown or the snapshot never
    /// observed a workload.
    pub async fn decide(
        &self,
        snapshot: &Arc<MetricsSnapshot>,
        bounds: ReplicaBounds,
    ) -> Option<ScalingDecision> {
        let started = Instant::now();
        let target = &snapshot.target;

        if snapshot.current_replicas == 0 && snapshot.desired_replicas == 0 {
            debug!(target = %target, "no workload observed for target, skipping decision");
            return None;
        }

        let now = Utc::now();
        if self.in_cooldown(target, now).await {
            debug!(target = %target, "target in cooldown, skipping decision");
            return None;
        }

        let history = self.store.history(target).await;
        let features = self.extractor.extract(snapshot, &history, now);

        let prediction = match self.model.read().await.predict(&features) {
            Ok(prediction) => prediction,
            Err(err) => {
                warn!(target = %target, error = %err, "prediction failed, using heuristic fallback");
                Prediction {
                    scale_factor: self.fallback.scale_factor(&features),
                    confidence: HEURISTIC_CONFIDENCE,
                }
            }
        };

        // Project from at least one replica, but keep the observed count in
        // the decision: a workload seen at zero with a floor above it must
        // surface as a change, not compare equal to the projection base.
        let observed = snapshot.current_replicas;
        let base = observed.max(1);
        let recommended = bounds.clamp(project_replicas(base, prediction.scale_factor));
        let reasoning = self.reasoning(&features, &prediction);

        let threshold = self.config.prediction.confidence_threshold;
        if prediction.confidence < threshold {
            info!(
                target = %target,
                confidence = prediction.confidence,
                threshold,
                "decision confidence below threshold"
            );
        }

        let decision = ScalingDecision {
            target: target.clone(),
            timestamp: now,
            current_replicas: observed,
            recommended_replicas: recommended,
            scale_factor: prediction.scale_factor,
            confidence: prediction.confidence,
            reasoning,
            snapshot: Arc::clone(snapshot),
        };

        {
            let mut state = self.state.write().await;
            state
                .last_decisions
                .insert(target.clone(), decision.clone());
        }

        self.metrics.inc_decisions();
        self.metrics
            .observe_decision_latency(started.elapsed().as_secs_f64());
        Some(decision)
    }

    /// Record a committed change; starts the cooldown for its direction.
    ///
    /// Only called after a successful workload update, so dry runs and
    /// conflicted updates never start a cooldown.
    pub async fn record_commit(&self, decision: &ScalingDecision) {
        let Some(direction) = decision.direction() else {
            return;
        };
        let mut state = self.state.write().await;
        state.cooldowns.insert(
            decision.target.clone(),
            CooldownEntry {
                at: Utc::now(),
                direction,
            },
        );
    }

    /// Last decision emitted for a target, if any
    pub async fn last_decision(&self, target: &TargetRef) -> Option<ScalingDecision> {
        self.state.read().await.last_decisions.get(target).cloned()
    }

    /// Whether the active predictor has completed a training pass
    pub async fn model_is_trained(&self) -> bool {
        self.model.read().await.is_trained()
    }

    /// Append a sample to the training ring, possibly dispatching a retrain
    pub async fn add_training_sample(&self, sample: TrainingSample) {
        let batch = {
            let mut state = self.state.write().await;
            state.training.push_back(sample);
            if state.training.len() > MAX_TRAINING_SAMPLES {
                state.training.pop_front();
            }
            state.samples_since_retrain += 1;
            self.metrics.set_training_samples(state.training.len() as i64);

            let batch_reached = state.samples_since_retrain >= RETRAIN_SAMPLE_BATCH;
            let interval_elapsed = state
                .last_retrain
                .map(|at| at.elapsed() >= self.config.ai_model.retrain_interval())
                .unwrap_or(true);

            if self.config.ai_model.enable_online_learning && batch_reached && interval_elapsed {
                state.samples_since_retrain = 0;
                state.last_retrain = Some(Instant::now());
                Some(state.training.iter().cloned().collect::<Vec<_>>())
            } else {
                None
            }
        };

        if let Some(samples) = batch {
            self.spawn_retrain(samples);
        }
    }

    /// Retrain a clone of the model off the decision path and install it
    /// atomically on success.
    fn spawn_retrain(&self, samples: Vec<TrainingSample>) {
        let model = Arc::clone(&self.model);
        let metrics = self.metrics.clone();
        let health = self.health.clone();

        tokio::spawn(async move {
            info!(samples = samples.len(), "retraining scaling model");
            let candidate = model.read().await.boxed_clone();

            let outcome = tokio::task::spawn_blocking(move || {
                let mut candidate = candidate;
                candidate.train(&samples).map(|_| candidate)
            })
            .await;

            match outcome {
                Ok(Ok(trained)) => {
                    let model_type = trained.model_type();
                    let is_trained = trained.is_trained();
                    *model.write().await = trained;
                    metrics.inc_retrains();
                    health.record_model(model_type, is_trained);
                    info!("scaling model retrained");
                }
                Ok(Err(err)) => {
                    metrics.inc_training_errors();
                    health.record_retrain_error(err.to_string());
                    warn!(error = %err, "model retraining failed, keeping previous weights");
                }
                Err(err) => {
                    metrics.inc_training_errors();
                    health.record_retrain_error(err.to_string());
                    warn!(error = %err, "model retraining task failed");
                }
            }
        });
    }

    async fn in_cooldown(&self, target: &TargetRef, now: DateTime<Utc>) -> bool {
        let state = self.state.read().await;
        let Some(entry) = state.cooldowns.get(target) else {
            return false;
        };
        cooldown_blocks(
            entry,
            now,
            self.config.cooldown.scale_up_cooldown(),
            self.config.cooldown.scale_down_cooldown(),
        )
    }

    /// Summarize which thresholds were crossed, plus factor and confidence
    fn reasoning(&self, features: &FeatureVector, prediction: &Prediction) -> String {
        let up = &self.config.scale_up_thresholds;
        let mut reasons = Vec::new();

        if features.cpu_utilization > up.cpu_utilization {
            reasons.push("high CPU utilization");
        }
        if features.memory_utilization > up.memory_utilization {
            reasons.push("high memory utilization");
        }
        if features.request_rate > up.request_rate {
            reasons.push("high request rate");
        }
        if features.error_rate > up.error_rate {
            reasons.push("elevated error rate");
        }
        if features.response_time > up.response_time {
            reasons.push("slow response times");
        }

        let factor = prediction.scale_factor;
        let confidence = prediction.confidence;
        if reasons.is_empty() {
            return if factor > SCALE_UP_DEAD_BAND {
                format!(
                    "Model recommends scaling up (factor: {factor:.2}, confidence: {confidence:.2})"
                )
            } else if factor < SCALE_DOWN_DEAD_BAND {
                format!(
                    "Model recommends scaling down (factor: {factor:.2}, confidence: {confidence:.2})"
                )
            } else {
                "No scaling needed based on current metrics".to_string()
            };
        }

        let action = if factor < 1.0 { "down" } else { "up" };
        format!(
            "Scaling {action} due to: {} (factor: {factor:.2}, confidence: {confidence:.2})",
            reasons.join(", ")
        )
    }
}

/// Project a scale factor onto a replica count.
///
/// Factors inside the dead band keep the current count; scale-ups round up
/// and scale-downs round down. Callers clamp the result into bounds.
fn project_replicas(current: i32, factor: f64) -> i32 {
    if factor > SCALE_UP_DEAD_BAND {
        (current as f64 * factor).ceil() as i32
    } else if factor < SCALE_DOWN_DEAD_BAND {
        (current as f64 * factor).floor() as i32
    } else {
        current
    }
}

/// Whether a cooldown entry still blocks decisions at `now`
fn cooldown_blocks(
    entry: &CooldownEntry,
    now: DateTime<Utc>,
    up_cooldown: std::time::Duration,
    down_cooldown: std::time::Duration,
) -> bool {
    let applicable = match entry.direction {
        ScaleDirection::Up => up_cooldown,
        ScaleDirection::Down => down_cooldown,
    };
    let elapsed = (now - entry.at).to_std().unwrap_or_default();
    elapsed < applicable
}

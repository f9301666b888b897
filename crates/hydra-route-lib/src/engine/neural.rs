//! Feed-forward scaling model
//!
//! Two-layer network (input → hidden → scalar) with sigmoid activations and
//! the same output squashing as the linear model. Trained online with plain
//! SGD backpropagation; until trained it answers with the heuristic rules.

use super::features::{normalized, NUM_FEATURES};
use super::heuristic::HeuristicModel;
use super::{sigmoid, squash, Prediction, Predictor, MIN_TRAINING_SAMPLES};
use crate::config::ThresholdConfig;
use crate::models::{FeatureVector, TrainingSample};
use anyhow::Result;

/// Fixed confidence reported once the network is trained
pub const NEURAL_CONFIDENCE: f64 = 0.9;

/// Hidden layer width
pub const HIDDEN_SIZE: usize = 8;

/// Passes over the sample buffer per training run
const TRAINING_EPOCHS: usize = 200;

#[derive(Debug, Clone)]
pub struct NeuralModel {
    /// Input-to-hidden weights, one row per hidden unit
    weights_input: Vec<Vec<f64>>,
    bias_hidden: Vec<f64>,
    /// Hidden-to-output weights
    weights_output: Vec<f64>,
    bias_output: f64,
    learning_rate: f64,
    trained: bool,
    fallback: HeuristicModel,
}

impl NeuralModel {
    pub fn new(learning_rate: f64, up: ThresholdConfig, down: ThresholdConfig) -> Self {
        // Deterministic symmetry-breaking init keeps retrains reproducible
        let weights_input = (0..HIDDEN_SIZE)
            .map(|i| {
                (0..NUM_FEATURES)
                    .map(|j| init_weight(i * NUM_FEATURES + j))
                    .collect()
            })
            .collect();
        let weights_output = (0..HIDDEN_SIZE)
            .map(|i| init_weight(HIDDEN_SIZE * NUM_FEATURES + i))
            .collect();

        Self {
            weights_input,
            bias_hidden: vec![0.0; HIDDEN_SIZE],
            weights_output,
            bias_output: 0.0,
            learning_rate,
            trained: false,
            fallback: HeuristicModel::new(up, down),
        }
    }

    /// Forward pass: hidden activations and the raw output
    fn forward(&self, input: &[f64; NUM_FEATURES]) -> (Vec<f64>, f64) {
        let hidden: Vec<f64> = (0..HIDDEN_SIZE)
            .map(|i| {
                let pre: f64 = self.bias_hidden[i]
                    + self.weights_input[i]
                        .iter()
                        .zip(input.iter())
                        .map(|(w, x)| w * x)
                        .sum::<f64>();
                sigmoid(pre)
            })
            .collect();

        let output = self.bias_output
            + self
                .weights_output
                .iter()
                .zip(hidden.iter())
                .map(|(w, h)| w * h)
                .sum::<f64>();

        (hidden, output)
    }

    /// One SGD step on a single sample; `target` is in sigmoid space
    fn step(&mut self, input: &[f64; NUM_FEATURES], target: f64) {
        let (hidden, output) = self.forward(input);
        let activated = sigmoid(output);

        // Squared error through the output sigmoid
        let delta_output = (activated - target) * activated * (1.0 - activated);

        for i in 0..HIDDEN_SIZE {
            let delta_hidden =
                delta_output * self.weights_output[i] * hidden[i] * (1.0 - hidden[i]);
            self.weights_output[i] -= self.learning_rate * delta_output * hidden[i];
            for j in 0..NUM_FEATURES {
                self.weights_input[i][j] -= self.learning_rate * delta_hidden * input[j];
            }
            self.bias_hidden[i] -= self.learning_rate * delta_hidden;
        }
        self.bias_output -= self.learning_rate * delta_output;
    }
}

/// Map a scale factor into the (0, 1) sigmoid target space
fn factor_to_target(actual_scale: f64) -> f64 {
    ((actual_scale.clamp(0.5, 2.0) - 0.5) / 1.5).clamp(0.01, 0.99)
}

fn init_weight(index: usize) -> f64 {
    ((index + 1) as f64 * 0.7).sin() * 0.3
}

impl Predictor for NeuralModel {
    fn predict(&self, features: &FeatureVector) -> Result<Prediction> {
        if !self.trained {
            return self.fallback.predict(features);
        }

        let input = normalized(features);
        let (_, output) = self.forward(&input);

        Ok(Prediction {
            scale_factor: squash(output),
            confidence: NEURAL_CONFIDENCE,
        })
    }

    fn train(&mut self, samples: &[TrainingSample]) -> Result<()> {
        if samples.len() < MIN_TRAINING_SAMPLES {
            anyhow::bail!(
                "insufficient training data: {} samples, need {}",
                samples.len(),
                MIN_TRAINING_SAMPLES
            );
        }

        for _ in 0..TRAINING_EPOCHS {
            for sample in samples {
                let input = normalized(&sample.features);
                let target = factor_to_target(sample.actual_scale);
                self.step(&input, target);
            }
        }

        self.trained = true;
        Ok(())
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn model_type(&self) -> &'static str {
        "neural_network"
    }

    fn boxed_clone(&self) -> Box<dyn Predictor> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn untrained_model(learning_rate: f64) -> NeuralModel {
        NeuralModel::new(
            learning_rate,
            ThresholdConfig::scale_up_defaults(),
            ThresholdConfig::scale_down_defaults(),
        )
    }

    fn busy_features() -> FeatureVector {
        FeatureVector {
            cpu_utilization: 85.0,
            memory_utilization: 70.0,
            request_rate: 300.0,
            response_time: 450.0,
            ..FeatureVector::default()
        }
    }

    fn samples_with_target(actual_scale: f64, count: usize) -> Vec<TrainingSample> {
        (0..count)
            .map(|_| TrainingSample {
                features: busy_features(),
                actual_scale,
                performance: 0.7,
                timestamp: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn test_untrained_predict_matches_heuristic() {
        let model = untrained_model(0.01);
        let prediction = model.predict(&busy_features()).unwrap();
        // CPU>80 and rps>100: 1.5 * 1.2
        assert!((prediction.scale_factor - 1.8).abs() < 1e-9);
        assert_eq!(prediction.confidence, 0.5);
    }

    #[test]
    fn test_train_requires_minimum_samples() {
        let mut model = untrained_model(0.01);
        assert!(model.train(&samples_with_target(1.5, 5)).is_err());
        assert!(!model.is_trained());
    }

    #[test]
    fn test_training_fits_constant_target() {
        let mut model = untrained_model(0.1);
        model.train(&samples_with_target(1.8, 20)).unwrap();
        assert!(model.is_trained());

        let prediction = model.predict(&busy_features()).unwrap();
        assert_eq!(prediction.confidence, NEURAL_CONFIDENCE);
        assert!(
            (prediction.scale_factor - 1.8).abs() < 0.15,
            "factor was {}",
            prediction.scale_factor
        );
    }

    #[test]
    fn test_trained_factor_stays_in_range() {
        let mut model = untrained_model(0.1);
        model.train(&samples_with_target(0.6, 20)).unwrap();

        for cpu in [0.0, 25.0, 50.0, 75.0, 100.0] {
            let prediction = model
                .predict(&FeatureVector {
                    cpu_utilization: cpu,
                    ..FeatureVector::default()
                })
                .unwrap();
            assert!(prediction.scale_factor > 0.5 && prediction.scale_factor < 2.0);
        }
    }

    #[test]
    fn test_factor_to_target_clamps() {
        assert!((factor_to_target(1.25) - 0.5).abs() < 1e-9);
        assert_eq!(factor_to_target(0.1), 0.01);
        assert_eq!(factor_to_target(5.0), 0.99);
    }

    #[test]
    fn test_deterministic_init() {
        let a = untrained_model(0.01);
        let b = untrained_model(0.01);
        assert_eq!(a.weights_input, b.weights_input);
        assert_eq!(a.weights_output, b.weights_output);
    }
}

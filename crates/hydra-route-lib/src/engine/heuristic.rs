//! Rule-based scaling predictor
//!
//! Deterministic threshold rules on the raw signals. Also serves as the
//! fallback whenever a trainable model is untrained or errors.

use super::{Prediction, Predictor, SCALE_FACTOR_MAX, SCALE_FACTOR_MIN};
use crate::config::ThresholdConfig;
use crate::models::{FeatureVector, TrainingSample};
use anyhow::Result;

/// Fixed confidence reported for rule-based predictions
pub const HEURISTIC_CONFIDENCE: f64 = 0.5;

const CPU_UP_FACTOR: f64 = 1.5;
const CPU_DOWN_FACTOR: f64 = 0.7;
const MEMORY_UP_FACTOR: f64 = 1.3;
const MEMORY_DOWN_FACTOR: f64 = 0.8;
const REQUEST_UP_FACTOR: f64 = 1.2;
const REQUEST_DOWN_FACTOR: f64 = 0.9;

/// Threshold-rule model; needs no training
#[derive(Debug, Clone)]
pub struct HeuristicModel {
    up: ThresholdConfig,
    down: ThresholdConfig,
}

impl HeuristicModel {
    pub fn new(up: ThresholdConfig, down: ThresholdConfig) -> Self {
        Self { up, down }
    }

    /// Combine the per-signal multipliers and squash into the factor range
    pub fn scale_factor(&self, features: &FeatureVector) -> f64 {
        let mut factor = 1.0;

        if features.cpu_utilization > self.up.cpu_utilization {
            factor *= CPU_UP_FACTOR;
        } else if features.cpu_utilization < self.down.cpu_utilization {
            factor *= CPU_DOWN_FACTOR;
        }

        if features.memory_utilization > self.up.memory_utilization {
            factor *= MEMORY_UP_FACTOR;
        } else if features.memory_utilization < self.down.memory_utilization {
            factor *= MEMORY_DOWN_FACTOR;
        }

        if features.request_rate > self.up.request_rate {
            factor *= REQUEST_UP_FACTOR;
        } else if features.request_rate < self.down.request_rate {
            factor *= REQUEST_DOWN_FACTOR;
        }

        factor.clamp(SCALE_FACTOR_MIN, SCALE_FACTOR_MAX)
    }
}

impl Default for HeuristicModel {
    fn default() -> Self {
        Self::new(
            ThresholdConfig::scale_up_defaults(),
            ThresholdConfig::scale_down_defaults(),
        )
    }
}

impl Predictor for HeuristicModel {
    fn predict(&self, features: &FeatureVector) -> Result<Prediction> {
        Ok(Prediction {
            scale_factor: self.scale_factor(features),
            confidence: HEURISTIC_CONFIDENCE,
        })
    }

    fn train(&mut self, _samples: &[TrainingSample]) -> Result<()> {
        Ok(())
    }

    fn is_trained(&self) -> bool {
        true
    }

    fn model_type(&self) -> &'static str {
        "heuristic"
    }

    fn boxed_clone(&self) -> Box<dyn Predictor> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(cpu: f64, memory: f64, rate: f64) -> FeatureVector {
        FeatureVector {
            cpu_utilization: cpu,
            memory_utilization: memory,
            request_rate: rate,
            ..FeatureVector::default()
        }
    }

    #[test]
    fn test_high_cpu_scales_up() {
        let model = HeuristicModel::default();
        let prediction = model.predict(&features(90.0, 50.0, 40.0)).unwrap();
        assert!((prediction.scale_factor - 1.5).abs() < 1e-9);
        assert_eq!(prediction.confidence, HEURISTIC_CONFIDENCE);
    }

    #[test]
    fn test_low_load_scales_down() {
        let model = HeuristicModel::default();
        // 0.7 * 0.8 * 0.9 = 0.504
        let prediction = model.predict(&features(10.0, 20.0, 5.0)).unwrap();
        assert!((prediction.scale_factor - 0.504).abs() < 1e-9);
    }

    #[test]
    fn test_moderate_load_is_neutral() {
        let model = HeuristicModel::default();
        let prediction = model.predict(&features(60.0, 55.0, 50.0)).unwrap();
        assert!((prediction.scale_factor - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_compound_pressure_is_clamped_to_max() {
        let model = HeuristicModel::default();
        // 1.5 * 1.3 * 1.2 = 2.34, squashed to the factor ceiling
        let prediction = model.predict(&features(95.0, 95.0, 500.0)).unwrap();
        assert!((prediction.scale_factor - SCALE_FACTOR_MAX).abs() < 1e-9);
    }

    #[test]
    fn test_factor_stays_in_range() {
        let model = HeuristicModel::default();
        for (cpu, memory, rate) in [
            (0.0, 0.0, 0.0),
            (100.0, 100.0, 10_000.0),
            (50.0, 10.0, 500.0),
            (85.0, 5.0, 2.0),
        ] {
            let factor = model.scale_factor(&features(cpu, memory, rate));
            assert!((SCALE_FACTOR_MIN..=SCALE_FACTOR_MAX).contains(&factor));
        }
    }

    #[test]
    fn test_custom_thresholds_shift_the_rules() {
        let mut up = ThresholdConfig::scale_up_defaults();
        up.cpu_utilization = 50.0;
        let model = HeuristicModel::new(up, ThresholdConfig::scale_down_defaults());
        let prediction = model.predict(&features(60.0, 55.0, 50.0)).unwrap();
        assert!((prediction.scale_factor - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_reports_trained() {
        let model = HeuristicModel::default();
        assert!(model.is_trained());
        assert_eq!(model.model_type(), "heuristic");
    }
}

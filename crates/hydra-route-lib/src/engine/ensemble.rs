//! Weighted predictor composition
//!
//! Combines member predictions and confidences by fixed weights. A member
//! that errors is skipped and its weight excluded from the normalizer; the
//! ensemble itself fails only when every member does.

use super::{Prediction, Predictor};
use crate::models::{FeatureVector, TrainingSample};
use anyhow::Result;
use tracing::debug;

/// Default member weights: the linear model leads initially
pub const DEFAULT_MEMBER_WEIGHTS: [f64; 2] = [0.6, 0.4];

pub struct EnsembleModel {
    members: Vec<Box<dyn Predictor>>,
    weights: Vec<f64>,
}

impl EnsembleModel {
    pub fn new(members: Vec<Box<dyn Predictor>>, weights: Vec<f64>) -> Self {
        debug_assert_eq!(members.len(), weights.len());
        Self { members, weights }
    }
}

impl Predictor for EnsembleModel {
    fn predict(&self, features: &FeatureVector) -> Result<Prediction> {
        let mut weighted_factor = 0.0;
        let mut weighted_confidence = 0.0;
        let mut total_weight = 0.0;

        for (member, weight) in self.members.iter().zip(self.weights.iter()) {
            match member.predict(features) {
                Ok(prediction) => {
                    weighted_factor += prediction.scale_factor * weight;
                    weighted_confidence += prediction.confidence * weight;
                    total_weight += weight;
                }
                Err(err) => {
                    debug!(member = member.model_type(), error = %err, "ensemble member failed");
                }
            }
        }

        if total_weight == 0.0 {
            anyhow::bail!("all ensemble members failed to predict");
        }

        Ok(Prediction {
            scale_factor: weighted_factor / total_weight,
            confidence: weighted_confidence / total_weight,
        })
    }

    fn train(&mut self, samples: &[TrainingSample]) -> Result<()> {
        let mut failures = 0;
        for member in &mut self.members {
            if let Err(err) = member.train(samples) {
                debug!(member = member.model_type(), error = %err, "ensemble member training failed");
                failures += 1;
            }
        }
        if failures == self.members.len() {
            anyhow::bail!("all ensemble members failed to train");
        }
        Ok(())
    }

    fn is_trained(&self) -> bool {
        self.members.iter().any(|m| m.is_trained())
    }

    fn model_type(&self) -> &'static str {
        "ensemble"
    }

    fn boxed_clone(&self) -> Box<dyn Predictor> {
        Box::new(Self {
            members: self.members.iter().map(|m| m.boxed_clone()).collect(),
            weights: self.weights.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Member with a fixed answer, optionally failing
    #[derive(Clone)]
    struct StubModel {
        factor: f64,
        confidence: f64,
        fail_predict: bool,
        fail_train: bool,
        trained: bool,
    }

    impl StubModel {
        fn fixed(factor: f64, confidence: f64) -> Self {
            Self {
                factor,
                confidence,
                fail_predict: false,
                fail_train: false,
                trained: false,
            }
        }

        fn failing() -> Self {
            Self {
                factor: 0.0,
                confidence: 0.0,
                fail_predict: true,
                fail_train: true,
                trained: false,
            }
        }
    }

    impl Predictor for StubModel {
        fn predict(&self, _features: &FeatureVector) -> Result<Prediction> {
            if self.fail_predict {
                anyhow::bail!("stub predict failure");
            }
            Ok(Prediction {
                scale_factor: self.factor,
                confidence: self.confidence,
            })
        }

        fn train(&mut self, _samples: &[TrainingSample]) -> Result<()> {
            if self.fail_train {
                anyhow::bail!("stub train failure");
            }
            self.trained = true;
            Ok(())
        }

        fn is_trained(&self) -> bool {
            self.trained
        }

        fn model_type(&self) -> &'static str {
            "stub"
        }

        fn boxed_clone(&self) -> Box<dyn Predictor> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn test_weighted_combination() {
        let ensemble = EnsembleModel::new(
            vec![
                Box::new(StubModel::fixed(1.5, 0.8)),
                Box::new(StubModel::fixed(1.0, 0.6)),
            ],
            vec![0.6, 0.4],
        );
        let prediction = ensemble.predict(&FeatureVector::default()).unwrap();
        assert!((prediction.scale_factor - 1.3).abs() < 1e-9);
        assert!((prediction.confidence - 0.72).abs() < 1e-9);
    }

    #[test]
    fn test_failed_member_is_skipped_and_renormalized() {
        let ensemble = EnsembleModel::new(
            vec![
                Box::new(StubModel::failing()),
                Box::new(StubModel::fixed(1.5, 0.8)),
            ],
            vec![0.6, 0.4],
        );
        let prediction = ensemble.predict(&FeatureVector::default()).unwrap();
        assert!((prediction.scale_factor - 1.5).abs() < 1e-9);
        assert!((prediction.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_all_members_failing_is_an_error() {
        let ensemble = EnsembleModel::new(
            vec![
                Box::new(StubModel::failing()),
                Box::new(StubModel::failing()),
            ],
            vec![0.6, 0.4],
        );
        assert!(ensemble.predict(&FeatureVector::default()).is_err());
    }

    #[test]
    fn test_training_tolerates_partial_failure() {
        let mut ensemble = EnsembleModel::new(
            vec![
                Box::new(StubModel::failing()),
                Box::new(StubModel::fixed(1.0, 0.5)),
            ],
            vec![0.5, 0.5],
        );
        assert!(ensemble.train(&[]).is_ok());
        assert!(ensemble.is_trained());
    }

    #[test]
    fn test_training_fails_when_every_member_fails() {
        let mut ensemble = EnsembleModel::new(
            vec![
                Box::new(StubModel::failing()),
                Box::new(StubModel::failing()),
            ],
            vec![0.5, 0.5],
        );
        assert!(ensemble.train(&[]).is_err());
        assert!(!ensemble.is_trained());
    }
}

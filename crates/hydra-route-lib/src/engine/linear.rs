//! Linear scaling model
//!
//! A weighted sum over the normalized features, squashed into the scale
//! factor range. Trained by ordinary least squares over the sample buffer
//! via the normal equations; until trained it answers with the heuristic
//! rules.

use super::features::{normalized, NUM_FEATURES};
use super::heuristic::HeuristicModel;
use super::{squash, Prediction, Predictor, MIN_TRAINING_SAMPLES};
use crate::config::{FeatureWeights, ThresholdConfig};
use crate::models::{FeatureVector, TrainingSample};
use anyhow::Result;

/// Fixed confidence reported once the model is trained
pub const LINEAR_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Clone)]
pub struct LinearModel {
    weights: Vec<f64>,
    bias: f64,
    trained: bool,
    fallback: HeuristicModel,
}

impl LinearModel {
    /// Create an untrained model seeded with the configured signal weights
    pub fn new(initial: &FeatureWeights, up: ThresholdConfig, down: ThresholdConfig) -> Self {
        let mut weights = vec![0.0; NUM_FEATURES];
        weights[0] = initial.cpu_utilization;
        weights[1] = initial.memory_utilization;
        weights[2] = initial.request_rate;
        weights[3] = initial.network_bandwidth;
        weights[4] = initial.io_bandwidth;
        weights[5] = initial.response_time;
        weights[6] = initial.error_rate;

        Self {
            weights,
            bias: 0.0,
            trained: false,
            fallback: HeuristicModel::new(up, down),
        }
    }

    #[cfg(test)]
    pub(crate) fn weights(&self) -> &[f64] {
        &self.weights
    }
}

impl Predictor for LinearModel {
    fn predict(&self, features: &FeatureVector) -> Result<Prediction> {
        if !self.trained {
            return self.fallback.predict(features);
        }

        let input = normalized(features);
        let raw: f64 = self.bias
            + self
                .weights
                .iter()
                .zip(input.iter())
                .map(|(w, x)| w * x)
                .sum::<f64>();

        Ok(Prediction {
            scale_factor: squash(raw),
            confidence: LINEAR_CONFIDENCE,
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

        // Normal equations: w = (XᵀX)⁻¹ Xᵀy, accumulated without
        // materializing X.
        let mut xtx = vec![vec![0.0; NUM_FEATURES]; NUM_FEATURES];
        let mut xty = vec![0.0; NUM_FEATURES];
        for sample in samples {
            let row = normalized(&sample.features);
            for i in 0..NUM_FEATURES {
                for j in 0..NUM_FEATURES {
                    xtx[i][j] += row[i] * row[j];
                }
                xty[i] += row[i] * sample.actual_scale;
            }
        }

        let weights = solve_linear_system(xtx, xty)
            .ok_or_else(|| anyhow::anyhow!("normal equations are singular"))?;

        self.weights = weights;
        self.trained = true;
        Ok(())
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn model_type(&self) -> &'static str {
        "linear"
    }

    fn boxed_clone(&self) -> Box<dyn Predictor> {
        Box::new(self.clone())
    }
}

/// Solve `A·x = b` by Gaussian elimination with partial pivoting.
///
/// Returns `None` when the system is singular.
fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot_row][col].abs() < 1e-10 {
            return None;
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut sum = b[row];
        for col in (row + 1)..n {
            sum -= a[row][col] * x[col];
        }
        x[row] = sum / a[row][row];
    }
    Some(x)
}

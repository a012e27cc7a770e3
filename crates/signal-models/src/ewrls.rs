//! Exponentially weighted recursive least squares.
//!
//! Online linear regression with a forgetting factor, used as the
//! learning core of the EWRLS strategy. O(n²) per update on an n×n
//! covariance; n here is the feature dimension (63 or 75).

use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};
use tracing::warn;

const INITIAL_COVARIANCE: f64 = 100.0;

/// Online recursive least squares with forgetting factor `lambda`.
///
/// Update equations, given features `x` and realized return `y`:
///
/// ```text
/// e = y - theta . x
/// g = P x / (lambda + x' P x)
/// theta <- theta + g e
/// P <- (P - g x' P) / lambda        (then symmetrized)
/// ```
///
/// Non-finite inputs are rejected without touching the state; a
/// non-finite weight vector or covariance after an update resets the
/// offending part to its initial value.
#[derive(Debug, Clone)]
pub struct EwrlsPredictor {
    theta: DVector<f64>,
    p: DMatrix<f64>,
    lambda: f64,
    n_features: usize,
    updates: usize,
}

impl EwrlsPredictor {
    /// `lambda` must lie in (0, 1]; values closer to 1 retain more
    /// history, lower values adapt faster.
    pub fn new(n_features: usize, lambda: f64) -> Result<Self> {
        if lambda <= 0.0 || lambda > 1.0 {
            bail!("lambda must be in (0, 1], got {lambda}");
        }
        if n_features == 0 {
            bail!("n_features must be positive");
        }
        Ok(Self {
            theta: DVector::zeros(n_features),
            p: DMatrix::identity(n_features, n_features) * INITIAL_COVARIANCE,
            lambda,
            n_features,
            updates: 0,
        })
    }

    /// Predicted return for a feature vector: `theta . x`.
    pub fn predict(&self, features: &DVector<f64>) -> f64 {
        debug_assert_eq!(features.len(), self.n_features);
        self.theta.dot(features)
    }

    /// Incorporate an observed outcome. Silently skips non-finite
    /// inputs.
    pub fn update(&mut self, features: &DVector<f64>, actual_return: f64) {
        if features.len() != self.n_features {
            return;
        }
        if !actual_return.is_finite() || features.iter().any(|v| !v.is_finite()) {
            return;
        }

        let error = actual_return - self.predict(features);
        if !error.is_finite() {
            return;
        }

        let px = &self.p * features;
        let mut denominator = self.lambda + features.dot(&px);
        if denominator.abs() < 1e-10 {
            denominator = 1e-10;
        }

        let gain = px / denominator;

        self.theta += &gain * error;
        if self.theta.iter().any(|v| !v.is_finite()) {
            warn!(updates = self.updates, "non-finite weights, resetting predictor");
            self.reset();
            return;
        }

        let xt_p = features.transpose() * &self.p;
        let p_new = (&self.p - &gain * xt_p) / self.lambda;
        if p_new.iter().all(|v| v.is_finite()) {
            // Symmetrize to keep the covariance numerically well-behaved.
            self.p = (&p_new + p_new.transpose()) * 0.5;
        } else {
            warn!(updates = self.updates, "non-finite covariance, reinitializing");
            self.p = DMatrix::identity(self.n_features, self.n_features) * INITIAL_COVARIANCE;
        }

        self.updates += 1;
    }

    /// Restore theta = 0, P = 100·I, update counter 0.
    pub fn reset(&mut self) {
        self.theta = DVector::zeros(self.n_features);
        self.p = DMatrix::identity(self.n_features, self.n_features) * INITIAL_COVARIANCE;
        self.updates = 0;
    }

    pub fn weights(&self) -> &DVector<f64> {
        &self.theta
    }

    pub fn update_count(&self) -> usize {
        self.updates
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

//! Two-bar horizon wrapper around the EWRLS core.
//!
//! Earlier iterations of this system ran parallel predictors at 1/5/10
//! bar horizons; the production configuration collapsed to a single
//! 2-bar horizon, which is what this wrapper implements. The
//! [`Prediction`] record keeps the full quality-metric shape so
//! downstream consumers are unchanged.

use anyhow::Result;
use nalgebra::DVector;
use rotation_core::Prediction;

use crate::ewrls::EwrlsPredictor;

/// Prediction horizon in bars.
pub const HORIZON_BARS: u32 = 2;

/// Multi-horizon prediction record.
///
/// The shape survives from the 1/5/10-bar design so downstream
/// consumers and exporters are unchanged; only the 2-bar slot carries
/// live semantics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiHorizonPrediction {
    pub pred_2bar: Prediction,
    /// Fixed at 2 bars.
    pub optimal_horizon: u32,
    pub expected_return: f64,
    pub expected_volatility: f64,
}

impl MultiHorizonPrediction {
    pub fn from_quality(pred: Prediction) -> Self {
        Self {
            pred_2bar: pred,
            optimal_horizon: HORIZON_BARS,
            expected_return: pred.prediction,
            expected_volatility: pred.uncertainty,
        }
    }

    /// With a single horizon there is nothing to disagree with.
    pub fn horizons_agree(&self) -> bool {
        true
    }

    pub fn should_enter(&self, min_prediction: f64, min_confidence: f64) -> bool {
        self.pred_2bar.should_enter(min_prediction, min_confidence)
    }

    pub fn suggested_hold_period(&self) -> u32 {
        HORIZON_BARS
    }
}

/// EWRLS predictor plus uncertainty tracking for one symbol.
///
/// Uncertainty is the square root of an exponentially weighted moving
/// average of squared prediction errors, floored by the configured
/// initial uncertainty so confidence never saturates on an empty error
/// history.
#[derive(Debug, Clone)]
pub struct HorizonPredictor {
    model: EwrlsPredictor,
    error_ewma: f64,
    uncertainty: f64,
    decay: f64,
    initial_uncertainty: f64,
}

impl HorizonPredictor {
    pub fn new(n_features: usize, lambda: f64) -> Result<Self> {
        Self::with_uncertainty(n_features, lambda, 0.95, 0.01)
    }

    pub fn with_uncertainty(
        n_features: usize,
        lambda: f64,
        decay: f64,
        initial_uncertainty: f64,
    ) -> Result<Self> {
        Ok(Self {
            model: EwrlsPredictor::new(n_features, lambda)?,
            error_ewma: 0.0,
            uncertainty: initial_uncertainty,
            decay,
            initial_uncertainty,
        })
    }

    /// Predict the 2-bar return and attach quality metrics.
    pub fn predict(&self, features: &DVector<f64>) -> Prediction {
        let prediction = self.model.predict(features);
        self.quality(prediction)
    }

    /// Predict and wrap in the multi-horizon record shape.
    pub fn predict_multi(&self, features: &DVector<f64>) -> MultiHorizonPrediction {
        MultiHorizonPrediction::from_quality(self.predict(features))
    }

    /// Update with the realized 2-bar return for a previously extracted
    /// feature vector.
    pub fn update(&mut self, features: &DVector<f64>, actual_return: f64) {
        if !actual_return.is_finite() {
            return;
        }
        let error = actual_return - self.model.predict(features);
        self.model.update(features, actual_return);
        if error.is_finite() {
            self.error_ewma = self.decay * self.error_ewma + (1.0 - self.decay) * error * error;
            self.uncertainty = (self.error_ewma
                + self.initial_uncertainty * self.initial_uncertainty)
                .sqrt();
        }
    }

    pub fn reset(&mut self) {
        self.model.reset();
        self.error_ewma = 0.0;
        self.uncertainty = self.initial_uncertainty;
    }

    pub fn update_count(&self) -> usize {
        self.model.update_count()
    }

    fn quality(&self, prediction: f64) -> Prediction {
        let uncertainty = self.uncertainty.max(1e-6);
        let z_score = prediction / uncertainty;
        let signal_to_noise = prediction.abs() / uncertainty;
        // Sigmoid-like map of SNR to [0, 1), inflecting around SNR = 2.
        let s = signal_to_noise / 2.0;
        let confidence = s / (1.0 + s);
        Prediction {
            prediction,
            uncertainty,
            confidence,
            z_score,
            signal_to_noise,
            horizon: HORIZON_BARS,
        }
    }
}

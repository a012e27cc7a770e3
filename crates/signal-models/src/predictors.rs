//! Per-symbol predictor adapters.
//!
//! The rotation engine consumes one [`Prediction`] per symbol per bar,
//! regardless of which model produced it. The EWRLS variant owns its
//! feature extractor and the queue of pending 2-bar outcomes; the
//! rule-based variants map their probability signals onto the same
//! record.

use std::collections::VecDeque;

use anyhow::Result;
use nalgebra::DVector;
use rotation_core::{Bar, Prediction};

use crate::features::FeatureExtractor;
use crate::horizon::{HorizonPredictor, HORIZON_BARS};
use crate::sigor::{SigorConfig, SigorSignal, SigorStrategy};
use crate::williams_rsi::{WilliamsRsiConfig, WilliamsRsiSignal, WilliamsRsiStrategy};

/// Probability deviation → expected-return scale for SIGOR signals
/// (0.5 deviation maps to a 5% move).
const SIGOR_PREDICTION_SCALE: f64 = 0.10;
/// Same mapping for Williams %R / RSI signals, slightly tighter.
const AWR_PREDICTION_SCALE: f64 = 0.08;

/// A per-symbol signal generator: learning (EWRLS) or rule-based
/// (SIGOR, Williams %R-RSI).
pub enum SymbolPredictor {
    Ewrls(EwrlsModel),
    Sigor(SigorModel),
    WilliamsRsi(AwrModel),
}

impl SymbolPredictor {
    pub fn ewrls(lambda: f64, use_regime_features: bool) -> Result<Self> {
        Ok(Self::Ewrls(EwrlsModel::new(lambda, use_regime_features)?))
    }

    pub fn sigor(config: SigorConfig) -> Self {
        Self::Sigor(SigorModel::new(config))
    }

    pub fn williams_rsi(config: WilliamsRsiConfig) -> Self {
        Self::WilliamsRsi(AwrModel::new(config))
    }

    /// Ingest the bar: update histories, learn realized returns, and
    /// refresh the cached prediction.
    pub fn on_bar(&mut self, bar: &Bar) {
        match self {
            Self::Ewrls(m) => m.on_bar(bar),
            Self::Sigor(m) => m.on_bar(bar),
            Self::WilliamsRsi(m) => m.on_bar(bar),
        }
    }

    /// Latest prediction; `None` until warmed up.
    pub fn prediction(&self) -> Option<Prediction> {
        match self {
            Self::Ewrls(m) => m.prediction(),
            Self::Sigor(m) => m.prediction(),
            Self::WilliamsRsi(m) => m.prediction(),
        }
    }

    pub fn is_warmed_up(&self) -> bool {
        match self {
            Self::Ewrls(m) => m.is_warmed_up(),
            Self::Sigor(m) => m.sigor.is_warmed_up(),
            Self::WilliamsRsi(m) => m.awr.is_warmed_up(),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Self::Ewrls(m) => m.reset(),
            Self::Sigor(m) => m.reset(),
            Self::WilliamsRsi(m) => m.reset(),
        }
    }
}

/// EWRLS pipeline: features → online regression at the 2-bar horizon.
pub struct EwrlsModel {
    extractor: FeatureExtractor,
    predictor: HorizonPredictor,
    /// Feature vectors awaiting their realized 2-bar return, paired
    /// with the close they were extracted at.
    pending: VecDeque<(DVector<f64>, f64)>,
    latest: Option<Prediction>,
}

impl EwrlsModel {
    pub fn new(lambda: f64, use_regime_features: bool) -> Result<Self> {
        let extractor = FeatureExtractor::with_regime(use_regime_features);
        let predictor = HorizonPredictor::new(extractor.num_features(), lambda)?;
        Ok(Self {
            extractor,
            predictor,
            pending: VecDeque::new(),
            latest: None,
        })
    }

    fn on_bar(&mut self, bar: &Bar) {
        let Some(features) = self.extractor.extract(bar) else {
            self.latest = None;
            return;
        };

        // The front of the queue was extracted HORIZON_BARS ago; its
        // outcome is now observable.
        if self.pending.len() == HORIZON_BARS as usize {
            if let Some((old_features, old_close)) = self.pending.pop_front() {
                if old_close.abs() > 1e-10 {
                    let realized = (bar.close - old_close) / old_close;
                    self.predictor.update(&old_features, realized);
                }
            }
        }

        let multi = self.predictor.predict_multi(&features);
        self.latest = Some(multi.pred_2bar);
        self.pending.push_back((features, bar.close));
    }

    fn prediction(&self) -> Option<Prediction> {
        self.latest
    }

    fn is_warmed_up(&self) -> bool {
        self.extractor.is_ready() && self.predictor.update_count() > 0
    }

    fn reset(&mut self) {
        self.extractor.reset();
        self.predictor.reset();
        self.pending.clear();
        self.latest = None;
    }
}

/// SIGOR ensemble adapter.
pub struct SigorModel {
    sigor: SigorStrategy,
    last_signal: Option<SigorSignal>,
}

impl SigorModel {
    pub fn new(config: SigorConfig) -> Self {
        Self {
            sigor: SigorStrategy::new(config),
            last_signal: None,
        }
    }

    fn on_bar(&mut self, bar: &Bar) {
        self.last_signal = Some(self.sigor.generate_signal(bar));
    }

    fn prediction(&self) -> Option<Prediction> {
        if !self.sigor.is_warmed_up() {
            return None;
        }
        let signal = self.last_signal.as_ref()?;
        Some(probability_to_prediction(
            signal.probability,
            signal.confidence,
            SIGOR_PREDICTION_SCALE,
            1,
        ))
    }

    pub fn last_signal(&self) -> Option<&SigorSignal> {
        self.last_signal.as_ref()
    }

    fn reset(&mut self) {
        self.sigor.reset();
        self.last_signal = None;
    }
}

/// Williams %R / RSI adapter.
pub struct AwrModel {
    awr: WilliamsRsiStrategy,
    last_signal: Option<WilliamsRsiSignal>,
}

impl AwrModel {
    pub fn new(config: WilliamsRsiConfig) -> Self {
        Self {
            awr: WilliamsRsiStrategy::new(config),
            last_signal: None,
        }
    }

    fn on_bar(&mut self, bar: &Bar) {
        self.last_signal = Some(self.awr.generate_signal(bar));
    }

    fn prediction(&self) -> Option<Prediction> {
        if !self.awr.is_warmed_up() {
            return None;
        }
        let signal = self.last_signal.as_ref()?;
        Some(probability_to_prediction(
            signal.probability,
            signal.confidence,
            AWR_PREDICTION_SCALE,
            2,
        ))
    }

    pub fn last_signal(&self) -> Option<&WilliamsRsiSignal> {
        self.last_signal.as_ref()
    }

    fn reset(&mut self) {
        self.awr.reset();
        self.last_signal = None;
    }
}

/// Map a probability around 0.5 to an expected-return prediction with
/// quality metrics derived from the signal confidence.
fn probability_to_prediction(
    probability: f64,
    confidence: f64,
    scale: f64,
    horizon: u32,
) -> Prediction {
    let prediction = (probability - 0.5) * scale;
    let uncertainty = 0.01 * (1.0 - confidence);
    let (z_score, signal_to_noise) = if uncertainty > 0.0 {
        (prediction / uncertainty, prediction.abs() / uncertainty)
    } else {
        (0.0, 0.0)
    };
    Prediction {
        prediction,
        uncertainty,
        confidence,
        z_score,
        signal_to_noise,
        horizon,
    }
}

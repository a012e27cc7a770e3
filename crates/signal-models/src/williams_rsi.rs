//! Williams %R / RSI anticipatory crossover strategy.
//!
//! Bullish setups form when Williams %R (rescaled to 0-100) crosses up
//! through RSI near the lower Bollinger band; bearish setups mirror at
//! the upper band. Signal strength decays from "crossing right now"
//! through "approaching" to "recently crossed".

use chrono::{DateTime, Utc};
use rotation_core::{math::clamp01, Bar, Symbol};
use serde::{Deserialize, Serialize};

const MAX_HISTORY: usize = 2048;
const CROSS_NONE: i32 = 999;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WilliamsRsiConfig {
    pub williams_period: usize,
    pub rsi_period: usize,
    pub bb_period: usize,
    pub bb_stddev: f64,

    /// Indicator-distance threshold (percentage points) for the
    /// "approaching" state.
    pub approach_threshold: f64,
    /// Bars after a cross during which it still counts as fresh.
    pub fresh_bars: i32,

    /// Price percentile below which the lower-band zone begins.
    pub lower_band_zone: f64,
    /// Price percentile above which the upper-band zone begins.
    pub upper_band_zone: f64,

    pub crossing_strength: f64,
    pub approaching_strength: f64,
    pub fresh_strength: f64,
}

impl Default for WilliamsRsiConfig {
    fn default() -> Self {
        Self {
            williams_period: 14,
            rsi_period: 14,
            bb_period: 20,
            bb_stddev: 2.0,
            approach_threshold: 5.0,
            fresh_bars: 3,
            lower_band_zone: 30.0,
            upper_band_zone: 70.0,
            crossing_strength: 1.0,
            approaching_strength: 0.7,
            fresh_strength: 0.7,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WilliamsRsiSignal {
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,

    /// Williams %R in its native [-100, 0] range.
    pub williams_r: f64,
    /// Wilder RSI in [0, 100].
    pub rsi: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    /// Close position inside the bands, 0-100.
    pub price_percentile: f64,

    pub is_crossing_up: bool,
    pub is_crossing_down: bool,
    pub is_approaching_up: bool,
    pub is_approaching_down: bool,
    pub is_fresh_cross_up: bool,
    pub is_fresh_cross_down: bool,

    pub probability: f64,
    pub confidence: f64,
    pub is_long: bool,
    pub is_short: bool,
    pub is_neutral: bool,
}

pub struct WilliamsRsiStrategy {
    config: WilliamsRsiConfig,

    closes: Vec<f64>,
    highs: Vec<f64>,
    lows: Vec<f64>,

    // Wilder RSI running state.
    avg_gain: f64,
    avg_loss: f64,
    rsi_initialized: bool,
    seed_gains: Vec<f64>,
    seed_losses: Vec<f64>,

    williams_history: Vec<f64>,
    rsi_history: Vec<f64>,
    bars_since_cross_up: i32,
    bars_since_cross_down: i32,

    bar_count: usize,
}

impl WilliamsRsiStrategy {
    pub fn new(config: WilliamsRsiConfig) -> Self {
        Self {
            config,
            closes: Vec::new(),
            highs: Vec::new(),
            lows: Vec::new(),
            avg_gain: 0.0,
            avg_loss: 0.0,
            rsi_initialized: false,
            seed_gains: Vec::new(),
            seed_losses: Vec::new(),
            williams_history: Vec::new(),
            rsi_history: Vec::new(),
            bars_since_cross_up: CROSS_NONE,
            bars_since_cross_down: CROSS_NONE,
            bar_count: 0,
        }
    }

    pub fn is_warmed_up(&self) -> bool {
        let longest = self
            .config
            .williams_period
            .max(self.config.rsi_period)
            .max(self.config.bb_period);
        self.bar_count >= longest + self.config.fresh_bars as usize
    }

    pub fn reset(&mut self) {
        self.closes.clear();
        self.highs.clear();
        self.lows.clear();
        self.avg_gain = 0.0;
        self.avg_loss = 0.0;
        self.rsi_initialized = false;
        self.seed_gains.clear();
        self.seed_losses.clear();
        self.williams_history.clear();
        self.rsi_history.clear();
        self.bars_since_cross_up = CROSS_NONE;
        self.bars_since_cross_down = CROSS_NONE;
        self.bar_count = 0;
    }

    pub fn generate_signal(&mut self, bar: &Bar) -> WilliamsRsiSignal {
        self.closes.push(bar.close);
        self.highs.push(bar.high);
        self.lows.push(bar.low);
        self.bar_count += 1;
        self.trim_history();

        let mut signal = WilliamsRsiSignal {
            timestamp: bar.timestamp,
            symbol: bar.symbol.clone(),
            ..Default::default()
        };

        signal.williams_r = self.williams_r(self.config.williams_period);
        signal.rsi = self.wilder_rsi();
        let (upper, middle, lower) = self.bollinger(self.config.bb_period, self.config.bb_stddev);
        signal.bb_upper = upper;
        signal.bb_middle = middle;
        signal.bb_lower = lower;
        signal.price_percentile = Self::price_percentile(bar.close, lower, upper);

        // Williams %R rescaled from [-100, 0] onto the RSI's 0-100 axis.
        let williams_scaled = signal.williams_r + 100.0;
        self.williams_history.push(williams_scaled);
        self.rsi_history.push(signal.rsi);
        if self.williams_history.len() > MAX_HISTORY {
            let excess = self.williams_history.len() - MAX_HISTORY;
            self.williams_history.drain(..excess);
            self.rsi_history.drain(..excess);
        }

        self.detect_crossovers(&mut signal);

        // Fresh means the cross happened within the last `fresh_bars`
        // bars, judged before this bar's counters are advanced.
        signal.is_fresh_cross_up = self.bars_since_cross_up > 0
            && self.bars_since_cross_up <= self.config.fresh_bars;
        signal.is_fresh_cross_down = self.bars_since_cross_down > 0
            && self.bars_since_cross_down <= self.config.fresh_bars;

        let fresh_up_age = self.bars_since_cross_up;
        let fresh_down_age = self.bars_since_cross_down;

        if signal.is_crossing_up {
            self.bars_since_cross_up = 1;
            self.bars_since_cross_down = CROSS_NONE;
        } else if signal.is_crossing_down {
            self.bars_since_cross_down = 1;
            self.bars_since_cross_up = CROSS_NONE;
        } else {
            if self.bars_since_cross_up < CROSS_NONE {
                self.bars_since_cross_up += 1;
            }
            if self.bars_since_cross_down < CROSS_NONE {
                self.bars_since_cross_down += 1;
            }
        }

        let (probability, confidence) =
            self.probability_and_confidence(&signal, fresh_up_age, fresh_down_age);
        signal.probability = probability;
        signal.confidence = confidence;
        signal.is_long = probability > 0.52;
        signal.is_short = probability < 0.48;
        signal.is_neutral = !signal.is_long && !signal.is_short;

        signal
    }

    fn trim_history(&mut self) {
        let trim = |v: &mut Vec<f64>| {
            if v.len() > MAX_HISTORY {
                v.drain(..v.len() - MAX_HISTORY);
            }
        };
        trim(&mut self.closes);
        trim(&mut self.highs);
        trim(&mut self.lows);
    }

    /// Williams %R over the last `period` bars, in [-100, 0].
    fn williams_r(&self, period: usize) -> f64 {
        let n = self.closes.len();
        if n == 0 {
            return -50.0;
        }
        let window = n.min(period);
        let hh = self.highs[n - window..]
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let ll = self.lows[n - window..]
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min);
        let range = hh - ll;
        if range.abs() < 1e-10 {
            return -50.0;
        }
        -100.0 * (hh - self.closes[n - 1]) / range
    }

    /// Wilder RSI with EMA smoothing seeded by the SMA of the first
    /// `rsi_period` gains/losses.
    fn wilder_rsi(&mut self) -> f64 {
        let n = self.closes.len();
        if n < 2 {
            return 50.0;
        }
        let delta = self.closes[n - 1] - self.closes[n - 2];
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        let period = self.config.rsi_period as f64;

        if !self.rsi_initialized {
            self.seed_gains.push(gain);
            self.seed_losses.push(loss);
            if self.seed_gains.len() < self.config.rsi_period {
                return 50.0;
            }
            self.avg_gain = self.seed_gains.iter().sum::<f64>() / period;
            self.avg_loss = self.seed_losses.iter().sum::<f64>() / period;
            self.rsi_initialized = true;
        } else {
            self.avg_gain = (self.avg_gain * (period - 1.0) + gain) / period;
            self.avg_loss = (self.avg_loss * (period - 1.0) + loss) / period;
        }

        if self.avg_gain < 1e-10 && self.avg_loss < 1e-10 {
            return 50.0;
        }
        if self.avg_loss < 1e-10 {
            return 100.0;
        }
        let rs = self.avg_gain / self.avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }

    fn bollinger(&self, period: usize, num_sd: f64) -> (f64, f64, f64) {
        let n = self.closes.len();
        if n == 0 {
            return (0.0, 0.0, 0.0);
        }
        let window = n.min(period);
        let slice = &self.closes[n - window..];
        let mean = slice.iter().sum::<f64>() / window as f64;
        let var = slice.iter().map(|c| (c - mean) * (c - mean)).sum::<f64>() / window as f64;
        let sd = var.sqrt();
        (mean + num_sd * sd, mean, mean - num_sd * sd)
    }

    fn price_percentile(price: f64, lower: f64, upper: f64) -> f64 {
        let range = upper - lower;
        if range.abs() < 1e-10 {
            return 50.0;
        }
        (100.0 * (price - lower) / range).clamp(0.0, 100.0)
    }

    fn detect_crossovers(&self, signal: &mut WilliamsRsiSignal) {
        let n = self.williams_history.len();
        if n < 2 {
            return;
        }
        let w = self.williams_history[n - 1];
        let r = self.rsi_history[n - 1];
        let prev_w = self.williams_history[n - 2];
        let prev_r = self.rsi_history[n - 2];

        signal.is_crossing_up = prev_w <= prev_r && w > r;
        signal.is_crossing_down = prev_w >= prev_r && w < r;

        // Approaching: still on the wrong side but converging inside
        // the threshold.
        let dist = (w - r).abs();
        let prev_dist = (prev_w - prev_r).abs();
        let converging = dist < prev_dist && dist < self.config.approach_threshold;
        signal.is_approaching_up = !signal.is_crossing_up && w < r && converging;
        signal.is_approaching_down = !signal.is_crossing_down && w > r && converging;
    }

    fn probability_and_confidence(
        &self,
        signal: &WilliamsRsiSignal,
        fresh_up_age: i32,
        fresh_down_age: i32,
    ) -> (f64, f64) {
        let cfg = &self.config;

        let bullish_strength = if signal.is_crossing_up {
            cfg.crossing_strength
        } else if signal.is_approaching_up {
            cfg.approaching_strength
        } else if signal.is_fresh_cross_up {
            cfg.fresh_strength * (1.0 - fresh_up_age as f64 / cfg.fresh_bars as f64)
        } else {
            0.0
        };

        let bearish_strength = if signal.is_crossing_down {
            cfg.crossing_strength
        } else if signal.is_approaching_down {
            cfg.approaching_strength
        } else if signal.is_fresh_cross_down {
            cfg.fresh_strength * (1.0 - fresh_down_age as f64 / cfg.fresh_bars as f64)
        } else {
            0.0
        };

        // Band proximity ramps: 1.0 at the band, 0.0 at the zone edge.
        let lower_proximity = if cfg.lower_band_zone > 1e-10 {
            clamp01((cfg.lower_band_zone - signal.price_percentile) / cfg.lower_band_zone)
        } else {
            0.0
        };
        let upper_span = 100.0 - cfg.upper_band_zone;
        let upper_proximity = if upper_span > 1e-10 {
            clamp01((signal.price_percentile - cfg.upper_band_zone) / upper_span)
        } else {
            0.0
        };

        let bullish = bullish_strength * lower_proximity;
        let bearish = bearish_strength * upper_proximity;

        let probability = clamp01(0.5 + 0.3 * bullish - 0.3 * bearish);
        let confidence = clamp01(0.4 + 0.6 * bullish.max(bearish));
        (probability, confidence)
    }
}

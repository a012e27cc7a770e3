//! SIGOR: a seven-detector rule ensemble fused in log-odds space.
//!
//! Each detector maps the current bar plus a bounded history to a
//! probability in [0, 1] (0.5 = neutral). The weighted mean of detector
//! log-odds is squashed back through a sharpness-k sigmoid to produce
//! the ensemble probability.

use chrono::{DateTime, Utc};
use rotation_core::{math::clamp01, Bar, Symbol};
use serde::{Deserialize, Serialize};

/// History cap for all internal series.
const MAX_HISTORY: usize = 2048;

/// Detector probabilities are clamped before the logit so a single
/// saturated detector cannot dominate the weighted fusion.
const LOGIT_EPS: f64 = 0.01;
const MS_PER_DAY: i64 = 86_400_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigorConfig {
    /// Sharpness of the log-odds fusion sigmoid.
    pub k: f64,

    // Detector weights (reliability).
    pub w_boll: f64,
    pub w_rsi: f64,
    pub w_mom: f64,
    pub w_vwap: f64,
    pub w_orb: f64,
    pub w_ofi: f64,
    pub w_vol: f64,

    // Window parameters.
    pub win_boll: usize,
    pub win_rsi: usize,
    pub win_mom: usize,
    pub win_vwap: usize,
    pub orb_opening_bars: usize,
    pub vol_window: usize,

    /// Bars before the first actionable signal.
    pub warmup_bars: usize,
}

impl Default for SigorConfig {
    fn default() -> Self {
        Self {
            k: 1.5,
            w_boll: 1.0,
            w_rsi: 1.0,
            w_mom: 1.0,
            w_vwap: 1.0,
            w_orb: 0.5,
            w_ofi: 0.5,
            w_vol: 0.5,
            win_boll: 20,
            win_rsi: 14,
            win_mom: 10,
            win_vwap: 20,
            orb_opening_bars: 30,
            vol_window: 20,
            warmup_bars: 50,
        }
    }
}

/// Ensemble output with the per-detector breakdown kept for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigorSignal {
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,
    /// Fused probability in [0, 1]; 0.5 is neutral.
    pub probability: f64,
    /// Detector agreement in [0, 1].
    pub confidence: f64,
    pub is_long: bool,
    pub is_short: bool,
    pub is_neutral: bool,

    pub prob_boll: f64,
    pub prob_rsi: f64,
    pub prob_mom: f64,
    pub prob_vwap: f64,
    pub prob_orb: f64,
    pub prob_ofi: f64,
    pub prob_vol: f64,
}

pub struct SigorStrategy {
    config: SigorConfig,

    closes: Vec<f64>,
    highs: Vec<f64>,
    lows: Vec<f64>,
    volumes: Vec<f64>,
    timestamps: Vec<i64>,
    gains: Vec<f64>,
    losses: Vec<f64>,

    bar_count: usize,
}

impl SigorStrategy {
    pub fn new(config: SigorConfig) -> Self {
        Self {
            config,
            closes: Vec::new(),
            highs: Vec::new(),
            lows: Vec::new(),
            volumes: Vec::new(),
            timestamps: Vec::new(),
            gains: Vec::new(),
            losses: Vec::new(),
            bar_count: 0,
        }
    }

    pub fn is_warmed_up(&self) -> bool {
        self.bar_count >= self.config.warmup_bars
    }

    pub fn reset(&mut self) {
        self.closes.clear();
        self.highs.clear();
        self.lows.clear();
        self.volumes.clear();
        self.timestamps.clear();
        self.gains.clear();
        self.losses.clear();
        self.bar_count = 0;
    }

    /// Ingest a bar and produce the fused signal.
    pub fn generate_signal(&mut self, bar: &Bar) -> SigorSignal {
        self.closes.push(bar.close);
        self.highs.push(bar.high);
        self.lows.push(bar.low);
        self.volumes.push(bar.volume as f64);
        self.timestamps.push(bar.timestamp_ms());

        if self.closes.len() > 1 {
            let delta = bar.close - self.closes[self.closes.len() - 2];
            self.gains.push(delta.max(0.0));
            self.losses.push((-delta).max(0.0));
        } else {
            self.gains.push(0.0);
            self.losses.push(0.0);
        }

        self.bar_count += 1;
        self.trim_history();

        let p1 = self.prob_bollinger(bar);
        let p2 = self.prob_rsi();
        let p3 = self.prob_momentum(self.config.win_mom, 50.0);
        let p4 = self.prob_vwap_reversion(self.config.win_vwap);
        let p5 = self.prob_orb_daily(self.config.orb_opening_bars);
        let p6 = self.prob_ofi_proxy(bar);
        let p7 = self.prob_volume_surge(self.config.vol_window, p3);

        let probs = [p1, p2, p3, p4, p5, p6, p7];
        let probability = self.fuse(&probs);
        let confidence = Self::agreement_confidence(&probs);

        let is_long = probability > 0.52;
        let is_short = probability < 0.48;

        SigorSignal {
            timestamp: bar.timestamp,
            symbol: bar.symbol.clone(),
            probability,
            confidence,
            is_long,
            is_short,
            is_neutral: !is_long && !is_short,
            prob_boll: p1,
            prob_rsi: p2,
            prob_mom: p3,
            prob_vwap: p4,
            prob_orb: p5,
            prob_ofi: p6,
            prob_vol: p7,
        }
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
        trim(&mut self.volumes);
        trim(&mut self.gains);
        trim(&mut self.losses);
        if self.timestamps.len() > MAX_HISTORY {
            let excess = self.timestamps.len() - MAX_HISTORY;
            self.timestamps.drain(..excess);
        }
    }

    /// Bollinger z-score, long when stretched above the mean.
    fn prob_bollinger(&self, bar: &Bar) -> f64 {
        let window = self.config.win_boll;
        if self.closes.len() < window {
            return 0.5;
        }
        let slice = &self.closes[self.closes.len() - window..];
        let mean = slice.iter().sum::<f64>() / window as f64;
        let var = slice.iter().map(|c| (c - mean) * (c - mean)).sum::<f64>() / window as f64;
        let sd = var.sqrt();
        if sd < 1e-10 {
            return 0.5;
        }
        let z = (bar.close - mean) / sd;
        clamp01(0.5 + 0.5 * (z / 2.0).tanh())
    }

    /// RSI(14) from the running gain/loss series.
    fn prob_rsi(&self) -> f64 {
        let window = self.config.win_rsi;
        if self.gains.len() < window + 1 {
            return 0.5;
        }
        let avg_gain =
            self.gains[self.gains.len() - window..].iter().sum::<f64>() / window as f64;
        let avg_loss =
            self.losses[self.losses.len() - window..].iter().sum::<f64>() / window as f64;
        // A window with no movement at all is neutral, not overbought.
        let rsi = if avg_gain < 1e-10 && avg_loss < 1e-10 {
            50.0
        } else if avg_loss < 1e-10 {
            100.0
        } else {
            let rs = avg_gain / avg_loss;
            100.0 - 100.0 / (1.0 + rs)
        };
        clamp01((rsi - 50.0) / 100.0 + 0.5)
    }

    fn prob_momentum(&self, window: usize, scale: f64) -> f64 {
        let n = self.closes.len();
        if n <= window {
            return 0.5;
        }
        let past = self.closes[n - 1 - window];
        if past.abs() < 1e-10 {
            return 0.5;
        }
        let ret = (self.closes[n - 1] - past) / past;
        clamp01(0.5 + 0.5 * (scale * ret).tanh())
    }

    /// Typical-price VWAP reversion: stretched above VWAP leans short.
    fn prob_vwap_reversion(&self, window: usize) -> f64 {
        let n = self.closes.len();
        if n < window {
            return 0.5;
        }
        let mut pv = 0.0;
        let mut vol = 0.0;
        for i in n - window..n {
            let typical = (self.highs[i] + self.lows[i] + self.closes[i]) / 3.0;
            pv += typical * self.volumes[i];
            vol += self.volumes[i];
        }
        if vol < 1e-10 {
            return 0.5;
        }
        let vwap = pv / vol;
        if vwap.abs() < 1e-10 {
            return 0.5;
        }
        let z = (self.closes[n - 1] - vwap) / vwap.abs();
        clamp01(0.5 - 0.5 * z.tanh())
    }

    /// Opening-range breakout against the first bars of the current day.
    fn prob_orb_daily(&self, opening_bars: usize) -> f64 {
        let n = self.timestamps.len();
        if n == 0 || opening_bars == 0 {
            return 0.5;
        }
        let today = self.timestamps[n - 1] / MS_PER_DAY;
        let day_start = self
            .timestamps
            .iter()
            .position(|ts| ts / MS_PER_DAY == today)
            .unwrap_or(n - 1);
        let day_len = n - day_start;
        if day_len <= opening_bars {
            // Still inside the opening range.
            return 0.5;
        }
        let or_end = day_start + opening_bars;
        let or_high = self.highs[day_start..or_end]
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let or_low = self.lows[day_start..or_end]
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min);
        let close = self.closes[n - 1];
        if close > or_high {
            0.7
        } else if close < or_low {
            0.3
        } else {
            0.5
        }
    }

    /// Order-flow imbalance proxy from the candle body and volume.
    fn prob_ofi_proxy(&self, bar: &Bar) -> f64 {
        let range = bar.high - bar.low;
        if range.abs() < 1e-10 {
            return 0.5;
        }
        let imbalance = (bar.close - bar.open) / range;
        let volume_weight = (bar.volume as f64 / 1e6).tanh();
        clamp01(0.5 + 0.25 * imbalance * volume_weight)
    }

    /// Volume surge aligned with the momentum detector's direction.
    fn prob_volume_surge(&self, window: usize, momentum_prob: f64) -> f64 {
        let n = self.volumes.len();
        if n < window {
            return 0.5;
        }
        let avg = self.volumes[n - window..].iter().sum::<f64>() / window as f64;
        if avg < 1e-10 {
            return 0.5;
        }
        let ratio = self.volumes[n - 1] / avg;
        let adjust = (ratio - 1.0).tanh();
        let direction = if momentum_prob > 0.5 {
            1.0
        } else if momentum_prob < 0.5 {
            -1.0
        } else {
            0.0
        };
        clamp01(0.5 + 0.25 * adjust * direction)
    }

    /// Weighted mean of detector log-odds squashed through a sharpness-k
    /// sigmoid.
    fn fuse(&self, probs: &[f64; 7]) -> f64 {
        let weights = [
            self.config.w_boll,
            self.config.w_rsi,
            self.config.w_mom,
            self.config.w_vwap,
            self.config.w_orb,
            self.config.w_ofi,
            self.config.w_vol,
        ];
        let weight_sum: f64 = weights.iter().sum();
        if weight_sum < 1e-10 {
            return 0.5;
        }
        let mut log_odds = 0.0;
        for (p, w) in probs.iter().zip(weights.iter()) {
            let clamped = p.clamp(LOGIT_EPS, 1.0 - LOGIT_EPS);
            log_odds += w * (clamped / (1.0 - clamped)).ln();
        }
        log_odds /= weight_sum;
        1.0 / (1.0 + (-self.config.k * log_odds).exp())
    }

    /// Confidence from detector vote agreement and the strongest single
    /// detector deviation.
    fn agreement_confidence(probs: &[f64; 7]) -> f64 {
        let long_votes = probs.iter().filter(|p| **p > 0.5).count() as f64;
        let short_votes = probs.iter().filter(|p| **p < 0.5).count() as f64;
        let agreement = long_votes.max(short_votes) / 7.0;
        let max_deviation = probs
            .iter()
            .map(|p| (p - 0.5).abs())
            .fold(0.0_f64, f64::max);
        clamp01(0.4 + 0.6 * agreement.max(max_deviation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar_at(minute: usize, open: f64, high: f64, low: f64, close: f64, volume: i64) -> Bar {
        let ts = 1_704_724_200_000_i64 + (minute as i64) * 60_000;
        Bar::new(ts, "TQQQ", open, high, low, close, volume)
    }

    fn flat_bar(minute: usize) -> Bar {
        bar_at(minute, 100.0, 100.0, 100.0, 100.0, 1_000_000)
    }

    #[test]
    fn warmup_gates_signal() {
        let mut sigor = SigorStrategy::new(SigorConfig::default());
        for i in 0..49 {
            sigor.generate_signal(&flat_bar(i));
            assert!(!sigor.is_warmed_up());
        }
        sigor.generate_signal(&flat_bar(49));
        assert!(sigor.is_warmed_up());
    }

    #[test]
    fn flat_series_is_neutral() {
        let mut sigor = SigorStrategy::new(SigorConfig::default());
        let mut signal = None;
        for i in 0..60 {
            signal = Some(sigor.generate_signal(&flat_bar(i)));
        }
        let signal = signal.unwrap();
        assert!(signal.is_neutral);
        assert!((signal.probability - 0.5).abs() < 0.02);
        assert_eq!(signal.prob_boll, 0.5);
        assert_eq!(signal.prob_vwap, 0.5);
    }

    #[test]
    fn breakout_drives_long_signal() {
        let mut sigor = SigorStrategy::new(SigorConfig::default());
        for i in 0..50 {
            sigor.generate_signal(&flat_bar(i));
        }
        // A run of strong up-bars on surging volume pushes Bollinger z,
        // RSI, momentum, and OFI all long.
        let mut signal = None;
        for i in 0..5 {
            let close = 101.0 + i as f64 * 1.5;
            signal = Some(sigor.generate_signal(&bar_at(
                50 + i,
                close - 1.0,
                close + 0.2,
                close - 1.2,
                close,
                3_000_000,
            )));
        }
        let signal = signal.unwrap();
        assert!(signal.is_long, "probability was {}", signal.probability);
        assert!(signal.probability > 0.52);
        assert!(signal.prob_boll > 0.6);
        assert!(signal.prob_rsi > 0.5);
        assert!(signal.prob_mom > 0.6);
        assert!(signal.confidence >= 0.4);
    }

    #[test]
    fn selloff_drives_short_signal() {
        let mut sigor = SigorStrategy::new(SigorConfig::default());
        for i in 0..50 {
            sigor.generate_signal(&flat_bar(i));
        }
        let mut signal = None;
        for i in 0..5 {
            let close = 99.0 - i as f64 * 1.5;
            signal = Some(sigor.generate_signal(&bar_at(
                50 + i,
                close + 1.0,
                close + 1.2,
                close - 0.2,
                close,
                3_000_000,
            )));
        }
        let signal = signal.unwrap();
        assert!(signal.is_short, "probability was {}", signal.probability);
    }

    #[test]
    fn orb_detector_follows_opening_range() {
        let config = SigorConfig {
            orb_opening_bars: 5,
            ..SigorConfig::default()
        };
        let mut sigor = SigorStrategy::new(config);
        // Opening range 99..101.
        for i in 0..5 {
            sigor.generate_signal(&bar_at(i, 100.0, 101.0, 99.0, 100.0, 1_000_000));
        }
        // Inside the range: neutral ORB vote.
        let inside = sigor.generate_signal(&bar_at(5, 100.0, 100.5, 99.5, 100.2, 1_000_000));
        assert_eq!(inside.prob_orb, 0.5);
        // Break above the range high.
        let above = sigor.generate_signal(&bar_at(6, 101.0, 102.5, 100.8, 102.0, 1_000_000));
        assert_eq!(above.prob_orb, 0.7);
        // Break below the range low.
        let below = sigor.generate_signal(&bar_at(7, 99.0, 99.2, 97.5, 98.0, 1_000_000));
        assert_eq!(below.prob_orb, 0.3);
    }

    #[test]
    fn reset_reproduces_identical_signals() {
        let mut sigor = SigorStrategy::new(SigorConfig::default());
        let feed = |s: &mut SigorStrategy| {
            s.reset();
            let mut last = None;
            for i in 0..60 {
                let close = 100.0 + (i as f64 * 0.3).sin();
                last = Some(s.generate_signal(&bar_at(
                    i,
                    close - 0.1,
                    close + 0.2,
                    close - 0.2,
                    close,
                    1_000_000,
                )));
            }
            last.unwrap()
        };
        let a = feed(&mut sigor);
        let b = feed(&mut sigor);
        assert_eq!(a.probability.to_bits(), b.probability.to_bits());
        assert_eq!(a.confidence.to_bits(), b.confidence.to_bits());
    }

    #[test]
    fn history_is_bounded() {
        let mut sigor = SigorStrategy::new(SigorConfig::default());
        for i in 0..(MAX_HISTORY + 200) {
            sigor.generate_signal(&flat_bar(i));
        }
        assert!(sigor.closes.len() <= MAX_HISTORY);
        assert!(sigor.timestamps.len() <= MAX_HISTORY);
        assert_eq!(sigor.bar_count, MAX_HISTORY + 200);
    }
}

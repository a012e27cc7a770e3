//! Technical + time feature extraction over a 50-bar window.
//!
//! Produces the fixed-order feature vector consumed by the EWRLS
//! predictor. Position order is part of the contract: the linear model
//! addresses features by index, so the layout below must not be
//! reordered.
//!
//! Layout (63 base features, positions 0-62):
//! -  0-7   cyclical time (sin/cos of hour, minute, day-of-week, day-of-month)
//! -  8-11  raw close, open, high, low
//! - 12-14  SMA 10/20/50
//! - 15-17  EMA 10/20/50 (SMA-seeded)
//! - 18-21  Bollinger(20, 2): mean, upper, lower, sigma
//! - 22     absolute-dollar ATR(14)
//! - 23-24  raw volume, OBV approximation
//! - 25-28  range, body, upper wick, lower wick
//! - 29-32  momentum over 1/3/5/10 bars
//! - 33-35  realized vol 10/20, ATR(14)/close
//! - 36-37  volume surge, relative volume
//! - 38-40  price position in 50/20/10-bar range
//! - 41-43  RSI-like ratio, directional momentum 10/20
//! - 44-48  interaction products
//! - 49-51  momentum accelerations, vol change
//! - 52     log(1 + |momentum_10|)
//! - 53-55  MA deviation 5/10/20
//! - 56-61  Bollinger-derived ratios
//! - 62     bias (1.0)
//!
//! With regime features enabled, 12 more land at positions 63-74.

use chrono::{Datelike, Timelike};
use nalgebra::DVector;
use rotation_core::{math, Bar, RingBuffer};

use crate::regime::{RegimeFeatures, NUM_REGIME_FEATURES};

/// Bars required before the first feature vector is produced.
pub const LOOKBACK: usize = 50;
/// Base feature count without regime features.
pub const BASE_FEATURES: usize = 63;
/// Feature count with regime features appended.
pub const FULL_FEATURES: usize = BASE_FEATURES + NUM_REGIME_FEATURES;

const EPS: f64 = 1e-10;

struct Bollinger {
    mean: f64,
    upper: f64,
    lower: f64,
    sd: f64,
    percent_b: f64,
    bandwidth: f64,
}

/// Streaming feature extractor with a fixed 50-bar lookback.
///
/// `extract` returns `None` until the window is full, and thereafter a
/// dense vector of [`BASE_FEATURES`] (or [`FULL_FEATURES`]) values.
pub struct FeatureExtractor {
    history: RingBuffer<Bar>,
    bar_count: usize,
    regime: Option<RegimeFeatures>,
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self::with_regime(false)
    }

    pub fn with_regime(enable_regime: bool) -> Self {
        Self {
            history: RingBuffer::with_capacity(LOOKBACK),
            bar_count: 0,
            regime: enable_regime.then(RegimeFeatures::new),
        }
    }

    /// Number of features this extractor emits.
    pub fn num_features(&self) -> usize {
        if self.regime.is_some() {
            FULL_FEATURES
        } else {
            BASE_FEATURES
        }
    }

    pub fn is_ready(&self) -> bool {
        self.bar_count >= LOOKBACK
    }

    pub fn bar_count(&self) -> usize {
        self.bar_count
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.bar_count = 0;
        if let Some(regime) = self.regime.as_mut() {
            regime.reset();
        }
    }

    /// Append a bar and extract the feature vector.
    ///
    /// Returns `None` during warmup and whenever any computed feature
    /// is non-finite.
    pub fn extract(&mut self, bar: &Bar) -> Option<DVector<f64>> {
        self.history.push(bar.clone());
        self.bar_count += 1;

        if !self.is_ready() {
            return None;
        }

        let bars = self.history.to_vec();
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume as f64).collect();

        let mut features = Vec::with_capacity(self.num_features());

        // 0-7: cyclical time encoding, UTC broken-down time.
        let t = bar.timestamp;
        let two_pi = 2.0 * std::f64::consts::PI;
        let hour = t.hour() as f64;
        let minute = t.minute() as f64;
        let dow = t.weekday().num_days_from_sunday() as f64;
        let dom = t.day() as f64;
        features.push((two_pi * hour / 24.0).sin());
        features.push((two_pi * hour / 24.0).cos());
        features.push((two_pi * minute / 60.0).sin());
        features.push((two_pi * minute / 60.0).cos());
        features.push((two_pi * dow / 7.0).sin());
        features.push((two_pi * dow / 7.0).cos());
        features.push((two_pi * dom / 31.0).sin());
        features.push((two_pi * dom / 31.0).cos());

        // 8-11: raw OHLC.
        features.push(bar.close);
        features.push(bar.open);
        features.push(bar.high);
        features.push(bar.low);

        // 12-17: moving averages, absolute.
        features.push(sma(&closes, 10));
        features.push(sma(&closes, 20));
        features.push(sma(&closes, 50));
        features.push(ema(&closes, 10));
        features.push(ema(&closes, 20));
        features.push(ema(&closes, 50));

        // 18-21: raw Bollinger(20, 2).
        let bb = bollinger(&closes, 20, 2.0);
        features.push(bb.mean);
        features.push(bb.upper);
        features.push(bb.lower);
        features.push(bb.sd);

        // 22: ATR(14) denormalized back to dollars.
        let atr_norm = atr(&bars, 14);
        features.push(atr_norm * bar.close);

        // 23-24: raw volume and OBV approximation.
        features.push(bar.volume as f64);
        features.push(obv_approx(&bars));

        // 25-28: candle geometry.
        features.push(bar.high - bar.low);
        features.push(bar.close - bar.open);
        features.push(bar.high - bar.close);
        features.push(bar.close - bar.low);

        // 29-32: momentum.
        let mom_1 = momentum(&closes, 1);
        let mom_3 = momentum(&closes, 3);
        let mom_5 = momentum(&closes, 5);
        let mom_10 = momentum(&closes, 10);
        features.push(mom_1);
        features.push(mom_3);
        features.push(mom_5);
        features.push(mom_10);

        // 33-35: volatility.
        let vol_10 = volatility(&closes, 10);
        let vol_20 = volatility(&closes, 20);
        features.push(vol_10);
        features.push(vol_20);
        features.push(atr_norm);

        // 36-37: volume behavior.
        let surge = volume_surge(&volumes);
        features.push(surge);
        features.push(relative_volume(&volumes, 20));

        // 38-40: price position in range.
        let price_pos = channel_position(&bars, 50);
        features.push(price_pos);
        features.push(channel_position(&bars, 20));
        features.push(channel_position(&bars, 10));

        // 41-43: trend strength.
        let rsi = rsi_like(&closes, 14);
        let dir_mom_10 = directional_momentum(&closes, 10);
        features.push(rsi);
        features.push(dir_mom_10);
        features.push(directional_momentum(&closes, 20));

        // 44-48: interaction products.
        features.push(mom_1 * vol_10);
        features.push(mom_5 * vol_10);
        features.push(mom_10 * surge);
        features.push(rsi * vol_10);
        features.push(price_pos * dir_mom_10);

        // 49-51: accelerations and vol change.
        features.push(momentum(&closes, 2) - mom_5);
        features.push(mom_5 - mom_10);
        features.push(vol_10 - vol_20);

        // 52: log-scaled 10-bar momentum.
        features.push((1.0 + mom_10.abs()).ln());

        // 53-55: mean-reversion deviations from moving averages.
        features.push(ma_deviation(&closes, 5));
        features.push(ma_deviation(&closes, 10));
        features.push(ma_deviation(&closes, 20));

        // 56-61: Bollinger-derived ratios.
        let c = bar.close;
        if c.abs() > EPS {
            features.push((c - bb.mean) / c);
            features.push(bb.sd / c);
            features.push((c - bb.upper) / c);
            features.push((c - bb.lower) / c);
        } else {
            features.push(0.0);
            features.push(0.0);
            features.push(0.0);
            features.push(0.0);
        }
        features.push(bb.percent_b);
        features.push(bb.bandwidth);

        // 62: bias.
        features.push(1.0);

        // 63-74: optional regime features.
        if let Some(regime) = self.regime.as_mut() {
            let rf = regime.extract(&bars);
            features.extend(rf.iter());
        }

        if features.iter().any(|v| !v.is_finite()) {
            return None;
        }

        Some(DVector::from_vec(features))
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn sma(prices: &[f64], period: usize) -> f64 {
    let n = prices.len();
    if period == 0 || n < period {
        return math::mean(prices);
    }
    math::mean(&prices[n - period..])
}

fn ema(prices: &[f64], period: usize) -> f64 {
    let n = prices.len();
    if period == 0 || n == 0 {
        return 0.0;
    }
    if n < period {
        return math::mean(prices);
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    // Seed with the SMA over the first `period` values.
    let mut value = math::mean(&prices[..period]);
    for price in &prices[period..] {
        value = alpha * price + (1.0 - alpha) * value;
    }
    value
}

fn bollinger(prices: &[f64], period: usize, num_sd: f64) -> Bollinger {
    let n = prices.len();
    let window = if n < period { prices } else { &prices[n - period..] };
    let mean = math::mean(window);
    let sd = math::stddev_pop(window);
    let upper = mean + num_sd * sd;
    let lower = mean - num_sd * sd;
    let current = prices.last().copied().unwrap_or(0.0);

    let band_range = upper - lower;
    let percent_b = if band_range.abs() > EPS {
        (current - lower) / band_range
    } else {
        0.5
    };
    let bandwidth = if mean.abs() > EPS { band_range / mean } else { 0.0 };

    Bollinger {
        mean,
        upper,
        lower,
        sd,
        percent_b,
        bandwidth,
    }
}

/// Average true range over the last `period` bars, normalized by the
/// current close.
fn atr(bars: &[Bar], period: usize) -> f64 {
    let n = bars.len();
    if n < 2 || period > n {
        return 0.0;
    }
    let start = n - period;
    let mut true_ranges = Vec::with_capacity(period);
    for i in start..n {
        let high_low = bars[i].high - bars[i].low;
        let (high_close, low_close) = if i > 0 {
            (
                (bars[i].high - bars[i - 1].close).abs(),
                (bars[i].low - bars[i - 1].close).abs(),
            )
        } else {
            (0.0, 0.0)
        };
        true_ranges.push(high_low.max(high_close).max(low_close));
    }
    let current = bars[n - 1].close;
    if current.abs() < EPS {
        return 0.0;
    }
    math::mean(&true_ranges) / current
}

/// Signed cumulative volume over the window, an on-balance-volume
/// approximation.
fn obv_approx(bars: &[Bar]) -> f64 {
    let mut obv = 0.0;
    for i in 1..bars.len() {
        let delta = bars[i].close - bars[i - 1].close;
        if delta > 0.0 {
            obv += bars[i].volume as f64;
        } else if delta < 0.0 {
            obv -= bars[i].volume as f64;
        }
    }
    obv
}

fn momentum(prices: &[f64], period: usize) -> f64 {
    let n = prices.len();
    if n <= period {
        return 0.0;
    }
    let current = prices[n - 1];
    let past = prices[n - 1 - period];
    if past.abs() < EPS {
        return 0.0;
    }
    (current - past) / past
}

/// Standard deviation of bar-to-bar percent returns within the last
/// `period` prices.
fn volatility(prices: &[f64], period: usize) -> f64 {
    let n = prices.len();
    if n < 2 || period > n {
        return 0.0;
    }
    let start = n - period;
    let mut returns = Vec::with_capacity(period);
    for i in start + 1..n {
        if prices[i - 1].abs() > EPS {
            returns.push((prices[i] - prices[i - 1]) / prices[i - 1]);
        }
    }
    math::stddev(&returns)
}

/// Mean of the last 5 volumes over the full-window mean.
fn volume_surge(volumes: &[f64]) -> f64 {
    if volumes.is_empty() {
        return 1.0;
    }
    let n = volumes.len();
    let recent = n.min(5);
    let recent_avg = math::mean(&volumes[n - recent..]);
    let total_avg = math::mean(volumes);
    if total_avg.abs() < EPS {
        return 1.0;
    }
    recent_avg / total_avg
}

/// Deviation of the current volume from its `period`-bar average.
fn relative_volume(volumes: &[f64], period: usize) -> f64 {
    let n = volumes.len();
    if n == 0 {
        return 0.0;
    }
    let window = n.min(period);
    let avg = math::mean(&volumes[n - window..]);
    if avg.abs() < EPS {
        return 0.0;
    }
    (volumes[n - 1] - avg) / avg
}

/// Close position within the high/low range of the last `period` bars,
/// in [0, 1]; 0.5 for a degenerate range.
fn channel_position(bars: &[Bar], period: usize) -> f64 {
    let n = bars.len();
    if n == 0 {
        return 0.5;
    }
    let window = n.min(period);
    let slice = &bars[n - window..];
    let high = slice.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let low = slice.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let range = high - low;
    if range.abs() < EPS {
        return 0.5;
    }
    (bars[n - 1].close - low) / range
}

/// RSI-style gain ratio avg_gain / (avg_gain + avg_loss), in [0, 1].
fn rsi_like(prices: &[f64], period: usize) -> f64 {
    let n = prices.len();
    if n < 2 {
        return 0.5;
    }
    let window = period.min(n - 1);
    let mut gains = Vec::with_capacity(window);
    let mut losses = Vec::with_capacity(window);
    for i in n - window..n {
        if prices[i - 1].abs() > EPS {
            let ret = (prices[i] - prices[i - 1]) / prices[i - 1];
            if ret > 0.0 {
                gains.push(ret);
                losses.push(0.0);
            } else {
                gains.push(0.0);
                losses.push(-ret);
            }
        }
    }
    if gains.is_empty() {
        return 0.5;
    }
    let avg_gain = math::mean(&gains);
    let avg_loss = math::mean(&losses);
    if avg_gain < 1e-8 && avg_loss < 1e-8 {
        return 0.5;
    }
    if avg_loss < 1e-8 {
        return 1.0;
    }
    if avg_gain < 1e-8 {
        return 0.0;
    }
    let rs = avg_gain / avg_loss;
    rs / (1.0 + rs)
}

/// Net up/down move bias over `period` bars: +1 all up, -1 all down.
fn directional_momentum(prices: &[f64], period: usize) -> f64 {
    let n = prices.len();
    if n < 2 || period >= n {
        return 0.0;
    }
    let mut up = 0;
    let mut down = 0;
    for i in n - period..n {
        if prices[i] > prices[i - 1] {
            up += 1;
        } else if prices[i] < prices[i - 1] {
            down += 1;
        }
    }
    let total = up + down;
    if total == 0 {
        return 0.0;
    }
    f64::from(up - down) / f64::from(total)
}

/// Normalized deviation of the close from its `period`-bar SMA.
fn ma_deviation(prices: &[f64], period: usize) -> f64 {
    let n = prices.len();
    if n == 0 || period > n {
        return 0.0;
    }
    let ma = math::mean(&prices[n - period..]);
    if ma.abs() < EPS {
        return 0.0;
    }
    (prices[n - 1] - ma) / ma
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_bar(minute: usize, close: f64, volume: i64) -> Bar {
        // 2024-01-08 (a Monday) 09:30 ET = 14:30 UTC.
        let ts = 1_704_724_200_000_i64 + (minute as i64) * 60_000;
        Bar::new(ts, "TQQQ", close, close, close, close, volume)
    }

    fn trending_bar(minute: usize, close: f64, volume: i64) -> Bar {
        let ts = 1_704_724_200_000_i64 + (minute as i64) * 60_000;
        Bar::new(ts, "TQQQ", close - 0.1, close + 0.2, close - 0.3, close, volume)
    }

    #[test]
    fn warmup_produces_nothing_for_49_bars() {
        let mut fx = FeatureExtractor::new();
        for i in 0..LOOKBACK - 1 {
            assert!(fx.extract(&constant_bar(i, 100.0, 1_000_000)).is_none());
        }
        assert!(!fx.is_ready());
        assert!(fx
            .extract(&constant_bar(LOOKBACK - 1, 100.0, 1_000_000))
            .is_some());
        assert!(fx.is_ready());
    }

    #[test]
    fn constant_series_yields_neutral_features() {
        let mut fx = FeatureExtractor::new();
        let mut last = None;
        for i in 0..LOOKBACK {
            last = fx.extract(&constant_bar(i, 100.0, 1_000_000));
        }
        let features = last.expect("warmup complete at bar 50");
        assert_eq!(features.len(), BASE_FEATURES);

        // Bollinger sigma (21) is zero, percent-B (60) neutral.
        assert_eq!(features[21], 0.0);
        assert_eq!(features[60], 0.5);
        // All momenta (29-32) zero.
        for idx in 29..=32 {
            assert_eq!(features[idx], 0.0, "momentum at {idx}");
        }
        // Bias term.
        assert_eq!(features[62], 1.0);
        // Raw close survives untouched.
        assert_eq!(features[8], 100.0);
        // RSI-like on a flat series has no moves at all.
        assert_eq!(features[41], 0.5);
        // Price position degenerates to the midpoint.
        assert_eq!(features[38], 0.5);
    }

    #[test]
    fn rising_series_shows_positive_momentum() {
        let mut fx = FeatureExtractor::new();
        let mut last = None;
        for i in 0..LOOKBACK + 10 {
            let close = 100.0 + i as f64 * 0.1;
            last = fx.extract(&trending_bar(i, close, 1_000_000));
        }
        let features = last.unwrap();
        assert!(features[29] > 0.0, "1-bar momentum");
        assert!(features[32] > 0.0, "10-bar momentum");
        // Directional momentum saturates at +1 on a monotone series.
        assert!((features[42] - 1.0).abs() < 1e-12);
        assert!((features[43] - 1.0).abs() < 1e-12);
        // RSI-like ratio pegged at 1 when there are no losses.
        assert_eq!(features[41], 1.0);
        // Close sits at the top of every channel.
        assert!(features[38] > 0.9);
    }

    #[test]
    fn regime_variant_appends_twelve_features() {
        let mut fx = FeatureExtractor::with_regime(true);
        assert_eq!(fx.num_features(), FULL_FEATURES);
        let mut last = None;
        for i in 0..LOOKBACK {
            let close = 100.0 + (i as f64 * 0.37).sin();
            last = fx.extract(&trending_bar(i, close, 1_000_000 + i as i64 * 1000));
        }
        let features = last.unwrap();
        assert_eq!(features.len(), FULL_FEATURES);
        // State probabilities land in [0, 1] and sum to ~1.
        let state_sum: f64 = features.iter().skip(63).take(3).sum();
        assert!((state_sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn reset_reproduces_identical_vectors() {
        let mut fx = FeatureExtractor::new();
        let feed = |fx: &mut FeatureExtractor| {
            fx.reset();
            let mut last = None;
            for i in 0..LOOKBACK + 5 {
                let close = 100.0 + (i as f64 * 0.21).cos() * 2.0;
                last = fx.extract(&trending_bar(i, close, 900_000));
            }
            last.unwrap()
        };
        let a = feed(&mut fx);
        let b = feed(&mut fx);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }

    #[test]
    fn time_features_encode_utc_clock() {
        let mut fx = FeatureExtractor::new();
        let mut last = None;
        for i in 0..LOOKBACK {
            last = fx.extract(&constant_bar(i, 100.0, 1_000_000));
        }
        let features = last.unwrap();
        // Bar 49 is 15:19 UTC on 2024-01-08.
        let two_pi = 2.0 * std::f64::consts::PI;
        assert!((features[0] - (two_pi * 15.0 / 24.0).sin()).abs() < 1e-12);
        assert!((features[2] - (two_pi * 19.0 / 60.0).sin()).abs() < 1e-12);
    }
}

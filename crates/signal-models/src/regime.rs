//! Regime-aware features from lightweight k-means clustering.
//!
//! Twelve features appended to the technical vector when enabled: three
//! market-state probabilities from clustering log returns, three
//! volatility-regime probabilities from clustering 20-bar rolling vol,
//! two duration counters, and four microstructure measures.

use nalgebra::DVector;
use rotation_core::{math, Bar};

/// Number of regime features produced per extraction.
pub const NUM_REGIME_FEATURES: usize = 12;

const MIN_BARS: usize = 30;
const VOL_WINDOW: usize = 20;
const LONG_WINDOW: usize = 60;
const MAX_DURATION: i32 = 120;
const KMEANS_ITERATIONS: usize = 10;
const SOFTMAX_TEMPERATURE: f64 = 0.1;

/// Stateful regime detector. Clustering is recomputed from the passed
/// window each bar; only the state/regime durations persist.
pub struct RegimeFeatures {
    last_state: i32,
    last_vol_regime: i32,
    state_duration: i32,
    vol_regime_duration: i32,
}

impl RegimeFeatures {
    pub fn new() -> Self {
        Self {
            last_state: -1,
            last_vol_regime: -1,
            state_duration: 0,
            vol_regime_duration: 0,
        }
    }

    pub fn reset(&mut self) {
        self.last_state = -1;
        self.last_vol_regime = -1;
        self.state_duration = 0;
        self.vol_regime_duration = 0;
    }

    /// Extract the 12 regime features from a bar window. Returns the
    /// neutral vector when fewer than 30 bars are available.
    pub fn extract(&mut self, bars: &[Bar]) -> DVector<f64> {
        if bars.len() < MIN_BARS {
            return neutral();
        }

        let prices: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume as f64).collect();

        let mut returns = Vec::with_capacity(prices.len() - 1);
        for i in 1..prices.len() {
            returns.push((prices[i] / (prices[i - 1] + 1e-10)).ln());
        }
        if returns.is_empty() {
            return neutral();
        }

        // Market state: cluster raw returns, soft-assign the latest one.
        let state_probs = cluster_probabilities(&returns);
        let current_state = argmax(&state_probs);
        if current_state != self.last_state {
            self.state_duration = 0;
            self.last_state = current_state;
        } else {
            self.state_duration += 1;
        }

        // Volatility regime: cluster the rolling realized-vol series.
        let rolling_vol = rolling_volatility(&returns, VOL_WINDOW);
        let vol_probs = if rolling_vol.len() >= MIN_BARS {
            cluster_probabilities(&rolling_vol)
        } else {
            [0.33, 0.33, 0.34]
        };
        let current_vol_regime = argmax(&vol_probs);
        if current_vol_regime != self.last_vol_regime {
            self.vol_regime_duration = 0;
            self.last_vol_regime = current_vol_regime;
        } else {
            self.vol_regime_duration += 1;
        }

        // Microstructure: vol ratio, vol z-score, price-volume
        // correlation, volume z-score.
        let mut vol_ratio = 1.0;
        if rolling_vol.len() >= LONG_WINDOW {
            let tail = &rolling_vol[rolling_vol.len() - LONG_WINDOW..];
            let long_avg = math::mean(tail);
            if long_avg > 1e-10 {
                vol_ratio = rolling_vol[rolling_vol.len() - 1] / long_avg;
            }
        }
        vol_ratio = vol_ratio.clamp(-3.0, 3.0);

        let vol_zscore = if rolling_vol.len() >= LONG_WINDOW {
            let tail = &rolling_vol[rolling_vol.len() - LONG_WINDOW..];
            math::zscore(rolling_vol[rolling_vol.len() - 1], tail).clamp(-3.0, 3.0)
        } else {
            0.0
        };

        let price_vol_corr = if prices.len() >= VOL_WINDOW {
            let p = &prices[prices.len() - VOL_WINDOW..];
            let v = &volumes[volumes.len() - VOL_WINDOW..];
            math::correlation(p, v).clamp(-1.0, 1.0)
        } else {
            0.0
        };

        let volume_zscore = if volumes.len() >= LONG_WINDOW {
            let tail = &volumes[volumes.len() - LONG_WINDOW..];
            math::zscore(volumes[volumes.len() - 1], tail).clamp(-3.0, 3.0)
        } else {
            0.0
        };

        DVector::from_vec(vec![
            state_probs[0],
            state_probs[1],
            state_probs[2],
            vol_probs[0],
            vol_probs[1],
            vol_probs[2],
            f64::from(self.state_duration.min(MAX_DURATION)),
            f64::from(self.vol_regime_duration.min(MAX_DURATION)),
            vol_ratio,
            vol_zscore,
            price_vol_corr,
            volume_zscore,
        ])
    }
}

impl Default for RegimeFeatures {
    fn default() -> Self {
        Self::new()
    }
}

fn neutral() -> DVector<f64> {
    DVector::from_vec(vec![
        0.33, 0.33, 0.34, 0.33, 0.33, 0.34, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0,
    ])
}

fn argmax(probs: &[f64; 3]) -> i32 {
    let mut best = 0;
    for i in 1..3 {
        if probs[i] > probs[best] {
            best = i;
        }
    }
    best as i32
}

/// Population standard deviation of each `window`-length slice of the
/// return series.
fn rolling_volatility(returns: &[f64], window: usize) -> Vec<f64> {
    if returns.len() < window {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(returns.len() - window + 1);
    for i in window..=returns.len() {
        out.push(math::stddev_pop(&returns[i - window..i]));
    }
    out
}

/// One-dimensional k-means (k = 3) with quantile-seeded centroids, then
/// a softmax over negative distances from the latest value to the
/// cluster centers.
fn cluster_probabilities(data: &[f64]) -> [f64; 3] {
    const K: usize = 3;
    if data.len() < K {
        return [0.33, 0.33, 0.34];
    }

    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mut centroids = [0.0_f64; K];
    for (i, c) in centroids.iter_mut().enumerate() {
        let idx = (sorted.len() * (i + 1)) / (K + 1);
        *c = sorted[idx.min(sorted.len() - 1)];
    }

    let mut assignments = vec![0_usize; data.len()];
    for _ in 0..KMEANS_ITERATIONS {
        for (i, value) in data.iter().enumerate() {
            let mut best = 0;
            let mut best_dist = f64::MAX;
            for (c, centroid) in centroids.iter().enumerate() {
                let dist = (value - centroid).abs();
                if dist < best_dist {
                    best_dist = dist;
                    best = c;
                }
            }
            assignments[i] = best;
        }

        let mut sums = [0.0_f64; K];
        let mut counts = [0_usize; K];
        for (i, value) in data.iter().enumerate() {
            sums[assignments[i]] += value;
            counts[assignments[i]] += 1;
        }
        for c in 0..K {
            if counts[c] > 0 {
                centroids[c] = sums[c] / counts[c] as f64;
            }
        }
    }

    let value = data[data.len() - 1];
    let mut probs = [0.0_f64; 3];
    let mut sum = 0.0;
    for c in 0..K {
        let dist = (value - centroids[c]).abs();
        probs[c] = (-dist / (SOFTMAX_TEMPERATURE + 1e-10)).exp();
        sum += probs[c];
    }
    if sum > 1e-10 {
        for p in probs.iter_mut() {
            *p /= sum;
        }
        probs
    } else {
        [0.33, 0.33, 0.34]
    }
}

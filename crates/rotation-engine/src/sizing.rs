//! Kelly-criterion position sizing with safety clamps.
//!
//! Kelly formula: f* = (p·b − q) / b, with p the clamped win
//! probability, q = 1 − p, and b the configured win/loss ratio. The
//! raw fraction is scaled down (fractional Kelly), adjusted for signal
//! strength and realized volatility, clamped to the configured band,
//! and finally modulated by the symbol's recent win/loss streak.

use crate::config::SizingConfig;

/// Capital slice of cash the sizer may draw on.
const AVAILABLE_CASH_FRACTION: f64 = 0.95;
/// Signal strength considered "full strength" for the adjustment ramp.
const FULL_STRENGTH: f64 = 0.005;
/// Daily volatility above which sizing starts shrinking.
const VOL_BASELINE: f64 = 0.02;

/// Dollar capital to deploy for one entry.
///
/// `recent_pnls` are the symbol's last closed-trade P&Ls, newest or
/// oldest first (only unanimity matters).
pub fn position_size(
    config: &SizingConfig,
    confidence: f64,
    signal_strength: f64,
    cash: f64,
    closes: &[f64],
    recent_pnls: &[f64],
) -> f64 {
    // Kelly fraction from clamped win probability.
    let p = confidence.clamp(0.51, 0.95);
    let q = 1.0 - p;
    let b = config.expected_win_pct / config.expected_loss_pct;
    let kelly = ((p * b - q) / b).clamp(0.0, 1.0);

    let base = kelly * config.fractional_kelly;

    // Strength ramp: 70% size for a marginal signal up to 100% at
    // FULL_STRENGTH.
    let normalized_strength = (signal_strength.abs() / FULL_STRENGTH).min(1.0);
    let mut recommended = base * (0.7 + 0.3 * normalized_strength);

    // Volatility reduction.
    if config.enable_volatility_adjustment && closes.len() >= config.volatility_lookback {
        let vol = realized_volatility(closes, config.volatility_lookback);
        if vol > VOL_BASELINE {
            let excess = vol - VOL_BASELINE;
            let factor = 1.0 - (excess / VOL_BASELINE).min(config.max_volatility_reduce);
            recommended *= factor;
        }
    }

    recommended = recommended.clamp(config.min_position_pct, config.max_position_pct);

    let available = cash * AVAILABLE_CASH_FRACTION;
    let mut capital = available * recommended;

    // Streak multiplier: a full window of wins sizes up, a full window
    // of losses sizes down.
    if recent_pnls.len() >= config.trade_history_size && config.trade_history_size > 0 {
        let window = &recent_pnls[recent_pnls.len() - config.trade_history_size..];
        if window.iter().all(|pnl| *pnl > 0.0) {
            capital *= config.win_multiplier;
        } else if window.iter().all(|pnl| *pnl < 0.0) {
            capital *= config.loss_multiplier;
        }
    }

    capital.min(available)
}

fn realized_volatility(closes: &[f64], lookback: usize) -> f64 {
    let n = closes.len();
    let start = n - lookback;
    let mut returns = Vec::with_capacity(lookback);
    for i in start..n - 1 {
        if closes[i].abs() > 1e-10 {
            returns.push((closes[i + 1] - closes[i]) / closes[i]);
        }
    }
    if returns.is_empty() {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / returns.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SizingConfig {
        SizingConfig::default()
    }

    #[test]
    fn size_respects_available_cash() {
        let size = position_size(&config(), 0.9, 0.01, 100_000.0, &[], &[]);
        assert!(size > 0.0);
        assert!(size <= 95_000.0);
    }

    #[test]
    fn higher_confidence_sizes_larger() {
        let low = position_size(&config(), 0.55, 0.002, 100_000.0, &[], &[]);
        let high = position_size(&config(), 0.90, 0.002, 100_000.0, &[], &[]);
        assert!(high > low);
    }

    #[test]
    fn stronger_signal_sizes_larger() {
        let weak = position_size(&config(), 0.7, 0.0005, 100_000.0, &[], &[]);
        let strong = position_size(&config(), 0.7, 0.01, 100_000.0, &[], &[]);
        assert!(strong > weak);
        // The ramp saturates at FULL_STRENGTH.
        let stronger = position_size(&config(), 0.7, 0.05, 100_000.0, &[], &[]);
        assert!((stronger - strong).abs() < 1e-9);
    }

    #[test]
    fn min_position_floor_applies() {
        // Confidence clamps to 0.51; Kelly is tiny but the floor holds.
        let size = position_size(&config(), 0.1, 0.0001, 100_000.0, &[], &[]);
        let floor = 100_000.0 * 0.95 * config().min_position_pct;
        assert!((size - floor).abs() < 1e-6);
    }

    #[test]
    fn volatility_reduces_size() {
        let calm_closes: Vec<f64> = (0..21).map(|i| 100.0 + i as f64 * 0.01).collect();
        let wild_closes: Vec<f64> = (0..21)
            .map(|i| if i % 2 == 0 { 100.0 } else { 104.0 })
            .collect();
        let calm = position_size(&config(), 0.8, 0.004, 100_000.0, &calm_closes, &[]);
        let wild = position_size(&config(), 0.8, 0.004, 100_000.0, &wild_closes, &[]);
        assert!(wild < calm);
        // Reduction is bounded by max_volatility_reduce.
        assert!(wild >= calm * (1.0 - config().max_volatility_reduce) - 1e-6);
    }

    #[test]
    fn win_streak_scales_up_loss_streak_down() {
        let neutral = position_size(&config(), 0.8, 0.004, 100_000.0, &[], &[10.0, -5.0, 8.0]);
        let winners = position_size(&config(), 0.8, 0.004, 100_000.0, &[], &[10.0, 5.0, 8.0]);
        let losers = position_size(&config(), 0.8, 0.004, 100_000.0, &[], &[-10.0, -5.0, -8.0]);
        assert!(winners > neutral);
        assert!(losers < neutral);
        assert!((winners / neutral - config().win_multiplier).abs() < 1e-9);
        assert!((losers / neutral - config().loss_multiplier).abs() < 1e-9);
    }

    #[test]
    fn streak_multiplier_never_exceeds_available() {
        let mut cfg = config();
        cfg.max_position_pct = 1.0;
        cfg.win_multiplier = 5.0;
        let size = position_size(&cfg, 0.95, 0.01, 100_000.0, &[], &[1.0, 1.0, 1.0]);
        assert!(size <= 95_000.0 + 1e-9);
    }
}

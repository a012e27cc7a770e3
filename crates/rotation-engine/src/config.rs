//! Trading configuration.
//!
//! Every knob the engine recognizes, grouped by concern and wired for
//! serde so a driver can load the whole tree from JSON. Defaults are
//! the production values for liquid leveraged ETFs.

use std::collections::HashMap;
use std::str::FromStr;

use rotation_core::EngineError;
use serde::{Deserialize, Serialize};
use signal_models::{SigorConfig, WilliamsRsiConfig};

/// Which signal model drives the rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Online EWRLS regression over the technical feature vector.
    Ewrls,
    /// Rule-based seven-detector ensemble.
    Sigor,
    /// Williams %R / RSI anticipatory crossover.
    WilliamsRsi,
}

impl FromStr for StrategyKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ewrls" => Ok(Self::Ewrls),
            "sigor" => Ok(Self::Sigor),
            "williams-rsi" | "williams_rsi" | "awr" => Ok(Self::WilliamsRsi),
            other => Err(EngineError::InvalidConfig(format!(
                "unknown strategy: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ewrls => write!(f, "EWRLS"),
            Self::Sigor => write!(f, "SIGOR"),
            Self::WilliamsRsi => write!(f, "Williams%R-RSI"),
        }
    }
}

/// Kelly sizing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Fraction of full Kelly to deploy.
    pub fractional_kelly: f64,
    /// Expected winning-trade return used for the win/loss odds ratio.
    pub expected_win_pct: f64,
    /// Expected losing-trade return (positive magnitude).
    pub expected_loss_pct: f64,
    /// Position floor as a fraction of available capital.
    pub min_position_pct: f64,
    /// Position cap as a fraction of available capital.
    pub max_position_pct: f64,
    /// Size multiplier after a full window of winning trades.
    pub win_multiplier: f64,
    /// Size multiplier after a full window of losing trades.
    pub loss_multiplier: f64,
    /// Recent trades consulted for the adaptive multiplier.
    pub trade_history_size: usize,
    pub enable_volatility_adjustment: bool,
    /// Closes consulted for the volatility estimate.
    pub volatility_lookback: usize,
    /// Largest allowed volatility-driven size reduction.
    pub max_volatility_reduce: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            fractional_kelly: 0.25,
            expected_win_pct: 0.015,
            expected_loss_pct: 0.01,
            min_position_pct: 0.05,
            max_position_pct: 0.50,
            win_multiplier: 1.3,
            loss_multiplier: 0.7,
            trade_history_size: 3,
            enable_volatility_adjustment: true,
            volatility_lookback: 20,
            max_volatility_reduce: 0.5,
        }
    }
}

/// Ranking, thresholds, and rotation behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    pub enable_rotation: bool,
    /// Minimum strength improvement a candidate needs over the weakest
    /// held position.
    pub rotation_strength_delta: f64,
    /// Bars a rotated-out symbol is barred from re-entry.
    pub rotation_cooldown_bars: usize,
    /// Minimum prediction strength to appear in the ranking at all.
    pub min_rank_strength: f64,
    /// Probability threshold for long entries.
    pub buy_threshold: f64,
    /// Probability threshold for short-leaning signals.
    pub sell_threshold: f64,
    /// Map predictions through 0.5 + 0.5*tanh(scale * pred) before
    /// threshold checks.
    pub enable_probability_scaling: bool,
    pub probability_scaling_factor: f64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            enable_rotation: true,
            rotation_strength_delta: 0.002,
            rotation_cooldown_bars: 10,
            min_rank_strength: 0.0,
            buy_threshold: 0.52,
            sell_threshold: 0.48,
            enable_probability_scaling: true,
            probability_scaling_factor: 50.0,
        }
    }
}

/// P&L- and price-driven exit rules owned by the trader (the trade
/// filter has its own signal-driven exits).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitConfig {
    pub enable_profit_target: bool,
    pub profit_target_pct: f64,
    pub enable_stop_loss: bool,
    /// Stop distance as a positive fraction.
    pub stop_loss_pct: f64,
    pub enable_price_based_exits: bool,
    /// Moving-average period for the crossover exit.
    pub ma_exit_period: usize,
    pub exit_on_ma_crossover: bool,
    /// Fraction of the maximum reached profit the trailing stop keeps.
    pub trailing_stop_percentage: f64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            enable_profit_target: true,
            profit_target_pct: 0.03,
            enable_stop_loss: true,
            stop_loss_pct: 0.015,
            enable_price_based_exits: false,
            ma_exit_period: 20,
            exit_on_ma_crossover: true,
            trailing_stop_percentage: 0.5,
        }
    }
}

/// Trade-frequency and holding-period constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub min_bars_to_hold: usize,
    pub typical_hold_period: usize,
    pub max_bars_to_hold: usize,
    /// Cooldown after an exit before the same symbol may re-enter.
    pub min_bars_between_entries: usize,
    pub max_trades_per_hour: usize,
    pub max_trades_per_day: usize,
    pub min_prediction_for_entry: f64,
    pub min_confidence_for_entry: f64,
    /// Exit when the signal reverses past this level (sign-relative).
    pub exit_signal_reversed_threshold: f64,
    pub exit_confidence_threshold: f64,
    /// Exit when P&L exceeds entry_prediction * bars_held * this.
    pub profit_target_multiple: f64,
    /// Hard stop (negative fraction) that overrides the minimum hold.
    pub emergency_stop_loss_pct: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_bars_to_hold: 10,
            typical_hold_period: 20,
            max_bars_to_hold: 60,
            min_bars_between_entries: 5,
            max_trades_per_hour: 50,
            max_trades_per_day: 200,
            min_prediction_for_entry: 0.0005,
            min_confidence_for_entry: 0.5,
            exit_signal_reversed_threshold: -0.0005,
            exit_confidence_threshold: 0.4,
            profit_target_multiple: 2.0,
            emergency_stop_loss_pct: -0.01,
        }
    }
}

/// Execution-cost tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    pub enable_cost_tracking: bool,
    /// Per-symbol annualized borrow-rate overrides.
    #[serde(default)]
    pub borrow_rates: HashMap<String, f64>,
    /// ADV assumed before enough volume history accumulates.
    pub default_avg_volume: f64,
    /// Daily volatility assumed before enough return history.
    pub default_volatility: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            enable_cost_tracking: true,
            borrow_rates: HashMap::new(),
            default_avg_volume: 10_000_000.0,
            default_volatility: 0.02,
        }
    }
}

/// EWRLS-specific knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EwrlsConfig {
    /// Forgetting factor, must lie in (0, 1].
    pub lambda: f64,
    pub use_regime_features: bool,
}

impl Default for EwrlsConfig {
    fn default() -> Self {
        Self {
            lambda: 0.98,
            use_regime_features: true,
        }
    }
}

/// Observation/simulation warmup gating live entries (EWRLS only;
/// rule-based strategies trade immediately).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupConfig {
    pub enabled: bool,
    pub observation_days: usize,
    pub simulation_days: usize,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            observation_days: 2,
            simulation_days: 1,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub initial_capital: f64,
    /// Maximum concurrent positions (K).
    pub max_positions: usize,
    pub bars_per_day: usize,
    pub eod_liquidation: bool,
    /// Closed-trade log capacity; the oldest half is evicted when full.
    pub trade_log_capacity: usize,

    pub strategy: StrategyKind,
    pub sizing: SizingConfig,
    pub rotation: RotationConfig,
    pub exits: ExitConfig,
    pub filter: FilterConfig,
    pub costs: CostConfig,
    pub warmup: WarmupConfig,
    pub ewrls: EwrlsConfig,
    pub sigor: SigorConfig,
    pub williams_rsi: WilliamsRsiConfig,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
            max_positions: 3,
            bars_per_day: 390,
            eod_liquidation: true,
            trade_log_capacity: 10_000,
            strategy: StrategyKind::Sigor,
            sizing: SizingConfig::default(),
            rotation: RotationConfig::default(),
            exits: ExitConfig::default(),
            filter: FilterConfig::default(),
            costs: CostConfig::default(),
            warmup: WarmupConfig::default(),
            ewrls: EwrlsConfig::default(),
            sigor: SigorConfig::default(),
            williams_rsi: WilliamsRsiConfig::default(),
        }
    }
}

impl TradingConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.initial_capital <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "initial_capital must be positive".into(),
            ));
        }
        if self.max_positions == 0 {
            return Err(EngineError::InvalidConfig(
                "max_positions must be at least 1".into(),
            ));
        }
        if self.bars_per_day == 0 {
            return Err(EngineError::InvalidConfig(
                "bars_per_day must be positive".into(),
            ));
        }
        if self.trade_log_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "trade_log_capacity must be positive".into(),
            ));
        }
        if self.ewrls.lambda <= 0.0 || self.ewrls.lambda > 1.0 {
            return Err(EngineError::InvalidConfig(format!(
                "ewrls lambda must be in (0, 1], got {}",
                self.ewrls.lambda
            )));
        }
        if self.rotation.buy_threshold <= self.rotation.sell_threshold {
            return Err(EngineError::InvalidConfig(
                "buy_threshold must exceed sell_threshold".into(),
            ));
        }
        if self.filter.min_bars_to_hold > self.filter.max_bars_to_hold {
            return Err(EngineError::InvalidConfig(
                "min_bars_to_hold must not exceed max_bars_to_hold".into(),
            ));
        }
        if self.filter.typical_hold_period > self.filter.max_bars_to_hold {
            return Err(EngineError::InvalidConfig(
                "typical_hold_period must not exceed max_bars_to_hold".into(),
            ));
        }
        if self.sizing.expected_loss_pct <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "expected_loss_pct must be positive".into(),
            ));
        }
        if self.sizing.min_position_pct > self.sizing.max_position_pct {
            return Err(EngineError::InvalidConfig(
                "min_position_pct must not exceed max_position_pct".into(),
            ));
        }
        Ok(())
    }

    /// Global bar index at which the live test window begins.
    pub fn test_day_start_bar(&self) -> usize {
        match self.strategy {
            // Rule-based strategies go live immediately.
            StrategyKind::Sigor | StrategyKind::WilliamsRsi => 0,
            StrategyKind::Ewrls => {
                if self.warmup.enabled {
                    (self.warmup.observation_days + self.warmup.simulation_days)
                        * self.bars_per_day
                } else {
                    0
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(TradingConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_lambda() {
        let mut config = TradingConfig::default();
        config.ewrls.lambda = 1.5;
        assert!(config.validate().is_err());
        config.ewrls.lambda = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut config = TradingConfig::default();
        config.rotation.buy_threshold = 0.4;
        config.rotation.sell_threshold = 0.6;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_positions() {
        let config = TradingConfig {
            max_positions: 0,
            ..TradingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn strategy_parses_from_str() {
        assert_eq!("sigor".parse::<StrategyKind>().unwrap(), StrategyKind::Sigor);
        assert_eq!("EWRLS".parse::<StrategyKind>().unwrap(), StrategyKind::Ewrls);
        assert_eq!(
            "williams-rsi".parse::<StrategyKind>().unwrap(),
            StrategyKind::WilliamsRsi
        );
        assert!("momentum".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_day_start_depends_on_strategy() {
        let mut config = TradingConfig::default();
        config.strategy = StrategyKind::Sigor;
        assert_eq!(config.test_day_start_bar(), 0);

        config.strategy = StrategyKind::Ewrls;
        assert_eq!(config.test_day_start_bar(), 3 * 390);

        config.warmup.enabled = false;
        assert_eq!(config.test_day_start_bar(), 0);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = TradingConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: TradingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_positions, config.max_positions);
        assert_eq!(back.strategy, config.strategy);
    }
}

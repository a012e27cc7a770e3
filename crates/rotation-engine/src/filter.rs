//! Trade frequency and holding-period filter.
//!
//! Guards against over-trading: per-symbol cooldowns and hold windows,
//! global daily/hourly frequency caps, and signal-quality exits. Bar
//! indices are signed so the "no exit yet" sentinel can sit far in the
//! past.

use std::collections::{HashMap, VecDeque};

use rotation_core::{Prediction, Symbol};

use crate::config::FilterConfig;

/// Sentinel meaning "never exited" / "cooldown long expired".
const NO_EXIT: i64 = -999;
/// Trade-bar deque cap (about one day of minute bars with slack).
const MAX_TRADE_BARS: usize = 500;
/// Bars per trading day for frequency accounting.
const BARS_PER_DAY: i64 = 390;
/// Bars per hour for frequency accounting.
const BARS_PER_HOUR: i64 = 60;

/// Per-symbol position bookkeeping mirrored from the trader.
#[derive(Debug, Clone)]
pub struct PositionState {
    pub has_position: bool,
    pub entry_bar: i64,
    pub bars_held: i64,
    pub entry_prediction: f64,
    pub entry_price: f64,
    /// Persists across `reset` so cooldowns outlive the position.
    pub last_exit_bar: i64,
}

impl Default for PositionState {
    fn default() -> Self {
        Self {
            has_position: false,
            entry_bar: 0,
            bars_held: 0,
            entry_prediction: 0.0,
            entry_price: 0.0,
            last_exit_bar: NO_EXIT,
        }
    }
}

impl PositionState {
    fn clear_position(&mut self) {
        self.has_position = false;
        self.entry_bar = 0;
        self.bars_held = 0;
        self.entry_prediction = 0.0;
        self.entry_price = 0.0;
    }
}

/// Aggregate counters for diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct TradeStats {
    pub trades_today: usize,
    pub trades_last_hour: usize,
}

pub struct TradeFilter {
    config: FilterConfig,
    states: HashMap<Symbol, PositionState>,
    /// Bar indices of recent entries and exits, for frequency caps.
    trade_bars: VecDeque<i64>,
}

impl TradeFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
            trade_bars: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Entry admission: flat, out of cooldown, under frequency caps,
    /// and carrying a signal strong enough to act on.
    pub fn can_enter(&self, symbol: &str, current_bar: i64, prediction: &Prediction) -> bool {
        if let Some(state) = self.states.get(symbol) {
            if state.has_position {
                return false;
            }
            if current_bar - state.last_exit_bar < self.config.min_bars_between_entries as i64 {
                return false;
            }
        }
        if !self.frequency_limits_ok(current_bar) {
            return false;
        }
        prediction.should_enter(
            self.config.min_prediction_for_entry,
            self.config.min_confidence_for_entry,
        )
    }

    /// Exit decision in strict priority order. The emergency stop is
    /// the only rule allowed to fire inside the minimum hold window.
    pub fn should_exit(
        &self,
        symbol: &str,
        current_bar: i64,
        prediction: &Prediction,
        current_price: f64,
    ) -> bool {
        let Some(state) = self.states.get(symbol) else {
            return false;
        };
        if !state.has_position {
            return false;
        }

        let bars_held = current_bar - state.entry_bar;
        let pnl_pct = if state.entry_price.abs() > 1e-10 {
            (current_price - state.entry_price) / state.entry_price
        } else {
            0.0
        };

        // 1. Emergency stop loss overrides the minimum hold.
        if pnl_pct < self.config.emergency_stop_loss_pct {
            return true;
        }

        // 2. Minimum holding period.
        if bars_held < self.config.min_bars_to_hold as i64 {
            return false;
        }

        // 3. Maximum holding period.
        if bars_held >= self.config.max_bars_to_hold as i64 {
            return true;
        }

        // 4. Profit target: realized more than the prediction promised.
        let expected_return = state.entry_prediction * bars_held as f64;
        if pnl_pct > expected_return * self.config.profit_target_multiple {
            return true;
        }

        // 5. Signal quality collapsed.
        if prediction.confidence < self.config.exit_confidence_threshold {
            return true;
        }

        // 6. Signal reversed direction.
        if state.entry_prediction > 0.0
            && prediction.prediction < self.config.exit_signal_reversed_threshold
        {
            return true;
        }
        if state.entry_prediction < 0.0
            && prediction.prediction > -self.config.exit_signal_reversed_threshold
        {
            return true;
        }

        // 7. Adaptive: past the typical hold, the confidence bar decays
        // linearly by up to 30% toward the maximum hold.
        if bars_held >= self.config.typical_hold_period as i64 {
            let span = self.config.max_bars_to_hold - self.config.typical_hold_period;
            if span > 0 {
                let progress =
                    (bars_held - self.config.typical_hold_period as i64) as f64 / span as f64;
                let adaptive = self.config.min_confidence_for_entry * (1.0 - 0.3 * progress);
                if prediction.confidence < adaptive {
                    return true;
                }
            }
        }

        false
    }

    pub fn record_entry(
        &mut self,
        symbol: &str,
        entry_bar: i64,
        entry_prediction: f64,
        entry_price: f64,
    ) {
        let state = self.states.entry(symbol.to_string()).or_default();
        state.has_position = true;
        state.entry_bar = entry_bar;
        state.bars_held = 0;
        state.entry_prediction = entry_prediction;
        state.entry_price = entry_price;

        self.push_trade_bar(entry_bar);
    }

    pub fn record_exit(&mut self, symbol: &str, exit_bar: i64) {
        let state = self.states.entry(symbol.to_string()).or_default();
        state.last_exit_bar = exit_bar;
        state.clear_position();

        self.push_trade_bar(exit_bar);
    }

    /// Refresh `bars_held` for all open positions.
    pub fn update_bars_held(&mut self, current_bar: i64) {
        for state in self.states.values_mut() {
            if state.has_position {
                state.bars_held = current_bar - state.entry_bar;
            }
        }
    }

    /// Day-boundary reset. Only trades older than one day leave the
    /// deque, and a cooldown survives the boundary unless the exit is
    /// at least twice the cooldown old.
    pub fn reset_daily_limits(&mut self, current_bar: i64) {
        let cutoff = current_bar - BARS_PER_DAY;
        while let Some(front) = self.trade_bars.front() {
            if *front < cutoff {
                self.trade_bars.pop_front();
            } else {
                break;
            }
        }

        let expiry = 2 * self.config.min_bars_between_entries as i64;
        for state in self.states.values_mut() {
            if !state.has_position && current_bar - state.last_exit_bar > expiry {
                state.last_exit_bar = NO_EXIT;
            }
        }
    }

    pub fn position_state(&self, symbol: &str) -> Option<&PositionState> {
        self.states.get(symbol)
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.states
            .get(symbol)
            .map(|s| s.has_position)
            .unwrap_or(false)
    }

    pub fn bars_held(&self, symbol: &str) -> i64 {
        self.states.get(symbol).map(|s| s.bars_held).unwrap_or(0)
    }

    pub fn trade_stats(&self, current_bar: i64) -> TradeStats {
        let day = current_bar / BARS_PER_DAY;
        let mut stats = TradeStats::default();
        for bar in &self.trade_bars {
            if bar / BARS_PER_DAY == day {
                stats.trades_today += 1;
                if current_bar - bar <= BARS_PER_HOUR {
                    stats.trades_last_hour += 1;
                }
            }
        }
        stats
    }

    fn push_trade_bar(&mut self, bar: i64) {
        self.trade_bars.push_back(bar);
        while self.trade_bars.len() > MAX_TRADE_BARS {
            self.trade_bars.pop_front();
        }
    }

    /// Same-day trade counting; the hourly window is also day-aware so
    /// the first hour of a session never inherits yesterday's tail.
    fn frequency_limits_ok(&self, current_bar: i64) -> bool {
        let day = current_bar / BARS_PER_DAY;
        let mut today = 0_usize;
        let mut last_hour = 0_usize;
        for bar in &self.trade_bars {
            if bar / BARS_PER_DAY == day {
                today += 1;
                if current_bar - bar <= BARS_PER_HOUR {
                    last_hour += 1;
                }
            }
        }
        today < self.config.max_trades_per_day && last_hour < self.config.max_trades_per_hour
    }
}

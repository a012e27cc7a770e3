//! Multi-symbol rotation trader.
//!
//! Owns the per-symbol signal models, the trade filter, the cost
//! model, and all portfolio state. One `on_bar` call per timestamp
//! drives the full pipeline: context → price history → signals →
//! filter bookkeeping → exits → entries/rotation → EOD liquidation.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use rotation_core::{Bar, DailyResult, EngineError, Prediction, RingBuffer, Symbol, TradeRecord};
use signal_models::SymbolPredictor;
use tracing::{debug, info, warn};

use crate::clock::{EasternClock, MarketClock};
use crate::config::{StrategyKind, TradingConfig};
use crate::context::MarketContext;
use crate::costs::{CostModel, TradeCosts};
use crate::filter::TradeFilter;
use crate::results::{compute_results, BacktestResults, ResultsInput};
use crate::sizing;

/// Smallest entry ticket in dollars.
const MIN_TICKET: f64 = 100.0;
/// Fraction of cash deployable in one entry.
const AVAILABLE_CASH_FRACTION: f64 = 0.95;
/// Closes kept per symbol for context and exits.
const PRICE_HISTORY_LEN: usize = 20;
/// Inter-bar gap (ms) above which a warning is logged.
const GAP_WARN_MS: i64 = 300_000;

/// Leveraged bull/bear ETF pairs. Holding both sides of a pair is a
/// contradiction the engine refuses. Additions belong in this table.
const INVERSE_PAIRS: &[(&str, &str)] = &[
    ("TQQQ", "SQQQ"),
    ("TNA", "TZA"),
    ("SOXL", "SOXS"),
    ("SSO", "SDS"),
    ("UVXY", "SVIX"),
    ("ERX", "ERY"),
    ("FAS", "FAZ"),
    ("SPXL", "SPXS"),
];

/// The structurally opposite symbol, if one is tabled.
pub fn inverse_of(symbol: &str) -> Option<&'static str> {
    for (a, b) in INVERSE_PAIRS {
        if *a == symbol {
            return Some(b);
        }
        if *b == symbol {
            return Some(a);
        }
    }
    None
}

/// An open position with its cost snapshots.
#[derive(Debug, Clone)]
pub struct Position {
    pub shares: i64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub entry_bar_id: u64,
    pub entry_costs: TradeCosts,
    pub estimated_exit_costs: TradeCosts,
    pub accumulated_borrow_costs: f64,
}

impl Position {
    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        self.shares as f64 * (current_price - self.entry_price)
    }

    pub fn pnl_percentage(&self, current_price: f64) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        (current_price - self.entry_price) / self.entry_price
    }

    pub fn market_value(&self, current_price: f64) -> f64 {
        self.shares as f64 * current_price
    }

    pub fn is_long(&self) -> bool {
        self.shares > 0
    }
}

/// Price-exit bookkeeping created at entry.
#[derive(Debug, Clone)]
struct ExitTracking {
    entry_ma: f64,
    max_profit_pct: f64,
    is_long: bool,
}

/// Warmup phase machine. EWRLS observes and paper-simulates before
/// committing capital; rule-based strategies start live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingPhase {
    Observation,
    Simulation,
    Live,
}

pub struct RotationTrader {
    symbols: Vec<Symbol>,
    config: TradingConfig,
    clock: Box<dyn MarketClock>,

    cash: f64,
    predictors: HashMap<Symbol, SymbolPredictor>,
    positions: HashMap<Symbol, Position>,
    trade_history: HashMap<Symbol, RingBuffer<f64>>,
    market_context: HashMap<Symbol, MarketContext>,
    price_history: HashMap<Symbol, VecDeque<f64>>,
    exit_tracking: HashMap<Symbol, ExitTracking>,
    rotation_cooldowns: HashMap<Symbol, usize>,
    filter: TradeFilter,
    cost_model: CostModel,

    trade_log: Vec<TradeRecord>,
    bars_seen: usize,
    last_timestamp_ms: i64,
    phase: TradingPhase,
    test_day_start_bar: usize,

    total_trades: usize,
    total_transaction_costs: f64,

    daily_results: Vec<DailyResult>,
    daily_start_equity: f64,
    daily_start_trades: usize,
    daily_winning_trades: usize,
    daily_losing_trades: usize,
    last_eod_date: i64,
}

impl RotationTrader {
    pub fn new(symbols: Vec<Symbol>, config: TradingConfig) -> Result<Self, EngineError> {
        Self::with_clock(symbols, config, Box::new(EasternClock))
    }

    /// Construct with an explicit market clock (tests use a fixed
    /// offset to pin wall-time behavior).
    pub fn with_clock(
        symbols: Vec<Symbol>,
        config: TradingConfig,
        clock: Box<dyn MarketClock>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        if symbols.is_empty() {
            return Err(EngineError::InvalidConfig("no symbols configured".into()));
        }

        let mut predictors = HashMap::new();
        let mut trade_history = HashMap::new();
        let mut market_context = HashMap::new();
        let mut price_history = HashMap::new();
        for symbol in &symbols {
            let predictor = match config.strategy {
                StrategyKind::Ewrls => SymbolPredictor::ewrls(
                    config.ewrls.lambda,
                    config.ewrls.use_regime_features,
                )
                .map_err(|e| EngineError::InvalidConfig(e.to_string()))?,
                StrategyKind::Sigor => SymbolPredictor::sigor(config.sigor.clone()),
                StrategyKind::WilliamsRsi => {
                    SymbolPredictor::williams_rsi(config.williams_rsi.clone())
                }
            };
            predictors.insert(symbol.clone(), predictor);
            trade_history.insert(
                symbol.clone(),
                RingBuffer::with_capacity(config.sizing.trade_history_size.max(1)),
            );
            market_context.insert(
                symbol.clone(),
                MarketContext::new(
                    config.costs.default_avg_volume,
                    config.costs.default_volatility,
                    30,
                ),
            );
            price_history.insert(symbol.clone(), VecDeque::new());
        }

        let filter = TradeFilter::new(config.filter.clone());
        let cost_model = CostModel::new(config.costs.borrow_rates.clone());
        let test_day_start_bar = config.test_day_start_bar();
        let initial_capital = config.initial_capital;
        let phase = match config.strategy {
            StrategyKind::Ewrls if config.warmup.enabled => TradingPhase::Observation,
            _ => TradingPhase::Live,
        };

        Ok(Self {
            symbols,
            config,
            clock,
            cash: initial_capital,
            predictors,
            positions: HashMap::new(),
            trade_history,
            market_context,
            price_history,
            exit_tracking: HashMap::new(),
            rotation_cooldowns: HashMap::new(),
            filter,
            cost_model,
            trade_log: Vec::new(),
            bars_seen: 0,
            last_timestamp_ms: -1,
            phase,
            test_day_start_bar,
            total_trades: 0,
            total_transaction_costs: 0.0,
            daily_results: Vec::new(),
            daily_start_equity: initial_capital,
            daily_start_trades: 0,
            daily_winning_trades: 0,
            daily_losing_trades: 0,
            last_eod_date: 0,
        })
    }

    /// Process one synchronized snapshot of bars.
    pub fn on_bar(&mut self, market_data: &HashMap<Symbol, Bar>) -> Result<(), EngineError> {
        self.bars_seen += 1;

        self.sync_check(market_data);
        self.update_contexts(market_data);
        self.update_price_histories(market_data);
        let predictions = self.signal_pass(market_data);
        self.filter.update_bars_held(self.bars_seen as i64);
        self.update_positions(market_data, &predictions);
        self.update_phase();
        self.update_rotation_cooldowns();

        if self.phase == TradingPhase::Live {
            self.make_trades(&predictions, market_data);
        } else {
            debug!(phase = ?self.phase, bar = self.bars_seen, "warmup phase, entries gated");
        }

        self.handle_end_of_day(market_data);
        self.check_invariants()
    }

    /// Warn on missing symbols and large inter-bar time gaps. Strict
    /// per-bar id validation is deliberately not enforced here.
    fn sync_check(&mut self, market_data: &HashMap<Symbol, Bar>) {
        let missing: Vec<&Symbol> = self
            .symbols
            .iter()
            .filter(|s| !market_data.contains_key(*s))
            .collect();
        if !missing.is_empty() {
            warn!(bar = self.bars_seen, ?missing, "missing symbols in snapshot");
        }

        let reference_ts = self
            .symbols
            .iter()
            .find_map(|s| market_data.get(s))
            .map(|b| b.timestamp_ms());
        if let Some(ts) = reference_ts {
            if self.last_timestamp_ms > 0 {
                let gap = ts - self.last_timestamp_ms;
                if gap > GAP_WARN_MS {
                    warn!(
                        bar = self.bars_seen,
                        gap_minutes = gap / 60_000,
                        "large time gap between bars"
                    );
                }
            }
            self.last_timestamp_ms = ts;
        }
    }

    fn update_contexts(&mut self, market_data: &HashMap<Symbol, Bar>) {
        for symbol in &self.symbols {
            let Some(bar) = market_data.get(symbol) else {
                continue;
            };
            let Some(ctx) = self.market_context.get_mut(symbol) else {
                continue;
            };
            ctx.minutes_from_open = self.clock.minutes_from_open(bar.timestamp);
            ctx.update_spread(bar.low, bar.high);
            if let Some(history) = self.price_history.get(symbol) {
                let closes: Vec<f64> = history.iter().copied().collect();
                ctx.update_volatility(&closes);
            }
        }
    }

    fn update_price_histories(&mut self, market_data: &HashMap<Symbol, Bar>) {
        for symbol in &self.symbols {
            let Some(bar) = market_data.get(symbol) else {
                continue;
            };
            let history = self.price_history.entry(symbol.clone()).or_default();
            history.push_back(bar.close);
            while history.len() > PRICE_HISTORY_LEN {
                history.pop_front();
            }
        }
    }

    fn signal_pass(&mut self, market_data: &HashMap<Symbol, Bar>) -> HashMap<Symbol, Prediction> {
        let mut predictions = HashMap::new();
        for symbol in &self.symbols {
            let Some(bar) = market_data.get(symbol) else {
                continue;
            };
            let Some(predictor) = self.predictors.get_mut(symbol) else {
                continue;
            };
            predictor.on_bar(bar);
            if predictor.is_warmed_up() {
                if let Some(prediction) = predictor.prediction() {
                    predictions.insert(symbol.clone(), prediction);
                }
            }
        }
        predictions
    }

    fn update_phase(&mut self) {
        if self.phase == TradingPhase::Live {
            return;
        }
        let day = self.bars_seen.saturating_sub(1) / self.config.bars_per_day;
        let next = if day < self.config.warmup.observation_days {
            TradingPhase::Observation
        } else if day < self.config.warmup.observation_days + self.config.warmup.simulation_days {
            TradingPhase::Simulation
        } else {
            TradingPhase::Live
        };
        if next != self.phase {
            info!(from = ?self.phase, to = ?next, bar = self.bars_seen, "warmup phase transition");
            self.phase = next;
        }
    }

    fn update_rotation_cooldowns(&mut self) {
        self.rotation_cooldowns.retain(|_, remaining| {
            *remaining = remaining.saturating_sub(1);
            *remaining > 0
        });
    }

    fn in_rotation_cooldown(&self, symbol: &str) -> bool {
        self.rotation_cooldowns
            .get(symbol)
            .map(|c| *c > 0)
            .unwrap_or(false)
    }

    /// Exit pass: profit target, stop loss, price-based exits, then the
    /// trade filter's signal-driven rules.
    fn update_positions(
        &mut self,
        market_data: &HashMap<Symbol, Bar>,
        predictions: &HashMap<Symbol, Prediction>,
    ) {
        let mut to_exit: Vec<(Symbol, &'static str)> = Vec::new();

        let held: Vec<Symbol> = self
            .symbols
            .iter()
            .filter(|s| self.positions.contains_key(*s))
            .cloned()
            .collect();
        for symbol in &held {
            let Some(bar) = market_data.get(symbol) else {
                continue;
            };
            let Some(prediction) = predictions.get(symbol) else {
                // Without a fresh signal only EOD and the emergency
                // stop (via the filter on later bars) can exit.
                continue;
            };
            let price = bar.close;
            let pnl_pct = self
                .positions
                .get(symbol)
                .map(|p| p.pnl_percentage(price))
                .unwrap_or(0.0);

            if self.config.exits.enable_profit_target
                && pnl_pct >= self.config.exits.profit_target_pct
            {
                to_exit.push((symbol.clone(), "ProfitTarget"));
                continue;
            }
            if self.config.exits.enable_stop_loss && pnl_pct <= -self.config.exits.stop_loss_pct {
                to_exit.push((symbol.clone(), "StopLoss"));
                continue;
            }
            if let Some(reason) = self.price_exit_reason(symbol, price) {
                to_exit.push((symbol.clone(), reason));
                continue;
            }
            if self
                .filter
                .should_exit(symbol, self.bars_seen as i64, prediction, price)
            {
                to_exit.push((symbol.clone(), "SignalExit"));
            }
        }

        for (symbol, reason) in to_exit {
            if let Some(bar) = market_data.get(&symbol) {
                let bars_held = self.filter.bars_held(&symbol);
                let pnl_pct = self
                    .positions
                    .get(&symbol)
                    .map(|p| p.pnl_percentage(bar.close))
                    .unwrap_or(0.0);
                self.exit_position(&symbol, bar.close, bar.timestamp, bar.bar_id);
                info!(
                    symbol = %symbol,
                    price = bar.close,
                    pnl_pct = pnl_pct * 100.0,
                    bars_held,
                    reason,
                    "exit"
                );
            }
        }
    }

    /// MA-crossover and trailing-stop exits. Mutates the max-profit
    /// watermark as a side effect.
    fn price_exit_reason(&mut self, symbol: &str, price: f64) -> Option<&'static str> {
        if !self.config.exits.enable_price_based_exits {
            return None;
        }
        let position = self.positions.get(symbol)?;
        let entry_price = position.entry_price;
        let profit_pct = position.pnl_percentage(price);

        let current_ma = self.exit_ma(symbol);
        let tracking = self.exit_tracking.get_mut(symbol)?;
        if profit_pct > tracking.max_profit_pct {
            tracking.max_profit_pct = profit_pct;
        }

        // Mean reversion complete: entered on one side of the MA,
        // price crossed to the other.
        if self.config.exits.exit_on_ma_crossover && tracking.entry_ma > 0.0 && current_ma > 0.0 {
            let crossed = if tracking.is_long {
                price > current_ma && entry_price < tracking.entry_ma
            } else {
                price < current_ma && entry_price > tracking.entry_ma
            };
            if crossed {
                return Some("MaCrossover");
            }
        }

        // Trailing stop keeps a fraction of the best profit seen.
        if tracking.max_profit_pct > 0.0 {
            let floor = tracking.max_profit_pct * self.config.exits.trailing_stop_percentage;
            if profit_pct < floor {
                return Some("TrailingStop");
            }
        }

        None
    }

    fn exit_ma(&self, symbol: &str) -> f64 {
        let period = self.config.exits.ma_exit_period;
        let Some(history) = self.price_history.get(symbol) else {
            return 0.0;
        };
        if period == 0 || history.len() < period {
            return 0.0;
        }
        history.iter().rev().take(period).sum::<f64>() / period as f64
    }

    fn prediction_to_probability(&self, prediction: f64) -> f64 {
        if !self.config.rotation.enable_probability_scaling {
            return prediction;
        }
        0.5 + 0.5 * (prediction * self.config.rotation.probability_scaling_factor).tanh()
    }

    /// Deterministic ranking with inverse substitution, then entries
    /// and at most one rotation.
    fn make_trades(
        &mut self,
        predictions: &HashMap<Symbol, Prediction>,
        market_data: &HashMap<Symbol, Bar>,
    ) {
        // Rank candidates in declared symbol order. A negative signal
        // on a symbol with a tabled inverse becomes a positive signal
        // on the inverse; the lexicographic-min key keeps at most one
        // side of each pair in the list.
        let mut ranked: Vec<(Symbol, f64)> = Vec::new();
        let mut processed: Vec<String> = Vec::new();
        for symbol in &self.symbols {
            let Some(prediction) = predictions.get(symbol) else {
                continue;
            };
            let mut strength = prediction.prediction;
            let mut tradeable: Symbol = symbol.clone();
            if strength < 0.0 {
                if let Some(inverse) = inverse_of(symbol) {
                    tradeable = inverse.to_string();
                    strength = -strength;
                }
            }
            let base_key = if tradeable.as_str() < symbol.as_str() {
                tradeable.clone()
            } else {
                symbol.clone()
            };
            if processed.contains(&base_key) {
                continue;
            }
            processed.push(base_key);

            if strength > self.config.rotation.min_rank_strength && strength > 0.0 {
                ranked.push((tradeable, strength));
            }
        }
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        // Periodic diagnostic while flat: why are the top candidates
        // not entering?
        if self.positions.is_empty() && self.bars_seen % 50 == 0 {
            for (symbol, strength) in ranked.iter().take(5) {
                if let Some(own) = predictions.get(symbol) {
                    let probability = self.prediction_to_probability(own.prediction);
                    debug!(
                        symbol = %symbol,
                        strength_bps = strength * 10_000.0,
                        confidence_pct = own.confidence * 100.0,
                        probability_pct = probability * 100.0,
                        passes_threshold = probability > self.config.rotation.buy_threshold,
                        passes_filter =
                            self.filter.can_enter(symbol, self.bars_seen as i64, own),
                        "trade analysis"
                    );
                }
            }
        }

        // Top candidates that clear the probability threshold and the
        // trade filter.
        let mut top_symbols: Vec<Symbol> = Vec::new();
        for (symbol, _) in &ranked {
            if top_symbols.len() >= self.config.max_positions {
                break;
            }
            let Some(own) = predictions.get(symbol) else {
                continue;
            };
            let probability = self.prediction_to_probability(own.prediction);
            if probability <= self.config.rotation.buy_threshold {
                continue;
            }
            if !self.filter.can_enter(symbol, self.bars_seen as i64, own) {
                continue;
            }
            top_symbols.push(symbol.clone());
        }

        // Fill empty slots in rank order.
        for symbol in &top_symbols {
            if self.positions.len() >= self.config.max_positions {
                break;
            }
            if self.positions.contains_key(symbol) || self.in_rotation_cooldown(symbol) {
                continue;
            }
            let Some(own) = predictions.get(symbol) else {
                continue;
            };
            self.try_enter(symbol, own, market_data, "entry");
        }

        // Rotation: replace the weakest holding with a clearly stronger
        // same-direction candidate. At most one per bar.
        if !(self.config.rotation.enable_rotation
            && self.positions.len() >= self.config.max_positions)
        {
            return;
        }
        let ranked_snapshot = ranked;
        for (candidate, candidate_strength) in &ranked_snapshot {
            if self.positions.contains_key(candidate) {
                continue;
            }
            let Some(own) = predictions.get(candidate) else {
                continue;
            };
            let probability = self.prediction_to_probability(own.prediction);
            let passes_probability = if own.prediction > 0.0 {
                probability > self.config.rotation.buy_threshold
            } else {
                probability < self.config.rotation.sell_threshold
            };
            if !passes_probability
                || !self.filter.can_enter(candidate, self.bars_seen as i64, own)
                || self.in_rotation_cooldown(candidate)
            {
                continue;
            }

            let Some(weakest) = self.find_weakest_position(predictions) else {
                break;
            };
            let Some(weakest_pred) = predictions.get(&weakest).map(|p| p.prediction) else {
                break;
            };
            let weakest_strength = weakest_pred.abs();

            // Opposite-sign transitions are reversals, not rotations;
            // they must flow through exit and a later re-entry.
            let same_direction = (weakest_pred > 0.0 && own.prediction > 0.0)
                || (weakest_pred < 0.0 && own.prediction < 0.0);
            if !same_direction {
                continue;
            }

            let strength_delta = candidate_strength - weakest_strength;
            if strength_delta < self.config.rotation.rotation_strength_delta {
                // Ranked is sorted; nothing further can qualify.
                break;
            }

            let Some(weakest_bar) = market_data.get(&weakest) else {
                break;
            };
            info!(
                out = %weakest,
                out_strength_bps = weakest_strength * 10_000.0,
                candidate = %candidate,
                candidate_strength_bps = candidate_strength * 10_000.0,
                delta_bps = strength_delta * 10_000.0,
                "rotation"
            );
            self.exit_position(
                &weakest,
                weakest_bar.close,
                weakest_bar.timestamp,
                weakest_bar.bar_id,
            );
            self.rotation_cooldowns
                .insert(weakest.clone(), self.config.rotation.rotation_cooldown_bars);

            self.try_enter(candidate, own, market_data, "rotation entry");
            break;
        }
    }

    fn try_enter(
        &mut self,
        symbol: &str,
        prediction: &Prediction,
        market_data: &HashMap<Symbol, Bar>,
        kind: &'static str,
    ) -> bool {
        let Some(bar) = market_data.get(symbol) else {
            return false;
        };
        if !self.is_position_compatible(symbol) {
            return false;
        }

        let closes: Vec<f64> = self
            .price_history
            .get(symbol)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default();
        let recent_pnls: Vec<f64> = self
            .trade_history
            .get(symbol)
            .map(|h| h.to_vec())
            .unwrap_or_default();

        let mut size = sizing::position_size(
            &self.config.sizing,
            prediction.confidence,
            prediction.prediction.abs(),
            self.cash,
            &closes,
            &recent_pnls,
        );
        let available = self.cash * AVAILABLE_CASH_FRACTION;
        if size > available {
            size = available;
        }
        if size <= MIN_TICKET {
            return false;
        }

        if self.enter_position(symbol, bar.close, bar.timestamp, size, bar.bar_id) {
            self.filter.record_entry(
                symbol,
                self.bars_seen as i64,
                prediction.prediction,
                bar.close,
            );
            info!(
                symbol = %symbol,
                price = bar.close,
                prediction_bps = prediction.prediction * 10_000.0,
                confidence_pct = prediction.confidence * 100.0,
                kind,
                "entry"
            );
            true
        } else {
            false
        }
    }

    /// Refuse an entry whose inverse is already held.
    fn is_position_compatible(&self, new_symbol: &str) -> bool {
        for held in self.positions.keys() {
            if let Some(inverse) = inverse_of(held) {
                if inverse == new_symbol {
                    warn!(
                        blocked = %new_symbol,
                        held = %held,
                        "position blocked: inverse of an existing holding"
                    );
                    return false;
                }
            }
        }
        true
    }

    /// Weakest holding by |prediction|, ties broken by ascending
    /// symbol.
    fn find_weakest_position(&self, predictions: &HashMap<Symbol, Prediction>) -> Option<Symbol> {
        let mut candidates: Vec<(f64, &Symbol)> = self
            .positions
            .keys()
            .filter_map(|s| predictions.get(s).map(|p| (p.prediction.abs(), s)))
            .collect();
        candidates.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(b.1))
        });
        candidates.first().map(|(_, s)| (*s).clone())
    }

    fn enter_position(
        &mut self,
        symbol: &str,
        price: f64,
        time: DateTime<Utc>,
        capital: f64,
        bar_id: u64,
    ) -> bool {
        let capital = capital.min(self.cash);
        let shares = (capital / price).floor() as i64;
        if shares <= 0 {
            return false;
        }
        let cost = shares as f64 * price;
        if cost > self.cash {
            return false;
        }

        // Zero-commission structure: nothing is charged on the buy
        // side, but the expected sell-side cost is snapshotted now.
        let estimated_exit_costs = if self.config.costs.enable_cost_tracking {
            let ctx = self.market_context.get(symbol);
            self.cost_model.trade_cost(
                symbol,
                price,
                shares,
                false,
                ctx.map(|c| c.avg_daily_volume)
                    .unwrap_or(self.config.costs.default_avg_volume),
                ctx.map(|c| c.current_volatility)
                    .unwrap_or(self.config.costs.default_volatility),
                ctx.map(|c| c.minutes_from_open).unwrap_or(30),
                false,
            )
        } else {
            TradeCosts::default()
        };

        self.positions.insert(
            symbol.to_string(),
            Position {
                shares,
                entry_price: price,
                entry_time: time,
                entry_bar_id: bar_id,
                entry_costs: TradeCosts::default(),
                estimated_exit_costs,
                accumulated_borrow_costs: 0.0,
            },
        );
        self.cash -= cost;

        if self.config.exits.enable_price_based_exits {
            self.exit_tracking.insert(
                symbol.to_string(),
                ExitTracking {
                    entry_ma: self.exit_ma(symbol),
                    max_profit_pct: 0.0,
                    is_long: shares > 0,
                },
            );
        }
        true
    }

    fn exit_position(
        &mut self,
        symbol: &str,
        price: f64,
        time: DateTime<Utc>,
        bar_id: u64,
    ) -> f64 {
        let Some(position) = self.positions.remove(symbol) else {
            return 0.0;
        };

        let exit_costs = if self.config.costs.enable_cost_tracking {
            let ctx = self.market_context.get(symbol);
            self.cost_model.trade_cost(
                symbol,
                price,
                position.shares,
                false,
                ctx.map(|c| c.avg_daily_volume)
                    .unwrap_or(self.config.costs.default_avg_volume),
                ctx.map(|c| c.current_volatility)
                    .unwrap_or(self.config.costs.default_volatility),
                ctx.map(|c| c.minutes_from_open).unwrap_or(30),
                false,
            )
        } else {
            TradeCosts::default()
        };

        let proceeds = position.shares as f64 * price - exit_costs.total_cost;
        let gross_pnl = position.unrealized_pnl(price);
        let net_pnl = gross_pnl - exit_costs.total_cost - position.accumulated_borrow_costs;
        let entry_notional = position.shares as f64 * position.entry_price;
        let pnl_pct = if entry_notional.abs() > 1e-10 {
            net_pnl / entry_notional
        } else {
            0.0
        };

        let trade = TradeRecord {
            symbol: symbol.to_string(),
            shares: position.shares,
            entry_price: position.entry_price,
            exit_price: price,
            entry_time: position.entry_time,
            exit_time: time,
            entry_bar_id: position.entry_bar_id,
            exit_bar_id: bar_id,
            exit_bar_index: self.bars_seen,
            pnl: net_pnl,
            pnl_pct,
        };

        if let Some(history) = self.trade_history.get_mut(symbol) {
            history.push(net_pnl);
        }
        self.push_trade_log(trade);

        if net_pnl > 0.0 {
            self.daily_winning_trades += 1;
        } else if net_pnl < 0.0 {
            self.daily_losing_trades += 1;
        }

        self.cash += proceeds;
        self.total_transaction_costs += exit_costs.total_cost;
        self.total_trades += 1;
        self.exit_tracking.remove(symbol);
        self.filter.record_exit(symbol, self.bars_seen as i64);

        net_pnl
    }

    fn push_trade_log(&mut self, trade: TradeRecord) {
        self.trade_log.push(trade);
        // Evict the oldest half when the log hits capacity.
        if self.trade_log.len() > self.config.trade_log_capacity {
            let drop = self.config.trade_log_capacity / 2;
            self.trade_log.drain(..drop);
        }
    }

    fn liquidate_all(&mut self, market_data: &HashMap<Symbol, Bar>, reason: &str) {
        let held: Vec<Symbol> = self
            .symbols
            .iter()
            .filter(|s| self.positions.contains_key(*s))
            .cloned()
            .collect();
        for symbol in held {
            if let Some(bar) = market_data.get(&symbol) {
                let pnl = self.exit_position(&symbol, bar.close, bar.timestamp, bar.bar_id);
                info!(symbol = %symbol, price = bar.close, pnl, reason, "liquidation exit");
            }
        }
    }

    fn handle_end_of_day(&mut self, market_data: &HashMap<Symbol, Bar>) {
        if !self.config.eod_liquidation {
            return;
        }
        let Some(reference) = self.symbols.iter().find_map(|s| market_data.get(s)) else {
            return;
        };
        let ts = reference.timestamp;
        if !self.clock.is_end_of_day(ts) {
            return;
        }
        let date = self.clock.trading_date(ts);
        if date == self.last_eod_date {
            return;
        }
        self.last_eod_date = date;

        self.liquidate_all(market_data, "EOD");

        let end_equity = self.equity(market_data);
        let daily_return = if self.daily_start_equity > 0.0 {
            (end_equity - self.daily_start_equity) / self.daily_start_equity
        } else {
            0.0
        };
        let day_number = self.bars_seen.saturating_sub(1) / self.config.bars_per_day;
        let daily = DailyResult {
            day_number,
            start_equity: self.daily_start_equity,
            end_equity,
            daily_return,
            trades: self.total_trades - self.daily_start_trades,
            winning_trades: self.daily_winning_trades,
            losing_trades: self.daily_losing_trades,
        };
        info!(
            day = day_number,
            end_equity,
            return_pct = daily_return * 100.0,
            trades = daily.trades,
            wins = daily.winning_trades,
            losses = daily.losing_trades,
            "end of day"
        );
        self.daily_results.push(daily);

        self.daily_start_equity = end_equity;
        self.daily_start_trades = self.total_trades;
        self.daily_winning_trades = 0;
        self.daily_losing_trades = 0;

        self.filter.reset_daily_limits(self.bars_seen as i64);
    }

    fn check_invariants(&self) -> Result<(), EngineError> {
        if self.cash < 0.0 {
            return Err(EngineError::InvariantBreach(format!(
                "cash is negative: {:.2}",
                self.cash
            )));
        }
        if self.positions.len() > self.config.max_positions {
            return Err(EngineError::InvariantBreach(format!(
                "{} positions exceed the limit of {}",
                self.positions.len(),
                self.config.max_positions
            )));
        }
        for held in self.positions.keys() {
            if let Some(inverse) = inverse_of(held) {
                if self.positions.contains_key(inverse) {
                    return Err(EngineError::InvariantBreach(format!(
                        "inverse pair co-held: {held} and {inverse}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Cash plus marked-to-market position value.
    pub fn equity(&self, market_data: &HashMap<Symbol, Bar>) -> f64 {
        let mut equity = self.cash;
        for (symbol, position) in &self.positions {
            let price = market_data
                .get(symbol)
                .map(|b| b.close)
                .or_else(|| self.price_history.get(symbol).and_then(|h| h.back().copied()))
                .unwrap_or(position.entry_price);
            equity += position.market_value(price);
        }
        equity
    }

    /// Terminal results over the test window.
    pub fn results(&self) -> BacktestResults {
        let final_equity = {
            let mut equity = self.cash;
            for (symbol, position) in &self.positions {
                let price = self
                    .price_history
                    .get(symbol)
                    .and_then(|h| h.back().copied())
                    .unwrap_or(position.entry_price);
                equity += position.market_value(price);
            }
            equity
        };
        compute_results(ResultsInput {
            trades: &self.trade_log,
            daily: &self.daily_results,
            initial_capital: self.config.initial_capital,
            final_equity,
            total_transaction_costs: self.total_transaction_costs,
            lifetime_trades: self.total_trades,
            test_day_start_bar: self.test_day_start_bar,
            bars_per_day: self.config.bars_per_day,
        })
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn positions(&self) -> &HashMap<Symbol, Position> {
        &self.positions
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trade_log
    }

    pub fn daily_results(&self) -> &[DailyResult] {
        &self.daily_results
    }

    pub fn phase(&self) -> TradingPhase {
        self.phase
    }

    pub fn bars_seen(&self) -> usize {
        self.bars_seen
    }

    pub fn config(&self) -> &TradingConfig {
        &self.config
    }

    pub fn rotation_cooldown(&self, symbol: &str) -> usize {
        self.rotation_cooldowns.get(symbol).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_table_is_bidirectional() {
        assert_eq!(inverse_of("TQQQ"), Some("SQQQ"));
        assert_eq!(inverse_of("SQQQ"), Some("TQQQ"));
        assert_eq!(inverse_of("FAS"), Some("FAZ"));
        assert_eq!(inverse_of("SPY"), None);
    }

    #[test]
    fn position_pnl_math() {
        let position = Position {
            shares: 100,
            entry_price: 50.0,
            entry_time: Utc::now(),
            entry_bar_id: 0,
            entry_costs: TradeCosts::default(),
            estimated_exit_costs: TradeCosts::default(),
            accumulated_borrow_costs: 0.0,
        };
        assert_eq!(position.unrealized_pnl(51.0), 100.0);
        assert!((position.pnl_percentage(51.0) - 0.02).abs() < 1e-12);
        assert_eq!(position.market_value(51.0), 5_100.0);
        assert!(position.is_long());
    }
}

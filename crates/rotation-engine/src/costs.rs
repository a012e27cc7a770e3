//! Execution cost model for zero-commission US equity trading.
//!
//! Components: regulatory fees on the sell side (SEC notional fee,
//! FINRA TAF per share with a cap), slippage scaled by order size and
//! volatility, a square-root market-impact model that only engages for
//! large orders, and daily borrow for short sales. The model is pure;
//! the borrow-rate table is injected at construction so concurrent
//! runs cannot interfere.

use std::collections::HashMap;

use rotation_core::Symbol;
use serde::{Deserialize, Serialize};

/// Fee constants (2024 schedules).
pub mod fees {
    /// SEC fee rate on sell notional ($27.80 per $1M).
    pub const SEC_FEE_RATE: f64 = 0.0000278;
    /// FINRA trading activity fee per share sold.
    pub const FINRA_TAF: f64 = 0.000145;
    /// FINRA TAF cap per trade.
    pub const FINRA_TAF_MAX: f64 = 7.27;
    /// Broker commission.
    pub const COMMISSION: f64 = 0.0;
    /// Default annualized borrow rate for shorts.
    pub const DEFAULT_BORROW_RATE: f64 = 0.005;
}

/// Slippage parameters; the defaults model liquid leveraged ETFs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlippageModel {
    /// Base slippage in basis points (half a liquid spread).
    pub base_slippage_bps: f64,
    /// Extra bps per 1% of ADV once the order exceeds 0.1% ADV.
    pub size_impact_factor: f64,
    /// Cap on the volatility multiplier.
    pub volatility_multiplier_cap: f64,
    /// Time-of-day factor (kept at 1.0; smart routing keeps spreads
    /// tight all session).
    pub time_of_day_factor: f64,
}

impl Default for SlippageModel {
    fn default() -> Self {
        Self {
            base_slippage_bps: 0.5,
            size_impact_factor: 0.1,
            volatility_multiplier_cap: 1.5,
            time_of_day_factor: 1.0,
        }
    }
}

/// Cost breakdown for one execution.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TradeCosts {
    pub sec_fee: f64,
    pub finra_taf: f64,
    pub commission: f64,
    pub slippage: f64,
    pub market_impact: f64,
    pub short_borrow_cost: f64,
    pub total_cost: f64,
}

/// Pure execution-cost calculator with per-symbol borrow overrides.
#[derive(Debug, Clone, Default)]
pub struct CostModel {
    borrow_rates: HashMap<Symbol, f64>,
    slippage: SlippageModel,
}

impl CostModel {
    pub fn new(borrow_rates: HashMap<Symbol, f64>) -> Self {
        Self {
            borrow_rates,
            slippage: SlippageModel::default(),
        }
    }

    pub fn with_slippage_model(mut self, slippage: SlippageModel) -> Self {
        self.slippage = slippage;
        self
    }

    pub fn set_borrow_rate(&mut self, symbol: &str, annual_rate: f64) {
        self.borrow_rates.insert(symbol.to_string(), annual_rate);
    }

    /// Annualized borrow rate for a symbol; 0.5% unless overridden.
    pub fn borrow_rate(&self, symbol: &str) -> f64 {
        self.borrow_rates
            .get(symbol)
            .copied()
            .unwrap_or(fees::DEFAULT_BORROW_RATE)
    }

    /// Total execution cost for a single fill.
    #[allow(clippy::too_many_arguments)]
    pub fn trade_cost(
        &self,
        symbol: &str,
        price: f64,
        shares: i64,
        is_buy: bool,
        avg_daily_volume: f64,
        volatility: f64,
        _minutes_from_open: i32,
        is_short_sale: bool,
    ) -> TradeCosts {
        let shares_f = shares.abs() as f64;
        let notional = price * shares_f;
        let mut costs = TradeCosts {
            commission: fees::COMMISSION,
            ..TradeCosts::default()
        };

        // Regulatory fees apply to sells only.
        if !is_buy {
            costs.sec_fee = notional * fees::SEC_FEE_RATE;
            costs.finra_taf = (shares_f * fees::FINRA_TAF).min(fees::FINRA_TAF_MAX);
        }

        costs.slippage = self.slippage_cost(price, shares_f, avg_daily_volume, volatility);
        costs.market_impact = market_impact(price, shares_f, avg_daily_volume, is_buy);

        // Daily carry for opening a short.
        if is_short_sale && !is_buy {
            costs.short_borrow_cost = notional * self.borrow_rate(symbol) / 252.0;
        }

        costs.total_cost = costs.sec_fee
            + costs.finra_taf
            + costs.commission
            + costs.slippage
            + costs.market_impact
            + costs.short_borrow_cost;
        costs
    }

    fn slippage_cost(&self, price: f64, shares: f64, adv: f64, volatility: f64) -> f64 {
        let base_per_share = price * self.slippage.base_slippage_bps / 10_000.0;

        // Size impact engages above 0.1% of ADV.
        let size_pct = if adv > 0.0 { shares / adv } else { 0.0 };
        let size_per_share = if size_pct > 0.001 {
            price * (size_pct * 100.0 * self.slippage.size_impact_factor) / 10_000.0
        } else {
            0.0
        };

        // Small volatility bump only above 5% daily vol, capped.
        let vol_adjustment = if volatility > 0.05 {
            (1.0 + (volatility - 0.05) * 0.5).min(self.slippage.volatility_multiplier_cap)
        } else {
            1.0
        }
        .max(1.0);

        (base_per_share + size_per_share)
            * vol_adjustment
            * self.slippage.time_of_day_factor
            * shares
    }
}

/// True when a symbol trades enough volume to rotate through.
pub fn is_liquid(avg_daily_volume: f64, min_volume: f64) -> bool {
    avg_daily_volume >= min_volume
}

/// True outside the first/last `buffer_minutes` of the 390-minute
/// session, where spreads widen.
pub fn is_good_time_to_trade(minutes_from_open: i32, buffer_minutes: i32) -> bool {
    minutes_from_open >= buffer_minutes && minutes_from_open <= 390 - buffer_minutes
}

/// Split a large order into chunks of at most `max_pct_adv` of ADV
/// each, to keep per-fill market impact negligible.
pub fn split_order(total_shares: i64, avg_daily_volume: f64, max_pct_adv: f64) -> Vec<i64> {
    let mut chunks = Vec::new();
    if total_shares <= 0 {
        return chunks;
    }
    let max_chunk = ((avg_daily_volume * max_pct_adv) as i64).max(1);
    let mut remaining = total_shares;
    while remaining > 0 {
        let chunk = remaining.min(max_chunk);
        chunks.push(chunk);
        remaining -= chunk;
    }
    chunks
}

/// Square-root market impact; negligible below $100k notional or 1%
/// ADV participation.
fn market_impact(price: f64, shares: f64, adv: f64, is_buy: bool) -> f64 {
    let notional = price * shares;
    let size_pct = if adv > 0.0 { shares / adv } else { 0.0 };

    if notional < 100_000.0 || size_pct < 0.01 {
        return 0.0;
    }

    let temp_bps = 1.0 * (size_pct * 100.0).sqrt();
    let perm_bps = 0.5 * size_pct * 100.0;
    let direction = if is_buy { 1.0 } else { 0.8 };

    notional * ((temp_bps + perm_bps) / 10_000.0) * direction
}

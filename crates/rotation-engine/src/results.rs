//! Backtest result aggregation.

use rotation_core::{DailyResult, TradeRecord};
use serde::{Deserialize, Serialize};

/// Profit factor reported when there are wins but no losses.
const LOSSLESS_PROFIT_FACTOR: f64 = 999.0;

/// Terminal summary of a run, restricted to the test window (trades
/// whose exit falls at or after `test_day_start_bar`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestResults {
    pub total_return: f64,
    /// Mean return per day over the recorded test days.
    pub mrd: f64,
    pub final_equity: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    /// Not yet tracked; reported as 0.
    pub max_drawdown: f64,
    pub total_transaction_costs: f64,
    pub avg_cost_per_trade: f64,
    pub cost_as_pct_of_volume: f64,
    pub net_return_after_costs: f64,
    pub daily_breakdown: Vec<DailyResult>,
}

/// Inputs the trader hands to the aggregation.
pub struct ResultsInput<'a> {
    pub trades: &'a [TradeRecord],
    pub daily: &'a [DailyResult],
    pub initial_capital: f64,
    pub final_equity: f64,
    pub total_transaction_costs: f64,
    /// All-time closed-trade count (the log may have evicted entries).
    pub lifetime_trades: usize,
    pub test_day_start_bar: usize,
    pub bars_per_day: usize,
}

pub fn compute_results(input: ResultsInput<'_>) -> BacktestResults {
    let test_trades: Vec<&TradeRecord> = input
        .trades
        .iter()
        .filter(|t| t.exit_bar_index >= input.test_day_start_bar)
        .collect();

    let mut winning = 0_usize;
    let mut losing = 0_usize;
    let mut gross_profit = 0.0;
    let mut gross_loss = 0.0;
    let mut volume = 0.0;
    for trade in &test_trades {
        if trade.is_win() {
            winning += 1;
            gross_profit += trade.pnl;
        } else if trade.is_loss() {
            losing += 1;
            gross_loss += trade.pnl.abs();
        }
        let shares = trade.shares.abs() as f64;
        volume += shares * trade.entry_price + shares * trade.exit_price;
    }

    let total = test_trades.len();
    let total_return = if input.initial_capital > 0.0 {
        (input.final_equity - input.initial_capital) / input.initial_capital
    } else {
        0.0
    };

    // Day breakdown restricted to the test window.
    let first_test_day = if input.bars_per_day > 0 {
        input.test_day_start_bar / input.bars_per_day
    } else {
        0
    };
    let daily_breakdown: Vec<DailyResult> = input
        .daily
        .iter()
        .filter(|d| d.day_number >= first_test_day)
        .cloned()
        .collect();
    let mrd = if daily_breakdown.is_empty() {
        total_return
    } else {
        daily_breakdown.iter().map(|d| d.daily_return).sum::<f64>() / daily_breakdown.len() as f64
    };

    // Costs cannot be attributed per bar after the fact; prorate by the
    // share of lifetime trades that fall in the test window.
    let cost_ratio = if input.lifetime_trades > 0 {
        total as f64 / input.lifetime_trades as f64
    } else {
        0.0
    };
    let test_costs = input.total_transaction_costs * cost_ratio;

    BacktestResults {
        total_return,
        mrd,
        final_equity: input.final_equity,
        total_trades: total,
        winning_trades: winning,
        losing_trades: losing,
        win_rate: if total > 0 {
            winning as f64 / total as f64
        } else {
            0.0
        },
        avg_win: if winning > 0 {
            gross_profit / winning as f64
        } else {
            0.0
        },
        avg_loss: if losing > 0 {
            gross_loss / losing as f64
        } else {
            0.0
        },
        profit_factor: if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            LOSSLESS_PROFIT_FACTOR
        } else {
            0.0
        },
        max_drawdown: 0.0,
        total_transaction_costs: test_costs,
        avg_cost_per_trade: if total > 0 { test_costs / total as f64 } else { 0.0 },
        cost_as_pct_of_volume: if volume > 0.0 {
            test_costs / volume * 100.0
        } else {
            0.0
        },
        net_return_after_costs: total_return,
        daily_breakdown,
    }
}

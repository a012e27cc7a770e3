//! End-to-end scenarios for the rotation trader.
//!
//! All scenarios run SIGOR (live from bar one) against a fixed-offset
//! clock pinned to a winter New York session, so minute 389 of each
//! day is 15:59 ET.

use std::collections::HashMap;

use rotation_core::Bar;

use crate::clock::FixedOffsetClock;
use crate::config::{StrategyKind, TradingConfig};
use crate::trader::{inverse_of, RotationTrader, TradingPhase};

/// 2024-01-08 09:30 ET (14:30 UTC), a Monday in EST.
const OPEN_MS: i64 = 1_704_724_200_000;
const MS_PER_DAY: i64 = 86_400_000;

fn ts(day: i64, minute: i64) -> i64 {
    OPEN_MS + day * MS_PER_DAY + minute * 60_000
}

/// A motionless bar at the given price.
fn calm_bar(symbol: &str, day: i64, minute: i64, close: f64) -> Bar {
    Bar::new(ts(day, minute), symbol, close, close, close, close, 1_000_000)
}

/// A strong up-bar on surging volume: open well below close, breaking
/// the opening range.
fn surge_bar(symbol: &str, day: i64, minute: i64, close: f64) -> Bar {
    Bar::new(
        ts(day, minute),
        symbol,
        close - 1.5,
        close + 0.2,
        close - 1.7,
        close,
        3_000_000,
    )
}

/// A gently rising bar, enough to keep the ensemble mildly bullish.
fn drift_bar(symbol: &str, day: i64, minute: i64, close: f64) -> Bar {
    Bar::new(
        ts(day, minute),
        symbol,
        close - 0.05,
        close + 0.1,
        close - 0.1,
        close,
        1_200_000,
    )
}

fn snap(bars: Vec<Bar>) -> HashMap<String, Bar> {
    bars.into_iter().map(|b| (b.symbol.clone(), b)).collect()
}

fn trader(symbols: &[&str], config: TradingConfig) -> RotationTrader {
    RotationTrader::with_clock(
        symbols.iter().map(|s| s.to_string()).collect(),
        config,
        Box::new(FixedOffsetClock::new(-5)),
    )
    .unwrap()
}

/// Feed `count` flat warmup bars to every symbol, starting at `minute`.
fn warm_up(t: &mut RotationTrader, symbols: &[&str], day: i64, minute: i64, count: i64) {
    for i in 0..count {
        let bars = symbols
            .iter()
            .map(|s| calm_bar(s, day, minute + i, 100.0))
            .collect();
        t.on_bar(&snap(bars)).unwrap();
    }
}

// ============================================================================
// Scenario 1: warmup only, no signals or trades for the first 50 bars
// ============================================================================

#[test]
fn warmup_produces_no_trades() {
    let mut t = trader(&["TQQQ"], TradingConfig::default());
    warm_up(&mut t, &["TQQQ"], 0, 0, 50);
    assert!(t.positions().is_empty());
    assert!(t.trades().is_empty());
    assert_eq!(t.bars_seen(), 50);
    assert_eq!(t.cash(), 100_000.0);
}

// ============================================================================
// Scenario 2: single deterministic entry on a breakout
// ============================================================================

#[test]
fn breakout_triggers_exactly_one_entry() {
    let mut config = TradingConfig::default();
    // The rally would trip the +3% target; keep the position open so
    // the entry count is the only thing under test.
    config.exits.enable_profit_target = false;
    config.exits.enable_stop_loss = false;
    let mut t = trader(&["TQQQ"], config);
    warm_up(&mut t, &["TQQQ"], 0, 0, 50);

    // Five consecutive strong up-bars; every filter passes on the
    // first of them and the open position blocks the rest.
    for i in 0..5 {
        let close = 102.5 + i as f64 * 1.5;
        t.on_bar(&snap(vec![surge_bar("TQQQ", 0, 50 + i, close)]))
            .unwrap();
    }

    assert_eq!(t.positions().len(), 1);
    let position = &t.positions()["TQQQ"];
    // Entered on the first breakout bar.
    assert_eq!(position.entry_price, 102.5);
    // Never more than 95% of capital deployed.
    assert!(position.shares as f64 * position.entry_price <= 0.95 * 100_000.0);
    assert!(position.shares > 0);
    // Still open, so the closed-trade log is empty.
    assert!(t.trades().is_empty());
    assert!(t.cash() >= 0.0);
}

// ============================================================================
// Scenario 3: inverse blocking, SQQQ refused while TQQQ is held
// ============================================================================

#[test]
fn inverse_position_is_blocked() {
    let symbols = ["TQQQ", "SQQQ"];
    let mut t = trader(&symbols, TradingConfig::default());
    warm_up(&mut t, &symbols, 0, 0, 50);

    // TQQQ breaks out alone and is entered.
    t.on_bar(&snap(vec![
        surge_bar("TQQQ", 0, 50, 102.5),
        calm_bar("SQQQ", 0, 50, 100.0),
    ]))
    .unwrap();
    assert!(t.positions().contains_key("TQQQ"));

    // While TQQQ is held, SQQQ turns strongly bullish. The ranking may
    // nominate it but the compatibility check must refuse.
    for i in 0..5 {
        let close = 102.5 + i as f64 * 1.5;
        t.on_bar(&snap(vec![
            calm_bar("TQQQ", 0, 51 + i, 102.5),
            surge_bar("SQQQ", 0, 51 + i, close),
        ]))
        .unwrap();
        assert!(
            !t.positions().contains_key("SQQQ"),
            "inverse entered at bar {}",
            t.bars_seen()
        );
    }
    assert!(t.positions().contains_key("TQQQ"));
}

// ============================================================================
// Scenario 4: rotation into a clearly stronger same-direction signal
// ============================================================================

fn rotation_scenario(strength_delta: f64) -> RotationTrader {
    let symbols = ["SSO", "TNA", "TQQQ"];
    let mut config = TradingConfig::default();
    config.max_positions = 2;
    config.rotation.rotation_strength_delta = strength_delta;
    let mut t = trader(&symbols, config);
    warm_up(&mut t, &symbols, 0, 0, 50);

    // TQQQ and SSO drift up and get entered; TNA stays flat.
    for i in 0..3 {
        let close = 100.0 + (i + 1) as f64 * 0.3;
        t.on_bar(&snap(vec![
            drift_bar("SSO", 0, 50 + i, close),
            drift_bar("TQQQ", 0, 50 + i, close),
            calm_bar("TNA", 0, 50 + i, 100.0),
        ]))
        .unwrap();
    }
    assert!(t.positions().contains_key("TQQQ"));
    assert!(t.positions().contains_key("SSO"));

    // TNA explodes while the holdings fade (still positive, still
    // same-direction, just clearly weaker). Three bars keep TNA under
    // the +3% profit target after the rotation.
    for i in 0..3 {
        let held_close = 100.9 - (i + 1) as f64 * 0.05;
        let tna_close = 102.5 + i as f64 * 1.5;
        t.on_bar(&snap(vec![
            calm_bar("SSO", 0, 53 + i, held_close),
            calm_bar("TQQQ", 0, 53 + i, held_close),
            surge_bar("TNA", 0, 53 + i, tna_close),
        ]))
        .unwrap();
    }
    t
}

#[test]
fn rotation_replaces_weakest_position() {
    let t = rotation_scenario(0.002);

    assert!(t.positions().contains_key("TNA"), "TNA was not rotated in");
    assert_eq!(t.positions().len(), 2);
    // SSO and TQQQ carried identical signals; the ascending-symbol
    // tie-break makes SSO the weakest.
    assert_eq!(t.trades().len(), 1);
    assert_eq!(t.trades()[0].symbol, "SSO");
    assert!(t.rotation_cooldown("SSO") > 0);
    assert!(t.positions().contains_key("TQQQ"));
}

#[test]
fn rotation_requires_sufficient_delta() {
    // With an implausibly large required improvement, nothing rotates.
    let t = rotation_scenario(0.08);
    assert!(!t.positions().contains_key("TNA"));
    assert!(t.trades().is_empty());
    assert_eq!(t.rotation_cooldown("SSO"), 0);
}

// ============================================================================
// Scenario 5: EOD liquidation, daily snapshot, next-day re-entry
// ============================================================================

#[test]
fn eod_liquidates_and_resets_for_next_day() {
    let mut config = TradingConfig::default();
    // Keep the position alive all session: no hold-time or P&L exits.
    config.filter.max_bars_to_hold = 1_000;
    config.filter.typical_hold_period = 500;
    config.exits.enable_profit_target = false;
    config.exits.enable_stop_loss = false;
    let mut t = trader(&["TQQQ"], config);
    warm_up(&mut t, &["TQQQ"], 0, 0, 50);

    // One breakout bar opens the position...
    t.on_bar(&snap(vec![surge_bar("TQQQ", 0, 50, 102.5)])).unwrap();
    assert_eq!(t.positions().len(), 1);

    // ...then the tape goes quiet until the liquidation minute.
    for minute in 51..389 {
        t.on_bar(&snap(vec![calm_bar("TQQQ", 0, minute, 102.5)]))
            .unwrap();
        assert_eq!(t.positions().len(), 1, "exited early at minute {minute}");
    }

    // 15:59 ET: liquidate and snapshot the day.
    t.on_bar(&snap(vec![calm_bar("TQQQ", 0, 389, 102.5)])).unwrap();
    assert!(t.positions().is_empty());
    assert_eq!(t.daily_results().len(), 1);
    assert_eq!(t.trades().len(), 1);
    let day = &t.daily_results()[0];
    assert_eq!(day.day_number, 0);
    assert_eq!(day.trades, 1);

    // A 16:00 tick the same day must not reopen anything (and must not
    // record a second day).
    t.on_bar(&snap(vec![surge_bar("TQQQ", 0, 390, 104.0)])).unwrap();
    assert!(t.positions().is_empty());
    assert_eq!(t.daily_results().len(), 1);

    // Day D+1: flat through the cooldown, then a fresh breakout is
    // admissible again.
    for minute in 0..6 {
        t.on_bar(&snap(vec![calm_bar("TQQQ", 1, minute, 102.5)]))
            .unwrap();
    }
    let mut entered = false;
    for i in 0..5 {
        let close = 105.0 + i as f64 * 1.5;
        t.on_bar(&snap(vec![surge_bar("TQQQ", 1, 6 + i, close)]))
            .unwrap();
        if !t.positions().is_empty() {
            entered = true;
            break;
        }
    }
    assert!(entered, "no re-entry on day D+1");
}

// ============================================================================
// Scenario 6: emergency stop overrides the minimum hold
// ============================================================================

#[test]
fn emergency_stop_overrides_min_hold() {
    let mut config = TradingConfig::default();
    // Keep the trader-level stop out of the way; the filter's -1%
    // emergency stop should fire first.
    config.exits.enable_stop_loss = false;
    config.exits.enable_profit_target = false;
    assert!(config.filter.min_bars_to_hold >= 3);
    let mut t = trader(&["TQQQ"], config);
    warm_up(&mut t, &["TQQQ"], 0, 0, 50);

    t.on_bar(&snap(vec![surge_bar("TQQQ", 0, 50, 102.5)])).unwrap();
    assert_eq!(t.positions().len(), 1);

    // Three declining bars: -0.4%, -0.9%, -1.3% from entry.
    for (i, close) in [102.1, 101.6, 101.2].iter().enumerate() {
        t.on_bar(&snap(vec![calm_bar("TQQQ", 0, 51 + i as i64, *close)]))
            .unwrap();
    }

    assert!(t.positions().is_empty(), "emergency stop did not fire");
    assert_eq!(t.trades().len(), 1);
    let trade = &t.trades()[0];
    assert!(trade.pnl < 0.0);
    // Exit happened inside the minimum hold window.
    assert!(trade.exit_bar_index < 51 + 10);
}

// ============================================================================
// Cross-cutting invariants
// ============================================================================

#[test]
fn invariants_hold_after_every_tick() {
    let symbols = ["SSO", "TNA", "TQQQ", "SQQQ"];
    let mut config = TradingConfig::default();
    config.max_positions = 2;
    let mut t = trader(&symbols, config);

    for i in 0..200 {
        let bars = symbols
            .iter()
            .enumerate()
            .map(|(k, s)| {
                let wave = ((i as f64) * 0.11 + k as f64).sin() * 2.0;
                drift_bar(s, 0, i, 100.0 + wave)
            })
            .collect();
        t.on_bar(&snap(bars)).unwrap();

        assert!(t.cash() >= 0.0);
        assert!(t.positions().len() <= 2);
        for held in t.positions().keys() {
            if let Some(inverse) = inverse_of(held) {
                assert!(
                    !t.positions().contains_key(inverse),
                    "inverse pair co-held: {held} / {inverse}"
                );
            }
        }
    }
}

#[test]
fn identical_inputs_produce_identical_trade_streams() {
    let run = || {
        let symbols = ["SSO", "TNA", "TQQQ"];
        let mut config = TradingConfig::default();
        config.max_positions = 2;
        let mut t = trader(&symbols, config);
        warm_up(&mut t, &symbols, 0, 0, 50);
        for i in 0..120 {
            let bars = symbols
                .iter()
                .enumerate()
                .map(|(k, s)| {
                    let close = 100.0 + ((i as f64) * 0.13 + k as f64 * 0.7).sin() * 3.0;
                    drift_bar(s, 0, 50 + i, close)
                })
                .collect();
            t.on_bar(&snap(bars)).unwrap();
        }
        t.trades()
            .iter()
            .map(|tr| {
                (
                    tr.symbol.clone(),
                    tr.shares,
                    tr.entry_bar_id,
                    tr.exit_bar_id,
                    tr.pnl.to_bits(),
                )
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

#[test]
fn ewrls_warmup_phases_gate_entries() {
    let mut config = TradingConfig::default();
    config.strategy = StrategyKind::Ewrls;
    let mut t = trader(&["TQQQ"], config);
    assert_eq!(t.phase(), TradingPhase::Observation);

    // A full day of bars never leaves the observation phase (two
    // observation days are configured), so nothing is ever entered no
    // matter what the model thinks.
    for i in 0..200 {
        let close = 100.0 + (i as f64 * 0.17).sin() * 2.0;
        t.on_bar(&snap(vec![drift_bar("TQQQ", 0, i, close)]))
            .unwrap();
    }
    assert_eq!(t.phase(), TradingPhase::Observation);
    assert!(t.positions().is_empty());
    assert!(t.trades().is_empty());

    // Disabling warmup puts the EWRLS path live from bar one.
    let mut live_config = TradingConfig::default();
    live_config.strategy = StrategyKind::Ewrls;
    live_config.warmup.enabled = false;
    let live = trader(&["TQQQ"], live_config);
    assert_eq!(live.phase(), TradingPhase::Live);

    // Rule-based strategies are always live.
    let mut awr_config = TradingConfig::default();
    awr_config.strategy = StrategyKind::WilliamsRsi;
    let awr = trader(&["TQQQ"], awr_config);
    assert_eq!(awr.phase(), TradingPhase::Live);
}

#[test]
fn missing_symbol_is_tolerated() {
    let symbols = ["TQQQ", "SSO"];
    let mut t = trader(&symbols, TradingConfig::default());
    warm_up(&mut t, &symbols, 0, 0, 50);

    // SSO goes missing for a tick; the engine warns and proceeds.
    t.on_bar(&snap(vec![calm_bar("TQQQ", 0, 50, 100.0)])).unwrap();
    assert_eq!(t.bars_seen(), 51);
}

#[test]
fn results_reflect_closed_trades() {
    let mut config = TradingConfig::default();
    config.exits.enable_stop_loss = false;
    config.exits.enable_profit_target = false;
    // Hold to the bell so the EOD liquidation is the only exit.
    config.filter.max_bars_to_hold = 1_000;
    config.filter.typical_hold_period = 500;
    let mut t = trader(&["TQQQ"], config);
    warm_up(&mut t, &["TQQQ"], 0, 0, 50);

    t.on_bar(&snap(vec![surge_bar("TQQQ", 0, 50, 102.5)])).unwrap();
    for minute in 51..390 {
        t.on_bar(&snap(vec![calm_bar("TQQQ", 0, minute, 103.5)]))
            .unwrap();
    }

    let results = t.results();
    assert_eq!(results.total_trades, 1);
    assert_eq!(results.winning_trades, 1);
    assert_eq!(results.win_rate, 1.0);
    assert!(results.total_return > 0.0);
    assert!(results.final_equity > 100_000.0);
    assert_eq!(results.daily_breakdown.len(), 1);
    // Exit costs were charged and tracked.
    assert!(results.total_transaction_costs > 0.0);
    assert!(results.avg_cost_per_trade > 0.0);
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Symbol identifier (short ticker string, e.g. "TQQQ").
pub type Symbol = String;

/// One-minute OHLCV bar.
///
/// Immutable after load. `bar_id` is the 16-bit symbol hash joined with
/// the 48-bit millisecond timestamp (see [`crate::bar_id`]); bars from
/// different symbols at the same wall-clock minute share the lower 48
/// bits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub bar_id: u64,
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl Bar {
    pub fn new(
        timestamp_ms: i64,
        symbol: &str,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: i64,
    ) -> Self {
        Self {
            bar_id: crate::bar_id::bar_id(timestamp_ms, symbol),
            timestamp: DateTime::from_timestamp_millis(timestamp_ms).unwrap_or_default(),
            symbol: symbol.to_string(),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Milliseconds since the Unix epoch.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// Signal output with quality metrics.
///
/// `prediction` is the expected log-return over `horizon` bars.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Prediction {
    pub prediction: f64,
    /// Standard deviation of recent prediction errors (>= 0).
    pub uncertainty: f64,
    /// Signal quality in [0, 1].
    pub confidence: f64,
    pub z_score: f64,
    pub signal_to_noise: f64,
    /// Prediction horizon in bars (1, 2, 5 or 10).
    pub horizon: u32,
}

impl Prediction {
    /// Entry gate: signal must be strong and confident enough.
    pub fn should_enter(&self, min_prediction: f64, min_confidence: f64) -> bool {
        self.prediction.abs() >= min_prediction && self.confidence >= min_confidence
    }
}

/// A completed round-trip trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: Symbol,
    pub shares: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_bar_id: u64,
    pub exit_bar_id: u64,
    /// Global bar index at exit, used to attribute trades to the test window.
    pub exit_bar_index: usize,
    /// Net P&L in dollars (after execution costs).
    pub pnl: f64,
    /// Net P&L as a fraction of the entry notional.
    pub pnl_pct: f64,
}

impl TradeRecord {
    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }

    pub fn is_loss(&self) -> bool {
        self.pnl < 0.0
    }
}

/// Equity and trade summary for one trading day, emitted at EOD.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyResult {
    pub day_number: usize,
    pub start_equity: f64,
    pub end_equity: f64,
    pub daily_return: f64,
    pub trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
}

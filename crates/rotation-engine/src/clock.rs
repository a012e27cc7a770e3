//! Exchange wall-clock helpers.
//!
//! Market-open arithmetic needs the exchange time zone with DST, which
//! lives behind a trait so the engine stays pure and tests can pin the
//! offset.

use chrono::{DateTime, Datelike, Offset, Timelike, Utc};
use chrono_tz::America::New_York;

/// Regular session length in minutes (09:30-16:00 ET).
pub const SESSION_MINUTES: i32 = 390;

const OPEN_MINUTES_FROM_MIDNIGHT: i32 = 9 * 60 + 30;
const CLOSE_MINUTES_FROM_MIDNIGHT: i32 = 16 * 60;

/// Maps UTC timestamps onto the exchange trading day.
pub trait MarketClock: Send {
    /// Minutes since 09:30 local time, clamped to [0, 390].
    fn minutes_from_open(&self, ts: DateTime<Utc>) -> i32;

    /// True at or after 15:59 local time (the liquidation minute).
    fn is_end_of_day(&self, ts: DateTime<Utc>) -> bool;

    /// Local calendar date as YYYYMMDD, for once-per-day triggers.
    fn trading_date(&self, ts: DateTime<Utc>) -> i64;
}

/// Production clock: America/New_York with DST.
#[derive(Debug, Clone, Copy, Default)]
pub struct EasternClock;

impl MarketClock for EasternClock {
    fn minutes_from_open(&self, ts: DateTime<Utc>) -> i32 {
        let local = ts.with_timezone(&New_York);
        let minutes = local.hour() as i32 * 60 + local.minute() as i32;
        (minutes - OPEN_MINUTES_FROM_MIDNIGHT).clamp(0, SESSION_MINUTES)
    }

    fn is_end_of_day(&self, ts: DateTime<Utc>) -> bool {
        let local = ts.with_timezone(&New_York);
        let minutes = local.hour() as i32 * 60 + local.minute() as i32;
        minutes >= CLOSE_MINUTES_FROM_MIDNIGHT - 1
    }

    fn trading_date(&self, ts: DateTime<Utc>) -> i64 {
        let local = ts.with_timezone(&New_York);
        i64::from(local.year()) * 10_000 + i64::from(local.month()) * 100 + i64::from(local.day())
    }
}

/// Test clock with a fixed UTC offset (no DST), e.g. -5h for a winter
/// New York session.
#[derive(Debug, Clone, Copy)]
pub struct FixedOffsetClock {
    offset_hours: i32,
}

impl FixedOffsetClock {
    pub fn new(offset_hours: i32) -> Self {
        Self { offset_hours }
    }

    fn local(&self, ts: DateTime<Utc>) -> DateTime<chrono::FixedOffset> {
        let offset = chrono::FixedOffset::east_opt(self.offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix());
        ts.with_timezone(&offset)
    }
}

impl MarketClock for FixedOffsetClock {
    fn minutes_from_open(&self, ts: DateTime<Utc>) -> i32 {
        let local = self.local(ts);
        let minutes = local.hour() as i32 * 60 + local.minute() as i32;
        (minutes - OPEN_MINUTES_FROM_MIDNIGHT).clamp(0, SESSION_MINUTES)
    }

    fn is_end_of_day(&self, ts: DateTime<Utc>) -> bool {
        let local = self.local(ts);
        let minutes = local.hour() as i32 * 60 + local.minute() as i32;
        minutes >= CLOSE_MINUTES_FROM_MIDNIGHT - 1
    }

    fn trading_date(&self, ts: DateTime<Utc>) -> i64 {
        let local = self.local(ts);
        i64::from(local.year()) * 10_000 + i64::from(local.month()) * 100 + i64::from(local.day())
    }
}

//! Market data loading and snapshot alignment.
//!
//! Parses per-symbol CSV files of minute bars and aligns them into the
//! per-timestamp snapshots the rotation trader consumes. File formats
//! stop here; the core never sees a path or a string row.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use rotation_core::{Bar, Symbol};
use tracing::{info, warn};

/// One aligned tick: every bar in the map shares this timestamp.
pub type Snapshot = HashMap<Symbol, Bar>;

/// Load one symbol's bars from a CSV file.
///
/// Expected rows: `timestamp_ms,open,high,low,close,volume` or
/// `timestamp_ms,symbol,open,high,low,close,volume`. The first line is
/// treated as a header and skipped; malformed rows are logged and
/// dropped.
pub fn load_csv(path: &Path, symbol: &str) -> Result<Vec<Bar>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("cannot open CSV file: {}", path.display()))?;

    let mut bars = Vec::new();
    for (line_num, line) in content.lines().enumerate().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        match parse_row(line, symbol) {
            Some(bar) => bars.push(bar),
            None => {
                warn!(
                    file = %path.display(),
                    line = line_num + 1,
                    "skipping malformed row"
                );
            }
        }
    }

    if bars.is_empty() {
        bail!("no bars loaded from {}", path.display());
    }
    bars.sort_by_key(|b| b.timestamp_ms());
    info!(symbol, count = bars.len(), file = %path.display(), "loaded bars");
    Ok(bars)
}

fn parse_row(line: &str, symbol: &str) -> Option<Bar> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 6 {
        return None;
    }
    // A 7-column row carries the symbol in field 1; the filename-derived
    // symbol wins either way.
    let offset = if fields.len() >= 7 { 2 } else { 1 };

    let timestamp_ms: i64 = fields[0].parse().ok()?;
    let open: f64 = fields[offset].parse().ok()?;
    let high: f64 = fields[offset + 1].parse().ok()?;
    let low: f64 = fields[offset + 2].parse().ok()?;
    let close: f64 = fields[offset + 3].parse().ok()?;
    let volume: i64 = fields[offset + 4].parse::<f64>().ok()? as i64;

    if !(open.is_finite() && high.is_finite() && low.is_finite() && close.is_finite()) {
        return None;
    }
    // The core treats bars as authoritative, so impossible bars must
    // die here: prices positive, high/low bracketing, volume
    // non-negative.
    if open <= 0.0 || high <= 0.0 || low <= 0.0 || close <= 0.0 {
        return None;
    }
    if high < low || open > high || open < low || close > high || close < low {
        return None;
    }
    if volume < 0 {
        return None;
    }
    Some(Bar::new(timestamp_ms, symbol, open, high, low, close, volume))
}

/// Restrict every symbol's series to `[start_ms, end_ms)`. Used to cut
/// a test window (plus its warmup run-in) out of a longer history.
pub fn clip_window(
    by_symbol: &mut HashMap<Symbol, Vec<Bar>>,
    start_ms: Option<i64>,
    end_ms: Option<i64>,
) {
    for bars in by_symbol.values_mut() {
        bars.retain(|b| {
            let ts = b.timestamp_ms();
            start_ms.map(|s| ts >= s).unwrap_or(true) && end_ms.map(|e| ts < e).unwrap_or(true)
        });
    }
    by_symbol.retain(|symbol, bars| {
        if bars.is_empty() {
            warn!(symbol = %symbol, "no bars left after window clip");
            false
        } else {
            true
        }
    });
}

/// Load every `<SYMBOL>.csv` in a directory; the file stem names the
/// symbol.
pub fn load_dir(dir: &Path) -> Result<HashMap<Symbol, Vec<Bar>>> {
    let mut by_symbol = HashMap::new();
    let entries =
        fs::read_dir(dir).with_context(|| format!("cannot read directory: {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let symbol = stem.to_ascii_uppercase();
        let bars = load_csv(&path, &symbol)?;
        by_symbol.insert(symbol, bars);
    }
    if by_symbol.is_empty() {
        bail!("no CSV files found in {}", dir.display());
    }
    Ok(by_symbol)
}

/// Align per-symbol series into time-ordered snapshots. Timestamps
/// missing a symbol still produce a snapshot (the trader warns and
/// proceeds); completely empty inputs produce none.
pub fn build_snapshots(by_symbol: &HashMap<Symbol, Vec<Bar>>) -> Vec<(i64, Snapshot)> {
    let mut timeline: BTreeMap<i64, Snapshot> = BTreeMap::new();
    for bars in by_symbol.values() {
        for bar in bars {
            timeline
                .entry(bar.timestamp_ms())
                .or_default()
                .insert(bar.symbol.clone(), bar.clone());
        }
    }
    timeline.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_csv(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("rotation-md-{}-{}", std::process::id(), name));
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn parses_six_column_format() {
        let path = temp_csv(
            "six.csv",
            "timestamp_ms,open,high,low,close,volume\n\
             1704724200000,100.0,101.0,99.5,100.5,1000000\n\
             1704724260000,100.5,101.5,100.0,101.0,1100000\n",
        );
        let bars = load_csv(&path, "TQQQ").unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].symbol, "TQQQ");
        assert_eq!(bars[0].close, 100.5);
        assert_eq!(bars[0].timestamp_ms(), 1_704_724_200_000);
        assert_eq!(
            rotation_core::bar_id::timestamp_ms(bars[0].bar_id),
            1_704_724_200_000
        );
    }

    #[test]
    fn parses_seven_column_format_and_skips_bad_rows() {
        let path = temp_csv(
            "seven.csv",
            "timestamp_ms,symbol,open,high,low,close,volume\n\
             1704724200000,TQQQ,100.0,101.0,99.5,100.5,1000000\n\
             not-a-row\n\
             1704724260000,TQQQ,100.5,101.5,100.0,101.0,1100000\n",
        );
        let bars = load_csv(&path, "TQQQ").unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].volume, 1_100_000);
    }

    #[test]
    fn empty_file_is_an_error() {
        let path = temp_csv("empty.csv", "timestamp_ms,open,high,low,close,volume\n");
        let result = load_csv(&path, "TQQQ");
        fs::remove_file(&path).ok();
        assert!(result.is_err());
    }

    #[test]
    fn bars_are_sorted_by_timestamp() {
        let path = temp_csv(
            "unsorted.csv",
            "timestamp_ms,open,high,low,close,volume\n\
             1704724260000,100.5,101.5,100.0,101.0,1100000\n\
             1704724200000,100.0,101.0,99.5,100.5,1000000\n",
        );
        let bars = load_csv(&path, "TQQQ").unwrap();
        fs::remove_file(&path).ok();
        assert!(bars[0].timestamp_ms() < bars[1].timestamp_ms());
    }

    #[test]
    fn impossible_bars_are_dropped() {
        let path = temp_csv(
            "invalid.csv",
            "timestamp_ms,open,high,low,close,volume\n\
             1704724200000,100.0,101.0,99.5,100.5,1000000\n\
             1704724260000,100.0,99.0,101.0,100.0,1000000\n\
             1704724320000,-5.0,101.0,99.0,100.0,1000000\n\
             1704724380000,100.0,101.0,99.0,102.0,1000000\n\
             1704724440000,100.0,101.0,99.0,100.0,-50\n\
             1704724500000,100.2,101.2,99.7,100.7,1000000\n",
        );
        let bars = load_csv(&path, "TQQQ").unwrap();
        fs::remove_file(&path).ok();

        // Only the first and last rows are well-formed: the others have
        // high < low, a negative price, close above high, and negative
        // volume.
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].close, 100.7);
    }

    #[test]
    fn clip_window_restricts_and_prunes() {
        let mut by_symbol = HashMap::new();
        by_symbol.insert(
            "TQQQ".to_string(),
            vec![
                Bar::new(1_000, "TQQQ", 1.0, 1.0, 1.0, 1.0, 10),
                Bar::new(2_000, "TQQQ", 1.0, 1.0, 1.0, 1.0, 10),
                Bar::new(3_000, "TQQQ", 1.0, 1.0, 1.0, 1.0, 10),
            ],
        );
        by_symbol.insert(
            "SQQQ".to_string(),
            vec![Bar::new(500, "SQQQ", 1.0, 1.0, 1.0, 1.0, 10)],
        );

        clip_window(&mut by_symbol, Some(1_500), Some(3_000));
        assert_eq!(by_symbol["TQQQ"].len(), 1);
        assert_eq!(by_symbol["TQQQ"][0].timestamp_ms(), 2_000);
        // SQQQ had nothing in the window and is dropped entirely.
        assert!(!by_symbol.contains_key("SQQQ"));
    }

    #[test]
    fn snapshots_align_symbols_by_timestamp() {
        let mut by_symbol = HashMap::new();
        by_symbol.insert(
            "TQQQ".to_string(),
            vec![
                Bar::new(1_000, "TQQQ", 1.0, 1.0, 1.0, 1.0, 10),
                Bar::new(2_000, "TQQQ", 1.0, 1.0, 1.0, 1.0, 10),
            ],
        );
        by_symbol.insert(
            "SQQQ".to_string(),
            vec![
                Bar::new(1_000, "SQQQ", 2.0, 2.0, 2.0, 2.0, 20),
                // SQQQ is missing at t=2000.
                Bar::new(3_000, "SQQQ", 2.0, 2.0, 2.0, 2.0, 20),
            ],
        );

        let snapshots = build_snapshots(&by_symbol);
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0].0, 1_000);
        assert_eq!(snapshots[0].1.len(), 2);
        assert_eq!(snapshots[1].1.len(), 1);
        assert!(snapshots[1].1.contains_key("TQQQ"));
        assert_eq!(snapshots[2].0, 3_000);
    }
}

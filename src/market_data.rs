// =============================================================================
// Market Data — OHLCV bar store
// =============================================================================
//
// Read-only input to the strategy runner. Bars arrive from an upstream feed
// (out of scope here); the store enforces the (symbol, timeframe, timestamp)
// uniqueness constraint and always hands bars back oldest-first.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A single OHLCV price bar. Unified schema across asset classes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub symbol: String,
    pub timeframe: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Composite key identifying a unique bar series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct BarKey {
    pub symbol: String,
    pub timeframe: String,
}

impl BarKey {
    pub fn new(symbol: impl Into<String>, timeframe: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
        }
    }
}

impl std::fmt::Display for BarKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

/// Thread-safe store of bar series per `(symbol, timeframe)`.
///
/// Inserts keep each series sorted ascending by timestamp and silently drop
/// duplicates of an existing `(symbol, timeframe, timestamp)` key. Each
/// series is trimmed to `max_bars` (oldest evicted first).
pub struct BarStore {
    series: RwLock<HashMap<BarKey, Vec<OhlcvBar>>>,
    max_bars: usize,
}

impl BarStore {
    pub fn new(max_bars: usize) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            max_bars,
        }
    }

    /// Insert a bar. Returns `false` when a bar with the same timestamp is
    /// already present for the series (unique-constraint behaviour).
    pub fn insert(&self, bar: OhlcvBar) -> bool {
        let key = BarKey::new(bar.symbol.clone(), bar.timeframe.clone());
        let mut map = self.series.write();
        let series = map.entry(key).or_default();

        if series.iter().any(|b| b.timestamp == bar.timestamp) {
            return false;
        }

        // Common case: bars arrive in order — append. Otherwise insert sorted.
        match series.last() {
            Some(last) if last.timestamp < bar.timestamp => series.push(bar),
            _ => {
                let pos = series.partition_point(|b| b.timestamp < bar.timestamp);
                series.insert(pos, bar);
            }
        }

        while series.len() > self.max_bars {
            series.remove(0);
        }
        true
    }

    /// The most recent `count` bars, oldest-first.
    pub fn bars(&self, key: &BarKey, count: usize) -> Vec<OhlcvBar> {
        let map = self.series.read();
        match map.get(key) {
            Some(series) => {
                let start = series.len().saturating_sub(count);
                series[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    /// The most recent `count` close prices, oldest-first.
    pub fn closes(&self, key: &BarKey, count: usize) -> Vec<f64> {
        self.bars(key, count).iter().map(|b| b.close).collect()
    }

    /// Latest close for the series, if any bars exist.
    pub fn latest_close(&self, key: &BarKey) -> Option<f64> {
        let map = self.series.read();
        map.get(key).and_then(|s| s.last()).map(|b| b.close)
    }

    /// Number of bars currently held for the series.
    pub fn len(&self, key: &BarKey) -> usize {
        let map = self.series.read();
        map.get(key).map(|s| s.len()).unwrap_or(0)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(ts_secs: i64, close: f64) -> OhlcvBar {
        OhlcvBar {
            symbol: "AAPL".into(),
            timeframe: "1d".into(),
            timestamp: Utc.timestamp_opt(ts_secs, 0).unwrap(),
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 1_000.0,
        }
    }

    #[test]
    fn duplicate_timestamp_is_rejected() {
        let store = BarStore::new(100);
        assert!(store.insert(bar(1_000, 10.0)));
        assert!(!store.insert(bar(1_000, 11.0)));
        let key = BarKey::new("AAPL", "1d");
        assert_eq!(store.len(&key), 1);
        assert_eq!(store.latest_close(&key), Some(10.0));
    }

    #[test]
    fn out_of_order_inserts_end_up_ascending() {
        let store = BarStore::new(100);
        store.insert(bar(3_000, 3.0));
        store.insert(bar(1_000, 1.0));
        store.insert(bar(2_000, 2.0));
        let key = BarKey::new("AAPL", "1d");
        let closes = store.closes(&key, 10);
        assert_eq!(closes, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn retention_evicts_oldest() {
        let store = BarStore::new(3);
        for i in 0..5 {
            store.insert(bar(i * 60, i as f64));
        }
        let key = BarKey::new("AAPL", "1d");
        assert_eq!(store.closes(&key, 10), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn bars_returns_requested_tail() {
        let store = BarStore::new(100);
        for i in 0..10 {
            store.insert(bar(i * 60, i as f64));
        }
        let key = BarKey::new("AAPL", "1d");
        let tail = store.bars(&key, 3);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].close, 7.0);
        assert_eq!(tail[2].close, 9.0);
    }

    #[test]
    fn different_timeframes_are_independent() {
        let store = BarStore::new(100);
        store.insert(bar(1_000, 10.0));
        let mut b5 = bar(1_000, 99.0);
        b5.timeframe = "5m".into();
        assert!(store.insert(b5));
        assert_eq!(store.len(&BarKey::new("AAPL", "1d")), 1);
        assert_eq!(store.len(&BarKey::new("AAPL", "5m")), 1);
    }
}

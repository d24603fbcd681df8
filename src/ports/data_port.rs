//! Market data boundary.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::ohlcv::Bar;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("no data for {symbol} between {start} and {end}")]
    EmptyRange {
        symbol: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("data source failure: {0}")]
    Source(String),
}

/// Source of historical bars. Implementations must return bars in strictly
/// increasing timestamp order; the engine rejects anything else.
pub trait BarFeed {
    fn fetch(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, FeedError>;
}

/// Fixed in-memory feed, mainly for tests and replays of exported data.
pub struct StaticBarFeed {
    bars: Vec<Bar>,
}

impl StaticBarFeed {
    pub fn new(mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.timestamp);
        StaticBarFeed { bars }
    }
}

impl BarFeed for StaticBarFeed {
    fn fetch(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, FeedError> {
        if !self.bars.iter().any(|b| b.symbol == symbol) {
            return Err(FeedError::SymbolNotFound(symbol.to_string()));
        }
        let selected: Vec<Bar> = self
            .bars
            .iter()
            .filter(|b| b.symbol == symbol && b.timestamp >= start && b.timestamp <= end)
            .cloned()
            .collect();
        if selected.is_empty() {
            return Err(FeedError::EmptyRange {
                symbol: symbol.to_string(),
                start,
                end,
            });
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn bars() -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..5)
            .map(|i| Bar {
                symbol: "BTC".into(),
                timestamp: start + Duration::days(i),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
                volume: 10.0,
            })
            .collect()
    }

    #[test]
    fn fetch_filters_by_range() {
        let feed = StaticBarFeed::new(bars());
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap();
        let fetched = feed.fetch("BTC", start, end).unwrap();
        assert_eq!(fetched.len(), 3);
        assert!(fetched.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn unknown_symbol() {
        let feed = StaticBarFeed::new(bars());
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let err = feed.fetch("ETH", start, start).unwrap_err();
        assert!(matches!(err, FeedError::SymbolNotFound(_)));
    }

    #[test]
    fn empty_range() {
        let feed = StaticBarFeed::new(bars());
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let err = feed.fetch("BTC", start, start).unwrap_err();
        assert!(matches!(err, FeedError::EmptyRange { .. }));
    }
}

//! OHLCV bar representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One price bar for one time interval. Invariant: `low <= open, close <= high`.
/// Bars are immutable once produced; the engine only borrows them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Whether the OHLC fields are mutually coherent.
    pub fn is_coherent(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
    }

    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }

    pub fn field(&self, field: BarField) -> f64 {
        match field {
            BarField::Open => self.open,
            BarField::High => self.high,
            BarField::Low => self.low,
            BarField::Close => self.close,
            BarField::Volume => self.volume,
        }
    }
}

/// Named bar field, usable as an indicator source or a series reference
/// in conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarField {
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl BarField {
    pub const ALL: [BarField; 5] = [
        BarField::Open,
        BarField::High,
        BarField::Low,
        BarField::Close,
        BarField::Volume,
    ];

    pub fn from_name(name: &str) -> Option<BarField> {
        match name {
            "open" => Some(BarField::Open),
            "high" => Some(BarField::High),
            "low" => Some(BarField::Low),
            "close" => Some(BarField::Close),
            "volume" => Some(BarField::Volume),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BarField::Open => "open",
            BarField::High => "high",
            BarField::Low => "low",
            BarField::Close => "close",
            BarField::Volume => "volume",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_bar() -> Bar {
        Bar {
            symbol: "BTC".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
            open: 100.0,
            high: 110.0,
            low: 90.0,
            close: 105.0,
            volume: 50_000.0,
        }
    }

    #[test]
    fn coherent_bar() {
        assert!(sample_bar().is_coherent());
    }

    #[test]
    fn incoherent_bar() {
        let mut bar = sample_bar();
        bar.low = 120.0;
        assert!(!bar.is_coherent());
    }

    #[test]
    fn true_range_hl_dominates() {
        let bar = sample_bar();
        // high-low=20, |high-100|=10, |low-100|=10 -> 20
        assert!((bar.true_range(100.0) - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn true_range_gap_up() {
        let bar = sample_bar();
        // high-low=20, |110-70|=40, |90-70|=20 -> 40
        assert!((bar.true_range(70.0) - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn field_access() {
        let bar = sample_bar();
        assert!((bar.field(BarField::Open) - 100.0).abs() < f64::EPSILON);
        assert!((bar.field(BarField::Volume) - 50_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn field_from_name() {
        assert_eq!(BarField::from_name("close"), Some(BarField::Close));
        assert_eq!(BarField::from_name("CLOSE"), None);
        assert_eq!(BarField::from_name("sma_20"), None);
    }

    #[test]
    fn field_name_round_trip() {
        for field in BarField::ALL {
            assert_eq!(BarField::from_name(field.name()), Some(field));
        }
    }
}

//! Trade signals emitted by strategy evaluation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Buy,
    Sell,
}

/// One actionable signal, priced at the close of the bar that fired it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub kind: SignalKind,
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    /// The condition text or description that fired, kept for trade
    /// attribution.
    pub reason: String,
    /// Fraction of equity to commit, buy signals only.
    pub size: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::prelude::FromPrimitive;

    #[test]
    fn serializes_kind_lowercase() {
        let signal = TradeSignal {
            kind: SignalKind::Buy,
            symbol: "BTC".into(),
            price: Decimal::from_f64(50000.0).unwrap(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            reason: "crossover(sma_fast, sma_slow)".into(),
            size: 0.5,
        };
        let json = serde_json::to_string(&signal).unwrap();
        assert!(json.contains("\"kind\":\"buy\""));
    }
}

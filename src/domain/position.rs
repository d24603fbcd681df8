//! Open positions and the trade records they produce.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A currently held quantity of one symbol.
///
/// Re-entering a symbol merges into the existing position at the
/// quantity-weighted average entry price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
}

impl Position {
    pub fn market_value(&self, price: Decimal) -> Decimal {
        self.quantity * price
    }

    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        (price - self.avg_entry_price) * self.quantity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Open,
    Closed,
}

/// Entry-to-exit record of one round trip. Created open when a position
/// is entered, completed when it is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: u64,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_price: Option<Decimal>,
    pub exit_time: Option<DateTime<Utc>>,
    /// Total commission paid across both legs.
    pub commission: Decimal,
    pub realized_pnl: Option<Decimal>,
    pub entry_reason: String,
    pub exit_reason: Option<String>,
    pub status: TradeStatus,
}

impl Trade {
    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    pub fn is_win(&self) -> bool {
        self.realized_pnl
            .map(|pnl| pnl > Decimal::ZERO)
            .unwrap_or(false)
    }
}

//! Portfolio accounting.
//!
//! All money math is `Decimal`. The portfolio owns cash, open positions
//! and the full trade log; the engine drives it with open/close calls and
//! reads equity snapshots back out. Commission is charged on both legs at
//! a flat rate on notional value.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::position::{Position, Side, Trade, TradeStatus};

#[derive(Debug, Error, PartialEq)]
pub enum PortfolioError {
    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },
    #[error("no open position in {0}")]
    NoPosition(String),
    #[error("position limit reached ({0} open)")]
    PositionLimit(usize),
}

/// Equity state at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub cash: Decimal,
    pub total_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
}

#[derive(Debug, Clone)]
pub struct Portfolio {
    pub cash: Decimal,
    pub initial_capital: Decimal,
    pub commission_rate: Decimal,
    pub max_positions: usize,
    positions: BTreeMap<String, Position>,
    trades: Vec<Trade>,
    realized_pnl: Decimal,
    next_trade_id: u64,
}

impl Portfolio {
    pub fn new(initial_capital: Decimal, commission_rate: Decimal, max_positions: usize) -> Self {
        Portfolio {
            cash: initial_capital,
            initial_capital,
            commission_rate,
            max_positions,
            positions: BTreeMap::new(),
            trades: Vec::new(),
            realized_pnl: Decimal::ZERO,
            next_trade_id: 1,
        }
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn into_trades(self) -> Vec<Trade> {
        self.trades
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    fn check_buy(&self, symbol: &str, quantity: Decimal, price: Decimal) -> Result<(), PortfolioError> {
        if !self.positions.contains_key(symbol) && self.positions.len() >= self.max_positions {
            return Err(PortfolioError::PositionLimit(self.positions.len()));
        }
        let cost = quantity * price;
        let needed = cost + cost * self.commission_rate;
        if needed > self.cash {
            return Err(PortfolioError::InsufficientFunds {
                needed,
                available: self.cash,
            });
        }
        Ok(())
    }

    pub fn can_buy(&self, symbol: &str, quantity: Decimal, price: Decimal) -> bool {
        self.check_buy(symbol, quantity, price).is_ok()
    }

    /// Buy `quantity` at `price`. Re-entering a held symbol merges at the
    /// weighted average entry price and logs a second open trade.
    pub fn open_position(
        &mut self,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        time: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), PortfolioError> {
        self.check_buy(symbol, quantity, price)?;

        let cost = quantity * price;
        let commission = cost * self.commission_rate;
        self.cash -= cost + commission;

        match self.positions.get_mut(symbol) {
            Some(pos) => {
                let total_qty = pos.quantity + quantity;
                pos.avg_entry_price =
                    (pos.avg_entry_price * pos.quantity + price * quantity) / total_qty;
                pos.quantity = total_qty;
            }
            None => {
                self.positions.insert(
                    symbol.to_string(),
                    Position {
                        symbol: symbol.to_string(),
                        quantity,
                        avg_entry_price: price,
                        entry_time: time,
                    },
                );
            }
        }

        self.trades.push(Trade {
            id: self.next_trade_id,
            symbol: symbol.to_string(),
            side: Side::Long,
            quantity,
            entry_price: price,
            entry_time: time,
            exit_price: None,
            exit_time: None,
            commission,
            realized_pnl: None,
            entry_reason: reason.to_string(),
            exit_reason: None,
            status: TradeStatus::Open,
        });
        self.next_trade_id += 1;
        Ok(())
    }

    /// Sell the whole position at `price`. Completes the most recent open
    /// trade for the symbol and returns the realized profit, net of both
    /// commissions.
    pub fn close_position(
        &mut self,
        symbol: &str,
        price: Decimal,
        time: DateTime<Utc>,
        reason: &str,
    ) -> Result<Decimal, PortfolioError> {
        let pos = self
            .positions
            .remove(symbol)
            .ok_or_else(|| PortfolioError::NoPosition(symbol.to_string()))?;

        let proceeds = pos.quantity * price;
        let exit_commission = proceeds * self.commission_rate;
        self.cash += proceeds - exit_commission;

        let trade = self
            .trades
            .iter_mut()
            .rev()
            .find(|t| t.symbol == symbol && t.is_open())
            .ok_or_else(|| PortfolioError::NoPosition(symbol.to_string()))?;

        let entry_commission = trade.commission;
        let realized =
            (price - pos.avg_entry_price) * pos.quantity - entry_commission - exit_commission;

        trade.exit_price = Some(price);
        trade.exit_time = Some(time);
        trade.exit_reason = Some(reason.to_string());
        trade.commission = entry_commission + exit_commission;
        trade.realized_pnl = Some(realized);
        trade.status = TradeStatus::Closed;

        self.realized_pnl += realized;
        Ok(realized)
    }

    /// Close any position whose return has hit the stop-loss or
    /// take-profit threshold, at the supplied price. Returns the number of
    /// positions closed. Symbols without a price are left alone.
    pub fn apply_risk_management(
        &mut self,
        prices: &BTreeMap<String, Decimal>,
        time: DateTime<Utc>,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> usize {
        if stop_loss.is_none() && take_profit.is_none() {
            return 0;
        }

        let mut to_close: Vec<(String, Decimal, &'static str)> = Vec::new();
        for pos in self.positions.values() {
            let Some(&price) = prices.get(&pos.symbol) else {
                continue;
            };
            let Some(ret) = ((price - pos.avg_entry_price) / pos.avg_entry_price).to_f64() else {
                continue;
            };
            if let Some(stop) = stop_loss {
                if ret <= -stop {
                    to_close.push((pos.symbol.clone(), price, "stop_loss"));
                    continue;
                }
            }
            if let Some(take) = take_profit {
                if ret >= take {
                    to_close.push((pos.symbol.clone(), price, "take_profit"));
                }
            }
        }

        let count = to_close.len();
        for (symbol, price, reason) in to_close {
            // positions collected above are guaranteed present
            let _ = self.close_position(&symbol, price, time, reason);
        }
        count
    }

    /// Cash plus the market value of priceable positions. A position whose
    /// symbol has no price contributes nothing rather than a stale guess.
    pub fn total_value(&self, prices: &BTreeMap<String, Decimal>) -> Decimal {
        let held: Decimal = self
            .positions
            .values()
            .filter_map(|pos| prices.get(&pos.symbol).map(|&p| pos.market_value(p)))
            .sum();
        self.cash + held
    }

    pub fn unrealized_pnl(&self, prices: &BTreeMap<String, Decimal>) -> Decimal {
        self.positions
            .values()
            .filter_map(|pos| prices.get(&pos.symbol).map(|&p| pos.unrealized_pnl(p)))
            .sum()
    }

    pub fn snapshot(
        &self,
        timestamp: DateTime<Utc>,
        prices: &BTreeMap<String, Decimal>,
    ) -> EquityPoint {
        EquityPoint {
            timestamp,
            cash: self.cash,
            total_value: self.total_value(prices),
            unrealized_pnl: self.unrealized_pnl(prices),
            realized_pnl: self.realized_pnl,
        }
    }
}

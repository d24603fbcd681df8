//! Performance metrics over a completed run.
//!
//! Trade statistics come from the closed trades in the log; return
//! statistics come from the equity curve, resampled to per-bar returns
//! and annualized assuming daily bars.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::portfolio::EquityPoint;
use crate::domain::position::Trade;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Bounded stand-in for ratios whose denominator is zero, so serialized
/// results stay finite.
pub const RATIO_CEILING: f64 = 1.0e9;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total_return: f64,
    pub annualized_return: f64,
    pub sharpe_ratio: f64,
    pub volatility: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub total_trades: usize,
    pub profitable_trades: usize,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
}

pub fn summarize(
    trades: &[Trade],
    equity: &[EquityPoint],
    initial_capital: Decimal,
    risk_free_rate: f64,
) -> Summary {
    let curve: Vec<f64> = equity
        .iter()
        .filter_map(|p| p.total_value.to_f64())
        .collect();
    let returns = bar_returns(&curve);

    let initial = initial_capital.to_f64().unwrap_or(0.0);
    let final_value = curve.last().copied().unwrap_or(initial);
    let total_return = if initial > 0.0 {
        (final_value - initial) / initial
    } else {
        0.0
    };

    let pnls: Vec<f64> = trades
        .iter()
        .filter_map(|t| t.realized_pnl)
        .filter_map(|p| p.to_f64())
        .collect();
    let wins: Vec<f64> = pnls.iter().copied().filter(|&p| p > 0.0).collect();
    let losses: Vec<f64> = pnls.iter().copied().filter(|&p| p < 0.0).collect();

    Summary {
        total_return,
        annualized_return: annualize(total_return, returns.len()),
        sharpe_ratio: sharpe_ratio(&returns, risk_free_rate),
        volatility: stddev(&returns) * TRADING_DAYS_PER_YEAR.sqrt(),
        max_drawdown: max_drawdown(&curve),
        win_rate: if pnls.is_empty() {
            0.0
        } else {
            wins.len() as f64 / pnls.len() as f64
        },
        profit_factor: profit_factor(&wins, &losses),
        total_trades: pnls.len(),
        profitable_trades: wins.len(),
        avg_win: mean(&wins),
        avg_loss: mean(&losses),
        largest_win: wins.iter().copied().fold(0.0, f64::max),
        largest_loss: losses.iter().copied().fold(0.0, f64::min),
    }
}

/// Per-bar simple returns of an equity curve. A zero-valued bar yields no
/// return for the following step.
pub fn bar_returns(curve: &[f64]) -> Vec<f64> {
    curve
        .windows(2)
        .filter_map(|w| {
            if w[0] == 0.0 {
                None
            } else {
                Some((w[1] - w[0]) / w[0])
            }
        })
        .collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation. Zero for fewer than two samples.
pub fn stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Annualized Sharpe ratio of per-bar returns against an annual risk-free
/// rate. A flat curve with nonzero mean excess return saturates at the
/// ratio ceiling instead of dividing by zero.
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let excess = mean(returns) - risk_free_rate / TRADING_DAYS_PER_YEAR;
    let sd = stddev(returns);
    if sd == 0.0 {
        if excess > 0.0 {
            RATIO_CEILING
        } else if excess < 0.0 {
            -RATIO_CEILING
        } else {
            0.0
        }
    } else {
        excess / sd * TRADING_DAYS_PER_YEAR.sqrt()
    }
}

/// Largest peak-to-trough decline of the curve, as a fraction of the peak.
pub fn max_drawdown(curve: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    for &value in curve {
        if value > peak {
            peak = value;
        } else if peak > 0.0 {
            worst = worst.max((peak - value) / peak);
        }
    }
    worst
}

fn annualize(total_return: f64, periods: usize) -> f64 {
    if periods == 0 || total_return <= -1.0 {
        return 0.0;
    }
    (1.0 + total_return).powf(TRADING_DAYS_PER_YEAR / periods as f64) - 1.0
}

fn profit_factor(wins: &[f64], losses: &[f64]) -> f64 {
    let gross_profit: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().map(|l| l.abs()).sum();
    if gross_loss == 0.0 {
        if gross_profit > 0.0 {
            RATIO_CEILING
        } else {
            1.0
        }
    } else {
        gross_profit / gross_loss
    }
}

//! Backtest engine.
//!
//! Single chronological pass over the bar series. Per bar: update every
//! indicator, evaluate signal rules against a bounded window of recent
//! bars (buys first, then sells, first priority match within each list),
//! then risk limits, then snapshot equity. The run is deterministic: the
//! same strategy and bars always produce the same result.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::condition_eval::{eval_condition, EvalContext};
use crate::domain::indicator::Indicator;
use crate::domain::metrics::{self, Summary};
use crate::domain::ohlcv::{Bar, BarField};
use crate::domain::portfolio::{EquityPoint, Portfolio};
use crate::domain::position::Trade;
use crate::domain::signal::{SignalKind, TradeSignal};
use crate::domain::strategy::{CompiledSignal, CompiledStrategy};

/// Quantities are rounded to this many decimal places at entry.
const QUANTITY_DP: u32 = 8;

/// Lifecycle of the most recent run on an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("no bars to process")]
    EmptyData,

    #[error("bar timestamps must be strictly increasing (violated at index {index})")]
    NonMonotonic { index: usize },

    #[error("run cancelled after {bars_processed} bars")]
    Cancelled { bars_processed: usize },

    #[error("invalid execution config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub initial_capital: Decimal,
    /// Flat commission as a fraction of notional, charged on both legs.
    pub commission_rate: Decimal,
    /// Annual risk-free rate for the Sharpe ratio.
    pub risk_free_rate: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            initial_capital: Decimal::from(10_000),
            commission_rate: Decimal::ZERO,
            risk_free_rate: 0.0,
        }
    }
}

impl ExecutionConfig {
    fn validate(&self) -> Result<(), BacktestError> {
        if self.initial_capital <= Decimal::ZERO {
            return Err(BacktestError::InvalidConfig(format!(
                "initial_capital must be positive, got {}",
                self.initial_capital
            )));
        }
        let max_rate = Decimal::new(1, 1); // 0.1
        if self.commission_rate < Decimal::ZERO || self.commission_rate > max_rate {
            return Err(BacktestError::InvalidConfig(format!(
                "commission_rate must be in [0, 0.1], got {}",
                self.commission_rate
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct BacktestResult {
    pub strategy_name: String,
    pub summary: Summary,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub bars_processed: usize,
    pub initial_capital: Decimal,
    pub final_value: Decimal,
}

/// Recent bars plus the live indicators, as conditions see them.
pub struct EvalView<'a> {
    bars: &'a VecDeque<Bar>,
    indicators: &'a BTreeMap<String, Box<dyn Indicator>>,
}

impl EvalContext for EvalView<'_> {
    fn bar_field(&self, field: BarField, offset: usize) -> Option<f64> {
        let len = self.bars.len();
        if offset >= len {
            return None;
        }
        Some(self.bars[len - 1 - offset].field(field))
    }

    fn series(&self, name: &str, offset: usize) -> Option<f64> {
        self.indicators.get(name)?.value(offset)
    }
}

fn first_firing<'a>(rules: &'a [CompiledSignal], ctx: &dyn EvalContext) -> Option<&'a CompiledSignal> {
    rules.iter().find(|rule| eval_condition(&rule.condition, ctx))
}

/// Evaluate one bar's rules, buys before sells, first priority match
/// within each list. Buys are evaluated every bar (adding to a held
/// position merges at the weighted average); sells are evaluated against
/// the position the buy step leaves behind, so a sell firing on the entry
/// bar exits on that same bar. A close price that does not fit a
/// `Decimal` suppresses the whole bar.
pub fn signals_for_bar(
    strategy: &CompiledStrategy,
    ctx: &dyn EvalContext,
    bar: &Bar,
    holding: bool,
) -> Vec<TradeSignal> {
    let Some(price) = Decimal::from_f64(bar.close) else {
        warn!(
            symbol = %bar.symbol,
            close = bar.close,
            "close price not representable, signals dropped"
        );
        return Vec::new();
    };
    let make = |kind, rule: &CompiledSignal| TradeSignal {
        kind,
        symbol: bar.symbol.clone(),
        price,
        timestamp: bar.timestamp,
        reason: rule.reason.clone(),
        size: rule.size,
    };

    let mut signals = Vec::new();
    if let Some(rule) = first_firing(&strategy.buy_rules, ctx) {
        signals.push(make(SignalKind::Buy, rule));
    }
    if holding || !signals.is_empty() {
        if let Some(rule) = first_firing(&strategy.sell_rules, ctx) {
            signals.push(make(SignalKind::Sell, rule));
        }
    }
    signals
}

pub struct BacktestEngine {
    config: ExecutionConfig,
    progress: Option<Box<dyn FnMut(usize, usize) + Send>>,
    cancel: Option<Arc<AtomicBool>>,
    state: RunState,
}

impl BacktestEngine {
    pub fn new(config: ExecutionConfig) -> Result<Self, BacktestError> {
        config.validate()?;
        Ok(BacktestEngine {
            config,
            progress: None,
            cancel: None,
            state: RunState::Idle,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Called after each processed bar with (processed, total).
    pub fn on_progress(mut self, callback: impl FnMut(usize, usize) + Send + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Cooperative cancellation: the run stops before the next bar once
    /// the flag is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn run(
        &mut self,
        strategy: &mut CompiledStrategy,
        bars: &[Bar],
    ) -> Result<BacktestResult, BacktestError> {
        self.state = RunState::Running;
        let result = self.run_inner(strategy, bars);
        self.state = match &result {
            Ok(_) => RunState::Completed,
            Err(BacktestError::Cancelled { .. }) => RunState::Cancelled,
            Err(_) => RunState::Failed,
        };
        result
    }

    fn run_inner(
        &mut self,
        strategy: &mut CompiledStrategy,
        bars: &[Bar],
    ) -> Result<BacktestResult, BacktestError> {
        if bars.is_empty() {
            return Err(BacktestError::EmptyData);
        }
        for (i, pair) in bars.windows(2).enumerate() {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(BacktestError::NonMonotonic { index: i + 1 });
            }
        }

        strategy.reset();
        let max_positions = strategy.risk.max_positions.unwrap_or(usize::MAX);
        let mut portfolio = Portfolio::new(
            self.config.initial_capital,
            self.config.commission_rate,
            max_positions,
        );

        let window_capacity = strategy.lookback + 1;
        let mut window: VecDeque<Bar> = VecDeque::with_capacity(window_capacity);
        let mut last_prices: BTreeMap<String, Decimal> = BTreeMap::new();
        let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(bars.len());
        let total = bars.len();

        for (i, bar) in bars.iter().enumerate() {
            if let Some(flag) = &self.cancel {
                if flag.load(Ordering::Relaxed) {
                    return Err(BacktestError::Cancelled { bars_processed: i });
                }
            }

            for indicator in strategy.indicators.values_mut() {
                indicator.update(bar);
            }
            if window.len() == window_capacity {
                window.pop_front();
            }
            window.push_back(bar.clone());
            if let Some(price) = Decimal::from_f64(bar.close) {
                last_prices.insert(bar.symbol.clone(), price);
            } else {
                warn!(symbol = %bar.symbol, close = bar.close, "unrepresentable close price");
            }

            let holding = portfolio.position(&bar.symbol).is_some();
            let signals = {
                let view = EvalView {
                    bars: &window,
                    indicators: &strategy.indicators,
                };
                signals_for_bar(strategy, &view, bar, holding)
            };

            for signal in signals {
                match signal.kind {
                    SignalKind::Buy => self.execute_buy(&mut portfolio, &signal, &last_prices),
                    SignalKind::Sell => {
                        if let Err(e) = portfolio.close_position(
                            &signal.symbol,
                            signal.price,
                            signal.timestamp,
                            &signal.reason,
                        ) {
                            warn!(symbol = %signal.symbol, error = %e, "sell signal skipped");
                        }
                    }
                }
            }

            portfolio.apply_risk_management(
                &last_prices,
                bar.timestamp,
                strategy.risk.stop_loss,
                strategy.risk.take_profit,
            );

            equity_curve.push(portfolio.snapshot(bar.timestamp, &last_prices));
            if let Some(progress) = &mut self.progress {
                progress(i + 1, total);
            }
        }

        let final_value = portfolio.total_value(&last_prices);
        let summary = metrics::summarize(
            portfolio.trades(),
            &equity_curve,
            self.config.initial_capital,
            self.config.risk_free_rate,
        );
        debug!(
            strategy = %strategy.name,
            bars = total,
            trades = summary.total_trades,
            "run complete"
        );

        Ok(BacktestResult {
            strategy_name: strategy.name.clone(),
            summary,
            trades: portfolio.into_trades(),
            equity_curve,
            bars_processed: total,
            initial_capital: self.config.initial_capital,
            final_value,
        })
    }

    /// Size the order as `size` of current equity, commission included,
    /// capped by available cash.
    fn execute_buy(
        &self,
        portfolio: &mut Portfolio,
        signal: &TradeSignal,
        prices: &BTreeMap<String, Decimal>,
    ) {
        if signal.price <= Decimal::ZERO {
            warn!(symbol = %signal.symbol, "non-positive price, buy skipped");
            return;
        }
        let Some(size) = Decimal::from_f64(signal.size) else {
            warn!(symbol = %signal.symbol, size = signal.size, "unrepresentable size, buy skipped");
            return;
        };

        let budget = (portfolio.total_value(prices) * size).min(portfolio.cash);
        let unit_cost = signal.price * (Decimal::ONE + portfolio.commission_rate);
        // truncate so the order never costs more than the budget
        let quantity =
            (budget / unit_cost).round_dp_with_strategy(QUANTITY_DP, RoundingStrategy::ToZero);
        if quantity <= Decimal::ZERO {
            warn!(symbol = %signal.symbol, "budget too small for one unit, buy skipped");
            return;
        }

        if let Err(e) = portfolio.open_position(
            &signal.symbol,
            quantity,
            signal.price,
            signal.timestamp,
            &signal.reason,
        ) {
            warn!(symbol = %signal.symbol, error = %e, "buy signal skipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::make_bars;
    use crate::domain::indicator::IndicatorRegistry;
    use crate::domain::strategy::StrategyConfig;
    use std::sync::Mutex;

    fn dec(v: f64) -> Decimal {
        Decimal::from_f64(v).unwrap()
    }

    fn threshold_strategy() -> CompiledStrategy {
        let config: StrategyConfig = serde_json::from_value(serde_json::json!({
            "name": "threshold",
            "signals": {
                "buy": [{ "condition": "close > 100" }],
                "sell": [{ "condition": "close < 90" }]
            },
            "position_size": 1.0
        }))
        .unwrap();
        config.compile(&IndicatorRegistry::with_builtins()).unwrap()
    }

    fn engine() -> BacktestEngine {
        BacktestEngine::new(ExecutionConfig::default()).unwrap()
    }

    #[test]
    fn rejects_empty_data() {
        let mut strategy = threshold_strategy();
        let err = engine().run(&mut strategy, &[]).unwrap_err();
        assert!(matches!(err, BacktestError::EmptyData));
    }

    #[test]
    fn rejects_non_monotonic_timestamps() {
        let mut bars = make_bars(&[100.0, 101.0, 102.0]);
        bars[2].timestamp = bars[0].timestamp;
        let mut strategy = threshold_strategy();
        let err = engine().run(&mut strategy, &bars).unwrap_err();
        assert!(matches!(err, BacktestError::NonMonotonic { index: 2 }));
    }

    #[test]
    fn rejects_bad_config() {
        let config = ExecutionConfig {
            initial_capital: Decimal::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            BacktestEngine::new(config),
            Err(BacktestError::InvalidConfig(_))
        ));

        let config = ExecutionConfig {
            commission_rate: dec(0.5),
            ..Default::default()
        };
        assert!(matches!(
            BacktestEngine::new(config),
            Err(BacktestError::InvalidConfig(_))
        ));
    }

    #[test]
    fn cancellation_before_first_bar() {
        let flag = Arc::new(AtomicBool::new(true));
        let mut strategy = threshold_strategy();
        let err = engine()
            .with_cancel_flag(flag)
            .run(&mut strategy, &make_bars(&[100.0, 101.0]))
            .unwrap_err();
        assert!(matches!(err, BacktestError::Cancelled { bars_processed: 0 }));
    }

    #[test]
    fn progress_reports_every_bar() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut strategy = threshold_strategy();
        engine()
            .on_progress(move |done, total| sink.lock().unwrap().push((done, total)))
            .run(&mut strategy, &make_bars(&[95.0, 96.0, 97.0]))
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn buy_then_sell_round_trip() {
        let bars = make_bars(&[95.0, 105.0, 110.0, 85.0, 86.0]);
        let mut strategy = threshold_strategy();
        let result = engine().run(&mut strategy, &bars).unwrap();

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.entry_price, dec(105.0));
        assert_eq!(trade.exit_price, Some(dec(85.0)));
        assert_eq!(result.equity_curve.len(), bars.len());
        assert!(result.final_value < result.initial_capital);
    }

    #[test]
    fn fractional_sizing_pyramids_while_holding() {
        // buy condition stays true and each bar leaves cash, so every bar
        // adds to the position
        let config: StrategyConfig = serde_json::from_value(serde_json::json!({
            "name": "quarter",
            "signals": {
                "buy": [{ "condition": "close > 100" }],
                "sell": [{ "condition": "close < 90" }]
            },
            "position_size": 0.25
        }))
        .unwrap();
        let mut strategy = config.compile(&IndicatorRegistry::with_builtins()).unwrap();
        let result = engine()
            .run(&mut strategy, &make_bars(&[105.0, 110.0, 120.0, 130.0]))
            .unwrap();

        assert_eq!(result.trades.len(), 4);
        assert!(result.trades.iter().all(|t| t.is_open()));
        // each add spends roughly a quarter of equity
        let point = result.equity_curve.last().unwrap();
        assert!(point.cash < result.initial_capital / Decimal::from(2));
    }

    #[test]
    fn full_sizing_leaves_no_cash_to_pyramid() {
        // buy condition stays true but the first bar is all-in
        let bars = make_bars(&[105.0, 110.0, 120.0]);
        let mut strategy = threshold_strategy();
        let result = engine().run(&mut strategy, &bars).unwrap();
        assert_eq!(result.trades.len(), 1);
        assert!(result.trades[0].is_open());
    }

    #[test]
    fn sell_firing_on_entry_bar_closes_same_bar() {
        let config: StrategyConfig = serde_json::from_value(serde_json::json!({
            "name": "in-and-out",
            "signals": {
                "buy": [{ "condition": "close > 100" }],
                "sell": [{ "condition": "close > 100" }]
            },
            "position_size": 1.0
        }))
        .unwrap();
        let mut strategy = config.compile(&IndicatorRegistry::with_builtins()).unwrap();
        let result = engine().run(&mut strategy, &make_bars(&[105.0, 95.0])).unwrap();

        // opened and closed within the first bar
        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert!(!trade.is_open());
        assert_eq!(trade.exit_time, Some(trade.entry_time));
        assert_eq!(trade.exit_price, Some(trade.entry_price));
        assert_eq!(trade.realized_pnl, Some(Decimal::ZERO));
    }

    #[test]
    fn fractional_position_size_leaves_cash() {
        let config: StrategyConfig = serde_json::from_value(serde_json::json!({
            "name": "half",
            "signals": {
                "buy": [{ "condition": "close > 100" }],
                "sell": [{ "condition": "close < 90" }]
            },
            "position_size": 0.5
        }))
        .unwrap();
        let mut strategy = config.compile(&IndicatorRegistry::with_builtins()).unwrap();
        let result = engine().run(&mut strategy, &make_bars(&[105.0])).unwrap();

        let point = &result.equity_curve[0];
        // quantity truncation leaves cash a hair above half
        assert!(point.cash >= dec(5_000.0));
        assert!(point.cash < dec(5_000.01));
        assert_eq!(point.total_value, dec(10_000.0));
    }

    #[test]
    fn stop_loss_exits_without_sell_signal() {
        let config: StrategyConfig = serde_json::from_value(serde_json::json!({
            "name": "stopped",
            "signals": {
                "buy": [{ "condition": "close > 100" }],
                "sell": [{ "condition": "close < 0" }]
            },
            "position_size": 1.0,
            "risk": { "stop_loss": 0.05 }
        }))
        .unwrap();
        let mut strategy = config.compile(&IndicatorRegistry::with_builtins()).unwrap();
        // entry at 105, 6% drop to 98.7 trips the 5% stop
        let result = engine()
            .run(&mut strategy, &make_bars(&[105.0, 104.0, 98.7]))
            .unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(
            result.trades[0].exit_reason.as_deref(),
            Some("stop_loss")
        );
    }

    #[test]
    fn deterministic_across_runs() {
        let bars = make_bars(&[95.0, 105.0, 110.0, 85.0, 100.0, 105.0, 80.0]);
        let mut s1 = threshold_strategy();
        let mut s2 = threshold_strategy();
        let r1 = engine().run(&mut s1, &bars).unwrap();
        let r2 = engine().run(&mut s2, &bars).unwrap();
        assert_eq!(r1.trades, r2.trades);
        assert_eq!(r1.equity_curve, r2.equity_curve);
    }

    #[test]
    fn rerun_on_same_strategy_resets_state() {
        let bars = make_bars(&[95.0, 105.0, 110.0, 85.0]);
        let mut strategy = threshold_strategy();
        let r1 = engine().run(&mut strategy, &bars).unwrap();
        let r2 = engine().run(&mut strategy, &bars).unwrap();
        assert_eq!(r1.trades, r2.trades);
    }

    #[test]
    fn run_state_tracks_outcome() {
        let mut e = engine();
        assert_eq!(e.state(), RunState::Idle);

        let mut strategy = threshold_strategy();
        e.run(&mut strategy, &make_bars(&[95.0, 96.0])).unwrap();
        assert_eq!(e.state(), RunState::Completed);

        let _ = e.run(&mut strategy, &[]);
        assert_eq!(e.state(), RunState::Failed);
    }

    #[test]
    fn eval_view_reads_window_and_indicators() {
        let bars = make_bars(&[100.0, 110.0]);
        let mut window = VecDeque::new();
        window.extend(bars.iter().cloned());
        let indicators = BTreeMap::new();
        let view = EvalView {
            bars: &window,
            indicators: &indicators,
        };
        assert_eq!(view.bar_field(BarField::Close, 0), Some(110.0));
        assert_eq!(view.bar_field(BarField::Close, 1), Some(100.0));
        assert_eq!(view.bar_field(BarField::Close, 2), None);
        assert_eq!(view.series("sma", 0), None);
    }
}

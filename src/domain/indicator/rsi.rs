//! Relative Strength Index.
//!
//! Wilder's smoothing over close-to-close changes:
//! - first average: simple mean of the first `period` gains/losses
//! - after that: avg = (prev_avg * (period-1) + current) / period
//!
//! RSI = 100 - 100 / (1 + avg_gain / avg_loss); when avg_loss is exactly
//! zero the output is pinned to 100 (never a division by zero).
//! `None` until `period` changes have been observed.

use super::{period_param, Indicator, IndicatorError, IndicatorSpec, ValueRing};
use crate::domain::ohlcv::Bar;

#[derive(Debug)]
pub struct Rsi {
    period: usize,
    prev_close: Option<f64>,
    changes_seen: usize,
    gain_sum: f64,
    loss_sum: f64,
    avg_gain: f64,
    avg_loss: f64,
    ring: ValueRing,
}

impl Rsi {
    pub fn new(period: usize, ring_capacity: usize) -> Self {
        Rsi {
            period,
            prev_close: None,
            changes_seen: 0,
            gain_sum: 0.0,
            loss_sum: 0.0,
            avg_gain: 0.0,
            avg_loss: 0.0,
            ring: ValueRing::new(ring_capacity),
        }
    }

    fn current(&self) -> f64 {
        if self.avg_loss == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + self.avg_gain / self.avg_loss)
        }
    }
}

impl Indicator for Rsi {
    fn update(&mut self, bar: &Bar) {
        let prev = match self.prev_close.replace(bar.close) {
            Some(prev) => prev,
            None => {
                self.ring.push(None);
                return;
            }
        };

        let change = bar.close - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        self.changes_seen += 1;

        if self.changes_seen < self.period {
            self.gain_sum += gain;
            self.loss_sum += loss;
            self.ring.push(None);
            return;
        }

        if self.changes_seen == self.period {
            self.gain_sum += gain;
            self.loss_sum += loss;
            self.avg_gain = self.gain_sum / self.period as f64;
            self.avg_loss = self.loss_sum / self.period as f64;
        } else {
            let p = self.period as f64;
            self.avg_gain = (self.avg_gain * (p - 1.0) + gain) / p;
            self.avg_loss = (self.avg_loss * (p - 1.0) + loss) / p;
        }

        self.ring.push(Some(self.current()));
    }

    fn value(&self, offset: usize) -> Option<f64> {
        self.ring.at(offset)
    }

    fn is_ready(&self) -> bool {
        self.changes_seen >= self.period
    }

    fn reset(&mut self) {
        self.prev_close = None;
        self.changes_seen = 0;
        self.gain_sum = 0.0;
        self.loss_sum = 0.0;
        self.avg_gain = 0.0;
        self.avg_loss = 0.0;
        self.ring.clear();
    }

    fn history(&self) -> Vec<Option<f64>> {
        self.ring.snapshot()
    }
}

pub fn construct(spec: &IndicatorSpec) -> Result<Box<dyn Indicator>, IndicatorError> {
    let period = period_param(spec, "rsi")?;
    Ok(Box::new(Rsi::new(period, spec.ring_capacity())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::make_bars;

    fn run(period: usize, closes: &[f64]) -> Rsi {
        let mut rsi = Rsi::new(period, closes.len() + 1);
        for bar in make_bars(closes) {
            rsi.update(&bar);
        }
        rsi
    }

    #[test]
    fn warmup_needs_period_changes() {
        let rsi = run(14, &(0..14).map(|i| 100.0 + i as f64).collect::<Vec<_>>());
        // 14 bars = 13 changes, one short
        assert!(!rsi.is_ready());
        assert_eq!(rsi.value(0), None);
    }

    #[test]
    fn all_gains_is_100() {
        let closes: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        let rsi = run(14, &closes);
        assert!(rsi.is_ready());
        assert_eq!(rsi.value(0), Some(100.0));
    }

    #[test]
    fn all_losses_is_0() {
        let closes: Vec<f64> = (0..15).map(|i| 100.0 - i as f64).collect();
        let rsi = run(14, &closes);
        let value = rsi.value(0).unwrap();
        assert!(value.abs() < f64::EPSILON, "RSI should be 0, got {}", value);
    }

    #[test]
    fn stays_in_range_and_finite() {
        let closes: Vec<f64> = (0..60)
            .map(|i| 100.0 + ((i as f64) % 7.0 - 3.0) * 2.0)
            .collect();
        let rsi = run(14, &closes);
        for slot in rsi.history() {
            if let Some(v) = slot {
                assert!(v.is_finite());
                assert!((0.0..=100.0).contains(&v), "RSI {} out of range", v);
            }
        }
    }

    #[test]
    fn flat_series_pins_to_100() {
        // no losses at all: avg_loss == 0 path
        let rsi = run(3, &[100.0, 100.0, 100.0, 100.0, 100.0]);
        assert_eq!(rsi.value(0), Some(100.0));
    }

    #[test]
    fn bullish_sample_above_50() {
        let closes = [
            44.0, 44.25, 44.5, 43.75, 44.5, 44.25, 44.75, 45.25, 45.5, 45.25, 45.5, 46.0, 46.25,
            46.0, 46.5,
        ];
        let rsi = run(14, &closes);
        let value = rsi.value(0).unwrap();
        assert!(value > 50.0 && value < 100.0, "got {}", value);
    }

    #[test]
    fn reset_restarts_warmup() {
        let mut rsi = run(3, &[1.0, 2.0, 3.0, 4.0]);
        assert!(rsi.is_ready());
        rsi.reset();
        assert!(!rsi.is_ready());
        rsi.update(&make_bars(&[5.0])[0]);
        assert_eq!(rsi.value(0), None);
    }
}

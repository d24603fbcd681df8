//! Weighted Moving Average.
//!
//! Linear weights over the last `period` source values, newest heaviest:
//! WMA = sum(value[i] * w[i]) / (1 + 2 + ... + period).

use std::collections::VecDeque;

use super::{period_param, Indicator, IndicatorError, IndicatorSpec, ValueRing};
use crate::domain::ohlcv::{Bar, BarField};

#[derive(Debug)]
pub struct Wma {
    period: usize,
    source: BarField,
    window: VecDeque<f64>,
    ring: ValueRing,
}

impl Wma {
    pub fn new(period: usize, source: BarField, ring_capacity: usize) -> Self {
        Wma {
            period,
            source,
            window: VecDeque::with_capacity(period),
            ring: ValueRing::new(ring_capacity),
        }
    }
}

impl Indicator for Wma {
    fn update(&mut self, bar: &Bar) {
        self.window.push_back(bar.field(self.source));
        if self.window.len() > self.period {
            self.window.pop_front();
        }

        if self.window.len() < self.period {
            self.ring.push(None);
            return;
        }

        let weight_sum = (self.period * (self.period + 1)) as f64 / 2.0;
        let weighted: f64 = self
            .window
            .iter()
            .enumerate()
            .map(|(i, &v)| v * (i + 1) as f64)
            .sum();
        self.ring.push(Some(weighted / weight_sum));
    }

    fn value(&self, offset: usize) -> Option<f64> {
        self.ring.at(offset)
    }

    fn is_ready(&self) -> bool {
        self.window.len() >= self.period
    }

    fn reset(&mut self) {
        self.window.clear();
        self.ring.clear();
    }

    fn history(&self) -> Vec<Option<f64>> {
        self.ring.snapshot()
    }
}

pub fn construct(spec: &IndicatorSpec) -> Result<Box<dyn Indicator>, IndicatorError> {
    let period = period_param(spec, "wma")?;
    Ok(Box::new(Wma::new(period, spec.source, spec.ring_capacity())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::make_bars;
    use approx::assert_relative_eq;

    #[test]
    fn warmup_then_weighted_mean() {
        let mut wma = Wma::new(3, BarField::Close, 8);
        for bar in make_bars(&[10.0, 20.0, 30.0]) {
            wma.update(&bar);
        }
        // (10*1 + 20*2 + 30*3) / 6
        assert_relative_eq!(wma.value(0).unwrap(), 140.0 / 6.0);
        assert_eq!(wma.value(1), None);
    }

    #[test]
    fn newest_value_weighs_most() {
        let mut up = Wma::new(3, BarField::Close, 8);
        let mut down = Wma::new(3, BarField::Close, 8);
        for bar in make_bars(&[10.0, 10.0, 40.0]) {
            up.update(&bar);
        }
        for bar in make_bars(&[40.0, 10.0, 10.0]) {
            down.update(&bar);
        }
        assert!(up.value(0).unwrap() > down.value(0).unwrap());
    }

    #[test]
    fn constant_input_passthrough() {
        let mut wma = Wma::new(4, BarField::Close, 8);
        for bar in make_bars(&[7.0; 6]) {
            wma.update(&bar);
        }
        assert_relative_eq!(wma.value(0).unwrap(), 7.0);
    }

    #[test]
    fn reset_restarts() {
        let mut wma = Wma::new(2, BarField::Close, 8);
        for bar in make_bars(&[1.0, 2.0]) {
            wma.update(&bar);
        }
        wma.reset();
        assert!(!wma.is_ready());
        assert_eq!(wma.value(0), None);
    }
}

//! Simple Moving Average.
//!
//! Arithmetic mean of the last `period` source values; `None` until
//! `period` values have been observed.

use std::collections::VecDeque;

use super::{period_param, Indicator, IndicatorError, IndicatorSpec, ValueRing};
use crate::domain::ohlcv::{Bar, BarField};

#[derive(Debug)]
pub struct Sma {
    period: usize,
    source: BarField,
    window: VecDeque<f64>,
    sum: f64,
    ring: ValueRing,
}

impl Sma {
    pub fn new(period: usize, source: BarField, ring_capacity: usize) -> Self {
        Sma {
            period,
            source,
            window: VecDeque::with_capacity(period),
            sum: 0.0,
            ring: ValueRing::new(ring_capacity),
        }
    }
}

impl Indicator for Sma {
    fn update(&mut self, bar: &Bar) {
        let input = bar.field(self.source);
        self.window.push_back(input);
        self.sum += input;
        if self.window.len() > self.period {
            if let Some(evicted) = self.window.pop_front() {
                self.sum -= evicted;
            }
        }

        if self.window.len() == self.period {
            self.ring.push(Some(self.sum / self.period as f64));
        } else {
            self.ring.push(None);
        }
    }

    fn value(&self, offset: usize) -> Option<f64> {
        self.ring.at(offset)
    }

    fn is_ready(&self) -> bool {
        self.window.len() >= self.period
    }

    fn reset(&mut self) {
        self.window.clear();
        self.sum = 0.0;
        self.ring.clear();
    }

    fn history(&self) -> Vec<Option<f64>> {
        self.ring.snapshot()
    }
}

pub fn construct(spec: &IndicatorSpec) -> Result<Box<dyn Indicator>, IndicatorError> {
    let period = period_param(spec, "sma")?;
    Ok(Box::new(Sma::new(period, spec.source, spec.ring_capacity())))
}

//! Rate of Change.
//!
//! Percent change of the source field versus `period` bars ago:
//! ROC = (value - value[period]) / value[period] * 100.
//! `None` until `period + 1` values observed, or when the reference value
//! is zero.

use std::collections::VecDeque;

use super::{period_param, Indicator, IndicatorError, IndicatorSpec, ValueRing};
use crate::domain::ohlcv::{Bar, BarField};

#[derive(Debug)]
pub struct Roc {
    period: usize,
    source: BarField,
    window: VecDeque<f64>,
    ring: ValueRing,
}

impl Roc {
    pub fn new(period: usize, source: BarField, ring_capacity: usize) -> Self {
        Roc {
            period,
            source,
            window: VecDeque::with_capacity(period + 1),
            ring: ValueRing::new(ring_capacity),
        }
    }
}

impl Indicator for Roc {
    fn update(&mut self, bar: &Bar) {
        self.window.push_back(bar.field(self.source));
        if self.window.len() > self.period + 1 {
            self.window.pop_front();
        }

        if self.window.len() < self.period + 1 {
            self.ring.push(None);
            return;
        }

        let reference = self.window[0];
        let current = self.window[self.window.len() - 1];
        if reference == 0.0 {
            self.ring.push(None);
        } else {
            self.ring
                .push(Some((current - reference) / reference * 100.0));
        }
    }

    fn value(&self, offset: usize) -> Option<f64> {
        self.ring.at(offset)
    }

    fn is_ready(&self) -> bool {
        self.window.len() > self.period
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
    let period = period_param(spec, "roc")?;
    Ok(Box::new(Roc::new(period, spec.source, spec.ring_capacity())))
}

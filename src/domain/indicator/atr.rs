//! Average True Range.
//!
//! True range of the first bar is high - low; later bars use the full
//! three-way max against the previous close. Seeded with the mean of the
//! first `period` true ranges, then Wilder-smoothed:
//! ATR = (prev_atr * (period-1) + tr) / period.

use super::{period_param, Indicator, IndicatorError, IndicatorSpec, ValueRing};
use crate::domain::ohlcv::Bar;

#[derive(Debug)]
pub struct Atr {
    period: usize,
    prev_close: Option<f64>,
    bars_seen: usize,
    tr_sum: f64,
    current: Option<f64>,
    ring: ValueRing,
}

impl Atr {
    pub fn new(period: usize, ring_capacity: usize) -> Self {
        Atr {
            period,
            prev_close: None,
            bars_seen: 0,
            tr_sum: 0.0,
            current: None,
            ring: ValueRing::new(ring_capacity),
        }
    }
}

impl Indicator for Atr {
    fn update(&mut self, bar: &Bar) {
        let tr = match self.prev_close {
            Some(prev) => bar.true_range(prev),
            None => bar.high - bar.low,
        };
        self.prev_close = Some(bar.close);
        self.bars_seen += 1;

        if self.bars_seen < self.period {
            self.tr_sum += tr;
            self.ring.push(None);
            return;
        }

        let next = if self.bars_seen == self.period {
            self.tr_sum += tr;
            self.tr_sum / self.period as f64
        } else {
            let p = self.period as f64;
            (self.current.unwrap_or(0.0) * (p - 1.0) + tr) / p
        };

        self.current = Some(next);
        self.ring.push(Some(next));
    }

    fn value(&self, offset: usize) -> Option<f64> {
        self.ring.at(offset)
    }

    fn is_ready(&self) -> bool {
        self.bars_seen >= self.period
    }

    fn reset(&mut self) {
        self.prev_close = None;
        self.bars_seen = 0;
        self.tr_sum = 0.0;
        self.current = None;
        self.ring.clear();
    }

    fn history(&self) -> Vec<Option<f64>> {
        self.ring.snapshot()
    }
}

pub fn construct(spec: &IndicatorSpec) -> Result<Box<dyn Indicator>, IndicatorError> {
    let period = period_param(spec, "atr")?;
    Ok(Box::new(Atr::new(period, spec.ring_capacity())))
}

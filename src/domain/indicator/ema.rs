//! Exponential Moving Average.
//!
//! k = 2/(period+1), EMA[i] = input*k + EMA[i-1]*(1-k).
//!
//! Seeded with the first input value rather than a warm-up SMA, so the
//! first output equals the first input and the indicator is ready from
//! bar one. Early outputs are biased toward the seed.

use super::{period_param, Indicator, IndicatorError, IndicatorSpec, ValueRing};
use crate::domain::ohlcv::{Bar, BarField};

#[derive(Debug)]
pub struct Ema {
    k: f64,
    source: BarField,
    current: Option<f64>,
    ring: ValueRing,
}

impl Ema {
    pub fn new(period: usize, source: BarField, ring_capacity: usize) -> Self {
        Ema {
            k: 2.0 / (period as f64 + 1.0),
            source,
            current: None,
            ring: ValueRing::new(ring_capacity),
        }
    }
}

impl Indicator for Ema {
    fn update(&mut self, bar: &Bar) {
        let input = bar.field(self.source);
        let next = match self.current {
            None => input,
            Some(prev) => input * self.k + prev * (1.0 - self.k),
        };
        self.current = Some(next);
        self.ring.push(Some(next));
    }

    fn value(&self, offset: usize) -> Option<f64> {
        self.ring.at(offset)
    }

    fn is_ready(&self) -> bool {
        self.current.is_some()
    }

    fn reset(&mut self) {
        self.current = None;
        self.ring.clear();
    }

    fn history(&self) -> Vec<Option<f64>> {
        self.ring.snapshot()
    }
}

pub fn construct(spec: &IndicatorSpec) -> Result<Box<dyn Indicator>, IndicatorError> {
    let period = period_param(spec, "ema")?;
    Ok(Box::new(Ema::new(period, spec.source, spec.ring_capacity())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::make_bars;
    use approx::assert_relative_eq;

    #[test]
    fn first_output_equals_first_input() {
        let mut ema = Ema::new(3, BarField::Close, 8);
        let bars = make_bars(&[10.0, 20.0]);
        ema.update(&bars[0]);
        assert_eq!(ema.value(0), Some(10.0));
        assert!(ema.is_ready());
    }

    #[test]
    fn recursive_smoothing() {
        let mut ema = Ema::new(3, BarField::Close, 8);
        let k = 2.0 / 4.0;
        for bar in make_bars(&[10.0, 20.0, 30.0]) {
            ema.update(&bar);
        }

        let e1 = 20.0 * k + 10.0 * (1.0 - k);
        let e2 = 30.0 * k + e1 * (1.0 - k);
        assert_relative_eq!(ema.value(1).unwrap(), e1);
        assert_relative_eq!(ema.value(0).unwrap(), e2);
    }

    #[test]
    fn constant_input_is_fixed_point() {
        let mut ema = Ema::new(5, BarField::Close, 8);
        for bar in make_bars(&[100.0; 6]) {
            ema.update(&bar);
        }
        assert_relative_eq!(ema.value(0).unwrap(), 100.0);
    }

    #[test]
    fn converges_toward_new_level() {
        let mut ema = Ema::new(2, BarField::Close, 32);
        let mut closes = vec![10.0];
        closes.extend(std::iter::repeat(50.0).take(20));
        for bar in make_bars(&closes) {
            ema.update(&bar);
        }
        assert!((ema.value(0).unwrap() - 50.0).abs() < 1e-6);
    }

    #[test]
    fn reset_clears_seed() {
        let mut ema = Ema::new(3, BarField::Close, 8);
        for bar in make_bars(&[10.0, 20.0]) {
            ema.update(&bar);
        }
        ema.reset();
        assert!(!ema.is_ready());
        assert_eq!(ema.value(0), None);

        // reseeds from the next input
        ema.update(&make_bars(&[70.0])[0]);
        assert_eq!(ema.value(0), Some(70.0));
    }
}

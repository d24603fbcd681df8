//! Incremental technical indicators.
//!
//! Each indicator consumes one bar at a time and keeps a bounded ring of
//! past outputs. `value(0)` is the most recent output, `value(1)` the one
//! before it; slots produced during warm-up, and offsets beyond retained
//! history, are `None`. Callers treat `None` as "not evaluable yet".
//!
//! New kinds are added by registering a constructor in an
//! [`IndicatorRegistry`]; the compiler and engine never enumerate kinds.

pub mod atr;
pub mod ema;
pub mod roc;
pub mod rsi;
pub mod sma;
pub mod wma;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

use crate::domain::ohlcv::{Bar, BarField};

/// History retained when the compiled conditions impose no deeper
/// requirement.
pub const DEFAULT_LOOKBACK: usize = 8;

pub trait Indicator: fmt::Debug {
    /// Consume one bar and append one output slot (possibly `None`).
    fn update(&mut self, bar: &Bar);

    /// Output `offset` bars back from the most recent update. `None` when
    /// the slot is a warm-up gap or the offset exceeds retained history.
    fn value(&self, offset: usize) -> Option<f64>;

    fn is_ready(&self) -> bool;

    /// Forget all state, as if no bar had been observed.
    fn reset(&mut self);

    /// Retained outputs, oldest first.
    fn history(&self) -> Vec<Option<f64>>;
}

/// Bounded ring of indicator outputs. One slot per observed bar, oldest
/// slots evicted once capacity is reached.
#[derive(Debug, Clone)]
pub struct ValueRing {
    values: VecDeque<Option<f64>>,
    capacity: usize,
}

impl ValueRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        ValueRing {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: Option<f64>) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn at(&self, offset: usize) -> Option<f64> {
        let len = self.values.len();
        if offset >= len {
            return None;
        }
        self.values[len - 1 - offset]
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn snapshot(&self) -> Vec<Option<f64>> {
        self.values.iter().copied().collect()
    }
}

/// Inputs to an indicator constructor: declared numeric parameters, the
/// source bar field, and how much output history the engine needs back.
#[derive(Debug, Clone)]
pub struct IndicatorSpec {
    pub params: BTreeMap<String, f64>,
    pub source: BarField,
    pub lookback: usize,
}

impl IndicatorSpec {
    pub fn new(params: BTreeMap<String, f64>) -> Self {
        IndicatorSpec {
            params,
            source: BarField::Close,
            lookback: DEFAULT_LOOKBACK,
        }
    }

    pub fn with_source(mut self, source: BarField) -> Self {
        self.source = source;
        self
    }

    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback = lookback;
        self
    }

    /// Ring capacity covering the requested lookback plus the current slot.
    pub fn ring_capacity(&self) -> usize {
        self.lookback + 1
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum IndicatorError {
    #[error("unknown indicator kind: {0}")]
    UnknownKind(String),

    #[error("{kind} requires parameter '{param}'")]
    MissingParam { kind: String, param: String },

    #[error("invalid {kind} parameter '{param}': {reason}")]
    InvalidParam {
        kind: String,
        param: String,
        reason: String,
    },
}

pub type IndicatorCtor = fn(&IndicatorSpec) -> Result<Box<dyn Indicator>, IndicatorError>;

/// Explicitly constructed constructor table. Passed into the strategy
/// compiler so parallel engine instances never share mutable state.
#[derive(Debug, Clone)]
pub struct IndicatorRegistry {
    ctors: HashMap<String, IndicatorCtor>,
}

impl IndicatorRegistry {
    pub fn empty() -> Self {
        IndicatorRegistry {
            ctors: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("sma", sma::construct);
        registry.register("ema", ema::construct);
        registry.register("rsi", rsi::construct);
        registry.register("wma", wma::construct);
        registry.register("roc", roc::construct);
        registry.register("atr", atr::construct);
        registry
    }

    pub fn register(&mut self, kind: &str, ctor: IndicatorCtor) {
        self.ctors.insert(kind.to_ascii_lowercase(), ctor);
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.ctors.contains_key(&kind.to_ascii_lowercase())
    }

    pub fn build(
        &self,
        kind: &str,
        spec: &IndicatorSpec,
    ) -> Result<Box<dyn Indicator>, IndicatorError> {
        match self.ctors.get(&kind.to_ascii_lowercase()) {
            Some(ctor) => ctor(spec),
            None => Err(IndicatorError::UnknownKind(kind.to_string())),
        }
    }
}

impl Default for IndicatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Extract the required `period` parameter, validated as a positive integer.
pub(crate) fn period_param(spec: &IndicatorSpec, kind: &str) -> Result<usize, IndicatorError> {
    let raw = spec
        .params
        .get("period")
        .copied()
        .ok_or_else(|| IndicatorError::MissingParam {
            kind: kind.to_string(),
            param: "period".to_string(),
        })?;

    if raw < 1.0 || raw.fract() != 0.0 || !raw.is_finite() {
        return Err(IndicatorError::InvalidParam {
            kind: kind.to_string(),
            param: "period".to_string(),
            reason: format!("expected a positive integer, got {}", raw),
        });
    }

    Ok(raw as usize)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    pub fn make_bars(closes: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                symbol: "TEST".into(),
                timestamp: start + Duration::days(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    pub fn spec_with_period(period: usize) -> IndicatorSpec {
        let mut params = BTreeMap::new();
        params.insert("period".to_string(), period as f64);
        IndicatorSpec::new(params)
    }
}

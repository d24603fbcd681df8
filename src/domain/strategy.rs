//! Strategy definitions and compilation.
//!
//! A [`StrategyConfig`] is the declarative form a strategy arrives in,
//! usually deserialized from JSON: named indicators, buy/sell signal
//! conditions, sizing and risk limits, plus a parameter table spliced
//! into condition text via `{{ parameters.name }}`. [`StrategyConfig::compile`]
//! turns it into a [`CompiledStrategy`] holding live indicator instances
//! and parsed condition trees, after validation has collected every
//! problem instead of stopping at the first.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::condition::Expr;
use crate::domain::condition_parser;
use crate::domain::indicator::{
    Indicator, IndicatorRegistry, IndicatorSpec, DEFAULT_LOOKBACK,
};
use crate::domain::ohlcv::BarField;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub indicators: Vec<IndicatorConfig>,
    pub signals: SignalsConfig,
    /// Fraction of equity committed per buy, in (0, 1].
    pub position_size: f64,
    #[serde(default)]
    pub risk: Option<RiskConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Text(String),
    Flag(bool),
}

impl ParamValue {
    fn render(&self) -> String {
        match self {
            ParamValue::Number(v) => {
                if v.fract() == 0.0 && v.abs() < 1e15 {
                    format!("{}", *v as i64)
                } else {
                    format!("{}", v)
                }
            }
            ParamValue::Text(s) => s.clone(),
            ParamValue::Flag(b) => b.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    /// Series name conditions refer to. Must not shadow a bar field.
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
    /// Bar field the indicator reads, default close.
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SignalsConfig {
    #[serde(default)]
    pub buy: Vec<SignalConfig>,
    #[serde(default)]
    pub sell: Vec<SignalConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    pub condition: String,
    /// Lower number wins when several conditions fire on the same bar.
    #[serde(default)]
    pub priority: i32,
    /// Per-signal sizing override, buy signals only.
    #[serde(default)]
    pub size: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Close when a position is down this fraction, e.g. 0.05.
    #[serde(default)]
    pub stop_loss: Option<f64>,
    /// Close when a position is up this fraction.
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub max_positions: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    /// Path of the offending field, e.g. `signals.buy[0].condition`.
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn new() -> Self {
        ValidationReport {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.is_valid = false;
        self.errors.push(ValidationIssue {
            field: field.into(),
            message: message.into(),
        });
    }

    fn warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationIssue {
            field: field.into(),
            message: message.into(),
        });
    }
}

/// Replace every `{{ parameters.name }}` in `text` with the rendered
/// parameter value. Unknown references are errors.
pub fn substitute_parameters(
    text: &str,
    parameters: &BTreeMap<String, ParamValue>,
) -> Result<String, String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err("unterminated '{{' placeholder".to_string());
        };
        let inner = after[..end].trim();
        let Some(name) = inner.strip_prefix("parameters.") else {
            return Err(format!("unsupported placeholder: {{{{ {} }}}}", inner));
        };
        let Some(value) = parameters.get(name) else {
            return Err(format!("unknown parameter: {}", name));
        };
        out.push_str(&value.render());
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// A buy or sell rule ready for per-bar evaluation.
#[derive(Debug)]
pub struct CompiledSignal {
    pub condition: Expr,
    pub priority: i32,
    pub size: f64,
    /// Attribution text for trades: the signal description if present,
    /// otherwise the raw condition.
    pub reason: String,
}

#[derive(Debug)]
pub struct CompiledStrategy {
    pub name: String,
    pub indicators: BTreeMap<String, Box<dyn Indicator>>,
    pub buy_rules: Vec<CompiledSignal>,
    pub sell_rules: Vec<CompiledSignal>,
    pub position_size: f64,
    pub risk: RiskConfig,
    /// Deepest bar history any condition can reach.
    pub lookback: usize,
}

impl CompiledStrategy {
    pub fn reset(&mut self) {
        for indicator in self.indicators.values_mut() {
            indicator.reset();
        }
    }
}

impl StrategyConfig {
    /// Collect every structural problem in the config. Never mutates and
    /// never stops early.
    pub fn validate(&self, registry: &IndicatorRegistry) -> ValidationReport {
        let mut report = ValidationReport::new();

        if self.name.trim().is_empty() {
            report.error("name", "strategy name must not be empty");
        }
        if !(self.position_size > 0.0 && self.position_size <= 1.0) {
            report.error(
                "position_size",
                format!("must be in (0, 1], got {}", self.position_size),
            );
        }

        let mut seen_names = BTreeSet::new();
        for (i, ind) in self.indicators.iter().enumerate() {
            let field = format!("indicators[{}]", i);
            if ind.name.trim().is_empty() {
                report.error(format!("{}.name", field), "indicator name must not be empty");
            }
            if BarField::from_name(&ind.name).is_some() {
                report.error(
                    format!("{}.name", field),
                    format!("'{}' shadows a bar field", ind.name),
                );
            }
            if !seen_names.insert(ind.name.clone()) {
                report.error(
                    format!("{}.name", field),
                    format!("duplicate indicator name '{}'", ind.name),
                );
            }
            if !registry.contains(&ind.kind) {
                report.error(
                    format!("{}.kind", field),
                    format!("unknown indicator kind '{}'", ind.kind),
                );
            } else if let Err(e) = registry.build(&ind.kind, &self.indicator_spec(ind, DEFAULT_LOOKBACK))
            {
                report.error(format!("{}.params", field), e.to_string());
            }
            if let Some(source) = &ind.source {
                if BarField::from_name(source).is_none() {
                    report.error(
                        format!("{}.source", field),
                        format!("unknown bar field '{}'", source),
                    );
                }
            }
        }

        if self.signals.buy.is_empty() {
            report.error("signals.buy", "at least one buy signal is required");
        }
        if self.signals.sell.is_empty() {
            report.warning(
                "signals.sell",
                "no sell signals: positions only exit via risk limits",
            );
        }

        let known: BTreeSet<String> = BarField::ALL
            .iter()
            .map(|f| f.name().to_string())
            .chain(self.indicators.iter().map(|i| i.name.clone()))
            .collect();
        let mut referenced: BTreeSet<String> = BTreeSet::new();

        for (list, signals) in [("buy", &self.signals.buy), ("sell", &self.signals.sell)] {
            for (i, signal) in signals.iter().enumerate() {
                let field = format!("signals.{}[{}]", list, i);
                if let Some(size) = signal.size {
                    if !(size > 0.0 && size <= 1.0) {
                        report.error(
                            format!("{}.size", field),
                            format!("must be in (0, 1], got {}", size),
                        );
                    }
                }
                let condition_field = format!("{}.condition", field);
                let text = match substitute_parameters(&signal.condition, &self.parameters) {
                    Ok(text) => text,
                    Err(e) => {
                        report.error(condition_field, e);
                        continue;
                    }
                };
                match condition_parser::parse(&text) {
                    Ok(expr) => {
                        let mut refs = BTreeSet::new();
                        expr.collect_series_refs(&mut refs);
                        for name in &refs {
                            if !known.contains(name) {
                                report.error(
                                    condition_field.clone(),
                                    format!("undefined series '{}'", name),
                                );
                            }
                        }
                        referenced.extend(refs);
                    }
                    Err(e) => {
                        report.error(
                            condition_field,
                            format!("{} at position {}", e.message, e.position),
                        );
                    }
                }
            }
        }

        for (i, ind) in self.indicators.iter().enumerate() {
            if !referenced.contains(&ind.name) {
                report.warning(
                    format!("indicators[{}].name", i),
                    format!("indicator '{}' is never referenced by a signal", ind.name),
                );
            }
        }

        if let Some(risk) = &self.risk {
            if let Some(stop) = risk.stop_loss {
                if !(stop > 0.0 && stop < 1.0) {
                    report.error("risk.stop_loss", format!("must be in (0, 1), got {}", stop));
                }
            }
            if let Some(take) = risk.take_profit {
                if take <= 0.0 {
                    report.error("risk.take_profit", format!("must be positive, got {}", take));
                }
            }
            if risk.max_positions == Some(0) {
                report.error("risk.max_positions", "must be at least 1");
            }
        }

        report
    }

    /// Validate and build the runnable form. Compilation is deterministic:
    /// compiling the same config twice yields strategies that behave
    /// identically.
    pub fn compile(
        &self,
        registry: &IndicatorRegistry,
    ) -> Result<CompiledStrategy, ValidationReport> {
        let report = self.validate(registry);
        if !report.is_valid {
            return Err(report);
        }

        let buy_rules = self.compile_signals(&self.signals.buy, true);
        let sell_rules = self.compile_signals(&self.signals.sell, false);

        let lookback = buy_rules
            .iter()
            .chain(&sell_rules)
            .map(|r| r.condition.max_lookback())
            .max()
            .unwrap_or(0);

        let ring_lookback = lookback.max(DEFAULT_LOOKBACK);
        let mut indicators: BTreeMap<String, Box<dyn Indicator>> = BTreeMap::new();
        for ind in &self.indicators {
            let spec = self.indicator_spec(ind, ring_lookback);
            // validation already proved this constructs
            let built = self
                .build_checked(registry, &ind.kind, &spec)
                .map_err(|e| {
                    let mut r = ValidationReport::new();
                    r.error("indicators", e);
                    r
                })?;
            indicators.insert(ind.name.clone(), built);
        }

        Ok(CompiledStrategy {
            name: self.name.clone(),
            indicators,
            buy_rules,
            sell_rules,
            position_size: self.position_size,
            risk: self.risk.clone().unwrap_or_default(),
            lookback,
        })
    }

    fn build_checked(
        &self,
        registry: &IndicatorRegistry,
        kind: &str,
        spec: &IndicatorSpec,
    ) -> Result<Box<dyn Indicator>, String> {
        registry.build(kind, spec).map_err(|e| e.to_string())
    }

    fn indicator_spec(&self, ind: &IndicatorConfig, lookback: usize) -> IndicatorSpec {
        let source = ind
            .source
            .as_deref()
            .and_then(BarField::from_name)
            .unwrap_or(BarField::Close);
        IndicatorSpec {
            params: ind.params.clone(),
            source,
            lookback,
        }
    }

    fn compile_signals(&self, signals: &[SignalConfig], is_buy: bool) -> Vec<CompiledSignal> {
        let mut rules: Vec<CompiledSignal> = signals
            .iter()
            .map(|signal| {
                // infallible here: validation parsed the same text
                let text = substitute_parameters(&signal.condition, &self.parameters)
                    .unwrap_or_else(|_| signal.condition.clone());
                let condition = condition_parser::parse(&text)
                    .unwrap_or(Expr::Literal(0.0));
                let size = if is_buy {
                    signal.size.unwrap_or(self.position_size)
                } else {
                    0.0
                };
                CompiledSignal {
                    condition,
                    priority: signal.priority,
                    size,
                    reason: signal
                        .description
                        .clone()
                        .unwrap_or_else(|| signal.condition.clone()),
                }
            })
            .collect();
        rules.sort_by_key(|r| r.priority);
        rules
    }
}

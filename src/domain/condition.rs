//! Condition expression trees.
//!
//! Parse-once / evaluate-many: the parser produces an immutable [`Expr`]
//! that the engine walks once per bar. The tree also answers two static
//! questions the compiler needs before any bar is processed: which named
//! series are referenced, and how many bars of history evaluation can
//! reach back.

use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(f64),
    /// Named series with a historical offset: 0 = current bar, 1 = one bar
    /// back. `close` and friends resolve to bar fields, anything else to a
    /// declared indicator.
    SeriesRef {
        name: String,
        offset: usize,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    FunctionCall {
        func: Function,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Gt | BinaryOp::Lt | BinaryOp::Ge | BinaryOp::Le | BinaryOp::Eq | BinaryOp::Ne
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Crossover,
    Crossunder,
    Rising,
    Falling,
    Highest,
    Lowest,
    Avg,
    Sum,
    Abs,
    Min,
    Max,
    Pow,
    Sqrt,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Function> {
        match name {
            "crossover" => Some(Function::Crossover),
            "crossunder" => Some(Function::Crossunder),
            "rising" => Some(Function::Rising),
            "falling" => Some(Function::Falling),
            "highest" => Some(Function::Highest),
            "lowest" => Some(Function::Lowest),
            "avg" => Some(Function::Avg),
            "sum" => Some(Function::Sum),
            "abs" => Some(Function::Abs),
            "min" => Some(Function::Min),
            "max" => Some(Function::Max),
            "pow" => Some(Function::Pow),
            "sqrt" => Some(Function::Sqrt),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::Crossover => "crossover",
            Function::Crossunder => "crossunder",
            Function::Rising => "rising",
            Function::Falling => "falling",
            Function::Highest => "highest",
            Function::Lowest => "lowest",
            Function::Avg => "avg",
            Function::Sum => "sum",
            Function::Abs => "abs",
            Function::Min => "min",
            Function::Max => "max",
            Function::Pow => "pow",
            Function::Sqrt => "sqrt",
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Function::Abs | Function::Sqrt => 1,
            _ => 2,
        }
    }

    /// Whether the second argument is a bar-count window that must be a
    /// positive integer literal (so lookback stays statically known).
    pub fn takes_window(&self) -> bool {
        matches!(
            self,
            Function::Rising
                | Function::Falling
                | Function::Highest
                | Function::Lowest
                | Function::Avg
                | Function::Sum
        )
    }
}

impl Expr {
    /// Names of every referenced series, bar fields included.
    pub fn collect_series_refs(&self, refs: &mut BTreeSet<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::SeriesRef { name, .. } => {
                refs.insert(name.clone());
            }
            Expr::UnaryOp { operand, .. } => operand.collect_series_refs(refs),
            Expr::BinaryOp { left, right, .. } => {
                left.collect_series_refs(refs);
                right.collect_series_refs(refs);
            }
            Expr::FunctionCall { args, .. } => {
                for arg in args {
                    arg.collect_series_refs(refs);
                }
            }
        }
    }

    /// Deepest historical offset evaluation of this tree can reach.
    pub fn max_lookback(&self) -> usize {
        match self {
            Expr::Literal(_) => 0,
            Expr::SeriesRef { offset, .. } => *offset,
            Expr::UnaryOp { operand, .. } => operand.max_lookback(),
            Expr::BinaryOp { left, right, .. } => left.max_lookback().max(right.max_lookback()),
            Expr::FunctionCall { func, args } => {
                let base = args.iter().map(Expr::max_lookback).max().unwrap_or(0);
                match func {
                    Function::Crossover | Function::Crossunder => base + 1,
                    f if f.takes_window() => {
                        let window = args.get(1).and_then(Expr::as_window).unwrap_or(1);
                        base + window.saturating_sub(1)
                    }
                    _ => base,
                }
            }
        }
    }

    /// The value of a positive-integer-literal window argument.
    pub fn as_window(&self) -> Option<usize> {
        match self {
            Expr::Literal(v) if *v >= 1.0 && v.fract() == 0.0 => Some(*v as usize),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(name: &str, offset: usize) -> Expr {
        Expr::SeriesRef {
            name: name.into(),
            offset,
        }
    }

    #[test]
    fn collect_refs_walks_whole_tree() {
        let expr = Expr::BinaryOp {
            op: BinaryOp::And,
            left: Box::new(Expr::BinaryOp {
                op: BinaryOp::Gt,
                left: Box::new(series("sma_fast", 0)),
                right: Box::new(series("sma_slow", 2)),
            }),
            right: Box::new(Expr::FunctionCall {
                func: Function::Rising,
                args: vec![series("close", 0), Expr::Literal(3.0)],
            }),
        };

        let mut refs = BTreeSet::new();
        expr.collect_series_refs(&mut refs);
        let names: Vec<&str> = refs.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["close", "sma_fast", "sma_slow"]);
    }

    #[test]
    fn lookback_of_plain_ref_is_offset() {
        assert_eq!(series("close", 3).max_lookback(), 3);
        assert_eq!(Expr::Literal(5.0).max_lookback(), 0);
    }

    #[test]
    fn crossover_adds_one_bar() {
        let expr = Expr::FunctionCall {
            func: Function::Crossover,
            args: vec![series("sma_fast", 0), series("sma_slow", 0)],
        };
        assert_eq!(expr.max_lookback(), 1);
    }

    #[test]
    fn crossover_of_offset_series() {
        let expr = Expr::FunctionCall {
            func: Function::Crossover,
            args: vec![series("sma_fast", 2), series("sma_slow", 0)],
        };
        assert_eq!(expr.max_lookback(), 3);
    }

    #[test]
    fn window_functions_reach_back_window_minus_one() {
        let expr = Expr::FunctionCall {
            func: Function::Highest,
            args: vec![series("high", 0), Expr::Literal(5.0)],
        };
        assert_eq!(expr.max_lookback(), 4);
    }

    #[test]
    fn rising_over_offset_series() {
        let expr = Expr::FunctionCall {
            func: Function::Rising,
            args: vec![series("rsi", 1), Expr::Literal(3.0)],
        };
        assert_eq!(expr.max_lookback(), 3);
    }

    #[test]
    fn scalar_functions_do_not_extend_lookback() {
        let expr = Expr::FunctionCall {
            func: Function::Max,
            args: vec![series("close", 2), Expr::Literal(0.0)],
        };
        assert_eq!(expr.max_lookback(), 2);
    }

    #[test]
    fn as_window_accepts_positive_integers_only() {
        assert_eq!(Expr::Literal(3.0).as_window(), Some(3));
        assert_eq!(Expr::Literal(0.0).as_window(), None);
        assert_eq!(Expr::Literal(2.5).as_window(), None);
        assert_eq!(series("close", 0).as_window(), None);
    }

    #[test]
    fn function_arity() {
        assert_eq!(Function::Abs.arity(), 1);
        assert_eq!(Function::Sqrt.arity(), 1);
        assert_eq!(Function::Crossover.arity(), 2);
        assert_eq!(Function::Pow.arity(), 2);
    }

    #[test]
    fn function_name_round_trip() {
        for func in [
            Function::Crossover,
            Function::Crossunder,
            Function::Rising,
            Function::Falling,
            Function::Highest,
            Function::Lowest,
            Function::Avg,
            Function::Sum,
            Function::Abs,
            Function::Min,
            Function::Max,
            Function::Pow,
            Function::Sqrt,
        ] {
            assert_eq!(Function::from_name(func.name()), Some(func));
        }
        assert_eq!(Function::from_name("median"), None);
    }
}

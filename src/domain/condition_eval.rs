//! Condition expression evaluation.
//!
//! Evaluation is nullable throughout: any series value that is not yet
//! available (indicator warming up, offset past the start of data) makes
//! the subexpression `None`, and `None` propagates upward without
//! short-circuiting. [`eval_condition`] collapses the result at the root,
//! where a null condition never fires a signal.

use crate::domain::condition::{BinaryOp, Expr, Function, UnaryOp};
use crate::domain::ohlcv::BarField;

/// Tolerance for `==` and `!=` on floating point series.
pub const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Num(f64),
    Bool(bool),
}

impl Value {
    fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(v) => Some(*v),
            Value::Bool(_) => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Num(_) => None,
        }
    }
}

/// Read access to the named series visible from a condition.
///
/// `offset` counts bars back from the bar under evaluation: 0 is the
/// current bar, 1 the previous. Either accessor returns `None` when the
/// requested bar does not exist or the value there is a gap.
pub trait EvalContext {
    fn bar_field(&self, field: BarField, offset: usize) -> Option<f64>;
    fn series(&self, name: &str, offset: usize) -> Option<f64>;
}

/// Evaluate `expr` as seen from `shift` bars before the current one.
///
/// The shift is how crossover and the window functions look at earlier
/// bars: re-evaluating their argument expressions with a larger shift is
/// equivalent to evaluating them on that earlier bar.
pub fn eval(expr: &Expr, ctx: &dyn EvalContext, shift: usize) -> Option<Value> {
    match expr {
        Expr::Literal(v) => Some(Value::Num(*v)),
        Expr::SeriesRef { name, offset } => {
            let total = offset + shift;
            let value = match BarField::from_name(name) {
                Some(field) => ctx.bar_field(field, total),
                None => ctx.series(name, total),
            };
            value.map(Value::Num)
        }
        Expr::UnaryOp { op, operand } => {
            let value = eval(operand, ctx, shift)?;
            match op {
                UnaryOp::Not => value.as_bool().map(|b| Value::Bool(!b)),
                UnaryOp::Neg => value.as_num().map(|v| Value::Num(-v)),
            }
        }
        Expr::BinaryOp { op, left, right } => {
            let lhs = eval(left, ctx, shift)?;
            let rhs = eval(right, ctx, shift)?;
            eval_binary(*op, lhs, rhs)
        }
        Expr::FunctionCall { func, args } => eval_function(*func, args, ctx, shift),
    }
}

/// Evaluate a condition to its fired/not-fired answer. A null result, or
/// a condition that does not produce a boolean, counts as not fired.
pub fn eval_condition(expr: &Expr, ctx: &dyn EvalContext) -> bool {
    matches!(eval(expr, ctx, 0), Some(Value::Bool(true)))
}

fn eval_binary(op: BinaryOp, lhs: Value, rhs: Value) -> Option<Value> {
    if op.is_logical() {
        let l = lhs.as_bool()?;
        let r = rhs.as_bool()?;
        let result = match op {
            BinaryOp::And => l && r,
            BinaryOp::Or => l || r,
            _ => unreachable!(),
        };
        return Some(Value::Bool(result));
    }

    let l = lhs.as_num()?;
    let r = rhs.as_num()?;
    let value = match op {
        BinaryOp::Gt => Value::Bool(l > r),
        BinaryOp::Lt => Value::Bool(l < r),
        BinaryOp::Ge => Value::Bool(l >= r),
        BinaryOp::Le => Value::Bool(l <= r),
        BinaryOp::Eq => Value::Bool((l - r).abs() < EPSILON),
        BinaryOp::Ne => Value::Bool((l - r).abs() >= EPSILON),
        BinaryOp::Add => Value::Num(l + r),
        BinaryOp::Sub => Value::Num(l - r),
        BinaryOp::Mul => Value::Num(l * r),
        BinaryOp::Div => {
            if r == 0.0 {
                return None;
            }
            Value::Num(l / r)
        }
        BinaryOp::And | BinaryOp::Or => unreachable!(),
    };
    Some(value)
}

fn eval_function(
    func: Function,
    args: &[Expr],
    ctx: &dyn EvalContext,
    shift: usize,
) -> Option<Value> {
    match func {
        Function::Crossover => {
            let (a_now, b_now, a_prev, b_prev) = cross_operands(args, ctx, shift)?;
            Some(Value::Bool(a_now > b_now && a_prev <= b_prev))
        }
        Function::Crossunder => {
            let (a_now, b_now, a_prev, b_prev) = cross_operands(args, ctx, shift)?;
            Some(Value::Bool(a_now < b_now && a_prev >= b_prev))
        }
        Function::Rising => {
            let values = window_values(args, ctx, shift)?;
            Some(Value::Bool(values.windows(2).all(|w| w[0] > w[1])))
        }
        Function::Falling => {
            let values = window_values(args, ctx, shift)?;
            Some(Value::Bool(values.windows(2).all(|w| w[0] < w[1])))
        }
        Function::Highest => {
            let values = window_values(args, ctx, shift)?;
            values
                .into_iter()
                .reduce(f64::max)
                .map(Value::Num)
        }
        Function::Lowest => {
            let values = window_values(args, ctx, shift)?;
            values
                .into_iter()
                .reduce(f64::min)
                .map(Value::Num)
        }
        Function::Avg => {
            let values = window_values(args, ctx, shift)?;
            let n = values.len() as f64;
            Some(Value::Num(values.iter().sum::<f64>() / n))
        }
        Function::Sum => {
            let values = window_values(args, ctx, shift)?;
            Some(Value::Num(values.iter().sum()))
        }
        Function::Abs => {
            let v = num_arg(&args[0], ctx, shift)?;
            Some(Value::Num(v.abs()))
        }
        Function::Sqrt => {
            let v = num_arg(&args[0], ctx, shift)?;
            if v < 0.0 {
                return None;
            }
            Some(Value::Num(v.sqrt()))
        }
        Function::Min => {
            let a = num_arg(&args[0], ctx, shift)?;
            let b = num_arg(&args[1], ctx, shift)?;
            Some(Value::Num(a.min(b)))
        }
        Function::Max => {
            let a = num_arg(&args[0], ctx, shift)?;
            let b = num_arg(&args[1], ctx, shift)?;
            Some(Value::Num(a.max(b)))
        }
        Function::Pow => {
            let base = num_arg(&args[0], ctx, shift)?;
            let exp = num_arg(&args[1], ctx, shift)?;
            let result = base.powf(exp);
            if result.is_finite() {
                Some(Value::Num(result))
            } else {
                None
            }
        }
    }
}

fn num_arg(arg: &Expr, ctx: &dyn EvalContext, shift: usize) -> Option<f64> {
    eval(arg, ctx, shift)?.as_num()
}

fn cross_operands(
    args: &[Expr],
    ctx: &dyn EvalContext,
    shift: usize,
) -> Option<(f64, f64, f64, f64)> {
    let a_now = num_arg(&args[0], ctx, shift)?;
    let b_now = num_arg(&args[1], ctx, shift)?;
    let a_prev = num_arg(&args[0], ctx, shift + 1)?;
    let b_prev = num_arg(&args[1], ctx, shift + 1)?;
    Some((a_now, b_now, a_prev, b_prev))
}

/// Values of a window function's series argument, newest first. Null if
/// any bar in the window is missing. The window size is guaranteed to be
/// a literal by the parser.
fn window_values(args: &[Expr], ctx: &dyn EvalContext, shift: usize) -> Option<Vec<f64>> {
    let window = args[1].as_window()?;
    let mut values = Vec::with_capacity(window);
    for i in 0..window {
        values.push(num_arg(&args[0], ctx, shift + i)?);
    }
    Some(values)
}

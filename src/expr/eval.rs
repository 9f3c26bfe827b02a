use thiserror::Error;

use crate::functions::FunctionRegistry;
use crate::model::{BlockInstance, Candle, CandleSeries, PatternInstance};

use super::ast::{BinaryOp, Expr, Literal, UnaryOp};
use super::value::Value;

/// Runtime evaluation defects. These never cross the engine boundary: a
/// condition whose evaluation errs is simply not met (and the error is
/// logged at debug level).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("undefined name '{0}'")]
    UndefinedName(String),

    #[error("'{0}' cannot be used as a bare value")]
    NotScalar(String),

    #[error("attribute access on a non-object value")]
    NotAttributable,

    #[error("unknown attribute '{attr}' on {kind}")]
    UnknownAttr { kind: &'static str, attr: String },

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("function '{name}': {message}")]
    Function { name: String, message: String },
}

impl EvalError {
    pub fn function(name: &str, message: impl Into<String>) -> Self {
        EvalError::Function {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

/// What a context identifier resolves to.
enum Binding<'a> {
    Candle(&'a Candle),
    Block(&'a BlockInstance),
    Series,
    Scalar(Value),
}

/// Evaluation context for one (candle, pattern) pair.
///
/// Market identifiers (`current`, `prev`, `all_stocks`) are always bound.
/// Block identifiers (`block1`, `block2`, …) and `pattern_id` are bound only
/// when a pattern is attached, which is how per-pattern isolation falls out:
/// each pattern is evaluated under a context that can see no other pattern's
/// blocks.
pub struct EvalContext<'a> {
    series: &'a CandleSeries,
    idx: usize,
    registry: &'a FunctionRegistry,
    pattern: Option<&'a PatternInstance>,
}

impl<'a> EvalContext<'a> {
    /// Market-only context (used for root-entry spawning and spot checks).
    pub fn new(series: &'a CandleSeries, idx: usize, registry: &'a FunctionRegistry) -> Self {
        debug_assert!(idx < series.len());
        Self {
            series,
            idx,
            registry,
            pattern: None,
        }
    }

    /// Pattern-local context: additionally binds the pattern's blocks by id
    /// and `pattern_id`.
    pub fn with_pattern(
        series: &'a CandleSeries,
        idx: usize,
        registry: &'a FunctionRegistry,
        pattern: &'a PatternInstance,
    ) -> Self {
        debug_assert!(idx < series.len());
        Self {
            series,
            idx,
            registry,
            pattern: Some(pattern),
        }
    }

    pub fn series(&self) -> &CandleSeries {
        self.series
    }

    pub fn index(&self) -> usize {
        self.idx
    }

    pub fn current(&self) -> &Candle {
        &self.series.candles()[self.idx]
    }

    /// Last candle with volume > 0 strictly before the current one.
    pub fn prev(&self) -> Option<&Candle> {
        self.series.previous_trading_day(self.idx)
    }

    pub fn has_block(&self, block_id: &str) -> bool {
        self.pattern.is_some_and(|p| p.contains(block_id))
    }

    fn lookup(&self, name: &str) -> Option<Binding<'a>> {
        match name {
            "current" => Some(Binding::Candle(self.current_ref())),
            "prev" => self.series.previous_trading_day(self.idx).map(Binding::Candle),
            "all_stocks" => Some(Binding::Series),
            "pattern_id" => self
                .pattern
                .map(|p| Binding::Scalar(Value::Str(p.pattern_id.as_str().to_string()))),
            _ => self
                .pattern
                .and_then(|p| p.block(name))
                .map(Binding::Block),
        }
    }

    fn current_ref(&self) -> &'a Candle {
        &self.series.candles()[self.idx]
    }
}

/// Evaluate an expression to a scalar, absorbing runtime errors into
/// `Undefined`.
pub fn evaluate(expr: &Expr, ctx: &EvalContext) -> Value {
    match eval(expr, ctx) {
        Ok(v) => v,
        Err(err) => {
            tracing::debug!(%err, "expression evaluation absorbed");
            Value::Undefined
        }
    }
}

/// Evaluate an expression as a condition: errors and non-`Bool(true)`
/// results both mean "not met".
pub fn evaluate_condition(expr: &Expr, ctx: &EvalContext) -> bool {
    evaluate(expr, ctx).truthy()
}

fn eval(expr: &Expr, ctx: &EvalContext) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(lit) => Ok(match lit {
            Literal::Number(n) => Value::Number(*n),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Str(s) => Value::Str(s.clone()),
            Literal::Date(d) => Value::Date(*d),
        }),
        Expr::Ident(name) => match ctx.lookup(name) {
            Some(Binding::Scalar(v)) => Ok(v),
            Some(_) => Err(EvalError::NotScalar(name.clone())),
            None => Err(EvalError::UndefinedName(name.clone())),
        },
        Expr::Attr { base, attr } => eval_attr(base, attr, ctx),
        Expr::Call { name, args } => eval_call(name, args, ctx),
        Expr::Unary { op, expr } => {
            let v = eval(expr, ctx)?;
            Ok(match op {
                UnaryOp::Neg => v.negate(),
                UnaryOp::Not => v.logical_not(),
            })
        }
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, ctx),
    }
}

fn eval_binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &EvalContext,
) -> Result<Value, EvalError> {
    match op {
        // short-circuit so guards like `EXISTS(block2) and block2.x > 0`
        // never touch the unbound name
        BinaryOp::And => {
            let l = eval(lhs, ctx)?;
            match l {
                Value::Bool(false) => Ok(Value::Bool(false)),
                Value::Bool(true) => match eval(rhs, ctx)? {
                    Value::Bool(b) => Ok(Value::Bool(b)),
                    _ => Ok(Value::Undefined),
                },
                _ => Ok(Value::Undefined),
            }
        }
        BinaryOp::Or => {
            let l = eval(lhs, ctx)?;
            match l {
                Value::Bool(true) => Ok(Value::Bool(true)),
                Value::Bool(false) => match eval(rhs, ctx)? {
                    Value::Bool(b) => Ok(Value::Bool(b)),
                    _ => Ok(Value::Undefined),
                },
                _ => Ok(Value::Undefined),
            }
        }
        BinaryOp::Lt
        | BinaryOp::Le
        | BinaryOp::Gt
        | BinaryOp::Ge
        | BinaryOp::Eq
        | BinaryOp::Ne => {
            let l = eval(lhs, ctx)?;
            let r = eval(rhs, ctx)?;
            Ok(Value::compare(op, &l, &r))
        }
        _ => {
            let l = eval(lhs, ctx)?;
            let r = eval(rhs, ctx)?;
            Ok(Value::arithmetic(op, &l, &r))
        }
    }
}

fn eval_attr(base: &Expr, attr: &str, ctx: &EvalContext) -> Result<Value, EvalError> {
    let Expr::Ident(name) = base else {
        return Err(EvalError::NotAttributable);
    };
    match ctx.lookup(name) {
        Some(Binding::Candle(c)) => candle_attr(c, attr),
        Some(Binding::Block(b)) => block_attr(b, attr),
        Some(Binding::Series | Binding::Scalar(_)) => Err(EvalError::NotAttributable),
        None => Err(EvalError::UndefinedName(name.clone())),
    }
}

fn candle_attr(c: &Candle, attr: &str) -> Result<Value, EvalError> {
    Ok(match attr {
        "open" => Value::Number(c.open),
        "high" => Value::Number(c.high),
        "low" => Value::Number(c.low),
        "close" => Value::Number(c.close),
        "volume" => Value::Number(c.volume),
        "date" => Value::Date(c.date),
        "trading_value" => Value::Number(c.trading_value()),
        _ => {
            return Err(EvalError::UnknownAttr {
                kind: "candle",
                attr: attr.to_string(),
            })
        }
    })
}

fn block_attr(b: &BlockInstance, attr: &str) -> Result<Value, EvalError> {
    Ok(match attr {
        "started_at" => Value::Date(b.started_at),
        "ended_at" => b.ended_at.map_or(Value::Undefined, Value::Date),
        "peak_price" => Value::Number(b.peak_price),
        "peak_volume" => Value::Number(b.peak_volume),
        "peak_date" => Value::Date(b.peak_date),
        "status" => Value::Str(b.status.as_str().to_string()),
        _ => {
            return Err(EvalError::UnknownAttr {
                kind: "block",
                attr: attr.to_string(),
            })
        }
    })
}

fn eval_call(name: &str, args: &[Expr], ctx: &EvalContext) -> Result<Value, EvalError> {
    let mut values = Vec::with_capacity(args.len());
    for (i, arg) in args.iter().enumerate() {
        // EXISTS takes a block id; a bare identifier argument is passed by
        // name, not resolved (the id being unbound is the question asked)
        if name == "EXISTS" && i == 0 {
            if let Expr::Ident(id) = arg {
                values.push(Value::Str(id.clone()));
                continue;
            }
        }
        values.push(eval(arg, ctx)?);
    }
    let func = ctx
        .registry
        .get(name)
        .ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;
    func.call(&values, ctx)
}

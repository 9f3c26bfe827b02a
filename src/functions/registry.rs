use chrono::NaiveDate;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::expr::{EvalContext, EvalError, Value};

use super::context::Exists;
use super::indicators::{BollingerLower, BollingerUpper, Rsi};
use super::window::{
    CandlesBetween, DaysSince, IsNewHigh, IsVolumeHigh, Ma, VolumeMa, WithinRange,
};

/// A named pure function callable from expressions. Receives already
/// evaluated positional arguments plus the evaluation context, returns a
/// scalar. Implementations must be deterministic and side-effect free.
pub trait ExprFn: Send + Sync {
    fn name(&self) -> &'static str;
    fn arity(&self) -> usize;
    fn call(&self, args: &[Value], ctx: &EvalContext) -> Result<Value, EvalError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("function '{0}' is already registered")]
pub struct DuplicateFunction(pub String);

/// Case-sensitive, append-only function table. Built once before graph
/// validation and shared read-only by every scan.
pub struct FunctionRegistry {
    fns: FxHashMap<String, Box<dyn ExprFn>>,
}

impl FunctionRegistry {
    pub fn empty() -> Self {
        Self {
            fns: FxHashMap::default(),
        }
    }

    /// Registry with the required built-in set.
    pub fn with_builtins() -> Self {
        let mut reg = Self::empty();
        for f in builtins() {
            // built-in names are distinct by construction
            reg.register(f).unwrap_or_else(|e| unreachable!("{e}"));
        }
        reg
    }

    /// Extension point: add a consumer-provided function. Names are
    /// case-sensitive and may not collide with anything already present.
    pub fn register(&mut self, f: Box<dyn ExprFn>) -> Result<(), DuplicateFunction> {
        let name = f.name().to_string();
        if self.fns.contains_key(&name) {
            return Err(DuplicateFunction(name));
        }
        self.fns.insert(name, f);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn ExprFn> {
        self.fns.get(name).map(AsRef::as_ref)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fns.contains_key(name)
    }

    pub fn arity_of(&self, name: &str) -> Option<usize> {
        self.get(name).map(ExprFn::arity)
    }

    pub fn len(&self) -> usize {
        self.fns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fns.is_empty()
    }
}

fn builtins() -> Vec<Box<dyn ExprFn>> {
    vec![
        Box::new(Ma),
        Box::new(VolumeMa),
        Box::new(CandlesBetween),
        Box::new(DaysSince),
        Box::new(WithinRange),
        Box::new(IsNewHigh),
        Box::new(IsVolumeHigh),
        Box::new(Rsi),
        Box::new(BollingerUpper),
        Box::new(BollingerLower),
        Box::new(Exists),
    ]
}

// ── Argument coercion helpers ────────────────────────────────────────────
//
// `Ok(None)` means the argument was `Undefined`: the function result is
// undefined too, rather than an error. Wrong types and missing arguments
// are genuine errors (absorbed to false by the evaluator).

pub(crate) fn number_arg(
    name: &str,
    args: &[Value],
    idx: usize,
) -> Result<Option<f64>, EvalError> {
    match args.get(idx) {
        Some(Value::Number(n)) => Ok(Some(*n)),
        Some(Value::Undefined) => Ok(None),
        Some(_) => Err(EvalError::function(
            name,
            format!("argument {} must be a number", idx + 1),
        )),
        None => Err(EvalError::function(
            name,
            format!("missing argument {}", idx + 1),
        )),
    }
}

pub(crate) fn period_arg(
    name: &str,
    args: &[Value],
    idx: usize,
) -> Result<Option<usize>, EvalError> {
    let Some(n) = number_arg(name, args, idx)? else {
        return Ok(None);
    };
    if n < 1.0 || n.fract() != 0.0 {
        return Err(EvalError::function(
            name,
            format!("argument {} must be a positive whole number of candles", idx + 1),
        ));
    }
    Ok(Some(n as usize))
}

pub(crate) fn date_arg(
    name: &str,
    args: &[Value],
    idx: usize,
) -> Result<Option<NaiveDate>, EvalError> {
    match args.get(idx) {
        Some(Value::Date(d)) => Ok(Some(*d)),
        Some(Value::Undefined) => Ok(None),
        Some(_) => Err(EvalError::function(
            name,
            format!("argument {} must be a date", idx + 1),
        )),
        None => Err(EvalError::function(
            name,
            format!("missing argument {}", idx + 1),
        )),
    }
}

/// Metadata about a built-in for catalogs and tooling.
pub struct FunctionInfo {
    pub name: &'static str,
    pub arity: usize,
    pub description: &'static str,
    pub params: &'static str,
}

pub const FUNCTION_CATALOG: &[FunctionInfo] = &[
    FunctionInfo {
        name: "ma",
        arity: 1,
        description: "Mean close over the last `period` candles, current included.",
        params: "period",
    },
    FunctionInfo {
        name: "volume_ma",
        arity: 1,
        description: "Mean volume over the last `period` candles, current included.",
        params: "period",
    },
    FunctionInfo {
        name: "candles_between",
        arity: 2,
        description: "Candles with volume > 0 strictly between two dates (endpoints excluded).",
        params: "date_a, date_b",
    },
    FunctionInfo {
        name: "days_since",
        arity: 1,
        description: "Calendar days from a date to the current candle's date.",
        params: "date",
    },
    FunctionInfo {
        name: "within_range",
        arity: 3,
        description: "True when value lies within ±tolerance_pct percent of base.",
        params: "value, base, tolerance_pct",
    },
    FunctionInfo {
        name: "is_new_high",
        arity: 1,
        description: "True when current.high >= max high over the `period` candles before it.",
        params: "period",
    },
    FunctionInfo {
        name: "is_volume_high",
        arity: 1,
        description: "True when current.volume >= max volume over the `period` candles before it.",
        params: "period",
    },
    FunctionInfo {
        name: "rsi",
        arity: 1,
        description: "Wilder (smoothed) RSI over close.",
        params: "period",
    },
    FunctionInfo {
        name: "bollinger_upper",
        arity: 2,
        description: "Moving average of close plus k standard deviations.",
        params: "period, k",
    },
    FunctionInfo {
        name: "bollinger_lower",
        arity: 2,
        description: "Moving average of close minus k standard deviations.",
        params: "period, k",
    },
    FunctionInfo {
        name: "EXISTS",
        arity: 1,
        description: "True when the current pattern contains a block with the given id.",
        params: "block_id",
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_the_catalog() {
        let reg = FunctionRegistry::with_builtins();
        assert_eq!(reg.len(), FUNCTION_CATALOG.len());
        for info in FUNCTION_CATALOG {
            let f = reg.get(info.name).expect(info.name);
            assert_eq!(f.arity(), info.arity, "{}", info.name);
        }
    }

    #[test]
    fn names_are_case_sensitive() {
        let reg = FunctionRegistry::with_builtins();
        assert!(reg.contains("ma"));
        assert!(!reg.contains("MA"));
        assert!(reg.contains("EXISTS"));
        assert!(!reg.contains("exists"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = FunctionRegistry::with_builtins();
        let err = reg.register(Box::new(Ma)).unwrap_err();
        assert_eq!(err, DuplicateFunction("ma".to_string()));
    }

    struct Doubler;
    impl ExprFn for Doubler {
        fn name(&self) -> &'static str {
            "double"
        }
        fn arity(&self) -> usize {
            1
        }
        fn call(&self, args: &[Value], _ctx: &EvalContext) -> Result<Value, EvalError> {
            Ok(match number_arg("double", args, 0)? {
                Some(n) => Value::Number(n * 2.0),
                None => Value::Undefined,
            })
        }
    }

    #[test]
    fn consumer_functions_behave_like_builtins() {
        use crate::expr::{evaluate, parse};
        use crate::model::{Candle, CandleSeries};

        let mut reg = FunctionRegistry::with_builtins();
        reg.register(Box::new(Doubler)).unwrap();

        let series = CandleSeries::new(
            "TEST",
            vec![Candle {
                date: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1.0,
            }],
        )
        .unwrap();
        let ctx = EvalContext::new(&series, 0, &reg);
        let v = evaluate(&parse("double(21)").unwrap(), &ctx);
        assert_eq!(v, Value::Number(42.0));
    }
}

// Rolling-window statistics over the ticker's candle history.
//
// Every window function returns `Undefined` when the series is too short
// for its window; the comparison using it then reads false, so a thin
// history never fires a condition by accident.

use crate::expr::{EvalContext, EvalError, Value};

use super::registry::{date_arg, number_arg, period_arg, ExprFn};

/// `ma(period)` — mean close over the last `period` candles, current
/// included.
pub struct Ma;

impl ExprFn for Ma {
    fn name(&self) -> &'static str {
        "ma"
    }
    fn arity(&self) -> usize {
        1
    }
    fn call(&self, args: &[Value], ctx: &EvalContext) -> Result<Value, EvalError> {
        let Some(period) = period_arg(self.name(), args, 0)? else {
            return Ok(Value::Undefined);
        };
        Ok(ctx
            .series()
            .mean_close(ctx.index(), period)
            .map_or(Value::Undefined, Value::Number))
    }
}

/// `volume_ma(period)` — mean volume over the last `period` candles.
pub struct VolumeMa;

impl ExprFn for VolumeMa {
    fn name(&self) -> &'static str {
        "volume_ma"
    }
    fn arity(&self) -> usize {
        1
    }
    fn call(&self, args: &[Value], ctx: &EvalContext) -> Result<Value, EvalError> {
        let Some(period) = period_arg(self.name(), args, 0)? else {
            return Ok(Value::Undefined);
        };
        Ok(ctx
            .series()
            .mean_volume(ctx.index(), period)
            .map_or(Value::Undefined, Value::Number))
    }
}

/// `candles_between(date_a, date_b)` — candles with volume > 0 strictly
/// between the two dates. Both endpoints excluded, order-insensitive.
pub struct CandlesBetween;

impl ExprFn for CandlesBetween {
    fn name(&self) -> &'static str {
        "candles_between"
    }
    fn arity(&self) -> usize {
        2
    }
    fn call(&self, args: &[Value], ctx: &EvalContext) -> Result<Value, EvalError> {
        let (Some(a), Some(b)) = (
            date_arg(self.name(), args, 0)?,
            date_arg(self.name(), args, 1)?,
        ) else {
            return Ok(Value::Undefined);
        };
        Ok(Value::Number(ctx.series().count_between(a, b) as f64))
    }
}

/// `days_since(date)` — calendar days from `date` to the current candle.
pub struct DaysSince;

impl ExprFn for DaysSince {
    fn name(&self) -> &'static str {
        "days_since"
    }
    fn arity(&self) -> usize {
        1
    }
    fn call(&self, args: &[Value], ctx: &EvalContext) -> Result<Value, EvalError> {
        let Some(d) = date_arg(self.name(), args, 0)? else {
            return Ok(Value::Undefined);
        };
        let days = (ctx.current().date - d).num_days();
        Ok(Value::Number(days as f64))
    }
}

/// `within_range(value, base, tolerance_pct)` — true when
/// `base·(1 − t/100) <= value <= base·(1 + t/100)`.
pub struct WithinRange;

impl ExprFn for WithinRange {
    fn name(&self) -> &'static str {
        "within_range"
    }
    fn arity(&self) -> usize {
        3
    }
    fn call(&self, args: &[Value], _ctx: &EvalContext) -> Result<Value, EvalError> {
        let (Some(value), Some(base), Some(tol)) = (
            number_arg(self.name(), args, 0)?,
            number_arg(self.name(), args, 1)?,
            number_arg(self.name(), args, 2)?,
        ) else {
            return Ok(Value::Undefined);
        };
        let lo = base * (1.0 - tol / 100.0);
        let hi = base * (1.0 + tol / 100.0);
        Ok(Value::Bool(value >= lo && value <= hi))
    }
}

/// `is_new_high(period)` — current high at or above the max high of the
/// `period` candles strictly before it.
pub struct IsNewHigh;

impl ExprFn for IsNewHigh {
    fn name(&self) -> &'static str {
        "is_new_high"
    }
    fn arity(&self) -> usize {
        1
    }
    fn call(&self, args: &[Value], ctx: &EvalContext) -> Result<Value, EvalError> {
        let Some(period) = period_arg(self.name(), args, 0)? else {
            return Ok(Value::Undefined);
        };
        Ok(ctx
            .series()
            .max_high_before(ctx.index(), period)
            .map_or(Value::Undefined, |m| {
                Value::Bool(ctx.current().high >= m)
            }))
    }
}

/// `is_volume_high(period)` — current volume at or above the max volume of
/// the `period` candles strictly before it.
pub struct IsVolumeHigh;

impl ExprFn for IsVolumeHigh {
    fn name(&self) -> &'static str {
        "is_volume_high"
    }
    fn arity(&self) -> usize {
        1
    }
    fn call(&self, args: &[Value], ctx: &EvalContext) -> Result<Value, EvalError> {
        let Some(period) = period_arg(self.name(), args, 0)? else {
            return Ok(Value::Undefined);
        };
        Ok(ctx
            .series()
            .max_volume_before(ctx.index(), period)
            .map_or(Value::Undefined, |m| {
                Value::Bool(ctx.current().volume >= m)
            }))
    }
}

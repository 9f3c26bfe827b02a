// Oscillator and band indicators over close, backed by rust_ti.

use rust_ti::{ConstantModelType, DeviationModel};

use crate::expr::{EvalContext, EvalError, Value};

use super::registry::{number_arg, period_arg, ExprFn};

/// Closing prices for the `len` candles ending at the context's current
/// index, or `None` when the history is shorter than that.
fn close_window(ctx: &EvalContext, len: usize) -> Option<Vec<f64>> {
    let idx = ctx.index();
    if len == 0 || idx + 1 < len {
        return None;
    }
    Some(
        ctx.series().candles()[idx + 1 - len..=idx]
            .iter()
            .map(|c| c.close)
            .collect(),
    )
}

/// `rsi(period)` — Wilder RSI over close (smoothed moving average model).
pub struct Rsi;

impl ExprFn for Rsi {
    fn name(&self) -> &'static str {
        "rsi"
    }
    fn arity(&self) -> usize {
        1
    }
    fn call(&self, args: &[Value], ctx: &EvalContext) -> Result<Value, EvalError> {
        let Some(period) = period_arg(self.name(), args, 0)? else {
            return Ok(Value::Undefined);
        };
        // period + 1 closes give `period` price changes
        let Some(window) = close_window(ctx, period + 1) else {
            return Ok(Value::Undefined);
        };
        let rsi = rust_ti::momentum_indicators::single::relative_strength_index(
            &window,
            ConstantModelType::SmoothedMovingAverage,
        );
        Ok(Value::Number(rsi))
    }
}

/// `bollinger_upper(period, k)` — moving average of close plus k standard
/// deviations over the same window.
pub struct BollingerUpper;

impl ExprFn for BollingerUpper {
    fn name(&self) -> &'static str {
        "bollinger_upper"
    }
    fn arity(&self) -> usize {
        2
    }
    fn call(&self, args: &[Value], ctx: &EvalContext) -> Result<Value, EvalError> {
        Ok(bollinger_band(self.name(), args, ctx)?
            .map_or(Value::Undefined, |(_, _, upper)| Value::Number(upper)))
    }
}

/// `bollinger_lower(period, k)` — moving average of close minus k standard
/// deviations.
pub struct BollingerLower;

impl ExprFn for BollingerLower {
    fn name(&self) -> &'static str {
        "bollinger_lower"
    }
    fn arity(&self) -> usize {
        2
    }
    fn call(&self, args: &[Value], ctx: &EvalContext) -> Result<Value, EvalError> {
        Ok(bollinger_band(self.name(), args, ctx)?
            .map_or(Value::Undefined, |(lower, _, _)| Value::Number(lower)))
    }
}

fn bollinger_band(
    name: &str,
    args: &[Value],
    ctx: &EvalContext,
) -> Result<Option<(f64, f64, f64)>, EvalError> {
    let (Some(period), Some(k)) = (period_arg(name, args, 0)?, number_arg(name, args, 1)?) else {
        return Ok(None);
    };
    if k < 0.0 {
        return Err(EvalError::function(name, "k must be non-negative"));
    }
    let Some(window) = close_window(ctx, period) else {
        return Ok(None);
    };
    Ok(Some(rust_ti::candle_indicators::single::moving_constant_bands(
        &window,
        ConstantModelType::SimpleMovingAverage,
        DeviationModel::StandardDeviation,
        k,
    )))
}

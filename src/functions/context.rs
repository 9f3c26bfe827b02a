// Pattern-context predicates.

use crate::expr::{EvalContext, EvalError, Value};

use super::registry::ExprFn;

/// `EXISTS(block_id)` — true when the current pattern contains a block with
/// that id, active or already completed. The evaluator passes a bare
/// identifier argument through by name, so `EXISTS(block2)` works whether or
/// not `block2` is bound.
pub struct Exists;

impl ExprFn for Exists {
    fn name(&self) -> &'static str {
        "EXISTS"
    }
    fn arity(&self) -> usize {
        1
    }
    fn call(&self, args: &[Value], ctx: &EvalContext) -> Result<Value, EvalError> {
        match args.first() {
            Some(Value::Str(id)) => Ok(Value::Bool(ctx.has_block(id))),
            Some(_) | None => Err(EvalError::function(
                self.name(),
                "argument must be a block id",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{evaluate, parse};
    use crate::functions::FunctionRegistry;
    use crate::model::{BlockInstance, Candle, CandleSeries, DetectionMode, PatternId, PatternInstance};
    use chrono::NaiveDate;

    fn fixture() -> (CandleSeries, PatternInstance) {
        let candle = Candle {
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            open: 10.0,
            high: 11.0,
            low: 9.0,
            close: 10.0,
            volume: 100.0,
        };
        let series = CandleSeries::new("TEST", vec![candle.clone()]).unwrap();
        let root = BlockInstance::open("block1", 1, "TEST", &candle, vec![]);
        let pattern = PatternInstance::new(
            PatternId::new(DetectionMode::Sequential, "TEST", candle.date, 1),
            "TEST",
            root,
        );
        (series, pattern)
    }

    #[test]
    fn exists_sees_pattern_blocks() {
        let (series, pattern) = fixture();
        let reg = FunctionRegistry::with_builtins();
        let ctx = EvalContext::with_pattern(&series, 0, &reg, &pattern);
        assert_eq!(
            evaluate(&parse("EXISTS(block1)").unwrap(), &ctx),
            Value::Bool(true)
        );
        assert_eq!(
            evaluate(&parse("EXISTS(block2)").unwrap(), &ctx),
            Value::Bool(false)
        );
        // string form is equivalent
        assert_eq!(
            evaluate(&parse("EXISTS('block1')").unwrap(), &ctx),
            Value::Bool(true)
        );
    }

    #[test]
    fn exists_without_pattern_is_false() {
        let (series, _) = fixture();
        let reg = FunctionRegistry::with_builtins();
        let ctx = EvalContext::new(&series, 0, &reg);
        assert_eq!(
            evaluate(&parse("EXISTS(block1)").unwrap(), &ctx),
            Value::Bool(false)
        );
    }
}

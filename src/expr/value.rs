use chrono::NaiveDate;

use super::ast::BinaryOp;

/// Scalar produced by evaluation. `Undefined` is the sentinel for "not
/// knowable here" (short indicator window, missing `prev`, division by
/// zero): it poisons arithmetic and makes every comparison false, so an
/// unknowable condition is simply not met.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Str(String),
    Date(NaiveDate),
    Undefined,
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Condition outcome. Only `Bool(true)` satisfies a condition; numbers,
    /// strings, dates and `Undefined` all read as not-met.
    pub fn truthy(&self) -> bool {
        matches!(self, Value::Bool(true))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
        let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) else {
            return Value::Undefined;
        };
        let out = match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => {
                if b == 0.0 {
                    return Value::Undefined;
                }
                a / b
            }
            BinaryOp::Rem => {
                if b == 0.0 {
                    return Value::Undefined;
                }
                a % b
            }
            _ => return Value::Undefined,
        };
        if out.is_finite() {
            Value::Number(out)
        } else {
            Value::Undefined
        }
    }

    /// Compare two values. Mixed types, NaN and `Undefined` yield
    /// `Undefined`, which downstream reads as false.
    pub fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
        use std::cmp::Ordering;

        let ord = match (lhs, rhs) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => match op {
                BinaryOp::Eq => return Value::Bool(a == b),
                BinaryOp::Ne => return Value::Bool(a != b),
                _ => None,
            },
            _ => None,
        };
        let Some(ord) = ord else {
            return Value::Undefined;
        };
        let out = match op {
            BinaryOp::Lt => ord == Ordering::Less,
            BinaryOp::Le => ord != Ordering::Greater,
            BinaryOp::Gt => ord == Ordering::Greater,
            BinaryOp::Ge => ord != Ordering::Less,
            BinaryOp::Eq => ord == Ordering::Equal,
            BinaryOp::Ne => ord != Ordering::Equal,
            _ => return Value::Undefined,
        };
        Value::Bool(out)
    }

    pub fn negate(&self) -> Value {
        match self.as_number() {
            Some(n) => Value::Number(-n),
            None => Value::Undefined,
        }
    }

    pub fn logical_not(&self) -> Value {
        match self {
            Value::Bool(b) => Value::Bool(!b),
            _ => Value::Undefined,
        }
    }
}

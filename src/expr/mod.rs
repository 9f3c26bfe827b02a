//! Parse-once expression engine for block conditions.
//!
//! Conditions are data: a string is parsed into an [`ast::Expr`] at graph
//! load (malformed input is a load-time error) and evaluated as a tree walk
//! at scan time. Evaluation is total — runtime problems (unknown names,
//! division by zero, short indicator windows) collapse to "condition not
//! met" instead of raising.

pub mod ast;
pub mod eval;
pub mod parser;
pub mod token;
pub mod value;

pub use ast::{BinaryOp, Expr, Literal, UnaryOp};
pub use eval::{evaluate, evaluate_condition, EvalContext, EvalError};
pub use parser::{parse, ParseError};
pub use value::Value;

use chrono::NaiveDate;
use thiserror::Error;

use crate::expr::ParseError;

/// Load-time defects in a block-graph document. Fatal: a graph that fails
/// validation produces no scanner and no pattern output.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("failed to parse graph document: {0}")]
    Document(#[from] serde_yaml::Error),

    #[error("graph document rejected: {0}")]
    Invalid(String),

    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("root node '{0}' not found among nodes")]
    MissingRoot(String),

    #[error("unknown node id '{id}' referenced by {context}")]
    UnknownNode { id: String, context: String },

    #[error("edge {from} -> {to}: conditional edges require a condition expression")]
    MissingGuard { from: String, to: String },

    #[error("edges out of '{from}' share priority {priority}")]
    AmbiguousPriority { from: String, priority: i32 },

    #[error("cycle detected through node '{0}'")]
    Cycle(String),

    #[error("node '{0}' is unreachable from the root")]
    Unreachable(String),

    #[error("node '{node}' has a highlight condition but no forward_spot_condition")]
    MissingSpotCondition { node: String },

    #[error("in {location}: {source}")]
    Expression {
        location: String,
        #[source]
        source: ParseError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Candle-data invariant violations, surfaced before orchestration begins.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("{ticker}: candle dates not strictly increasing at {date}")]
    OutOfOrder { ticker: String, date: NaiveDate },

    #[error("{ticker}: duplicate candle date {date}")]
    DuplicateDate { ticker: String, date: NaiveDate },

    #[error("{ticker}: negative volume {volume} on {date}")]
    NegativeVolume {
        ticker: String,
        date: NaiveDate,
        volume: f64,
    },

    #[error("{ticker}: high/low envelope violated on {date}")]
    InvertedRange { ticker: String, date: NaiveDate },
}

use serde::{Deserialize, Serialize};

use super::node::ConditionDef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    /// Taken when the target's entry conditions hold.
    #[default]
    Sequential,
    /// Taken when the guard expression and the target's entry conditions
    /// both hold.
    Conditional,
    /// Like sequential, but a pattern that takes a sibling edge instead
    /// permanently skips this edge's target.
    Optional,
}

/// One allowed transition. Lower priority wins among edges leaving the same
/// source on the same candle.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockEdge {
    pub from_id: String,
    pub to_id: String,
    pub edge_type: EdgeType,
    pub guard: Option<ConditionDef>,
    pub priority: i32,
}

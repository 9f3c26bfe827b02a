use serde::{Deserialize, Serialize};

use crate::expr::Expr;

/// One parsed condition: the original source string (kept for reporting and
/// round-trips), the parsed tree, and an optional name used in exit
/// reasons.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionDef {
    pub name: Option<String>,
    pub source: String,
    pub expr: Expr,
}

impl ConditionDef {
    /// Label used in `exit:{label}` reasons: the declared name, or the
    /// condition's position in its list.
    pub fn label(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| index.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighlightKind {
    ForwardSpot,
}

/// Criterion that promotes a detected block to a highlight: how many
/// forward spots must hold, at which day offsets after the block start, and
/// whether they must be consecutive.
#[derive(Debug, Clone, PartialEq)]
pub struct HighlightCondition {
    pub kind: HighlightKind,
    pub enabled: bool,
    pub priority: i32,
    pub required_spot_count: usize,
    pub consecutive: bool,
    pub day_offsets: Vec<usize>,
}

/// Per-node tuning knobs, all in trading days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeParameters {
    /// Exit conditions are not evaluated before this many trading days
    /// have elapsed since the block started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_duration: Option<u32>,
    /// The block completes with reason `expired:max_duration` once this
    /// many trading days have elapsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration: Option<u32>,
}

/// One block definition. Entry conditions combine with AND, exit conditions
/// with OR.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockNode {
    pub block_id: String,
    pub block_type: u32,
    pub name: String,
    pub entry_conditions: Vec<ConditionDef>,
    pub exit_conditions: Vec<ConditionDef>,
    pub parameters: NodeParameters,
    pub highlight_condition: Option<HighlightCondition>,
    pub spot_entry_conditions: Vec<ConditionDef>,
    pub forward_spot_condition: Option<ConditionDef>,
}

impl BlockNode {
    pub fn enabled_highlight(&self) -> Option<&HighlightCondition> {
        self.highlight_condition.as_ref().filter(|h| h.enabled)
    }
}

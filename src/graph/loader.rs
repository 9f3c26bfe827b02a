use std::collections::BTreeMap;
use std::path::Path;

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::expr::parse;
use crate::functions::FunctionRegistry;

use super::block_graph::BlockGraph;
use super::edge::{BlockEdge, EdgeType};
use super::node::{
    BlockNode, ConditionDef, HighlightCondition, HighlightKind, NodeParameters,
};

/// Raw YAML document. Kept serializable so a parsed document round-trips
/// through serialization unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct GraphDocument {
    #[garde(dive)]
    pub block_graph: BlockGraphDoc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct BlockGraphDoc {
    #[garde(length(min = 1))]
    pub root_node: String,
    #[garde(skip)]
    pub nodes: BTreeMap<String, NodeDoc>,
    #[garde(skip)]
    pub edges: Vec<EdgeDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NodeDoc {
    /// Must equal the map key when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub block_id: Option<String>,
    #[garde(range(min = 1))]
    pub block_type: u32,
    #[garde(length(min = 1))]
    pub name: String,
    #[garde(length(min = 1))]
    pub entry_conditions: Vec<ConditionSpec>,
    #[serde(default)]
    #[garde(skip)]
    pub exit_conditions: Vec<ConditionSpec>,
    #[serde(default, skip_serializing_if = "is_default_params")]
    #[garde(skip)]
    pub parameters: NodeParameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(dive)]
    pub highlight_condition: Option<HighlightDoc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[garde(skip)]
    pub spot_entry_conditions: Vec<ConditionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub forward_spot_condition: Option<ConditionSpec>,
}

fn is_default_params(p: &NodeParameters) -> bool {
    *p == NodeParameters::default()
}

/// A condition is either a bare expression string or a named mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionSpec {
    Bare(String),
    Named {
        name: String,
        expression: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl ConditionSpec {
    fn expression(&self) -> &str {
        match self {
            ConditionSpec::Bare(s) => s,
            ConditionSpec::Named { expression, .. } => expression,
        }
    }

    fn name(&self) -> Option<&str> {
        match self {
            ConditionSpec::Bare(_) => None,
            ConditionSpec::Named { name, .. } => Some(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct HighlightDoc {
    #[serde(rename = "type")]
    #[garde(skip)]
    pub kind: HighlightKind,
    #[serde(default = "default_enabled")]
    #[garde(skip)]
    pub enabled: bool,
    #[serde(default)]
    #[garde(skip)]
    pub priority: i32,
    #[garde(dive)]
    pub parameters: HighlightParamsDoc,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct HighlightParamsDoc {
    #[garde(range(min = 1))]
    pub required_spot_count: usize,
    #[serde(default)]
    #[garde(skip)]
    pub consecutive: bool,
    #[garde(length(min = 1))]
    pub day_offsets: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDoc {
    pub from_block: String,
    pub to_block: String,
    #[serde(default)]
    pub edge_type: EdgeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub priority: i32,
}

/// Parse a YAML string into the raw document without validating it.
pub fn parse_document(yaml: &str) -> Result<GraphDocument, GraphError> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// Parse and fully validate a graph document against a function registry.
pub fn load_graph_str(
    yaml: &str,
    registry: &FunctionRegistry,
) -> Result<BlockGraph, GraphError> {
    let doc = parse_document(yaml)?;
    build_graph(&doc, registry)
}

pub fn load_graph_path(
    path: impl AsRef<Path>,
    registry: &FunctionRegistry,
) -> Result<BlockGraph, GraphError> {
    let yaml = std::fs::read_to_string(path)?;
    load_graph_str(&yaml, registry)
}

/// Turn a raw document into a validated [`BlockGraph`].
pub fn build_graph(
    doc: &GraphDocument,
    registry: &FunctionRegistry,
) -> Result<BlockGraph, GraphError> {
    doc.validate()
        .map_err(|report| GraphError::Invalid(report.to_string()))?;

    let mut nodes = Vec::with_capacity(doc.block_graph.nodes.len());
    for (key, node_doc) in &doc.block_graph.nodes {
        node_doc
            .validate()
            .map_err(|report| GraphError::Invalid(format!("node '{key}': {report}")))?;
        if let Some(declared) = &node_doc.block_id {
            if declared != key {
                return Err(GraphError::Invalid(format!(
                    "node '{key}': block_id '{declared}' does not match its key"
                )));
            }
        }
        if let (Some(min), Some(max)) = (
            node_doc.parameters.min_duration,
            node_doc.parameters.max_duration,
        ) {
            if max < min {
                return Err(GraphError::Invalid(format!(
                    "node '{key}': max_duration {max} is below min_duration {min}"
                )));
            }
        }
        nodes.push(build_node(key, node_doc)?);
    }

    let mut edges = Vec::with_capacity(doc.block_graph.edges.len());
    for edge_doc in &doc.block_graph.edges {
        let guard = edge_doc
            .condition
            .as_deref()
            .map(|src| {
                parse_condition(
                    None,
                    src,
                    &format!(
                        "edge {} -> {} condition",
                        edge_doc.from_block, edge_doc.to_block
                    ),
                )
            })
            .transpose()?;
        edges.push(BlockEdge {
            from_id: edge_doc.from_block.clone(),
            to_id: edge_doc.to_block.clone(),
            edge_type: edge_doc.edge_type,
            guard,
            priority: edge_doc.priority,
        });
    }

    BlockGraph::new(doc.block_graph.root_node.clone(), nodes, edges, registry)
}

fn build_node(key: &str, doc: &NodeDoc) -> Result<BlockNode, GraphError> {
    let parse_group = |specs: &[ConditionSpec], kind: &str| -> Result<Vec<ConditionDef>, GraphError> {
        specs
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                parse_condition(
                    spec.name(),
                    spec.expression(),
                    &format!("node '{key}' {kind}[{i}]"),
                )
            })
            .collect()
    };

    let highlight_condition = doc.highlight_condition.as_ref().map(|h| HighlightCondition {
        kind: h.kind,
        enabled: h.enabled,
        priority: h.priority,
        required_spot_count: h.parameters.required_spot_count,
        consecutive: h.parameters.consecutive,
        day_offsets: h.parameters.day_offsets.clone(),
    });

    Ok(BlockNode {
        block_id: key.to_string(),
        block_type: doc.block_type,
        name: doc.name.clone(),
        entry_conditions: parse_group(&doc.entry_conditions, "entry_conditions")?,
        exit_conditions: parse_group(&doc.exit_conditions, "exit_conditions")?,
        parameters: doc.parameters,
        highlight_condition,
        spot_entry_conditions: parse_group(&doc.spot_entry_conditions, "spot_entry_conditions")?,
        forward_spot_condition: doc
            .forward_spot_condition
            .as_ref()
            .map(|spec| {
                parse_condition(
                    spec.name(),
                    spec.expression(),
                    &format!("node '{key}' forward_spot_condition"),
                )
            })
            .transpose()?,
    })
}

fn parse_condition(
    name: Option<&str>,
    source: &str,
    location: &str,
) -> Result<ConditionDef, GraphError> {
    let expr = parse(source).map_err(|e| GraphError::Expression {
        location: location.to_string(),
        source: e,
    })?;
    Ok(ConditionDef {
        name: name.map(ToString::to_string),
        source: source.to_string(),
        expr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = r#"
block_graph:
  root_node: block1
  nodes:
    block1:
      block_type: 1
      name: initial surge
      entry_conditions:
        - current.close >= 10000 and current.volume >= 1_000_000
      exit_conditions:
        - name: price_break
          expression: current.close < 9000
    block2:
      block_type: 2
      name: continuation
      entry_conditions:
        - current.close >= block1.peak_price * 1.05
      exit_conditions:
        - current.close < block1.peak_price
  edges:
    - from_block: block1
      to_block: block2
"#;

    #[test]
    fn loads_basic_document() {
        let reg = FunctionRegistry::with_builtins();
        let graph = load_graph_str(BASIC, &reg).unwrap();
        assert_eq!(graph.root_id(), "block1");
        assert_eq!(graph.len(), 2);
        let block1 = graph.node("block1").unwrap();
        assert_eq!(block1.exit_conditions[0].name.as_deref(), Some("price_break"));
        let edge = graph.outgoing_edges("block1").next().unwrap();
        assert_eq!(edge.edge_type, EdgeType::Sequential);
        assert_eq!(edge.priority, 0);
    }

    #[test]
    fn document_round_trips() {
        let doc = parse_document(BASIC).unwrap();
        let yaml = serde_yaml::to_string(&doc).unwrap();
        let again = parse_document(&yaml).unwrap();
        assert_eq!(doc, again);

        let reg = FunctionRegistry::with_builtins();
        // both documents validate identically
        assert!(build_graph(&doc, &reg).is_ok());
        assert!(build_graph(&again, &reg).is_ok());
    }

    #[test]
    fn rejects_block_type_zero() {
        let yaml = BASIC.replace("block_type: 1", "block_type: 0");
        let reg = FunctionRegistry::with_builtins();
        let err = load_graph_str(&yaml, &reg).unwrap_err();
        assert!(matches!(err, GraphError::Invalid(_)));
    }

    #[test]
    fn rejects_mismatched_block_id() {
        let yaml = BASIC.replace(
            "    block1:\n      block_type: 1",
            "    block1:\n      block_id: blockX\n      block_type: 1",
        );
        let reg = FunctionRegistry::with_builtins();
        let err = load_graph_str(&yaml, &reg).unwrap_err();
        assert!(matches!(err, GraphError::Invalid(msg) if msg.contains("does not match")));
    }

    #[test]
    fn rejects_malformed_expression_at_load() {
        let yaml = BASIC.replace(
            "current.close >= block1.peak_price * 1.05",
            "current.close >= block1.peak_price *",
        );
        let reg = FunctionRegistry::with_builtins();
        let err = load_graph_str(&yaml, &reg).unwrap_err();
        assert!(matches!(err, GraphError::Expression { location, .. }
            if location.contains("block2") && location.contains("entry_conditions")));
    }

    #[test]
    fn rejects_missing_required_field() {
        let yaml = BASIC.replace("      name: initial surge\n", "");
        let reg = FunctionRegistry::with_builtins();
        assert!(matches!(
            load_graph_str(&yaml, &reg),
            Err(GraphError::Document(_))
        ));
    }

    #[test]
    fn conditional_edge_parses_guard() {
        let yaml = BASIC.replace(
            "    - from_block: block1\n      to_block: block2\n",
            "    - from_block: block1\n      to_block: block2\n      edge_type: conditional\n      condition: current.volume > prev.volume\n",
        );
        let reg = FunctionRegistry::with_builtins();
        let graph = load_graph_str(&yaml, &reg).unwrap();
        let edge = graph.outgoing_edges("block1").next().unwrap();
        assert_eq!(edge.edge_type, EdgeType::Conditional);
        assert!(edge.guard.is_some());
    }

    #[test]
    fn highlight_condition_requires_spot_expression() {
        let yaml = BASIC.replace(
            "      exit_conditions:\n        - name: price_break\n          expression: current.close < 9000\n",
            "      exit_conditions:\n        - name: price_break\n          expression: current.close < 9000\n      highlight_condition:\n        type: forward_spot\n        parameters:\n          required_spot_count: 2\n          consecutive: true\n          day_offsets: [1, 2]\n",
        );
        let reg = FunctionRegistry::with_builtins();
        let err = load_graph_str(&yaml, &reg).unwrap_err();
        assert!(matches!(err, GraphError::MissingSpotCondition { node } if node == "block1"));
    }

    #[test]
    fn highlight_condition_full_shape_loads() {
        let yaml = BASIC.replace(
            "      exit_conditions:\n        - name: price_break\n          expression: current.close < 9000\n",
            "      exit_conditions:\n        - name: price_break\n          expression: current.close < 9000\n      highlight_condition:\n        type: forward_spot\n        parameters:\n          required_spot_count: 2\n          consecutive: true\n          day_offsets: [1, 2]\n      forward_spot_condition: current.volume >= prev.volume * 1.3\n",
        );
        let reg = FunctionRegistry::with_builtins();
        let graph = load_graph_str(&yaml, &reg).unwrap();
        let hc = graph.node("block1").unwrap().enabled_highlight().unwrap();
        assert_eq!(hc.required_spot_count, 2);
        assert!(hc.consecutive);
        assert_eq!(hc.day_offsets, vec![1, 2]);
    }
}

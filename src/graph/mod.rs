//! Block-graph model: a validated DAG of block definitions (nodes) and
//! allowed transitions (edges), loaded from a YAML document. Immutable
//! after validation and shared read-only by every scan.

pub mod block_graph;
pub mod edge;
pub mod loader;
pub mod node;

pub use block_graph::BlockGraph;
pub use edge::{BlockEdge, EdgeType};
pub use loader::{build_graph, load_graph_path, load_graph_str, parse_document, GraphDocument};
pub use node::{BlockNode, ConditionDef, HighlightCondition, HighlightKind, NodeParameters};

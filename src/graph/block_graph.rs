use rustc_hash::FxHashMap;

use crate::error::GraphError;
use crate::expr::{Expr, ParseError};
use crate::functions::FunctionRegistry;

use super::edge::{BlockEdge, EdgeType};
use super::node::BlockNode;

/// Validated, immutable block graph.
///
/// Construction performs the full load-time validation battery: unique ids,
/// root present, edge endpoints present, guards on conditional edges,
/// unambiguous per-source priorities, acyclicity, reachability from the
/// root, and function/arity checks for every expression against the
/// registry. Anything that survives is safe to traverse at scan time.
#[derive(Debug)]
pub struct BlockGraph {
    root_id: String,
    nodes: Vec<BlockNode>,
    index: FxHashMap<String, usize>,
    edges: Vec<BlockEdge>,
    /// Per node, outgoing edge indices sorted by (priority, declaration order).
    outgoing: Vec<Vec<usize>>,
    /// Node indices in topological order.
    topo: Vec<usize>,
    /// Topological rank per node index.
    topo_rank: Vec<usize>,
}

impl BlockGraph {
    pub fn new(
        root_id: String,
        nodes: Vec<BlockNode>,
        edges: Vec<BlockEdge>,
        registry: &FunctionRegistry,
    ) -> Result<Self, GraphError> {
        let mut index = FxHashMap::default();
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.block_id.clone(), i).is_some() {
                return Err(GraphError::DuplicateNode(node.block_id.clone()));
            }
        }

        let Some(&root_idx) = index.get(&root_id) else {
            return Err(GraphError::MissingRoot(root_id));
        };

        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        for (e, edge) in edges.iter().enumerate() {
            let context = format!("edge {} -> {}", edge.from_id, edge.to_id);
            let Some(&from) = index.get(&edge.from_id) else {
                return Err(GraphError::UnknownNode {
                    id: edge.from_id.clone(),
                    context,
                });
            };
            if !index.contains_key(&edge.to_id) {
                return Err(GraphError::UnknownNode {
                    id: edge.to_id.clone(),
                    context,
                });
            }
            if edge.edge_type == EdgeType::Conditional && edge.guard.is_none() {
                return Err(GraphError::MissingGuard {
                    from: edge.from_id.clone(),
                    to: edge.to_id.clone(),
                });
            }
            outgoing[from].push(e);
        }

        for (n, out) in outgoing.iter_mut().enumerate() {
            out.sort_by_key(|&e| (edges[e].priority, e));
            for pair in out.windows(2) {
                if edges[pair[0]].priority == edges[pair[1]].priority {
                    return Err(GraphError::AmbiguousPriority {
                        from: nodes[n].block_id.clone(),
                        priority: edges[pair[0]].priority,
                    });
                }
            }
        }

        let (topo, topo_rank) = topological_order(&nodes, &edges, &index)?;

        // every node must be reachable from the root
        let mut reachable = vec![false; nodes.len()];
        reachable[root_idx] = true;
        let mut stack = vec![root_idx];
        while let Some(n) = stack.pop() {
            for &e in &outgoing[n] {
                let to = index[&edges[e].to_id];
                if !reachable[to] {
                    reachable[to] = true;
                    stack.push(to);
                }
            }
        }
        if let Some(unreached) = nodes.iter().enumerate().find(|(i, _)| !reachable[*i]) {
            return Err(GraphError::Unreachable(unreached.1.block_id.clone()));
        }

        let graph = Self {
            root_id,
            nodes,
            index,
            edges,
            outgoing,
            topo,
            topo_rank,
        };
        graph.check_expressions(registry)?;
        Ok(graph)
    }

    /// Arity and existence of every function referenced by any expression.
    fn check_expressions(&self, registry: &FunctionRegistry) -> Result<(), GraphError> {
        for node in &self.nodes {
            let id = &node.block_id;
            let groups: [(&str, &[super::node::ConditionDef]); 3] = [
                ("entry_conditions", &node.entry_conditions),
                ("exit_conditions", &node.exit_conditions),
                ("spot_entry_conditions", &node.spot_entry_conditions),
            ];
            for (kind, conds) in groups {
                for (i, cond) in conds.iter().enumerate() {
                    check_calls(&cond.expr, registry, &format!("node '{id}' {kind}[{i}]"))?;
                }
            }
            if let Some(cond) = &node.forward_spot_condition {
                check_calls(
                    &cond.expr,
                    registry,
                    &format!("node '{id}' forward_spot_condition"),
                )?;
            }
            if node.enabled_highlight().is_some() && node.forward_spot_condition.is_none() {
                return Err(GraphError::MissingSpotCondition { node: id.clone() });
            }
        }
        for edge in &self.edges {
            if let Some(guard) = &edge.guard {
                check_calls(
                    &guard.expr,
                    registry,
                    &format!("edge {} -> {} condition", edge.from_id, edge.to_id),
                )?;
            }
        }
        Ok(())
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn root(&self) -> &BlockNode {
        &self.nodes[self.index[&self.root_id]]
    }

    pub fn node(&self, block_id: &str) -> Option<&BlockNode> {
        self.index.get(block_id).map(|&i| &self.nodes[i])
    }

    pub fn index_of(&self, block_id: &str) -> Option<usize> {
        self.index.get(block_id).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge(&self, edge_index: usize) -> &BlockEdge {
        &self.edges[edge_index]
    }

    pub fn edges(&self) -> &[BlockEdge] {
        &self.edges
    }

    /// Outgoing edge indices of a node, lowest priority value first.
    pub fn outgoing_edge_indices(&self, block_id: &str) -> &[usize] {
        self.index
            .get(block_id)
            .map_or(&[], |&i| self.outgoing[i].as_slice())
    }

    /// Outgoing edges of a node, lowest priority value first.
    pub fn outgoing_edges(&self, block_id: &str) -> impl Iterator<Item = &BlockEdge> {
        self.outgoing_edge_indices(block_id)
            .iter()
            .map(|&e| &self.edges[e])
    }

    pub fn topo_rank(&self, block_id: &str) -> Option<usize> {
        self.index.get(block_id).map(|&i| self.topo_rank[i])
    }

    /// Nodes in topological order, root first.
    pub fn iter_topological(&self) -> impl Iterator<Item = &BlockNode> {
        self.topo.iter().map(|&i| &self.nodes[i])
    }
}

fn topological_order(
    nodes: &[BlockNode],
    edges: &[BlockEdge],
    index: &FxHashMap<String, usize>,
) -> Result<(Vec<usize>, Vec<usize>), GraphError> {
    let mut indegree = vec![0usize; nodes.len()];
    for edge in edges {
        indegree[index[&edge.to_id]] += 1;
    }

    // Kahn's algorithm; ties broken by declaration order for determinism
    let mut ready: Vec<usize> = (0..nodes.len()).filter(|&i| indegree[i] == 0).collect();
    let mut topo = Vec::with_capacity(nodes.len());
    let mut cursor = 0;
    while cursor < ready.len() {
        let n = ready[cursor];
        cursor += 1;
        topo.push(n);
        for edge in edges {
            if index[&edge.from_id] == n {
                let to = index[&edge.to_id];
                indegree[to] -= 1;
                if indegree[to] == 0 {
                    ready.push(to);
                }
            }
        }
    }

    if topo.len() != nodes.len() {
        let stuck = (0..nodes.len())
            .find(|&i| indegree[i] > 0)
            .map(|i| nodes[i].block_id.clone())
            .unwrap_or_default();
        return Err(GraphError::Cycle(stuck));
    }

    let mut rank = vec![0usize; nodes.len()];
    for (r, &n) in topo.iter().enumerate() {
        rank[n] = r;
    }
    Ok((topo, rank))
}

fn check_calls(
    expr: &Expr,
    registry: &FunctionRegistry,
    location: &str,
) -> Result<(), GraphError> {
    let mut problem: Option<ParseError> = None;
    expr.for_each_call(&mut |name, argc| {
        if problem.is_some() {
            return;
        }
        match registry.arity_of(name) {
            None => problem = Some(ParseError::UnknownFunction(name.to_string())),
            Some(expected) if expected != argc => {
                problem = Some(ParseError::Arity {
                    name: name.to_string(),
                    expected,
                    got: argc,
                });
            }
            Some(_) => {}
        }
    });
    match problem {
        Some(source) => Err(GraphError::Expression {
            location: location.to_string(),
            source,
        }),
        None => Ok(()),
    }
}

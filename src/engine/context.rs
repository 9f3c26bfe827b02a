use std::collections::BTreeSet;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::graph::{BlockGraph, EdgeType};
use crate::model::{BlockStatus, PatternInstance};

/// Mutable state of one in-flight pattern.
///
/// Every context owns its own block map; nothing here is shared between
/// patterns except the immutable graph handle. The orchestrator scopes each
/// spawn/peak/transition/exit operation to exactly one context at a time,
/// which is what lets unlimited patterns run concurrently without
/// cross-talk.
pub struct PatternContext {
    pattern: PatternInstance,
    graph: Arc<BlockGraph>,
    /// Targets of optional edges permanently skipped for this pattern.
    skipped: BTreeSet<String>,
    /// Candle index at which each block started, for duration bookkeeping.
    start_index: FxHashMap<String, usize>,
}

impl PatternContext {
    pub fn new(pattern: PatternInstance, graph: Arc<BlockGraph>, root_start_idx: usize) -> Self {
        let mut start_index = FxHashMap::default();
        start_index.insert(pattern.root_block_id.clone(), root_start_idx);
        Self {
            pattern,
            graph,
            skipped: BTreeSet::new(),
            start_index,
        }
    }

    pub fn pattern(&self) -> &PatternInstance {
        &self.pattern
    }

    pub(crate) fn pattern_mut(&mut self) -> &mut PatternInstance {
        &mut self.pattern
    }

    pub fn into_pattern(self) -> PatternInstance {
        self.pattern
    }

    pub fn active_block_ids(&self) -> Vec<String> {
        self.pattern.active_block_ids()
    }

    pub(crate) fn record_start(&mut self, block_id: &str, idx: usize) {
        self.start_index.insert(block_id.to_string(), idx);
    }

    pub(crate) fn start_index(&self, block_id: &str) -> Option<usize> {
        self.start_index.get(block_id).copied()
    }

    /// Edge indices whose source block is present in this pattern and whose
    /// target is neither present nor skipped, ordered by (source topological
    /// rank, edge priority, declaration order). This is the deterministic
    /// candidate order for the per-candle transition check.
    pub fn candidate_edges(&self) -> Vec<usize> {
        let mut candidates: Vec<(usize, i32, usize)> = Vec::new();
        for block in &self.pattern.blocks {
            // a FAILED block deadens its branch: no transitions out of it
            if block.status == BlockStatus::Failed {
                continue;
            }
            let Some(rank) = self.graph.topo_rank(&block.block_id) else {
                continue;
            };
            for &e in self.graph.outgoing_edge_indices(&block.block_id) {
                let edge = self.graph.edge(e);
                if self.pattern.contains(&edge.to_id) || self.skipped.contains(&edge.to_id) {
                    continue;
                }
                candidates.push((rank, edge.priority, e));
            }
        }
        candidates.sort_unstable();
        candidates.into_iter().map(|(_, _, e)| e).collect()
    }

    /// Target node ids one edge away from any present block, in candidate
    /// order, deduplicated.
    pub fn next_target_nodes(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut targets = Vec::new();
        for e in self.candidate_edges() {
            let to = &self.graph.edge(e).to_id;
            if seen.insert(to.clone()) {
                targets.push(to.clone());
            }
        }
        targets
    }

    /// After taking an edge out of `source`, permanently skip the targets
    /// of that source's other optional edges.
    pub(crate) fn skip_sibling_optionals(&mut self, source: &str, taken_edge: usize) {
        for &e in self.graph.outgoing_edge_indices(source) {
            if e == taken_edge {
                continue;
            }
            let edge = self.graph.edge(e);
            if edge.edge_type == EdgeType::Optional && !self.pattern.contains(&edge.to_id) {
                self.skipped.insert(edge.to_id.clone());
            }
        }
    }

    pub fn skipped_nodes(&self) -> impl Iterator<Item = &str> {
        self.skipped.iter().map(String::as_str)
    }

    /// True when every node still reachable from the root has a COMPLETED
    /// instance. Skipped optional targets are not reachable; a FAILED block
    /// deadens its whole branch.
    pub fn is_completed(&self) -> bool {
        let mut visited = BTreeSet::new();
        let mut stack = vec![self.pattern.root_block_id.clone()];
        while let Some(id) = stack.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            match self.pattern.block(&id) {
                None => return false,
                Some(b) if b.status == BlockStatus::Failed => continue,
                Some(b) => {
                    if b.status != BlockStatus::Completed {
                        return false;
                    }
                    for edge in self.graph.outgoing_edges(&id) {
                        if !self.skipped.contains(&edge.to_id) {
                            stack.push(edge.to_id.clone());
                        }
                    }
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use crate::graph::load_graph_str;
    use crate::model::{BlockInstance, Candle, DetectionMode, PatternId};
    use chrono::NaiveDate;

    const CHAIN: &str = r#"
block_graph:
  root_node: block1
  nodes:
    block1:
      block_type: 1
      name: surge
      entry_conditions: [ current.close > 0 ]
    block2:
      block_type: 2
      name: continuation
      entry_conditions: [ current.close > 0 ]
    block3:
      block_type: 3
      name: peak
      entry_conditions: [ current.close > 0 ]
  edges:
    - from_block: block1
      to_block: block2
    - from_block: block2
      to_block: block3
"#;

    fn graph(yaml: &str) -> Arc<BlockGraph> {
        let reg = FunctionRegistry::with_builtins();
        Arc::new(load_graph_str(yaml, &reg).unwrap())
    }

    fn candle(day: u32) -> Candle {
        Candle {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: 10.0,
            high: 11.0,
            low: 9.0,
            close: 10.0,
            volume: 100.0,
        }
    }

    fn context(graph: &Arc<BlockGraph>) -> PatternContext {
        let root = BlockInstance::open("block1", 1, "TEST", &candle(1), vec![]);
        let pattern = PatternInstance::new(
            PatternId::new(DetectionMode::Sequential, "TEST", candle(1).date, 1),
            "TEST",
            root,
        );
        PatternContext::new(pattern, Arc::clone(graph), 0)
    }

    #[test]
    fn candidates_are_one_edge_from_present_blocks() {
        let g = graph(CHAIN);
        let ctx = context(&g);
        let targets: Vec<&str> = ctx
            .candidate_edges()
            .into_iter()
            .map(|e| g.edge(e).to_id.as_str())
            .collect();
        // block3 is two edges away, so only block2 is a candidate
        assert_eq!(targets, vec!["block2"]);
        assert_eq!(ctx.next_target_nodes(), vec!["block2".to_string()]);
    }

    #[test]
    fn present_targets_are_excluded() {
        let g = graph(CHAIN);
        let mut ctx = context(&g);
        ctx.pattern_mut()
            .push_block(BlockInstance::open("block2", 2, "TEST", &candle(2), vec!["block1".into()]));
        ctx.record_start("block2", 1);
        let targets: Vec<&str> = ctx
            .candidate_edges()
            .into_iter()
            .map(|e| g.edge(e).to_id.as_str())
            .collect();
        assert_eq!(targets, vec!["block3"]);
    }

    #[test]
    fn completion_requires_every_reachable_node() {
        let g = graph(CHAIN);
        let mut ctx = context(&g);
        assert!(!ctx.is_completed());

        ctx.pattern_mut()
            .block_mut("block1")
            .unwrap()
            .complete(candle(2).date, "exit:0");
        // block2/block3 still unrealized
        assert!(!ctx.is_completed());

        ctx.pattern_mut()
            .push_block(BlockInstance::open("block2", 2, "TEST", &candle(3), vec!["block1".into()]));
        ctx.pattern_mut()
            .block_mut("block2")
            .unwrap()
            .complete(candle(4).date, "exit:0");
        ctx.pattern_mut()
            .push_block(BlockInstance::open("block3", 3, "TEST", &candle(5), vec!["block2".into()]));
        assert!(!ctx.is_completed());

        ctx.pattern_mut()
            .block_mut("block3")
            .unwrap()
            .complete(candle(6).date, "exit:0");
        assert!(ctx.is_completed());
    }

    #[test]
    fn failed_block_deadens_its_branch() {
        let g = graph(CHAIN);
        let mut ctx = context(&g);
        ctx.pattern_mut()
            .block_mut("block1")
            .unwrap()
            .fail(candle(2).date, "failure:0");
        // root failed: nothing else is required
        assert!(ctx.is_completed());
    }

    const OPTIONAL: &str = r#"
block_graph:
  root_node: block1
  nodes:
    block1:
      block_type: 1
      name: surge
      entry_conditions: [ current.close > 0 ]
    block2:
      block_type: 2
      name: main path
      entry_conditions: [ current.close > 0 ]
    block2b:
      block_type: 2
      name: side path
      entry_conditions: [ current.close > 0 ]
  edges:
    - from_block: block1
      to_block: block2
      priority: 0
    - from_block: block1
      to_block: block2b
      edge_type: optional
      priority: 1
"#;

    #[test]
    fn taken_edge_skips_sibling_optionals_permanently() {
        let g = graph(OPTIONAL);
        let mut ctx = context(&g);
        let taken = ctx.candidate_edges()[0];
        assert_eq!(g.edge(taken).to_id, "block2");

        ctx.pattern_mut()
            .push_block(BlockInstance::open("block2", 2, "TEST", &candle(2), vec!["block1".into()]));
        ctx.skip_sibling_optionals("block1", taken);

        assert_eq!(ctx.skipped_nodes().collect::<Vec<_>>(), vec!["block2b"]);
        assert!(ctx.candidate_edges().is_empty());

        // completion ignores the skipped optional target
        ctx.pattern_mut()
            .block_mut("block1")
            .unwrap()
            .complete(candle(2).date, "transition:block2");
        ctx.pattern_mut()
            .block_mut("block2")
            .unwrap()
            .complete(candle(3).date, "exit:0");
        assert!(ctx.is_completed());
    }
}

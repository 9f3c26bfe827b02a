// Highlight detection: a post-filter over already-detected blocks.
// Sequential detection stays oblivious to any of this.

use chrono::NaiveDate;

use crate::expr::{evaluate_condition, EvalContext};
use crate::functions::FunctionRegistry;
use crate::graph::{BlockGraph, BlockNode};
use crate::model::{BlockInstance, CandleSeries, PatternId, PatternInstance};

/// Outcome of evaluating a node's forward spots after a block start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotCheck {
    /// Total offsets at which the spot expression held.
    pub count: usize,
    /// Longest run of consecutive holding offsets, in declaration order.
    pub longest_run: usize,
    /// Dates of the holding spots, chronological.
    pub dates: Vec<NaiveDate>,
}

/// A block that met its node's highlight criterion.
#[derive(Debug, Clone)]
pub struct HighlightHit {
    pub pattern_id: PatternId,
    pub block: BlockInstance,
    pub spots: SpotCheck,
}

/// Evaluate the node's forward-spot expression at each configured day
/// offset after `start_idx`. Offsets beyond the end of the series simply
/// don't hold.
pub fn forward_spots(
    series: &CandleSeries,
    registry: &FunctionRegistry,
    node: &BlockNode,
    pattern: Option<&PatternInstance>,
    start_idx: usize,
) -> SpotCheck {
    let Some(highlight) = node.enabled_highlight() else {
        return SpotCheck {
            count: 0,
            longest_run: 0,
            dates: Vec::new(),
        };
    };
    let Some(spot) = &node.forward_spot_condition else {
        return SpotCheck {
            count: 0,
            longest_run: 0,
            dates: Vec::new(),
        };
    };

    let mut count = 0;
    let mut run = 0;
    let mut longest_run = 0;
    let mut dates = Vec::new();
    for &offset in &highlight.day_offsets {
        let idx = start_idx + offset;
        let hit = match series.get(idx) {
            Some(candle) => {
                let eval = match pattern {
                    Some(p) => EvalContext::with_pattern(series, idx, registry, p),
                    None => EvalContext::new(series, idx, registry),
                };
                let hit = evaluate_condition(&spot.expr, &eval)
                    && node
                        .spot_entry_conditions
                        .iter()
                        .all(|c| evaluate_condition(&c.expr, &eval));
                if hit {
                    dates.push(candle.date);
                }
                hit
            }
            None => false,
        };
        if hit {
            count += 1;
            run += 1;
            longest_run = longest_run.max(run);
        } else {
            run = 0;
        }
    }
    SpotCheck {
        count,
        longest_run,
        dates,
    }
}

/// Whether a spot check satisfies the node's highlight criterion.
pub fn satisfies_highlight(node: &BlockNode, spots: &SpotCheck) -> bool {
    node.enabled_highlight().is_some_and(|h| {
        if h.consecutive {
            spots.longest_run >= h.required_spot_count
        } else {
            spots.count >= h.required_spot_count
        }
    })
}

/// Walk the output of a sequential scan and return the blocks that qualify
/// as highlights, in chronological order of their start dates.
pub fn find_highlights(
    series: &CandleSeries,
    registry: &FunctionRegistry,
    graph: &BlockGraph,
    patterns: &[PatternInstance],
) -> Vec<HighlightHit> {
    let mut hits = Vec::new();
    for pattern in patterns {
        for block in &pattern.blocks {
            let Some(node) = graph.node(&block.block_id) else {
                continue;
            };
            if node.enabled_highlight().is_none() {
                continue;
            }
            let Some(start_idx) = series.index_of(block.started_at) else {
                continue;
            };
            let spots = forward_spots(series, registry, node, Some(pattern), start_idx);
            if satisfies_highlight(node, &spots) {
                tracing::debug!(
                    pattern_id = %pattern.pattern_id,
                    block_id = %block.block_id,
                    spot_count = spots.count,
                    "highlight detected"
                );
                hits.push(HighlightHit {
                    pattern_id: pattern.pattern_id.clone(),
                    block: block.clone(),
                    spots,
                });
            }
        }
    }
    hits.sort_by(|a, b| {
        (a.block.started_at, &a.pattern_id).cmp(&(b.block.started_at, &b.pattern_id))
    });
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use crate::graph::load_graph_str;
    use crate::model::Candle;
    use chrono::NaiveDate;

    const HIGHLIGHTED: &str = r#"
block_graph:
  root_node: block1
  nodes:
    block1:
      block_type: 1
      name: surge
      entry_conditions:
        - current.close >= 10000
      exit_conditions:
        - current.close < 9000
      highlight_condition:
        type: forward_spot
        parameters:
          required_spot_count: 2
          consecutive: true
          day_offsets: [1, 2]
      forward_spot_condition: current.volume >= prev.volume * 1.3
  edges: []
"#;

    fn candle(day: u32, close: f64, volume: f64) -> Candle {
        Candle {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume,
        }
    }

    fn fixture(volumes: &[f64]) -> (CandleSeries, FunctionRegistry, crate::graph::BlockGraph) {
        let reg = FunctionRegistry::with_builtins();
        let graph = load_graph_str(HIGHLIGHTED, &reg).unwrap();
        let candles = volumes
            .iter()
            .enumerate()
            .map(|(i, &v)| candle(i as u32 + 1, 10_500.0, v))
            .collect();
        (CandleSeries::new("TEST", candles).unwrap(), reg, graph)
    }

    #[test]
    fn two_consecutive_spots_qualify() {
        // start at idx 0; offsets 1 and 2 must each grow volume by 30%
        let (series, reg, graph) = fixture(&[1_000.0, 1_400.0, 2_000.0]);
        let node = graph.node("block1").unwrap();
        let spots = forward_spots(&series, &reg, node, None, 0);
        assert_eq!(spots.count, 2);
        assert_eq!(spots.longest_run, 2);
        assert!(satisfies_highlight(node, &spots));
    }

    #[test]
    fn non_consecutive_spots_fail_consecutive_requirement() {
        // offset 1 holds, offset 2 does not
        let (series, reg, graph) = fixture(&[1_000.0, 1_400.0, 1_450.0]);
        let node = graph.node("block1").unwrap();
        let spots = forward_spots(&series, &reg, node, None, 0);
        assert_eq!(spots.count, 1);
        assert!(!satisfies_highlight(node, &spots));
    }

    #[test]
    fn offsets_past_series_end_do_not_hold() {
        let (series, reg, graph) = fixture(&[1_000.0, 1_400.0]);
        let node = graph.node("block1").unwrap();
        let spots = forward_spots(&series, &reg, node, None, 0);
        assert_eq!(spots.count, 1);
        assert_eq!(spots.dates.len(), 1);
    }

    #[test]
    fn find_highlights_filters_scan_output() {
        use crate::engine::sequential::SequentialScanner;
        use std::sync::Arc;

        let reg = Arc::new(FunctionRegistry::with_builtins());
        let graph = Arc::new(load_graph_str(HIGHLIGHTED, &reg).unwrap());
        let series = CandleSeries::new(
            "TEST",
            vec![
                candle(1, 10_500.0, 1_000.0),
                candle(2, 10_600.0, 1_400.0),
                candle(3, 10_700.0, 2_000.0),
                candle(4, 8_000.0, 500.0),
            ],
        )
        .unwrap();
        let mut scanner = SequentialScanner::new(Arc::clone(&graph), Arc::clone(&reg));
        let outcome = scanner.scan(&series);
        let hits = find_highlights(&series, &reg, &graph, &outcome.patterns);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].block.block_id, "block1");
        assert_eq!(hits[0].spots.count, 2);
    }
}

use std::sync::Arc;

use chrono::NaiveDate;
use ordered_float::OrderedFloat;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::functions::FunctionRegistry;
use crate::graph::BlockGraph;
use crate::model::{BlockInstance, CandleSeries, DetectionMode, PatternId, PatternStatus};

use super::highlight::find_highlights;
use super::sequential::SequentialScanner;
use super::support::{analyze_support_resistance, SupportResistance, DEFAULT_TOLERANCE_PCT};

/// Window sizes for the highlight-centric workflow, in trading days.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HighlightScanConfig {
    /// How far before a highlight the backward relocation scan looks.
    pub backward_window: usize,
    /// How far after the (relocated) root forward tracking runs.
    pub forward_window: usize,
    /// Retest tolerance for the S/R analysis, in percent.
    pub sr_tolerance_pct: f64,
}

impl Default for HighlightScanConfig {
    fn default() -> Self {
        Self {
            backward_window: 30,
            forward_window: 1125,
            sr_tolerance_pct: DEFAULT_TOLERANCE_PCT,
        }
    }
}

/// What the backward relocation found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackwardScanResult {
    /// Whether a stronger root was found before the highlight.
    pub relocated: bool,
    /// `strongest.peak / highlight.peak`; 1.0 when nothing relocated.
    pub strength_ratio: f64,
    pub scanned_from: Option<NaiveDate>,
    pub scanned_to: Option<NaiveDate>,
}

/// One assembled highlight-centric detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightCentricPattern {
    pub pattern_id: PatternId,
    pub ticker: String,
    /// The block whose forward spots met the highlight criterion.
    pub highlight_block: BlockInstance,
    /// The pattern's root: the strongest earlier root-block, or the
    /// highlight itself.
    pub root_block: BlockInstance,
    pub backward: BackwardScanResult,
    /// Every block detected in the forward tracking window.
    pub forward_blocks: Vec<BlockInstance>,
    pub sr_analysis: SupportResistance,
    pub status: PatternStatus,
}

#[derive(Debug, Clone)]
pub struct CentricOutcome {
    pub patterns: Vec<HighlightCentricPattern>,
    pub cancelled: bool,
}

/// Alternate top-level detector: highlight scan, backward root relocation,
/// forward extended tracking, S/R analysis. Composes fresh sequential
/// scanners over sub-windows of the same series; the fundamental state
/// machine is untouched.
pub struct HighlightCentricScanner {
    graph: Arc<BlockGraph>,
    registry: Arc<FunctionRegistry>,
    config: HighlightScanConfig,
    cancel: Option<CancellationToken>,
}

impl HighlightCentricScanner {
    pub fn new(graph: Arc<BlockGraph>, registry: Arc<FunctionRegistry>) -> Self {
        Self {
            graph,
            registry,
            config: HighlightScanConfig::default(),
            cancel: None,
        }
    }

    pub fn with_config(mut self, config: HighlightScanConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn scan(&self, series: &CandleSeries) -> CentricOutcome {
        // 1. highlight scan over the full range
        let mut scanner =
            SequentialScanner::new(Arc::clone(&self.graph), Arc::clone(&self.registry));
        if let Some(token) = &self.cancel {
            scanner = scanner.with_cancellation(token.clone());
        }
        let base = scanner.scan(series);
        if base.cancelled {
            return CentricOutcome {
                patterns: Vec::new(),
                cancelled: true,
            };
        }

        let hits = find_highlights(series, &self.registry, &self.graph, &base.patterns);
        let root_id = self.graph.root_id();

        let mut sequences: FxHashMap<NaiveDate, u32> = FxHashMap::default();
        let mut patterns = Vec::new();
        for hit in hits {
            if self
                .cancel
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
            {
                tracing::info!(ticker = series.ticker(), "highlight-centric scan cancelled");
                return CentricOutcome {
                    patterns,
                    cancelled: true,
                };
            }
            // the workflow anchors on root-block highlights
            if hit.block.block_id != root_id {
                continue;
            }
            let Some(h_idx) = series.index_of(hit.block.started_at) else {
                continue;
            };

            // 2. backward relocation
            let (root_block, backward) = self.relocate_root(series, &hit.block, h_idx);

            // 3. forward tracking from the (possibly relocated) root
            let forward_blocks = self.track_forward(series, &root_block);

            // 4. S/R analysis over the same forward window
            let sr_analysis = analyze_support_resistance(
                series,
                &root_block,
                self.config.forward_window,
                self.config.sr_tolerance_pct,
            );

            // 5. assemble
            let seq = sequences.entry(hit.block.started_at).or_insert(0);
            *seq += 1;
            let pattern_id = PatternId::new(
                DetectionMode::Highlight,
                series.ticker(),
                hit.block.started_at,
                *seq,
            );
            tracing::debug!(
                ticker = series.ticker(),
                pattern_id = %pattern_id,
                relocated = backward.relocated,
                ratio = backward.strength_ratio,
                "assembled highlight-centric pattern"
            );
            patterns.push(HighlightCentricPattern {
                pattern_id,
                ticker: series.ticker().to_string(),
                highlight_block: hit.block,
                root_block,
                backward,
                forward_blocks,
                sr_analysis,
                status: PatternStatus::Completed,
            });
        }

        CentricOutcome {
            patterns,
            cancelled: false,
        }
    }

    /// Scan the window before the highlight for root blocks stronger than
    /// it; the strongest becomes the pattern's root.
    fn relocate_root(
        &self,
        series: &CandleSeries,
        highlight: &BlockInstance,
        h_idx: usize,
    ) -> (BlockInstance, BackwardScanResult) {
        let lo = h_idx.saturating_sub(self.config.backward_window);
        if lo >= h_idx {
            return (
                highlight.clone(),
                BackwardScanResult {
                    relocated: false,
                    strength_ratio: 1.0,
                    scanned_from: None,
                    scanned_to: None,
                },
            );
        }

        let window = series.window(lo, h_idx);
        let scanned_from = window.candles().first().map(|c| c.date);
        let scanned_to = window.candles().last().map(|c| c.date);

        let mut scanner =
            SequentialScanner::new(Arc::clone(&self.graph), Arc::clone(&self.registry));
        let outcome = scanner.scan(&window);

        let strongest = outcome
            .patterns
            .iter()
            .flat_map(|p| &p.blocks)
            .filter(|b| b.block_id == self.graph.root_id() && b.peak_price > highlight.peak_price)
            .max_by_key(|b| OrderedFloat(b.peak_price));

        match strongest {
            Some(root) if highlight.peak_price > 0.0 => (
                root.clone(),
                BackwardScanResult {
                    relocated: true,
                    strength_ratio: root.peak_price / highlight.peak_price,
                    scanned_from,
                    scanned_to,
                },
            ),
            _ => (
                highlight.clone(),
                BackwardScanResult {
                    relocated: false,
                    strength_ratio: 1.0,
                    scanned_from,
                    scanned_to,
                },
            ),
        }
    }

    /// Run sequential detection over the extended window after the root and
    /// collect every block it produces.
    fn track_forward(&self, series: &CandleSeries, root: &BlockInstance) -> Vec<BlockInstance> {
        let Some(root_idx) = series.index_of(root.started_at) else {
            return Vec::new();
        };
        let start = root_idx + 1;
        let end = start.saturating_add(self.config.forward_window);
        if start >= series.len() {
            return Vec::new();
        }
        let window = series.window(start, end);
        let mut scanner =
            SequentialScanner::new(Arc::clone(&self.graph), Arc::clone(&self.registry));
        scanner
            .scan(&window)
            .patterns
            .into_iter()
            .flat_map(|p| p.blocks)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::load_graph_str;
    use crate::model::Candle;

    const GRAPH: &str = r#"
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

    fn candle(day: u32, high: f64, close: f64, volume: f64) -> Candle {
        Candle {
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap() + chrono::Days::new(u64::from(day)),
            open: close,
            high,
            low: close.min(high) - 1.0,
            close,
            volume,
        }
    }

    fn fixture() -> (Arc<BlockGraph>, Arc<FunctionRegistry>) {
        let registry = Arc::new(FunctionRegistry::with_builtins());
        let graph = Arc::new(load_graph_str(GRAPH, &registry).unwrap());
        (graph, registry)
    }

    /// An early strong root (peak 12_000), a dip below 9_000 closing it,
    /// then a weaker highlight anchor (peak 10_000) with two consecutive
    /// volume spots.
    fn series_with_relocation() -> CandleSeries {
        CandleSeries::new(
            "TEST",
            vec![
                candle(0, 12_000.0, 11_500.0, 1_000.0),
                candle(1, 11_000.0, 10_500.0, 900.0),
                candle(2, 8_990.0, 8_500.0, 800.0),
                candle(3, 9_400.0, 9_000.0, 700.0),
                candle(4, 10_000.0, 10_000.0, 1_000.0),
                candle(5, 10_100.0, 10_050.0, 1_400.0),
                candle(6, 10_200.0, 10_100.0, 2_000.0),
                candle(7, 10_300.0, 10_200.0, 2_100.0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn relocates_to_strongest_earlier_root() {
        let (graph, registry) = fixture();
        let scanner = HighlightCentricScanner::new(graph, registry);
        let outcome = scanner.scan(&series_with_relocation());
        assert!(!outcome.cancelled);
        assert_eq!(outcome.patterns.len(), 1);

        let p = &outcome.patterns[0];
        assert!(p.pattern_id.as_str().starts_with("HIGHLIGHT_TEST_"));
        assert_eq!(p.status, PatternStatus::Completed);
        assert!(p.backward.relocated);
        assert_eq!(p.root_block.peak_price, 12_000.0);
        assert_eq!(p.highlight_block.peak_price, 10_300.0);
        assert!((p.backward.strength_ratio - 12_000.0 / 10_300.0).abs() < 1e-12);
        assert_eq!(p.sr_analysis.tolerance_pct, DEFAULT_TOLERANCE_PCT);
    }

    #[test]
    fn no_stronger_root_keeps_highlight_as_root() {
        let (graph, registry) = fixture();
        let scanner = HighlightCentricScanner::new(graph, registry);
        // no earlier entry at all: the highlight is the first candle
        let series = CandleSeries::new(
            "TEST",
            vec![
                candle(0, 10_000.0, 10_000.0, 1_000.0),
                candle(1, 10_100.0, 10_050.0, 1_400.0),
                candle(2, 10_200.0, 10_100.0, 2_000.0),
            ],
        )
        .unwrap();
        let outcome = scanner.scan(&series);
        assert_eq!(outcome.patterns.len(), 1);
        let p = &outcome.patterns[0];
        assert!(!p.backward.relocated);
        assert_eq!(p.backward.strength_ratio, 1.0);
        assert_eq!(p.root_block.started_at, p.highlight_block.started_at);
    }

    #[test]
    fn forward_blocks_come_from_the_window_after_root() {
        let (graph, registry) = fixture();
        let scanner = HighlightCentricScanner::new(graph, registry).with_config(
            HighlightScanConfig {
                backward_window: 30,
                forward_window: 2,
                sr_tolerance_pct: DEFAULT_TOLERANCE_PCT,
            },
        );
        let outcome = scanner.scan(&series_with_relocation());
        let p = &outcome.patterns[0];
        // forward window is [root+1, root+2]: day 1 re-enters immediately
        assert!(!p.forward_blocks.is_empty());
        for b in &p.forward_blocks {
            assert!(b.started_at > p.root_block.started_at);
        }
    }

    #[test]
    fn cancelled_before_assembly_returns_partial() {
        let (graph, registry) = fixture();
        let token = CancellationToken::new();
        token.cancel();
        let scanner =
            HighlightCentricScanner::new(graph, registry).with_cancellation(token);
        let outcome = scanner.scan(&series_with_relocation());
        assert!(outcome.cancelled);
        assert!(outcome.patterns.is_empty());
    }
}

use std::sync::Arc;

use chrono::NaiveDate;
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;

use crate::expr::{evaluate_condition, EvalContext};
use crate::functions::FunctionRegistry;
use crate::graph::BlockGraph;
use crate::model::{
    BlockInstance, CandleSeries, DetectionMode, PatternId, PatternInstance, PatternStatus,
};

use super::context::PatternContext;

/// Result of one `scan` call: every undrained pattern detected so far
/// (COMPLETED and still-ACTIVE), sorted by pattern id, plus whether the
/// scan stopped on cancellation. A cancelled scan drops in-flight ACTIVE
/// patterns and yields only the already-completed ones.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub patterns: Vec<PatternInstance>,
    pub cancelled: bool,
}

/// Forward-only, root-first pattern detector for one ticker.
///
/// The scanner is the sole owner of mutable detection state: the list of
/// per-pattern contexts, the completed store and the per-date spawn
/// counters. Condition evaluation itself is pure, so everything the scanner
/// does per candle is deterministic given the candle history and the graph.
///
/// A scanner can be fed successive extensions of the same series: candles at
/// or before the last processed date are skipped, which makes
/// scan-drain-scan over a growing history equivalent to one scan over the
/// full history.
pub struct SequentialScanner {
    graph: Arc<BlockGraph>,
    registry: Arc<FunctionRegistry>,
    active: Vec<PatternContext>,
    completed: Vec<PatternInstance>,
    spawned: FxHashMap<NaiveDate, u32>,
    last_seen: Option<NaiveDate>,
    cancel: Option<CancellationToken>,
}

impl SequentialScanner {
    pub fn new(graph: Arc<BlockGraph>, registry: Arc<FunctionRegistry>) -> Self {
        Self {
            graph,
            registry,
            active: Vec::new(),
            completed: Vec::new(),
            spawned: FxHashMap::default(),
            last_seen: None,
            cancel: None,
        }
    }

    /// Attach a cooperative cancellation signal, checked between candles.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Remove and return the COMPLETED patterns accumulated so far, so a
    /// long-running caller can bound memory between batches.
    pub fn drain_completed(&mut self) -> Vec<PatternInstance> {
        let mut drained = std::mem::take(&mut self.completed);
        drained.sort_by(|a, b| a.pattern_id.cmp(&b.pattern_id));
        drained
    }

    /// Single pass over the series. See [`ScanOutcome`] for what comes back.
    pub fn scan(&mut self, series: &CandleSeries) -> ScanOutcome {
        for idx in 0..series.len() {
            let date = series.candles()[idx].date;
            if self.last_seen.is_some_and(|seen| date <= seen) {
                continue;
            }
            if self
                .cancel
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
            {
                let dropped = self.active.len();
                self.active.clear();
                tracing::info!(
                    ticker = series.ticker(),
                    dropped,
                    "scan cancelled, returning completed patterns only"
                );
                let mut patterns = std::mem::take(&mut self.completed);
                patterns.sort_by(|a, b| a.pattern_id.cmp(&b.pattern_id));
                return ScanOutcome {
                    patterns,
                    cancelled: true,
                };
            }
            self.step(series, idx);
            self.last_seen = Some(date);
        }

        let mut patterns: Vec<PatternInstance> = self
            .completed
            .iter()
            .cloned()
            .chain(self.active.iter().map(|c| c.pattern().clone()))
            .collect();
        patterns.sort_by(|a, b| a.pattern_id.cmp(&b.pattern_id));
        ScanOutcome {
            patterns,
            cancelled: false,
        }
    }

    /// One candle: spawn, then evolve every pattern in creation order, then
    /// sweep newly completed patterns out of the active list.
    fn step(&mut self, series: &CandleSeries, idx: usize) {
        self.try_spawn(series, idx);

        let graph = Arc::clone(&self.graph);
        let registry = Arc::clone(&self.registry);
        for ctx in &mut self.active {
            evolve_pattern(ctx, &graph, &registry, series, idx);
        }

        let mut i = 0;
        while i < self.active.len() {
            if self.active[i].pattern().status == PatternStatus::Completed {
                let ctx = self.active.remove(i);
                self.completed.push(ctx.into_pattern());
            } else {
                i += 1;
            }
        }
    }

    /// Root-entry check under a no-pattern context. At most one new pattern
    /// per candle per ticker.
    fn try_spawn(&mut self, series: &CandleSeries, idx: usize) {
        let current = &series.candles()[idx];
        if self.spawned.contains_key(&current.date) {
            return;
        }
        let root = self.graph.root();
        let eval = EvalContext::new(series, idx, &self.registry);
        if !root
            .entry_conditions
            .iter()
            .all(|c| evaluate_condition(&c.expr, &eval))
        {
            return;
        }

        let seq = self.spawned.entry(current.date).or_insert(0);
        *seq += 1;
        let id = PatternId::new(DetectionMode::Sequential, series.ticker(), current.date, *seq);
        tracing::debug!(
            ticker = series.ticker(),
            pattern_id = %id,
            date = %current.date,
            "spawned pattern"
        );
        let block = BlockInstance::open(
            &root.block_id,
            root.block_type,
            series.ticker(),
            current,
            vec![],
        );
        let pattern = PatternInstance::new(id, series.ticker(), block);
        self.active
            .push(PatternContext::new(pattern, Arc::clone(&self.graph), idx));
    }
}

/// Advance one pattern by one candle: at most one transition (judged
/// against the previous candle's peaks), peak update, exit checks,
/// completion check — in that order.
fn evolve_pattern(
    ctx: &mut PatternContext,
    graph: &BlockGraph,
    registry: &FunctionRegistry,
    series: &CandleSeries,
    idx: usize,
) {
    let current = &series.candles()[idx];

    // transition check: first satisfied candidate in deterministic order.
    // Entry conditions compare against peaks as of the previous candle — a
    // breakout like `close >= block1.peak_price * 1.05` must measure the
    // extension over yesterday's peak, not over today's own high.
    let taken = {
        let eval = EvalContext::with_pattern(series, idx, registry, ctx.pattern());
        let mut taken = None;
        for e in ctx.candidate_edges() {
            let edge = graph.edge(e);
            if let Some(guard) = &edge.guard {
                if !evaluate_condition(&guard.expr, &eval) {
                    continue;
                }
            }
            let Some(target) = graph.node(&edge.to_id) else {
                continue;
            };
            if target
                .entry_conditions
                .iter()
                .all(|c| evaluate_condition(&c.expr, &eval))
            {
                taken = Some(e);
                break;
            }
        }
        taken
    };
    if let Some(e) = taken {
        apply_transition(ctx, graph, series, idx, e);
    }

    // peaks advance for the blocks still active after the transition, so a
    // source terminated on the previous trading day keeps yesterday's peak
    // while an exit-day high is still covered by the exit check below
    for block in ctx
        .pattern_mut()
        .blocks
        .iter_mut()
        .filter(|b| b.is_active())
    {
        block.update_peaks(current);
    }

    // exit check (OR semantics) for blocks active before this candle;
    // a transition this candle already pre-empted its source's exit
    let exits: Vec<(String, String)> = {
        let pattern = ctx.pattern();
        let eval = EvalContext::with_pattern(series, idx, registry, pattern);
        let mut out = Vec::new();
        for block in pattern
            .blocks
            .iter()
            .filter(|b| b.is_active() && b.started_at != current.date)
        {
            let Some(node) = graph.node(&block.block_id) else {
                continue;
            };
            let elapsed = ctx
                .start_index(&block.block_id)
                .map_or(0, |start| idx.saturating_sub(start));
            if node
                .parameters
                .max_duration
                .is_some_and(|m| elapsed >= m as usize)
            {
                out.push((block.block_id.clone(), "expired:max_duration".to_string()));
                continue;
            }
            if node
                .parameters
                .min_duration
                .is_some_and(|m| elapsed < m as usize)
            {
                continue;
            }
            for (i, cond) in node.exit_conditions.iter().enumerate() {
                if evaluate_condition(&cond.expr, &eval) {
                    out.push((block.block_id.clone(), format!("exit:{}", cond.label(i))));
                    break;
                }
            }
        }
        out
    };
    for (block_id, reason) in exits {
        tracing::debug!(
            pattern_id = %ctx.pattern().pattern_id,
            %block_id,
            %reason,
            "block exit"
        );
        if let Some(block) = ctx.pattern_mut().block_mut(&block_id) {
            block.complete(current.date, reason);
        }
    }

    // completion: every reachable node realized and completed, or nothing
    // active and nowhere left to go
    if ctx.is_completed()
        || (!ctx.pattern().has_active_blocks() && ctx.candidate_edges().is_empty())
    {
        tracing::debug!(pattern_id = %ctx.pattern().pattern_id, "pattern completed");
        ctx.pattern_mut().mark_completed(current.date);
    }
}

/// Take one edge: open the target block, terminate the edge's ACTIVE source
/// with `ended_at` on the previous trading day, and permanently skip the
/// source's other optional targets.
fn apply_transition(
    ctx: &mut PatternContext,
    graph: &BlockGraph,
    series: &CandleSeries,
    idx: usize,
    edge_index: usize,
) {
    let current = &series.candles()[idx];
    let edge = graph.edge(edge_index);
    let Some(target) = graph.node(&edge.to_id) else {
        return;
    };

    let prev_date = series.previous_trading_day(idx).map(|c| c.date);
    if let Some(source) = ctx.pattern_mut().block_mut(&edge.from_id) {
        if source.is_active() {
            let ended = prev_date.unwrap_or(source.started_at);
            source.complete(ended, format!("transition:{}", edge.to_id));
        }
    }

    tracing::debug!(
        pattern_id = %ctx.pattern().pattern_id,
        from = %edge.from_id,
        to = %edge.to_id,
        date = %current.date,
        "transition"
    );
    let block = BlockInstance::open(
        &target.block_id,
        target.block_type,
        series.ticker(),
        current,
        vec![edge.from_id.clone()],
    );
    ctx.pattern_mut().push_block(block);
    ctx.record_start(&edge.to_id, idx);
    ctx.skip_sibling_optionals(&edge.from_id, edge_index);
}

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{self, EnvFilter};

use seedscan::engine::{
    HighlightCentricPattern, HighlightCentricScanner, HighlightScanConfig, SequentialScanner,
};
use seedscan::functions::FunctionRegistry;
use seedscan::graph::load_graph_path;
use seedscan::model::{Candle, CandleSeries, PatternInstance};
use seedscan::storage::{PatternRepository, SqliteRepository};

/// Candle file layout: one ticker per file.
#[derive(Debug, Deserialize)]
struct TickerFile {
    ticker: String,
    candles: Vec<Candle>,
}

#[derive(Debug, Serialize)]
struct SequentialReport {
    ticker: String,
    patterns: Vec<PatternInstance>,
}

#[derive(Debug, Serialize)]
struct HighlightReport {
    ticker: String,
    patterns: Vec<HighlightCentricPattern>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Sequential,
    Highlight,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(graph_path) = args.next() else {
        bail!("usage: seedscan <graph.yaml> <candles.json>...");
    };
    let candle_paths: Vec<PathBuf> = args.map(PathBuf::from).collect();
    if candle_paths.is_empty() {
        bail!("no candle files given");
    }

    let mode = match std::env::var("SEEDSCAN_MODE").as_deref() {
        Err(_) | Ok("sequential") => Mode::Sequential,
        Ok("highlight") => Mode::Highlight,
        Ok(other) => bail!("unknown SEEDSCAN_MODE '{other}'"),
    };
    let config = highlight_config_from_env()?;

    let registry = Arc::new(FunctionRegistry::with_builtins());
    let graph = Arc::new(
        load_graph_path(&graph_path, &registry)
            .with_context(|| format!("loading graph {graph_path}"))?,
    );
    tracing::info!(
        graph = %graph_path,
        nodes = graph.len(),
        tickers = candle_paths.len(),
        ?mode,
        "starting scan"
    );

    let bar = ProgressBar::new(candle_paths.len() as u64);
    bar.set_style(ProgressStyle::with_template(
        "{bar:40.cyan/blue} {pos}/{len} {msg}",
    )?);

    match mode {
        Mode::Sequential => {
            let mut reports: Vec<SequentialReport> = candle_paths
                .par_iter()
                .filter_map(|path| {
                    let result = scan_sequential(path, &graph, &registry);
                    bar.inc(1);
                    match result {
                        Ok(report) => Some(report),
                        Err(err) => {
                            tracing::warn!(path = %path.display(), %err, "skipping ticker");
                            None
                        }
                    }
                })
                .collect();
            bar.finish_and_clear();
            reports.sort_by(|a, b| a.ticker.cmp(&b.ticker));

            if let Ok(db_path) = std::env::var("SEEDSCAN_DB") {
                let repo = SqliteRepository::open(&db_path)
                    .with_context(|| format!("opening repository {db_path}"))?;
                let mut saved = 0;
                for report in &reports {
                    saved += repo.save_all(&report.patterns)?;
                }
                tracing::info!(db = %db_path, saved, "persisted patterns");
            }
            serde_json::to_writer_pretty(std::io::stdout().lock(), &reports)?;
        }
        Mode::Highlight => {
            let mut reports: Vec<HighlightReport> = candle_paths
                .par_iter()
                .filter_map(|path| {
                    let result = scan_highlight(path, &graph, &registry, config);
                    bar.inc(1);
                    match result {
                        Ok(report) => Some(report),
                        Err(err) => {
                            tracing::warn!(path = %path.display(), %err, "skipping ticker");
                            None
                        }
                    }
                })
                .collect();
            bar.finish_and_clear();
            reports.sort_by(|a, b| a.ticker.cmp(&b.ticker));
            serde_json::to_writer_pretty(std::io::stdout().lock(), &reports)?;
        }
    }
    println!();
    Ok(())
}

fn load_series(path: &PathBuf) -> Result<CandleSeries> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let file: TickerFile =
        serde_json::from_str(&raw).with_context(|| format!("decoding {}", path.display()))?;
    Ok(CandleSeries::new(file.ticker, file.candles)?)
}

fn scan_sequential(
    path: &PathBuf,
    graph: &Arc<seedscan::graph::BlockGraph>,
    registry: &Arc<FunctionRegistry>,
) -> Result<SequentialReport> {
    let series = load_series(path)?;
    let mut scanner = SequentialScanner::new(Arc::clone(graph), Arc::clone(registry));
    let outcome = scanner.scan(&series);
    Ok(SequentialReport {
        ticker: series.ticker().to_string(),
        patterns: outcome.patterns,
    })
}

fn scan_highlight(
    path: &PathBuf,
    graph: &Arc<seedscan::graph::BlockGraph>,
    registry: &Arc<FunctionRegistry>,
    config: HighlightScanConfig,
) -> Result<HighlightReport> {
    let series = load_series(path)?;
    let scanner =
        HighlightCentricScanner::new(Arc::clone(graph), Arc::clone(registry)).with_config(config);
    let outcome = scanner.scan(&series);
    Ok(HighlightReport {
        ticker: series.ticker().to_string(),
        patterns: outcome.patterns,
    })
}

fn highlight_config_from_env() -> Result<HighlightScanConfig> {
    let mut config = HighlightScanConfig::default();
    if let Ok(v) = std::env::var("SEEDSCAN_BACKWARD_WINDOW") {
        config.backward_window = v.parse().context("SEEDSCAN_BACKWARD_WINDOW")?;
    }
    if let Ok(v) = std::env::var("SEEDSCAN_FORWARD_WINDOW") {
        config.forward_window = v.parse().context("SEEDSCAN_FORWARD_WINDOW")?;
    }
    Ok(config)
}

//! Shared fixtures: hand-built candle scripts and graph documents with
//! exactly-known expected outcomes.

// not every suite uses every fixture
#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;

use seedscan::functions::FunctionRegistry;
use seedscan::graph::{load_graph_str, BlockGraph};
use seedscan::model::{Candle, CandleSeries};

/// Single-node graph from the basic surge scenario: volume-confirmed entry,
/// hard price-break exit.
pub const SINGLE_BLOCK: &str = r#"
block_graph:
  root_node: block1
  nodes:
    block1:
      block_type: 1
      name: initial surge
      entry_conditions:
        - current.close >= 10000 and current.volume >= 1_000_000
      exit_conditions:
        - current.close < 9000
  edges: []
"#;

/// Two-node chain: continuation entered on a 5% extension over the surge
/// peak, abandoned on a fall below it.
pub const TWO_BLOCK: &str = r#"
block_graph:
  root_node: block1
  nodes:
    block1:
      block_type: 1
      name: initial surge
      entry_conditions:
        - current.close >= 10000 and current.volume >= 1_000_000
        - current.volume >= prev.volume * 1.5
      exit_conditions:
        - current.volume < 1_000_000
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

pub fn day(n: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(u64::from(n) - 1)
}

/// Flat candle: open/high/low all equal to close.
pub fn candle(n: u32, close: f64, volume: f64) -> Candle {
    Candle {
        date: day(n),
        open: close,
        high: close,
        low: close,
        close,
        volume,
    }
}

/// Candle with an explicit high.
pub fn candle_high(n: u32, close: f64, high: f64, volume: f64) -> Candle {
    Candle {
        date: day(n),
        open: close,
        high,
        low: close.min(high),
        close,
        volume,
    }
}

pub fn series(candles: Vec<Candle>) -> CandleSeries {
    CandleSeries::new("TEST", candles).unwrap()
}

pub fn registry() -> Arc<FunctionRegistry> {
    Arc::new(FunctionRegistry::with_builtins())
}

pub fn graph(yaml: &str, registry: &FunctionRegistry) -> Arc<BlockGraph> {
    Arc::new(load_graph_str(yaml, registry).unwrap())
}

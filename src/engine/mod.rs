//! Detection engines.
//!
//! `sequential` is the fundamental state machine: one pass over a ticker's
//! candles, evolving an unbounded list of independent per-pattern contexts.
//! `highlight`/`support`/`centric` layer the highlight-anchored workflow on
//! top of it without touching the state machine itself.

pub mod centric;
pub mod context;
pub mod highlight;
pub mod sequential;
pub mod support;

pub use centric::{
    BackwardScanResult, CentricOutcome, HighlightCentricPattern, HighlightCentricScanner,
    HighlightScanConfig,
};
pub use context::PatternContext;
pub use highlight::{find_highlights, HighlightHit, SpotCheck};
pub use sequential::{ScanOutcome, SequentialScanner};
pub use support::{analyze_support_resistance, SupportResistance, DEFAULT_TOLERANCE_PCT};

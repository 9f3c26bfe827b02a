use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::block::{BlockInstance, BlockStatus};

/// Which top-level detector produced a pattern. The mode is baked into the
/// pattern id prefix so ids from the two detectors never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    Sequential,
    Highlight,
}

impl DetectionMode {
    pub fn prefix(self) -> &'static str {
        match self {
            DetectionMode::Sequential => "SEED",
            DetectionMode::Highlight => "HIGHLIGHT",
        }
    }
}

/// `{MODE}_{ticker}_{YYYYMMDD}_{sequence:03}`. Total-ordered by its textual
/// form; the zero-padded date and sequence make that order chronological
/// within one ticker and mode.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(String);

impl PatternId {
    pub fn new(mode: DetectionMode, ticker: &str, date: NaiveDate, sequence: u32) -> Self {
        Self(format!(
            "{}_{}_{}_{:03}",
            mode.prefix(),
            ticker,
            date.format("%Y%m%d"),
            sequence
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PatternId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PatternStatus {
    Active,
    Completed,
    Archived,
}

impl PatternStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PatternStatus::Active => "ACTIVE",
            PatternStatus::Completed => "COMPLETED",
            PatternStatus::Archived => "ARCHIVED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(PatternStatus::Active),
            "COMPLETED" => Some(PatternStatus::Completed),
            "ARCHIVED" => Some(PatternStatus::Archived),
            _ => None,
        }
    }
}

/// A concrete pattern realization: the root block plus every descendant
/// block instantiated so far, in creation order, at most one per block id.
///
/// `created_at`/`completed_at` are candle dates, not wall-clock stamps, so
/// re-running a scan over identical inputs reproduces patterns bit for bit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternInstance {
    pub pattern_id: PatternId,
    pub ticker: String,
    pub root_block_id: String,
    pub blocks: Vec<BlockInstance>,
    pub status: PatternStatus,
    pub created_at: NaiveDate,
    pub completed_at: Option<NaiveDate>,
}

impl PatternInstance {
    pub fn new(pattern_id: PatternId, ticker: impl Into<String>, root: BlockInstance) -> Self {
        Self {
            pattern_id,
            ticker: ticker.into(),
            root_block_id: root.block_id.clone(),
            created_at: root.started_at,
            blocks: vec![root],
            status: PatternStatus::Active,
            completed_at: None,
        }
    }

    pub fn root(&self) -> &BlockInstance {
        // the root is inserted at construction and never removed
        &self.blocks[0]
    }

    pub fn block(&self, block_id: &str) -> Option<&BlockInstance> {
        self.blocks.iter().find(|b| b.block_id == block_id)
    }

    pub fn block_mut(&mut self, block_id: &str) -> Option<&mut BlockInstance> {
        self.blocks.iter_mut().find(|b| b.block_id == block_id)
    }

    pub fn contains(&self, block_id: &str) -> bool {
        self.block(block_id).is_some()
    }

    pub fn active_block_ids(&self) -> Vec<String> {
        self.blocks
            .iter()
            .filter(|b| b.is_active())
            .map(|b| b.block_id.clone())
            .collect()
    }

    /// Append a block. Each block id may appear at most once per pattern;
    /// callers check `contains` first, this is the backstop.
    pub fn push_block(&mut self, block: BlockInstance) {
        debug_assert!(!self.contains(&block.block_id));
        self.blocks.push(block);
    }

    pub fn mark_completed(&mut self, completed_at: NaiveDate) {
        self.status = PatternStatus::Completed;
        self.completed_at = Some(completed_at);
    }

    pub fn has_active_blocks(&self) -> bool {
        self.blocks.iter().any(BlockInstance::is_active)
    }

    pub fn all_completed(&self) -> bool {
        self.blocks.iter().all(|b| b.status == BlockStatus::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::candle::Candle;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn root_block(day: u32) -> BlockInstance {
        let c = Candle {
            date: date(day),
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 1_000.0,
        };
        BlockInstance::open("block1", 1, "TEST", &c, vec![])
    }

    #[test]
    fn pattern_id_format() {
        let id = PatternId::new(DetectionMode::Sequential, "005930", date(5), 1);
        assert_eq!(id.as_str(), "SEED_005930_20240305_001");
        let id = PatternId::new(DetectionMode::Highlight, "005930", date(5), 12);
        assert_eq!(id.as_str(), "HIGHLIGHT_005930_20240305_012");
    }

    #[test]
    fn pattern_ids_order_chronologically() {
        let a = PatternId::new(DetectionMode::Sequential, "A", date(5), 2);
        let b = PatternId::new(DetectionMode::Sequential, "A", date(6), 1);
        let c = PatternId::new(DetectionMode::Sequential, "A", date(6), 2);
        assert!(a < b && b < c);
    }

    #[test]
    fn new_pattern_holds_root_and_inherits_dates() {
        let p = PatternInstance::new(
            PatternId::new(DetectionMode::Sequential, "TEST", date(5), 1),
            "TEST",
            root_block(5),
        );
        assert_eq!(p.root_block_id, "block1");
        assert_eq!(p.created_at, date(5));
        assert_eq!(p.root().block_id, "block1");
        assert!(p.status == PatternStatus::Active);
    }

    #[test]
    fn block_lookup_by_id() {
        let p = PatternInstance::new(
            PatternId::new(DetectionMode::Sequential, "TEST", date(5), 1),
            "TEST",
            root_block(5),
        );
        assert!(p.contains("block1"));
        assert!(!p.contains("block2"));
        assert_eq!(p.active_block_ids(), vec!["block1".to_string()]);
    }

    #[test]
    fn serde_round_trip() {
        let p = PatternInstance::new(
            PatternId::new(DetectionMode::Sequential, "TEST", date(5), 1),
            "TEST",
            root_block(5),
        );
        let json = serde_json::to_string(&p).unwrap();
        let back: PatternInstance = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
    }
}

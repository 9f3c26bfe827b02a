use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::candle::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BlockStatus {
    Active,
    Completed,
    Failed,
}

impl BlockStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockStatus::Active => "ACTIVE",
            BlockStatus::Completed => "COMPLETED",
            BlockStatus::Failed => "FAILED",
        }
    }
}

/// One realized phase of a pattern. Created ACTIVE when its node's entry
/// conditions hold, peak-tracked on every subsequent candle, and terminated
/// by an exit condition, a taken transition edge, or window expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockInstance {
    pub block_id: String,
    pub block_type: u32,
    pub ticker: String,
    pub started_at: NaiveDate,
    pub ended_at: Option<NaiveDate>,
    pub status: BlockStatus,
    pub peak_price: f64,
    pub peak_volume: f64,
    pub peak_date: NaiveDate,
    #[serde(default)]
    pub parent_block_ids: Vec<String>,
    pub exit_reason: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl BlockInstance {
    /// Open a new ACTIVE instance on its entry candle. Peaks start from the
    /// entry candle itself, so `peak_price >= entry_high` holds from day one.
    pub fn open(
        block_id: impl Into<String>,
        block_type: u32,
        ticker: impl Into<String>,
        entry: &Candle,
        parent_block_ids: Vec<String>,
    ) -> Self {
        Self {
            block_id: block_id.into(),
            block_type,
            ticker: ticker.into(),
            started_at: entry.date,
            ended_at: None,
            status: BlockStatus::Active,
            peak_price: entry.high,
            peak_volume: entry.volume,
            peak_date: entry.date,
            parent_block_ids,
            exit_reason: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == BlockStatus::Active
    }

    /// Track running highs. Price and volume peaks advance independently;
    /// `peak_date` follows the price peak.
    pub fn update_peaks(&mut self, candle: &Candle) {
        if candle.high > self.peak_price {
            self.peak_price = candle.high;
            self.peak_date = candle.date;
        }
        if candle.volume > self.peak_volume {
            self.peak_volume = candle.volume;
        }
    }

    pub fn complete(&mut self, ended_at: NaiveDate, exit_reason: impl Into<String>) {
        self.status = BlockStatus::Completed;
        self.ended_at = Some(ended_at.max(self.started_at));
        self.exit_reason = Some(exit_reason.into());
    }

    pub fn fail(&mut self, ended_at: NaiveDate, exit_reason: impl Into<String>) {
        self.status = BlockStatus::Failed;
        self.ended_at = Some(ended_at.max(self.started_at));
        self.exit_reason = Some(exit_reason.into());
    }
}

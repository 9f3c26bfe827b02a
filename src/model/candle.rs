use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::DataError;

/// One daily OHLCV bar. Prices and volume are already adjusted for
/// corporate actions. A bar with `volume == 0` represents a trading halt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Daily traded value: close times volume.
    pub fn trading_value(&self) -> f64 {
        self.close * self.volume
    }

    /// A halted day never acts as a "previous trading day".
    pub fn is_halted(&self) -> bool {
        self.volume <= 0.0
    }
}

/// Date-sorted candle history for a single ticker.
///
/// Construction validates the data invariants (strictly increasing dates,
/// non-negative volume, high/low envelope) and precomputes the prefix sums
/// and previous-trading-day table that the expression functions query.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    ticker: String,
    candles: Vec<Candle>,
    close_sum: Vec<f64>,
    volume_sum: Vec<f64>,
    prev_trading: Vec<Option<usize>>,
}

impl CandleSeries {
    pub fn new(ticker: impl Into<String>, candles: Vec<Candle>) -> Result<Self, DataError> {
        let ticker = ticker.into();
        for pair in candles.windows(2) {
            if pair[1].date == pair[0].date {
                return Err(DataError::DuplicateDate {
                    ticker,
                    date: pair[1].date,
                });
            }
            if pair[1].date < pair[0].date {
                return Err(DataError::OutOfOrder {
                    ticker,
                    date: pair[1].date,
                });
            }
        }
        for c in &candles {
            if c.volume < 0.0 {
                return Err(DataError::NegativeVolume {
                    ticker,
                    date: c.date,
                    volume: c.volume,
                });
            }
            if c.high < c.open.max(c.close).max(c.low) || c.low > c.open.min(c.close).min(c.high) {
                return Err(DataError::InvertedRange {
                    ticker,
                    date: c.date,
                });
            }
        }
        Ok(Self::build(ticker, candles))
    }

    fn build(ticker: String, candles: Vec<Candle>) -> Self {
        let mut close_sum = Vec::with_capacity(candles.len() + 1);
        let mut volume_sum = Vec::with_capacity(candles.len() + 1);
        close_sum.push(0.0);
        volume_sum.push(0.0);
        for c in &candles {
            close_sum.push(close_sum.last().copied().unwrap_or(0.0) + c.close);
            volume_sum.push(volume_sum.last().copied().unwrap_or(0.0) + c.volume);
        }

        let mut prev_trading = Vec::with_capacity(candles.len());
        let mut last_real: Option<usize> = None;
        for (i, c) in candles.iter().enumerate() {
            prev_trading.push(last_real);
            if !c.is_halted() {
                last_real = Some(i);
            }
        }

        Self {
            ticker,
            candles,
            close_sum,
            volume_sum,
            prev_trading,
        }
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Candle> {
        self.candles.get(idx)
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    /// Most recent candle with volume > 0 strictly before `idx`.
    /// Halted days are skipped so that conditions on `prev` compare against
    /// the last real trading day, not a zero-volume gap.
    pub fn previous_trading_day(&self, idx: usize) -> Option<&Candle> {
        self.prev_trading_index(idx).map(|i| &self.candles[i])
    }

    pub fn prev_trading_index(&self, idx: usize) -> Option<usize> {
        self.prev_trading.get(idx).copied().flatten()
    }

    /// Index of the candle with exactly this date.
    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        self.candles
            .binary_search_by_key(&date, |c| c.date)
            .ok()
    }

    /// Mean close over the `period` candles ending at `idx` (inclusive).
    /// `None` when fewer than `period` candles are available.
    pub fn mean_close(&self, idx: usize, period: usize) -> Option<f64> {
        self.window_mean(&self.close_sum, idx, period)
    }

    /// Mean volume over the `period` candles ending at `idx` (inclusive).
    pub fn mean_volume(&self, idx: usize, period: usize) -> Option<f64> {
        self.window_mean(&self.volume_sum, idx, period)
    }

    fn window_mean(&self, prefix: &[f64], idx: usize, period: usize) -> Option<f64> {
        if period == 0 || idx >= self.candles.len() || idx + 1 < period {
            return None;
        }
        let hi = prefix[idx + 1];
        let lo = prefix[idx + 1 - period];
        Some((hi - lo) / period as f64)
    }

    /// Maximum high over the `period` candles strictly before `idx`.
    /// `None` when fewer than `period` candles precede `idx`.
    pub fn max_high_before(&self, idx: usize, period: usize) -> Option<f64> {
        if period == 0 || idx < period || idx > self.candles.len() {
            return None;
        }
        self.candles[idx - period..idx]
            .iter()
            .map(|c| c.high)
            .fold(None, |acc: Option<f64>, h| {
                Some(acc.map_or(h, |a| a.max(h)))
            })
    }

    /// Maximum volume over the `period` candles strictly before `idx`.
    pub fn max_volume_before(&self, idx: usize, period: usize) -> Option<f64> {
        if period == 0 || idx < period || idx > self.candles.len() {
            return None;
        }
        self.candles[idx - period..idx]
            .iter()
            .map(|c| c.volume)
            .fold(None, |acc: Option<f64>, v| {
                Some(acc.map_or(v, |a| a.max(v)))
            })
    }

    /// Number of candles with volume > 0 whose date lies strictly between
    /// the two given dates (both endpoints excluded, order-insensitive).
    pub fn count_between(&self, a: NaiveDate, b: NaiveDate) -> usize {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        self.candles
            .iter()
            .filter(|c| c.date > lo && c.date < hi && !c.is_halted())
            .count()
    }

    /// Sub-series over candle indices `[start, end)`. Slices of a validated
    /// series stay valid, so the caches are rebuilt without re-validation.
    pub fn window(&self, start: usize, end: usize) -> Self {
        let start = start.min(self.candles.len());
        let end = end.clamp(start, self.candles.len());
        Self::build(self.ticker.clone(), self.candles[start..end].to_vec())
    }
}

// Support/resistance behavior of the market around a reference block's
// peak level over a forward window.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{BlockInstance, CandleSeries};

/// Default retest tolerance around the reference level, in percent.
pub const DEFAULT_TOLERANCE_PCT: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportResistance {
    /// The reference level: the block's peak price.
    pub reference_peak: f64,
    /// Candles actually examined (may be shorter than requested near the
    /// end of the series).
    pub window_days: usize,
    /// Fraction of examined days closing at or above the reference peak.
    pub support_ratio: f64,
    /// Days whose range touched the tolerance band around the peak.
    pub retest_count: usize,
    /// Deepest close-based drawdown from the reference peak, as a fraction.
    pub max_drawdown: f64,
    pub tolerance_pct: f64,
    /// First day closing at or above twice the reference peak, if any.
    pub breakout_date: Option<NaiveDate>,
}

/// Examine up to `window` trading days strictly after the reference block's
/// start.
pub fn analyze_support_resistance(
    series: &CandleSeries,
    reference: &BlockInstance,
    window: usize,
    tolerance_pct: f64,
) -> SupportResistance {
    let peak = reference.peak_price;
    let start = series
        .index_of(reference.started_at)
        .map_or(series.len(), |i| i + 1);
    let end = start.saturating_add(window).min(series.len());
    let candles = &series.candles()[start.min(series.len())..end];

    let band_lo = peak * (1.0 - tolerance_pct / 100.0);
    let band_hi = peak * (1.0 + tolerance_pct / 100.0);

    let mut support_days = 0usize;
    let mut retest_count = 0usize;
    let mut max_drawdown = 0.0f64;
    let mut breakout_date = None;

    for c in candles {
        if c.close >= peak {
            support_days += 1;
        }
        if c.low <= band_hi && c.high >= band_lo {
            retest_count += 1;
        }
        if peak > 0.0 {
            max_drawdown = max_drawdown.max((peak - c.close) / peak);
        }
        if breakout_date.is_none() && c.close >= 2.0 * peak {
            breakout_date = Some(c.date);
        }
    }

    let window_days = candles.len();
    SupportResistance {
        reference_peak: peak,
        window_days,
        support_ratio: if window_days == 0 {
            0.0
        } else {
            support_days as f64 / window_days as f64
        },
        retest_count,
        max_drawdown,
        tolerance_pct,
        breakout_date,
    }
}

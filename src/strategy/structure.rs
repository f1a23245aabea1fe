//! Pivot detection and market-structure shifts.
//!
//! A structure shift is read from the last three high pivots and last three
//! low pivots behind the evaluated candle. They must interleave in time as
//! `low0 < high0 < low1 < high1 < low2 < high2`, keep minimum separations, and
//! match one of two shapes:
//!
//! - continuation: higher lows throughout, each low staying under the prior
//!   high, with the last high pulling back under the previous one (bullish)
//! - reversal: a higher high followed by a lower low and a lower high (bearish)

use crate::models::{Candle, Direction, PivotKind};

/// Classify candle `idx` against a symmetric window of `window` candles.
///
/// Candles without a full window on both sides are never pivots.
pub fn classify_pivot(candles: &[Candle], idx: usize, window: usize) -> PivotKind {
    if idx < window || idx + window >= candles.len() {
        return PivotKind::None;
    }

    let candle = &candles[idx];
    let block = &candles[idx - window..=idx + window];
    let is_high = block.iter().all(|c| candle.high >= c.high);
    let is_low = block.iter().all(|c| candle.low <= c.low);

    match (is_high, is_low) {
        (true, true) => PivotKind::Both,
        (true, false) => PivotKind::High,
        (false, true) => PivotKind::Low,
        (false, false) => PivotKind::None,
    }
}

/// Pivot classification for every candle
pub fn pivot_series(candles: &[Candle], window: usize) -> Vec<PivotKind> {
    (0..candles.len())
        .map(|i| classify_pivot(candles, i, window))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftPattern {
    Continuation,
    Reversal,
}

/// A confirmed structure shift
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureShift {
    pub pattern: ShiftPattern,
}

impl StructureShift {
    /// Direction the shift points to
    pub fn direction(&self) -> Direction {
        match self.pattern {
            ShiftPattern::Continuation => Direction::Long,
            ShiftPattern::Reversal => Direction::Short,
        }
    }
}

/// Three low and three high pivot values, oldest first
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PivotLegs {
    pub lows: [f64; 3],
    pub highs: [f64; 3],
}

impl PivotLegs {
    /// Minimum separations, with `primary` and `secondary` in price units
    pub fn separated(&self, primary: f64, secondary: f64) -> bool {
        let [l0, l1, l2] = self.lows;
        let [h0, h1, _] = self.highs;
        (l0 - h0).abs() > primary
            && (h0 - l1).abs() > secondary
            && (h1 - l1).abs() > primary
            && (h1 - l2).abs() > secondary
    }

    pub fn is_continuation(&self) -> bool {
        let [l0, l1, l2] = self.lows;
        let [h0, h1, h2] = self.highs;
        l0 < h0
            && l1 > l0
            && l1 < h0
            && h1 > h0
            && l2 > l1
            && l2 < h1
            && h2 < h1
            && h2 > l2
    }

    pub fn is_reversal(&self) -> bool {
        let [l0, l1, l2] = self.lows;
        let [h0, h1, h2] = self.highs;
        l0 < h0 && l1 > l0 && l1 < h0 && h1 > h0 && l2 < l1 && h2 < h1
    }
}

/// Structure-shift detector over a day of candles
#[derive(Debug, Clone)]
pub struct StructureDetector {
    pub pivot_window: usize,
    /// Candles searched behind the evaluated one
    pub lookback: usize,
    /// Primary separation as a fraction of price; secondary is a third of it
    pub separation: f64,
}

impl Default for StructureDetector {
    fn default() -> Self {
        Self {
            pivot_window: 5,
            lookback: 30,
            separation: 0.005,
        }
    }
}

impl StructureDetector {
    /// Check for a structure shift at `candle_idx`, using pivots precomputed
    /// over the same candles.
    pub fn detect_at(
        &self,
        candles: &[Candle],
        pivots: &[PivotKind],
        candle_idx: usize,
    ) -> Option<StructureShift> {
        if candle_idx >= candles.len() || pivots.len() != candles.len() {
            return None;
        }

        // Pivots closer than the window to the candle are not confirmed yet
        let end = candle_idx.checked_sub(self.pivot_window)?;
        let start = candle_idx.saturating_sub(self.lookback + self.pivot_window);

        let mut high_idx = Vec::new();
        let mut low_idx = Vec::new();
        for i in start..end {
            match pivots[i] {
                PivotKind::High => high_idx.push(i),
                PivotKind::Low => low_idx.push(i),
                PivotKind::Both | PivotKind::None => {}
            }
        }
        if high_idx.len() < 3 || low_idx.len() < 3 {
            return None;
        }

        let h = &high_idx[high_idx.len() - 3..];
        let l = &low_idx[low_idx.len() - 3..];
        let interleaved = l[0] < h[0] && h[0] < l[1] && l[1] < h[1] && h[1] < l[2] && l[2] < h[2];
        if !interleaved {
            return None;
        }

        let legs = PivotLegs {
            lows: [candles[l[0]].low, candles[l[1]].low, candles[l[2]].low],
            highs: [candles[h[0]].high, candles[h[1]].high, candles[h[2]].high],
        };

        let reference = candles[candle_idx].close;
        let primary = self.separation * reference;
        if !legs.separated(primary, primary / 3.0) {
            return None;
        }

        if legs.is_continuation() {
            Some(StructureShift {
                pattern: ShiftPattern::Continuation,
            })
        } else if legs.is_reversal() {
            Some(StructureShift {
                pattern: ShiftPattern::Reversal,
            })
        } else {
            None
        }
    }

    /// Convenience wrapper computing pivots first
    pub fn detect(&self, candles: &[Candle], candle_idx: usize) -> Option<StructureShift> {
        let pivots = pivot_series(candles, self.pivot_window);
        self.detect_at(candles, &pivots, candle_idx)
    }
}

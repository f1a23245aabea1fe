use crate::config::{TrendConfig, TrendMode};
use crate::indicators::{calculate_ema_series, calculate_ewm_series};
use crate::models::{Candle, TrendRegime};
use chrono::{DateTime, Utc};

/// Higher-timeframe regime classifier.
///
/// A bar counts as "above" when its whole body sits strictly above the EMA
/// (`min(open, close) > ema`), "below" when `max(open, close) < ema`. The
/// regime at index `i` is `Up`/`Down` only when every bar of `[i - backcandles, i]`
/// agrees.
///
/// In [`TrendMode::Slope`] a bar is `Up` when it closes above an EMA that rose
/// since the previous bar, `Down` when it closes below a falling one.
#[derive(Debug, Clone)]
pub struct TrendFilter {
    ema_period: usize,
    backcandles: usize,
    mode: TrendMode,
}

impl Default for TrendFilter {
    fn default() -> Self {
        Self::from_config(&TrendConfig::default())
    }
}

impl TrendFilter {
    pub fn new(ema_period: usize, backcandles: usize) -> Self {
        Self {
            ema_period,
            backcandles,
            mode: TrendMode::Body,
        }
    }

    pub fn from_config(config: &TrendConfig) -> Self {
        Self::new(config.ema_period, config.backcandles).with_mode(config.mode)
    }

    pub fn with_mode(mut self, mode: TrendMode) -> Self {
        self.mode = mode;
        self
    }

    /// Regime for every candle, aligned to the input
    pub fn regime_series(&self, candles: &[Candle]) -> Vec<TrendRegime> {
        match self.mode {
            TrendMode::Body => self.body_regimes(candles),
            TrendMode::Slope => self.slope_regimes(candles),
        }
    }

    fn body_regimes(&self, candles: &[Candle]) -> Vec<TrendRegime> {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let ema = calculate_ema_series(&closes, self.ema_period);

        // Per-bar position relative to the EMA; bars without EMA are neither
        let above: Vec<bool> = candles
            .iter()
            .zip(&ema)
            .map(|(c, e)| e.map_or(false, |e| c.body_low() > e))
            .collect();
        let below: Vec<bool> = candles
            .iter()
            .zip(&ema)
            .map(|(c, e)| e.map_or(false, |e| c.body_high() < e))
            .collect();

        (0..candles.len())
            .map(|i| {
                if i < self.backcandles {
                    return TrendRegime::Neutral;
                }
                let window = i - self.backcandles..=i;
                let up = above[window.clone()].iter().all(|&b| b);
                let down = below[window].iter().all(|&b| b);
                match (up, down) {
                    (true, false) => TrendRegime::Up,
                    (false, true) => TrendRegime::Down,
                    // Straddle (both) cannot happen with strict comparisons
                    _ => TrendRegime::Neutral,
                }
            })
            .collect()
    }

    fn slope_regimes(&self, candles: &[Candle]) -> Vec<TrendRegime> {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let ema = calculate_ewm_series(&closes, self.ema_period);

        (0..candles.len())
            .map(|i| {
                if i == 0 {
                    return TrendRegime::Neutral;
                }
                let rising = ema[i] > ema[i - 1];
                let falling = ema[i] < ema[i - 1];
                if closes[i] > ema[i] && rising {
                    TrendRegime::Up
                } else if closes[i] < ema[i] && falling {
                    TrendRegime::Down
                } else {
                    TrendRegime::Neutral
                }
            })
            .collect()
    }

    /// Regime of the last candle opened strictly before `instant`
    pub fn regime_before(&self, candles: &[Candle], instant: DateTime<Utc>) -> TrendRegime {
        let visible = candles.partition_point(|c| c.timestamp < instant);
        if visible == 0 {
            return TrendRegime::Neutral;
        }
        self.regime_series(&candles[..visible])
            .last()
            .copied()
            .unwrap_or(TrendRegime::Neutral)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let open = close - 0.5;
                Candle::new(start + Duration::hours(2 * i as i64), open, close + 1.0, open - 1.0, close)
            })
            .collect()
    }

    #[test]
    fn test_early_indices_are_neutral() {
        let closes: Vec<f64> = (0..10).map(|i| 100.0 + i as f64 * 5.0).collect();
        let filter = TrendFilter::new(3, 4);
        let series = filter.regime_series(&candles_from_closes(&closes));
        assert_eq!(series.len(), 10);
        for regime in &series[..4] {
            assert_eq!(*regime, TrendRegime::Neutral);
        }
    }

    #[test]
    fn test_rising_series_is_up() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64 * 5.0).collect();
        let filter = TrendFilter::new(5, 3);
        let series = filter.regime_series(&candles_from_closes(&closes));
        assert_eq!(*series.last().unwrap(), TrendRegime::Up);
    }

    #[test]
    fn test_falling_series_is_down() {
        let closes: Vec<f64> = (0..30).map(|i| 300.0 - i as f64 * 5.0).collect();
        let filter = TrendFilter::new(5, 3);
        let series = filter.regime_series(&candles_from_closes(&closes));
        assert_eq!(*series.last().unwrap(), TrendRegime::Down);
    }

    #[test]
    fn test_one_bar_across_the_ema_breaks_the_window() {
        let mut closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64 * 5.0).collect();
        closes[28] = 100.0; // dips under the EMA
        let filter = TrendFilter::new(5, 3);
        let series = filter.regime_series(&candles_from_closes(&closes));
        assert_eq!(*series.last().unwrap(), TrendRegime::Neutral);
    }

    #[test]
    fn test_slope_mode_needs_close_and_slope_to_agree() {
        let filter = TrendFilter::new(5, 15).with_mode(TrendMode::Slope);

        let rising: Vec<f64> = (0..10).map(|i| 100.0 + i as f64 * 5.0).collect();
        let series = filter.regime_series(&candles_from_closes(&rising));
        assert_eq!(series[0], TrendRegime::Neutral);
        // no trailing window: the second bar already reads the slope
        assert_eq!(series[1], TrendRegime::Up);
        assert_eq!(*series.last().unwrap(), TrendRegime::Up);

        let falling: Vec<f64> = (0..10).map(|i| 300.0 - i as f64 * 5.0).collect();
        let series = filter.regime_series(&candles_from_closes(&falling));
        assert_eq!(*series.last().unwrap(), TrendRegime::Down);

        // one close back under the EMA turns it down at once
        let mut dip = rising.clone();
        dip.push(130.0);
        let series = filter.regime_series(&candles_from_closes(&dip));
        assert_eq!(*series.last().unwrap(), TrendRegime::Down);

        let flat = filter.regime_series(&candles_from_closes(&[100.0; 6]));
        assert!(flat.iter().all(|r| *r == TrendRegime::Neutral));
    }

    #[test]
    fn test_slope_mode_from_config() {
        let config = TrendConfig {
            ema_period: 5,
            backcandles: 3,
            mode: TrendMode::Slope,
        };
        let filter = TrendFilter::from_config(&config);
        let closes: Vec<f64> = (0..3).map(|i| 100.0 + i as f64).collect();
        let candles = candles_from_closes(&closes);
        // body mode would still be warming up here
        assert_eq!(filter.regime_before(&candles, candles[2].timestamp), TrendRegime::Up);
    }

    #[test]
    fn test_regime_before_ignores_later_bars() {
        let mut closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64 * 5.0).collect();
        closes.extend((0..10).map(|i| 200.0 - i as f64 * 20.0));
        let candles = candles_from_closes(&closes);
        let filter = TrendFilter::new(5, 3);

        let cutoff = candles[30].timestamp;
        assert_eq!(filter.regime_before(&candles, cutoff), TrendRegime::Up);
        assert_eq!(
            filter.regime_before(&candles, candles[0].timestamp),
            TrendRegime::Neutral
        );
    }
}

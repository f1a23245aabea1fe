use crate::models::{Candle, SweepBias};

/// Highest high and lowest low of a series
fn range_of(candles: &[Candle]) -> Option<(f64, f64)> {
    let first = candles.first()?;
    Some(candles.iter().skip(1).fold((first.high, first.low), |(hi, lo), c| {
        (hi.max(c.high), lo.min(c.low))
    }))
}

/// Compare the London range against the Asia range.
///
/// London breaking only the Asia low gives a long bias, breaking only the
/// high gives a short bias. Either series empty gives `SweepBias::None`.
pub fn detect_sweep(asia: &[Candle], london: &[Candle]) -> SweepBias {
    let (Some((asia_high, asia_low)), Some((london_high, london_low))) =
        (range_of(asia), range_of(london))
    else {
        return SweepBias::None;
    };

    classify_sweep(asia_high, asia_low, london_high, london_low)
}

/// Bias rule on precomputed session extremes
pub fn classify_sweep(asia_high: f64, asia_low: f64, london_high: f64, london_low: f64) -> SweepBias {
    let high_taken = london_high > asia_high;
    let low_taken = london_low < asia_low;

    match (high_taken, low_taken) {
        (true, true) => SweepBias::Both,
        (true, false) => SweepBias::Short,
        (false, true) => SweepBias::Long,
        (false, false) => SweepBias::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn series(ranges: &[(f64, f64)]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        ranges
            .iter()
            .enumerate()
            .map(|(i, &(high, low))| {
                Candle::new(start + Duration::minutes(5 * i as i64), low, high, low, high)
            })
            .collect()
    }

    #[test]
    fn test_empty_series_has_no_bias() {
        let asia = series(&[(110.0, 100.0)]);
        assert_eq!(detect_sweep(&[], &asia), SweepBias::None);
        assert_eq!(detect_sweep(&asia, &[]), SweepBias::None);
        assert_eq!(detect_sweep(&[], &[]), SweepBias::None);
    }

    #[test]
    fn test_high_only_sweep_is_short() {
        let asia = series(&[(108.0, 100.0), (110.0, 104.0)]);
        let london = series(&[(115.0, 102.0)]);
        assert_eq!(detect_sweep(&asia, &london), SweepBias::Short);
    }

    #[test]
    fn test_low_only_sweep_is_long() {
        let asia = series(&[(110.0, 100.0)]);
        let london = series(&[(109.0, 99.5), (105.0, 101.0)]);
        assert_eq!(detect_sweep(&asia, &london), SweepBias::Long);
    }

    #[test]
    fn test_both_sides_swept() {
        for (lh, ll) in [(110.5, 99.0), (200.0, 1.0), (110.01, 99.99)] {
            assert_eq!(classify_sweep(110.0, 100.0, lh, ll), SweepBias::Both);
        }
    }

    #[test]
    fn test_inside_range_is_none() {
        // Touching an extreme is not a break
        assert_eq!(classify_sweep(110.0, 100.0, 110.0, 100.0), SweepBias::None);
    }
}

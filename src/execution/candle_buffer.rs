use crate::models::{Candle, Timeframe};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

type SeriesKey = (String, Timeframe);

/// Thread-safe in-memory buffer for closed candles
///
/// Keeps a rolling, strictly time-ordered window per (symbol, timeframe).
/// Stored candles are never modified; merging only appends newer ones.
#[derive(Clone)]
pub struct CandleBuffer {
    data: Arc<RwLock<HashMap<SeriesKey, VecDeque<Candle>>>>,
    max_candles: usize,
}

impl CandleBuffer {
    /// Create a new candle buffer
    ///
    /// # Arguments
    /// * `max_candles` - Maximum number of candles to keep per series
    pub fn new(max_candles: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            max_candles,
        }
    }

    /// Merge a fetched batch into the series
    ///
    /// Candles at or before the newest stored timestamp are skipped, as are
    /// out-of-order ones within the batch. Returns how many were appended.
    pub fn merge(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<usize, String> {
        let mut data = self.data.write().map_err(|e| e.to_string())?;

        let series = data
            .entry((symbol.to_string(), timeframe))
            .or_insert_with(VecDeque::new);

        let mut added = 0;
        for candle in candles {
            let newer = series
                .back()
                .map_or(true, |last| candle.timestamp > last.timestamp);
            if newer {
                series.push_back(*candle);
                added += 1;
            }
        }

        // Remove oldest if exceeds max
        while series.len() > self.max_candles {
            series.pop_front();
        }

        Ok(added)
    }

    /// All candles for a series, oldest first
    pub fn get_candles(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Candle>, String> {
        let data = self.data.read().map_err(|e| e.to_string())?;

        Ok(data
            .get(&(symbol.to_string(), timeframe))
            .map(|deque| deque.iter().copied().collect())
            .unwrap_or_default())
    }

    pub fn latest_timestamp(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<DateTime<Utc>>, String> {
        let data = self.data.read().map_err(|e| e.to_string())?;
        Ok(data
            .get(&(symbol.to_string(), timeframe))
            .and_then(|d| d.back())
            .map(|c| c.timestamp))
    }

    pub fn candle_count(&self, symbol: &str, timeframe: Timeframe) -> Result<usize, String> {
        let data = self.data.read().map_err(|e| e.to_string())?;
        Ok(data
            .get(&(symbol.to_string(), timeframe))
            .map(|d| d.len())
            .unwrap_or(0))
    }
}

/// Drop a trailing candle that has not closed by `now`
pub fn closed_candles(mut candles: Vec<Candle>, timeframe: Timeframe, now: DateTime<Utc>) -> Vec<Candle> {
    while candles
        .last()
        .map_or(false, |c| c.timestamp + timeframe.duration() > now)
    {
        candles.pop();
    }
    candles
}

/// Aggregate candles into `timeframe` buckets aligned to the Unix epoch
///
/// Input must be time-ordered. A bucket opens at the first candle falling in it.
pub fn resample_candles(candles: &[Candle], timeframe: Timeframe) -> Vec<Candle> {
    let bucket_secs = timeframe.duration().num_seconds();
    let mut out: Vec<Candle> = Vec::new();

    for candle in candles {
        let ts = candle.timestamp.timestamp();
        let bucket_start = ts - ts.rem_euclid(bucket_secs);
        let Some(bucket_ts) = DateTime::<Utc>::from_timestamp(bucket_start, 0) else {
            continue;
        };

        match out.last_mut() {
            Some(last) if last.timestamp == bucket_ts => {
                last.high = last.high.max(candle.high);
                last.low = last.low.min(candle.low);
                last.close = candle.close;
                last.volume += candle.volume;
            }
            _ => out.push(Candle {
                timestamp: bucket_ts,
                ..*candle
            }),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, 0, 0, 0).unwrap()
    }

    fn create_test_candle(minutes: i64, price: f64) -> Candle {
        Candle {
            timestamp: start() + Duration::minutes(minutes),
            open: price,
            high: price + 1.0,
            low: price - 1.0,
            close: price,
            volume: 1000.0,
        }
    }

    #[test]
    fn test_new_buffer() {
        let buffer = CandleBuffer::new(100);
        assert_eq!(buffer.max_candles, 100);
        assert_eq!(buffer.candle_count("SOLUSDT", Timeframe::M5).unwrap(), 0);
    }

    #[test]
    fn test_merge_skips_overlap() {
        let buffer = CandleBuffer::new(100);
        let first: Vec<Candle> = (0..3).map(|i| create_test_candle(5 * i, 100.0 + i as f64)).collect();
        assert_eq!(buffer.merge("SOLUSDT", Timeframe::M5, &first).unwrap(), 3);

        // Second poll overlaps the first by two candles
        let second: Vec<Candle> = (1..5).map(|i| create_test_candle(5 * i, 200.0)).collect();
        assert_eq!(buffer.merge("SOLUSDT", Timeframe::M5, &second).unwrap(), 2);

        let candles = buffer.get_candles("SOLUSDT", Timeframe::M5).unwrap();
        assert_eq!(candles.len(), 5);
        // stored candles are not overwritten
        assert_eq!(candles[1].close, 101.0);
        assert_eq!(candles[4].close, 200.0);
        assert!(candles.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_max_candles_limit() {
        let buffer = CandleBuffer::new(5);
        let batch: Vec<Candle> = (0..10).map(|i| create_test_candle(5 * i, 100.0 + i as f64)).collect();
        buffer.merge("SOLUSDT", Timeframe::M5, &batch).unwrap();

        let candles = buffer.get_candles("SOLUSDT", Timeframe::M5).unwrap();
        assert_eq!(candles.len(), 5);
        assert_eq!(candles[0].close, 105.0);
        assert_eq!(
            buffer.latest_timestamp("SOLUSDT", Timeframe::M5).unwrap(),
            Some(start() + Duration::minutes(45))
        );
    }

    #[test]
    fn test_series_are_separate() {
        let buffer = CandleBuffer::new(100);
        buffer
            .merge("SOLUSDT", Timeframe::M5, &[create_test_candle(0, 100.0)])
            .unwrap();
        buffer
            .merge("SOLUSDT", Timeframe::H2, &[create_test_candle(0, 100.0)])
            .unwrap();
        buffer
            .merge("BTCUSDT", Timeframe::M5, &[create_test_candle(0, 100.0)])
            .unwrap();

        assert_eq!(buffer.candle_count("SOLUSDT", Timeframe::M5).unwrap(), 1);
        assert_eq!(buffer.candle_count("SOLUSDT", Timeframe::H2).unwrap(), 1);
        assert_eq!(buffer.candle_count("ETHUSDT", Timeframe::M5).unwrap(), 0);
    }

    #[test]
    fn test_closed_candles_drops_forming_bar() {
        let candles: Vec<Candle> = (0..3).map(|i| create_test_candle(5 * i, 100.0)).collect();
        let now = start() + Duration::minutes(12);
        let closed = closed_candles(candles, Timeframe::M5, now);
        assert_eq!(closed.len(), 2);
    }

    #[test]
    fn test_resample_to_hours() {
        let candles: Vec<Candle> = (0..24).map(|i| create_test_candle(5 * i, 100.0 + i as f64)).collect();
        let hourly = resample_candles(&candles, Timeframe::H1);

        assert_eq!(hourly.len(), 2);
        assert_eq!(hourly[0].timestamp, start());
        assert_eq!(hourly[0].open, 100.0);
        assert_eq!(hourly[0].close, 111.0);
        assert_eq!(hourly[0].high, 112.0);
        assert_eq!(hourly[0].low, 99.0);
        assert_eq!(hourly[0].volume, 12_000.0);
        assert_eq!(hourly[1].open, 112.0);
    }

    #[test]
    fn test_thread_safety() {
        use std::thread;

        let buffer = CandleBuffer::new(100);
        let buffer_clone = buffer.clone();

        let handle = thread::spawn(move || {
            for i in 0..50 {
                buffer_clone
                    .merge("SOLUSDT", Timeframe::M5, &[create_test_candle(i, 100.0)])
                    .unwrap();
            }
        });

        for i in 0..50 {
            buffer
                .merge("BTCUSDT", Timeframe::M5, &[create_test_candle(i, 100.0)])
                .unwrap();
        }

        handle.join().unwrap();

        assert_eq!(buffer.candle_count("SOLUSDT", Timeframe::M5).unwrap(), 50);
        assert_eq!(buffer.candle_count("BTCUSDT", Timeframe::M5).unwrap(), 50);
    }
}

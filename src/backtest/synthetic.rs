use crate::config::SessionWindows;
use crate::models::Candle;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// How London treats the Asia range on a synthetic day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayShape {
    /// London trades above the Asia high only
    HighSweep,
    /// London trades below the Asia low only
    LowSweep,
    /// London breaks both Asia extremes
    DoubleSweep,
    /// London stays inside the Asia range
    Inside,
}

const CANDLE_MINUTES: i64 = 5;
const CANDLES_PER_DAY: i64 = 24 * 60 / CANDLE_MINUTES;

/// Generates session-shaped 5-minute price data for backtesting
pub struct SyntheticDataGenerator {
    rng: StdRng,
    windows: SessionWindows,
    base_price: f64,
    base_volume: f64,
    /// Per-candle noise as a fraction of price
    noise: f64,
    /// Per-candle pull toward the reversal in the KillZone after a sweep
    reversal_drift: f64,
}

impl SyntheticDataGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            windows: SessionWindows::default(),
            base_price: 150.0,
            base_volume: 1_000_000.0,
            noise: 0.0015,
            reversal_drift: 0.0004,
        }
    }

    pub fn with_windows(mut self, windows: SessionWindows) -> Self {
        self.windows = windows;
        self
    }

    pub fn with_base_price(mut self, price: f64) -> Self {
        self.base_price = price;
        self
    }

    /// Generate `days` consecutive days starting at `start`
    ///
    /// Shapes are drawn at random (mostly single-sided sweeps). `drift_per_day`
    /// sets the background trend; its sign flips with 10% probability each day
    /// so that both trend regimes appear.
    pub fn generate_days(&mut self, start: NaiveDate, days: usize, drift_per_day: f64) -> Vec<Candle> {
        let mut candles = Vec::with_capacity(days * CANDLES_PER_DAY as usize);
        let mut price = self.base_price;
        let mut drift = drift_per_day;

        for offset in 0..days {
            let date = start + Duration::days(offset as i64);
            let shape = match self.rng.gen_range(0..100) {
                0..=34 => DayShape::HighSweep,
                35..=69 => DayShape::LowSweep,
                70..=79 => DayShape::DoubleSweep,
                _ => DayShape::Inside,
            };
            if self.rng.gen_bool(0.1) {
                drift = -drift;
            }

            let day = self.generate_day_from(date, shape, price, drift);
            price = day.last().map_or(price, |c| c.close);
            candles.extend(day);
        }

        candles
    }

    /// Generate one day with the given `shape`, opening at the base price
    pub fn generate_day(&mut self, date: NaiveDate, shape: DayShape, drift_per_day: f64) -> Vec<Candle> {
        self.generate_day_from(date, shape, self.base_price, drift_per_day)
    }

    fn generate_day_from(
        &mut self,
        date: NaiveDate,
        shape: DayShape,
        open_price: f64,
        drift_per_day: f64,
    ) -> Vec<Candle> {
        let midnight = Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN));
        let drift = drift_per_day / CANDLES_PER_DAY as f64;

        let mut candles: Vec<Candle> = Vec::with_capacity(CANDLES_PER_DAY as usize);
        let mut price = open_price;
        let mut asia_range: Option<(f64, f64)> = None;

        // Free walk everywhere except London, which is shaped against the Asia range
        for i in 0..CANDLES_PER_DAY {
            let ts = midnight + Duration::minutes(i * CANDLE_MINUTES);
            let hour = ts.hour();

            if self.windows.london.contains(hour) {
                let (high, low) = match asia_range {
                    Some(range) => range,
                    None => {
                        let asia: Vec<Candle> = candles
                            .iter()
                            .filter(|c| self.windows.asia.contains(c.timestamp.hour()))
                            .copied()
                            .collect();
                        let range = range_of(if asia.is_empty() { &candles } else { &asia });
                        asia_range = Some(range);
                        range
                    }
                };
                let london_len = (self.windows.london.end_hour - self.windows.london.start_hour) as i64
                    * 60
                    / CANDLE_MINUTES;
                let index = (hour - self.windows.london.start_hour) as i64 * 60 / CANDLE_MINUTES
                    + ts.minute() as i64 / CANDLE_MINUTES;
                let candle = self.london_candle(ts, &mut price, (high, low), shape, index, london_len);
                candles.push(candle);
                continue;
            }

            let step_drift = if self.windows.killzone.contains(hour) {
                drift + self.reversal_bias(shape)
            } else {
                drift
            };
            let open = price;
            price *= 1.0 + step_drift + self.rng.gen_range(-self.noise..self.noise);
            candles.push(self.create_candle(open, price, ts));
        }

        candles
    }

    /// London candle kept inside the Asia range, except for the sweep candles
    fn london_candle(
        &mut self,
        ts: DateTime<Utc>,
        price: &mut f64,
        (asia_high, asia_low): (f64, f64),
        shape: DayShape,
        index: i64,
        len: i64,
    ) -> Candle {
        let margin = (asia_high - asia_low) * 0.1;
        let upper = asia_high - margin;
        let lower = asia_low + margin;

        let open = price.clamp(lower, upper);
        let mut close = open * (1.0 + self.rng.gen_range(-self.noise..self.noise));
        // reflect back into the range
        if close > upper {
            close = (2.0 * upper - close).max(lower);
        } else if close < lower {
            close = (2.0 * lower - close).min(upper);
        }
        *price = close;

        let mut candle = self.create_candle(open, close, ts);
        candle.high = candle.high.min(asia_high);
        candle.low = candle.low.max(asia_low);

        let sweep_high = matches!(shape, DayShape::HighSweep | DayShape::DoubleSweep);
        let sweep_low = matches!(shape, DayShape::LowSweep | DayShape::DoubleSweep);
        // high sweep a third of the way in, low sweep two thirds
        if sweep_high && index == len / 3 {
            candle.high = asia_high * (1.0 + self.rng.gen_range(0.0005..0.003));
        }
        if sweep_low && index == 2 * len / 3 {
            candle.low = asia_low * (1.0 - self.rng.gen_range(0.0005..0.003));
        }
        candle
    }

    /// After a single-sided sweep, price leans back the other way in the KillZone
    fn reversal_bias(&self, shape: DayShape) -> f64 {
        match shape {
            DayShape::HighSweep => -self.reversal_drift,
            DayShape::LowSweep => self.reversal_drift,
            DayShape::DoubleSweep | DayShape::Inside => 0.0,
        }
    }

    /// Helper to create a candle from open, close and timestamp
    fn create_candle(&mut self, open: f64, close: f64, timestamp: DateTime<Utc>) -> Candle {
        let wick = self.noise / 2.0;
        let high = open.max(close) * (1.0 + self.rng.gen_range(0.0..wick));
        let low = open.min(close) * (1.0 - self.rng.gen_range(0.0..wick));

        // Vary volume ±30%
        let volume = self.base_volume * self.rng.gen_range(0.7..1.3);

        Candle {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

fn range_of(candles: &[Candle]) -> (f64, f64) {
    candles.iter().fold((f64::MIN, f64::MAX), |(hi, lo), c| {
        (hi.max(c.high), lo.min(c.low))
    })
}

use crate::config::SessionWindows;
use crate::models::{Candle, Session};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use std::ops::Range;

/// Maps timestamps to sessions using configured UTC hour windows
#[derive(Debug, Clone, Copy)]
pub struct SessionClassifier {
    windows: SessionWindows,
}

impl Default for SessionClassifier {
    fn default() -> Self {
        Self::new(SessionWindows::default())
    }
}

impl SessionClassifier {
    pub fn new(windows: SessionWindows) -> Self {
        Self { windows }
    }

    pub fn windows(&self) -> &SessionWindows {
        &self.windows
    }

    pub fn classify(&self, ts: DateTime<Utc>) -> Session {
        let hour = ts.hour();
        if self.windows.asia.contains(hour) {
            Session::Asia
        } else if self.windows.london.contains(hour) {
            Session::London
        } else if self.windows.killzone.contains(hour) {
            Session::KillZone
        } else {
            Session::Off
        }
    }

    /// Instant the KillZone opens on `date`
    pub fn killzone_open(&self, date: NaiveDate) -> DateTime<Utc> {
        hour_on(date, self.windows.killzone.start_hour)
    }

    /// Instant the KillZone closes on `date`
    pub fn killzone_close(&self, date: NaiveDate) -> DateTime<Utc> {
        hour_on(date, self.windows.killzone.end_hour)
    }

    /// Slice one UTC day out of `candles` and split it by session
    pub fn slice_day(&self, candles: &[Candle], date: NaiveDate) -> DaySessions {
        let day: Vec<Candle> = candles
            .iter()
            .filter(|c| c.timestamp.date_naive() == date)
            .copied()
            .collect();

        let mut asia = Vec::new();
        let mut london = Vec::new();
        let mut killzone = 0..0;
        let mut seen_killzone = false;

        for (i, candle) in day.iter().enumerate() {
            match self.classify(candle.timestamp) {
                Session::Asia => asia.push(*candle),
                Session::London => london.push(*candle),
                Session::KillZone => {
                    if !seen_killzone {
                        killzone = i..i;
                        seen_killzone = true;
                    }
                    killzone.end = i + 1;
                }
                Session::Off => {}
            }
        }

        DaySessions {
            date,
            day,
            asia,
            london,
            killzone,
        }
    }
}

fn hour_on(date: NaiveDate, hour: u32) -> DateTime<Utc> {
    let midnight = Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN));
    midnight + Duration::hours(hour as i64)
}

/// One UTC day of candles split into the sessions the strategy reads
#[derive(Debug, Clone)]
pub struct DaySessions {
    pub date: NaiveDate,
    /// Every candle of the day, in order
    pub day: Vec<Candle>,
    pub asia: Vec<Candle>,
    pub london: Vec<Candle>,
    /// Index range of the KillZone candles within `day`
    pub killzone: Range<usize>,
}

impl DaySessions {
    pub fn killzone_candles(&self) -> &[Candle] {
        &self.day[self.killzone.clone()]
    }

    pub fn first_killzone_candle(&self) -> Option<&Candle> {
        self.killzone_candles().first()
    }

    /// Highest high and lowest low across Asia and London
    pub fn pre_session_extremes(&self) -> Option<(f64, f64)> {
        let mut iter = self.asia.iter().chain(self.london.iter());
        let first = iter.next()?;
        Some(iter.fold((first.high, first.low), |(hi, lo), c| {
            (hi.max(c.high), lo.min(c.low))
        }))
    }
}

use super::session::DaySessions;
use super::structure::{pivot_series, StructureDetector};
use crate::config::{EntryFallback, TriggerConfig, TriggerPolicy};
use crate::indicators::calculate_ewm_series;
use crate::models::Direction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryReason {
    StructureShift,
    EmaCrossover,
    Pullback,
    /// Trigger never fired; entered at the session's first close
    Fallback,
}

impl EntryReason {
    pub fn label(&self) -> &'static str {
        match self {
            EntryReason::StructureShift => "structure shift",
            EntryReason::EmaCrossover => "EMA crossover",
            EntryReason::Pullback => "EMA pullback",
            EntryReason::Fallback => "first-close fallback",
        }
    }
}

/// Entry fired inside the KillZone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntrySignal {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    /// Index of the firing candle within the day's candles
    pub candle_index: usize,
    pub reason: EntryReason,
}

impl EntrySignal {
    fn at(sessions: &DaySessions, idx: usize, reason: EntryReason) -> Self {
        let candle = &sessions.day[idx];
        Self {
            price: candle.close,
            timestamp: candle.timestamp,
            candle_index: idx,
            reason,
        }
    }
}

/// Which KillZone candles a trigger may fire on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignalScan {
    /// Earliest firing candle of the session, for replaying history
    #[default]
    Earliest,
    /// Only the newest candle; older firings are stale for a live entry
    Latest,
}

impl SignalScan {
    /// Day indices to test, oldest first
    pub fn candidates(&self, killzone: &Range<usize>) -> Range<usize> {
        match self {
            SignalScan::Earliest => killzone.clone(),
            SignalScan::Latest if killzone.is_empty() => killzone.clone(),
            SignalScan::Latest => killzone.end - 1..killzone.end,
        }
    }
}

/// Detector that fires the actual entry within the KillZone
pub trait EntryTrigger: Send + Sync {
    /// First candle among `scan`'s candidates that fires for `direction`
    fn detect(&self, direction: Direction, sessions: &DaySessions, scan: SignalScan) -> Option<EntrySignal>;

    fn name(&self) -> &str;
}

/// Fires on the first KillZone candle that completes a structure shift in the
/// bias direction. Pivots are computed over the whole day.
#[derive(Debug, Clone, Default)]
pub struct StructureShiftTrigger {
    detector: StructureDetector,
}

impl StructureShiftTrigger {
    pub fn new(detector: StructureDetector) -> Self {
        Self { detector }
    }
}

impl EntryTrigger for StructureShiftTrigger {
    fn detect(&self, direction: Direction, sessions: &DaySessions, scan: SignalScan) -> Option<EntrySignal> {
        let pivots = pivot_series(&sessions.day, self.detector.pivot_window);

        scan.candidates(&sessions.killzone).find_map(|idx| {
            let shift = self.detector.detect_at(&sessions.day, &pivots, idx)?;
            if shift.direction() != direction {
                return None;
            }
            Some(EntrySignal::at(sessions, idx, EntryReason::StructureShift))
        })
    }

    fn name(&self) -> &str {
        "StructureShift"
    }
}

/// Fires on the first KillZone close at or through an EMA computed over the
/// KillZone candles only (>= for longs, <= for shorts)
#[derive(Debug, Clone)]
pub struct EmaCrossoverTrigger {
    period: usize,
}

impl Default for EmaCrossoverTrigger {
    fn default() -> Self {
        Self { period: 200 }
    }
}

impl EmaCrossoverTrigger {
    pub fn new(period: usize) -> Self {
        Self { period }
    }
}

impl EntryTrigger for EmaCrossoverTrigger {
    fn detect(&self, direction: Direction, sessions: &DaySessions, scan: SignalScan) -> Option<EntrySignal> {
        let closes: Vec<f64> = sessions.killzone_candles().iter().map(|c| c.close).collect();
        let ema = calculate_ewm_series(&closes, self.period);
        let start = sessions.killzone.start;

        scan.candidates(&sessions.killzone)
            .find(|&idx| {
                let (close, ema) = (closes[idx - start], ema[idx - start]);
                match direction {
                    Direction::Long => close >= ema,
                    Direction::Short => close <= ema,
                }
            })
            .map(|idx| EntrySignal::at(sessions, idx, EntryReason::EmaCrossover))
    }

    fn name(&self) -> &str {
        "EmaCrossover"
    }
}

/// Fires on a KillZone close on the far side of an EMA over the whole day:
/// below it for longs, above it for shorts. Buys the dip inside an uptrend
/// and sells the rally inside a downtrend.
#[derive(Debug, Clone)]
pub struct PullbackTrigger {
    period: usize,
}

impl PullbackTrigger {
    pub fn new(period: usize) -> Self {
        Self { period }
    }
}

impl EntryTrigger for PullbackTrigger {
    fn detect(&self, direction: Direction, sessions: &DaySessions, scan: SignalScan) -> Option<EntrySignal> {
        let closes: Vec<f64> = sessions.day.iter().map(|c| c.close).collect();
        let ema = calculate_ewm_series(&closes, self.period);

        scan.candidates(&sessions.killzone)
            .find(|&idx| match direction {
                Direction::Long => closes[idx] < ema[idx],
                Direction::Short => closes[idx] > ema[idx],
            })
            .map(|idx| EntrySignal::at(sessions, idx, EntryReason::Pullback))
    }

    fn name(&self) -> &str {
        "Pullback"
    }
}

/// A trigger policy plus its explicit fallback branch
pub struct SessionTrigger {
    trigger: Box<dyn EntryTrigger>,
    fallback: EntryFallback,
    scan: SignalScan,
}

impl SessionTrigger {
    pub fn new(trigger: Box<dyn EntryTrigger>, fallback: EntryFallback) -> Self {
        Self {
            trigger,
            fallback,
            scan: SignalScan::Earliest,
        }
    }

    pub fn with_scan(mut self, scan: SignalScan) -> Self {
        self.scan = scan;
        self
    }

    pub fn from_config(config: &TriggerConfig) -> Self {
        let trigger: Box<dyn EntryTrigger> = match config.policy {
            TriggerPolicy::StructureShift => Box::new(StructureShiftTrigger::new(StructureDetector {
                pivot_window: config.pivot_window,
                lookback: config.structure_lookback,
                separation: config.separation,
            })),
            TriggerPolicy::EmaCrossover => Box::new(EmaCrossoverTrigger::new(config.ema_period)),
            TriggerPolicy::Pullback => Box::new(PullbackTrigger::new(config.ema_period)),
        };
        Self::new(trigger, config.effective_fallback())
    }

    pub fn name(&self) -> &str {
        self.trigger.name()
    }

    /// Scan the KillZone seen so far.
    ///
    /// When nothing fired and the session is complete, the fallback branch
    /// may enter at the first KillZone close whatever the scan mode.
    pub fn fire(
        &self,
        direction: Direction,
        sessions: &DaySessions,
        session_complete: bool,
    ) -> Option<EntrySignal> {
        if sessions.killzone.is_empty() {
            return None;
        }
        if let Some(signal) = self.trigger.detect(direction, sessions, self.scan) {
            return Some(signal);
        }

        match self.fallback {
            EntryFallback::FirstClose if session_complete => Some(EntrySignal::at(
                sessions,
                sessions.killzone.start,
                EntryReason::Fallback,
            )),
            _ => None,
        }
    }
}

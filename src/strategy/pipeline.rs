use super::builder::TradeBuilder;
use super::session::{DaySessions, SessionClassifier};
use super::sweep::detect_sweep;
use super::trend::TrendFilter;
use super::trigger::{EntryReason, EntrySignal, SessionTrigger, SignalScan};
use crate::config::BotConfig;
use crate::error::CycleError;
use crate::models::{Candle, SweepBias, TradeProposal, TrendRegime};
use chrono::NaiveDate;

/// How far one day's setup got through sweep, trend, trigger and sizing
#[derive(Debug)]
pub struct DayEvaluation {
    pub sessions: DaySessions,
    pub bias: SweepBias,
    /// Regime just before the KillZone opened; `Neutral` when not read
    pub regime: TrendRegime,
    pub signal: Option<EntrySignal>,
    pub proposal: Result<TradeProposal, CycleError>,
}

impl DayEvaluation {
    pub fn swept(&self) -> bool {
        self.bias.direction().is_some()
    }

    pub fn trend_aligned(&self) -> bool {
        self.bias
            .direction()
            .map_or(false, |d| self.regime.agrees_with(d))
    }

    pub fn used_fallback(&self) -> bool {
        matches!(self.signal, Some(s) if s.reason == EntryReason::Fallback)
    }

    /// Journal reason, e.g. "low sweep + structure shift"
    pub fn reason(&self) -> String {
        match &self.signal {
            Some(signal) => format!("{} + {}", self.bias.label(), signal.reason.label()),
            None => self.bias.label().to_string(),
        }
    }
}

/// Composes the strategy stages for one symbol and one UTC day
pub struct SetupPipeline {
    classifier: SessionClassifier,
    trend: TrendFilter,
    trigger: SessionTrigger,
    builder: TradeBuilder,
}

impl SetupPipeline {
    pub fn new(
        classifier: SessionClassifier,
        trend: TrendFilter,
        trigger: SessionTrigger,
        builder: TradeBuilder,
    ) -> Self {
        Self {
            classifier,
            trend,
            trigger,
            builder,
        }
    }

    pub fn from_config(config: &BotConfig) -> Self {
        Self::new(
            SessionClassifier::new(config.sessions),
            TrendFilter::from_config(&config.trend),
            SessionTrigger::from_config(&config.trigger),
            TradeBuilder::new(config.risk.clone(), config.targets),
        )
    }

    /// Live feeds only act on a trigger firing on the newest candle
    pub fn with_scan(mut self, scan: SignalScan) -> Self {
        self.trigger = self.trigger.with_scan(scan);
        self
    }

    pub fn classifier(&self) -> &SessionClassifier {
        &self.classifier
    }

    pub fn trigger_name(&self) -> &str {
        self.trigger.name()
    }

    /// Evaluate `date` using trade-timeframe `candles` and higher-timeframe
    /// `trend_candles`. Only trend candles opened before the KillZone count.
    pub fn evaluate(
        &self,
        candles: &[Candle],
        trend_candles: &[Candle],
        date: NaiveDate,
        balance: f64,
        session_complete: bool,
    ) -> DayEvaluation {
        let sessions = self.classifier.slice_day(candles, date);
        let bias = detect_sweep(&sessions.asia, &sessions.london);
        let mut eval = DayEvaluation {
            sessions,
            bias,
            regime: TrendRegime::Neutral,
            signal: None,
            proposal: Err(CycleError::IneligibleSetup(bias.label().to_string())),
        };

        let Some(direction) = bias.direction() else {
            return eval;
        };

        let killzone_open = self.classifier.killzone_open(date);
        eval.regime = self.trend.regime_before(trend_candles, killzone_open);
        if !eval.regime.agrees_with(direction) {
            eval.proposal = Err(CycleError::IneligibleSetup(format!(
                "{} against {:?} trend",
                bias.label(),
                eval.regime
            )));
            return eval;
        }

        eval.signal = self.trigger.fire(direction, &eval.sessions, session_complete);
        let Some(signal) = eval.signal else {
            eval.proposal = Err(CycleError::IneligibleSetup(format!(
                "{} trigger has not fired",
                self.trigger.name()
            )));
            return eval;
        };

        let visible = trend_candles.partition_point(|c| c.timestamp < killzone_open);
        eval.proposal = self.builder.build(
            bias,
            &eval.sessions,
            &trend_candles[..visible],
            signal.price,
            balance,
        );
        eval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TargetPolicy, TrendConfig, TrendMode, TriggerPolicy};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(&date().and_hms_opt(hour, 0, 0).unwrap())
    }

    /// Asia 100-110, London 102-115, KillZone opening at 112
    fn short_sweep_day() -> Vec<Candle> {
        vec![
            Candle::new(at(1), 105.0, 110.0, 100.0, 106.0),
            Candle::new(at(6), 108.0, 115.0, 102.0, 113.0),
            Candle::new(at(14), 111.8, 112.0, 111.5, 112.0),
            Candle::new(at(15), 112.0, 112.5, 110.0, 111.0),
        ]
    }

    /// Two-hour candles ending at the KillZone open; `step` sets the slope
    fn trend_candles(step: f64) -> Vec<Candle> {
        let first = at(14) - Duration::hours(2 * 30);
        (0..30)
            .map(|i| {
                let close = 200.0 + step * i as f64;
                let open = close - step.signum() * 0.5;
                Candle::new(first + Duration::hours(2 * i), open, close + 1.0, close - 1.0, close)
            })
            .collect()
    }

    fn config() -> BotConfig {
        let mut config = BotConfig::default();
        config.trend = TrendConfig {
            ema_period: 5,
            backcandles: 3,
            ..TrendConfig::default()
        };
        config.trigger.policy = TriggerPolicy::EmaCrossover;
        config
    }

    #[test]
    fn test_short_setup_end_to_end() {
        let pipeline = SetupPipeline::from_config(&config());
        let eval = pipeline.evaluate(&short_sweep_day(), &trend_candles(-5.0), date(), 1000.0, false);

        assert_eq!(eval.bias, SweepBias::Short);
        assert_eq!(eval.regime, TrendRegime::Down);
        assert!(eval.trend_aligned());
        assert_eq!(eval.reason(), "high sweep + EMA crossover");

        let proposal = eval.proposal.unwrap();
        assert!((proposal.stop_loss - 112.112).abs() < 1e-9);
        assert!((proposal.take_profit - 111.664).abs() < 1e-9);
    }

    #[test]
    fn test_trend_disagreement_aborts() {
        let pipeline = SetupPipeline::from_config(&config());
        let eval = pipeline.evaluate(&short_sweep_day(), &trend_candles(5.0), date(), 1000.0, true);

        assert!(eval.swept());
        assert_eq!(eval.regime, TrendRegime::Up);
        assert!(!eval.trend_aligned());
        assert!(eval.signal.is_none());
        assert!(matches!(eval.proposal, Err(CycleError::IneligibleSetup(_))));
    }

    #[test]
    fn test_no_sweep_skips_trend() {
        let mut candles = short_sweep_day();
        candles[1] = Candle::new(at(6), 104.0, 109.0, 101.0, 105.0);
        let pipeline = SetupPipeline::from_config(&config());
        let eval = pipeline.evaluate(&candles, &trend_candles(-5.0), date(), 1000.0, true);

        assert_eq!(eval.bias, SweepBias::None);
        assert!(!eval.swept());
        assert_eq!(eval.reason(), "no sweep");
        assert!(eval.proposal.is_err());
    }

    #[test]
    fn test_trend_following_variant() {
        let mut config = config();
        config.trend.mode = TrendMode::Slope;
        config.trigger.policy = TriggerPolicy::Pullback;
        config.trigger.ema_period = 3;
        config.targets = TargetPolicy::LookbackExtreme { bars: 10 };
        let pipeline = SetupPipeline::from_config(&config);

        // the KillZone close rallies above the day's EMA inside a downtrend
        let mut candles = short_sweep_day();
        candles[2] = Candle::new(at(14), 111.8, 112.5, 111.5, 112.4);
        candles.truncate(3);
        let eval = pipeline.evaluate(&candles, &trend_candles(-3.0), date(), 1000.0, false);

        assert_eq!(eval.regime, TrendRegime::Down);
        assert_eq!(eval.reason(), "high sweep + EMA pullback");
        let proposal = eval.proposal.unwrap();
        // lowest low and highest high of the last ten two-hour bars (closes 140 down to 113)
        assert_eq!(proposal.take_profit, 112.0);
        assert_eq!(proposal.stop_loss, 141.0);
        assert_eq!(proposal.entry_price, 112.4);
    }

    #[test]
    fn test_structure_trigger_waits_without_fallback() {
        let mut config = config();
        config.trigger.policy = TriggerPolicy::StructureShift;
        let pipeline = SetupPipeline::from_config(&config);
        let eval = pipeline.evaluate(&short_sweep_day(), &trend_candles(-5.0), date(), 1000.0, true);

        assert!(eval.trend_aligned());
        assert!(eval.signal.is_none());
        assert!(!eval.used_fallback());
    }
}

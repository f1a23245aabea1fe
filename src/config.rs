use crate::models::Timeframe;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Risk parameters applied to every trade
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Fraction of available balance put at risk per trade
    pub risk_fraction: f64,
    pub leverage: u32,
    /// Reward:risk ratio
    pub reward_risk: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_fraction: 0.02, // 2% risk per trade
            leverage: 25,
            reward_risk: 3.0,
        }
    }
}

/// Half-open UTC hour range `[start_hour, end_hour)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl HourWindow {
    pub const fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour,
            end_hour,
        }
    }

    pub fn contains(&self, hour: u32) -> bool {
        hour >= self.start_hour && hour < self.end_hour
    }

    fn overlaps(&self, other: &HourWindow) -> bool {
        self.start_hour < other.end_hour && other.start_hour < self.end_hour
    }
}

/// Session boundaries (UTC hours)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionWindows {
    pub asia: HourWindow,
    pub london: HourWindow,
    pub killzone: HourWindow,
}

impl Default for SessionWindows {
    fn default() -> Self {
        Self {
            asia: HourWindow::new(0, 5),
            london: HourWindow::new(5, 11),
            killzone: HourWindow::new(14, 17),
        }
    }
}

/// How the higher-timeframe regime is read off the EMA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendMode {
    /// Every body in the trailing window sits on one side of the EMA
    #[default]
    Body,
    /// Last close on one side of the EMA and the EMA sloping the same way
    Slope,
}

/// Higher-timeframe trend filter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    pub ema_period: usize,
    /// Bars in the trailing window besides the current one; unused by `slope`
    pub backcandles: usize,
    pub mode: TrendMode,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            ema_period: 150,
            backcandles: 15,
            mode: TrendMode::Body,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPolicy {
    StructureShift,
    EmaCrossover,
    /// Close back on the far side of the day's EMA, against the bias
    Pullback,
}

/// What to do when the trigger never fires before the session closes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryFallback {
    /// Enter at the close of the session's first candle
    FirstClose,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub policy: TriggerPolicy,
    pub pivot_window: usize,
    /// Candles searched for pivots behind the evaluated candle
    pub structure_lookback: usize,
    /// Minimum low/high separation as a fraction of price; the secondary
    /// threshold is a third of it
    pub separation: f64,
    pub ema_period: usize,
    /// Defaults to `first_close` for EMA crossover and `none` for structure shift
    pub fallback: Option<EntryFallback>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            policy: TriggerPolicy::StructureShift,
            pivot_window: 5,
            structure_lookback: 30,
            separation: 0.005,
            ema_period: 200,
            fallback: None,
        }
    }
}

impl TriggerConfig {
    pub fn effective_fallback(&self) -> EntryFallback {
        self.fallback.unwrap_or(match self.policy {
            TriggerPolicy::EmaCrossover => EntryFallback::FirstClose,
            TriggerPolicy::StructureShift | TriggerPolicy::Pullback => EntryFallback::None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TargetPolicy {
    /// Stop just beyond the first KillZone candle, target at `reward_risk` times the stop
    FixedRr {
        #[serde(default = "default_stop_buffer")]
        stop_buffer: f64,
    },
    /// Target at the opposite Asia/London extreme, stop derived from `reward_risk`
    SessionExtreme,
    /// Target and stop at the extremes of the last `bars` trend candles
    LookbackExtreme {
        #[serde(default = "default_lookback_bars")]
        bars: usize,
    },
}

fn default_lookback_bars() -> usize {
    10
}

fn default_stop_buffer() -> f64 {
    0.001 // 0.1% beyond the candle extreme
}

impl Default for TargetPolicy {
    fn default() -> Self {
        TargetPolicy::FixedRr {
            stop_buffer: default_stop_buffer(),
        }
    }
}

/// Period in which at most one entry is taken per symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeScope {
    Session,
    Day,
}

/// Immutable bot configuration, built once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    pub trend_timeframe: Timeframe,
    pub candle_limit: usize,
    pub trend_candle_limit: usize,
    pub poll_interval_secs: u64,
    pub position_poll_secs: u64,
    pub rate_limit_per_second: u32,
    pub testnet: bool,
    pub risk: RiskConfig,
    pub sessions: SessionWindows,
    pub trend: TrendConfig,
    pub trigger: TriggerConfig,
    pub targets: TargetPolicy,
    pub trade_scope: TradeScope,
    pub database_url: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["SOLUSDT".to_string()],
            timeframe: Timeframe::M5,
            trend_timeframe: Timeframe::H2,
            candle_limit: 500,
            trend_candle_limit: 300,
            poll_interval_secs: 30,
            position_poll_secs: 10,
            rate_limit_per_second: 10,
            testnet: false,
            risk: RiskConfig::default(),
            sessions: SessionWindows::default(),
            trend: TrendConfig::default(),
            trigger: TriggerConfig::default(),
            targets: TargetPolicy::default(),
            trade_scope: TradeScope::Session,
            database_url: None,
        }
    }
}

impl BotConfig {
    /// Load from an optional TOML file, then `SWEEPBOT__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        builder = match path {
            Some(p) => builder.add_source(config::File::from(p)),
            None => builder.add_source(config::File::with_name("config/default").required(false)),
        };

        let settings = builder
            .add_source(
                config::Environment::with_prefix("SWEEPBOT")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("symbols")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read configuration")?;

        let cfg: BotConfig = settings
            .try_deserialize()
            .context("failed to parse configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            bail!("no symbols configured");
        }
        if !(self.risk.risk_fraction > 0.0 && self.risk.risk_fraction <= 1.0) {
            bail!("risk_fraction must be in (0, 1], got {}", self.risk.risk_fraction);
        }
        if self.risk.leverage == 0 {
            bail!("leverage must be at least 1");
        }
        if self.risk.reward_risk <= 0.0 {
            bail!("reward_risk must be positive");
        }
        if self.trend.ema_period == 0 || self.trigger.ema_period == 0 {
            bail!("EMA periods must be positive");
        }
        if let TargetPolicy::LookbackExtreme { bars: 0 } = self.targets {
            bail!("lookback_extreme needs at least one bar");
        }
        if self.rate_limit_per_second == 0 {
            bail!("rate_limit_per_second must be positive");
        }

        let windows = [
            ("asia", self.sessions.asia),
            ("london", self.sessions.london),
            ("killzone", self.sessions.killzone),
        ];
        for (name, w) in &windows {
            if w.start_hour >= w.end_hour || w.end_hour > 24 {
                bail!("invalid {} window {}..{}", name, w.start_hour, w.end_hour);
            }
        }
        for (i, (a_name, a)) in windows.iter().enumerate() {
            for (b_name, b) in &windows[i + 1..] {
                if a.overlaps(b) {
                    bail!("{} and {} windows overlap", a_name, b_name);
                }
            }
        }

        Ok(())
    }
}

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// OHLCV candlestick. Immutable once stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume: 0.0,
        }
    }

    /// Lower edge of the candle body
    pub fn body_low(&self) -> f64 {
        self.open.min(self.close)
    }

    /// Upper edge of the candle body
    pub fn body_high(&self) -> f64 {
        self.open.max(self.close)
    }
}

/// Candle interval supported by the exchange feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::M1 => Duration::minutes(1),
            Timeframe::M5 => Duration::minutes(5),
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H2 => Duration::hours(2),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::D1 => Duration::days(1),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "2h" => Ok(Timeframe::H2),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(format!("unsupported timeframe: {}", other)),
        }
    }
}

/// Trading session derived from the UTC hour of a timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Session {
    Asia,
    London,
    KillZone,
    Off,
}

/// Bias produced by comparing the London range against the Asia range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepBias {
    /// London swept the Asia low only
    Long,
    /// London swept the Asia high only
    Short,
    /// Both extremes swept; ambiguous, never traded
    Both,
    None,
}

impl SweepBias {
    /// Trade direction implied by the bias, if any
    pub fn direction(&self) -> Option<Direction> {
        match self {
            SweepBias::Long => Some(Direction::Long),
            SweepBias::Short => Some(Direction::Short),
            SweepBias::Both | SweepBias::None => None,
        }
    }

    /// Short label used in journal reasons and logs
    pub fn label(&self) -> &'static str {
        match self {
            SweepBias::Long => "low sweep",
            SweepBias::Short => "high sweep",
            SweepBias::Both => "double sweep",
            SweepBias::None => "no sweep",
        }
    }
}

/// Higher-timeframe regime. A window that is simultaneously above and below
/// its EMA cannot occur; any such reading is reported as `Neutral`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendRegime {
    Up,
    Down,
    Neutral,
}

impl TrendRegime {
    pub fn agrees_with(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (TrendRegime::Up, Direction::Long) | (TrendRegime::Down, Direction::Short)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Side of the order that opens a position in this direction
    pub fn entry_side(&self) -> OrderSide {
        match self {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        }
    }

    /// Side of the reduce-only orders that close it
    pub fn exit_side(&self) -> OrderSide {
        match self {
            Direction::Long => OrderSide::Sell,
            Direction::Short => OrderSide::Buy,
        }
    }

    /// Signed P&L of moving from `entry` to `exit` with `quantity`
    pub fn pnl(&self, entry: f64, exit: f64, quantity: f64) -> f64 {
        match self {
            Direction::Long => (exit - entry) * quantity,
            Direction::Short => (entry - exit) * quantity,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => f.write_str("long"),
            Direction::Short => f.write_str("short"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Per-candle pivot classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotKind {
    None,
    High,
    Low,
    Both,
}

/// Immutable trade plan produced once per eligible session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeProposal {
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub quantity: f64,
}

impl TradeProposal {
    pub fn stop_distance(&self) -> f64 {
        (self.entry_price - self.stop_loss).abs()
    }

    pub fn target_distance(&self) -> f64 {
        (self.take_profit - self.entry_price).abs()
    }
}

/// Exchange-reported trading filters for a symbol
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketFilters {
    pub price_precision: u32,
    pub quantity_precision: u32,
    pub min_quantity: f64,
    pub min_notional: f64,
}

impl Default for MarketFilters {
    fn default() -> Self {
        Self {
            price_precision: 2,
            quantity_precision: 3,
            min_quantity: 0.0,
            min_notional: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    Closed,
    Canceled,
}

impl OrderStatus {
    /// Filled or canceled: the order no longer protects anything
    pub fn is_done(&self) -> bool {
        matches!(self, OrderStatus::Closed | OrderStatus::Canceled)
    }
}

/// Result of a filled market order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketFill {
    pub order_id: String,
    pub filled_price: f64,
}

use super::session::DaySessions;
use crate::config::{RiskConfig, TargetPolicy};
use crate::error::CycleError;
use crate::models::{Candle, Direction, SweepBias, TradeProposal};

/// Raw position size before exchange rounding.
///
/// The smaller of the risk-based and margin-capped quantities.
pub fn size_position(
    balance: f64,
    risk_fraction: f64,
    leverage: u32,
    entry_price: f64,
    stop_distance: f64,
) -> f64 {
    let budget = balance * risk_fraction;
    let by_risk = budget / stop_distance;
    let by_margin = budget * leverage as f64 / entry_price;
    by_risk.min(by_margin)
}

/// Turns an entry price into a sized trade plan
#[derive(Debug, Clone)]
pub struct TradeBuilder {
    risk: RiskConfig,
    targets: TargetPolicy,
}

impl TradeBuilder {
    pub fn new(risk: RiskConfig, targets: TargetPolicy) -> Self {
        Self { risk, targets }
    }

    pub fn risk(&self) -> &RiskConfig {
        &self.risk
    }

    /// `trend_candles` are the higher-timeframe candles visible at entry,
    /// oldest first; only [`TargetPolicy::LookbackExtreme`] reads them.
    pub fn build(
        &self,
        bias: SweepBias,
        sessions: &DaySessions,
        trend_candles: &[Candle],
        entry_price: f64,
        balance: f64,
    ) -> Result<TradeProposal, CycleError> {
        let direction = bias
            .direction()
            .ok_or_else(|| CycleError::IneligibleSetup(format!("bias {}", bias.label())))?;
        let first = sessions
            .first_killzone_candle()
            .ok_or_else(|| CycleError::IneligibleSetup("empty KillZone".to_string()))?;
        if entry_price <= 0.0 || balance <= 0.0 {
            return Err(CycleError::SizingRejected(format!(
                "entry {} balance {}",
                entry_price, balance
            )));
        }

        let rr = self.risk.reward_risk;
        let (stop_loss, take_profit, stop_distance) = match self.targets {
            TargetPolicy::FixedRr { stop_buffer } => {
                let stop = match direction {
                    Direction::Long => first.low * (1.0 - stop_buffer),
                    Direction::Short => first.high * (1.0 + stop_buffer),
                };
                let distance = match direction {
                    Direction::Long => entry_price - stop,
                    Direction::Short => stop - entry_price,
                };
                let target = match direction {
                    Direction::Long => entry_price + distance * rr,
                    Direction::Short => entry_price - distance * rr,
                };
                (stop, target, distance)
            }
            TargetPolicy::SessionExtreme => {
                let (high, low) = sessions.pre_session_extremes().ok_or_else(|| {
                    CycleError::IneligibleSetup("no Asia/London candles".to_string())
                })?;
                let (target, distance) = match direction {
                    Direction::Long => (high, (high - entry_price) / rr),
                    Direction::Short => (low, (entry_price - low) / rr),
                };
                let stop = match direction {
                    Direction::Long => entry_price - distance,
                    Direction::Short => entry_price + distance,
                };
                (stop, target, distance)
            }
            TargetPolicy::LookbackExtreme { bars } => {
                if bars == 0 || trend_candles.len() < bars {
                    return Err(CycleError::IneligibleSetup(format!(
                        "{} of {} trend candles for the lookback",
                        trend_candles.len(),
                        bars
                    )));
                }
                let window = &trend_candles[trend_candles.len() - bars..];
                let high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
                let low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
                match direction {
                    Direction::Long => (low, high, entry_price - low),
                    Direction::Short => (high, low, high - entry_price),
                }
            }
        };

        let reward = match direction {
            Direction::Long => take_profit - entry_price,
            Direction::Short => entry_price - take_profit,
        };
        if !(reward > 0.0) {
            return Err(CycleError::SizingRejected(format!(
                "target {:.6} not beyond {} entry at {}",
                take_profit, direction, entry_price
            )));
        }
        if !(stop_distance > 0.0) {
            return Err(CycleError::SizingRejected(format!(
                "stop distance {:.6} on {} entry at {}",
                stop_distance, direction, entry_price
            )));
        }

        let quantity = size_position(
            balance,
            self.risk.risk_fraction,
            self.risk.leverage,
            entry_price,
            stop_distance,
        );

        Ok(TradeProposal {
            direction,
            entry_price,
            stop_loss,
            take_profit,
            quantity,
        })
    }
}

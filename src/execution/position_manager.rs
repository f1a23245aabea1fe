use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TradeScope;
use crate::models::{Direction, Session, TradeProposal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    /// Protective order canceled on the exchange side
    Canceled,
    /// Backtest only: neither level hit before the KillZone ended
    SessionEnd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub trade_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub quantity: f64,
    pub entry_time: DateTime<Utc>,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Exchange ids of the reduce-only protective orders, once attached
    pub take_profit_order: Option<String>,
    pub stop_loss_order: Option<String>,
    pub status: PositionStatus,
    pub realized_pnl: Option<f64>,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
}

impl Position {
    pub fn is_protected(&self) -> bool {
        self.take_profit_order.is_some() && self.stop_loss_order.is_some()
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.direction.pnl(self.entry_price, price, self.quantity)
    }
}

/// Period in which at most one entry is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeriodKey {
    Session(NaiveDate, Session),
    Day(NaiveDate),
}

impl PeriodKey {
    pub fn at(scope: TradeScope, ts: DateTime<Utc>, session: Session) -> Self {
        match scope {
            TradeScope::Session => PeriodKey::Session(ts.date_naive(), session),
            TradeScope::Day => PeriodKey::Day(ts.date_naive()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum LifecycleState {
    Idle,
    Proposed(TradeProposal),
    Entered(Position),
    Closed(Position),
}

impl LifecycleState {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "Idle",
            LifecycleState::Proposed(_) => "Proposed",
            LifecycleState::Entered(_) => "Entered",
            LifecycleState::Closed(_) => "Closed",
        }
    }
}

/// Per-symbol position state machine
///
/// `Idle -> Proposed -> Entered -> Closed -> Idle`, with at most one entry per
/// period. A period rollover clears the entry flag and returns `Closed` (or a
/// stale `Proposed`) to `Idle`; an `Entered` position survives rollovers.
pub struct PositionLifecycle {
    symbol: String,
    scope: TradeScope,
    state: LifecycleState,
    period: Option<PeriodKey>,
    period_spent: bool,
    closed: Vec<Position>,
}

impl PositionLifecycle {
    pub fn new(symbol: impl Into<String>, scope: TradeScope) -> Self {
        Self {
            symbol: symbol.into(),
            scope,
            state: LifecycleState::Idle,
            period: None,
            period_spent: false,
            closed: Vec::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    /// Whether this period's single entry has been used (or abandoned)
    pub fn period_spent(&self) -> bool {
        self.period_spent
    }

    pub fn open_position(&self) -> Option<&Position> {
        match &self.state {
            LifecycleState::Entered(position) => Some(position),
            _ => None,
        }
    }

    /// All positions closed so far, oldest first
    pub fn closed_positions(&self) -> &[Position] {
        &self.closed
    }

    /// Advance the clock; handles period rollover
    pub fn on_clock(&mut self, now: DateTime<Utc>, session: Session) {
        let key = PeriodKey::at(self.scope, now, session);
        if self.period == Some(key) {
            return;
        }

        if self.period.is_some() {
            tracing::debug!("{} period rollover to {:?}", self.symbol, key);
        }
        self.period = Some(key);
        self.period_spent = false;

        match &self.state {
            LifecycleState::Closed(_) => self.state = LifecycleState::Idle,
            LifecycleState::Proposed(_) => {
                tracing::warn!("{} dropping stale proposal at period rollover", self.symbol);
                self.state = LifecycleState::Idle;
            }
            LifecycleState::Idle | LifecycleState::Entered(_) => {}
        }
    }

    /// Whether a new proposal would be accepted in `session`
    pub fn can_propose(&self, session: Session) -> bool {
        session == Session::KillZone
            && !self.period_spent
            && matches!(self.state, LifecycleState::Idle)
    }

    /// `Idle -> Proposed`
    pub fn propose(&mut self, proposal: TradeProposal, session: Session) -> anyhow::Result<()> {
        if session != Session::KillZone {
            anyhow::bail!("{} entries only allowed in the KillZone, now {:?}", self.symbol, session);
        }
        if self.period_spent {
            anyhow::bail!("{} already entered this period", self.symbol);
        }
        if !matches!(self.state, LifecycleState::Idle) {
            anyhow::bail!("{} cannot propose from {}", self.symbol, self.state.name());
        }

        self.state = LifecycleState::Proposed(proposal);
        Ok(())
    }

    /// `Proposed -> Entered` once the market order filled
    ///
    /// # Arguments
    /// * `timestamp` - Optional timestamp for backtesting. If None, uses Utc::now() for live trading
    pub fn confirm_entry(
        &mut self,
        trade_id: String,
        fill_price: f64,
        quantity: f64,
        timestamp: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Position> {
        let LifecycleState::Proposed(proposal) = &self.state else {
            anyhow::bail!("{} cannot enter from {}", self.symbol, self.state.name());
        };

        let position = Position {
            trade_id,
            symbol: self.symbol.clone(),
            direction: proposal.direction,
            entry_price: fill_price,
            quantity,
            entry_time: timestamp.unwrap_or_else(Utc::now),
            stop_loss: proposal.stop_loss,
            take_profit: proposal.take_profit,
            take_profit_order: None,
            stop_loss_order: None,
            status: PositionStatus::Open,
            realized_pnl: None,
            exit_price: None,
            exit_time: None,
            exit_reason: None,
        };

        self.period_spent = true;
        self.state = LifecycleState::Entered(position.clone());
        Ok(position)
    }

    /// `Proposed -> Idle` after a rejected entry; no retry this period
    pub fn abandon(&mut self) -> anyhow::Result<TradeProposal> {
        let LifecycleState::Proposed(proposal) = &self.state else {
            anyhow::bail!("{} has no proposal to abandon", self.symbol);
        };
        let proposal = proposal.clone();
        self.period_spent = true;
        self.state = LifecycleState::Idle;
        Ok(proposal)
    }

    /// Record protective order ids on the open position
    pub fn attach_protection(
        &mut self,
        take_profit_order: Option<String>,
        stop_loss_order: Option<String>,
    ) -> anyhow::Result<()> {
        let LifecycleState::Entered(position) = &mut self.state else {
            anyhow::bail!("{} has no open position", self.symbol);
        };
        if take_profit_order.is_some() {
            position.take_profit_order = take_profit_order;
        }
        if stop_loss_order.is_some() {
            position.stop_loss_order = stop_loss_order;
        }
        Ok(())
    }

    /// `Entered -> Closed`, returning the closed position
    ///
    /// # Arguments
    /// * `timestamp` - Optional timestamp for backtesting. If None, uses Utc::now() for live trading
    pub fn close_at(
        &mut self,
        exit_price: f64,
        reason: ExitReason,
        timestamp: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Position> {
        let LifecycleState::Entered(position) = &self.state else {
            anyhow::bail!("{} has no open position to close", self.symbol);
        };

        let mut position = position.clone();
        let pnl = position.unrealized_pnl(exit_price);
        position.status = PositionStatus::Closed;
        position.realized_pnl = Some(pnl);
        position.exit_price = Some(exit_price);
        position.exit_time = Some(timestamp.unwrap_or_else(Utc::now));
        position.exit_reason = Some(reason);

        self.closed.push(position.clone());
        self.state = LifecycleState::Closed(position.clone());
        Ok(position)
    }

    /// Total realized P&L over closed positions
    pub fn total_pnl(&self) -> f64 {
        self.closed.iter().filter_map(|p| p.realized_pnl).sum()
    }
}

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::api::ExchangeClient;
use crate::error::{CycleError, ExchangeError};
use crate::execution::{ExitReason, Position, PositionLifecycle};
use crate::journal::{CloseRecord, OpenRecord, TradeJournal};
use crate::models::{OrderStatus, Session, TradeProposal};

/// Drives one symbol's lifecycle against the exchange and the journal
pub struct Executor {
    exchange: Arc<dyn ExchangeClient>,
    journal: Arc<dyn TradeJournal>,
}

impl Executor {
    pub fn new(exchange: Arc<dyn ExchangeClient>, journal: Arc<dyn TradeJournal>) -> Self {
        Self { exchange, journal }
    }

    /// Enter `proposal` at market and attach its protective orders
    ///
    /// A failed market order abandons the proposal for the rest of the period.
    /// A filled entry is never reversed: if protection cannot be attached the
    /// position stays open and `ProtectionAttachFailed` is returned.
    pub async fn enter(
        &self,
        lifecycle: &mut PositionLifecycle,
        proposal: TradeProposal,
        session: Session,
        reason: &str,
        balance: f64,
        now: DateTime<Utc>,
    ) -> Result<Position, CycleError> {
        lifecycle
            .propose(proposal.clone(), session)
            .map_err(|e| CycleError::IneligibleSetup(e.to_string()))?;

        let symbol = lifecycle.symbol().to_string();
        let fill = match self
            .exchange
            .place_market_order(&symbol, proposal.direction.entry_side(), proposal.quantity)
            .await
        {
            Ok(fill) => fill,
            Err(err) => {
                lifecycle
                    .abandon()
                    .map_err(|e| CycleError::IneligibleSetup(e.to_string()))?;
                return Err(match err {
                    ExchangeError::InsufficientMargin { symbol } => {
                        CycleError::InsufficientMargin(symbol)
                    }
                    other => CycleError::OrderRejected(other.to_string()),
                });
            }
        };

        tracing::info!(
            "🟢 {} {} filled at {:.4} qty {} (order {}) | {}",
            symbol,
            proposal.direction,
            fill.filled_price,
            proposal.quantity,
            fill.order_id,
            reason
        );

        let record = OpenRecord {
            symbol: symbol.clone(),
            reason: reason.to_string(),
            direction: proposal.direction,
            entry_price: fill.filled_price,
            take_profit: proposal.take_profit,
            stop_loss: proposal.stop_loss,
            quantity: proposal.quantity,
            balance_start: balance,
            opened_at: now,
        };
        let trade_id = match self.journal.record_open(record).await {
            Ok(id) => id,
            Err(e) => {
                let id = Uuid::new_v4().to_string();
                tracing::warn!("journal open failed for {}: {}; using local id {}", symbol, e, id);
                id
            }
        };

        lifecycle
            .confirm_entry(trade_id, fill.filled_price, proposal.quantity, Some(now))
            .map_err(|e| CycleError::IneligibleSetup(e.to_string()))?;

        self.ensure_protection(lifecycle).await?;

        lifecycle
            .open_position()
            .cloned()
            .ok_or_else(|| CycleError::IneligibleSetup(format!("{} lost its position", symbol)))
    }

    /// Place whichever protective orders the open position is missing
    pub async fn ensure_protection(
        &self,
        lifecycle: &mut PositionLifecycle,
    ) -> Result<(), CycleError> {
        let Some(position) = lifecycle.open_position().cloned() else {
            return Ok(());
        };
        if position.is_protected() {
            return Ok(());
        }

        let side = position.direction.exit_side();
        let mut failures = Vec::new();

        let take_profit_order = match &position.take_profit_order {
            Some(_) => None,
            None => match self
                .exchange
                .place_reduce_only_limit(&position.symbol, side, position.quantity, position.take_profit)
                .await
            {
                Ok(id) => Some(id),
                Err(e) => {
                    failures.push(format!("take-profit: {}", e));
                    None
                }
            },
        };

        let stop_loss_order = match &position.stop_loss_order {
            Some(_) => None,
            None => match self
                .exchange
                .place_reduce_only_stop(&position.symbol, side, position.quantity, position.stop_loss)
                .await
            {
                Ok(id) => Some(id),
                Err(e) => {
                    failures.push(format!("stop-loss: {}", e));
                    None
                }
            },
        };

        lifecycle
            .attach_protection(take_profit_order, stop_loss_order)
            .map_err(|e| CycleError::IneligibleSetup(e.to_string()))?;

        if failures.is_empty() {
            tracing::info!(
                "{} protected: TP {:.4} SL {:.4}",
                position.symbol,
                position.take_profit,
                position.stop_loss
            );
            return Ok(());
        }

        Err(CycleError::ProtectionAttachFailed {
            symbol: position.symbol,
            trade_id: position.trade_id,
            reason: failures.join("; "),
        })
    }

    /// Check the protective orders and close the position once one is done
    ///
    /// Every attached leg is polled before a missing one is retried, so a
    /// fill on one side always closes the position even while the other side
    /// keeps failing to attach. Returns `None` while the position stays open.
    pub async fn poll_exit(
        &self,
        lifecycle: &mut PositionLifecycle,
        now: DateTime<Utc>,
    ) -> Result<Option<Position>, CycleError> {
        let Some(position) = lifecycle.open_position().cloned() else {
            return Ok(None);
        };

        let tp_status = self.leg_status(&position.symbol, &position.take_profit_order).await?;
        let sl_status = self.leg_status(&position.symbol, &position.stop_loss_order).await?;

        let (reason, exit_price, sibling) = match (tp_status, sl_status) {
            (Some(OrderStatus::Closed), _) => (
                ExitReason::TakeProfit,
                position.take_profit,
                position.stop_loss_order.clone(),
            ),
            (_, Some(OrderStatus::Closed)) => (
                ExitReason::StopLoss,
                position.stop_loss,
                position.take_profit_order.clone(),
            ),
            (Some(OrderStatus::Canceled), _) => (
                ExitReason::Canceled,
                self.exchange.fetch_last_price(&position.symbol).await?,
                position.stop_loss_order.clone(),
            ),
            (_, Some(OrderStatus::Canceled)) => (
                ExitReason::Canceled,
                self.exchange.fetch_last_price(&position.symbol).await?,
                position.take_profit_order.clone(),
            ),
            _ => {
                // nothing done yet; retry whatever never attached
                self.ensure_protection(lifecycle).await?;
                return Ok(None);
            }
        };

        let closed = lifecycle
            .close_at(exit_price, reason, Some(now))
            .map_err(|e| CycleError::IneligibleSetup(e.to_string()))?;
        let pnl = closed.realized_pnl.unwrap_or_default();

        tracing::info!(
            "🔴 {} closed {:?} at {:.4} | P&L {:+.4}",
            closed.symbol,
            reason,
            exit_price,
            pnl
        );

        if let Some(sibling) = sibling {
            if let Err(e) = self.exchange.cancel_order(&closed.symbol, &sibling).await {
                tracing::warn!("{} failed to cancel sibling order {}: {}", closed.symbol, sibling, e);
            }
        }

        let balance_after = match self.exchange.fetch_available_balance().await {
            Ok(balance) => Some(balance),
            Err(e) => {
                tracing::warn!("{} balance unavailable after exit: {}", closed.symbol, e);
                None
            }
        };

        let record = CloseRecord {
            trade_id: closed.trade_id.clone(),
            exit_price,
            pnl,
            balance_after,
            closed_at: now,
        };
        if let Err(e) = self.journal.record_close(record).await {
            tracing::warn!("journal close failed for {}: {}", closed.trade_id, e);
        }

        Ok(Some(closed))
    }

    async fn leg_status(
        &self,
        symbol: &str,
        order_id: &Option<String>,
    ) -> Result<Option<OrderStatus>, CycleError> {
        match order_id {
            Some(id) => Ok(Some(self.exchange.fetch_order_status(symbol, id).await?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{EntryFailure, PaperExchange, PaperOrderKind};
    use crate::config::TradeScope;
    use crate::execution::LifecycleState;
    use crate::journal::MemoryJournal;
    use crate::models::Direction;
    use chrono::TimeZone;

    fn kz_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 1, 14, 5, 0).unwrap()
    }

    fn short_proposal() -> TradeProposal {
        TradeProposal {
            direction: Direction::Short,
            entry_price: 112.0,
            stop_loss: 113.0,
            take_profit: 109.0,
            quantity: 2.0,
        }
    }

    fn setup() -> (PaperExchange, Arc<MemoryJournal>, Executor, PositionLifecycle) {
        let paper = PaperExchange::new(1000.0);
        paper.set_price("SOLUSDT", 112.0);
        let journal = Arc::new(MemoryJournal::new());
        let executor = Executor::new(Arc::new(paper.clone()), journal.clone());
        let mut lifecycle = PositionLifecycle::new("SOLUSDT", TradeScope::Session);
        lifecycle.on_clock(kz_time(), Session::KillZone);
        (paper, journal, executor, lifecycle)
    }

    #[tokio::test]
    async fn test_entry_attaches_protection() {
        let (paper, journal, executor, mut lifecycle) = setup();

        let position = executor
            .enter(&mut lifecycle, short_proposal(), Session::KillZone, "high sweep + structure shift", 1000.0, kz_time())
            .await
            .unwrap();

        assert!(position.is_protected());
        assert_eq!(position.entry_price, 112.0);
        assert!(lifecycle.period_spent());

        let orders = paper.orders();
        assert_eq!(orders.len(), 3);
        assert_eq!(orders[1].kind, PaperOrderKind::ReduceOnlyLimit);
        assert_eq!(orders[1].price, 109.0);
        assert_eq!(orders[2].kind, PaperOrderKind::ReduceOnlyStop);
        assert_eq!(orders[2].price, 113.0);

        let entries = journal.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].trade_id, position.trade_id);
        assert_eq!(entries[0].open.reason, "high sweep + structure shift");
    }

    #[tokio::test]
    async fn test_rejected_entry_is_abandoned() {
        let (paper, journal, executor, mut lifecycle) = setup();
        paper.fail_next_entry(EntryFailure::Rejected);

        let err = executor
            .enter(&mut lifecycle, short_proposal(), Session::KillZone, "r", 1000.0, kz_time())
            .await
            .unwrap_err();
        assert!(matches!(err, CycleError::OrderRejected(_)));
        assert!(matches!(lifecycle.state(), LifecycleState::Idle));
        // no retry within the same session
        assert!(!lifecycle.can_propose(Session::KillZone));
        assert!(journal.entries().is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_margin_maps_through() {
        let (paper, _journal, executor, mut lifecycle) = setup();
        paper.fail_next_entry(EntryFailure::InsufficientMargin);

        let err = executor
            .enter(&mut lifecycle, short_proposal(), Session::KillZone, "r", 1000.0, kz_time())
            .await
            .unwrap_err();
        assert!(matches!(err, CycleError::InsufficientMargin(_)));
    }

    #[tokio::test]
    async fn test_protection_failure_keeps_position_open() {
        let (paper, _journal, executor, mut lifecycle) = setup();
        paper.fail_protection(true);

        let err = executor
            .enter(&mut lifecycle, short_proposal(), Session::KillZone, "r", 1000.0, kz_time())
            .await
            .unwrap_err();
        assert!(err.is_alert());
        assert!(matches!(lifecycle.state(), LifecycleState::Entered(_)));
        assert!(!lifecycle.open_position().unwrap().is_protected());

        // the next poll retries the attachment only
        paper.fail_protection(false);
        let exit = executor.poll_exit(&mut lifecycle, kz_time()).await.unwrap();
        assert!(exit.is_none());
        assert!(lifecycle.open_position().unwrap().is_protected());
        let market_orders = paper
            .orders()
            .iter()
            .filter(|o| o.kind == PaperOrderKind::Market)
            .count();
        assert_eq!(market_orders, 1);
    }

    #[tokio::test]
    async fn test_stop_fill_closes_while_take_profit_keeps_failing() {
        let (paper, journal, executor, mut lifecycle) = setup();
        paper.reject_kind(PaperOrderKind::ReduceOnlyLimit, true);

        let err = executor
            .enter(&mut lifecycle, short_proposal(), Session::KillZone, "r", 1000.0, kz_time())
            .await
            .unwrap_err();
        assert!(err.is_alert());
        let position = lifecycle.open_position().unwrap().clone();
        assert!(position.take_profit_order.is_none());
        assert!(position.stop_loss_order.is_some());

        // still open: the retry fails again and is reported
        let err = executor.poll_exit(&mut lifecycle, kz_time()).await.unwrap_err();
        assert!(matches!(err, CycleError::ProtectionAttachFailed { .. }));
        assert!(matches!(lifecycle.state(), LifecycleState::Entered(_)));

        paper.set_price("SOLUSDT", 114.0);
        let closed = executor
            .poll_exit(&mut lifecycle, kz_time())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed.exit_reason, Some(ExitReason::StopLoss));
        assert_eq!(closed.exit_price, Some(113.0));
        assert!(matches!(lifecycle.state(), LifecycleState::Closed(_)));
        assert_eq!(paper.net_position("SOLUSDT"), 0.0);
        assert!(journal.entries()[0].close.is_some());

        // closed positions are not polled again
        assert!(executor.poll_exit(&mut lifecycle, kz_time()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_take_profit_closes_and_journals() {
        let (paper, journal, executor, mut lifecycle) = setup();
        executor
            .enter(&mut lifecycle, short_proposal(), Session::KillZone, "r", 1000.0, kz_time())
            .await
            .unwrap();

        assert!(executor.poll_exit(&mut lifecycle, kz_time()).await.unwrap().is_none());

        paper.set_price("SOLUSDT", 108.5);
        let closed = executor
            .poll_exit(&mut lifecycle, kz_time())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(closed.exit_reason, Some(ExitReason::TakeProfit));
        assert_eq!(closed.realized_pnl, Some(6.0));
        assert!(matches!(lifecycle.state(), LifecycleState::Closed(_)));

        let sibling = closed.stop_loss_order.clone().unwrap();
        let stop = paper.orders().into_iter().find(|o| o.id == sibling).unwrap();
        assert_eq!(stop.status, OrderStatus::Canceled);

        let close = journal.entries()[0].close.clone().unwrap();
        assert_eq!(close.pnl, 6.0);
        assert_eq!(close.balance_after, Some(1006.0));
    }

    #[tokio::test]
    async fn test_stop_loss_close() {
        let (paper, _journal, executor, mut lifecycle) = setup();
        executor
            .enter(&mut lifecycle, short_proposal(), Session::KillZone, "r", 1000.0, kz_time())
            .await
            .unwrap();

        paper.set_price("SOLUSDT", 113.5);
        let closed = executor
            .poll_exit(&mut lifecycle, kz_time())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed.exit_reason, Some(ExitReason::StopLoss));
        assert_eq!(closed.realized_pnl, Some(-2.0));
    }

    #[tokio::test]
    async fn test_manual_cancel_closes_at_last_price() {
        let (paper, _journal, executor, mut lifecycle) = setup();
        let position = executor
            .enter(&mut lifecycle, short_proposal(), Session::KillZone, "r", 1000.0, kz_time())
            .await
            .unwrap();

        paper.set_price("SOLUSDT", 111.0);
        paper.set_order_status(position.take_profit_order.as_deref().unwrap(), OrderStatus::Canceled);

        let closed = executor
            .poll_exit(&mut lifecycle, kz_time())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed.exit_reason, Some(ExitReason::Canceled));
        assert_eq!(closed.exit_price, Some(111.0));
    }
}

use crate::error::JournalError;
use crate::models::Direction;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

/// Trade opening, as written to the journal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRecord {
    pub symbol: String,
    /// e.g. "low sweep + structure shift"
    pub reason: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub quantity: f64,
    pub balance_start: f64,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseRecord {
    pub trade_id: String,
    pub exit_price: f64,
    pub pnl: f64,
    /// None when the balance could not be read after the exit
    pub balance_after: Option<f64>,
    pub closed_at: DateTime<Utc>,
}

/// One journaled trade, open or closed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub trade_id: String,
    pub open: OpenRecord,
    pub close: Option<CloseRecord>,
}

/// Append-only record of trades
///
/// Callers log failures and carry on; nothing in the trading path waits on
/// a journal write succeeding.
#[async_trait]
pub trait TradeJournal: Send + Sync {
    /// Record an opened trade and return its id
    async fn record_open(&self, record: OpenRecord) -> Result<String, JournalError>;

    async fn record_close(&self, record: CloseRecord) -> Result<(), JournalError>;
}

/// In-process journal for tests, paper runs and backtests
#[derive(Default)]
pub struct MemoryJournal {
    entries: Mutex<Vec<JournalEntry>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Sum of P&L over closed trades
    pub fn total_pnl(&self) -> f64 {
        self.entries()
            .iter()
            .filter_map(|e| e.close.as_ref().map(|c| c.pnl))
            .sum()
    }
}

#[async_trait]
impl TradeJournal for MemoryJournal {
    async fn record_open(&self, record: OpenRecord) -> Result<String, JournalError> {
        let trade_id = Uuid::new_v4().to_string();
        tracing::debug!("journal open {} {} {}", trade_id, record.symbol, record.reason);

        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(JournalEntry {
                trade_id: trade_id.clone(),
                open: record,
                close: None,
            });
        Ok(trade_id)
    }

    async fn record_close(&self, record: CloseRecord) -> Result<(), JournalError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries
            .iter_mut()
            .find(|e| e.trade_id == record.trade_id)
            .ok_or_else(|| JournalError::UnknownTrade(record.trade_id.clone()))?;

        tracing::debug!("journal close {} pnl {:.4}", record.trade_id, record.pnl);
        entry.close = Some(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_record() -> OpenRecord {
        OpenRecord {
            symbol: "SOLUSDT".to_string(),
            reason: "high sweep + first-close fallback".to_string(),
            direction: Direction::Short,
            entry_price: 112.0,
            take_profit: 111.664,
            stop_loss: 112.112,
            quantity: 4.46,
            balance_start: 1000.0,
            opened_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_open_then_close() {
        let journal = MemoryJournal::new();
        let id = journal.record_open(open_record()).await.unwrap();

        journal
            .record_close(CloseRecord {
                trade_id: id.clone(),
                exit_price: 111.664,
                pnl: 1.49856,
                balance_after: Some(1001.49856),
                closed_at: Utc::now(),
            })
            .await
            .unwrap();

        let entries = journal.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].trade_id, id);
        assert!(entries[0].close.is_some());
        assert!((journal.total_pnl() - 1.49856).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_close_unknown_trade() {
        let journal = MemoryJournal::new();
        let result = journal
            .record_close(CloseRecord {
                trade_id: "missing".to_string(),
                exit_price: 1.0,
                pnl: 0.0,
                balance_after: None,
                closed_at: Utc::now(),
            })
            .await;
        assert!(matches!(result, Err(JournalError::UnknownTrade(_))));
    }
}

use crate::error::JournalError;
use crate::journal::{CloseRecord, JournalEntry, OpenRecord, TradeJournal};
use crate::models::Direction;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use uuid::Uuid;

/// Postgres trade journal (`trades` table)
pub struct PostgresJournal {
    pool: PgPool,
}

fn decimal(value: f64) -> Result<Decimal, JournalError> {
    Decimal::try_from(value).map_err(|_| JournalError::InvalidNumber(value))
}

fn float(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

fn direction_str(direction: Direction) -> &'static str {
    match direction {
        Direction::Long => "long",
        Direction::Short => "short",
    }
}

fn parse_direction(s: &str) -> Result<Direction, JournalError> {
    match s {
        "long" => Ok(Direction::Long),
        "short" => Ok(Direction::Short),
        other => Err(JournalError::CorruptRow(format!("direction {}", other))),
    }
}

fn trade_uuid(trade_id: &str) -> Result<Uuid, JournalError> {
    Uuid::parse_str(trade_id).map_err(|_| JournalError::UnknownTrade(trade_id.to_string()))
}

fn entry_from_row(row: &PgRow) -> Result<JournalEntry, JournalError> {
    let id: Uuid = row.get("id");
    let direction: String = row.get("direction");
    let entry_price: Decimal = row.get("entry_price");
    let take_profit: Decimal = row.get("take_profit");
    let stop_loss: Decimal = row.get("stop_loss");
    let quantity: Decimal = row.get("quantity");
    let balance_start: Decimal = row.get("balance_start");
    let exit_price: Option<Decimal> = row.get("exit_price");
    let pnl: Option<Decimal> = row.get("pnl");
    let balance_after: Option<Decimal> = row.get("balance_after");
    let closed_at: Option<DateTime<Utc>> = row.get("closed_at");

    let trade_id = id.to_string();
    let close = match (exit_price, pnl, closed_at) {
        (Some(exit_price), Some(pnl), Some(closed_at)) => Some(CloseRecord {
            trade_id: trade_id.clone(),
            exit_price: float(exit_price),
            pnl: float(pnl),
            balance_after: balance_after.map(float),
            closed_at,
        }),
        _ => None,
    };

    Ok(JournalEntry {
        trade_id,
        open: OpenRecord {
            symbol: row.get("symbol"),
            reason: row.get("reason"),
            direction: parse_direction(&direction)?,
            entry_price: float(entry_price),
            take_profit: float(take_profit),
            stop_loss: float(stop_loss),
            quantity: float(quantity),
            balance_start: float(balance_start),
            opened_at: row.get("opened_at"),
        },
        close,
    })
}

impl PostgresJournal {
    /// Connect to Postgres and run the embedded migrations
    pub async fn new(database_url: &str) -> Result<Self, JournalError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres trade journal");

        Ok(Self { pool })
    }

    /// Most recent trades for `symbol`, newest first
    pub async fn recent_trades(
        &self,
        symbol: &str,
        limit: i64,
    ) -> Result<Vec<JournalEntry>, JournalError> {
        let rows = sqlx::query(
            r#"
            SELECT id, symbol, reason, direction, entry_price, take_profit, stop_loss,
                   quantity, balance_start, opened_at, exit_price, pnl, balance_after, closed_at
            FROM trades
            WHERE symbol = $1
            ORDER BY opened_at DESC
            LIMIT $2
            "#,
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Trades opened but never closed, e.g. left over from a previous run
    pub async fn open_trades(&self) -> Result<Vec<JournalEntry>, JournalError> {
        let rows = sqlx::query(
            r#"
            SELECT id, symbol, reason, direction, entry_price, take_profit, stop_loss,
                   quantity, balance_start, opened_at, exit_price, pnl, balance_after, closed_at
            FROM trades
            WHERE closed_at IS NULL
            ORDER BY opened_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    pub async fn total_pnl(&self) -> Result<f64, JournalError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(pnl), 0) as total_pnl
            FROM trades
            WHERE closed_at IS NOT NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let total: Decimal = row.get("total_pnl");
        Ok(float(total))
    }

    #[cfg(test)]
    async fn clear_symbol(&self, symbol: &str) -> Result<(), JournalError> {
        sqlx::query("DELETE FROM trades WHERE symbol = $1")
            .bind(symbol)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TradeJournal for PostgresJournal {
    async fn record_open(&self, record: OpenRecord) -> Result<String, JournalError> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO trades (
                id, symbol, reason, direction, entry_price, take_profit, stop_loss,
                quantity, balance_start, opened_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(id)
        .bind(&record.symbol)
        .bind(&record.reason)
        .bind(direction_str(record.direction))
        .bind(decimal(record.entry_price)?)
        .bind(decimal(record.take_profit)?)
        .bind(decimal(record.stop_loss)?)
        .bind(decimal(record.quantity)?)
        .bind(decimal(record.balance_start)?)
        .bind(record.opened_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Journaled open {} for {}", id, record.symbol);

        Ok(id.to_string())
    }

    async fn record_close(&self, record: CloseRecord) -> Result<(), JournalError> {
        let id = trade_uuid(&record.trade_id)?;

        let result = sqlx::query(
            r#"
            UPDATE trades
            SET exit_price = $2, pnl = $3, balance_after = $4, closed_at = $5, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(decimal(record.exit_price)?)
        .bind(decimal(record.pnl)?)
        .bind(record.balance_after.map(decimal).transpose()?)
        .bind(record.closed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(JournalError::UnknownTrade(record.trade_id));
        }

        tracing::debug!("Journaled close {} pnl {:.4}", record.trade_id, record.pnl);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn get_test_db() -> PostgresJournal {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/sweepbot_test".to_string());

        PostgresJournal::new(&database_url)
            .await
            .expect("Failed to connect to test database")
    }

    fn open_record(symbol: &str) -> OpenRecord {
        OpenRecord {
            symbol: symbol.to_string(),
            reason: "low sweep + structure shift".to_string(),
            direction: Direction::Long,
            entry_price: 100.0,
            take_profit: 103.0,
            stop_loss: 99.0,
            quantity: 2.0,
            balance_start: 1000.0,
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn test_direction_round_trip() {
        for d in [Direction::Long, Direction::Short] {
            assert_eq!(parse_direction(direction_str(d)).unwrap(), d);
        }
        assert!(parse_direction("flat").is_err());
    }

    #[test]
    fn test_non_finite_values_rejected() {
        assert!(decimal(f64::NAN).is_err());
        assert!((float(decimal(111.664).unwrap()) - 111.664).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_trade_id() {
        assert!(matches!(trade_uuid("paper-1"), Err(JournalError::UnknownTrade(_))));
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_open_and_close_trade() {
        let db = get_test_db().await;
        db.clear_symbol("PGTESTUSDT").await.unwrap();

        let id = db.record_open(open_record("PGTESTUSDT")).await.unwrap();
        assert_eq!(db.open_trades().await.unwrap().iter().filter(|t| t.trade_id == id).count(), 1);

        db.record_close(CloseRecord {
            trade_id: id.clone(),
            exit_price: 103.0,
            pnl: 6.0,
            balance_after: Some(1006.0),
            closed_at: Utc::now(),
        })
        .await
        .unwrap();

        let trades = db.recent_trades("PGTESTUSDT", 10).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].open.reason, "low sweep + structure shift");
        assert_eq!(trades[0].close.as_ref().unwrap().pnl, 6.0);

        db.clear_symbol("PGTESTUSDT").await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_close_unknown_trade() {
        let db = get_test_db().await;
        let result = db
            .record_close(CloseRecord {
                trade_id: Uuid::new_v4().to_string(),
                exit_price: 1.0,
                pnl: 0.0,
                balance_after: None,
                closed_at: Utc::now(),
            })
            .await;
        assert!(matches!(result, Err(JournalError::UnknownTrade(_))));
    }
}

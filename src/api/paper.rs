use super::ExchangeClient;
use crate::error::ExchangeError;
use crate::models::{Candle, MarketFill, MarketFilters, OrderSide, OrderStatus, Timeframe};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaperOrderKind {
    Market,
    ReduceOnlyLimit,
    ReduceOnlyStop,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaperOrder {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub kind: PaperOrderKind,
    pub quantity: f64,
    /// Fill price for market orders, limit or trigger price otherwise
    pub price: f64,
    pub status: OrderStatus,
}

/// Injected failure for the next market entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryFailure {
    Rejected,
    InsufficientMargin,
}

/// Net simulated position per symbol; positive quantity is long
#[derive(Debug, Clone, Copy, Default)]
struct NetPosition {
    quantity: f64,
    entry_price: f64,
}

#[derive(Default)]
struct PaperState {
    candles: HashMap<(String, Timeframe), Vec<Candle>>,
    prices: HashMap<String, f64>,
    filters: HashMap<String, MarketFilters>,
    leverage: HashMap<String, u32>,
    positions: HashMap<String, NetPosition>,
    orders: Vec<PaperOrder>,
    balance: f64,
    next_id: u64,
    entry_failure: Option<EntryFailure>,
    /// Resting order kinds whose placement is rejected
    rejected_kinds: Vec<PaperOrderKind>,
}

impl PaperState {
    fn next_order_id(&mut self) -> String {
        self.next_id += 1;
        format!("paper-{}", self.next_id)
    }

    fn last_price(&self, symbol: &str) -> Option<f64> {
        if let Some(price) = self.prices.get(symbol) {
            return Some(*price);
        }
        self.candles
            .iter()
            .filter(|((s, _), _)| s == symbol)
            .filter_map(|(_, candles)| candles.last())
            .max_by_key(|c| c.timestamp)
            .map(|c| c.close)
    }

    /// Apply a fill to the net position and settle realized P&L into the balance
    fn settle(&mut self, symbol: &str, side: OrderSide, quantity: f64, price: f64) {
        let signed = match side {
            OrderSide::Buy => quantity,
            OrderSide::Sell => -quantity,
        };
        let position = self.positions.entry(symbol.to_string()).or_default();

        if position.quantity == 0.0 || position.quantity.signum() == signed.signum() {
            let total = position.quantity + signed;
            position.entry_price = (position.entry_price * position.quantity.abs()
                + price * quantity)
                / total.abs();
            position.quantity = total;
            return;
        }

        let closing = quantity.min(position.quantity.abs());
        let pnl = if position.quantity > 0.0 {
            (price - position.entry_price) * closing
        } else {
            (position.entry_price - price) * closing
        };
        self.balance += pnl;
        position.quantity += signed.signum() * closing;
        if position.quantity.abs() < 1e-12 {
            *position = NetPosition::default();
        }
    }

    /// Fill resting reduce-only orders whose level the last price has reached
    fn match_resting(&mut self, symbol: &str) {
        let Some(price) = self.last_price(symbol) else {
            return;
        };

        let mut fills = Vec::new();
        for order in self
            .orders
            .iter_mut()
            .filter(|o| o.symbol == symbol && o.status == OrderStatus::Open)
        {
            let reached = match (order.kind, order.side) {
                (PaperOrderKind::ReduceOnlyLimit, OrderSide::Sell) => price >= order.price,
                (PaperOrderKind::ReduceOnlyLimit, OrderSide::Buy) => price <= order.price,
                (PaperOrderKind::ReduceOnlyStop, OrderSide::Sell) => price <= order.price,
                (PaperOrderKind::ReduceOnlyStop, OrderSide::Buy) => price >= order.price,
                (PaperOrderKind::Market, _) => false,
            };
            if reached {
                order.status = OrderStatus::Closed;
                fills.push((order.side, order.quantity, order.price));
            }
        }

        for (side, quantity, price) in fills {
            self.settle(symbol, side, quantity, price);
        }
    }
}

/// In-memory exchange for tests and paper trading
///
/// Market data is scripted, or taken from an upstream client when one is
/// configured. Orders fill at the last price; reduce-only orders rest until
/// the last price reaches them, and realized P&L moves the balance.
#[derive(Clone)]
pub struct PaperExchange {
    state: Arc<Mutex<PaperState>>,
    market_data: Option<Arc<dyn ExchangeClient>>,
}

impl PaperExchange {
    pub fn new(balance: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(PaperState {
                balance,
                ..PaperState::default()
            })),
            market_data: None,
        }
    }

    /// Take candles, prices and filters from `client`; orders stay simulated
    pub fn with_market_data(mut self, client: Arc<dyn ExchangeClient>) -> Self {
        self.market_data = Some(client);
        self
    }

    fn state(&self) -> MutexGuard<'_, PaperState> {
        // A panic while holding the lock leaves plain data behind; keep going
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_candles(&self, symbol: &str, timeframe: Timeframe, candles: Vec<Candle>) {
        self.state()
            .candles
            .insert((symbol.to_string(), timeframe), candles);
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.state().prices.insert(symbol.to_string(), price);
    }

    pub fn set_filters(&self, symbol: &str, filters: MarketFilters) {
        self.state().filters.insert(symbol.to_string(), filters);
    }

    pub fn set_balance(&self, balance: f64) {
        self.state().balance = balance;
    }

    pub fn fail_next_entry(&self, failure: EntryFailure) {
        self.state().entry_failure = Some(failure);
    }

    /// Make every protective order placement fail until turned off
    pub fn fail_protection(&self, fail: bool) {
        self.reject_kind(PaperOrderKind::ReduceOnlyLimit, fail);
        self.reject_kind(PaperOrderKind::ReduceOnlyStop, fail);
    }

    /// Reject placements of one resting order kind until turned off
    pub fn reject_kind(&self, kind: PaperOrderKind, reject: bool) {
        let mut state = self.state();
        state.rejected_kinds.retain(|k| *k != kind);
        if reject {
            state.rejected_kinds.push(kind);
        }
    }

    /// Force an order's status, e.g. to simulate a manual cancel
    pub fn set_order_status(&self, order_id: &str, status: OrderStatus) {
        if let Some(order) = self.state().orders.iter_mut().find(|o| o.id == order_id) {
            order.status = status;
        }
    }

    pub fn orders(&self) -> Vec<PaperOrder> {
        self.state().orders.clone()
    }

    pub fn leverage(&self, symbol: &str) -> Option<u32> {
        self.state().leverage.get(symbol).copied()
    }

    /// Net open quantity, positive for long
    pub fn net_position(&self, symbol: &str) -> f64 {
        self.state()
            .positions
            .get(symbol)
            .map(|p| p.quantity)
            .unwrap_or(0.0)
    }

    fn place_resting(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        price: f64,
        kind: PaperOrderKind,
    ) -> Result<String, ExchangeError> {
        let mut state = self.state();
        if state.rejected_kinds.contains(&kind) {
            return Err(ExchangeError::Api {
                code: -2022,
                msg: format!("simulated {:?} rejection on {}", kind, symbol),
            });
        }

        let id = state.next_order_id();
        state.orders.push(PaperOrder {
            id: id.clone(),
            symbol: symbol.to_string(),
            side,
            kind,
            quantity,
            price,
            status: OrderStatus::Open,
        });
        Ok(id)
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        if let Some(upstream) = &self.market_data {
            return upstream.fetch_candles(symbol, timeframe, limit).await;
        }

        let state = self.state();
        let candles = state
            .candles
            .get(&(symbol.to_string(), timeframe))
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ExchangeError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: format!("no scripted {} candles", timeframe),
            })?;
        let start = candles.len().saturating_sub(limit);
        Ok(candles[start..].to_vec())
    }

    async fn fetch_available_balance(&self) -> Result<f64, ExchangeError> {
        Ok(self.state().balance)
    }

    async fn fetch_last_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        if let Some(upstream) = &self.market_data {
            let price = upstream.fetch_last_price(symbol).await?;
            self.set_price(symbol, price);
            return Ok(price);
        }

        self.state()
            .last_price(symbol)
            .ok_or_else(|| ExchangeError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: "no price".to_string(),
            })
    }

    async fn market_filters(&self, symbol: &str) -> Result<MarketFilters, ExchangeError> {
        if let Some(filters) = self.state().filters.get(symbol) {
            return Ok(*filters);
        }
        match &self.market_data {
            Some(upstream) => upstream.market_filters(symbol).await,
            None => Ok(MarketFilters::default()),
        }
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        self.state().leverage.insert(symbol.to_string(), leverage);
        Ok(())
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<MarketFill, ExchangeError> {
        let price = self.fetch_last_price(symbol).await?;

        let mut state = self.state();
        match state.entry_failure.take() {
            Some(EntryFailure::Rejected) => {
                return Err(ExchangeError::OrderRejected(format!(
                    "simulated rejection on {}",
                    symbol
                )))
            }
            Some(EntryFailure::InsufficientMargin) => {
                return Err(ExchangeError::InsufficientMargin {
                    symbol: symbol.to_string(),
                })
            }
            None => {}
        }

        let leverage = state.leverage.get(symbol).copied().unwrap_or(1).max(1);
        if quantity * price / leverage as f64 > state.balance {
            return Err(ExchangeError::InsufficientMargin {
                symbol: symbol.to_string(),
            });
        }

        let id = state.next_order_id();
        state.orders.push(PaperOrder {
            id: id.clone(),
            symbol: symbol.to_string(),
            side,
            kind: PaperOrderKind::Market,
            quantity,
            price,
            status: OrderStatus::Closed,
        });
        state.settle(symbol, side, quantity, price);

        Ok(MarketFill {
            order_id: id,
            filled_price: price,
        })
    }

    async fn place_reduce_only_limit(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        price: f64,
    ) -> Result<String, ExchangeError> {
        self.place_resting(symbol, side, quantity, price, PaperOrderKind::ReduceOnlyLimit)
    }

    async fn place_reduce_only_stop(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        stop_price: f64,
    ) -> Result<String, ExchangeError> {
        self.place_resting(symbol, side, quantity, stop_price, PaperOrderKind::ReduceOnlyStop)
    }

    async fn fetch_order_status(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<OrderStatus, ExchangeError> {
        if self.market_data.is_some() {
            // resting orders match against the live price
            self.fetch_last_price(symbol).await?;
        }

        let mut state = self.state();
        state.match_resting(symbol);
        state
            .orders
            .iter()
            .find(|o| o.id == order_id)
            .map(|o| o.status)
            .ok_or_else(|| ExchangeError::Api {
                code: -2013,
                msg: format!("order {} does not exist", order_id),
            })
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        let mut state = self.state();
        match state.orders.iter_mut().find(|o| o.id == order_id) {
            Some(order) if order.status == OrderStatus::Open => {
                order.status = OrderStatus::Canceled;
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(ExchangeError::Api {
                code: -2011,
                msg: format!("unknown order {}", order_id),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_market_fill_at_last_price() {
        let paper = PaperExchange::new(1000.0);
        paper.set_price("SOLUSDT", 112.0);

        let fill = paper
            .place_market_order("SOLUSDT", OrderSide::Sell, 2.0)
            .await
            .unwrap();
        assert_eq!(fill.filled_price, 112.0);
        assert_eq!(paper.net_position("SOLUSDT"), -2.0);
    }

    #[tokio::test]
    async fn test_take_profit_settles_balance() {
        let paper = PaperExchange::new(1000.0);
        paper.set_price("SOLUSDT", 112.0);
        paper.place_market_order("SOLUSDT", OrderSide::Sell, 2.0).await.unwrap();
        let tp = paper
            .place_reduce_only_limit("SOLUSDT", OrderSide::Buy, 2.0, 110.0)
            .await
            .unwrap();
        let sl = paper
            .place_reduce_only_stop("SOLUSDT", OrderSide::Buy, 2.0, 113.0)
            .await
            .unwrap();

        assert_eq!(paper.fetch_order_status("SOLUSDT", &tp).await.unwrap(), OrderStatus::Open);

        paper.set_price("SOLUSDT", 109.5);
        assert_eq!(paper.fetch_order_status("SOLUSDT", &tp).await.unwrap(), OrderStatus::Closed);
        assert_eq!(paper.fetch_order_status("SOLUSDT", &sl).await.unwrap(), OrderStatus::Open);
        assert_eq!(paper.fetch_available_balance().await.unwrap(), 1004.0);
        assert_eq!(paper.net_position("SOLUSDT"), 0.0);

        paper.cancel_order("SOLUSDT", &sl).await.unwrap();
        assert_eq!(paper.fetch_order_status("SOLUSDT", &sl).await.unwrap(), OrderStatus::Canceled);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let paper = PaperExchange::new(1000.0);
        paper.set_price("SOLUSDT", 100.0);

        paper.fail_next_entry(EntryFailure::InsufficientMargin);
        let err = paper
            .place_market_order("SOLUSDT", OrderSide::Buy, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InsufficientMargin { .. }));

        // only the next entry fails
        assert!(paper.place_market_order("SOLUSDT", OrderSide::Buy, 1.0).await.is_ok());

        paper.fail_protection(true);
        assert!(paper
            .place_reduce_only_stop("SOLUSDT", OrderSide::Sell, 1.0, 99.0)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_margin_uses_leverage() {
        let paper = PaperExchange::new(100.0);
        paper.set_price("SOLUSDT", 100.0);
        assert!(paper.place_market_order("SOLUSDT", OrderSide::Buy, 5.0).await.is_err());

        paper.set_leverage("SOLUSDT", 10).await.unwrap();
        assert!(paper.place_market_order("SOLUSDT", OrderSide::Buy, 5.0).await.is_ok());
    }

    #[tokio::test]
    async fn test_scripted_candles() {
        use chrono::{Duration, TimeZone, Utc};

        let paper = PaperExchange::new(1000.0);
        assert!(paper.fetch_candles("SOLUSDT", Timeframe::M5, 10).await.is_err());

        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let candles: Vec<Candle> = (0..5)
            .map(|i| {
                let p = 100.0 + i as f64;
                Candle::new(start + Duration::minutes(5 * i), p, p, p, p)
            })
            .collect();
        paper.set_candles("SOLUSDT", Timeframe::M5, candles);

        let tail = paper.fetch_candles("SOLUSDT", Timeframe::M5, 2).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].close, 104.0);
        // last price falls back to the newest close
        assert_eq!(paper.fetch_last_price("SOLUSDT").await.unwrap(), 104.0);
    }
}

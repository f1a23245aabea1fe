pub mod binance;
pub mod paper;
pub mod rate_limited;

pub use binance::BinanceFuturesClient;
pub use paper::{EntryFailure, PaperExchange, PaperOrder, PaperOrderKind};
pub use rate_limited::RateLimitedClient;

use crate::error::ExchangeError;
use crate::models::{Candle, MarketFill, MarketFilters, OrderSide, OrderStatus, Timeframe};
use async_trait::async_trait;

/// Exchange operations the bot needs
///
/// Implementations must be shareable across symbol workers. Per-call
/// timeouts belong to the implementation.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Most recent `limit` candles, oldest first. The last one may still be forming.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Free quote-currency balance
    async fn fetch_available_balance(&self) -> Result<f64, ExchangeError>;

    async fn fetch_last_price(&self, symbol: &str) -> Result<f64, ExchangeError>;

    async fn market_filters(&self, symbol: &str) -> Result<MarketFilters, ExchangeError>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError>;

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<MarketFill, ExchangeError>;

    /// Reduce-only GTC limit order; returns the order id
    async fn place_reduce_only_limit(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        price: f64,
    ) -> Result<String, ExchangeError>;

    /// Reduce-only stop-market order; returns the order id
    async fn place_reduce_only_stop(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        stop_price: f64,
    ) -> Result<String, ExchangeError>;

    async fn fetch_order_status(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<OrderStatus, ExchangeError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError>;
}

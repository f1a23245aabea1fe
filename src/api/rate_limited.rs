use super::ExchangeClient;
use crate::error::ExchangeError;
use crate::models::{Candle, MarketFill, MarketFilters, OrderSide, OrderStatus, Timeframe};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use tokio::sync::{Mutex, MutexGuard};

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Serializing, rate-limited proxy shared by every symbol worker
///
/// One call reaches the inner client at a time, and only after the quota
/// allows it. Waiting blocks the calling worker only.
pub struct RateLimitedClient<C> {
    inner: C,
    limiter: DirectRateLimiter,
    gate: Mutex<()>,
}

impl<C: ExchangeClient> RateLimitedClient<C> {
    pub fn new(inner: C, requests_per_second: u32) -> Self {
        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            inner,
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
            gate: Mutex::new(()),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Hold the gate and wait for quota; the guard releases the gate on drop
    async fn throttle(&self) -> MutexGuard<'_, ()> {
        let gate = self.gate.lock().await;
        self.limiter.until_ready().await;
        gate
    }
}

#[async_trait]
impl<C: ExchangeClient> ExchangeClient for RateLimitedClient<C> {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let _gate = self.throttle().await;
        self.inner.fetch_candles(symbol, timeframe, limit).await
    }

    async fn fetch_available_balance(&self) -> Result<f64, ExchangeError> {
        let _gate = self.throttle().await;
        self.inner.fetch_available_balance().await
    }

    async fn fetch_last_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        let _gate = self.throttle().await;
        self.inner.fetch_last_price(symbol).await
    }

    async fn market_filters(&self, symbol: &str) -> Result<MarketFilters, ExchangeError> {
        let _gate = self.throttle().await;
        self.inner.market_filters(symbol).await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        let _gate = self.throttle().await;
        self.inner.set_leverage(symbol, leverage).await
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<MarketFill, ExchangeError> {
        let _gate = self.throttle().await;
        self.inner.place_market_order(symbol, side, quantity).await
    }

    async fn place_reduce_only_limit(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        price: f64,
    ) -> Result<String, ExchangeError> {
        let _gate = self.throttle().await;
        self.inner.place_reduce_only_limit(symbol, side, quantity, price).await
    }

    async fn place_reduce_only_stop(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        stop_price: f64,
    ) -> Result<String, ExchangeError> {
        let _gate = self.throttle().await;
        self.inner.place_reduce_only_stop(symbol, side, quantity, stop_price).await
    }

    async fn fetch_order_status(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<OrderStatus, ExchangeError> {
        let _gate = self.throttle().await;
        self.inner.fetch_order_status(symbol, order_id).await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        let _gate = self.throttle().await;
        self.inner.cancel_order(symbol, order_id).await
    }
}

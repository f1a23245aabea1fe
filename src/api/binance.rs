use super::ExchangeClient;
use crate::error::ExchangeError;
use crate::models::{Candle, MarketFill, MarketFilters, OrderSide, OrderStatus, Timeframe};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::prelude::*;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

type HmacSha256 = Hmac<sha2::Sha256>;

const MAINNET_URL: &str = "https://fapi.binance.com";
const TESTNET_URL: &str = "https://testnet.binancefuture.com";
const RECV_WINDOW_MS: u64 = 5000;
const QUOTE_ASSET: &str = "USDT";

/// Binance error code for "Margin is insufficient"
const INSUFFICIENT_MARGIN: i64 = -2019;

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceEntry {
    asset: String,
    available_balance: String,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    price_precision: u32,
    quantity_precision: u32,
    #[serde(default)]
    filters: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    #[serde(default)]
    avg_price: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// USDT-M futures REST client
///
/// Cloneable; clones share the HTTP pool and the market filter cache.
#[derive(Clone)]
pub struct BinanceFuturesClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    filters: Arc<RwLock<HashMap<String, MarketFilters>>>,
}

impl BinanceFuturesClient {
    pub fn new(api_key: String, api_secret: String, testnet: bool) -> anyhow::Result<Self> {
        let base_url = if testnet { TESTNET_URL } else { MAINNET_URL };
        Self::with_base_url(base_url, api_key, api_secret)
    }

    /// Credentials from `BINANCE_API_KEY` / `BINANCE_API_SECRET`
    pub fn from_env(testnet: bool) -> anyhow::Result<Self> {
        let api_key = std::env::var("BINANCE_API_KEY").context("BINANCE_API_KEY not set")?;
        let api_secret =
            std::env::var("BINANCE_API_SECRET").context("BINANCE_API_SECRET not set")?;
        Self::new(api_key, api_secret, testnet)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: String,
        api_secret: String,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
            api_secret,
            filters: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn sign(&self, payload: &str) -> Result<String, ExchangeError> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| ExchangeError::Signing(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_query(&self, params: &[(&str, String)]) -> Result<String, ExchangeError> {
        let mut query: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        query.push(format!("recvWindow={}", RECV_WINDOW_MS));
        query.push(format!("timestamp={}", Utc::now().timestamp_millis()));
        let query = query.join("&");
        let signature = self.sign(&query)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    async fn public<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
        symbol: &str,
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(params).send().await?;
        Self::read(response, symbol).await
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        symbol: &str,
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}?{}", self.base_url, path, self.signed_query(params)?);
        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Self::read(response, symbol).await
    }

    async fn read<T: DeserializeOwned>(
        response: reqwest::Response,
        symbol: &str,
    ) -> Result<T, ExchangeError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(api_error(symbol, status, &body));
        }
        serde_json::from_str(&body).map_err(|e| ExchangeError::Decode(format!("{}: {}", e, body)))
    }

    async fn place_order(
        &self,
        symbol: &str,
        params: Vec<(&str, String)>,
    ) -> Result<OrderResponse, ExchangeError> {
        let order: OrderResponse = self
            .signed(Method::POST, "/fapi/v1/order", &params, symbol)
            .await
            .map_err(|e| match e {
                ExchangeError::Api { code, msg } => {
                    ExchangeError::OrderRejected(format!("{} ({})", msg, code))
                }
                other => other,
            })?;

        if order.status.as_deref() == Some("REJECTED") || order.status.as_deref() == Some("EXPIRED") {
            return Err(ExchangeError::OrderRejected(format!(
                "order {} on {} came back {:?}",
                order.order_id, symbol, order.status
            )));
        }
        Ok(order)
    }

    async fn load_filters(&self) -> Result<(), ExchangeError> {
        let info: ExchangeInfo = self.public("/fapi/v1/exchangeInfo", &[], "").await?;

        let mut cache = self.filters.write().await;
        for symbol in info.symbols {
            let mut filters = MarketFilters {
                price_precision: symbol.price_precision,
                quantity_precision: symbol.quantity_precision,
                min_quantity: 0.0,
                min_notional: 0.0,
            };
            for filter in &symbol.filters {
                match filter["filterType"].as_str() {
                    Some("LOT_SIZE") => {
                        filters.min_quantity = number(&filter["minQty"]).unwrap_or(0.0);
                    }
                    Some("MIN_NOTIONAL") => {
                        filters.min_notional = number(&filter["notional"]).unwrap_or(0.0);
                    }
                    _ => {}
                }
            }
            cache.insert(symbol.symbol, filters);
        }

        tracing::debug!("Cached market filters for {} symbols", cache.len());
        Ok(())
    }
}

fn api_error(symbol: &str, status: StatusCode, body: &str) -> ExchangeError {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(err) if err.code == INSUFFICIENT_MARGIN => ExchangeError::InsufficientMargin {
            symbol: symbol.to_string(),
        },
        Ok(err) => ExchangeError::Api {
            code: err.code,
            msg: err.msg,
        },
        Err(_) => ExchangeError::Api {
            code: status.as_u16() as i64,
            msg: body.to_string(),
        },
    }
}

/// Binance sends most numbers as strings
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Plain decimal text without float noise or exponent
fn format_decimal(value: f64) -> String {
    Decimal::from_f64(value)
        .map(|d| d.normalize().to_string())
        .unwrap_or_else(|| value.to_string())
}

fn parse_kline(row: &[Value]) -> Option<Candle> {
    let open_ms = row.first()?.as_i64()?;
    Some(Candle {
        timestamp: DateTime::<Utc>::from_timestamp_millis(open_ms)?,
        open: number(row.get(1)?)?,
        high: number(row.get(2)?)?,
        low: number(row.get(3)?)?,
        close: number(row.get(4)?)?,
        volume: number(row.get(5)?)?,
    })
}

fn parse_status(status: &str) -> Result<OrderStatus, ExchangeError> {
    match status {
        "NEW" | "PARTIALLY_FILLED" => Ok(OrderStatus::Open),
        "FILLED" => Ok(OrderStatus::Closed),
        "CANCELED" | "EXPIRED" | "REJECTED" | "EXPIRED_IN_MATCH" => Ok(OrderStatus::Canceled),
        other => Err(ExchangeError::Decode(format!("unknown order status {}", other))),
    }
}

#[async_trait]
impl ExchangeClient for BinanceFuturesClient {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("interval", timeframe.as_str().to_string()),
            ("limit", limit.to_string()),
        ];
        let rows: Vec<Vec<Value>> = self.public("/fapi/v1/klines", &params, symbol).await?;
        if rows.is_empty() {
            return Err(ExchangeError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: format!("no {} klines returned", timeframe),
            });
        }

        rows.iter()
            .map(|row| {
                parse_kline(row).ok_or_else(|| ExchangeError::DataUnavailable {
                    symbol: symbol.to_string(),
                    reason: format!("malformed kline row: {:?}", row),
                })
            })
            .collect()
    }

    async fn fetch_available_balance(&self) -> Result<f64, ExchangeError> {
        let balances: Vec<BalanceEntry> = self
            .signed(Method::GET, "/fapi/v2/balance", &[], "")
            .await?;
        balances
            .iter()
            .find(|b| b.asset == QUOTE_ASSET)
            .and_then(|b| b.available_balance.parse().ok())
            .ok_or_else(|| ExchangeError::Decode(format!("no {} balance", QUOTE_ASSET)))
    }

    async fn fetch_last_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        let ticker: TickerPrice = self
            .public("/fapi/v1/ticker/price", &[("symbol", symbol.to_string())], symbol)
            .await?;
        ticker
            .price
            .parse()
            .map_err(|_| ExchangeError::Decode(format!("bad price {}", ticker.price)))
    }

    async fn market_filters(&self, symbol: &str) -> Result<MarketFilters, ExchangeError> {
        if let Some(filters) = self.filters.read().await.get(symbol) {
            return Ok(*filters);
        }

        self.load_filters().await?;
        self.filters
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: "symbol not listed in exchangeInfo".to_string(),
            })
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("leverage", leverage.to_string()),
        ];
        let _: Value = self
            .signed(Method::POST, "/fapi/v1/leverage", &params, symbol)
            .await?;
        Ok(())
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<MarketFill, ExchangeError> {
        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", format_decimal(quantity)),
            ("newOrderRespType", "RESULT".to_string()),
        ];
        let order = self.place_order(symbol, params).await?;

        let avg_price = order
            .avg_price
            .as_deref()
            .and_then(|p| p.parse::<f64>().ok())
            .filter(|p| *p > 0.0);
        let filled_price = match avg_price {
            Some(price) => price,
            None => self.fetch_last_price(symbol).await?,
        };

        Ok(MarketFill {
            order_id: order.order_id.to_string(),
            filled_price,
        })
    }

    async fn place_reduce_only_limit(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        price: f64,
    ) -> Result<String, ExchangeError> {
        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "LIMIT".to_string()),
            ("timeInForce", "GTC".to_string()),
            ("quantity", format_decimal(quantity)),
            ("price", format_decimal(price)),
            ("reduceOnly", "true".to_string()),
        ];
        Ok(self.place_order(symbol, params).await?.order_id.to_string())
    }

    async fn place_reduce_only_stop(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        stop_price: f64,
    ) -> Result<String, ExchangeError> {
        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "STOP_MARKET".to_string()),
            ("quantity", format_decimal(quantity)),
            ("stopPrice", format_decimal(stop_price)),
            ("reduceOnly", "true".to_string()),
        ];
        Ok(self.place_order(symbol, params).await?.order_id.to_string())
    }

    async fn fetch_order_status(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<OrderStatus, ExchangeError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
        ];
        let order: Value = self
            .signed(Method::GET, "/fapi/v1/order", &params, symbol)
            .await?;
        let status = order["status"]
            .as_str()
            .ok_or_else(|| ExchangeError::Decode(format!("order {} has no status", order_id)))?;
        parse_status(status)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
        ];
        let _: Value = self
            .signed(Method::DELETE, "/fapi/v1/order", &params, symbol)
            .await?;
        Ok(())
    }
}

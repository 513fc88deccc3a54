use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;

use super::{AccountPort, MarketDataPort};
use crate::models::{Candle, OrderConfirmation, OrderSide};

// Binance Spot REST API
// Docs: https://developers.binance.com/docs/binance-spot-api-docs/rest-api
const BINANCE_API_BASE: &str = "https://api.binance.com";
const BINANCE_TESTNET_API_BASE: &str = "https://testnet.binance.vision";
const REQUEST_TIMEOUT_SECS: u64 = 10;
const RECV_WINDOW_MS: u64 = 5000;
const REQUESTS_PER_SECOND: u32 = 10;

type HmacSha256 = Hmac<Sha256>;

// Type alias for the rate limiter to simplify signatures
type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Clone)]
struct Credentials {
    api_key: String,
    api_secret: String,
}

/// Binance spot client implementing both exchange ports
///
/// All requests share one rate limiter. Account endpoints are HMAC-SHA256 signed.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
    rate_limiter: Arc<BinanceRateLimiter>,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    balances: Vec<AssetBalance>,
}

#[derive(Debug, Deserialize)]
struct AssetBalance {
    asset: String,
    free: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    symbol: String,
    order_id: u64,
    #[serde(default)]
    transact_time: Option<i64>,
    #[serde(default)]
    executed_qty: Option<String>,
    #[serde(default)]
    cummulative_quote_qty: Option<String>,
}

impl BinanceClient {
    pub fn new(testnet: bool, api_key: Option<String>, api_secret: Option<String>) -> Result<Self> {
        let base_url = if testnet {
            BINANCE_TESTNET_API_BASE
        } else {
            BINANCE_API_BASE
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        let credentials = match (api_key, api_secret) {
            (Some(api_key), Some(api_secret)) if !api_key.is_empty() && !api_secret.is_empty() => {
                Some(Credentials {
                    api_key,
                    api_secret,
                })
            }
            _ => None,
        };

        let per_second = NonZeroU32::new(REQUESTS_PER_SECOND).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        tracing::info!(
            "Initialized BinanceClient (testnet={}, authenticated={})",
            testnet,
            credentials.is_some()
        );

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            credentials,
            rate_limiter,
        })
    }

    /// Point the client at a different host (tests, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Append timestamp and recvWindow, then the hex HMAC-SHA256 signature
    fn sign_params(&self, mut params: Vec<(String, String)>) -> Result<(String, &Credentials)> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| anyhow!("API key and secret required for signed requests"))?;

        params.push(("timestamp".into(), Utc::now().timestamp_millis().to_string()));
        params.push(("recvWindow".into(), RECV_WINDOW_MS.to_string()));

        let query = serde_urlencoded::to_string(&params)?;
        let signature = sign_query(&credentials.api_secret, &query)?;
        Ok((format!("{query}&signature={signature}"), credentials))
    }

    async fn get_public(&self, path: &str, params: &[(&str, String)]) -> Result<reqwest::Response> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(params).send().await?;

        let status = response.status();
        if !status.is_success() {
            bail!("{} returned {}: {}", path, status, response.text().await.unwrap_or_default());
        }
        Ok(response)
    }

    async fn send_signed(
        &self,
        method: reqwest::Method,
        path: &str,
        params: Vec<(String, String)>,
    ) -> Result<reqwest::Response> {
        let (query, credentials) = self.sign_params(params)?;
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}?{}", self.base_url, path, query);
        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &credentials.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            bail!("{} returned {}: {}", path, status, response.text().await.unwrap_or_default());
        }
        Ok(response)
    }

    async fn try_fetch_candles(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let params = [
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];
        let raw: Vec<serde_json::Value> = self.get_public("/api/v3/klines", &params).await?.json().await?;

        let candles: Vec<Candle> = raw.iter().filter_map(parse_kline).collect();
        if candles.len() != raw.len() {
            tracing::warn!(
                "Dropped {} malformed klines for {}",
                raw.len() - candles.len(),
                symbol
            );
        }

        tracing::debug!("Fetched {} candles for {}", candles.len(), symbol);
        Ok(candles)
    }

    async fn try_ticker_price(&self, symbol: &str) -> Result<f64> {
        let ticker: TickerPrice = self
            .get_public("/api/v3/ticker/price", &[("symbol", symbol.to_string())])
            .await?
            .json()
            .await?;

        ticker
            .price
            .parse()
            .with_context(|| format!("Invalid ticker price {:?}", ticker.price))
    }

    async fn try_balance(&self, asset: &str) -> Result<Option<f64>> {
        let account: AccountInfo = self
            .send_signed(reqwest::Method::GET, "/api/v3/account", Vec::new())
            .await?
            .json()
            .await?;

        account
            .balances
            .iter()
            .find(|b| b.asset == asset)
            .map(|b| b.free.parse::<f64>().context("Invalid balance value"))
            .transpose()
    }

    async fn try_place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<OrderConfirmation> {
        if !(quantity.is_finite() && quantity > 0.0) {
            bail!("Refusing to submit order with quantity {}", quantity);
        }

        let client_order_id = format!("hb-{}", Uuid::new_v4().simple());
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("side".to_string(), side.as_str().to_string()),
            ("type".to_string(), "MARKET".to_string()),
            ("quantity".to_string(), format_quantity(quantity)),
            ("newClientOrderId".to_string(), client_order_id),
        ];

        let order: OrderResponse = self
            .send_signed(reqwest::Method::POST, "/api/v3/order", params)
            .await?
            .json()
            .await?;

        let executed_qty = order.executed_qty.as_deref().and_then(|q| q.parse::<f64>().ok());
        let quote_qty = order
            .cummulative_quote_qty
            .as_deref()
            .and_then(|q| q.parse::<f64>().ok());
        let avg_price = match (executed_qty, quote_qty) {
            (Some(qty), Some(quote)) if qty > 0.0 => Some(quote / qty),
            _ => None,
        };

        Ok(OrderConfirmation {
            order_id: order.order_id.to_string(),
            symbol: order.symbol,
            side,
            quantity: executed_qty.unwrap_or(quantity),
            price: avg_price,
            timestamp: order
                .transact_time
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
impl MarketDataPort for BinanceClient {
    async fn fetch_candles(&self, symbol: &str, interval: &str, limit: u32) -> Vec<Candle> {
        match self.try_fetch_candles(symbol, interval, limit).await {
            Ok(candles) => candles,
            Err(e) => {
                tracing::error!("Error fetching candles for {}: {:#}", symbol, e);
                Vec::new()
            }
        }
    }

    async fn get_ticker_price(&self, symbol: &str) -> f64 {
        match self.try_ticker_price(symbol).await {
            Ok(price) if price.is_finite() && price > 0.0 => price,
            Ok(price) => {
                tracing::error!("Ticker for {} returned unusable price {}", symbol, price);
                0.0
            }
            Err(e) => {
                tracing::error!("Error fetching ticker price for {}: {:#}", symbol, e);
                0.0
            }
        }
    }
}

#[async_trait]
impl AccountPort for BinanceClient {
    async fn get_balance(&self, asset: &str) -> f64 {
        match self.try_balance(asset).await {
            Ok(Some(balance)) if balance.is_finite() => balance.max(0.0),
            Ok(Some(balance)) => {
                tracing::error!("Balance for {} is not finite: {}", asset, balance);
                0.0
            }
            Ok(None) => {
                tracing::warn!("Asset {} not found in account", asset);
                0.0
            }
            Err(e) => {
                tracing::error!("Error fetching balance for {}: {:#}", asset, e);
                0.0
            }
        }
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Option<OrderConfirmation> {
        match self.try_place_order(symbol, side, quantity).await {
            Ok(confirmation) => {
                tracing::info!(
                    "Order placed: {} {} {} - Order ID: {}",
                    side,
                    confirmation.quantity,
                    symbol,
                    confirmation.order_id
                );
                Some(confirmation)
            }
            Err(e) => {
                tracing::error!("Error placing {} order for {}: {:#}", side, symbol, e);
                None
            }
        }
    }
}

/// Hex-encoded HMAC-SHA256 of `query` keyed with `secret`
fn sign_query(secret: &str, query: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| anyhow!("failed to init signer: {err}"))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Kline rows are arrays: [openTime, open, high, low, close, volume, closeTime, ...]
fn parse_kline(row: &serde_json::Value) -> Option<Candle> {
    let arr = row.as_array()?;
    if arr.len() < 7 {
        return None;
    }

    let decimal = |v: &serde_json::Value| -> Option<f64> {
        v.as_str()
            .and_then(|s| s.parse().ok())
            .or_else(|| v.as_f64())
    };

    Some(Candle {
        open_time: DateTime::<Utc>::from_timestamp_millis(arr[0].as_i64()?)?,
        open: decimal(&arr[1])?,
        high: decimal(&arr[2])?,
        low: decimal(&arr[3])?,
        close: decimal(&arr[4])?,
        volume: decimal(&arr[5])?,
        close_time: DateTime::<Utc>::from_timestamp_millis(arr[6].as_i64()?)?,
    })
}

/// Up to 8 decimals, trailing zeros trimmed
fn format_quantity(quantity: f64) -> String {
    let formatted = format!("{:.8}", quantity);
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const KLINES_BODY: &str = r#"[
        [1700000000000, "100.0", "100.5", "97.5", "98.0", "12.5", 1700000299999, "1225.0", 10, "6.0", "600.0", "0"],
        [1700000300000, "98.0", "99.0", "90.0", "98.5", "30.0", 1700000599999, "2950.0", 25, "15.0", "1500.0", "0"]
    ]"#;

    fn client(server: &mockito::Server) -> BinanceClient {
        BinanceClient::new(true, Some("key".into()), Some("secret".into()))
            .unwrap()
            .with_base_url(server.url())
    }

    #[test]
    fn test_sign_query_matches_reference_vector() {
        // Example from the Binance API documentation
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign_query(secret, query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_format_quantity() {
        assert_eq!(format_quantity(0.02), "0.02");
        assert_eq!(format_quantity(1.0), "1");
        assert_eq!(format_quantity(0.123456789), "0.12345679");
    }

    #[test]
    fn test_parse_kline_rejects_short_rows() {
        let row = serde_json::json!([1700000000000i64, "1", "2"]);
        assert!(parse_kline(&row).is_none());
    }

    #[tokio::test]
    async fn test_fetch_candles() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/klines")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
                Matcher::UrlEncoded("interval".into(), "5m".into()),
                Matcher::UrlEncoded("limit".into(), "2".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(KLINES_BODY)
            .create_async()
            .await;

        let candles = client(&server).fetch_candles("BTCUSDT", "5m", 2).await;

        mock.assert_async().await;
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].low, 90.0);
        assert_eq!(candles[1].close, 98.5);
        assert_eq!(candles[0].open_time.timestamp_millis(), 1_700_000_000_000);
        assert!(candles[0].open_time < candles[1].open_time);
    }

    #[tokio::test]
    async fn test_fetch_candles_returns_empty_on_http_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/klines")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let candles = client(&server).fetch_candles("BTCUSDT", "5m", 100).await;
        assert!(candles.is_empty());
    }

    #[tokio::test]
    async fn test_ticker_price() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/ticker/price")
            .match_query(Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()))
            .with_status(200)
            .with_body(r#"{"symbol":"BTCUSDT","price":"50123.45000000"}"#)
            .create_async()
            .await;

        let price = client(&server).get_ticker_price("BTCUSDT").await;
        assert_eq!(price, 50123.45);
    }

    #[tokio::test]
    async fn test_ticker_price_zero_on_garbage() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/ticker/price")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"symbol":"BTCUSDT","price":"n/a"}"#)
            .create_async()
            .await;

        assert_eq!(client(&server).get_ticker_price("BTCUSDT").await, 0.0);
    }

    #[tokio::test]
    async fn test_balance_is_signed_and_parsed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/account")
            .match_header("X-MBX-APIKEY", "key")
            .match_query(Matcher::AllOf(vec![
                Matcher::Regex("timestamp=\\d+".into()),
                Matcher::Regex("recvWindow=5000".into()),
                Matcher::Regex("signature=[0-9a-f]{64}".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"balances":[{"asset":"BTC","free":"0.5","locked":"0"},{"asset":"USDT","free":"1000.25","locked":"10"}]}"#,
            )
            .create_async()
            .await;

        let balance = client(&server).get_balance("USDT").await;

        mock.assert_async().await;
        assert_eq!(balance, 1000.25);
    }

    #[tokio::test]
    async fn test_missing_asset_balance_is_zero() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/account")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"balances":[{"asset":"BTC","free":"0.5","locked":"0"}]}"#)
            .create_async()
            .await;

        assert_eq!(client(&server).get_balance("USDT").await, 0.0);
    }

    #[tokio::test]
    async fn test_balance_without_credentials_is_zero() {
        let server = mockito::Server::new_async().await;
        let unauthenticated = BinanceClient::new(true, None, None)
            .unwrap()
            .with_base_url(server.url());

        assert_eq!(unauthenticated.get_balance("USDT").await, 0.0);
        assert!(unauthenticated
            .place_market_order("BTCUSDT", OrderSide::Buy, 0.01)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_place_market_order() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v3/order")
            .match_header("X-MBX-APIKEY", "key")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
                Matcher::UrlEncoded("side".into(), "BUY".into()),
                Matcher::UrlEncoded("type".into(), "MARKET".into()),
                Matcher::UrlEncoded("quantity".into(), "0.02".into()),
                Matcher::Regex("newClientOrderId=hb-[0-9a-f]{32}".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"symbol":"BTCUSDT","orderId":28,"clientOrderId":"x","transactTime":1700000600000,
                    "executedQty":"0.02000000","cummulativeQuoteQty":"1000.00000000","status":"FILLED"}"#,
            )
            .create_async()
            .await;

        let confirmation = client(&server)
            .place_market_order("BTCUSDT", OrderSide::Buy, 0.02)
            .await
            .expect("order should be confirmed");

        mock.assert_async().await;
        assert_eq!(confirmation.order_id, "28");
        assert_eq!(confirmation.side, OrderSide::Buy);
        assert_eq!(confirmation.quantity, 0.02);
        assert_eq!(confirmation.price, Some(50_000.0));
        assert_eq!(confirmation.timestamp.timestamp_millis(), 1_700_000_600_000);
    }

    #[tokio::test]
    async fn test_rejected_order_returns_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v3/order")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"code":-2010,"msg":"Account has insufficient balance for requested action."}"#)
            .create_async()
            .await;

        let result = client(&server)
            .place_market_order("BTCUSDT", OrderSide::Buy, 0.02)
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_non_positive_quantity_never_hits_the_wire() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v3/order")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let result = client(&server)
            .place_market_order("BTCUSDT", OrderSide::Buy, 0.0)
            .await;

        assert!(result.is_none());
        mock.assert_async().await;
    }
}

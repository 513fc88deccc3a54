pub mod binance;
pub mod paper;

use async_trait::async_trait;

use crate::models::{Candle, OrderConfirmation, OrderSide};

pub use binance::BinanceClient;
pub use paper::PaperAccount;

/// Source of candles and prices
///
/// Implementations never fail into the caller: recoverable errors are logged
/// and surface as an empty candle list or a 0.0 price.
#[async_trait]
pub trait MarketDataPort: Send + Sync {
    /// Up to `limit` candles, oldest first
    async fn fetch_candles(&self, symbol: &str, interval: &str, limit: u32) -> Vec<Candle>;

    /// Last traded price, or 0.0 on failure
    async fn get_ticker_price(&self, symbol: &str) -> f64;
}

/// Account balance and order entry
#[async_trait]
pub trait AccountPort: Send + Sync {
    /// Free balance of `asset`; 0.0 on failure or when the asset is missing
    async fn get_balance(&self, asset: &str) -> f64;

    /// Submit a market order; `None` when the venue did not confirm it
    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Option<OrderConfirmation>;
}

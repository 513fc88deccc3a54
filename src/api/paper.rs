use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AccountPort, MarketDataPort};
use crate::models::{OrderConfirmation, OrderSide};

/// Relative slack when checking affordability; sizing the full balance
/// can overshoot it by a few ULPs
const FILL_TOLERANCE: f64 = 1e-9;

/// Simulated account that fills market orders at the live ticker price
///
/// Balances live in memory only. A buy debits `quantity * price` of the quote
/// asset and credits the base asset; a sell does the reverse. Orders that
/// cannot be afforded are rejected rather than partially filled.
pub struct PaperAccount {
    market: Arc<dyn MarketDataPort>,
    quote_asset: String,
    balances: Mutex<HashMap<String, f64>>,
}

impl PaperAccount {
    pub fn new(market: Arc<dyn MarketDataPort>, quote_asset: &str, initial_balance: f64) -> Self {
        let mut balances = HashMap::new();
        balances.insert(quote_asset.to_string(), initial_balance.max(0.0));

        tracing::info!(
            "📝 Paper trading account with {:.2} {}",
            initial_balance,
            quote_asset
        );

        Self {
            market,
            quote_asset: quote_asset.to_string(),
            balances: Mutex::new(balances),
        }
    }

    /// Base asset of a symbol quoted in this account's quote asset (BTCUSDT -> BTC)
    fn base_asset<'a>(&self, symbol: &'a str) -> &'a str {
        symbol
            .strip_suffix(self.quote_asset.as_str())
            .filter(|base| !base.is_empty())
            .unwrap_or(symbol)
    }
}

#[async_trait]
impl AccountPort for PaperAccount {
    async fn get_balance(&self, asset: &str) -> f64 {
        let balances = self.balances.lock().await;
        balances.get(asset).copied().unwrap_or(0.0)
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Option<OrderConfirmation> {
        if !(quantity.is_finite() && quantity > 0.0) {
            tracing::error!("Paper order rejected: invalid quantity {}", quantity);
            return None;
        }

        let price = self.market.get_ticker_price(symbol).await;
        if price <= 0.0 {
            tracing::error!("Paper order rejected: no price for {}", symbol);
            return None;
        }

        let notional = quantity * price;
        let base = self.base_asset(symbol).to_string();
        let mut balances = self.balances.lock().await;

        let (debit_asset, debit_amount, credit_asset, credit_amount) = match side {
            OrderSide::Buy => (self.quote_asset.clone(), notional, base, quantity),
            OrderSide::Sell => (base, quantity, self.quote_asset.clone(), notional),
        };

        let available = balances.get(&debit_asset).copied().unwrap_or(0.0);
        if debit_amount > available * (1.0 + FILL_TOLERANCE) {
            tracing::warn!(
                "Paper order rejected: need {:.8} {}, have {:.8}",
                debit_amount,
                debit_asset,
                available
            );
            return None;
        }

        *balances.entry(debit_asset).or_insert(0.0) -= debit_amount.min(available);
        *balances.entry(credit_asset).or_insert(0.0) += credit_amount;

        let confirmation = OrderConfirmation {
            order_id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            quantity,
            price: Some(price),
            timestamp: Utc::now(),
        };

        tracing::info!(
            "📝 Paper {} {:.6} {} @ {:.2} (order {})",
            side,
            quantity,
            symbol,
            price,
            confirmation.order_id
        );

        Some(confirmation)
    }
}

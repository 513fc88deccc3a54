use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// OHLCV candlestick as returned by the exchange
///
/// Sequences are ordered oldest-to-newest. The last candle may still be forming.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: DateTime<Utc>,
}

impl Candle {
    /// Absolute size of the real body
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn body_top(&self) -> f64 {
        self.open.max(self.close)
    }

    pub fn body_bottom(&self) -> f64 {
        self.open.min(self.close)
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.body_top()
    }

    pub fn lower_wick(&self) -> f64 {
        self.body_bottom() - self.low
    }

    /// High-to-low range
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }
}

/// Output of a signal engine for a single cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalDecision {
    pub is_buy: bool,
    pub pattern: Option<String>,
    /// Confidence in [0.0, 1.0]. Only a probability for the model-based engine.
    pub score: f64,
}

impl SignalDecision {
    /// The "do nothing" decision
    pub fn none() -> Self {
        Self {
            is_buy: false,
            pattern: None,
            score: 0.0,
        }
    }

    pub fn buy(pattern: &str, score: f64) -> Self {
        Self {
            is_buy: true,
            pattern: Some(pattern.to_string()),
            score: score.clamp(0.0, 1.0),
        }
    }
}

/// Sizing result, consumed once for order placement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionPlan {
    pub entry_price: f64,
    pub position_size: f64,
    pub stop_loss_price: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Acknowledgement returned by the account port for a submitted order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderConfirmation {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    /// Average fill price, when the venue reports one
    pub price: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

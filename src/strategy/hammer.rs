use super::SignalEngine;
use crate::models::{Candle, SignalDecision};

pub const PATTERN_TAG: &str = "bullish_hammer";

/// Body must sit in the top 40% of the candle
const MIN_BODY_POSITION: f64 = 0.6;
const MIN_LOWER_WICK_TO_BODY: f64 = 2.0;

/// Rule-based bullish hammer detector
///
/// Looks only at the newest candle and the close of the one before it:
/// - lower wick at least twice the body
/// - body in the upper part of the range
/// - upper wick no longer than the body
/// - previous close above the current close (downtrend)
#[derive(Debug, Clone, Default)]
pub struct RuleBasedHammerDetector;

impl RuleBasedHammerDetector {
    pub fn new() -> Self {
        Self
    }

    /// Confidence heuristic, only meaningful when the buy condition holds
    fn score(lower_wick: f64, upper_wick: f64, body: f64, body_position: f64, downtrend: bool) -> f64 {
        let lower_term = if lower_wick >= MIN_LOWER_WICK_TO_BODY * body {
            1.0
        } else {
            lower_wick / (MIN_LOWER_WICK_TO_BODY * body)
        };
        let upper_term = if upper_wick <= body {
            1.0
        } else {
            (1.0 - upper_wick / body).max(0.0)
        };
        let trend_term = if downtrend { 1.0 } else { 0.5 };

        (0.3 * lower_term + 0.3 * body_position + 0.2 * upper_term + 0.2 * trend_term).min(1.0)
    }
}

impl SignalEngine for RuleBasedHammerDetector {
    fn generate_signal(&self, candles: &[Candle]) -> SignalDecision {
        if candles.len() < self.min_candles_required() {
            return SignalDecision::none();
        }

        let current = &candles[candles.len() - 1];
        let previous = &candles[candles.len() - 2];

        let body = current.body();
        let upper_wick = current.upper_wick();
        let lower_wick = current.lower_wick();
        let range = current.range();

        // Ratios are undefined on a flat candle or a doji
        if range == 0.0 || body == 0.0 {
            return SignalDecision::none();
        }

        let lower_wick_ratio = lower_wick / range;
        let body_position = (current.body_bottom() - current.low) / range;
        let downtrend = previous.close > current.close;

        tracing::debug!(
            body,
            upper_wick,
            lower_wick,
            lower_wick_ratio,
            body_position,
            downtrend,
            "Hammer geometry"
        );

        let is_hammer = lower_wick >= MIN_LOWER_WICK_TO_BODY * body
            && body_position >= MIN_BODY_POSITION
            && upper_wick <= body
            && downtrend;

        if !is_hammer {
            return SignalDecision::none();
        }

        let score = Self::score(lower_wick, upper_wick, body, body_position, downtrend);
        tracing::info!("🔨 Bullish hammer detected! Score: {:.2}", score);

        SignalDecision::buy(PATTERN_TAG, score)
    }

    fn name(&self) -> &str {
        "RuleBasedHammerDetector"
    }

    fn min_candles_required(&self) -> usize {
        2
    }
}

use crate::models::{Candle, PositionPlan};
use crate::settings::ConfigError;

/// Per-trade risk limits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskParameters {
    /// Fraction of the balance put at risk per trade
    pub risk_percent: f64,
    /// Distance of the stop below entry, as a fraction of entry
    pub stop_loss_percent: f64,
}

impl RiskParameters {
    pub fn new(risk_percent: f64, stop_loss_percent: f64) -> Result<Self, ConfigError> {
        for (field, value) in [
            ("risk_percent", risk_percent),
            ("stop_loss_percent", stop_loss_percent),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{} is not in (0, 1)", value),
                });
            }
        }

        Ok(Self {
            risk_percent,
            stop_loss_percent,
        })
    }
}

impl Default for RiskParameters {
    fn default() -> Self {
        Self {
            risk_percent: 0.02,      // 2% of balance per trade
            stop_loss_percent: 0.02, // stop 2% below entry
        }
    }
}

/// Converts account balance and entry price into a position plan
#[derive(Debug, Clone)]
pub struct RiskManager {
    params: RiskParameters,
}

impl RiskManager {
    pub fn new(params: RiskParameters) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &RiskParameters {
        &self.params
    }

    /// Quantity such that hitting the stop loses `balance * risk_percent`
    ///
    /// Returns 0.0 when the stop distance is zero, which cannot be sized.
    pub fn calculate_position_size(
        balance: f64,
        entry_price: f64,
        risk_percent: f64,
        stop_loss_percent: f64,
    ) -> f64 {
        let risk_amount = balance * risk_percent;
        let stop_loss_price = entry_price * (1.0 - stop_loss_percent);
        let price_diff = entry_price - stop_loss_price;

        if price_diff == 0.0 || !price_diff.is_finite() || price_diff < 0.0 {
            tracing::warn!(
                entry_price,
                stop_loss_percent,
                "Stop distance is {}, cannot size position",
                price_diff
            );
            return 0.0;
        }

        let position_size = risk_amount / price_diff;

        tracing::info!(
            "Balance: {:.2}, Risk: {:.2}, Stop distance: {:.4}, Position size: {:.6}",
            balance,
            risk_amount,
            price_diff,
            position_size
        );

        position_size
    }

    /// Stop anchored just below the newest candle's low
    ///
    /// Never lower than `entry_price * (1 - 2 * stop_loss_percent)`, so a deep
    /// wick cannot widen the worst-case loss beyond twice the configured stop.
    pub fn calculate_stop_loss_price(
        candles: &[Candle],
        entry_price: f64,
        stop_loss_percent: f64,
    ) -> f64 {
        let Some(last) = candles.last() else {
            return entry_price * (1.0 - stop_loss_percent);
        };

        let anchored = last.low * (1.0 - stop_loss_percent);
        let floor = entry_price * (1.0 - 2.0 * stop_loss_percent);

        anchored.max(floor)
    }

    /// Size and stop for a market entry at `entry_price`
    pub fn plan_position(&self, candles: &[Candle], balance: f64, entry_price: f64) -> PositionPlan {
        let position_size = Self::calculate_position_size(
            balance,
            entry_price,
            self.params.risk_percent,
            self.params.stop_loss_percent,
        );
        let stop_loss_price =
            Self::calculate_stop_loss_price(candles, entry_price, self.params.stop_loss_percent);

        PositionPlan {
            entry_price,
            position_size,
            stop_loss_price,
        }
    }
}

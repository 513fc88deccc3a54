use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::broadcast;

use super::{CooldownTracker, ShutdownSignal};
use crate::api::{AccountPort, MarketDataPort};
use crate::models::{OrderConfirmation, OrderSide};
use crate::risk::RiskManager;
use crate::settings::BotConfig;
use crate::strategy::SignalEngine;

// ============================================================================
// Time
// ============================================================================

/// Wall-clock source, swappable in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ============================================================================
// Loop types
// ============================================================================

/// Loop lifecycle; transitions are published to `subscribe_state` receivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    ShuttingDown,
    Stopped,
}

/// What a single cycle ended with
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Market data port returned no candles
    NoData,
    NoSignal,
    CoolingDown { remaining_secs: i64 },
    PriceUnavailable,
    /// Sizing produced nothing to buy (zero balance, degenerate stop)
    InsufficientSize,
    OrderFailed,
    OrderPlaced(OrderConfirmation),
    /// Unexpected error or panic inside the cycle; the loop carries on
    Fault(String),
}

impl CycleOutcome {
    pub fn is_order_placed(&self) -> bool {
        matches!(self, CycleOutcome::OrderPlaced(_))
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::NoData => write!(f, "no data"),
            CycleOutcome::NoSignal => write!(f, "no signal"),
            CycleOutcome::CoolingDown { remaining_secs } => {
                write!(f, "cooling down ({}s left)", remaining_secs)
            }
            CycleOutcome::PriceUnavailable => write!(f, "price unavailable"),
            CycleOutcome::InsufficientSize => write!(f, "insufficient size"),
            CycleOutcome::OrderFailed => write!(f, "order failed"),
            CycleOutcome::OrderPlaced(c) => write!(f, "order placed ({})", c.order_id),
            CycleOutcome::Fault(msg) => write!(f, "fault: {}", msg),
        }
    }
}

/// Per-loop settings taken from the bot configuration
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub symbol: String,
    pub interval: String,
    pub candle_count: u32,
    pub quote_asset: String,
    pub check_interval: Duration,
}

impl From<&BotConfig> for LoopSettings {
    fn from(cfg: &BotConfig) -> Self {
        Self {
            symbol: cfg.symbol.clone(),
            interval: cfg.interval.clone(),
            candle_count: cfg.candle_count,
            quote_asset: cfg.quote_asset.clone(),
            check_interval: Duration::from_secs(cfg.check_interval_secs),
        }
    }
}

// ============================================================================
// Execution loop
// ============================================================================

/// Polls market data, asks the signal engine, sizes and places BUY orders
///
/// Cycles run strictly one after another. The cooldown tracker is owned here
/// and only advanced after the account confirms an order.
pub struct ExecutionLoop {
    settings: LoopSettings,
    market: Arc<dyn MarketDataPort>,
    account: Arc<dyn AccountPort>,
    engine: Box<dyn SignalEngine>,
    risk: RiskManager,
    cooldown: CooldownTracker,
    clock: Arc<dyn Clock>,
    state: LoopState,
    state_tx: broadcast::Sender<LoopState>,
}

impl ExecutionLoop {
    pub fn new(
        settings: LoopSettings,
        market: Arc<dyn MarketDataPort>,
        account: Arc<dyn AccountPort>,
        engine: Box<dyn SignalEngine>,
        risk: RiskManager,
        cooldown: CooldownTracker,
    ) -> Self {
        Self {
            settings,
            market,
            account,
            engine,
            risk,
            cooldown,
            clock: Arc::new(SystemClock),
            state: LoopState::Running,
            state_tx: broadcast::channel(8).0,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Receive every state transition made after this call
    pub fn subscribe_state(&self) -> broadcast::Receiver<LoopState> {
        self.state_tx.subscribe()
    }

    fn transition(&mut self, state: LoopState) {
        self.state = state;
        // No subscribers is fine
        let _ = self.state_tx.send(state);
    }

    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Run cycles until shutdown is requested
    ///
    /// Shutdown is honoured between cycles and during the inter-cycle wait,
    /// never in the middle of one.
    pub async fn run(&mut self, mut shutdown: ShutdownSignal) {
        if self.state != LoopState::Running {
            tracing::warn!("Trading loop already {:?}, not starting", self.state);
            return;
        }

        tracing::info!(
            "💹 Trading loop starting: {} {} every {:?} using {}",
            self.settings.symbol,
            self.settings.interval,
            self.settings.check_interval,
            self.engine.name()
        );

        loop {
            if shutdown.is_requested() {
                self.transition(LoopState::ShuttingDown);
                tracing::info!("⚠️  Shutdown requested, stopping trading loop");
                break;
            }

            let outcome = self.run_cycle().await;
            tracing::debug!("Cycle finished: {}", outcome);

            tokio::select! {
                _ = tokio::time::sleep(self.settings.check_interval) => {}
                _ = shutdown.requested() => {}
            }
        }

        self.transition(LoopState::Stopped);
        tracing::info!("👋 Trading loop stopped");
    }

    /// Execute one cycle, containing any error or panic as `Fault`
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        match AssertUnwindSafe(self.try_cycle()).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::error!("Error in trading cycle: {:#}", e);
                CycleOutcome::Fault(format!("{:#}", e))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!("Panic in trading cycle: {}", message);
                CycleOutcome::Fault(message)
            }
        }
    }

    async fn try_cycle(&mut self) -> anyhow::Result<CycleOutcome> {
        let symbol = self.settings.symbol.as_str();

        let candles = self
            .market
            .fetch_candles(symbol, &self.settings.interval, self.settings.candle_count)
            .await;
        if candles.is_empty() {
            tracing::warn!("No candles received for {}, skipping cycle", symbol);
            return Ok(CycleOutcome::NoData);
        }

        let signal = self.engine.generate_signal(&candles);
        tracing::info!(
            "{} signal: buy={} pattern={} score={:.3} ({} candles)",
            self.engine.name(),
            signal.is_buy,
            signal.pattern.as_deref().unwrap_or("-"),
            signal.score,
            candles.len()
        );
        if !signal.is_buy {
            return Ok(CycleOutcome::NoSignal);
        }

        let now = self.clock.now();
        if !self.cooldown.can_trade(now) {
            let remaining_secs = self.cooldown.remaining_secs(now);
            tracing::info!("⏳ Trade cooldown active, {}s remaining", remaining_secs);
            return Ok(CycleOutcome::CoolingDown { remaining_secs });
        }

        let price = self.market.get_ticker_price(symbol).await;
        if !(price.is_finite() && price > 0.0) {
            tracing::error!("✗ Failed to get current price for {}", symbol);
            return Ok(CycleOutcome::PriceUnavailable);
        }

        let balance = self.account.get_balance(&self.settings.quote_asset).await;
        let plan = self.risk.plan_position(&candles, balance, price);
        if !plan.position_size.is_finite() {
            anyhow::bail!("position size is not finite: {:?}", plan);
        }
        if plan.position_size <= 0.0 {
            tracing::warn!(
                "Position size is zero (balance {:.2} {}), skipping trade",
                balance,
                self.settings.quote_asset
            );
            return Ok(CycleOutcome::InsufficientSize);
        }

        tracing::info!(
            "📈 Placing BUY {:.8} {} @ ~{:.2} (stop {:.2}, balance {:.2} {})",
            plan.position_size,
            symbol,
            plan.entry_price,
            plan.stop_loss_price,
            balance,
            self.settings.quote_asset
        );

        let submitted_at = self.clock.now();
        match self
            .account
            .place_market_order(symbol, OrderSide::Buy, plan.position_size)
            .await
        {
            Some(confirmation) => {
                self.cooldown.record_trade(submitted_at);
                tracing::info!(
                    "✅ Order {} confirmed: {} {} {}",
                    confirmation.order_id,
                    confirmation.side,
                    confirmation.quantity,
                    confirmation.symbol
                );
                Ok(CycleOutcome::OrderPlaced(confirmation))
            }
            None => {
                tracing::error!("✗ Failed to place BUY order for {}", symbol);
                Ok(CycleOutcome::OrderFailed)
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

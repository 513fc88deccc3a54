use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use hammerbot::api::{AccountPort, BinanceClient, MarketDataPort, PaperAccount};
use hammerbot::execution::{
    shutdown_channel, CooldownTracker, ExecutionLoop, LoopSettings, ShutdownHandle,
};
use hammerbot::risk::RiskManager;
use hammerbot::settings::{BotConfig, ExchangeKind};
use hammerbot::strategy::{build_signal_engine, EngineConfig};
use hammerbot::Result;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "hammerbot=info";

#[derive(Parser)]
#[command(name = "hammerbot", about = "Bullish hammer trading bot")]
struct Cli {
    /// Path to a TOML config file. Defaults to ./hammerbot.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Signal engine: numeric, vision (alias cv) or auto.
    #[arg(long)]
    engine: Option<String>,

    /// Trading pair, e.g. BTCUSDT.
    #[arg(long)]
    symbol: Option<String>,

    /// Where orders go.
    #[arg(long, value_enum)]
    exchange: Option<ExchangeKind>,

    /// Run a single cycle and exit.
    #[arg(long, default_value_t = false)]
    dry_run_once: bool,
}

impl Cli {
    /// CLI flags win over file and environment
    fn apply_overrides(&self, cfg: &mut BotConfig) {
        if let Some(engine) = &self.engine {
            cfg.engine_type = engine.clone();
        }
        if let Some(symbol) = &self.symbol {
            cfg.symbol = symbol.to_uppercase();
        }
        if let Some(exchange) = self.exchange {
            cfg.exchange = exchange;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let mut cfg = BotConfig::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut cfg);
    cfg.validate()?;

    setup_logging(cfg.log_level.as_deref());

    tracing::info!("🚀 hammerbot starting");
    log_configuration(&cfg);

    let engine = build_signal_engine(&EngineConfig::from(&cfg))?;
    let risk = RiskManager::new(cfg.risk_parameters()?);

    let exchange = create_binance_client(&cfg)?;
    let market: Arc<dyn MarketDataPort> = Arc::new(exchange.clone());
    let account: Arc<dyn AccountPort> = match cfg.exchange {
        ExchangeKind::Binance => {
            if cfg.api_key.is_none() || cfg.api_secret.is_none() {
                tracing::warn!("No Binance API credentials configured, orders will fail");
            }
            Arc::new(exchange)
        }
        ExchangeKind::Paper => Arc::new(PaperAccount::new(
            market.clone(),
            &cfg.quote_asset,
            cfg.paper_balance,
        )),
    };

    let mut trading_loop = ExecutionLoop::new(
        LoopSettings::from(&cfg),
        market,
        account,
        engine,
        risk,
        CooldownTracker::new(cfg.min_trade_interval_seconds),
    );

    if cli.dry_run_once {
        let outcome = trading_loop.run_cycle().await;
        tracing::info!("Single cycle finished: {}", outcome);
        return Ok(());
    }

    let (shutdown_handle, shutdown_signal) = shutdown_channel();
    tokio::spawn(listen_for_shutdown(shutdown_handle));

    tracing::info!("Press Ctrl+C to stop...");
    trading_loop.run(shutdown_signal).await;

    tracing::info!("👋 hammerbot stopped");
    Ok(())
}

// ============================================================================
// Initialization Functions
// ============================================================================

/// `RUST_LOG` wins, then the `log_level` config key, then the default
fn setup_logging(log_level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.unwrap_or(DEFAULT_LOG_FILTER)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn log_configuration(cfg: &BotConfig) {
    tracing::info!("📊 Configuration:");
    tracing::info!("  Symbol: {} ({})", cfg.symbol, cfg.interval);
    tracing::info!("  Candles per cycle: {}", cfg.candle_count);
    tracing::info!("  Risk per trade: {}%", cfg.risk_percent * 100.0);
    tracing::info!("  Stop loss: {}%", cfg.stop_loss_percent * 100.0);
    tracing::info!("  Min trade interval: {}s", cfg.min_trade_interval_seconds);
    tracing::info!("  Check interval: {}s", cfg.check_interval_secs);
    tracing::info!("  Engine: {} (threshold {})", cfg.engine_type, cfg.threshold);
    tracing::info!(
        "  Exchange: {:?}{}",
        cfg.exchange,
        if cfg.testnet { " (testnet)" } else { "" }
    );
}

fn create_binance_client(cfg: &BotConfig) -> Result<BinanceClient> {
    let client = BinanceClient::new(cfg.testnet, cfg.api_key.clone(), cfg.api_secret.clone())?;
    Ok(match &cfg.base_url {
        Some(url) => client.with_base_url(url.clone()),
        None => client,
    })
}

// ============================================================================
// Shutdown
// ============================================================================

async fn listen_for_shutdown(handle: ShutdownHandle) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => tracing::info!("⚠️  Received Ctrl+C, shutting down..."),
            Err(e) => {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                terminate().await;
                tracing::info!("⚠️  Received SIGTERM, shutting down...");
            }
        },
        _ = terminate() => tracing::info!("⚠️  Received SIGTERM, shutting down..."),
    }

    handle.trigger();
}

async fn terminate() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }

    #[cfg(not(unix))]
    std::future::pending::<()>().await;
}

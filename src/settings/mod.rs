// Process-level configuration, read once at startup
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::risk::RiskParameters;

const ENV_PREFIX: &str = "HAMMERBOT";
pub const DEFAULT_CONFIG_FILE: &str = "hammerbot.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Which venue the account port talks to
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Binance,
    Paper,
}

/// Immutable bot configuration
///
/// Layering: defaults → optional TOML file → `HAMMERBOT_*` env vars → CLI overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub symbol: String,
    pub interval: String,
    pub candle_count: u32,
    /// Asset the account balance is read in (e.g. USDT for BTCUSDT)
    pub quote_asset: String,

    pub risk_percent: f64,
    pub stop_loss_percent: f64,
    pub min_trade_interval_seconds: u64,
    pub check_interval_secs: u64,

    pub engine_type: String,
    pub threshold: f64,
    pub model_weights_path: PathBuf,
    /// When set, the vision engine writes the chart it classified to `current_chart.json` here
    pub chart_image_dir: Option<PathBuf>,

    pub exchange: ExchangeKind,
    pub testnet: bool,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    /// Override for the REST base URL (tests, proxies)
    pub base_url: Option<String>,
    pub paper_balance: f64,

    pub log_level: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            interval: "5m".to_string(),
            candle_count: 100,
            quote_asset: "USDT".to_string(),
            risk_percent: 0.02,
            stop_loss_percent: 0.02,
            min_trade_interval_seconds: 300,
            check_interval_secs: 10,
            engine_type: "auto".to_string(),
            threshold: 0.7,
            model_weights_path: PathBuf::from("models/cv_hammer.json"),
            chart_image_dir: None,
            exchange: ExchangeKind::Paper,
            testnet: true,
            api_key: None,
            api_secret: None,
            base_url: None,
            paper_balance: 10_000.0,
            log_level: None,
        }
    }
}

impl BotConfig {
    /// Load configuration from an optional file plus the environment
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let settings = config::Config::builder()
            .add_source(config::File::from(file).required(path.is_some()))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let cfg: BotConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the loop cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn open_unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
            if value > 0.0 && value < 1.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    field,
                    reason: format!("{} is not in (0, 1)", value),
                })
            }
        }

        open_unit("risk_percent", self.risk_percent)?;
        open_unit("stop_loss_percent", self.stop_loss_percent)?;

        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::Invalid {
                field: "threshold",
                reason: format!("{} is not in [0, 1]", self.threshold),
            });
        }
        if self.candle_count < 2 {
            return Err(ConfigError::Invalid {
                field: "candle_count",
                reason: "at least 2 candles are needed to detect a pattern".to_string(),
            });
        }
        if self.check_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "check_interval_secs",
                reason: "must be at least 1 second".to_string(),
            });
        }
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "symbol",
                reason: "must not be empty".to_string(),
            });
        }
        if self.exchange == ExchangeKind::Paper && self.paper_balance < 0.0 {
            return Err(ConfigError::Invalid {
                field: "paper_balance",
                reason: "must not be negative".to_string(),
            });
        }

        Ok(())
    }

    pub fn risk_parameters(&self) -> Result<RiskParameters, ConfigError> {
        RiskParameters::new(self.risk_percent, self.stop_loss_percent)
    }
}

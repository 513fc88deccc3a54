// Signal generation module
pub mod classifier;
pub mod hammer;
pub mod vision;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use crate::models::{Candle, SignalDecision};
use crate::settings::BotConfig;
use classifier::LinearClassifier;
pub use hammer::RuleBasedHammerDetector;
pub use vision::ModelBasedHammerDetector;

/// Base trait for all signal engines
///
/// Implementations are pure functions of the candles (and any loaded model).
/// Insufficient data is not an error: it yields `SignalDecision::none()`.
pub trait SignalEngine: Send + Sync {
    /// Evaluate the newest candle(s) and decide whether to enter
    fn generate_signal(&self, candles: &[Candle]) -> SignalDecision;

    /// Engine name, for logging
    fn name(&self) -> &str;

    /// Minimum candles needed before a buy can ever be emitted
    fn min_candles_required(&self) -> usize;
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unsupported signal engine type `{0}` (expected numeric, vision or auto)")]
    UnsupportedEngine(String),

    #[error("failed to load model weights from {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineType {
    Numeric,
    Vision,
    Auto,
}

impl FromStr for EngineType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "numeric" => Ok(EngineType::Numeric),
            "vision" | "cv" => Ok(EngineType::Vision),
            "auto" => Ok(EngineType::Auto),
            _ => Err(EngineError::UnsupportedEngine(s.to_string())),
        }
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineType::Numeric => "numeric",
            EngineType::Vision => "vision",
            EngineType::Auto => "auto",
        };
        f.write_str(name)
    }
}

/// Settings the engine factory recognises
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub engine_type: String,
    pub threshold: f64,
    pub model_weights_path: PathBuf,
    pub chart_image_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine_type: "auto".to_string(),
            threshold: vision::DEFAULT_THRESHOLD,
            model_weights_path: PathBuf::from("models/cv_hammer.json"),
            chart_image_dir: None,
        }
    }
}

impl From<&BotConfig> for EngineConfig {
    fn from(cfg: &BotConfig) -> Self {
        Self {
            engine_type: cfg.engine_type.clone(),
            threshold: cfg.threshold,
            model_weights_path: cfg.model_weights_path.clone(),
            chart_image_dir: cfg.chart_image_dir.clone(),
        }
    }
}

/// Select and construct the signal engine, once, at startup
///
/// - `numeric`: rule-based detector
/// - `vision`: model-based detector, falling back to rule-based if the weights are missing
/// - `auto`: model-based iff the weights artifact exists
///
/// Unknown engine types and unloadable weights are fatal.
pub fn build_signal_engine(config: &EngineConfig) -> Result<Box<dyn SignalEngine>, EngineError> {
    let engine_type: EngineType = config.engine_type.parse()?;
    let weights = config.model_weights_path.as_path();

    match engine_type {
        EngineType::Numeric => {
            tracing::info!("Using RuleBasedHammerDetector");
            Ok(Box::new(RuleBasedHammerDetector::new()))
        }
        EngineType::Vision if !weights.exists() => {
            tracing::warn!(
                "CV model weights not found at {}, falling back to rule-based engine",
                weights.display()
            );
            Ok(Box::new(RuleBasedHammerDetector::new()))
        }
        EngineType::Vision => {
            tracing::info!("Using ModelBasedHammerDetector with model at {}", weights.display());
            load_vision_engine(weights, config)
        }
        EngineType::Auto if weights.exists() => {
            tracing::info!(
                "Auto-detected CV model at {}, using ModelBasedHammerDetector",
                weights.display()
            );
            load_vision_engine(weights, config)
        }
        EngineType::Auto => {
            tracing::info!("No CV model found, using RuleBasedHammerDetector");
            Ok(Box::new(RuleBasedHammerDetector::new()))
        }
    }
}

fn load_vision_engine(weights: &Path, config: &EngineConfig) -> Result<Box<dyn SignalEngine>, EngineError> {
    let classifier = LinearClassifier::from_file(weights).map_err(|e| EngineError::ModelLoad {
        path: weights.to_path_buf(),
        reason: format!("{:#}", e),
    })?;

    let mut detector = ModelBasedHammerDetector::new(Box::new(classifier), config.threshold);
    if let Some(dir) = &config.chart_image_dir {
        detector = detector.with_chart_dump(dir.clone());
    }
    Ok(Box::new(detector))
}

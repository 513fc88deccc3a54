// Core modules
pub mod api;
pub mod charting;
pub mod execution;
pub mod models;
pub mod risk;
pub mod settings;
pub mod strategy;

// Re-export commonly used types
pub use api::{AccountPort, MarketDataPort};
pub use execution::{CooldownTracker, CycleOutcome, ExecutionLoop, LoopState};
pub use models::*;
pub use risk::{RiskManager, RiskParameters};
pub use settings::BotConfig;
pub use strategy::SignalEngine;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

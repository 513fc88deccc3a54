// Risk management module
pub mod position_sizing;

pub use position_sizing::{RiskManager, RiskParameters};

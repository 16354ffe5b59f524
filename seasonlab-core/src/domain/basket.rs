//! Basket strategy entries.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::params::DetectParams;

fn default_visible() -> bool {
    true
}

/// One symbol + window-detection setting inside a basket.
///
/// `symbol` may list several comma-separated tickers; such an entry trades a
/// blended series of all of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketStrategy {
    pub symbol: String,
    pub window_size: u32,
    pub threshold: f64,
    /// Saved capital weight; 0 means unset. Baskets whose visible strategies
    /// carry positive weights run at those weights, rescaled to sum to 1.
    #[serde(default)]
    pub weight: f64,
    /// Hidden strategies stay in the list but take no part in any computation.
    #[serde(default = "default_visible")]
    pub visible: bool,
}

impl BasketStrategy {
    pub fn new(symbol: impl Into<String>, window_size: u32, threshold: f64) -> Self {
        Self {
            symbol: symbol.into(),
            window_size,
            threshold,
            weight: 0.0,
            visible: true,
        }
    }

    /// Identity used for weight maps and for matching strategies across calls.
    pub fn key(&self) -> String {
        format!("{}:{}@{}", self.symbol, self.window_size, self.threshold)
    }

    pub fn detect_params(&self) -> Result<DetectParams, EngineError> {
        DetectParams::new(self.window_size, self.threshold)
    }

    /// Individual tickers named by `symbol`.
    pub fn symbols(&self) -> Vec<&str> {
        self.symbol
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Visible entries only, in list order.
pub fn visible(strategies: &[BasketStrategy]) -> impl Iterator<Item = &BasketStrategy> {
    strategies.iter().filter(|s| s.visible)
}

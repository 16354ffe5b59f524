//! Weight schemes: produce basket weight maps for the allocator.
//!
//! Schemes translate per-strategy information (nothing, saved weights,
//! trailing returns, market caps) into a [`WeightMap`] keyed by
//! [`BasketStrategy::key`]. Every scheme covers exactly the visible
//! strategies and the result always passes [`validate_weights`].
//!
//! # Non-Responsibilities
//! - Schemes do NOT decide when a strategy is in the market
//! - Schemes do NOT renormalize per day (the allocator does that)

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use seasonlab_core::engine::{equal_weights, validate_weights};
use seasonlab_core::{BasketStrategy, EngineError, WeightMap};

/// Default minimum weight per strategy for [`ReturnWeighted`].
pub const DEFAULT_WEIGHT_FLOOR: f64 = 0.05;

pub trait WeightScheme: Send + Sync {
    fn weights(&self, strategies: &[BasketStrategy]) -> Result<WeightMap, EngineError>;

    /// Scheme name for logs and JSON output.
    fn name(&self) -> &str;
}

/// Scheme selector carried by basket requests and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
    Equal,
    /// Saved per-strategy weights; equal when none are saved.
    Stored,
    Return,
    Cap,
}

impl FromStr for Weighting {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equal" => Ok(Self::Equal),
            "stored" | "saved" => Ok(Self::Stored),
            "return" | "returns" => Ok(Self::Return),
            "cap" | "market_cap" => Ok(Self::Cap),
            other => Err(EngineError::invalid(format!(
                "unknown weighting '{other}' (expected equal, stored, return or cap)"
            ))),
        }
    }
}

impl fmt::Display for Weighting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Equal => "equal",
            Self::Stored => "stored",
            Self::Return => "return",
            Self::Cap => "cap",
        })
    }
}

/// `1/N` across visible strategies.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualWeight;

impl WeightScheme for EqualWeight {
    fn weights(&self, strategies: &[BasketStrategy]) -> Result<WeightMap, EngineError> {
        ensure_visible(strategies)?;
        Ok(equal_weights(strategies))
    }

    fn name(&self) -> &str {
        "equal"
    }
}

/// The weights saved on the strategies, rescaled over the visible ones.
///
/// Hidden strategies drop out and the rest are divided by their sum, so a
/// basket saved at 0.6/0.3/0.1 with the last one hidden runs at 2/3 and 1/3.
/// Equal weights when no visible strategy carries a positive weight.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoredWeight;

impl StoredWeight {
    pub fn has_weights(strategies: &[BasketStrategy]) -> bool {
        strategies.iter().any(|s| s.visible && s.weight > 0.0)
    }
}

impl WeightScheme for StoredWeight {
    fn weights(&self, strategies: &[BasketStrategy]) -> Result<WeightMap, EngineError> {
        ensure_visible(strategies)?;
        if !Self::has_weights(strategies) {
            return Ok(equal_weights(strategies));
        }
        let visible: Vec<&BasketStrategy> = strategies.iter().filter(|s| s.visible).collect();
        let total: f64 = visible.iter().map(|s| s.weight).sum();
        let map: WeightMap = visible
            .into_iter()
            .map(|s| (s.key(), s.weight / total))
            .collect();
        validate_weights(&map, strategies)?;
        Ok(map)
    }

    fn name(&self) -> &str {
        "stored"
    }
}

/// Proportional to each strategy's positive return, with a floor.
///
/// `w_i = floor + (1 - n·floor) · max(r_i, 0) / Σ max(r_j, 0)`, so every
/// visible strategy gets at least `floor` and the map sums to 1. Falls back to
/// equal weights when no return is positive or `n·floor > 1`.
#[derive(Debug, Clone)]
pub struct ReturnWeighted {
    /// Return in percent per strategy key; missing keys count as 0.
    pub returns: BTreeMap<String, f64>,
    pub floor: f64,
}

impl ReturnWeighted {
    pub fn new(returns: BTreeMap<String, f64>) -> Self {
        Self {
            returns,
            floor: DEFAULT_WEIGHT_FLOOR,
        }
    }

    pub fn with_floor(mut self, floor: f64) -> Self {
        self.floor = floor;
        self
    }
}

impl WeightScheme for ReturnWeighted {
    fn weights(&self, strategies: &[BasketStrategy]) -> Result<WeightMap, EngineError> {
        ensure_visible(strategies)?;
        if !self.floor.is_finite() || self.floor < 0.0 {
            return Err(EngineError::invalid(format!("weight floor is {}", self.floor)));
        }
        let raw: Vec<(String, f64)> = strategies
            .iter()
            .filter(|s| s.visible)
            .map(|s| {
                let key = s.key();
                let r = self.returns.get(&key).copied().unwrap_or(0.0);
                (key, if r.is_finite() { r.max(0.0) } else { 0.0 })
            })
            .collect();
        let n = raw.len() as f64;
        let total: f64 = raw.iter().map(|(_, r)| r).sum();
        let spare = 1.0 - n * self.floor;
        if total <= 0.0 || spare < 0.0 {
            return Ok(equal_weights(strategies));
        }
        let map: WeightMap = raw
            .into_iter()
            .map(|(key, r)| (key, self.floor + spare * r / total))
            .collect();
        validate_weights(&map, strategies)?;
        Ok(map)
    }

    fn name(&self) -> &str {
        "return_weighted"
    }
}

/// Proportional to market capitalization.
///
/// `caps` is keyed by ticker; a multi-symbol strategy uses the sum of its
/// tickers' caps. Every visible ticker must have a positive cap.
#[derive(Debug, Clone)]
pub struct MarketCapWeighted {
    pub caps: BTreeMap<String, f64>,
}

impl WeightScheme for MarketCapWeighted {
    fn weights(&self, strategies: &[BasketStrategy]) -> Result<WeightMap, EngineError> {
        ensure_visible(strategies)?;
        let mut raw = Vec::new();
        for s in strategies.iter().filter(|s| s.visible) {
            let mut cap = 0.0;
            for sym in s.symbols() {
                let c = self
                    .caps
                    .get(sym)
                    .copied()
                    .ok_or_else(|| EngineError::invalid(format!("no market cap for {sym}")))?;
                if !c.is_finite() || c <= 0.0 {
                    return Err(EngineError::invalid(format!("market cap for {sym} is {c}")));
                }
                cap += c;
            }
            raw.push((s.key(), cap));
        }
        let total: f64 = raw.iter().map(|(_, c)| c).sum();
        let map: WeightMap = raw.into_iter().map(|(k, c)| (k, c / total)).collect();
        validate_weights(&map, strategies)?;
        Ok(map)
    }

    fn name(&self) -> &str {
        "market_cap"
    }
}

fn ensure_visible(strategies: &[BasketStrategy]) -> Result<(), EngineError> {
    if strategies.iter().any(|s| s.visible) {
        Ok(())
    } else {
        Err(EngineError::no_data("basket has no visible strategies"))
    }
}

//! Engine error and warning types.
//!
//! Errors abort a computation before it starts (bad parameters) or report that
//! nothing could be computed at all. Data-quality conditions that the engine can
//! recover from locally are surfaced as [`Warning`] values on the result instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by the analytical engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("no usable price history for {what}")]
    NoData { what: String },

    #[error("range of {range_len} days cannot hold a {window_len}-day window")]
    InsufficientRange { range_len: u32, window_len: u32 },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl EngineError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    pub fn no_data(what: impl Into<String>) -> Self {
        Self::NoData { what: what.into() }
    }
}

/// Non-fatal condition attached to a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A year has fewer trading days than [`crate::SPARSE_YEAR_DAYS`].
    SparseYear { year: i32, trading_days: usize },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::SparseYear { year, trading_days } => write!(
                f,
                "Incomplete data for {year}: only {trading_days} trading days (expected ~245)"
            ),
        }
    }
}

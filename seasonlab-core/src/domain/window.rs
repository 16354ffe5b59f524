//! Seasonal windows and their statistics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::calendar::{doy_label, REFERENCE_DAYS};
use crate::error::EngineError;

/// Contiguous day-of-year range, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Window {
    pub start_doy: u32,
    pub end_doy: u32,
}

impl Window {
    pub fn new(start_doy: u32, end_doy: u32) -> Result<Self, EngineError> {
        if start_doy == 0 || end_doy > REFERENCE_DAYS || start_doy > end_doy {
            return Err(EngineError::invalid(format!(
                "window {start_doy}..={end_doy} is not inside 1..={REFERENCE_DAYS}"
            )));
        }
        Ok(Self { start_doy, end_doy })
    }

    /// Window of `length` days starting at `start_doy`. Caller guarantees bounds.
    pub(crate) fn spanning(start_doy: u32, length: u32) -> Self {
        Self {
            start_doy,
            end_doy: start_doy + length - 1,
        }
    }

    pub fn length(&self) -> u32 {
        self.end_doy - self.start_doy + 1
    }

    pub fn contains(&self, doy: u32) -> bool {
        (self.start_doy..=self.end_doy).contains(&doy)
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.start_doy <= other.end_doy && other.start_doy <= self.end_doy
    }

    pub fn days(&self) -> impl Iterator<Item = u32> {
        self.start_doy..=self.end_doy
    }

    pub fn start_label(&self) -> String {
        doy_label(self.start_doy)
    }

    pub fn end_label(&self) -> String {
        doy_label(self.end_doy)
    }
}

/// Cross-year statistics of one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowStat {
    pub window: Window,
    pub length: u32,
    pub start_label: String,
    pub end_label: String,
    /// Mean return in percent over years with data.
    pub avg_return: f64,
    /// Share of years with data whose return was positive, 0-100.
    pub win_rate: f64,
    /// `avg_return * win_rate / 100`.
    pub score: f64,
    /// Average return per day held, in basis points.
    pub yield_per_day: f64,
    /// Per-year return in percent; `None` where the year lacks coverage.
    pub year_returns: BTreeMap<i32, Option<f64>>,
}

impl WindowStat {
    pub fn from_returns(window: Window, year_returns: BTreeMap<i32, Option<f64>>) -> Option<Self> {
        let values: Vec<f64> = year_returns.values().flatten().copied().collect();
        if values.is_empty() {
            return None;
        }
        let avg_return = values.iter().sum::<f64>() / values.len() as f64;
        let wins = values.iter().filter(|&&r| r > 0.0).count();
        let win_rate = wins as f64 / values.len() as f64 * 100.0;
        let length = window.length();
        Some(Self {
            window,
            length,
            start_label: window.start_label(),
            end_label: window.end_label(),
            avg_return,
            win_rate,
            score: avg_return * win_rate / 100.0,
            yield_per_day: avg_return / length as f64 * 100.0,
            year_returns,
        })
    }

    /// Number of years that contributed to the statistics.
    pub fn years_with_data(&self) -> usize {
        self.year_returns.values().filter(|r| r.is_some()).count()
    }
}

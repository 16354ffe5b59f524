//! Calendar-indexed equity curves.

use serde::{Deserialize, Serialize};

/// Daily return path over one calendar year (365 or 366 points).
///
/// Day `i` is the `i`-th calendar day of the represented year. Non-trading
/// days and days outside any active window carry a zero return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityCurve {
    /// Fractional return earned on each day (0.01 = +1%).
    pub daily_returns: Vec<f64>,
    /// Whether capital was at risk at that day's close (Active or ReEntered).
    pub in_market: Vec<bool>,
}

impl EquityCurve {
    /// A curve of `days` points with no exposure.
    pub fn flat(days: usize) -> Self {
        Self {
            daily_returns: vec![0.0; days],
            in_market: vec![false; days],
        }
    }

    pub fn len(&self) -> usize {
        self.daily_returns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.daily_returns.is_empty()
    }

    /// Cumulative return in percent after each day.
    pub fn cumulative_pct(&self) -> Vec<f64> {
        let mut growth = 1.0;
        self.daily_returns
            .iter()
            .map(|r| {
                growth *= 1.0 + r;
                (growth - 1.0) * 100.0
            })
            .collect()
    }

    pub fn total_return_pct(&self) -> f64 {
        let growth: f64 = self.daily_returns.iter().map(|r| 1.0 + r).product();
        (growth - 1.0) * 100.0
    }

    pub fn days_in_market(&self) -> usize {
        self.in_market.iter().filter(|&&b| b).count()
    }
}

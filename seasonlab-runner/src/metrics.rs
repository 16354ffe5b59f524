//! Performance metrics: pure functions over return series and curves.
//!
//! No dependencies on the service, data layer, or memo.

use serde::{Deserialize, Serialize};

use seasonlab_core::engine::YearlyRow;
use seasonlab_core::EquityCurve;

/// Aggregates shown under the per-year bar chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearlyMetrics {
    /// Mean / sample std of per-year strategy returns. Already a yearly
    /// series, so no annualization factor.
    pub sharpe: f64,
    pub avg_strategy_return: f64,
    pub avg_bh_return: f64,
    /// Percentage of years the strategy finished positive.
    pub positive_years_pct: f64,
    /// Years where the strategy beat buy-and-hold.
    pub years_beating_bh: usize,
}

impl YearlyMetrics {
    pub fn compute(rows: &[YearlyRow]) -> Self {
        let strat: Vec<f64> = rows.iter().map(|r| r.strategy_return).collect();
        let bh: Vec<f64> = rows.iter().map(|r| r.bh_return).collect();
        let positive = strat.iter().filter(|r| **r > 0.0).count();
        Self {
            sharpe: sharpe_ratio(&strat),
            avg_strategy_return: mean_f64(&strat),
            avg_bh_return: mean_f64(&bh),
            positive_years_pct: if strat.is_empty() {
                0.0
            } else {
                positive as f64 / strat.len() as f64 * 100.0
            },
            years_beating_bh: rows
                .iter()
                .filter(|r| r.strategy_return > r.bh_return)
                .count(),
        }
    }
}

/// Sharpe ratio of a return series: mean / sample standard deviation.
///
/// Returns 0.0 for fewer than 2 values or zero dispersion.
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let std = std_dev(returns);
    if std < 1e-15 {
        return 0.0;
    }
    mean_f64(returns) / std
}

/// Maximum drawdown of a curve's compounded value path, as a negative
/// fraction (e.g. -0.15 for a 15% drawdown). 0.0 for an empty curve.
pub fn max_drawdown(curve: &EquityCurve) -> f64 {
    let mut value = 1.0_f64;
    let mut peak = 1.0_f64;
    let mut max_dd = 0.0_f64;
    for r in &curve.daily_returns {
        value *= 1.0 + r;
        peak = peak.max(value);
        if peak > 0.0 {
            max_dd = max_dd.min((value - peak) / peak);
        }
    }
    max_dd
}

pub(crate) fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

//! Parameter sweep over window sizes × thresholds.
//!
//! Detection runs once per window size with an open threshold; each grid
//! point then filters that report and runs the trades table against one
//! shared [`ReturnsCache`]. Sizes and points fan out over rayon.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use seasonlab_core::engine::trades_table;
use seasonlab_core::{
    detect, DetectParams, DetectionReport, EngineError, PriceSeries, ReturnsCache, TradeRules,
};

/// What the sweep maximizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Mean compounded strategy return per year, percent.
    Profit,
    /// Profit per day in the market, basis points.
    Yield,
}

impl FromStr for Objective {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "profit" => Ok(Objective::Profit),
            "yield" => Ok(Objective::Yield),
            other => Err(EngineError::invalid(format!(
                "objective must be \"profit\" or \"yield\", got {other:?}"
            ))),
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Objective::Profit => "profit",
            Objective::Yield => "yield",
        })
    }
}

/// Grid of detection parameters to sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepGrid {
    pub window_sizes: Vec<u32>,
    pub thresholds: Vec<f64>,
}

impl Default for SweepGrid {
    fn default() -> Self {
        Self {
            window_sizes: vec![7, 14, 21, 30, 45, 60, 90],
            thresholds: (0..=10).map(|i| 50.0 + 5.0 * i as f64).collect(),
        }
    }
}

impl SweepGrid {
    pub fn size(&self) -> usize {
        self.window_sizes.len() * self.thresholds.len()
    }

    /// Valid parameter combinations; invalid ones are dropped.
    pub fn combos(&self) -> Vec<DetectParams> {
        self.window_sizes
            .iter()
            .flat_map(|&w| self.thresholds.iter().map(move |&t| (w, t)))
            .filter_map(|(w, t)| DetectParams::new(w, t).ok())
            .collect()
    }
}

/// Outcome of one grid point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    pub window_size: u32,
    pub threshold: f64,
    pub windows: usize,
    pub avg_profit: f64,
    pub avg_days: u32,
    pub yield_bps: f64,
}

impl SweepPoint {
    fn metric(&self, objective: Objective) -> f64 {
        match objective {
            Objective::Profit => self.avg_profit,
            Objective::Yield => self.yield_bps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResults {
    pub objective: Objective,
    /// Best first.
    pub points: Vec<SweepPoint>,
}

impl SweepResults {
    pub fn best(&self) -> Option<&SweepPoint> {
        self.points.first()
    }

    pub fn top_n(&self, n: usize) -> &[SweepPoint] {
        &self.points[..n.min(self.points.len())]
    }
}

/// Ranking: primary metric, then the other metric, then smaller window, then
/// lower threshold.
pub fn rank(a: &SweepPoint, b: &SweepPoint, objective: Objective) -> Ordering {
    let secondary = match objective {
        Objective::Profit => Objective::Yield,
        Objective::Yield => Objective::Profit,
    };
    b.metric(objective)
        .total_cmp(&a.metric(objective))
        .then_with(|| b.metric(secondary).total_cmp(&a.metric(secondary)))
        .then_with(|| a.window_size.cmp(&b.window_size))
        .then_with(|| a.threshold.total_cmp(&b.threshold))
}

fn evaluate(
    series: &PriceSeries,
    years: &[i32],
    window_size: u32,
    threshold: f64,
    report: &DetectionReport,
    rules: &TradeRules,
) -> Result<SweepPoint, EngineError> {
    let windows = report.window_list();
    let table = trades_table(series, &windows, years, rules)?;
    let s = &table.summary;
    let yield_bps = if s.avg_days > 0 {
        s.avg_profit / s.avg_days as f64 * 100.0
    } else {
        0.0
    };
    Ok(SweepPoint {
        window_size,
        threshold,
        windows: windows.len(),
        avg_profit: s.avg_profit,
        avg_days: s.avg_days,
        yield_bps,
    })
}

/// Evaluate every grid point in parallel and rank the results.
pub fn sweep(
    cache: &ReturnsCache,
    series: &PriceSeries,
    years: &[i32],
    grid: &SweepGrid,
    rules: &TradeRules,
    objective: Objective,
) -> Result<SweepResults, EngineError> {
    rules.validate()?;
    let combos = grid.combos();
    if combos.is_empty() {
        return Err(EngineError::invalid("sweep grid has no valid combinations"));
    }
    let mut by_size: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    for params in &combos {
        by_size
            .entry(params.window_size)
            .or_default()
            .push(params.threshold);
    }
    let nested = by_size
        .into_par_iter()
        .map(|(size, thresholds)| {
            let open = detect(cache, years, &DetectParams::new(size, 0.0)?)?;
            thresholds
                .into_par_iter()
                .map(|t| evaluate(series, years, size, t, &open.with_threshold(t), rules))
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;
    let mut points: Vec<SweepPoint> = nested.into_iter().flatten().collect();
    points.sort_by(|a, b| rank(a, b, objective));
    debug!(
        symbol = series.symbol(),
        points = points.len(),
        %objective,
        "sweep finished"
    );
    Ok(SweepResults { objective, points })
}

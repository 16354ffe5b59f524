//! O(1) window-return lookup over a multi-year daily series.
//!
//! Per year the cache stores the cumulative product of close-to-close ratios
//! (`cum[0] = 1`, first trading day ratio = 1) and, for every reference day,
//! how many trading days of that year fall on or before it. A window return is
//! then two table reads and one division.

use std::collections::BTreeMap;

use chrono::Datelike;
use tracing::{debug, warn};

use crate::calendar::{calendar_doy, REFERENCE_DAYS};
use crate::domain::{PricePoint, PriceSeries, Window, WindowStat};
use crate::error::Warning;

/// Years with fewer trading days than this are flagged as sparse.
pub const SPARSE_YEAR_DAYS: usize = 200;

/// How far (in calendar days) a year's first or last trading day may sit
/// inside a window before that year counts as not covering it. Absorbs the
/// New Year holiday and weekends at both ends of the data.
pub const EDGE_GRACE_DAYS: u32 = 4;

#[derive(Debug, Clone)]
struct YearCurve {
    cum: Vec<f64>,
    /// `idx[d]` = trading days with reference doy <= d, for d in 0..=365.
    idx: Vec<usize>,
    first_doy: u32,
    last_doy: u32,
}

impl YearCurve {
    fn build(points: &[PricePoint]) -> Option<Self> {
        let first = points.first()?;
        let last = points.last()?;

        let mut cum = Vec::with_capacity(points.len() + 1);
        cum.push(1.0);
        cum.push(1.0);
        for pair in points.windows(2) {
            let prev = cum[cum.len() - 1];
            cum.push(prev * pair[1].close / pair[0].close);
        }

        let mut idx = vec![0usize; REFERENCE_DAYS as usize + 1];
        let mut seen = 0usize;
        for (d, slot) in idx.iter_mut().enumerate() {
            while seen < points.len() && calendar_doy(points[seen].date) as usize <= d {
                seen += 1;
            }
            *slot = seen;
        }

        Some(Self {
            cum,
            idx,
            first_doy: calendar_doy(first.date),
            last_doy: calendar_doy(last.date),
        })
    }

    fn trading_days(&self) -> usize {
        self.cum.len() - 1
    }

    fn covers(&self, start: u32, end: u32) -> bool {
        covers_span(self.first_doy, self.last_doy, start, end)
    }

    fn ratio(&self, start: u32, end: u32) -> f64 {
        self.cum[self.idx[end as usize]] / self.cum[self.idx[start as usize - 1]]
    }
}

/// Whether data running from `first_doy` to `last_doy` covers `start..=end`.
pub(crate) fn covers_span(first_doy: u32, last_doy: u32, start: u32, end: u32) -> bool {
    first_doy <= start + EDGE_GRACE_DAYS && last_doy + EDGE_GRACE_DAYS >= end
}

/// Immutable per-symbol lookup table. Build once per series snapshot.
#[derive(Debug, Clone)]
pub struct ReturnsCache {
    symbol: String,
    years: BTreeMap<i32, YearCurve>,
}

impl ReturnsCache {
    pub fn build(series: &PriceSeries) -> Self {
        let mut years = BTreeMap::new();
        for year in series.years() {
            if let Some(curve) = YearCurve::build(series.year(year)) {
                if curve.trading_days() < SPARSE_YEAR_DAYS {
                    debug!(
                        symbol = series.symbol(),
                        year,
                        days = curve.trading_days(),
                        "sparse year"
                    );
                }
                years.insert(year, curve);
            }
        }
        debug!(symbol = series.symbol(), years = years.len(), "returns cache built");
        Self {
            symbol: series.symbol().to_string(),
            years,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Years with at least one trading day, ascending.
    pub fn years(&self) -> Vec<i32> {
        self.years.keys().copied().collect()
    }

    pub fn has_year(&self, year: i32) -> bool {
        self.years.contains_key(&year)
    }

    pub fn last_year(&self) -> Option<i32> {
        self.years.keys().next_back().copied()
    }

    pub fn trading_days(&self, year: i32) -> usize {
        self.years.get(&year).map_or(0, YearCurve::trading_days)
    }

    pub fn is_sparse(&self, year: i32) -> bool {
        self.years
            .get(&year)
            .is_some_and(|c| c.trading_days() < SPARSE_YEAR_DAYS)
    }

    /// One [`Warning::SparseYear`] per sparse year among `years`.
    pub fn sparse_warnings(&self, years: &[i32]) -> Vec<Warning> {
        years
            .iter()
            .filter(|&&y| self.is_sparse(y))
            .map(|&year| {
                let trading_days = self.trading_days(year);
                warn!(symbol = %self.symbol, year, trading_days, "incomplete year");
                Warning::SparseYear { year, trading_days }
            })
            .collect()
    }

    /// Fractional return over reference days `start..=end` of `year`.
    ///
    /// `None` when the year is absent, the range is malformed, or the year's
    /// trading range does not reach both ends of the window.
    pub fn window_return(&self, year: i32, start: u32, end: u32) -> Option<f64> {
        if start == 0 || end > REFERENCE_DAYS || start > end {
            return None;
        }
        let curve = self.years.get(&year)?;
        if !curve.covers(start, end) {
            return None;
        }
        Some(curve.ratio(start, end) - 1.0)
    }

    /// Fractional return of the single reference day `doy` (0 on non-trading days).
    pub fn day_return(&self, year: i32, doy: u32) -> Option<f64> {
        self.window_return(year, doy, doy)
    }

    /// Per-year window returns in percent, one entry per requested year.
    pub fn year_returns(&self, years: &[i32], window: Window) -> BTreeMap<i32, Option<f64>> {
        years
            .iter()
            .map(|&y| {
                let r = self
                    .window_return(y, window.start_doy, window.end_doy)
                    .map(|r| r * 100.0);
                (y, r)
            })
            .collect()
    }

    pub fn window_stat(&self, years: &[i32], window: Window) -> Option<WindowStat> {
        WindowStat::from_returns(window, self.year_returns(years, window))
    }

    /// Mean return of each reference day across `years` (index 0 = day 1).
    ///
    /// Days where no year has coverage average to zero.
    pub fn mean_day_returns(&self, years: &[i32]) -> Vec<f64> {
        (1..=REFERENCE_DAYS)
            .map(|doy| {
                let values: Vec<f64> = years
                    .iter()
                    .filter_map(|&y| self.day_return(y, doy))
                    .collect();
                if values.is_empty() {
                    0.0
                } else {
                    values.iter().sum::<f64>() / values.len() as f64
                }
            })
            .collect()
    }
}

/// Reference doy of the first and last trading day in `points`.
pub(crate) fn doy_span(points: &[PricePoint]) -> Option<(u32, u32)> {
    let first = points.first()?;
    let last = points.last()?;
    debug_assert_eq!(first.date.year(), last.date.year());
    Some((calendar_doy(first.date), calendar_doy(last.date)))
}

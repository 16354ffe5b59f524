//! Seasonal window search.
//!
//! The search runs in four deterministic passes over the reference calendar:
//!
//! 1. Recursive split: find the best fixed-length window in 1..=365, then
//!    search the sub-ranges to its left and right independently.
//! 2. Merge: join neighbours whose gap is at most [`MERGE_GAP_DAYS`], measuring
//!    the merged span's return directly rather than summing the parts.
//! 3. Edge narrowing: trim single days off either end while that strictly
//!    improves the score.
//! 4. Threshold filter: drop windows whose final win rate is below threshold.
//!
//! The threshold only ever acts in pass 4.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calendar::REFERENCE_DAYS;
use crate::domain::{Window, WindowStat};
use crate::engine::returns_cache::ReturnsCache;
use crate::error::{EngineError, Warning};
use crate::params::{DetectParams, MIN_WINDOW_DAYS};

/// Neighbouring windows at most this many days apart are merged.
pub const MERGE_GAP_DAYS: u32 = 7;

/// Detection output plus the aggregates shown next to the windows table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub windows: Vec<WindowStat>,
    /// Sum of window lengths.
    pub total_days: u32,
    /// Sum of average window returns, in percent.
    pub total_return: f64,
    pub years: Vec<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

impl DetectionReport {
    fn new(windows: Vec<WindowStat>, years: Vec<i32>, warnings: Vec<Warning>) -> Self {
        Self {
            total_days: windows.iter().map(|w| w.length).sum(),
            total_return: windows.iter().map(|w| w.avg_return).sum(),
            windows,
            years,
            warnings,
        }
    }

    pub fn window_list(&self) -> Vec<Window> {
        self.windows.iter().map(|w| w.window).collect()
    }

    /// The report pass 4 would have produced at `threshold`.
    ///
    /// Passes 1-3 ignore the threshold, so filtering a threshold-0 report
    /// matches a fresh detection at any stricter threshold.
    pub fn with_threshold(&self, threshold: f64) -> DetectionReport {
        let windows = self
            .windows
            .iter()
            .filter(|s| s.win_rate >= threshold)
            .cloned()
            .collect();
        DetectionReport::new(windows, self.years.clone(), self.warnings.clone())
    }
}

/// Window search over one cache and a fixed set of years.
pub struct WindowDetector<'a> {
    cache: &'a ReturnsCache,
    years: &'a [i32],
}

impl<'a> WindowDetector<'a> {
    pub fn new(cache: &'a ReturnsCache, years: &'a [i32]) -> Self {
        Self { cache, years }
    }

    pub fn stat(&self, window: Window) -> Option<WindowStat> {
        self.cache.window_stat(self.years, window)
    }

    /// `avg_return * win_rate / 100`; `None` when no year has data.
    pub fn score(&self, window: Window) -> Option<f64> {
        self.stat(window).map(|s| s.score)
    }

    /// Best `len`-day window inside `first..=last`; earliest start wins ties.
    ///
    /// `Ok(None)` when no candidate has data in any year.
    pub fn best_window(
        &self,
        first: u32,
        last: u32,
        len: u32,
    ) -> Result<Option<WindowStat>, EngineError> {
        let range_len = (last + 1).saturating_sub(first);
        if first == 0 || last > REFERENCE_DAYS || range_len < len || len == 0 {
            return Err(EngineError::InsufficientRange {
                range_len,
                window_len: len,
            });
        }

        let mut best: Option<WindowStat> = None;
        for start in first..=last + 1 - len {
            let Some(stat) = self.stat(Window::spanning(start, len)) else {
                continue;
            };
            if best.as_ref().map_or(true, |b| stat.score > b.score) {
                best = Some(stat);
            }
        }
        Ok(best)
    }

    /// Non-overlapping fixed-length windows, sorted by start.
    pub fn recursive_split(&self, len: u32) -> Vec<Window> {
        let mut found = Vec::new();
        let mut pending = vec![(1u32, REFERENCE_DAYS)];
        while let Some((first, last)) = pending.pop() {
            let Ok(Some(best)) = self.best_window(first, last, len) else {
                continue;
            };
            let w = best.window;
            found.push(w);
            if w.start_doy > first && w.start_doy - first >= len {
                pending.push((first, w.start_doy - 1));
            }
            if last > w.end_doy && last - w.end_doy >= len {
                pending.push((w.end_doy + 1, last));
            }
        }
        found.sort();
        found
    }

    /// Trim one day at a time from either edge while the score strictly rises.
    ///
    /// When both trims help, the larger gain wins; equal gains trim the left.
    pub fn narrow(&self, window: Window) -> Window {
        let Some(mut current) = self.score(window) else {
            return window;
        };
        let mut w = window;
        while w.length() > MIN_WINDOW_DAYS {
            let left = Window::spanning(w.start_doy + 1, w.length() - 1);
            let right = Window::spanning(w.start_doy, w.length() - 1);
            let left_score = self.score(left).filter(|s| *s > current);
            let right_score = self.score(right).filter(|s| *s > current);
            let (next, score) = match (left_score, right_score) {
                (Some(l), Some(r)) if r > l => (right, r),
                (Some(l), _) => (left, l),
                (None, Some(r)) => (right, r),
                (None, None) => break,
            };
            w = next;
            current = score;
        }
        w
    }

    /// Full search. `params` is validated before anything runs.
    pub fn detect(&self, params: &DetectParams) -> Result<DetectionReport, EngineError> {
        params.validate()?;
        if !self.years.iter().any(|&y| self.cache.has_year(y)) {
            return Err(EngineError::no_data(format!(
                "{} in years {:?}",
                self.cache.symbol(),
                self.years
            )));
        }

        let raw = self.recursive_split(params.window_size);
        let merged = merge_windows(&raw, MERGE_GAP_DAYS);
        let windows: Vec<WindowStat> = merged
            .into_iter()
            .map(|w| self.narrow(w))
            .filter_map(|w| self.stat(w))
            .filter(|s| s.win_rate >= params.threshold)
            .collect();

        debug!(
            symbol = self.cache.symbol(),
            window_size = params.window_size,
            threshold = params.threshold,
            raw = raw.len(),
            kept = windows.len(),
            "windows detected"
        );

        let warnings = self.cache.sparse_warnings(self.years);
        Ok(DetectionReport::new(windows, self.years.to_vec(), warnings))
    }
}

/// Merge windows whose gap (`next.start - prev.end`) is at most `max_gap`.
///
/// Input order does not matter; output is sorted and stable under re-merging.
pub fn merge_windows(windows: &[Window], max_gap: u32) -> Vec<Window> {
    let mut sorted = windows.to_vec();
    sorted.sort();
    loop {
        let mut merged: Vec<Window> = Vec::with_capacity(sorted.len());
        for w in &sorted {
            match merged.last_mut() {
                Some(prev) if w.start_doy <= prev.end_doy + max_gap => {
                    prev.end_doy = prev.end_doy.max(w.end_doy);
                }
                _ => merged.push(*w),
            }
        }
        if merged.len() == sorted.len() {
            return merged;
        }
        sorted = merged;
    }
}

/// Convenience wrapper: detect windows in `cache` over `years`.
pub fn detect(
    cache: &ReturnsCache,
    years: &[i32],
    params: &DetectParams,
) -> Result<DetectionReport, EngineError> {
    WindowDetector::new(cache, years).detect(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PricePoint, PriceSeries};
    use chrono::{Datelike, Weekday};

    /// Weekday series drifting down 0.05%/day, rallying 1%/day on `rally` days.
    fn seasonal_series(years: std::ops::RangeInclusive<i32>, rally: (u32, u32)) -> PriceSeries {
        let mut points = Vec::new();
        let mut close = 100.0;
        for year in years {
            for date in crate::calendar::dates_of_year(year) {
                if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                    continue;
                }
                let doy = crate::calendar::calendar_doy(date);
                close *= if (rally.0..=rally.1).contains(&doy) {
                    1.01
                } else {
                    0.9995
                };
                points.push(PricePoint { date, close });
            }
        }
        PriceSeries::new("SEAS", points).unwrap()
    }

    fn w(a: u32, b: u32) -> Window {
        Window::new(a, b).unwrap()
    }

    #[test]
    fn best_window_prefers_earliest_on_ties() {
        // Flat prices: every window scores zero.
        let points = crate::calendar::dates_of_year(2021)
            .into_iter()
            .map(|date| PricePoint { date, close: 50.0 })
            .collect();
        let cache = ReturnsCache::build(&PriceSeries::new("F", points).unwrap());
        let det = WindowDetector::new(&cache, &[2021]);
        let best = det.best_window(10, 100, 7).unwrap().unwrap();
        assert_eq!(best.window, w(10, 16));
    }

    #[test]
    fn best_window_rejects_short_range() {
        let cache = ReturnsCache::build(&seasonal_series(2020..=2021, (100, 120)));
        let det = WindowDetector::new(&cache, &[2020]);
        assert!(matches!(
            det.best_window(10, 15, 21),
            Err(EngineError::InsufficientRange {
                range_len: 6,
                window_len: 21
            })
        ));
    }

    #[test]
    fn split_windows_have_fixed_length_and_do_not_overlap() {
        let cache = ReturnsCache::build(&seasonal_series(2018..=2022, (100, 120)));
        let years = [2018, 2019, 2020, 2021];
        let raw = WindowDetector::new(&cache, &years).recursive_split(30);
        assert!(!raw.is_empty());
        for pair in raw.windows(2) {
            assert!(!pair[0].overlaps(&pair[1]));
        }
        assert!(raw.iter().all(|w| w.length() == 30));
    }

    #[test]
    fn merge_joins_small_gaps_only() {
        let merged = merge_windows(&[w(40, 50), w(10, 20), w(27, 30)], 7);
        assert_eq!(merged, vec![w(10, 30), w(40, 50)]);
        let merged = merge_windows(&[w(10, 20), w(28, 30)], 7);
        assert_eq!(merged, vec![w(10, 20), w(28, 30)]);
    }

    #[test]
    fn merge_is_idempotent() {
        let once = merge_windows(&[w(1, 5), w(12, 14), w(21, 30), w(60, 70)], 7);
        let twice = merge_windows(&once, 7);
        assert_eq!(once, twice);
        assert_eq!(once, vec![w(1, 30), w(60, 70)]);
    }

    #[test]
    fn narrowing_never_lowers_score() {
        let cache = ReturnsCache::build(&seasonal_series(2018..=2022, (100, 120)));
        let years = [2018, 2019, 2020, 2021];
        let det = WindowDetector::new(&cache, &years);
        let wide = w(90, 130);
        let narrow = det.narrow(wide);
        assert!(det.score(narrow).unwrap() >= det.score(wide).unwrap());
        assert!(narrow.length() >= MIN_WINDOW_DAYS);
        assert!(wide.start_doy <= narrow.start_doy && narrow.end_doy <= wide.end_doy);
    }

    #[test]
    fn detects_the_rally() {
        let cache = ReturnsCache::build(&seasonal_series(2018..=2023, (100, 120)));
        let years = crate::calendar::analysis_years(2023, 6);
        let report = detect(&cache, &years, &DetectParams::new(21, 50.0).unwrap()).unwrap();
        let top = report
            .windows
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .unwrap();
        assert_eq!(top.win_rate, 100.0);
        assert!(top.window.start_doy >= 97 && top.window.start_doy <= 101);
        assert!(top.window.end_doy >= 118 && top.window.end_doy <= 122);
        assert!(top.avg_return > 10.0);
        assert!(report.windows.iter().all(|w| w.win_rate >= 50.0));
    }

    #[test]
    fn threshold_only_filters() {
        let cache = ReturnsCache::build(&seasonal_series(2018..=2023, (100, 120)));
        let years = crate::calendar::analysis_years(2023, 6);
        let det = WindowDetector::new(&cache, &years);
        let loose = det.detect(&DetectParams::new(21, 0.0).unwrap()).unwrap();
        let strict = det.detect(&DetectParams::new(21, 100.0).unwrap()).unwrap();
        for s in &strict.windows {
            assert!(loose.windows.contains(s));
        }
        assert!(strict.windows.len() <= loose.windows.len());
    }

    #[test]
    fn missing_years_are_no_data() {
        let cache = ReturnsCache::build(&seasonal_series(2018..=2019, (100, 120)));
        let err = detect(&cache, &[2005, 2006], &DetectParams::new(21, 50.0).unwrap());
        assert!(matches!(err, Err(EngineError::NoData { .. })));
    }

    #[test]
    fn report_totals() {
        let cache = ReturnsCache::build(&seasonal_series(2018..=2023, (100, 120)));
        let years = crate::calendar::analysis_years(2023, 6);
        let report = detect(&cache, &years, &DetectParams::new(30, 0.0).unwrap()).unwrap();
        let days: u32 = report.windows.iter().map(|w| w.length).sum();
        assert_eq!(report.total_days, days);
    }

    #[test]
    fn threshold_filter_matches_fresh_detection() {
        let cache = ReturnsCache::build(&seasonal_series(2018..=2023, (100, 120)));
        let years = crate::calendar::analysis_years(2023, 6);
        let open = detect(&cache, &years, &DetectParams::new(21, 0.0).unwrap()).unwrap();
        for threshold in [0.0, 40.0, 60.0, 90.0, 100.0] {
            let fresh = detect(&cache, &years, &DetectParams::new(21, threshold).unwrap()).unwrap();
            assert_eq!(open.with_threshold(threshold), fresh, "threshold {threshold}");
        }
    }
}

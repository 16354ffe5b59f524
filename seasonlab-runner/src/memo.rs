//! In-process memoization of returns caches and detection reports.
//!
//! Caches are keyed by the series fingerprint; reports additionally by the
//! detection parameters and analysis years. A changed price series produces a
//! new fingerprint and therefore a fresh build.
//!
//! Reports are bounded per fingerprint: once a series holds
//! [`MAX_REPORTS_PER_SERIES`] reports, the oldest one is evicted.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::debug;

use seasonlab_core::{detect, DetectParams, DetectionReport, EngineError, PriceSeries, ReturnsCache};

use crate::data_loader::series_fingerprint;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ReportKey {
    fingerprint: String,
    window_size: u32,
    threshold_bits: u64,
    years: Vec<i32>,
}

/// Reports kept per series fingerprint before the oldest is evicted.
pub const MAX_REPORTS_PER_SERIES: usize = 64;

#[derive(Default)]
struct MemoInner {
    caches: HashMap<String, Arc<ReturnsCache>>,
    reports: HashMap<ReportKey, Arc<DetectionReport>>,
    /// Insertion order of report keys, per fingerprint.
    order: HashMap<String, VecDeque<ReportKey>>,
}

impl MemoInner {
    fn insert_report(&mut self, key: ReportKey, report: Arc<DetectionReport>, capacity: usize) {
        if self.reports.contains_key(&key) {
            return;
        }
        let queue = self.order.entry(key.fingerprint.clone()).or_default();
        queue.push_back(key.clone());
        while queue.len() > capacity {
            if let Some(old) = queue.pop_front() {
                self.reports.remove(&old);
            }
        }
        self.reports.insert(key, report);
    }
}

/// Thread-safe memo shared by every request a service handles.
pub struct DetectionMemo {
    inner: Mutex<MemoInner>,
    report_capacity: usize,
}

impl Default for DetectionMemo {
    fn default() -> Self {
        Self::with_report_capacity(MAX_REPORTS_PER_SERIES)
    }
}

/// Entry counts, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoStats {
    pub caches: usize,
    pub reports: usize,
}

impl DetectionMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memo keeping at most `capacity` reports per series (minimum 1).
    pub fn with_report_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(MemoInner::default()),
            report_capacity: capacity.max(1),
        }
    }

    /// Returns cache for `series`, building it on first use.
    pub fn cache(&self, series: &PriceSeries) -> Arc<ReturnsCache> {
        self.cache_for(&series_fingerprint(series), series)
    }

    fn cache_for(&self, fingerprint: &str, series: &PriceSeries) -> Arc<ReturnsCache> {
        if let Some(hit) = self.lock().caches.get(fingerprint) {
            debug!(symbol = series.symbol(), "returns cache hit");
            return Arc::clone(hit);
        }
        debug!(symbol = series.symbol(), "returns cache miss");
        // Built outside the lock; a concurrent duplicate build is harmless.
        let built = Arc::new(ReturnsCache::build(series));
        let mut inner = self.lock();
        Arc::clone(
            inner
                .caches
                .entry(fingerprint.to_string())
                .or_insert(built),
        )
    }

    /// Detection report for `series` over `years`, memoized.
    pub fn detect(
        &self,
        series: &PriceSeries,
        years: &[i32],
        params: &DetectParams,
    ) -> Result<(Arc<ReturnsCache>, Arc<DetectionReport>), EngineError> {
        params.validate()?;
        let fingerprint = series_fingerprint(series);
        let cache = self.cache_for(&fingerprint, series);
        let key = ReportKey {
            fingerprint,
            window_size: params.window_size,
            threshold_bits: params.threshold.to_bits(),
            years: years.to_vec(),
        };
        if let Some(hit) = self.lock().reports.get(&key) {
            debug!(symbol = series.symbol(), window_size = params.window_size, "detection hit");
            return Ok((cache, Arc::clone(hit)));
        }
        debug!(symbol = series.symbol(), window_size = params.window_size, "detection miss");
        let report = Arc::new(detect(&cache, years, params)?);
        self.lock()
            .insert_report(key, Arc::clone(&report), self.report_capacity);
        Ok((cache, report))
    }

    pub fn stats(&self) -> MemoStats {
        let inner = self.lock();
        MemoStats {
            caches: inner.caches.len(),
            reports: inner.reports.len(),
        }
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.caches.clear();
        inner.reports.clear();
        inner.order.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoInner> {
        // A panic while holding the lock leaves only complete entries behind.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use seasonlab_core::PricePoint;

    fn series(symbol: &str, bump: f64) -> PriceSeries {
        let start = NaiveDate::from_ymd_opt(2018, 1, 1).unwrap();
        let points = start
            .iter_days()
            .take(365 * 3)
            .enumerate()
            .map(|(i, date)| PricePoint {
                date,
                close: 100.0 + (i as f64 * 0.7).sin() * 5.0 + bump,
            })
            .collect();
        PriceSeries::new(symbol, points).unwrap()
    }

    #[test]
    fn repeated_detection_reuses_report() {
        let memo = DetectionMemo::new();
        let s = series("A", 0.0);
        let params = DetectParams::new(30, 0.0).unwrap();
        let (c1, r1) = memo.detect(&s, &[2018, 2019], &params).unwrap();
        let (c2, r2) = memo.detect(&s, &[2018, 2019], &params).unwrap();
        assert!(Arc::ptr_eq(&c1, &c2));
        assert!(Arc::ptr_eq(&r1, &r2));
        assert_eq!(memo.stats(), MemoStats { caches: 1, reports: 1 });
    }

    #[test]
    fn different_params_share_cache() {
        let memo = DetectionMemo::new();
        let s = series("A", 0.0);
        memo.detect(&s, &[2018, 2019], &DetectParams::new(30, 0.0).unwrap()).unwrap();
        memo.detect(&s, &[2018, 2019], &DetectParams::new(21, 0.0).unwrap()).unwrap();
        assert_eq!(memo.stats(), MemoStats { caches: 1, reports: 2 });
    }

    #[test]
    fn changed_series_rebuilds() {
        let memo = DetectionMemo::new();
        let a = memo.cache(&series("A", 0.0));
        let b = memo.cache(&series("A", 1.0));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(memo.stats().caches, 2);
        memo.clear();
        assert_eq!(memo.stats(), MemoStats { caches: 0, reports: 0 });
    }

    #[test]
    fn invalid_params_are_not_memoized() {
        let memo = DetectionMemo::new();
        let bad = DetectParams {
            window_size: 1,
            threshold: 50.0,
        };
        assert!(memo.detect(&series("A", 0.0), &[2018], &bad).is_err());
        assert_eq!(memo.stats().reports, 0);
    }

    #[test]
    fn reports_are_bounded_per_series() {
        let memo = DetectionMemo::with_report_capacity(2);
        let a = series("A", 0.0);
        let b = series("B", 0.0);
        for threshold in [10.0, 20.0, 30.0, 40.0] {
            let params = DetectParams::new(30, threshold).unwrap();
            memo.detect(&a, &[2018, 2019], &params).unwrap();
        }
        memo.detect(&b, &[2018, 2019], &DetectParams::new(30, 10.0).unwrap()).unwrap();
        assert_eq!(memo.stats(), MemoStats { caches: 2, reports: 3 });

        // The newest report for A survived; the oldest was evicted and rebuilt.
        let newest = DetectParams::new(30, 40.0).unwrap();
        let (_, r1) = memo.detect(&a, &[2018, 2019], &newest).unwrap();
        let (_, r2) = memo.detect(&a, &[2018, 2019], &newest).unwrap();
        assert!(Arc::ptr_eq(&r1, &r2));
        memo.detect(&a, &[2018, 2019], &DetectParams::new(30, 10.0).unwrap()).unwrap();
        assert_eq!(memo.stats().reports, 3);
    }

    #[test]
    fn default_capacity_caps_distinct_thresholds() {
        let memo = DetectionMemo::new();
        let s = series("A", 0.0);
        for i in 0..(MAX_REPORTS_PER_SERIES + 10) {
            let params = DetectParams::new(30, i as f64 / 2.0).unwrap();
            memo.detect(&s, &[2018], &params).unwrap();
        }
        assert_eq!(memo.stats().reports, MAX_REPORTS_PER_SERIES);
    }
}

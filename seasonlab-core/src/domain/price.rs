//! Daily close series: the only market data the engine reads.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One trading day's close.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// Errors raised while validating a price series.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    #[error("{symbol}: dates out of order at {date}")]
    OutOfOrder { symbol: String, date: NaiveDate },

    #[error("{symbol}: duplicate date {date}")]
    DuplicateDate { symbol: String, date: NaiveDate },

    #[error("{symbol}: close {close} on {date} is not a positive finite number")]
    BadClose {
        symbol: String,
        date: NaiveDate,
        close: f64,
    },

    #[error("cannot blend an empty set of series")]
    NothingToBlend,
}

/// Chronological daily closes for one symbol (or one blended basket).
///
/// Invariant: dates strictly increasing, every close positive and finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    symbol: String,
    points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new(symbol: impl Into<String>, points: Vec<PricePoint>) -> Result<Self, SeriesError> {
        let symbol = symbol.into();
        for (i, p) in points.iter().enumerate() {
            if !p.close.is_finite() || p.close <= 0.0 {
                return Err(SeriesError::BadClose {
                    symbol,
                    date: p.date,
                    close: p.close,
                });
            }
            if i > 0 {
                let prev = points[i - 1].date;
                if p.date == prev {
                    return Err(SeriesError::DuplicateDate {
                        symbol,
                        date: p.date,
                    });
                }
                if p.date < prev {
                    return Err(SeriesError::OutOfOrder {
                        symbol,
                        date: p.date,
                    });
                }
            }
        }
        Ok(Self { symbol, points })
    }

    /// Build from unsorted rows: sorts by date and keeps the last row per date.
    pub fn from_unsorted(
        symbol: impl Into<String>,
        mut points: Vec<PricePoint>,
    ) -> Result<Self, SeriesError> {
        points.sort_by_key(|p| p.date);
        let mut deduped: Vec<PricePoint> = Vec::with_capacity(points.len());
        for p in points {
            match deduped.last_mut() {
                Some(last) if last.date == p.date => *last = p,
                _ => deduped.push(p),
            }
        }
        Self::new(symbol, deduped)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }

    /// Distinct calendar years present, ascending.
    pub fn years(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self.points.iter().map(|p| p.date.year()).collect();
        years.dedup();
        years
    }

    /// Contiguous slice of the points falling in `year`.
    pub fn year(&self, year: i32) -> &[PricePoint] {
        let start = self.points.partition_point(|p| p.date.year() < year);
        let end = self.points.partition_point(|p| p.date.year() <= year);
        &self.points[start..end]
    }

    /// Close of the last trading day strictly before `date`.
    pub fn close_before(&self, date: NaiveDate) -> Option<f64> {
        let idx = self.points.partition_point(|p| p.date < date);
        idx.checked_sub(1).map(|i| self.points[i].close)
    }

    /// Blend several series into one averaged series.
    ///
    /// Only dates common to every input survive. Each day's close-to-close
    /// ratio is averaged across inputs and compounded from a base of 100.0.
    pub fn blend(symbol: impl Into<String>, inputs: &[PriceSeries]) -> Result<Self, SeriesError> {
        let symbol = symbol.into();
        let Some(first) = inputs.first() else {
            return Err(SeriesError::NothingToBlend);
        };
        if inputs.len() == 1 {
            return Self::new(symbol, first.points.clone());
        }

        let maps: Vec<BTreeMap<NaiveDate, f64>> = inputs
            .iter()
            .map(|s| s.points.iter().map(|p| (p.date, p.close)).collect())
            .collect();
        let common: Vec<NaiveDate> = first
            .points
            .iter()
            .map(|p| p.date)
            .filter(|d| maps.iter().all(|m| m.contains_key(d)))
            .collect();

        let mut points = Vec::with_capacity(common.len());
        let mut level = 100.0;
        for pair in common.windows(2) {
            let (prev, cur) = (pair[0], pair[1]);
            let ratio = maps
                .iter()
                .map(|m| m[&cur] / m[&prev])
                .sum::<f64>()
                / maps.len() as f64;
            if points.is_empty() {
                points.push(PricePoint {
                    date: prev,
                    close: level,
                });
            }
            level *= ratio;
            points.push(PricePoint {
                date: cur,
                close: level,
            });
        }
        if points.is_empty() {
            if let Some(&only) = common.first() {
                points.push(PricePoint {
                    date: only,
                    close: level,
                });
            }
        }
        Self::new(symbol, points)
    }
}

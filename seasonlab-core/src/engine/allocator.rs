//! Basket allocation over several simulated strategies.
//!
//! Each day the visible strategies holding a position share the capital in
//! proportion to their weights, renormalized over that active subset. A day
//! with no active strategy earns nothing (cash). Hidden strategies are left
//! out of weighting, combination and overlap entirely.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calendar::REFERENCE_DAYS;
use crate::domain::{BasketStrategy, EquityCurve, Window};
use crate::engine::simulator::Simulation;
use crate::error::EngineError;

/// Weights keyed by [`BasketStrategy::key`].
pub type WeightMap = BTreeMap<String, f64>;

/// Allowed distance of a weight map's sum from 1.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// A basket member with its detected windows and simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyRun {
    pub strategy: BasketStrategy,
    pub windows: Vec<Window>,
    pub simulation: Simulation,
}

/// Capital attribution for one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub key: String,
    pub symbol: String,
    pub weight: f64,
    /// Profit attributed to this strategy, in capital units.
    pub pnl: f64,
    /// `pnl` as a percentage of starting capital.
    pub return_pct: f64,
    pub days_active: usize,
}

/// How much the visible strategies' active days coincide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concurrency {
    /// Days on which at least one strategy was active.
    pub union_days: usize,
    /// Days on which two or more strategies were active.
    pub shared_days: usize,
    pub max_concurrent: usize,
}

/// Result of [`combine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketResult {
    pub combined: EquityCurve,
    pub buy_hold: EquityCurve,
    pub contributions: Vec<Contribution>,
    pub concurrency: Concurrency,
    pub capital: f64,
    pub final_value: f64,
    pub trades_count: usize,
    pub symbols: Vec<String>,
}

/// Overlap between an existing basket and a candidate strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlapStats {
    pub overlap_days: usize,
    pub new_days: usize,
    pub stock_days: usize,
    pub basket_days: usize,
}

/// Set of reference days (1..=365).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySet {
    days: Vec<bool>,
}

impl Default for DaySet {
    fn default() -> Self {
        Self {
            days: vec![false; REFERENCE_DAYS as usize + 1],
        }
    }
}

impl DaySet {
    pub fn from_windows<'a>(windows: impl IntoIterator<Item = &'a Window>) -> Self {
        let mut set = Self::default();
        for w in windows {
            set.insert_window(w);
        }
        set
    }

    pub fn insert_window(&mut self, window: &Window) {
        for d in window.days() {
            self.days[d as usize] = true;
        }
    }

    pub fn contains(&self, doy: u32) -> bool {
        self.days.get(doy as usize).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.days.iter().filter(|&&b| b).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn intersection_len(&self, other: &DaySet) -> usize {
        self.days
            .iter()
            .zip(&other.days)
            .filter(|(a, b)| **a && **b)
            .count()
    }
}

/// Check that `weights` covers every visible strategy and sums to 1.
pub fn validate_weights(weights: &WeightMap, strategies: &[BasketStrategy]) -> Result<(), EngineError> {
    let mut sum = 0.0;
    for s in strategies.iter().filter(|s| s.visible) {
        let key = s.key();
        let w = *weights
            .get(&key)
            .ok_or_else(|| EngineError::invalid(format!("weight map has no entry for {key}")))?;
        if !w.is_finite() || w < 0.0 {
            return Err(EngineError::invalid(format!("weight for {key} is {w}")));
        }
        sum += w;
    }
    if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(EngineError::invalid(format!("weights sum to {sum}, expected 1")));
    }
    Ok(())
}

/// `1/N` for each visible strategy.
pub fn equal_weights(strategies: &[BasketStrategy]) -> WeightMap {
    let visible: Vec<&BasketStrategy> = strategies.iter().filter(|s| s.visible).collect();
    let w = 1.0 / visible.len().max(1) as f64;
    visible.into_iter().map(|s| (s.key(), w)).collect()
}

/// Combine strategy simulations into one capital-weighted basket curve.
pub fn combine(
    runs: &[StrategyRun],
    weights: Option<&WeightMap>,
    capital: f64,
) -> Result<BasketResult, EngineError> {
    if !capital.is_finite() || capital <= 0.0 {
        return Err(EngineError::invalid(format!("capital must be positive, got {capital}")));
    }
    let visible: Vec<&StrategyRun> = runs.iter().filter(|r| r.strategy.visible).collect();
    if visible.is_empty() {
        return Err(EngineError::no_data("basket has no visible strategies"));
    }

    let strategies: Vec<BasketStrategy> = runs.iter().map(|r| r.strategy.clone()).collect();
    let weight_map = match weights {
        Some(map) => {
            validate_weights(map, &strategies)?;
            map.clone()
        }
        None => equal_weights(&strategies),
    };
    let w: Vec<f64> = visible
        .iter()
        .map(|r| weight_map.get(&r.strategy.key()).copied().unwrap_or(0.0))
        .collect();

    let days = visible[0].simulation.strategy.len();
    if let Some(bad) = visible.iter().find(|r| {
        r.simulation.strategy.len() != days || r.simulation.buy_hold.len() != days
    }) {
        return Err(EngineError::invalid(format!(
            "{} curve has {} points, expected {days}",
            bad.strategy.key(),
            bad.simulation.strategy.len()
        )));
    }

    // Strategies without a single priced day are cash stand-ins; the
    // buy-and-hold line renormalizes over the rest.
    let bh_w: Vec<f64> = visible
        .iter()
        .zip(&w)
        .map(|(r, &wj)| if r.simulation.buy_hold.days_in_market() > 0 { wj } else { 0.0 })
        .collect();
    let bh_total: f64 = bh_w.iter().sum();
    let bh_w: Vec<f64> = if bh_total > 0.0 {
        bh_w.iter().map(|x| x / bh_total).collect()
    } else {
        bh_w
    };

    let mut combined = EquityCurve::flat(days);
    let mut buy_hold = EquityCurve::flat(days);
    let mut pnl = vec![0.0; visible.len()];
    let mut days_active = vec![0usize; visible.len()];
    let mut concurrency = Concurrency {
        union_days: 0,
        shared_days: 0,
        max_concurrent: 0,
    };
    let mut value = capital;

    for day in 0..days {
        let active: Vec<usize> = (0..visible.len())
            .filter(|&j| visible[j].simulation.strategy.in_market[day])
            .collect();
        for &j in &active {
            days_active[j] += 1;
        }
        if !active.is_empty() {
            concurrency.union_days += 1;
        }
        if active.len() > 1 {
            concurrency.shared_days += 1;
        }
        concurrency.max_concurrent = concurrency.max_concurrent.max(active.len());

        let active_weight: f64 = active.iter().map(|&j| w[j]).sum();
        let mut r = 0.0;
        if active_weight > 0.0 {
            for &j in &active {
                let share = w[j] / active_weight;
                let rj = visible[j].simulation.strategy.daily_returns[day];
                pnl[j] += value * share * rj;
                r += share * rj;
            }
        }
        combined.daily_returns[day] = r;
        combined.in_market[day] = !active.is_empty();
        value *= 1.0 + r;

        buy_hold.daily_returns[day] = visible
            .iter()
            .zip(&bh_w)
            .map(|(run, wj)| wj * run.simulation.buy_hold.daily_returns[day])
            .sum();
        buy_hold.in_market[day] = bh_total > 0.0;
    }

    let contributions = visible
        .iter()
        .enumerate()
        .map(|(j, run)| Contribution {
            key: run.strategy.key(),
            symbol: run.strategy.symbol.clone(),
            weight: w[j],
            pnl: pnl[j],
            return_pct: pnl[j] / capital * 100.0,
            days_active: days_active[j],
        })
        .collect();

    debug!(
        strategies = visible.len(),
        hidden = runs.len() - visible.len(),
        union_days = concurrency.union_days,
        "basket combined"
    );

    Ok(BasketResult {
        combined,
        buy_hold,
        contributions,
        concurrency,
        capital,
        final_value: value,
        trades_count: visible.iter().map(|r| r.simulation.records.len()).sum(),
        symbols: visible.iter().map(|r| r.strategy.symbol.clone()).collect(),
    })
}

/// Day overlap between the visible part of a basket and a candidate's windows.
pub fn basket_overlap<'a>(
    existing: impl IntoIterator<Item = (&'a BasketStrategy, &'a [Window])>,
    candidate: &[Window],
) -> OverlapStats {
    let mut basket = DaySet::default();
    for (strategy, windows) in existing {
        if strategy.visible {
            for w in windows {
                basket.insert_window(w);
            }
        }
    }
    let stock = DaySet::from_windows(candidate);
    let overlap_days = basket.intersection_len(&stock);
    let stock_days = stock.len();
    OverlapStats {
        overlap_days,
        new_days: stock_days - overlap_days,
        stock_days,
        basket_days: basket.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::simulator::SimYear;

    fn w(a: u32, b: u32) -> Window {
        Window::new(a, b).unwrap()
    }

    /// Strategy active on `window` earning `daily` each active day; B&H earns `bh`.
    fn run(symbol: &str, window: Window, daily: f64, bh: f64) -> StrategyRun {
        let mut strategy = EquityCurve::flat(365);
        for d in window.days() {
            strategy.daily_returns[d as usize - 1] = daily;
            strategy.in_market[d as usize - 1] = true;
        }
        StrategyRun {
            strategy: BasketStrategy::new(symbol, 30, 50.0),
            windows: vec![window],
            simulation: Simulation {
                year: SimYear::Averaged,
                labels: (1..=365).map(crate::calendar::doy_label).collect(),
                strategy,
                buy_hold: EquityCurve {
                    daily_returns: vec![bh; 365],
                    in_market: vec![true; 365],
                },
                trades: Vec::new(),
                records: Vec::new(),
                warnings: Vec::new(),
            },
        }
    }

    #[test]
    fn single_active_strategy_gets_full_weight() {
        // A: Jan 1-31, B: Feb 15 - Mar 15.
        let runs = vec![run("A", w(1, 31), 0.01, 0.0), run("B", w(46, 74), 0.02, 0.0)];
        let result = combine(&runs, None, 100_000.0).unwrap();
        // Jan 15 is index 14: only A is active.
        assert!((result.combined.daily_returns[14] - 0.01).abs() < 1e-12);
        assert!((result.combined.daily_returns[50] - 0.02).abs() < 1e-12);
        assert_eq!(result.combined.daily_returns[40], 0.0);
        assert!(!result.combined.in_market[40]);
    }

    #[test]
    fn overlapping_days_split_by_weight() {
        let runs = vec![run("A", w(1, 20), 0.01, 0.0), run("B", w(10, 30), 0.03, 0.0)];
        let mut weights = WeightMap::new();
        weights.insert(runs[0].strategy.key(), 0.25);
        weights.insert(runs[1].strategy.key(), 0.75);
        let result = combine(&runs, Some(&weights), 1000.0).unwrap();
        let shared = 0.25 * 0.01 + 0.75 * 0.03;
        assert!((result.combined.daily_returns[14] - shared).abs() < 1e-12);
        assert_eq!(result.concurrency.shared_days, 11);
        assert_eq!(result.concurrency.union_days, 30);
        assert_eq!(result.concurrency.max_concurrent, 2);
    }

    #[test]
    fn contributions_add_up_to_profit() {
        let runs = vec![run("A", w(1, 20), 0.01, 0.0), run("B", w(10, 30), -0.005, 0.0)];
        let result = combine(&runs, None, 10_000.0).unwrap();
        let total: f64 = result.contributions.iter().map(|c| c.pnl).sum();
        assert!((total - (result.final_value - result.capital)).abs() < 1e-6);
        let growth = 1.0 + result.combined.total_return_pct() / 100.0;
        assert!((result.final_value - 10_000.0 * growth).abs() < 1e-6);
    }

    #[test]
    fn hidden_strategies_are_ignored() {
        let mut hidden = run("H", w(1, 365), 0.5, 0.5);
        hidden.strategy.visible = false;
        let runs = vec![run("A", w(1, 10), 0.01, 0.001), hidden];
        let result = combine(&runs, None, 1.0).unwrap();
        assert_eq!(result.contributions.len(), 1);
        assert_eq!(result.symbols, vec!["A".to_string()]);
        assert!((result.buy_hold.daily_returns[100] - 0.001).abs() < 1e-12);
        assert_eq!(result.combined.daily_returns[100], 0.0);
    }

    #[test]
    fn all_hidden_is_no_data() {
        let mut only = run("A", w(1, 10), 0.01, 0.0);
        only.strategy.visible = false;
        assert!(matches!(
            combine(&[only], None, 1.0),
            Err(EngineError::NoData { .. })
        ));
    }

    #[test]
    fn weight_map_must_sum_to_one() {
        let runs = vec![run("A", w(1, 10), 0.01, 0.0), run("B", w(20, 30), 0.01, 0.0)];
        let mut weights = WeightMap::new();
        weights.insert(runs[0].strategy.key(), 0.5);
        weights.insert(runs[1].strategy.key(), 0.6);
        assert!(matches!(
            combine(&runs, Some(&weights), 1.0),
            Err(EngineError::InvalidParameter(_))
        ));
        weights.remove(&runs[1].strategy.key());
        assert!(combine(&runs, Some(&weights), 1.0).is_err());
    }

    #[test]
    fn equal_weights_sum_to_one() {
        let list = vec![
            BasketStrategy::new("A", 30, 50.0),
            BasketStrategy::new("B", 30, 50.0),
            BasketStrategy::new("C", 30, 50.0),
        ];
        let weights = equal_weights(&list);
        assert!(validate_weights(&weights, &list).is_ok());
    }

    #[test]
    fn buy_hold_blends_by_weight() {
        let runs = vec![run("A", w(1, 10), 0.0, 0.01), run("B", w(1, 10), 0.0, 0.03)];
        let result = combine(&runs, None, 1.0).unwrap();
        assert!((result.buy_hold.daily_returns[200] - 0.02).abs() < 1e-12);
    }

    #[test]
    fn cash_stand_ins_leave_buy_hold_undiluted() {
        let mut cash = run("C", w(1, 10), 0.0, 0.0);
        cash.simulation.strategy = EquityCurve::flat(365);
        cash.simulation.buy_hold = EquityCurve::flat(365);
        let runs = vec![run("A", w(1, 10), 0.0, 0.01), cash];
        let result = combine(&runs, None, 1.0).unwrap();
        assert!((result.buy_hold.daily_returns[200] - 0.01).abs() < 1e-12);
        // The cash stand-in still holds its capital weight.
        assert!((result.contributions[1].weight - 0.5).abs() < 1e-12);
    }

    #[test]
    fn overlap_counts() {
        let a = BasketStrategy::new("A", 30, 50.0);
        let mut hidden = BasketStrategy::new("H", 30, 50.0);
        hidden.visible = false;
        let a_windows = vec![w(1, 31)];
        let h_windows = vec![w(100, 200)];
        let stats = basket_overlap(
            [(&a, a_windows.as_slice()), (&hidden, h_windows.as_slice())],
            &[w(21, 40), w(150, 152)],
        );
        assert_eq!(stats.basket_days, 31);
        assert_eq!(stats.stock_days, 23);
        assert_eq!(stats.overlap_days, 11);
        assert_eq!(stats.new_days, 12);
    }
}

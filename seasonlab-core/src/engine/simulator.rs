//! Stop-loss / re-entry trade simulation over detected windows.
//!
//! Each window-year is walked close by close through [`PositionState`]. Daily
//! returns land on a calendar-indexed [`EquityCurve`] for the year; days outside
//! every window stay flat. Entry and exit each pay [`TradeRules::cost_factor`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calendar::{calendar_doy, date_label, dates_of_year, doy_label, REFERENCE_DAYS};
use crate::domain::{
    EquityCurve, ExitReason, PricePoint, PriceSeries, Trade, TradeLeg, TradeRecord, Window,
};
use crate::engine::returns_cache::{covers_span, doy_span, ReturnsCache, SPARSE_YEAR_DAYS};
use crate::engine::trade_state::{Day, DayAction, PositionState};
use crate::error::{EngineError, Warning};
use crate::params::TradeRules;

/// Which year a backtest view covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimYear {
    Year(i32),
    /// Mean day-by-day path across all analysis years.
    Averaged,
}

impl FromStr for SimYear {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "avg" | "average" | "averaged" => Ok(SimYear::Averaged),
            other => other.parse::<i32>().map(SimYear::Year).map_err(|_| {
                EngineError::invalid(format!("year must be a number or \"avg\", got {other:?}"))
            }),
        }
    }
}

impl fmt::Display for SimYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimYear::Year(y) => write!(f, "{y}"),
            SimYear::Averaged => f.write_str("avg"),
        }
    }
}

/// One simulated trading day inside a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimDay {
    pub date: NaiveDate,
    pub ret: f64,
    pub action: DayAction,
}

/// Result of walking one window through one year.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowYearRun {
    pub record: TradeRecord,
    pub days: Vec<SimDay>,
}

/// Backtest of a window set for one year or for the averaged year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Simulation {
    pub year: SimYear,
    /// "Jan-05" style label per curve point.
    pub labels: Vec<String>,
    pub strategy: EquityCurve,
    pub buy_hold: EquityCurve,
    /// Trades-table rows for the covered year(s).
    pub trades: Vec<Trade>,
    /// Underlying window-year records with their legs.
    pub records: Vec<TradeRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

/// Aggregate line of the per-year bar chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearlyRow {
    pub year: i32,
    pub strategy_return: f64,
    pub bh_return: f64,
    pub days_in_market: usize,
    pub total_trading_days: usize,
}

/// Summary block under the trades table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSummary {
    /// Mean over years of the compounded strategy return, percent.
    pub avg_profit: f64,
    /// Mean calendar days held per year.
    pub avg_days: u32,
    pub annualized: f64,
    /// Mean full-year buy-and-hold return, percent.
    pub bh_profit: f64,
    /// `annualized - bh_profit`.
    pub edge: f64,
    pub year_totals: BTreeMap<i32, Option<f64>>,
    pub year_bh: BTreeMap<i32, Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradesTable {
    pub trades: Vec<Trade>,
    pub summary: TradeSummary,
    pub years: Vec<i32>,
}

/// Walk `window` through one year's closes.
///
/// `None` when the year does not cover the window or fewer than two trading
/// days fall inside it.
pub fn simulate_window_year(
    window: Window,
    year_points: &[PricePoint],
    rules: &TradeRules,
) -> Option<WindowYearRun> {
    let (first_doy, last_doy) = doy_span(year_points)?;
    if !covers_span(first_doy, last_doy, window.start_doy, window.end_doy) {
        return None;
    }
    let inside: Vec<&PricePoint> = year_points
        .iter()
        .filter(|p| window.contains(calendar_doy(p.date)))
        .collect();
    if inside.len() < 2 {
        return None;
    }

    let cf = rules.cost_factor();
    let mut state = PositionState::Idle;
    let mut open: Option<&PricePoint> = None;
    let mut legs = Vec::new();
    let mut days = Vec::with_capacity(inside.len());
    let mut prev_close = inside[0].close;

    for (i, &p) in inside.iter().enumerate() {
        let day = Day {
            close: p.close,
            is_last: i + 1 == inside.len(),
        };
        let (next, action) = state.step(day, rules);
        let ret = match action {
            DayAction::Enter | DayAction::ReEnter => {
                open = Some(p);
                cf - 1.0
            }
            DayAction::Hold => p.close / prev_close - 1.0,
            DayAction::StopOut | DayAction::WindowEnd => {
                if let Some(entry) = open.take() {
                    let reason = if action == DayAction::StopOut {
                        ExitReason::StopLoss
                    } else {
                        ExitReason::WindowEnd
                    };
                    legs.push(TradeLeg {
                        entry_date: entry.date,
                        entry_price: entry.close,
                        exit_date: p.date,
                        exit_price: p.close,
                        exit_reason: reason,
                        return_pct: (p.close / entry.close * cf * cf - 1.0) * 100.0,
                    });
                }
                p.close / prev_close * cf - 1.0
            }
            DayAction::Flat => 0.0,
        };
        days.push(SimDay {
            date: p.date,
            ret,
            action,
        });
        prev_close = p.close;
        state = next;
    }

    let entry_date = legs.first()?.entry_date;
    let exit_date = legs.last()?.exit_date;
    let growth: f64 = legs.iter().map(|l| 1.0 + l.return_pct / 100.0).product();
    let record = TradeRecord {
        window,
        year: entry_date.year(),
        entry_date,
        exit_date,
        days: ((exit_date - entry_date).num_days() + 1) as u32,
        days_in_market: days.iter().filter(|d| d.action.in_market()).count(),
        profit_pct: (growth - 1.0) * 100.0,
        legs,
    };
    Some(WindowYearRun { record, days })
}

/// Full-year buy-and-hold return in percent, from the prior year's last close.
pub fn buy_hold_return(series: &PriceSeries, year: i32) -> Option<f64> {
    let points = series.year(year);
    let first = points.first()?;
    let last = points.last()?;
    let base = series.close_before(first.date).unwrap_or(first.close);
    Some((last.close / base - 1.0) * 100.0)
}

fn sparse_warning(year: i32, trading_days: usize) -> Option<Warning> {
    (trading_days < SPARSE_YEAR_DAYS).then_some(Warning::SparseYear { year, trading_days })
}

/// Simulate every window through one real year.
pub fn simulate_year(
    series: &PriceSeries,
    windows: &[Window],
    year: i32,
    rules: &TradeRules,
) -> Result<Simulation, EngineError> {
    rules.validate()?;
    let points = series.year(year);
    if points.is_empty() {
        return Err(EngineError::no_data(format!("{} in {year}", series.symbol())));
    }

    let dates = dates_of_year(year);
    let mut strategy = EquityCurve::flat(dates.len());
    let mut buy_hold = EquityCurve::flat(dates.len());

    let mut prev = series.close_before(points[0].date).unwrap_or(points[0].close);
    for p in points {
        let slot = p.date.ordinal0() as usize;
        buy_hold.daily_returns[slot] = p.close / prev - 1.0;
        buy_hold.in_market[slot] = true;
        prev = p.close;
    }

    let mut records = Vec::new();
    for &window in windows {
        let Some(run) = simulate_window_year(window, points, rules) else {
            continue;
        };
        for day in &run.days {
            let slot = day.date.ordinal0() as usize;
            let r = &mut strategy.daily_returns[slot];
            *r = (1.0 + *r) * (1.0 + day.ret) - 1.0;
            strategy.in_market[slot] |= day.action.in_market();
        }
        records.push(run.record);
    }

    let trades = records
        .iter()
        .map(|r| Trade::from_year_profits(r.window, BTreeMap::from([(year, Some(r.profit_pct))])))
        .collect();
    debug!(
        symbol = series.symbol(),
        year,
        windows = windows.len(),
        trades = records.len(),
        "year simulated"
    );

    Ok(Simulation {
        year: SimYear::Year(year),
        labels: dates.iter().map(|d| date_label(*d)).collect(),
        strategy,
        buy_hold,
        trades,
        records,
        warnings: sparse_warning(year, points.len()).into_iter().collect(),
    })
}

/// Averaged-year view: mean daily returns across `years`, stops disabled.
///
/// The strategy buys at the close of each window's first day and sells at the
/// close of its last day, paying costs on both. Trade rows come from real
/// per-year runs with stops switched off.
pub fn simulate_averaged(
    cache: &ReturnsCache,
    series: &PriceSeries,
    windows: &[Window],
    years: &[i32],
    rules: &TradeRules,
) -> Result<Simulation, EngineError> {
    rules.validate()?;
    if !years.iter().any(|&y| cache.has_year(y)) {
        return Err(EngineError::no_data(format!("{} in years {years:?}", series.symbol())));
    }
    let plain = rules.without_stops();
    let cf = plain.cost_factor();
    let means = cache.mean_day_returns(years);

    let days = REFERENCE_DAYS as usize;
    let buy_hold = EquityCurve {
        daily_returns: means.clone(),
        in_market: vec![true; days],
    };
    let mut strategy = EquityCurve::flat(days);
    for w in windows {
        for doy in w.days() {
            let slot = doy as usize - 1;
            let r = if doy == w.start_doy {
                cf - 1.0
            } else if doy == w.end_doy {
                (1.0 + means[slot]) * cf - 1.0
            } else {
                means[slot]
            };
            strategy.daily_returns[slot] = (1.0 + strategy.daily_returns[slot]) * (1.0 + r) - 1.0;
            strategy.in_market[slot] = true;
        }
    }

    let table = trades_table(series, windows, years, &plain)?;
    let mut records = Vec::new();
    for &y in years {
        let points = series.year(y);
        for &w in windows {
            if let Some(run) = simulate_window_year(w, points, &plain) {
                records.push(run.record);
            }
        }
    }

    Ok(Simulation {
        year: SimYear::Averaged,
        labels: (1..=REFERENCE_DAYS).map(doy_label).collect(),
        strategy,
        buy_hold,
        trades: table.trades,
        records,
        warnings: cache.sparse_warnings(years),
    })
}

/// Dispatch on [`SimYear`].
pub fn simulate(
    cache: &ReturnsCache,
    series: &PriceSeries,
    windows: &[Window],
    years: &[i32],
    which: SimYear,
    rules: &TradeRules,
) -> Result<Simulation, EngineError> {
    match which {
        SimYear::Year(y) => simulate_year(series, windows, y, rules),
        SimYear::Averaged => simulate_averaged(cache, series, windows, years, rules),
    }
}

/// Per-window rows across `years` plus the summary block.
pub fn trades_table(
    series: &PriceSeries,
    windows: &[Window],
    years: &[i32],
    rules: &TradeRules,
) -> Result<TradesTable, EngineError> {
    rules.validate()?;

    let mut per_window: Vec<BTreeMap<i32, Option<f64>>> = vec![BTreeMap::new(); windows.len()];
    let mut year_totals = BTreeMap::new();
    let mut year_bh = BTreeMap::new();
    let mut days_held = Vec::new();

    for &year in years {
        let points = series.year(year);
        let mut growth = 1.0;
        let mut held = 0u32;
        for (i, &w) in windows.iter().enumerate() {
            let record = simulate_window_year(w, points, rules).map(|run| run.record);
            let profit = record.as_ref().map(|r| r.profit_pct);
            if let Some(r) = &record {
                growth *= 1.0 + r.profit_pct / 100.0;
                held += r.days;
            }
            per_window[i].insert(year, profit);
        }
        if points.is_empty() {
            year_totals.insert(year, None);
            year_bh.insert(year, None);
        } else {
            year_totals.insert(year, Some((growth - 1.0) * 100.0));
            year_bh.insert(year, buy_hold_return(series, year));
            days_held.push(held);
        }
    }

    let trades = windows
        .iter()
        .zip(per_window)
        .map(|(&w, profits)| Trade::from_year_profits(w, profits))
        .collect();

    let avg_profit = mean(year_totals.values().flatten().copied());
    let bh_profit = mean(year_bh.values().flatten().copied());
    let avg_days = if days_held.is_empty() {
        0
    } else {
        days_held.iter().sum::<u32>() / days_held.len() as u32
    };
    let annualized = if avg_days > 0 {
        avg_profit * 365.0 / avg_days as f64
    } else {
        0.0
    };

    Ok(TradesTable {
        trades,
        summary: TradeSummary {
            avg_profit,
            avg_days,
            annualized,
            bh_profit,
            edge: annualized - bh_profit,
            year_totals,
            year_bh,
        },
        years: years.to_vec(),
    })
}

/// One bar-chart row per year with data.
pub fn yearly_rows(
    series: &PriceSeries,
    windows: &[Window],
    years: &[i32],
    rules: &TradeRules,
) -> Result<Vec<YearlyRow>, EngineError> {
    rules.validate()?;
    let mut rows = Vec::with_capacity(years.len());
    for &year in years {
        let sim = match simulate_year(series, windows, year, rules) {
            Ok(sim) => sim,
            Err(EngineError::NoData { .. }) => continue,
            Err(e) => return Err(e),
        };
        rows.push(YearlyRow {
            year,
            strategy_return: sim.strategy.total_return_pct(),
            bh_return: sim.buy_hold.total_return_pct(),
            days_in_market: sim.strategy.days_in_market(),
            total_trading_days: series.year(year).len(),
        });
    }
    Ok(rows)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

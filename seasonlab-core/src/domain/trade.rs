//! Trade records produced by the simulator.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::window::Window;

/// Why a leg was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Marked to market on the window's last trading day.
    WindowEnd,
    /// Close breached the stop below the cost basis.
    StopLoss,
}

/// One continuous holding: entry close to exit close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLeg {
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub exit_date: NaiveDate,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    /// Net return in percent after fees and tax.
    pub return_pct: f64,
}

/// Everything that happened inside one window in one year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub window: Window,
    pub year: i32,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    /// Calendar days from first entry to final exit, inclusive.
    pub days: u32,
    /// Trading days on which capital was at risk.
    pub days_in_market: usize,
    /// Compounded net return of all legs, in percent.
    pub profit_pct: f64,
    pub legs: Vec<TradeLeg>,
}

impl TradeRecord {
    pub fn stopped_out(&self) -> bool {
        self.legs
            .iter()
            .any(|l| l.exit_reason == ExitReason::StopLoss)
    }

    pub fn reentered(&self) -> bool {
        self.legs.len() > 1
    }

    pub fn is_winner(&self) -> bool {
        self.profit_pct > 0.0
    }
}

/// Trades-table row: one window across all analysed years.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub window: Window,
    pub entry_label: String,
    pub exit_label: String,
    pub days: u32,
    /// Mean of the per-year profits that exist.
    pub avg_profit: f64,
    /// `avg_profit * 365 / days`.
    pub annualized: f64,
    pub year_profits: BTreeMap<i32, Option<f64>>,
}

impl Trade {
    pub fn from_year_profits(window: Window, year_profits: BTreeMap<i32, Option<f64>>) -> Self {
        let values: Vec<f64> = year_profits.values().flatten().copied().collect();
        let avg_profit = if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        };
        let days = window.length();
        Self {
            window,
            entry_label: window.start_label(),
            exit_label: window.end_label(),
            days,
            avg_profit,
            annualized: avg_profit * 365.0 / days as f64,
            year_profits,
        }
    }
}

//! CSV exports: windows table, trades table, trading calendars and curves.
//!
//! - **Windows / trades**: headed tables with one column per analysis year
//!   (newest first), blanks for years without data
//! - **Strategy / plan calendars**: headerless `date,symbol,BUY|SELL` lines that
//!   can be concatenated across symbols and sorted into a yearly plan
//! - **Equity**: cumulative strategy and buy-and-hold percent per curve point

use anyhow::{Context, Result};

use seasonlab_core::engine::TradesTable;
use seasonlab_core::{DetectionReport, Simulation, Window};

fn fmt2(v: f64) -> String {
    format!("{v:.2}")
}

fn opt2(v: Option<&Option<f64>>) -> String {
    v.copied().flatten().map(fmt2).unwrap_or_default()
}

fn finish(wtr: csv::Writer<Vec<u8>>) -> Result<String> {
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Tables ─────────────────────────────────────────────────────────

/// Detected windows with per-year returns.
///
/// Columns: Start, End, Days, Avg Return %, Win Rate %, Score, Yield bps/day,
/// then one column per year (newest first).
pub fn export_windows_csv(report: &DetectionReport) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    let mut header: Vec<String> = [
        "Start",
        "End",
        "Days",
        "Avg Return %",
        "Win Rate %",
        "Score",
        "Yield bps/day",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    header.extend(report.years.iter().rev().map(|y| y.to_string()));
    wtr.write_record(&header)?;

    for w in &report.windows {
        let mut row = vec![
            w.start_label.clone(),
            w.end_label.clone(),
            w.length.to_string(),
            fmt2(w.avg_return),
            format!("{:.0}", w.win_rate),
            fmt2(w.score),
            fmt2(w.yield_per_day),
        ];
        row.extend(report.years.iter().rev().map(|y| opt2(w.year_returns.get(y))));
        wtr.write_record(&row)?;
    }
    finish(wtr)
}

/// Trades table followed by TOTAL, B&H and EDGE summary rows.
///
/// Columns: Entry, Exit, Avg Profit %, Days, Annualized %, then one column
/// per year (newest first).
pub fn export_trades_csv(table: &TradesTable) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    let years: Vec<i32> = table.years.iter().rev().copied().collect();

    let mut header: Vec<String> = ["Entry", "Exit", "Avg Profit %", "Days", "Annualized %"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    header.extend(years.iter().map(|y| y.to_string()));
    wtr.write_record(&header)?;

    for t in &table.trades {
        let mut row = vec![
            t.entry_label.clone(),
            t.exit_label.clone(),
            fmt2(t.avg_profit),
            t.days.to_string(),
            fmt2(t.annualized),
        ];
        row.extend(years.iter().map(|y| opt2(t.year_profits.get(y))));
        wtr.write_record(&row)?;
    }

    let s = &table.summary;
    let mut total = vec![
        "TOTAL".to_string(),
        String::new(),
        fmt2(s.avg_profit),
        s.avg_days.to_string(),
        fmt2(s.annualized),
    ];
    total.extend(years.iter().map(|y| opt2(s.year_totals.get(y))));
    wtr.write_record(&total)?;

    let mut bh = vec![
        "B&H".to_string(),
        String::new(),
        fmt2(s.bh_profit),
        "365".to_string(),
        fmt2(s.bh_profit),
    ];
    bh.extend(years.iter().map(|y| opt2(s.year_bh.get(y))));
    wtr.write_record(&bh)?;

    let mut edge = vec![
        "EDGE".to_string(),
        "vs B&H".to_string(),
        String::new(),
        String::new(),
        fmt2(s.edge),
    ];
    edge.extend(years.iter().map(|_| String::new()));
    wtr.write_record(&edge)?;

    finish(wtr)
}

// ─── Calendars ──────────────────────────────────────────────────────

/// One strategy's BUY/SELL dates, no header.
pub fn export_strategy_csv(name: &str, windows: &[Window]) -> Result<String> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(vec![]);
    for w in windows {
        wtr.write_record([w.start_label().as_str(), name, "BUY"])?;
        wtr.write_record([w.end_label().as_str(), name, "SELL"])?;
    }
    finish(wtr)
}

/// Merged BUY/SELL calendar for several strategies, sorted by day of year.
///
/// Ties keep input order.
pub fn export_plan_calendar_csv(plan: &[(String, Vec<Window>)]) -> Result<String> {
    let mut rows: Vec<(u32, String, &str, &str)> = Vec::new();
    for (name, windows) in plan {
        for w in windows {
            rows.push((w.start_doy, w.start_label(), name.as_str(), "BUY"));
            rows.push((w.end_doy, w.end_label(), name.as_str(), "SELL"));
        }
    }
    rows.sort_by_key(|r| r.0);

    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(vec![]);
    for (_, label, name, action) in &rows {
        wtr.write_record([label.as_str(), *name, *action])?;
    }
    finish(wtr)
}

// ─── Curves ─────────────────────────────────────────────────────────

/// Cumulative curves: `day,label,strategy,bh` (percent).
pub fn export_equity_csv(sim: &Simulation) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["day", "label", "strategy", "bh"])?;
    let strategy = sim.strategy.cumulative_pct();
    let bh = sim.buy_hold.cumulative_pct();
    for (i, label) in sim.labels.iter().enumerate() {
        let s = strategy.get(i).copied().unwrap_or_default();
        let b = bh.get(i).copied().unwrap_or_default();
        wtr.write_record([
            (i + 1).to_string(),
            label.clone(),
            format!("{s:.4}"),
            format!("{b:.4}"),
        ])?;
    }
    finish(wtr)
}

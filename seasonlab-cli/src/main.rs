//! SeasonLab CLI: seasonal window detection, backtests and baskets.
//!
//! Commands:
//! - `windows`: detect recurring seasonal windows for a symbol
//! - `backtest`: simulate the windows for one year or the averaged year
//! - `yearly`: per-year strategy vs buy-and-hold bars with Sharpe
//! - `optimize`: sweep window sizes × thresholds and rank them
//! - `export`: CSV tables and trading calendars
//! - `basket`: combine, compare and manage named baskets
//!
//! Results print as pretty JSON; exports print CSV.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use seasonlab_core::{BasketStrategy, SimYear, WeightMap};
use seasonlab_runner::export::{
    export_equity_csv, export_plan_calendar_csv, export_strategy_csv, export_trades_csv,
    export_windows_csv,
};
use seasonlab_runner::{
    display_name, parse_symbols, BasketQuery, Objective, Query, RunnerConfig, SeasonalService,
    SweepGrid, Weighting,
};

#[derive(Parser)]
#[command(
    name = "seasonlab",
    about = "SeasonLab CLI: seasonal window detection and basket backtests"
)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when it does not exist.
    #[arg(long, global = true, default_value = "seasonlab.toml")]
    config: PathBuf,

    /// Verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Detection and trading parameters shared by the single-symbol commands.
#[derive(Args, Clone)]
struct ParamArgs {
    /// Ticker, or comma-separated tickers traded as one blended series.
    symbol: String,

    /// Window size in days. Defaults to the config value.
    #[arg(short, long)]
    window: Option<u32>,

    /// Minimum win rate, percent. Defaults to the config value.
    #[arg(short, long)]
    threshold: Option<f64>,

    /// Calendar year, or `avg` for the averaged year.
    #[arg(long)]
    year: Option<SimYear>,

    /// Stop-loss, percent below entry.
    #[arg(long)]
    stop_loss: Option<f64>,

    /// Re-entry trigger, percent below the stop exit.
    #[arg(long)]
    reentry: Option<f64>,

    /// Fees per side, percent.
    #[arg(long)]
    fees: Option<f64>,

    /// Tax per side, percent.
    #[arg(long)]
    tax: Option<f64>,
}

impl ParamArgs {
    fn query(&self) -> Query {
        Query {
            symbol: self.symbol.clone(),
            window_size: self.window,
            threshold: self.threshold,
            year: self.year,
            stop_loss_pct: self.stop_loss,
            reentry_pct: self.reentry,
            fees_pct: self.fees,
            tax_pct: self.tax,
        }
    }
}

/// Year, costs and capital for basket runs.
#[derive(Args, Clone)]
struct BasketArgs {
    /// Calendar year, or `avg` for the averaged year.
    #[arg(long)]
    year: Option<SimYear>,

    /// Fees per side, percent.
    #[arg(long)]
    fees: Option<f64>,

    /// Tax per side, percent.
    #[arg(long)]
    tax: Option<f64>,

    /// Starting capital.
    #[arg(long)]
    capital: Option<f64>,

    /// Explicit weight as `KEY=WEIGHT` (repeatable). Overrides `--weighting`.
    #[arg(long = "weight", value_parser = parse_weight)]
    weights: Vec<(String, f64)>,

    /// `equal`, `stored`, `return` or `cap`. Saved weights, else equal, when omitted.
    #[arg(long)]
    weighting: Option<Weighting>,

    /// Market cap as `SYMBOL=VALUE` (repeatable), for `--weighting cap`.
    #[arg(long = "cap", value_parser = parse_cap)]
    caps: Vec<(String, f64)>,
}

impl BasketArgs {
    fn query(&self, strategies: Vec<BasketStrategy>) -> BasketQuery {
        let weights: Option<WeightMap> =
            (!self.weights.is_empty()).then(|| self.weights.iter().cloned().collect());
        BasketQuery {
            strategies,
            weights,
            weighting: self.weighting,
            caps: (!self.caps.is_empty()).then(|| self.caps.iter().cloned().collect()),
            year: self.year,
            fees_pct: self.fees,
            tax_pct: self.tax,
            capital: self.capital,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Detect seasonal windows.
    Windows {
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Backtest the detected windows for one year or the averaged year.
    Backtest {
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Per-year strategy and buy-and-hold returns.
    Yearly {
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Sweep window sizes and thresholds.
    Optimize {
        #[command(flatten)]
        params: ParamArgs,

        /// `profit` or `yield`.
        #[arg(long, default_value = "profit")]
        objective: Objective,

        /// Number of ranked results to print.
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Write CSV to stdout.
    Export {
        #[command(subcommand)]
        what: ExportKind,
    },
    /// Basket commands.
    Basket {
        #[command(subcommand)]
        action: BasketAction,
    },
}

#[derive(Subcommand)]
enum ExportKind {
    /// Windows table with per-year returns.
    Windows {
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Trades table with TOTAL, B&H and EDGE rows.
    Trades {
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Cumulative strategy and buy-and-hold curves.
    Equity {
        #[command(flatten)]
        params: ParamArgs,
    },
    /// BUY/SELL calendar for one symbol.
    Strategy {
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Merged BUY/SELL calendar for a saved basket.
    Plan {
        /// Basket name.
        name: String,
    },
}

#[derive(Subcommand)]
enum BasketAction {
    /// Combine strategies given inline as `SYMBOL:WINDOW@THRESHOLD`.
    Combine {
        #[arg(required = true, value_parser = parse_strategy)]
        strategies: Vec<BasketStrategy>,

        #[command(flatten)]
        args: BasketArgs,
    },
    /// Combine a saved basket.
    Run {
        name: String,

        #[command(flatten)]
        args: BasketArgs,
    },
    /// Day overlap of a candidate with a saved basket.
    Overlap {
        name: String,

        #[arg(value_parser = parse_strategy)]
        candidate: BasketStrategy,
    },
    /// Create or replace a basket.
    Save {
        name: String,

        #[arg(required = true, value_parser = parse_strategy)]
        strategies: Vec<BasketStrategy>,
    },
    /// Add a strategy to a basket, replacing one with the same key.
    Add {
        name: String,

        #[arg(value_parser = parse_strategy)]
        strategy: BasketStrategy,

        /// Saved capital weight; the basket's weights are rescaled to sum to 1.
        #[arg(long)]
        weight: Option<f64>,
    },
    /// List saved baskets.
    List,
    /// Print a saved basket.
    Show { name: String },
    /// Exclude a strategy from computations without removing it.
    Hide { name: String, key: String },
    /// Include a hidden strategy again.
    Unhide { name: String, key: String },
    /// Delete a saved basket.
    Delete { name: String },
}

/// `SYMBOL:WINDOW@THRESHOLD`, the same shape as a strategy key.
fn parse_strategy(s: &str) -> Result<BasketStrategy, String> {
    let (symbol, rest) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("expected SYMBOL:WINDOW@THRESHOLD, got {s:?}"))?;
    let (window, threshold) = rest
        .split_once('@')
        .ok_or_else(|| format!("expected WINDOW@THRESHOLD after ':', got {rest:?}"))?;
    let window: u32 = window
        .parse()
        .map_err(|e| format!("bad window size {window:?}: {e}"))?;
    let threshold: f64 = threshold
        .parse()
        .map_err(|e| format!("bad threshold {threshold:?}: {e}"))?;
    if symbol.trim().is_empty() {
        return Err(format!("missing symbol in {s:?}"));
    }
    Ok(BasketStrategy::new(symbol.trim().to_uppercase(), window, threshold))
}

fn parse_weight(s: &str) -> Result<(String, f64), String> {
    let (key, weight) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("expected KEY=WEIGHT, got {s:?}"))?;
    let weight: f64 = weight
        .parse()
        .map_err(|e| format!("bad weight {weight:?}: {e}"))?;
    Ok((key.to_string(), weight))
}

fn parse_cap(s: &str) -> Result<(String, f64), String> {
    let (symbol, cap) = parse_weight(s)?;
    Ok((symbol.trim().to_uppercase(), cap))
}

fn init_logging(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let config = RunnerConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;
    let service = SeasonalService::from_config(config)?;

    match cli.command {
        Commands::Windows { params } => print_json(&service.detect_windows(&params.query())?),
        Commands::Backtest { params } => print_json(&service.backtest_window(&params.query())?),
        Commands::Yearly { params } => print_json(&service.backtest_yearly(&params.query())?),
        Commands::Optimize {
            params,
            objective,
            top,
        } => run_optimize(&service, &params, objective, top),
        Commands::Export { what } => run_export(&service, what),
        Commands::Basket { action } => run_basket(&service, action),
    }
}

fn run_optimize(
    service: &SeasonalService,
    params: &ParamArgs,
    objective: Objective,
    top: usize,
) -> Result<()> {
    let grid = SweepGrid::default();
    let Some(results) = service.optimize(&params.query(), &grid, objective)? else {
        bail!("no price history for {} in the lookback years", params.symbol);
    };
    print_json(&results.top_n(top))
}

fn run_export(service: &SeasonalService, what: ExportKind) -> Result<()> {
    let csv = match what {
        ExportKind::Windows { params } => {
            let Some(report) = service.detection(&params.query())? else {
                bail!("no price history for {}", params.symbol);
            };
            export_windows_csv(&report)?
        }
        ExportKind::Trades { params } => {
            let Some(table) = service.trades(&params.query())? else {
                bail!("no price history for {}", params.symbol);
            };
            export_trades_csv(&table)?
        }
        ExportKind::Equity { params } => {
            let Some(sim) = service.simulation(&params.query())? else {
                bail!("no price history for {}", params.symbol);
            };
            export_equity_csv(&sim)?
        }
        ExportKind::Strategy { params } => {
            let q = params.query();
            let Some(report) = service.detection(&q)? else {
                bail!("no price history for {}", params.symbol);
            };
            let config = service.config();
            let symbols = parse_symbols(
                &q.symbol,
                config.max_symbols,
                config.symbol_suffix.as_deref(),
            )?;
            let name = display_name(&symbols, config.symbol_suffix.as_deref());
            export_strategy_csv(&name, &report.window_list())?
        }
        ExportKind::Plan { name } => {
            let strategies = service.store().load(&name)?;
            let mut plan = Vec::new();
            for s in strategies.iter().filter(|s| s.visible) {
                plan.push((s.symbol.clone(), service.strategy_windows(s)?));
            }
            export_plan_calendar_csv(&plan)?
        }
    };
    print!("{csv}");
    Ok(())
}

fn run_basket(service: &SeasonalService, action: BasketAction) -> Result<()> {
    let store = service.store();
    match action {
        BasketAction::Combine { strategies, args } => {
            print_json(&service.combine_basket(&args.query(strategies))?)
        }
        BasketAction::Run { name, args } => {
            print_json(&service.combine_saved(&name, args.query(Vec::new()))?)
        }
        BasketAction::Overlap { name, candidate } => {
            let existing = store.load(&name)?;
            print_json(&service.basket_overlap(&existing, &candidate)?)
        }
        BasketAction::Save { name, strategies } => {
            store.save(&name, &strategies)?;
            println!("Saved basket '{name}' ({} strategies)", strategies.len());
            Ok(())
        }
        BasketAction::Add {
            name,
            mut strategy,
            weight,
        } => {
            if let Some(w) = weight {
                if !w.is_finite() || w < 0.0 {
                    bail!("weight must be a non-negative number, got {w}");
                }
                strategy.weight = w;
            }
            print_json(&store.upsert(&name, strategy)?)
        }
        BasketAction::List => {
            for name in store.list()? {
                println!("{name}");
            }
            Ok(())
        }
        BasketAction::Show { name } => print_json(&store.load(&name)?),
        BasketAction::Hide { name, key } => print_json(&store.set_visible(&name, &key, false)?),
        BasketAction::Unhide { name, key } => print_json(&store.set_visible(&name, &key, true)?),
        BasketAction::Delete { name } => {
            store.delete(&name)?;
            println!("Deleted basket '{name}'");
            Ok(())
        }
    }
}

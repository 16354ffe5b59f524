//! `SeasonalService`: the function groups an HTTP or UI layer calls.
//!
//! Every call resolves symbols, loads prices through the [`PriceSource`] seam,
//! reuses memoized caches/detections and hands plain serializable responses
//! back. A symbol or year without usable history yields an empty response
//! rather than an error; bad parameters are rejected before any work starts.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use seasonlab_core::calendar::{analysis_years, date_label, dates_of_year, doy_label, REFERENCE_DAYS};
use seasonlab_core::engine::{
    simulate, trades_table, yearly_rows, Concurrency, Contribution, TradesTable, YearlyRow,
};
use seasonlab_core::{
    basket_overlap, combine, BasketStrategy, DetectParams, DetectionReport, EngineError,
    EquityCurve, OverlapStats, ReturnsCache, SimYear, Simulation, StrategyRun, Trade,
    TradeRecord, TradeRules, Warning, WeightMap, Window, WindowStat,
};

use crate::config::{ConfigError, RunnerConfig};
use crate::data_loader::{load_series, parse_symbols, CsvSource, LoadError, LoadedSeries, PriceSource};
use crate::memo::DetectionMemo;
use crate::metrics::{max_drawdown, YearlyMetrics};
use crate::optimize::{sweep, Objective, SweepGrid, SweepResults};
use crate::store::{BasketStore, StoreError};
use crate::weights::{
    EqualWeight, MarketCapWeighted, ReturnWeighted, StoredWeight, WeightScheme, Weighting,
};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ─── Requests ───────────────────────────────────────────────────────

/// Single-symbol request. Unset fields fall back to the config defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// One ticker or a comma-separated basket.
    pub symbol: String,
    pub window_size: Option<u32>,
    pub threshold: Option<f64>,
    /// Defaults to the averaged year.
    pub year: Option<SimYear>,
    pub stop_loss_pct: Option<f64>,
    pub reentry_pct: Option<f64>,
    pub fees_pct: Option<f64>,
    pub tax_pct: Option<f64>,
}

impl Query {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Self::default()
        }
    }
}

/// Basket request: strategies plus shared year and cost settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasketQuery {
    pub strategies: Vec<BasketStrategy>,
    /// Keyed by [`BasketStrategy::key`]. Takes precedence over `weighting`.
    pub weights: Option<WeightMap>,
    /// Scheme used when `weights` is absent; saved weights when unset.
    pub weighting: Option<Weighting>,
    /// Market caps by ticker, for [`Weighting::Cap`].
    pub caps: Option<BTreeMap<String, f64>>,
    pub year: Option<SimYear>,
    pub fees_pct: Option<f64>,
    pub tax_pct: Option<f64>,
    pub capital: Option<f64>,
}

// ─── Responses ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowsResponse {
    pub symbol: String,
    pub windows: Vec<WindowStat>,
    pub total_days: u32,
    pub total_return: f64,
    pub years: Vec<i32>,
    pub warnings: Vec<Warning>,
    pub synthetic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResponse {
    pub symbol: String,
    pub year: SimYear,
    /// Cumulative strategy return, percent, one point per label.
    pub seasonal_curve: Vec<f64>,
    pub bh_curve: Vec<f64>,
    pub dates: Vec<String>,
    pub trades: Vec<Trade>,
    pub records: Vec<TradeRecord>,
    pub total_return: f64,
    pub bh_return: f64,
    pub days_in_market: usize,
    /// Most negative peak-to-trough move of the strategy curve, percent.
    pub max_drawdown: f64,
    pub warning: Option<String>,
    pub synthetic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearlyResponse {
    pub symbol: String,
    pub rows: Vec<YearlyRow>,
    pub sharpe: f64,
    pub metrics: YearlyMetrics,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyCurve {
    pub key: String,
    pub symbol: String,
    pub weight: f64,
    pub curve: Vec<f64>,
}

/// One trades-table row tagged with its strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketTrade {
    pub key: String,
    pub symbol: String,
    #[serde(flatten)]
    pub trade: Trade,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketResponse {
    pub year: SimYear,
    pub dates: Vec<String>,
    pub combined_curve: Vec<f64>,
    pub bh_curve: Vec<f64>,
    pub strategy_curves: Vec<StrategyCurve>,
    pub trades: Vec<BasketTrade>,
    pub trades_count: usize,
    /// Days with at least one strategy in the market.
    pub total_days: usize,
    pub symbols: Vec<String>,
    pub capital: f64,
    pub final_value: f64,
    pub contributions: Vec<Contribution>,
    pub concurrency: Concurrency,
    /// Name of the scheme that produced the weights.
    pub weighting: String,
    pub warning: Option<String>,
}

fn join_warnings(warnings: &[Warning], extra: &[String]) -> Option<String> {
    let all: Vec<String> = warnings
        .iter()
        .map(ToString::to_string)
        .chain(extra.iter().cloned())
        .collect();
    (!all.is_empty()).then(|| all.join("; "))
}

/// A loaded symbol with its memoized cache and detection.
struct Prepared {
    loaded: LoadedSeries,
    cache: Arc<ReturnsCache>,
    report: Arc<DetectionReport>,
    years: Vec<i32>,
}

// ─── Service ────────────────────────────────────────────────────────

pub struct SeasonalService {
    config: RunnerConfig,
    source: Box<dyn PriceSource>,
    memo: DetectionMemo,
    store: BasketStore,
}

impl SeasonalService {
    pub fn new(config: RunnerConfig, source: impl PriceSource + 'static) -> Self {
        Self {
            store: BasketStore::new(&config.basket_dir),
            source: Box::new(source),
            memo: DetectionMemo::new(),
            config,
        }
    }

    /// Service reading CSV prices from `config.data_dir`.
    pub fn from_config(config: RunnerConfig) -> Result<Self, ServiceError> {
        config.validate()?;
        let source = CsvSource::from_config(&config);
        Ok(Self::new(config, source))
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn store(&self) -> &BasketStore {
        &self.store
    }

    pub fn memo(&self) -> &DetectionMemo {
        &self.memo
    }

    fn detect_params(&self, q: &Query) -> Result<DetectParams, EngineError> {
        let d = &self.config.defaults;
        DetectParams::new(
            q.window_size.unwrap_or(d.window_size),
            q.threshold.unwrap_or(d.threshold),
        )
    }

    fn trade_rules(&self, q: &Query) -> Result<TradeRules, EngineError> {
        let d = &self.config.defaults;
        let rules = TradeRules {
            stop_loss_pct: q.stop_loss_pct.unwrap_or(d.stop_loss_pct),
            reentry_pct: q.reentry_pct.unwrap_or(d.reentry_pct),
            fees_pct: q.fees_pct.unwrap_or(d.fees_pct),
            tax_pct: q.tax_pct.unwrap_or(d.tax_pct),
        };
        rules.validate()?;
        Ok(rules)
    }

    /// Load prices for a symbol request.
    pub fn load(&self, symbol: &str) -> Result<LoadedSeries, ServiceError> {
        let symbols = parse_symbols(
            symbol,
            self.config.max_symbols,
            self.config.symbol_suffix.as_deref(),
        )?;
        Ok(load_series(self.source.as_ref(), &symbols)?)
    }

    /// `None` when the series has no usable history in the lookback years.
    fn prepare(&self, symbol: &str, params: &DetectParams) -> Result<Option<Prepared>, ServiceError> {
        let loaded = self.load(symbol)?;
        let Some(last) = loaded.series.last_date() else {
            return Ok(None);
        };
        let years = analysis_years(last.year(), self.config.lookback_years);
        match self.memo.detect(&loaded.series, &years, params) {
            Ok((cache, report)) => Ok(Some(Prepared {
                loaded,
                cache,
                report,
                years,
            })),
            Err(EngineError::NoData { what }) => {
                debug!(symbol, %what, "no data for detection");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ── Windows ──

    pub fn detect_windows(&self, q: &Query) -> Result<WindowsResponse, ServiceError> {
        let params = self.detect_params(q)?;
        let Some(p) = self.prepare(&q.symbol, &params)? else {
            return Ok(WindowsResponse {
                symbol: q.symbol.clone(),
                windows: Vec::new(),
                total_days: 0,
                total_return: 0.0,
                years: Vec::new(),
                warnings: Vec::new(),
                synthetic: false,
            });
        };
        info!(
            symbol = p.loaded.series.symbol(),
            windows = p.report.windows.len(),
            total_days = p.report.total_days,
            "windows detected"
        );
        Ok(WindowsResponse {
            symbol: p.loaded.series.symbol().to_string(),
            windows: p.report.windows.clone(),
            total_days: p.report.total_days,
            total_return: p.report.total_return,
            years: p.report.years.clone(),
            warnings: p.report.warnings.clone(),
            synthetic: p.loaded.synthetic,
        })
    }

    /// Raw detection report (for exports).
    pub fn detection(&self, q: &Query) -> Result<Option<Arc<DetectionReport>>, ServiceError> {
        let params = self.detect_params(q)?;
        Ok(self.prepare(&q.symbol, &params)?.map(|p| p.report))
    }

    // ── Backtests ──

    pub fn backtest_window(&self, q: &Query) -> Result<BacktestResponse, ServiceError> {
        let params = self.detect_params(q)?;
        let rules = self.trade_rules(q)?;
        let year = q.year.unwrap_or(SimYear::Averaged);
        let empty = |symbol: &str, note: String| BacktestResponse {
            symbol: symbol.to_string(),
            year,
            seasonal_curve: Vec::new(),
            bh_curve: Vec::new(),
            dates: Vec::new(),
            trades: Vec::new(),
            records: Vec::new(),
            total_return: 0.0,
            bh_return: 0.0,
            days_in_market: 0,
            max_drawdown: 0.0,
            warning: Some(note),
            synthetic: false,
        };

        let Some(p) = self.prepare(&q.symbol, &params)? else {
            return Ok(empty(&q.symbol, format!("No data available for {}", q.symbol)));
        };
        let windows = p.report.window_list();
        let sim = match simulate(&p.cache, &p.loaded.series, &windows, &p.years, year, &rules) {
            Ok(sim) => sim,
            Err(EngineError::NoData { what }) => {
                return Ok(empty(p.loaded.series.symbol(), format!("No data available for {what}")))
            }
            Err(e) => return Err(e.into()),
        };
        debug!(symbol = p.loaded.series.symbol(), %year, windows = windows.len(), "backtest");
        Ok(BacktestResponse {
            symbol: p.loaded.series.symbol().to_string(),
            year,
            seasonal_curve: sim.strategy.cumulative_pct(),
            bh_curve: sim.buy_hold.cumulative_pct(),
            total_return: sim.strategy.total_return_pct(),
            bh_return: sim.buy_hold.total_return_pct(),
            days_in_market: sim.strategy.days_in_market(),
            max_drawdown: max_drawdown(&sim.strategy) * 100.0,
            warning: join_warnings(&sim.warnings, &[]),
            synthetic: p.loaded.synthetic,
            dates: sim.labels,
            trades: sim.trades,
            records: sim.records,
        })
    }

    /// Raw simulation for the requested year view (for curve exports).
    pub fn simulation(&self, q: &Query) -> Result<Option<Simulation>, ServiceError> {
        let params = self.detect_params(q)?;
        let rules = self.trade_rules(q)?;
        let year = q.year.unwrap_or(SimYear::Averaged);
        let Some(p) = self.prepare(&q.symbol, &params)? else {
            return Ok(None);
        };
        let windows = p.report.window_list();
        match simulate(&p.cache, &p.loaded.series, &windows, &p.years, year, &rules) {
            Ok(sim) => Ok(Some(sim)),
            Err(EngineError::NoData { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn backtest_yearly(&self, q: &Query) -> Result<YearlyResponse, ServiceError> {
        let params = self.detect_params(q)?;
        let rules = self.trade_rules(q)?;
        let Some(p) = self.prepare(&q.symbol, &params)? else {
            return Ok(YearlyResponse {
                symbol: q.symbol.clone(),
                rows: Vec::new(),
                sharpe: 0.0,
                metrics: YearlyMetrics::compute(&[]),
                warning: Some(format!("No data available for {}", q.symbol)),
            });
        };
        let rows = yearly_rows(&p.loaded.series, &p.report.window_list(), &p.years, &rules)?;
        let metrics = YearlyMetrics::compute(&rows);
        Ok(YearlyResponse {
            symbol: p.loaded.series.symbol().to_string(),
            sharpe: metrics.sharpe,
            metrics,
            rows,
            warning: join_warnings(&p.report.warnings, &[]),
        })
    }

    /// Trades table over all analysis years. `None` without data.
    pub fn trades(&self, q: &Query) -> Result<Option<TradesTable>, ServiceError> {
        let params = self.detect_params(q)?;
        let rules = self.trade_rules(q)?;
        let Some(p) = self.prepare(&q.symbol, &params)? else {
            return Ok(None);
        };
        let table = trades_table(&p.loaded.series, &p.report.window_list(), &p.years, &rules)?;
        Ok(Some(table))
    }

    pub fn optimize(
        &self,
        q: &Query,
        grid: &SweepGrid,
        objective: Objective,
    ) -> Result<Option<SweepResults>, ServiceError> {
        let rules = self.trade_rules(q)?;
        // Any valid params work here: only the cache and years are reused.
        let params = self.detect_params(q)?;
        let Some(p) = self.prepare(&q.symbol, &params)? else {
            return Ok(None);
        };
        let results = sweep(&p.cache, &p.loaded.series, &p.years, grid, &rules, objective)?;
        if let Some(best) = results.best() {
            info!(
                symbol = p.loaded.series.symbol(),
                window_size = best.window_size,
                threshold = best.threshold,
                %objective,
                "best parameters"
            );
        }
        Ok(Some(results))
    }

    // ── Baskets ──

    /// Windows of one basket entry; empty without data.
    pub fn strategy_windows(&self, strategy: &BasketStrategy) -> Result<Vec<Window>, ServiceError> {
        let params = strategy.detect_params()?;
        Ok(self
            .prepare(&strategy.symbol, &params)?
            .map(|p| p.report.window_list())
            .unwrap_or_default())
    }

    pub fn combine_basket(&self, q: &BasketQuery) -> Result<BasketResponse, ServiceError> {
        let year = q.year.unwrap_or(SimYear::Averaged);
        let d = &self.config.defaults;
        let rules = TradeRules {
            fees_pct: q.fees_pct.unwrap_or(d.fees_pct),
            tax_pct: q.tax_pct.unwrap_or(d.tax_pct),
            ..TradeRules::default()
        };
        rules.validate()?;
        let capital = q.capital.unwrap_or(d.capital);
        let labels = curve_labels(year);

        let mut runs = Vec::new();
        let mut notes = Vec::new();
        let mut warnings = Vec::new();
        let mut trades = Vec::new();
        for strategy in q.strategies.iter().filter(|s| s.visible) {
            let params = strategy.detect_params()?;
            let prepared = self.prepare(&strategy.symbol, &params)?;
            let simulation = match &prepared {
                Some(p) => {
                    let windows = p.report.window_list();
                    match simulate(&p.cache, &p.loaded.series, &windows, &p.years, year, &rules) {
                        Ok(sim) => Some((windows, sim)),
                        Err(EngineError::NoData { .. }) => None,
                        Err(e) => return Err(e.into()),
                    }
                }
                None => None,
            };
            let (windows, simulation) = match simulation {
                Some(found) => found,
                None => {
                    warn!(key = %strategy.key(), %year, "no data, strategy stays in cash");
                    notes.push(format!("No data for {} in {year}", strategy.symbol));
                    (Vec::new(), cash_simulation(year, &labels))
                }
            };
            warnings.extend(simulation.warnings.iter().cloned());
            trades.extend(simulation.trades.iter().map(|t| BasketTrade {
                key: strategy.key(),
                symbol: strategy.symbol.clone(),
                trade: t.clone(),
            }));
            runs.push(StrategyRun {
                strategy: strategy.clone(),
                windows,
                simulation,
            });
        }

        let (weighting, weights) = resolve_weights(q, &runs)?;
        debug!(%weighting, "basket weights resolved");
        let result = combine(&runs, Some(&weights), capital)?;
        let strategy_curves = runs
            .iter()
            .zip(&result.contributions)
            .map(|(run, c)| StrategyCurve {
                key: c.key.clone(),
                symbol: c.symbol.clone(),
                weight: c.weight,
                curve: run.simulation.strategy.cumulative_pct(),
            })
            .collect();
        info!(
            strategies = runs.len(),
            %year,
            final_value = result.final_value,
            "basket combined"
        );
        warnings.sort_by_key(|w| w.to_string());
        warnings.dedup();
        Ok(BasketResponse {
            year,
            dates: labels,
            combined_curve: result.combined.cumulative_pct(),
            bh_curve: result.buy_hold.cumulative_pct(),
            strategy_curves,
            trades,
            trades_count: result.trades_count,
            total_days: result.combined.days_in_market(),
            symbols: result.symbols,
            capital: result.capital,
            final_value: result.final_value,
            contributions: result.contributions,
            concurrency: result.concurrency,
            weighting,
            warning: join_warnings(&warnings, &notes),
        })
    }

    /// Day overlap of `candidate` with the visible part of `existing`.
    pub fn basket_overlap(
        &self,
        existing: &[BasketStrategy],
        candidate: &BasketStrategy,
    ) -> Result<OverlapStats, ServiceError> {
        let mut detected = Vec::new();
        for s in existing.iter().filter(|s| s.visible) {
            detected.push((s, self.strategy_windows(s)?));
        }
        let candidate_windows = self.strategy_windows(candidate)?;
        Ok(basket_overlap(
            detected.iter().map(|(s, w)| (*s, w.as_slice())),
            &candidate_windows,
        ))
    }

    /// Combine a stored basket.
    pub fn combine_saved(
        &self,
        name: &str,
        mut q: BasketQuery,
    ) -> Result<BasketResponse, ServiceError> {
        q.strategies = self.store.load(name)?;
        self.combine_basket(&q)
    }
}

/// Weights for a basket run: the explicit map, else the requested scheme,
/// else the saved weights, else equal.
fn resolve_weights(
    q: &BasketQuery,
    runs: &[StrategyRun],
) -> Result<(String, WeightMap), ServiceError> {
    let strategies: Vec<BasketStrategy> = runs.iter().map(|r| r.strategy.clone()).collect();
    if let Some(map) = &q.weights {
        return Ok(("explicit".to_string(), map.clone()));
    }
    let scheme: Box<dyn WeightScheme> = match q.weighting {
        Some(Weighting::Equal) => Box::new(EqualWeight),
        Some(Weighting::Return) => {
            let returns = runs
                .iter()
                .map(|r| (r.strategy.key(), r.simulation.strategy.total_return_pct()))
                .collect();
            Box::new(ReturnWeighted::new(returns))
        }
        Some(Weighting::Cap) => Box::new(MarketCapWeighted {
            caps: q.caps.clone().unwrap_or_default(),
        }),
        Some(Weighting::Stored) => Box::new(StoredWeight),
        None if StoredWeight::has_weights(&strategies) => Box::new(StoredWeight),
        None => Box::new(EqualWeight),
    };
    let map = scheme.weights(&strategies)?;
    Ok((scheme.name().to_string(), map))
}

/// Curve labels for a year view: real dates, or the reference calendar.
fn curve_labels(year: SimYear) -> Vec<String> {
    match year {
        SimYear::Year(y) => dates_of_year(y).into_iter().map(date_label).collect(),
        SimYear::Averaged => (1..=REFERENCE_DAYS).map(doy_label).collect(),
    }
}

/// Flat simulation for a strategy without data in the requested year.
fn cash_simulation(year: SimYear, labels: &[String]) -> Simulation {
    let days = labels.len();
    Simulation {
        year,
        labels: labels.to_vec(),
        strategy: EquityCurve::flat(days),
        buy_hold: EquityCurve::flat(days),
        trades: Vec::new(),
        records: Vec::new(),
        warnings: Vec::new(),
    }
}

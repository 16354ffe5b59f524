//! SeasonLab Runner: the service layer around `seasonlab-core`.
//!
//! This crate builds on `seasonlab-core` to provide:
//! - Price loading from CSV with a seeded synthetic fallback
//! - Multi-symbol requests blended into one basket series
//! - Memoized returns caches and detections
//! - `SeasonalService`: windows, backtests, yearly bars, baskets, overlap
//! - Weight schemes, yearly metrics, CSV exports
//! - Named basket persistence with atomic replace
//! - Parallel parameter sweep

pub mod config;
pub mod data_loader;
pub mod export;
pub mod memo;
pub mod metrics;
pub mod optimize;
pub mod service;
pub mod store;
pub mod weights;

pub use config::{ConfigError, Defaults, RunnerConfig};
pub use data_loader::{
    display_name, load_series, parse_symbols, sanitize_symbol, series_fingerprint, CsvSource,
    DataSource, LoadError, LoadedSeries, PriceSource,
};
pub use memo::{DetectionMemo, MemoStats, MAX_REPORTS_PER_SERIES};
pub use metrics::{max_drawdown, sharpe_ratio, YearlyMetrics};
pub use optimize::{sweep, Objective, SweepGrid, SweepPoint, SweepResults};
pub use service::{
    BacktestResponse, BasketQuery, BasketResponse, BasketTrade, Query, SeasonalService,
    ServiceError, StrategyCurve, WindowsResponse, YearlyResponse,
};
pub use store::{BasketStore, StoreError};
pub use weights::{
    EqualWeight, MarketCapWeighted, ReturnWeighted, StoredWeight, WeightScheme, Weighting,
    DEFAULT_WEIGHT_FLOOR,
};

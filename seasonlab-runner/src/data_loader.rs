//! Price loading and symbol resolution for the runner.
//!
//! Given a comma-separated symbol request, resolves each ticker to a daily close
//! series and blends multi-symbol requests into one basket series. Fallback
//! policy per symbol:
//! 1. If `{data_dir}/{SYMBOL}.csv` exists → parse it
//! 2. If not and synthetic fallback is enabled → generate a seeded random walk (tagged)
//! 3. Otherwise → fail with a clear error
//!
//! Synthetic data is a developer-only debug mode; every result built on it
//! carries `synthetic = true`.

use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use thiserror::Error;
use tracing::{debug, warn};

use seasonlab_core::{PricePoint, PriceSeries, SeriesError};

use crate::config::RunnerConfig;

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no price file for '{symbol}' at {} (enable synthetic_fallback for generated data)", .path.display())]
    NotFound { symbol: String, path: PathBuf },

    #[error("failed to read {}: {source}", .path.display())]
    Csv { path: PathBuf, source: csv::Error },

    #[error("{}: missing Date or Close column", .path.display())]
    MissingColumns { path: PathBuf },

    #[error("{}: no usable rows", .path.display())]
    Empty { path: PathBuf },

    #[error("invalid symbol list: {0}")]
    Symbols(String),

    #[error("series error: {0}")]
    Series(#[from] SeriesError),
}

/// Where a symbol's closes came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    Csv(PathBuf),
    Synthetic,
}

/// A loaded (possibly blended) series with provenance.
#[derive(Debug, Clone)]
pub struct LoadedSeries {
    pub series: PriceSeries,
    /// Source per resolved ticker, in request order.
    pub sources: Vec<(String, DataSource)>,
    /// BLAKE3 over the series' dates and closes.
    pub fingerprint: String,
    pub synthetic: bool,
}

/// Seam between the service and wherever prices live.
pub trait PriceSource: Send + Sync {
    /// Load one already-normalized ticker.
    fn load_symbol(&self, symbol: &str) -> Result<(PriceSeries, DataSource), LoadError>;
}

// ─── Symbol handling ────────────────────────────────────────────────

/// File-system safe form of a ticker: `/` and `:` become `-`, spaces vanish.
pub fn sanitize_symbol(symbol: &str) -> String {
    symbol.replace('/', "-").replace(' ', "").replace(':', "-")
}

/// Split a comma-separated request into normalized tickers.
///
/// Tickers are trimmed and upper-cased. When `suffix` is set it is appended to
/// every ticker that lacks it, except `^` indices.
pub fn parse_symbols(
    text: &str,
    max_symbols: usize,
    suffix: Option<&str>,
) -> Result<Vec<String>, LoadError> {
    let symbols: Vec<String> = text
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() {
        return Err(LoadError::Symbols("no symbols given".into()));
    }
    if symbols.len() > max_symbols {
        return Err(LoadError::Symbols(format!(
            "maximum {max_symbols} symbols allowed, got {}",
            symbols.len()
        )));
    }
    let suffix = suffix.map(str::to_uppercase);
    Ok(symbols
        .into_iter()
        .map(|s| match &suffix {
            Some(sfx) if !s.starts_with('^') && !s.ends_with(sfx.as_str()) => format!("{s}{sfx}"),
            _ => s,
        })
        .collect())
}

/// Short name for exports: suffix stripped, baskets joined with `+`.
pub fn display_name(symbols: &[String], suffix: Option<&str>) -> String {
    let strip = |s: &String| match suffix {
        Some(sfx) => s.strip_suffix(&sfx.to_uppercase()).unwrap_or(s).to_string(),
        None => s.clone(),
    };
    symbols.iter().map(strip).collect::<Vec<_>>().join("+")
}

/// BLAKE3 fingerprint of a series' symbol, dates and closes.
pub fn series_fingerprint(series: &PriceSeries) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(series.symbol().as_bytes());
    for p in series.points() {
        hasher.update(&p.date.num_days_from_ce().to_le_bytes());
        hasher.update(&p.close.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

// ─── CSV source ─────────────────────────────────────────────────────

/// Reads `{data_dir}/{SANITIZED}.csv`, optionally falling back to synthetic data.
#[derive(Debug, Clone)]
pub struct CsvSource {
    data_dir: PathBuf,
    synthetic: Option<(NaiveDate, NaiveDate)>,
}

impl CsvSource {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            synthetic: None,
        }
    }

    /// Generate weekday closes over `start..=end` when a file is missing.
    pub fn with_synthetic(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.synthetic = Some((start, end));
        self
    }

    /// Source configured from [`RunnerConfig`]. Synthetic data spans the
    /// lookback window ending with 2024.
    pub fn from_config(config: &RunnerConfig) -> Self {
        let source = Self::new(&config.data_dir);
        if !config.synthetic_fallback {
            return source;
        }
        let end = NaiveDate::from_ymd_opt(2024, 12, 31);
        let start = NaiveDate::from_ymd_opt(2024 - config.lookback_years as i32 + 1, 1, 1);
        match (start, end) {
            (Some(start), Some(end)) => source.with_synthetic(start, end),
            _ => source,
        }
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.data_dir.join(format!("{}.csv", sanitize_symbol(symbol)))
    }
}

impl PriceSource for CsvSource {
    fn load_symbol(&self, symbol: &str) -> Result<(PriceSeries, DataSource), LoadError> {
        let path = self.path_for(symbol);
        if path.exists() {
            let series = read_price_csv(&path, symbol)?;
            debug!(symbol, rows = series.len(), path = %path.display(), "loaded price file");
            return Ok((series, DataSource::Csv(path)));
        }
        match self.synthetic {
            Some((start, end)) => {
                warn!(symbol, "no price file, using synthetic data");
                let series = PriceSeries::new(symbol, generate_synthetic_closes(symbol, start, end))?;
                Ok((series, DataSource::Synthetic))
            }
            None => Err(LoadError::NotFound {
                symbol: symbol.to_string(),
                path,
            }),
        }
    }
}

/// Parse a price CSV. Headers are matched case-insensitively; rows with a
/// missing date or a non-positive close are skipped.
pub fn read_price_csv(path: &Path, symbol: &str) -> Result<PriceSeries, LoadError> {
    let csv_err = |source: csv::Error| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;

    let headers = reader.headers().map_err(csv_err)?.clone();
    let find = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    let (Some(date_col), Some(close_col)) = (find("date"), find("close")) else {
        return Err(LoadError::MissingColumns {
            path: path.to_path_buf(),
        });
    };

    let mut points = Vec::new();
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        let date = record.get(date_col).and_then(parse_date);
        let close = record
            .get(close_col)
            .and_then(|c| c.parse::<f64>().ok())
            .filter(|c| c.is_finite() && *c > 0.0);
        match (date, close) {
            (Some(date), Some(close)) => points.push(PricePoint { date, close }),
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(symbol, skipped, "skipped unusable rows");
    }
    if points.is_empty() {
        return Err(LoadError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(PriceSeries::from_unsorted(symbol, points)?)
}

/// Accepts `YYYY-MM-DD`, optionally followed by a time part.
fn parse_date(field: &str) -> Option<NaiveDate> {
    let day = field.get(..10).unwrap_or(field);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Load each ticker and blend them into one series named after the request.
pub fn load_series(source: &dyn PriceSource, symbols: &[String]) -> Result<LoadedSeries, LoadError> {
    if symbols.is_empty() {
        return Err(LoadError::Symbols("no symbols given".into()));
    }
    let mut parts = Vec::with_capacity(symbols.len());
    let mut sources = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let (series, src) = source.load_symbol(symbol)?;
        parts.push(series);
        sources.push((symbol.clone(), src));
    }
    let series = PriceSeries::blend(symbols.join(","), &parts)?;
    let synthetic = sources.iter().any(|(_, s)| *s == DataSource::Synthetic);
    Ok(LoadedSeries {
        fingerprint: series_fingerprint(&series),
        series,
        sources,
        synthetic,
    })
}

/// Weekday random walk from 100.0, seeded by BLAKE3 of the symbol.
fn generate_synthetic_closes(symbol: &str, start: NaiveDate, end: NaiveDate) -> Vec<PricePoint> {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let seed: [u8; 32] = *blake3::hash(symbol.as_bytes()).as_bytes();
    let mut rng = StdRng::from_seed(seed);

    let mut points = Vec::new();
    let mut close = 100.0_f64;
    for date in start.iter_days().take_while(|d| *d <= end) {
        if matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun) {
            continue;
        }
        let daily_return: f64 = rng.gen_range(-0.03..0.03);
        close *= 1.0 + daily_return;
        points.push(PricePoint { date, close });
    }
    points
}

//! Runner configuration loaded from TOML.
//!
//! ```toml
//! data_dir = "data"
//! basket_dir = "baskets"
//! lookback_years = 15
//! symbol_suffix = ".NS"
//!
//! [defaults]
//! window_size = 30
//! threshold = 50
//! stop_loss_pct = 5
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use seasonlab_core::{DetectParams, EngineError, TradeRules};

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("TOML parsing error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<EngineError> for ConfigError {
    fn from(e: EngineError) -> Self {
        ConfigError::Invalid(e.to_string())
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_basket_dir() -> PathBuf {
    PathBuf::from("baskets")
}
fn default_lookback() -> u32 {
    15
}
fn default_max_symbols() -> usize {
    5
}

/// Top-level runner settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Directory holding `{SYMBOL}.csv` price files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory holding `{name}.json` basket definitions.
    #[serde(default = "default_basket_dir")]
    pub basket_dir: PathBuf,
    /// Calendar years of history used for seasonal statistics.
    #[serde(default = "default_lookback")]
    pub lookback_years: u32,
    /// Appended to plain ticker symbols (not to `^` indices), e.g. ".NS".
    #[serde(default)]
    pub symbol_suffix: Option<String>,
    /// Maximum symbols accepted in one comma-separated request.
    #[serde(default = "default_max_symbols")]
    pub max_symbols: usize,
    /// Generate a deterministic random walk when no price file exists.
    #[serde(default)]
    pub synthetic_fallback: bool,
    #[serde(default)]
    pub defaults: Defaults,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            basket_dir: default_basket_dir(),
            lookback_years: default_lookback(),
            symbol_suffix: None,
            max_symbols: default_max_symbols(),
            synthetic_fallback: false,
            defaults: Defaults::default(),
        }
    }
}

/// Default request parameters, overridable per call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub window_size: u32,
    pub threshold: f64,
    pub stop_loss_pct: f64,
    pub reentry_pct: f64,
    pub fees_pct: f64,
    pub tax_pct: f64,
    pub capital: f64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            window_size: 30,
            threshold: 50.0,
            stop_loss_pct: 0.0,
            reentry_pct: 0.0,
            fees_pct: 0.0,
            tax_pct: 0.0,
            capital: 100_000.0,
        }
    }
}

impl Defaults {
    pub fn detect_params(&self) -> Result<DetectParams, EngineError> {
        DetectParams::new(self.window_size, self.threshold)
    }

    pub fn trade_rules(&self) -> TradeRules {
        TradeRules {
            stop_loss_pct: self.stop_loss_pct,
            reentry_pct: self.reentry_pct,
            fees_pct: self.fees_pct,
            tax_pct: self.tax_pct,
        }
    }
}

impl RunnerConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: RunnerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        info!(path = %path.display(), "loading configuration");
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lookback_years < 2 {
            return Err(ConfigError::Invalid(format!(
                "lookback_years must be at least 2, got {}",
                self.lookback_years
            )));
        }
        if self.max_symbols == 0 {
            return Err(ConfigError::Invalid("max_symbols must be at least 1".into()));
        }
        if !self.defaults.capital.is_finite() || self.defaults.capital <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "capital must be positive, got {}",
                self.defaults.capital
            )));
        }
        self.defaults.detect_params()?;
        self.defaults.trade_rules().validate()?;
        Ok(())
    }
}

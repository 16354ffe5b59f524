//! Validated engine parameters.
//!
//! Every computation validates its parameters up front and refuses to start on
//! bad input; nothing is clamped silently.

use serde::{Deserialize, Serialize};

use crate::calendar::REFERENCE_DAYS;
use crate::error::EngineError;

/// Shortest window the detector will emit or narrow down to.
pub const MIN_WINDOW_DAYS: u32 = 3;

/// Window detection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectParams {
    /// Fixed window length in calendar days used by the recursive search.
    pub window_size: u32,
    /// Minimum win rate (0-100) a window needs to survive the final filter.
    pub threshold: f64,
}

impl DetectParams {
    pub fn new(window_size: u32, threshold: f64) -> Result<Self, EngineError> {
        let params = Self {
            window_size,
            threshold,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.window_size < MIN_WINDOW_DAYS || self.window_size > REFERENCE_DAYS {
            return Err(EngineError::invalid(format!(
                "window size {} outside {MIN_WINDOW_DAYS}..={REFERENCE_DAYS}",
                self.window_size
            )));
        }
        if !self.threshold.is_finite() || !(0.0..=100.0).contains(&self.threshold) {
            return Err(EngineError::invalid(format!(
                "threshold {} outside [0, 100]",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// Stop-loss, re-entry and cost settings for the trade simulator.
///
/// All values are percentages: `stop_loss_pct = 5.0` means exit once the close
/// is 5% below the cost basis. Zero disables the corresponding rule.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TradeRules {
    #[serde(default)]
    pub stop_loss_pct: f64,
    #[serde(default)]
    pub reentry_pct: f64,
    #[serde(default)]
    pub fees_pct: f64,
    #[serde(default)]
    pub tax_pct: f64,
}

impl TradeRules {
    pub fn validate(&self) -> Result<(), EngineError> {
        for (name, value) in [
            ("stop_loss_pct", self.stop_loss_pct),
            ("reentry_pct", self.reentry_pct),
            ("fees_pct", self.fees_pct),
            ("tax_pct", self.tax_pct),
        ] {
            if !value.is_finite() || !(0.0..100.0).contains(&value) {
                return Err(EngineError::invalid(format!(
                    "{name} = {value} outside [0, 100)"
                )));
            }
        }
        if self.fees_pct + self.tax_pct >= 100.0 {
            return Err(EngineError::invalid("fees_pct + tax_pct must stay below 100"));
        }
        Ok(())
    }

    pub fn stop_loss_enabled(&self) -> bool {
        self.stop_loss_pct > 0.0
    }

    pub fn reentry_enabled(&self) -> bool {
        self.stop_loss_enabled() && self.reentry_pct > 0.0
    }

    /// Multiplier applied to position value on each entry and on each exit.
    pub fn cost_factor(&self) -> f64 {
        (1.0 - self.fees_pct / 100.0) * (1.0 - self.tax_pct / 100.0)
    }

    /// Same rules with stop-loss and re-entry switched off (averaged-year mode).
    pub fn without_stops(&self) -> Self {
        Self {
            stop_loss_pct: 0.0,
            reentry_pct: 0.0,
            ..*self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_params_bounds() {
        assert!(DetectParams::new(30, 50.0).is_ok());
        assert!(DetectParams::new(2, 50.0).is_err());
        assert!(DetectParams::new(366, 50.0).is_err());
        assert!(DetectParams::new(30, -1.0).is_err());
        assert!(DetectParams::new(30, 100.5).is_err());
        assert!(DetectParams::new(30, f64::NAN).is_err());
    }

    #[test]
    fn trade_rules_reject_negative_and_absurd() {
        let mut rules = TradeRules::default();
        assert!(rules.validate().is_ok());
        rules.stop_loss_pct = -1.0;
        assert!(rules.validate().is_err());
        rules.stop_loss_pct = 100.0;
        assert!(rules.validate().is_err());
        rules.stop_loss_pct = 5.0;
        rules.fees_pct = 60.0;
        rules.tax_pct = 45.0;
        assert!(rules.validate().is_err());
    }

    #[test]
    fn reentry_requires_stop_loss() {
        let rules = TradeRules {
            reentry_pct: 3.0,
            ..Default::default()
        };
        assert!(!rules.reentry_enabled());
        let rules = TradeRules {
            stop_loss_pct: 5.0,
            reentry_pct: 3.0,
            ..Default::default()
        };
        assert!(rules.reentry_enabled());
    }

    #[test]
    fn cost_factor_combines_fees_and_tax() {
        let rules = TradeRules {
            fees_pct: 0.1,
            tax_pct: 0.1,
            ..Default::default()
        };
        assert!((rules.cost_factor() - 0.999 * 0.999).abs() < 1e-12);
        assert_eq!(TradeRules::default().cost_factor(), 1.0);
    }
}

//! SeasonLab Core: seasonal window detection, trade simulation and basket
//! allocation over daily close series.
//!
//! Everything here is a pure function of its inputs: callers load prices,
//! build a [`ReturnsCache`] per series snapshot and read plain numbers back.
//! No I/O happens in this crate.

pub mod calendar;
pub mod domain;
pub mod engine;
pub mod error;
pub mod params;

pub use domain::{
    BasketStrategy, EquityCurve, ExitReason, PricePoint, PriceSeries, SeriesError, Trade,
    TradeLeg, TradeRecord, Window, WindowStat,
};
pub use engine::{
    basket_overlap, combine, detect, BasketResult, DetectionReport, OverlapStats, ReturnsCache,
    SimYear, Simulation, StrategyRun, WeightMap, WindowDetector, SPARSE_YEAR_DAYS,
};
pub use error::{EngineError, Warning};
pub use params::{DetectParams, TradeRules, MIN_WINDOW_DAYS};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: shared engine types can cross threads.
    ///
    /// Caches are built once and read concurrently; results move between
    /// worker threads in the optimizer.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<PriceSeries>();
        require_sync::<PriceSeries>();
        require_send::<ReturnsCache>();
        require_sync::<ReturnsCache>();
        require_send::<DetectionReport>();
        require_sync::<DetectionReport>();
        require_send::<Simulation>();
        require_sync::<Simulation>();
        require_send::<BasketResult>();
        require_sync::<BasketResult>();
        require_send::<EngineError>();
        require_sync::<EngineError>();
    }
}

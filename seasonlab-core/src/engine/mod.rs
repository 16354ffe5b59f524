//! The analytical engine. Data flows one way:
//! [`ReturnsCache`] → [`WindowDetector`] → simulator → [`combine`].

pub mod allocator;
pub mod detector;
pub mod returns_cache;
pub mod simulator;
pub mod trade_state;

pub use allocator::{
    basket_overlap, combine, equal_weights, validate_weights, BasketResult, Concurrency,
    Contribution, DaySet, OverlapStats, StrategyRun, WeightMap, WEIGHT_TOLERANCE,
};
pub use detector::{detect, merge_windows, DetectionReport, WindowDetector, MERGE_GAP_DAYS};
pub use returns_cache::{ReturnsCache, EDGE_GRACE_DAYS, SPARSE_YEAR_DAYS};
pub use simulator::{
    buy_hold_return, simulate, simulate_averaged, simulate_window_year, simulate_year,
    trades_table, yearly_rows, SimDay, SimYear, Simulation, TradeSummary, TradesTable,
    WindowYearRun, YearlyRow,
};
pub use trade_state::{Day, DayAction, PositionState};

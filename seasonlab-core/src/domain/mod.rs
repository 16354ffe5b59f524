//! Domain types shared by the engine and its callers.

pub mod basket;
pub mod curve;
pub mod price;
pub mod trade;
pub mod window;

pub use basket::BasketStrategy;
pub use curve::EquityCurve;
pub use price::{PricePoint, PriceSeries, SeriesError};
pub use trade::{ExitReason, Trade, TradeLeg, TradeRecord};
pub use window::{Window, WindowStat};

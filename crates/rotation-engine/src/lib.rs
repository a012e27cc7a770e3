pub mod clock;
pub mod config;
pub mod context;
pub mod costs;
pub mod filter;
pub mod results;
pub mod sizing;
pub mod trader;

#[cfg(test)]
mod tests;

pub use clock::{EasternClock, FixedOffsetClock, MarketClock};
pub use config::{StrategyKind, TradingConfig};
pub use costs::{CostModel, TradeCosts};
pub use filter::TradeFilter;
pub use results::BacktestResults;
pub use trader::RotationTrader;

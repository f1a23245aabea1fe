pub mod metrics;
pub mod runner;
pub mod synthetic;

pub use metrics::{BacktestMetrics, FunnelCounts, TradeRecord};
pub use runner::BacktestRunner;
pub use synthetic::{DayShape, SyntheticDataGenerator};

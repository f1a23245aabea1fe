// Liquidity-sweep strategy: sessions, sweep bias, HTF trend, entry trigger, trade plan
pub mod builder;
pub mod pipeline;
pub mod session;
pub mod structure;
pub mod sweep;
pub mod trend;
pub mod trigger;

pub use builder::{size_position, TradeBuilder};
pub use pipeline::{DayEvaluation, SetupPipeline};
pub use session::{DaySessions, SessionClassifier};
pub use structure::{classify_pivot, pivot_series, ShiftPattern, StructureDetector, StructureShift};
pub use sweep::{classify_sweep, detect_sweep};
pub use trend::TrendFilter;
pub use trigger::{
    EmaCrossoverTrigger, EntryReason, EntrySignal, EntryTrigger, PullbackTrigger, SessionTrigger,
    SignalScan, StructureShiftTrigger,
};

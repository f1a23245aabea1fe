// Order execution and the per-symbol worker loop
pub mod candle_buffer;
pub mod executor;
pub mod position_manager;
pub mod scheduler;
pub mod sizing;
pub mod worker;

pub use candle_buffer::CandleBuffer;
pub use executor::Executor;
pub use position_manager::{
    ExitReason, LifecycleState, PeriodKey, Position, PositionLifecycle, PositionStatus,
};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use worker::{SymbolWorker, TickOutcome};

// Technical indicators module
// Moving averages used by the trend filter and the EMA-crossover trigger

pub mod moving_average;

pub use moving_average::{
    calculate_ema, calculate_ema_series, calculate_ewm_series, calculate_sma,
};

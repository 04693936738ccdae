//! Background delivery of scheduled group tasks.

pub mod engine;
pub mod timing;

pub use engine::{next_daily_run, Dispatcher};
pub use timing::DispatchTiming;

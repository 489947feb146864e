//! Status polling fallback.
//!
//! Used where push notifications cannot be relied upon, or as a safety net
//! next to them. See [`config`] for the period bounds and [`task`] for the
//! poll task lifecycle.

pub mod config;
pub mod task;

pub use config::{DEFAULT_PERIOD, MAX_PERIOD, MIN_PERIOD, PollConfig, clamp_period};
pub use task::{PollContext, PollSpec, PollTask};

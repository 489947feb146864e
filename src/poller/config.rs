//! Polling configuration for the status fallback.
//!
//! Push notifications are the primary resume trigger, but they are not
//! sufficient alone: a misconfigured webhook, a network partition or a process
//! restart during delivery all lose events. The poller queries the remote
//! execution status directly at a fixed delay.
//!
//! # Period Bounds
//!
//! The requested period is clamped to `[30s, 15min]` so that a
//! misconfiguration can neither hammer the remote API nor leave a run parked
//! for hours. The default is 5 minutes.

use std::time::Duration;

/// Default recurrence period (5 minutes).
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(300);

/// Shortest allowed recurrence period.
pub const MIN_PERIOD: Duration = Duration::from_secs(30);

/// Longest allowed recurrence period.
pub const MAX_PERIOD: Duration = Duration::from_secs(900);

/// Configuration for a status poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between two status checks. Always within `[MIN_PERIOD, MAX_PERIOD]`.
    period: Duration,

    /// Suppresses the per-tick log line.
    pub quiet: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PollConfig {
    /// Creates a `PollConfig` with the default period, not quiet.
    pub fn new() -> Self {
        PollConfig {
            period: DEFAULT_PERIOD,
            quiet: false,
        }
    }

    /// Creates a `PollConfig` with a requested period, clamped to the bounds.
    pub fn with_period(period: Duration) -> Self {
        PollConfig {
            period: clamp_period(period),
            ..Self::new()
        }
    }

    /// Creates a `PollConfig` from a period in milliseconds.
    pub fn from_millis(millis: u64) -> Self {
        Self::with_period(Duration::from_millis(millis))
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Creates a `PollConfig` from environment variables.
    ///
    /// Reads `RELAY_POLL_PERIOD_SECS` and `RELAY_POLL_QUIET`. Missing or
    /// unparseable values use defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`PollConfig::from_env`], reading values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let period = lookup("RELAY_POLL_PERIOD_SECS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_PERIOD);

        let quiet = lookup("RELAY_POLL_QUIET")
            .map(|s| parse_flag(&s))
            .unwrap_or(false);

        Self::with_period(period).quiet(quiet)
    }
}

/// Clamps a requested period to `[MIN_PERIOD, MAX_PERIOD]`.
pub fn clamp_period(requested: Duration) -> Duration {
    requested.clamp(MIN_PERIOD, MAX_PERIOD)
}

pub(crate) fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

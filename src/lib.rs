//! Execution Relay - durable correlation between CI job runs and a remote
//! pipeline service.
//!
//! Job runs suspend on remote pipeline activity (a step becoming ready, an
//! execution ending). Signed notifications from the remote service are
//! verified, classified and routed here, and the matching suspended tasks are
//! resumed. Correlation state is persisted per job run so that waiting tasks
//! are recovered after a restart.

pub mod config;
pub mod correlation;
pub mod host;
pub mod persistence;
pub mod poller;
pub mod remote;
pub mod router;
pub mod server;
pub mod tasks;
pub mod trigger;
pub mod types;
pub mod webhooks;

#[cfg(test)]
mod test_utils;

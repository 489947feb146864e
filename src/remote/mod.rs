//! Remote pipeline API seam.
//!
//! The HTTP client for the remote pipeline service lives outside this crate.
//! The engine only needs the handful of calls in [`RemoteApiClient`]; retry
//! and token refresh are the client's business, and this crate never retries
//! a failed call itself beyond the poller's next tick.

use std::fmt;
use std::io::Write;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Execution, ExecutionRef, StepAction, StepState};

/// An error reported by the remote API, carrying its human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct RemoteApiError {
    /// The HTTP status code, if available.
    pub status_code: Option<u16>,

    /// A human-readable description of the error.
    pub message: String,
}

impl RemoteApiError {
    pub fn new(message: impl Into<String>) -> Self {
        RemoteApiError {
            status_code: None,
            message: message.into(),
        }
    }

    pub fn with_status(status_code: u16, message: impl Into<String>) -> Self {
        RemoteApiError {
            status_code: Some(status_code),
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl From<std::io::Error> for RemoteApiError {
    fn from(e: std::io::Error) -> Self {
        RemoteApiError::new(format!("writing step log: {}", e))
    }
}

/// Result type for remote API calls.
pub type Result<T> = std::result::Result<T, RemoteApiError>;

/// Calls the engine makes against the remote pipeline service.
#[async_trait]
pub trait RemoteApiClient: Send + Sync {
    /// Starts a new execution of a pipeline and returns its reference.
    async fn start_execution(&self, program_id: &str, pipeline_id: &str) -> Result<ExecutionRef>;

    async fn get_execution(&self, execution: &ExecutionRef) -> Result<Execution>;

    /// Returns false once the execution has reached a terminal status.
    async fn is_execution_running(&self, execution: &ExecutionRef) -> Result<bool>;

    async fn get_current_step(&self, execution: &ExecutionRef) -> Result<StepState>;

    /// Approves or otherwise moves the current waiting step forward.
    async fn advance_execution(&self, execution: &ExecutionRef) -> Result<()>;

    /// Streams the log of one step into `sink`.
    async fn download_step_log(
        &self,
        execution: &ExecutionRef,
        action: StepAction,
        sink: &mut (dyn Write + Send),
    ) -> Result<()>;
}

/// Downloads a step log into memory.
pub async fn fetch_step_log(
    client: &dyn RemoteApiClient,
    execution: &ExecutionRef,
    action: StepAction,
) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    client.download_step_log(execution, action, &mut buf).await?;
    Ok(buf)
}

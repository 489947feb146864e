//! Suspension handles: how a paused unit of work is resumed.
//!
//! [`suspend`] returns a pair. The [`Suspension`] half travels with the live
//! task object and is consumed by the first [`Suspension::resume`]; every
//! later call is a no-op returning `false`. The [`Resumed`] half is held by
//! the caller that paused and yields the [`Outcome`].
//!
//! Suspensions are never persisted. After a process restart the host builds
//! fresh ones for the units of work it restores.

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::types::ExecutionStatus;
use crate::webhooks::EventKind;

/// How a suspended unit of work ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed(Completion),
    Failed(FailureCause),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }
}

/// Successful resumption reasons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// A matching notification arrived.
    Event {
        kind: EventKind,
        action: Option<String>,
    },
    /// Force-ended because the governing execution finished first.
    Quiet,
    /// The poller saw the remote execution stop running.
    RemoteFinished,
    /// The whole execution ended; carries the remote status if it was mirrored.
    ExecutionEnded { status: Option<ExecutionStatus> },
}

/// Failure causes surfaced to the suspended caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureCause {
    #[error("remote cancelled")]
    RemoteCancelled,

    #[error("remote execution ended with status {0}")]
    RemoteFailed(ExecutionStatus),

    #[error("remote API error: {0}")]
    RemoteApi(String),

    #[error("aborted: {0}")]
    Aborted(String),
}

/// Creates a suspension handle and its waiting half.
pub fn suspend() -> (Suspension, Resumed) {
    let (tx, rx) = oneshot::channel();
    (
        Suspension {
            tx: Mutex::new(Some(tx)),
        },
        Resumed { rx },
    )
}

/// Resume capability held by a live task.
#[derive(Debug)]
pub struct Suspension {
    tx: Mutex<Option<oneshot::Sender<Outcome>>>,
}

impl Suspension {
    /// Resumes the caller. Returns `true` only for the call that consumed the
    /// handle, whether or not the caller is still listening.
    pub fn resume(&self, outcome: Outcome) -> bool {
        match self.tx.lock().take() {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    pub fn is_resumed(&self) -> bool {
        self.tx.lock().is_none()
    }
}

/// The paused caller's side of a suspension.
#[derive(Debug)]
pub struct Resumed {
    rx: oneshot::Receiver<Outcome>,
}

impl Resumed {
    /// Waits for the outcome.
    ///
    /// If the suspension is dropped without resuming, the caller sees an
    /// aborted failure rather than hanging.
    pub async fn wait(self) -> Outcome {
        self.rx
            .await
            .unwrap_or_else(|_| Outcome::Failed(FailureCause::Aborted("suspension dropped".into())))
    }

    /// Returns the outcome if one has already been delivered.
    pub fn try_outcome(&mut self) -> Option<Outcome> {
        self.rx.try_recv().ok()
    }
}

//! Lifecycle state shared by every waiting task.
//!
//! ```text
//! Created ──start──► Waiting ──► Finished(Event | Quiet | Aborted)
//!    └────────────── abort ─────► Finished(Aborted)
//! ```
//!
//! The first `finish` wins; every later transition is a no-op. The lock is
//! held only for the swap, never across an await.

use parking_lot::Mutex;

/// Why a task finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// A matching notification (or poll result) arrived.
    Event,
    /// Force-ended because the governing execution finished.
    Quiet,
    /// Stopped by the host.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Waiting,
    Finished(FinishReason),
}

impl TaskState {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskState::Finished(_))
    }
}

/// Mutex-guarded [`TaskState`].
#[derive(Debug)]
pub struct StateCell {
    state: Mutex<TaskState>,
}

impl StateCell {
    pub fn new(initial: TaskState) -> Self {
        StateCell {
            state: Mutex::new(initial),
        }
    }

    pub fn get(&self) -> TaskState {
        *self.state.lock()
    }

    pub fn is_finished(&self) -> bool {
        self.get().is_finished()
    }

    /// `Created → Waiting`. Returns false from any other state.
    pub fn start(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            TaskState::Created => {
                *state = TaskState::Waiting;
                true
            }
            _ => false,
        }
    }

    /// Moves to `Finished(reason)`. Returns false if already finished.
    pub fn finish(&self, reason: FinishReason) -> bool {
        let mut state = self.state.lock();
        if state.is_finished() {
            return false;
        }
        *state = TaskState::Finished(reason);
        true
    }
}

//! Step-waiting task.
//!
//! A `StepWaitTask` pauses a unit of work until the remote execution reports
//! progress on one of the steps it is interested in.
//!
//! # Transitions
//!
//! | Trigger | Precondition | Resume outcome |
//! |---------|--------------|----------------|
//! | [`StepWaitTask::on_event`] | same execution, kind and action in interest | `Completed(Event)` |
//! | same, with auto-advance on a waiting step | advance call succeeds | `Completed(Event)` |
//! | same, with auto-advance on a waiting step | advance call fails | `Failed(RemoteApi)` |
//! | [`StepWaitTask::quiet_finish`] | still waiting | `Completed(Quiet)` |
//! | [`StepWaitTask::abort`] | any | `Failed(Aborted)` if nothing else won |
//!
//! Every finishing transition releases the host's paused marker and removes
//! the task from its registry, then resumes the caller at most once.

use std::str::FromStr;
use std::sync::Arc;

use tracing::{info, warn};

use super::Result;
use super::state::{FinishReason, StateCell, TaskState};
use crate::correlation::{Correlated, TaskRegistry};
use crate::host::{
    ActiveExecutionLookup, Completion, FailureCause, Outcome, Resumed, SuspendedUnit, Suspension,
    TaskTag, suspend,
};
use crate::persistence::TaskRecord;
use crate::remote::RemoteApiClient;
use crate::types::{ExecutionRef, JobRunId, StepAction, StepInterest, TaskId};
use crate::webhooks::{EventKind, StepEvent};

/// A unit of work waiting for a step notification.
pub struct StepWaitTask {
    id: TaskId,
    execution: ExecutionRef,
    interest: StepInterest,
    state: StateCell,
    suspension: Suspension,
    registry: Arc<TaskRegistry<StepWaitTask>>,
    host: Arc<dyn ActiveExecutionLookup>,
    advance: Option<Arc<dyn RemoteApiClient>>,
}

impl std::fmt::Debug for StepWaitTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepWaitTask")
            .field("id", &self.id)
            .field("run", self.registry.run())
            .field("execution", &self.execution)
            .field("interest", &self.interest)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl StepWaitTask {
    /// Creates a task in `Created` with a fresh id.
    pub fn new(
        registry: Arc<TaskRegistry<StepWaitTask>>,
        host: Arc<dyn ActiveExecutionLookup>,
        execution: ExecutionRef,
        interest: StepInterest,
    ) -> (Self, Resumed) {
        Self::build(
            TaskId::generate(),
            TaskState::Created,
            registry,
            host,
            execution,
            interest,
        )
    }

    /// Rebuilds a task that was waiting before a restart.
    ///
    /// The task is already `Waiting` and persisted; the host re-registers it
    /// as paused and the registry finds it on rehydration.
    pub fn restore(
        id: TaskId,
        registry: Arc<TaskRegistry<StepWaitTask>>,
        host: Arc<dyn ActiveExecutionLookup>,
        execution: ExecutionRef,
        interest: StepInterest,
    ) -> (Self, Resumed) {
        Self::build(id, TaskState::Waiting, registry, host, execution, interest)
    }

    fn build(
        id: TaskId,
        state: TaskState,
        registry: Arc<TaskRegistry<StepWaitTask>>,
        host: Arc<dyn ActiveExecutionLookup>,
        execution: ExecutionRef,
        interest: StepInterest,
    ) -> (Self, Resumed) {
        let (suspension, resumed) = suspend();
        let task = StepWaitTask {
            id,
            execution,
            interest,
            state: StateCell::new(state),
            suspension,
            registry,
            host,
            advance: None,
        };
        (task, resumed)
    }

    /// Approves the remote step when a matching `step-waiting` arrives.
    pub fn with_advance(mut self, client: Arc<dyn RemoteApiClient>) -> Self {
        self.advance = Some(client);
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn run(&self) -> &JobRunId {
        self.registry.run()
    }

    pub fn execution(&self) -> &ExecutionRef {
        &self.execution
    }

    pub fn interest(&self) -> &StepInterest {
        &self.interest
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    /// `Created → Waiting`: marks the unit paused and registers it.
    ///
    /// If registration fails the task is aborted and the error returned.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if !self.state.start() {
            return Ok(());
        }

        self.host
            .mark_paused(self.run(), SuspendedUnit::StepWait(Arc::clone(self)));

        if let Err(e) = self.registry.add(Arc::clone(self)).await {
            warn!(run = %self.run(), task = %self.id, error = %e, "registration failed");
            self.abort("registration failed").await;
            return Err(e.into());
        }

        info!(
            run = %self.run(),
            task = %self.id,
            execution = %self.execution,
            "waiting for step event"
        );
        Ok(())
    }

    /// Whether the task waits on this execution.
    pub fn wants_execution(&self, execution: &ExecutionRef) -> bool {
        self.execution == *execution
    }

    /// Whether the task is interested in this step notification.
    ///
    /// Unknown action names are logged and declined.
    pub fn wants_step(&self, kind: EventKind, action: &str) -> bool {
        if !self.interest.kinds.contains(&kind) {
            return false;
        }
        match StepAction::from_str(action) {
            Ok(action) => self.interest.actions.contains(action),
            Err(e) => {
                warn!(task = %self.id, error = %e, "declining step event");
                false
            }
        }
    }

    /// Delivers a step notification. Returns whether this task consumed it.
    pub async fn on_event(&self, event: &StepEvent) -> Result<bool> {
        if !self.wants_execution(&event.execution) || !self.wants_step(event.kind, &event.action) {
            return Ok(false);
        }
        if !self.state.finish(FinishReason::Event) {
            return Ok(false);
        }

        info!(
            run = %self.run(),
            task = %self.id,
            kind = %event.kind,
            action = %event.action,
            "event received"
        );

        let outcome = match (&self.advance, event.kind) {
            (Some(client), EventKind::StepWaiting) => {
                match client.advance_execution(&self.execution).await {
                    Ok(()) => self.event_outcome(event),
                    Err(e) => {
                        warn!(task = %self.id, error = %e, "advancing execution failed");
                        Outcome::Failed(FailureCause::RemoteApi(e.to_string()))
                    }
                }
            }
            _ => self.event_outcome(event),
        };

        self.settle(outcome).await?;
        Ok(true)
    }

    /// Force-ends a still-waiting task because its execution is over.
    /// Returns false if the task had already finished.
    pub async fn quiet_finish(&self) -> Result<bool> {
        if !self.state.finish(FinishReason::Quiet) {
            return Ok(false);
        }

        info!(
            run = %self.run(),
            task = %self.id,
            "quietly ended because parent execution finished"
        );
        self.settle(Outcome::Completed(Completion::Quiet)).await?;
        Ok(true)
    }

    /// Stops the task. Always releases the marker and unregisters, even when
    /// another transition already finished it.
    pub async fn abort(&self, reason: &str) {
        let won = self.state.finish(FinishReason::Aborted);

        self.host.release(self.run(), self.id);
        if let Err(e) = self.registry.remove(self.id).await {
            warn!(task = %self.id, error = %e, "unregister on abort failed");
        }

        if won {
            info!(run = %self.run(), task = %self.id, reason, "aborted");
            self.suspension
                .resume(Outcome::Failed(FailureCause::Aborted(reason.to_string())));
        }
    }

    fn event_outcome(&self, event: &StepEvent) -> Outcome {
        Outcome::Completed(Completion::Event {
            kind: event.kind,
            action: Some(event.action.clone()),
        })
    }

    /// Releases, unregisters and resumes. The caller is resumed even if
    /// unregistering fails.
    async fn settle(&self, outcome: Outcome) -> Result<()> {
        self.host.release(self.run(), self.id);
        let removed = self.registry.remove(self.id).await;
        self.suspension.resume(outcome);
        removed?;
        Ok(())
    }
}

impl Correlated for StepWaitTask {
    const TAG: TaskTag = TaskTag::StepWait;

    fn id(&self) -> TaskId {
        self.id
    }

    fn record(&self) -> TaskRecord {
        TaskRecord::with_interest(self.id, self.interest.clone())
    }

    fn from_unit(unit: &SuspendedUnit) -> Option<Arc<Self>> {
        match unit {
            SuspendedUnit::StepWait(task) => Some(Arc::clone(task)),
            _ => None,
        }
    }
}

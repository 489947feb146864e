//! Umbrella task waiting for the end of a whole execution.
//!
//! One `ExecutionEndTask` per job run waits for `execution-ended` on its
//! execution. When it arrives the task:
//!
//! 1. quietly finishes every still-waiting step task of the run that waits on
//!    the same execution, iterating a registry snapshot and collecting
//!    failures without stopping
//! 2. if mirroring is enabled, maps the remote terminal status to the local
//!    outcome
//! 3. resumes its own caller
//!
//! It never touches units it does not own: unrelated paused work of the run
//! (another execution's tasks, pollers, foreign suspensions) completes on its
//! own schedule.

use std::sync::Arc;

use tracing::{info, warn};

use super::step::StepWaitTask;
use super::state::{FinishReason, StateCell, TaskState};
use super::{Result, TaskError};
use crate::correlation::{Correlated, RunRegistries, TaskRegistry};
use crate::host::{
    ActiveExecutionLookup, Completion, FailureCause, Outcome, Resumed, SuspendedUnit, Suspension,
    TaskTag, suspend,
};
use crate::persistence::TaskRecord;
use crate::remote::RemoteApiClient;
use crate::types::{ExecutionRef, ExecutionStatus, JobRunId, TaskId};
use crate::webhooks::{EventKind, ExecutionEvent};

/// Result of sweeping the run's step tasks.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Step tasks this sweep finished.
    pub quieted: Vec<TaskId>,
    /// Step tasks whose quiet finish failed; the sweep carried on.
    pub failures: Vec<(TaskId, TaskError)>,
}

/// A unit of work waiting for an execution to end.
pub struct ExecutionEndTask {
    id: TaskId,
    execution: ExecutionRef,
    state: StateCell,
    suspension: Suspension,
    registry: Arc<TaskRegistry<ExecutionEndTask>>,
    steps: Arc<TaskRegistry<StepWaitTask>>,
    host: Arc<dyn ActiveExecutionLookup>,
    mirror: Option<Arc<dyn RemoteApiClient>>,
}

impl std::fmt::Debug for ExecutionEndTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEndTask")
            .field("id", &self.id)
            .field("run", self.registry.run())
            .field("execution", &self.execution)
            .field("mirror", &self.mirror.is_some())
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl ExecutionEndTask {
    pub fn new(
        registries: &RunRegistries,
        host: Arc<dyn ActiveExecutionLookup>,
        execution: ExecutionRef,
    ) -> (Self, Resumed) {
        Self::build(TaskId::generate(), TaskState::Created, registries, host, execution)
    }

    /// Rebuilds a task that was waiting before a restart.
    pub fn restore(
        id: TaskId,
        registries: &RunRegistries,
        host: Arc<dyn ActiveExecutionLookup>,
        execution: ExecutionRef,
    ) -> (Self, Resumed) {
        Self::build(id, TaskState::Waiting, registries, host, execution)
    }

    fn build(
        id: TaskId,
        state: TaskState,
        registries: &RunRegistries,
        host: Arc<dyn ActiveExecutionLookup>,
        execution: ExecutionRef,
    ) -> (Self, Resumed) {
        let (suspension, resumed) = suspend();
        let task = ExecutionEndTask {
            id,
            execution,
            state: StateCell::new(state),
            suspension,
            registry: Arc::clone(&registries.ends),
            steps: Arc::clone(&registries.steps),
            host,
            mirror: None,
        };
        (task, resumed)
    }

    /// Mirrors the remote terminal status into the local outcome.
    pub fn with_mirror(mut self, client: Arc<dyn RemoteApiClient>) -> Self {
        self.mirror = Some(client);
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

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    /// `Created → Waiting`: marks the unit paused and registers it.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if !self.state.start() {
            return Ok(());
        }

        self.host
            .mark_paused(self.run(), SuspendedUnit::ExecutionEnd(Arc::clone(self)));

        if let Err(e) = self.registry.add(Arc::clone(self)).await {
            warn!(run = %self.run(), task = %self.id, error = %e, "registration failed");
            self.abort("registration failed").await;
            return Err(e.into());
        }

        info!(
            run = %self.run(),
            task = %self.id,
            execution = %self.execution,
            "waiting for execution end"
        );
        Ok(())
    }

    pub fn wants_execution(&self, execution: &ExecutionRef) -> bool {
        self.execution == *execution
    }

    /// Delivers an execution notification. Returns whether this task
    /// consumed it.
    pub async fn on_event(&self, event: &ExecutionEvent) -> Result<bool> {
        if event.kind != EventKind::ExecutionEnded || !self.wants_execution(&event.execution) {
            return Ok(false);
        }
        if !self.state.finish(FinishReason::Event) {
            return Ok(false);
        }

        info!(
            run = %self.run(),
            task = %self.id,
            execution = %self.execution,
            "execution ended event received"
        );

        let report = self.sweep().await;
        for (task, error) in &report.failures {
            warn!(run = %self.run(), task = %task, error = %error, "quiet finish failed");
        }

        let outcome = self.outcome(event.status).await;
        self.settle(outcome).await?;
        Ok(true)
    }

    /// Quietly finishes the run's still-waiting step tasks on this execution.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        // Snapshot: quiet finishes remove themselves from the same registry.
        let snapshot = self.steps.list_all().await;

        for task in snapshot
            .iter()
            .filter(|t| t.wants_execution(&self.execution))
        {
            match task.quiet_finish().await {
                Ok(true) => report.quieted.push(task.id()),
                Ok(false) => {}
                Err(e) => report.failures.push((task.id(), e)),
            }
        }

        info!(
            run = %self.run(),
            quieted = report.quieted.len(),
            failed = report.failures.len(),
            "step tasks swept"
        );
        report
    }

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

    async fn outcome(&self, reported: Option<ExecutionStatus>) -> Outcome {
        let Some(client) = &self.mirror else {
            return Outcome::Completed(Completion::ExecutionEnded { status: reported });
        };

        match client.get_execution(&self.execution).await {
            Ok(execution) => mirror_status(execution.status),
            Err(e) => {
                warn!(task = %self.id, error = %e, "fetching execution status failed");
                Outcome::Failed(FailureCause::RemoteApi(e.to_string()))
            }
        }
    }

    async fn settle(&self, outcome: Outcome) -> Result<()> {
        self.host.release(self.run(), self.id);
        let removed = self.registry.remove(self.id).await;
        self.suspension.resume(outcome);
        removed?;
        Ok(())
    }
}

/// Maps a remote status to the local outcome.
///
/// Statuses that are not terminal (the notification raced the status API)
/// are treated as success.
pub fn mirror_status(status: ExecutionStatus) -> Outcome {
    match status {
        ExecutionStatus::Cancelled => Outcome::Failed(FailureCause::RemoteCancelled),
        ExecutionStatus::Error | ExecutionStatus::Failed => {
            Outcome::Failed(FailureCause::RemoteFailed(status))
        }
        _ => Outcome::Completed(Completion::ExecutionEnded {
            status: Some(status),
        }),
    }
}

impl Correlated for ExecutionEndTask {
    const TAG: TaskTag = TaskTag::ExecutionEnd;

    fn id(&self) -> TaskId {
        self.id
    }

    fn record(&self) -> TaskRecord {
        TaskRecord::new(self.id)
    }

    fn from_unit(unit: &SuspendedUnit) -> Option<Arc<Self>> {
        match unit {
            SuspendedUnit::ExecutionEnd(task) => Some(Arc::clone(task)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationIndex;
    use crate::host::LocalHost;
    use crate::persistence::MemoryJobRunStore;
    use crate::test_utils::{FlakyStore, exec, run_id};
    use crate::types::StepInterest;
    use std::time::Duration;

    #[tokio::test]
    async fn sweep_carries_on_past_failed_quiet_finishes() {
        let store = Arc::new(FlakyStore::new(Arc::new(MemoryJobRunStore::new())));
        let host = Arc::new(LocalHost::new());
        host.begin_run(&run_id());
        let index = CorrelationIndex::new(store.clone(), host.clone(), Duration::from_secs(60));
        let registries = index.registries(&run_id()).unwrap();

        let mut steps = Vec::new();
        for _ in 0..3 {
            let (task, resumed) = StepWaitTask::new(
                registries.steps.clone(),
                host.clone(),
                exec("1"),
                StepInterest::all(),
            );
            let task = Arc::new(task);
            task.start().await.unwrap();
            steps.push((task, resumed));
        }
        let (end, _resumed) = ExecutionEndTask::new(&registries, host.clone(), exec("1"));
        let end = Arc::new(end);
        end.start().await.unwrap();

        // The first unregister persists; the other two fail to save.
        store.fail_saves_after(1);
        let report = end.sweep().await;

        assert_eq!(report.quieted, vec![steps[0].0.id()]);
        let failed: Vec<TaskId> = report.failures.iter().map(|(id, _)| *id).collect();
        assert_eq!(failed, vec![steps[1].0.id(), steps[2].0.id()]);

        for (task, resumed) in steps {
            assert_eq!(task.state(), TaskState::Finished(FinishReason::Quiet));
            assert_eq!(resumed.wait().await, Outcome::Completed(Completion::Quiet));
        }
        assert_eq!(host.paused_count(&run_id()), 1);
        assert!(registries.steps.list_all().await.is_empty());
    }

    #[test]
    fn mirror_status_mapping() {
        assert_eq!(
            mirror_status(ExecutionStatus::Finished),
            Outcome::Completed(Completion::ExecutionEnded {
                status: Some(ExecutionStatus::Finished)
            })
        );
        assert_eq!(
            mirror_status(ExecutionStatus::Cancelled),
            Outcome::Failed(FailureCause::RemoteCancelled)
        );
        assert_eq!(
            mirror_status(ExecutionStatus::Failed),
            Outcome::Failed(FailureCause::RemoteFailed(ExecutionStatus::Failed))
        );
        assert_eq!(
            mirror_status(ExecutionStatus::Error),
            Outcome::Failed(FailureCause::RemoteFailed(ExecutionStatus::Error))
        );
        assert!(mirror_status(ExecutionStatus::Running).is_success());
    }
}

//! Poll task: a suspended unit of work resumed by status checks.
//!
//! # Lifecycle
//!
//! ```text
//! start ──► persist PollSpec, mark paused, spawn loop
//!   loop: sleep(period) ──► is_execution_running?
//!           true  ──► next tick
//!           false ──► cancel, resume Completed(RemoteFinished)
//!           error ──► cancel, resume Failed(RemoteApi(message))
//! stop  ──► cancel, release, never resume
//! ```
//!
//! A poll task carries its own parameters, so a restarted process simply
//! calls [`PollTask::restore`] with the persisted [`PollSpec`] and starts it
//! again.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::config::PollConfig;
use crate::host::{
    ActiveExecutionLookup, Completion, FailureCause, Outcome, Resumed, SuspendedUnit, Suspension,
    suspend,
};
use crate::persistence::{JobRunStore, StoreError, update_run};
use crate::remote::RemoteApiClient;
use crate::tasks::{FinishReason, StateCell, TaskState};
use crate::types::{ExecutionRef, JobRunId, TaskId};

/// Persisted parameters of a poll task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSpec {
    pub execution: ExecutionRef,
    /// Requested period; clamped when turned into a [`PollConfig`].
    pub period_ms: u64,
    #[serde(default)]
    pub quiet: bool,
}

impl PollSpec {
    pub fn new(execution: ExecutionRef, config: PollConfig) -> Self {
        PollSpec {
            execution,
            period_ms: u64::try_from(config.period().as_millis()).unwrap_or(u64::MAX),
            quiet: config.quiet,
        }
    }

    pub fn config(&self) -> PollConfig {
        PollConfig::from_millis(self.period_ms).quiet(self.quiet)
    }
}

/// Collaborators a poll task needs.
#[derive(Clone)]
pub struct PollContext {
    pub client: Arc<dyn RemoteApiClient>,
    pub store: Arc<dyn JobRunStore>,
    pub host: Arc<dyn ActiveExecutionLookup>,
}

/// A unit of work waiting for a remote execution to stop running.
pub struct PollTask {
    id: TaskId,
    run: JobRunId,
    spec: PollSpec,
    config: PollConfig,
    ctx: PollContext,
    state: StateCell,
    suspension: Suspension,
    cancel: CancellationToken,
}

impl std::fmt::Debug for PollTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollTask")
            .field("id", &self.id)
            .field("run", &self.run)
            .field("spec", &self.spec)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl PollTask {
    pub fn new(run: JobRunId, spec: PollSpec, ctx: PollContext) -> (Self, Resumed) {
        Self::build(TaskId::generate(), TaskState::Created, run, spec, ctx)
    }

    /// Rebuilds a poll task from its persisted spec after a restart.
    pub fn restore(id: TaskId, run: JobRunId, spec: PollSpec, ctx: PollContext) -> (Self, Resumed) {
        Self::build(id, TaskState::Waiting, run, spec, ctx)
    }

    fn build(
        id: TaskId,
        state: TaskState,
        run: JobRunId,
        spec: PollSpec,
        ctx: PollContext,
    ) -> (Self, Resumed) {
        let (suspension, resumed) = suspend();
        let task = PollTask {
            id,
            run,
            config: spec.config(),
            spec,
            ctx,
            state: StateCell::new(state),
            suspension,
            cancel: CancellationToken::new(),
        };
        (task, resumed)
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn run(&self) -> &JobRunId {
        &self.run
    }

    pub fn spec(&self) -> &PollSpec {
        &self.spec
    }

    pub fn config(&self) -> PollConfig {
        self.config
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    /// Persists the spec, marks the unit paused and schedules the checks.
    ///
    /// Used both on first start and on restart of a restored task. A task
    /// that already finished is not scheduled again.
    #[instrument(skip_all, fields(run = %self.run, task = %self.id))]
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, StoreError> {
        self.state.start();
        if self.state.is_finished() {
            return Ok(tokio::spawn(async {}));
        }

        let (id, spec) = (self.id, self.spec.clone());
        update_run(self.ctx.store.as_ref(), &self.run, true, |metadata| {
            metadata.polls.insert(id, spec);
        })?;

        self.ctx
            .host
            .mark_paused(&self.run, SuspendedUnit::Poll(Arc::clone(self)));

        info!(
            execution = %self.spec.execution,
            period_secs = self.config.period().as_secs(),
            "polling remote execution"
        );

        let task = Arc::clone(self);
        Ok(tokio::spawn(async move { task.poll_loop().await }))
    }

    /// Cancels the schedule. The suspended caller is never resumed after
    /// this; a tick already in flight is abandoned.
    pub fn stop(&self) {
        self.cancel.cancel();
        if self.state.finish(FinishReason::Aborted) {
            info!(run = %self.run, task = %self.id, "poller stopped");
            self.cleanup();
        }
    }

    async fn poll_loop(&self) {
        let period = self.config.period();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(period) => {}
            }

            if !self.config.quiet {
                info!(run = %self.run, execution = %self.spec.execution, "checking remote execution status");
            }

            let running = tokio::select! {
                _ = self.cancel.cancelled() => return,
                running = self.ctx.client.is_execution_running(&self.spec.execution) => running,
            };

            match running {
                Ok(true) => continue,
                Ok(false) => {
                    self.complete(Outcome::Completed(Completion::RemoteFinished));
                    return;
                }
                Err(e) => {
                    warn!(run = %self.run, task = %self.id, error = %e, "status check failed");
                    self.complete(Outcome::Failed(FailureCause::RemoteApi(e.to_string())));
                    return;
                }
            }
        }
    }

    fn complete(&self, outcome: Outcome) {
        self.cancel.cancel();
        if !self.state.finish(FinishReason::Event) {
            debug!(task = %self.id, "poll result after stop discarded");
            return;
        }
        info!(run = %self.run, task = %self.id, success = outcome.is_success(), "poller finished");
        self.cleanup();
        self.suspension.resume(outcome);
    }

    fn cleanup(&self) {
        self.ctx.host.release(&self.run, self.id);
        let id = self.id;
        if let Err(e) = update_run(self.ctx.store.as_ref(), &self.run, false, |metadata| {
            metadata.polls.remove(&id);
        }) {
            warn!(run = %self.run, task = %self.id, error = %e, "cannot forget poll spec");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::LocalHost;
    use crate::persistence::MemoryJobRunStore;
    use crate::remote::RemoteApiError;
    use crate::test_utils::{FakeRemoteApi, exec, run_id};
    use crate::types::ExecutionStatus;
    use std::time::Duration;

    struct Fixture {
        api: Arc<FakeRemoteApi>,
        store: Arc<MemoryJobRunStore>,
        host: Arc<LocalHost>,
    }

    impl Fixture {
        fn new() -> Self {
            let api = Arc::new(FakeRemoteApi::new());
            api.set_status(&exec("1"), ExecutionStatus::Running);
            Fixture {
                api,
                store: Arc::new(MemoryJobRunStore::new()),
                host: Arc::new(LocalHost::new()),
            }
        }

        fn ctx(&self) -> PollContext {
            PollContext {
                client: self.api.clone(),
                store: self.store.clone(),
                host: self.host.clone(),
            }
        }

        fn task(&self, period: Duration) -> (Arc<PollTask>, Resumed) {
            let spec = PollSpec::new(exec("1"), PollConfig::with_period(period).quiet(true));
            let (task, resumed) = PollTask::new(run_id(), spec, self.ctx());
            (Arc::new(task), resumed)
        }

        fn persisted_polls(&self) -> usize {
            self.store
                .load(&run_id())
                .unwrap()
                .map_or(0, |m| m.polls.len())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn resumes_when_remote_execution_finishes() {
        let fx = Fixture::new();
        let (task, mut resumed) = fx.task(Duration::from_secs(60));
        let handle = task.start().unwrap();
        assert_eq!(fx.persisted_polls(), 1);
        assert!(fx.host.is_paused(&run_id(), task.id()));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(fx.api.running_checks(), 1);
        assert_eq!(resumed.try_outcome(), None);

        fx.api.set_status(&exec("1"), ExecutionStatus::Finished);
        tokio::time::sleep(Duration::from_secs(60)).await;
        handle.await.unwrap();

        assert_eq!(fx.api.running_checks(), 2);
        assert_eq!(
            resumed.try_outcome(),
            Some(Outcome::Completed(Completion::RemoteFinished))
        );
        assert_eq!(fx.persisted_polls(), 0);
        assert!(!fx.host.is_paused(&run_id(), task.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn remote_error_resumes_with_failure() {
        let fx = Fixture::new();
        fx.api.fail_with(RemoteApiError::with_status(500, "backend down"));
        let (task, resumed) = fx.task(Duration::from_secs(30));
        task.start().unwrap().await.unwrap();

        assert_eq!(
            resumed.wait().await,
            Outcome::Failed(FailureCause::RemoteApi("backend down (HTTP 500)".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn period_is_clamped_to_minimum() {
        let fx = Fixture::new();
        let (task, _resumed) = fx.task(Duration::from_millis(5000));
        assert_eq!(task.config().period(), Duration::from_secs(30));
        task.start().unwrap();

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(fx.api.running_checks(), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fx.api.running_checks(), 1);
        task.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_and_never_resumes() {
        let fx = Fixture::new();
        let (task, mut resumed) = fx.task(Duration::from_secs(30));
        let handle = task.start().unwrap();

        task.stop();
        handle.await.unwrap();
        fx.api.set_status(&exec("1"), ExecutionStatus::Finished);
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(fx.api.running_checks(), 0);
        assert_eq!(resumed.try_outcome(), None);
        assert_eq!(task.state(), TaskState::Finished(FinishReason::Aborted));
        assert_eq!(fx.persisted_polls(), 0);
        assert!(!fx.host.is_paused(&run_id(), task.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn restored_task_reschedules_from_spec() {
        let fx = Fixture::new();
        let (task, _resumed) = fx.task(Duration::from_secs(45));
        task.start().unwrap();
        let (id, spec) = (task.id(), task.spec().clone());
        task.stop();

        // Restart: fresh objects from the persisted parameters.
        let restored_fx = Fixture::new();
        let (restored, mut resumed) = PollTask::restore(id, run_id(), spec, restored_fx.ctx());
        let restored = Arc::new(restored);
        restored_fx.api.set_status(&exec("1"), ExecutionStatus::Cancelled);
        let handle = restored.start().unwrap();

        tokio::time::sleep(Duration::from_secs(46)).await;
        handle.await.unwrap();
        assert_eq!(restored.id(), id);
        assert_eq!(
            resumed.try_outcome(),
            Some(Outcome::Completed(Completion::RemoteFinished))
        );
    }

    #[test]
    fn spec_roundtrips_through_json() {
        let spec = PollSpec::new(exec("1"), PollConfig::from_millis(60_000).quiet(true));
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["period_ms"], 60_000);
        let back: PollSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, spec);
    }
}

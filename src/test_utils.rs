//! Shared test utilities: fakes for the external seams, payload builders and
//! arbitrary generators for property-based testing.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::json;

use crate::persistence::{JobRunStore, RunMetadata, StoreError, apply_update};
use crate::remote::{RemoteApiClient, RemoteApiError, Result as RemoteResult};
use crate::trigger::{LaunchError, RunLauncher};
use crate::types::{
    Execution, ExecutionRef, ExecutionStatus, JobRunId, StepAction, StepInterest, StepState,
    StepStatus,
};
use crate::webhooks::{EventKind, StepEvent};

/// Organization scope used by the payload builders.
pub const TEST_ORG: &str = "org-1";

pub fn run_id() -> JobRunId {
    JobRunId::new("folder/job#1")
}

/// Execution `{1, 1, id}`.
pub fn exec(id: &str) -> ExecutionRef {
    ExecutionRef::new("1", "1", id)
}

pub fn step_event(kind: EventKind, execution: ExecutionRef, action: &str) -> StepEvent {
    StepEvent {
        kind,
        organization_scope: TEST_ORG.to_string(),
        execution,
        action: action.to_string(),
        status: None,
    }
}

pub fn step_event_json(kind: EventKind, execution: &ExecutionRef, action: &str) -> String {
    json!({
        "kind": kind.as_str(),
        "organizationScope": TEST_ORG,
        "step": {
            "programId": execution.program_id,
            "pipelineId": execution.pipeline_id,
            "executionId": execution.execution_id,
            "action": action,
        }
    })
    .to_string()
}

pub fn execution_event_json(
    kind: EventKind,
    execution: &ExecutionRef,
    status: Option<ExecutionStatus>,
) -> String {
    let mut body = json!({
        "kind": kind.as_str(),
        "organizationScope": TEST_ORG,
        "execution": {
            "programId": execution.program_id,
            "pipelineId": execution.pipeline_id,
            "executionId": execution.execution_id,
        }
    });
    if let Some(status) = status {
        body["execution"]["status"] = json!(status);
    }
    body.to_string()
}

// ─── Remote API fake ───

#[derive(Debug, Default)]
struct FakeState {
    statuses: HashMap<ExecutionRef, ExecutionStatus>,
    steps: HashMap<ExecutionRef, StepState>,
    logs: HashMap<(ExecutionRef, StepAction), Vec<u8>>,
    failure: Option<RemoteApiError>,
    advances: HashMap<ExecutionRef, usize>,
    running_checks: usize,
    next_execution: u64,
}

/// In-memory remote pipeline service.
#[derive(Debug, Default)]
pub struct FakeRemoteApi {
    state: Mutex<FakeState>,
}

impl FakeRemoteApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, execution: &ExecutionRef, status: ExecutionStatus) {
        self.state.lock().statuses.insert(execution.clone(), status);
    }

    pub fn set_step(&self, execution: &ExecutionRef, action: StepAction, status: StepStatus) {
        self.state.lock().steps.insert(
            execution.clone(),
            StepState {
                action: action.as_str().to_string(),
                status,
            },
        );
    }

    pub fn set_step_log(&self, execution: &ExecutionRef, action: StepAction, log: &[u8]) {
        self.state
            .lock()
            .logs
            .insert((execution.clone(), action), log.to_vec());
    }

    /// Makes every subsequent call fail with `error`.
    pub fn fail_with(&self, error: RemoteApiError) {
        self.state.lock().failure = Some(error);
    }

    pub fn advance_calls(&self, execution: &ExecutionRef) -> usize {
        self.state
            .lock()
            .advances
            .get(execution)
            .copied()
            .unwrap_or(0)
    }

    pub fn running_checks(&self) -> usize {
        self.state.lock().running_checks
    }

    fn check_failure(&self) -> RemoteResult<()> {
        match &self.state.lock().failure {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn status(&self, execution: &ExecutionRef) -> RemoteResult<ExecutionStatus> {
        self.state
            .lock()
            .statuses
            .get(execution)
            .copied()
            .ok_or_else(|| RemoteApiError::with_status(404, format!("execution {} not found", execution)))
    }
}

#[async_trait]
impl RemoteApiClient for FakeRemoteApi {
    async fn start_execution(&self, program_id: &str, pipeline_id: &str) -> RemoteResult<ExecutionRef> {
        self.check_failure()?;
        let mut state = self.state.lock();
        state.next_execution += 1;
        let execution = ExecutionRef::new(program_id, pipeline_id, state.next_execution.to_string());
        state
            .statuses
            .insert(execution.clone(), ExecutionStatus::Running);
        Ok(execution)
    }

    async fn get_execution(&self, execution: &ExecutionRef) -> RemoteResult<Execution> {
        self.check_failure()?;
        Ok(Execution {
            reference: execution.clone(),
            status: self.status(execution)?,
        })
    }

    async fn is_execution_running(&self, execution: &ExecutionRef) -> RemoteResult<bool> {
        self.state.lock().running_checks += 1;
        self.check_failure()?;
        Ok(!self.status(execution)?.is_terminal())
    }

    async fn get_current_step(&self, execution: &ExecutionRef) -> RemoteResult<StepState> {
        self.check_failure()?;
        self.state
            .lock()
            .steps
            .get(execution)
            .cloned()
            .ok_or_else(|| RemoteApiError::with_status(404, "no current step"))
    }

    async fn advance_execution(&self, execution: &ExecutionRef) -> RemoteResult<()> {
        self.check_failure()?;
        *self
            .state
            .lock()
            .advances
            .entry(execution.clone())
            .or_default() += 1;
        Ok(())
    }

    async fn download_step_log(
        &self,
        execution: &ExecutionRef,
        action: StepAction,
        sink: &mut (dyn Write + Send),
    ) -> RemoteResult<()> {
        self.check_failure()?;
        let log = self
            .state
            .lock()
            .logs
            .get(&(execution.clone(), action))
            .cloned()
            .ok_or_else(|| RemoteApiError::with_status(404, "log not found"))?;
        sink.write_all(&log)?;
        Ok(())
    }
}

// ─── Run launcher fake ───

/// Launcher that names runs `<job>#<n>`.
#[derive(Debug, Default)]
pub struct FakeLauncher {
    launched: Mutex<Vec<String>>,
    reject: bool,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting() -> Self {
        FakeLauncher {
            reject: true,
            ..Self::default()
        }
    }

    pub fn launched(&self) -> Vec<String> {
        self.launched.lock().clone()
    }
}

#[async_trait]
impl RunLauncher for FakeLauncher {
    async fn launch(&self, job: &str, _execution: &ExecutionRef) -> Result<JobRunId, LaunchError> {
        if self.reject {
            return Err(LaunchError::Rejected("launcher disabled".to_string()));
        }
        let mut launched = self.launched.lock();
        launched.push(job.to_string());
        let n = launched.iter().filter(|j| j.as_str() == job).count();
        Ok(JobRunId::new(format!("{}#{}", job, n)))
    }
}

// ─── Store fault injection ───

/// Wraps a store and fails saves once a budget is spent, or loads of chosen
/// runs once they have been read a given number of times.
pub struct FlakyStore {
    inner: Arc<dyn JobRunStore>,
    save_budget: Mutex<Option<usize>>,
    load_budgets: Mutex<HashMap<JobRunId, usize>>,
    update_lock: Mutex<()>,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn JobRunStore>) -> Self {
        FlakyStore {
            inner,
            save_budget: Mutex::new(None),
            load_budgets: Mutex::new(HashMap::new()),
            update_lock: Mutex::new(()),
        }
    }

    /// Lets `saves` more saves through, then fails every save.
    pub fn fail_saves_after(&self, saves: usize) {
        *self.save_budget.lock() = Some(saves);
    }

    /// Lets `loads` more loads of `run` through, then fails them.
    pub fn fail_loads_after(&self, run: &JobRunId, loads: usize) {
        self.load_budgets.lock().insert(run.clone(), loads);
    }

    fn injected() -> StoreError {
        StoreError::Io(io::Error::other("injected store failure"))
    }
}

impl JobRunStore for FlakyStore {
    fn load(&self, run: &JobRunId) -> Result<Option<RunMetadata>, StoreError> {
        if let Some(left) = self.load_budgets.lock().get_mut(run) {
            if *left == 0 {
                return Err(Self::injected());
            }
            *left -= 1;
        }
        self.inner.load(run)
    }

    fn save(&self, run: &JobRunId, metadata: &RunMetadata) -> Result<(), StoreError> {
        if let Some(left) = self.save_budget.lock().as_mut() {
            if *left == 0 {
                return Err(Self::injected());
            }
            *left -= 1;
        }
        self.inner.save(run, metadata)
    }

    fn delete(&self, run: &JobRunId) -> Result<(), StoreError> {
        self.inner.delete(run)
    }

    fn update(
        &self,
        run: &JobRunId,
        create: bool,
        f: &mut dyn FnMut(&mut RunMetadata),
    ) -> Result<bool, StoreError> {
        let _guard = self.update_lock.lock();
        match apply_update(self.load(run)?, create, f) {
            Some(metadata) => {
                self.save(run, &metadata)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ─── Generators ───

pub fn arb_execution_ref() -> impl Strategy<Value = ExecutionRef> {
    ("[0-9]{1,6}", "[0-9]{1,6}", "[0-9]{1,8}").prop_map(|(p, pl, e)| ExecutionRef::new(p, pl, e))
}

pub fn arb_step_action() -> impl Strategy<Value = StepAction> {
    prop_oneof![
        Just(StepAction::Validate),
        Just(StepAction::Build),
        Just(StepAction::CodeQuality),
        Just(StepAction::Deploy),
        Just(StepAction::Approval),
        Just(StepAction::Schedule),
        Just(StepAction::Managed),
    ]
}

pub fn arb_step_interest() -> impl Strategy<Value = StepInterest> {
    prop_oneof![
        Just(StepInterest::all()),
        prop::collection::vec(arb_step_action(), 1..4).prop_map(StepInterest::actions),
    ]
}

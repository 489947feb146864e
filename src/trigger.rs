//! Start trigger: launch local job runs when a remote execution starts.
//!
//! Configured [`TriggerRule`]s map a project and a remote pipeline to a
//! local job. When a matching `execution-started` notification is routed, the
//! [`RunLauncher`] launches the job and the discovered execution is attached
//! to the new run's metadata, so later notifications for that execution
//! correlate with the run.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::correlation::CorrelationIndex;
use crate::router::{EventSubscriber, SubscriberError, SubscriberEvent};
use crate::types::{ExecutionRef, JobRunId};
use crate::webhooks::{EventKind, parse_execution_event};

/// Error returned by a [`RunLauncher`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaunchError {
    #[error("job {0} not found")]
    UnknownJob(String),

    #[error("launch rejected: {0}")]
    Rejected(String),
}

/// Launches local job runs.
#[async_trait]
pub trait RunLauncher: Send + Sync {
    /// Launches `job` for the started remote `execution` and returns the new
    /// run's id.
    async fn launch(&self, job: &str, execution: &ExecutionRef) -> Result<JobRunId, LaunchError>;
}

/// One configured trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRule {
    /// Project name the notification must resolve to.
    pub project: String,
    pub program_id: String,
    pub pipeline_id: String,
    /// Local job to launch.
    pub job: String,
}

impl TriggerRule {
    pub fn matches(&self, project: &str, execution: &ExecutionRef) -> bool {
        self.project == project
            && self.program_id == execution.program_id
            && self.pipeline_id == execution.pipeline_id
    }
}

/// Router subscriber for `execution-started`.
pub struct StartTrigger {
    rules: Vec<TriggerRule>,
    launcher: Arc<dyn RunLauncher>,
    index: Arc<CorrelationIndex>,
}

impl std::fmt::Debug for StartTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartTrigger")
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

impl StartTrigger {
    pub fn new(
        rules: Vec<TriggerRule>,
        launcher: Arc<dyn RunLauncher>,
        index: Arc<CorrelationIndex>,
    ) -> Self {
        StartTrigger {
            rules,
            launcher,
            index,
        }
    }

    /// Launches every matching job. Returns the runs that were launched.
    pub async fn fire(&self, project: &str, execution: &ExecutionRef) -> Vec<JobRunId> {
        let mut launched = Vec::new();

        for rule in self.rules.iter().filter(|r| r.matches(project, execution)) {
            let run = match self.launcher.launch(&rule.job, execution).await {
                Ok(run) => run,
                Err(e) => {
                    warn!(job = %rule.job, execution = %execution, error = %e, "launch failed");
                    continue;
                }
            };

            if let Err(e) = self.index.attach_execution(&run, execution.clone()) {
                warn!(run = %run, execution = %execution, error = %e, "cannot attach execution");
            }
            info!(job = %rule.job, run = %run, execution = %execution, "run launched");
            launched.push(run);
        }

        launched
    }
}

#[async_trait]
impl EventSubscriber for StartTrigger {
    fn name(&self) -> &str {
        "start-trigger"
    }

    fn wants(&self, kind: EventKind) -> bool {
        kind == EventKind::ExecutionStarted
    }

    async fn on_event(&self, event: SubscriberEvent) -> Result<(), SubscriberError> {
        let started = parse_execution_event(event.raw_payload.as_bytes())?;
        self.fire(&event.project_name, &started.execution).await;
        Ok(())
    }
}

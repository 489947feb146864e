//! The router subscriber that resumes waiting tasks.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::index::CorrelationIndex;
use super::{CorrelationError, Result};
use crate::router::{EventSubscriber, SubscriberError, SubscriberEvent};
use crate::webhooks::{EventKind, parse_execution_event, parse_step_event};

/// Matches step and execution-ended notifications to waiting tasks.
#[derive(Debug, Clone)]
pub struct CorrelationEngine {
    index: Arc<CorrelationIndex>,
}

impl CorrelationEngine {
    pub fn new(index: Arc<CorrelationIndex>) -> Self {
        CorrelationEngine { index }
    }

    pub fn index(&self) -> &Arc<CorrelationIndex> {
        &self.index
    }

    /// Delivers one notification to every interested task of every run that
    /// has the notification's execution attached.
    ///
    /// Returns how many tasks consumed it, or `CorrelationNotFound` if none
    /// did. Task failures and runs whose registries cannot be opened are
    /// logged and do not stop delivery to the others.
    #[instrument(skip_all, fields(kind = %kind))]
    pub async fn deliver(&self, kind: EventKind, raw_payload: &str) -> Result<usize> {
        let (execution, resumed) = if kind.is_step() {
            let event = parse_step_event(raw_payload.as_bytes())?;
            let mut resumed = 0;
            for run in self.index.runs_for_execution(&event.execution).await {
                let registries = match self.index.registries(&run) {
                    Ok(registries) => registries,
                    Err(e) => {
                        warn!(run = %run, error = %e, "cannot open run registries");
                        continue;
                    }
                };
                for task in registries.steps.list_all().await {
                    match task.on_event(&event).await {
                        Ok(true) => resumed += 1,
                        Ok(false) => {}
                        Err(e) => {
                            resumed += 1;
                            warn!(run = %run, task = %task.id(), error = %e, "step task transition failed");
                        }
                    }
                }
            }
            (event.execution, resumed)
        } else if kind == EventKind::ExecutionEnded {
            let event = parse_execution_event(raw_payload.as_bytes())?;
            let mut resumed = 0;
            for run in self.index.runs_for_execution(&event.execution).await {
                let registries = match self.index.registries(&run) {
                    Ok(registries) => registries,
                    Err(e) => {
                        warn!(run = %run, error = %e, "cannot open run registries");
                        continue;
                    }
                };
                for task in registries.ends.list_all().await {
                    match task.on_event(&event).await {
                        Ok(true) => resumed += 1,
                        Ok(false) => {}
                        Err(e) => {
                            resumed += 1;
                            warn!(run = %run, task = %task.id(), error = %e, "end task transition failed");
                        }
                    }
                }
            }
            (event.execution, resumed)
        } else {
            return Ok(0);
        };

        if resumed == 0 {
            return Err(CorrelationError::CorrelationNotFound { kind, execution });
        }
        debug!(execution = %execution, resumed, "notification correlated");
        Ok(resumed)
    }
}

#[async_trait]
impl EventSubscriber for CorrelationEngine {
    fn name(&self) -> &str {
        "correlation"
    }

    fn wants(&self, kind: EventKind) -> bool {
        kind.is_step() || kind == EventKind::ExecutionEnded
    }

    async fn on_event(&self, event: SubscriberEvent) -> std::result::Result<(), SubscriberError> {
        match self.deliver(event.kind, &event.raw_payload).await {
            Ok(_) => Ok(()),
            Err(e @ CorrelationError::CorrelationNotFound { .. }) => {
                debug!(project = %event.project_name, error = %e, "no waiting task");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

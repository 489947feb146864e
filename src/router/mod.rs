//! Event router: asynchronous fan-out of verified notifications.
//!
//! The ingress hands every verified, classified, non-challenge event to
//! [`EventRouter::route`], which returns immediately. The dispatch itself runs
//! on the runtime:
//!
//! 1. resolve the configured project whose organization id matches the
//!    event's scope; none → `ConfigurationMissing` diagnostic, dispatch skipped
//! 2. spawn one task per subscriber whose interest contains the event kind
//! 3. await them all; an error or panic in one subscriber is logged and never
//!    affects the others
//!
//! Each subscriber sees each routed event at most once.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use crate::config::Projects;
use crate::correlation::CorrelationError;
use crate::webhooks::{Event, EventKind, IngressError};

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberEvent {
    /// Name of the configured project the event belongs to.
    pub project_name: String,
    pub kind: EventKind,
    /// The verified request body, verbatim.
    pub raw_payload: String,
}

/// Errors a subscriber may report. The router only logs them.
#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("payload error: {0}")]
    Payload(#[from] IngressError),

    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    #[error("{0}")]
    Other(String),
}

/// A consumer of routed events.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Whether this subscriber wants events of `kind`.
    fn wants(&self, kind: EventKind) -> bool;

    async fn on_event(&self, event: SubscriberEvent) -> Result<(), SubscriberError>;
}

/// Summary of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Resolved project; `None` when dispatch was skipped.
    pub project: Option<String>,
    pub delivered: usize,
    pub failed: usize,
}

/// Routes events to subscribers.
#[derive(Clone)]
pub struct EventRouter {
    projects: Projects,
    subscribers: Arc<RwLock<Vec<Arc<dyn EventSubscriber>>>>,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .subscribers
            .read()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        f.debug_struct("EventRouter")
            .field("projects", &self.projects)
            .field("subscribers", &names)
            .finish()
    }
}

impl EventRouter {
    pub fn new(projects: Projects) -> Self {
        EventRouter {
            projects,
            subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn projects(&self) -> &Projects {
        &self.projects
    }

    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        debug!(subscriber = subscriber.name(), "subscriber registered");
        self.subscribers.write().push(subscriber);
    }

    /// Hands `event` to the runtime and returns at once.
    ///
    /// Challenge events are never routed and yield `None`. Must be called
    /// from within a tokio runtime.
    pub fn route(&self, event: Event) -> Option<JoinHandle<DispatchReport>> {
        if event.kind() == EventKind::Challenge {
            return None;
        }

        let projects = self.projects.clone();
        let subscribers: Vec<Arc<dyn EventSubscriber>> = self.subscribers.read().clone();
        Some(tokio::spawn(dispatch(projects, subscribers, event)))
    }
}

#[instrument(skip_all, fields(kind = %event.kind(), scope = ?event.organization_scope()))]
async fn dispatch(
    projects: Projects,
    subscribers: Vec<Arc<dyn EventSubscriber>>,
    event: Event,
) -> DispatchReport {
    let Some(project) = event
        .organization_scope()
        .and_then(|scope| projects.by_organization(scope))
    else {
        let missing = CorrelationError::ConfigurationMissing {
            scope: event.organization_scope().map(str::to_string),
        };
        warn!(error = %missing, "dispatch skipped");
        return DispatchReport::default();
    };

    let routed = SubscriberEvent {
        project_name: project.name.clone(),
        kind: event.kind(),
        raw_payload: event.raw_payload().to_string(),
    };

    let handles: Vec<(String, JoinHandle<Result<(), SubscriberError>>)> = subscribers
        .into_iter()
        .filter(|s| s.wants(routed.kind))
        .map(|subscriber| {
            let name = subscriber.name().to_string();
            let event = routed.clone();
            let handle = tokio::spawn(async move { subscriber.on_event(event).await });
            (name, handle)
        })
        .collect();

    let mut report = DispatchReport {
        project: Some(routed.project_name.clone()),
        ..DispatchReport::default()
    };

    for (name, handle) in handles {
        match handle.await {
            Ok(Ok(())) => report.delivered += 1,
            Ok(Err(e)) => {
                report.failed += 1;
                warn!(subscriber = %name, error = %e, "subscriber failed");
            }
            Err(join_error) => {
                report.failed += 1;
                error!(subscriber = %name, error = %join_error, "subscriber panicked");
            }
        }
    }

    debug!(
        project = %routed.project_name,
        delivered = report.delivered,
        failed = report.failed,
        "event dispatched"
    );
    report
}

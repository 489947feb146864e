//! Remote pipeline notification types.
//!
//! This module defines the typed representation of the notifications the
//! remote pipeline service delivers to the webhook.
//!
//! # Event Kinds
//!
//! | Kind | Wire value | Target |
//! |------|------------|--------|
//! | `ExecutionStarted` | `execution-started` | whole execution |
//! | `ExecutionEnded` | `execution-ended` | whole execution |
//! | `StepStarted` | `step-started` | one step (action) of an execution |
//! | `StepWaiting` | `step-waiting` | one step (action) of an execution |
//! | `StepEnded` | `step-ended` | one step (action) of an execution |
//! | `Challenge` | form `challenge=` | none (verification handshake) |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{ExecutionRef, ExecutionStatus, StepStatus};

/// The kind of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    ExecutionStarted,
    ExecutionEnded,
    StepStarted,
    StepWaiting,
    StepEnded,
    /// Verification handshake; never carries a target and never reaches the router.
    Challenge,
}

impl EventKind {
    /// Parses a JSON `kind` discriminator. `Challenge` is not a JSON kind.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "execution-started" => Some(EventKind::ExecutionStarted),
            "execution-ended" => Some(EventKind::ExecutionEnded),
            "step-started" => Some(EventKind::StepStarted),
            "step-waiting" => Some(EventKind::StepWaiting),
            "step-ended" => Some(EventKind::StepEnded),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ExecutionStarted => "execution-started",
            EventKind::ExecutionEnded => "execution-ended",
            EventKind::StepStarted => "step-started",
            EventKind::StepWaiting => "step-waiting",
            EventKind::StepEnded => "step-ended",
            EventKind::Challenge => "challenge",
        }
    }

    /// Returns true for step-level kinds.
    pub fn is_step(&self) -> bool {
        matches!(
            self,
            EventKind::StepStarted | EventKind::StepWaiting | EventKind::StepEnded
        )
    }

    /// Returns true for execution-level kinds.
    pub fn is_execution(&self) -> bool {
        matches!(self, EventKind::ExecutionStarted | EventKind::ExecutionEnded)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified notification, as it comes out of the ingress layer.
///
/// The raw payload is kept verbatim so subscribers can decode the shape they
/// need. For challenges the payload is the challenge token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    kind: EventKind,
    organization_scope: Option<String>,
    raw_payload: String,
}

impl Event {
    pub fn new(
        kind: EventKind,
        organization_scope: Option<String>,
        raw_payload: impl Into<String>,
    ) -> Self {
        Event {
            kind,
            organization_scope,
            raw_payload: raw_payload.into(),
        }
    }

    /// Builds a challenge event. Challenges carry no organization scope.
    pub fn challenge(token: impl Into<String>) -> Self {
        Event::new(EventKind::Challenge, None, token)
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// The organization scope, treating a blank value as absent.
    pub fn organization_scope(&self) -> Option<&str> {
        self.organization_scope
            .as_deref()
            .filter(|s| !s.trim().is_empty())
    }

    pub fn raw_payload(&self) -> &str {
        &self.raw_payload
    }

    /// The challenge token, for challenge events only.
    pub fn challenge_token(&self) -> Option<&str> {
        match self.kind {
            EventKind::Challenge => Some(&self.raw_payload),
            _ => None,
        }
    }
}

/// An execution-level notification (started or ended).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub kind: EventKind,
    pub organization_scope: String,
    pub execution: ExecutionRef,
    /// Reported status, when the sender includes it.
    pub status: Option<ExecutionStatus>,
}

/// A step-level notification.
///
/// `action` is the raw remote action name; unknown names are kept so that
/// waiting tasks can decline them without failing the whole event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEvent {
    pub kind: EventKind,
    pub organization_scope: String,
    pub execution: ExecutionRef,
    pub action: String,
    pub status: Option<StepStatus>,
}

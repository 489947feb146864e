//! Remote pipeline vocabulary: execution and step statuses, step actions, and
//! the interest set a step-waiting task declares.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::ExecutionRef;
use crate::webhooks::events::EventKind;

/// Status of a whole remote pipeline execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    NotStarted,
    Running,
    Cancelling,
    Cancelled,
    Finished,
    Error,
    Failed,
}

impl ExecutionStatus {
    /// Returns true once the execution can make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Cancelled
                | ExecutionStatus::Finished
                | ExecutionStatus::Error
                | ExecutionStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::NotStarted => "NOT_STARTED",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Cancelling => "CANCELLING",
            ExecutionStatus::Cancelled => "CANCELLED",
            ExecutionStatus::Finished => "FINISHED",
            ExecutionStatus::Error => "ERROR",
            ExecutionStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    NotStarted,
    Running,
    Waiting,
    Finished,
    Error,
    Failed,
    Cancelled,
    Rejected,
}

/// A remote execution as reported by the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub reference: ExecutionRef,
    pub status: ExecutionStatus,
}

/// The step an execution is currently on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepState {
    /// Raw remote action name (see [`StepAction`]).
    pub action: String,
    pub status: StepStatus,
}

/// Error for remote action names this crate does not know.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown step action: {0}")]
pub struct UnknownAction(pub String);

/// Remote step actions a task can wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepAction {
    Validate,
    Build,
    BuildImage,
    CodeQuality,
    Deploy,
    Approval,
    Schedule,
    Managed,
    SecurityTest,
    LoadTest,
    ContentAudit,
    ExperienceAudit,
    ReportPerformanceTest,
}

impl StepAction {
    /// Returns the wire name of this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepAction::Validate => "validate",
            StepAction::Build => "build",
            StepAction::BuildImage => "buildImage",
            StepAction::CodeQuality => "codeQuality",
            StepAction::Deploy => "deploy",
            StepAction::Approval => "approval",
            StepAction::Schedule => "schedule",
            StepAction::Managed => "managed",
            StepAction::SecurityTest => "securityTest",
            StepAction::LoadTest => "loadTest",
            StepAction::ContentAudit => "contentAudit",
            StepAction::ExperienceAudit => "experienceAudit",
            StepAction::ReportPerformanceTest => "reportPerformanceTest",
        }
    }
}

impl FromStr for StepAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "validate" => StepAction::Validate,
            "build" => StepAction::Build,
            "buildImage" => StepAction::BuildImage,
            "codeQuality" => StepAction::CodeQuality,
            "deploy" => StepAction::Deploy,
            "approval" => StepAction::Approval,
            "schedule" => StepAction::Schedule,
            "managed" => StepAction::Managed,
            "securityTest" => StepAction::SecurityTest,
            "loadTest" => StepAction::LoadTest,
            "contentAudit" => StepAction::ContentAudit,
            "experienceAudit" => StepAction::ExperienceAudit,
            "reportPerformanceTest" => StepAction::ReportPerformanceTest,
            other => return Err(UnknownAction(other.to_string())),
        })
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which step actions a waiting task wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "actions", rename_all = "snake_case")]
pub enum ActionFilter {
    All,
    Only(BTreeSet<StepAction>),
}

impl ActionFilter {
    pub fn only(actions: impl IntoIterator<Item = StepAction>) -> Self {
        ActionFilter::Only(actions.into_iter().collect())
    }

    pub fn contains(&self, action: StepAction) -> bool {
        match self {
            ActionFilter::All => true,
            ActionFilter::Only(set) => set.contains(&action),
        }
    }
}

/// The persisted interest set of a step-waiting task.
///
/// A task matches a step event when the event kind is in `kinds` and the
/// step action passes `actions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInterest {
    pub actions: ActionFilter,
    pub kinds: BTreeSet<EventKind>,
}

impl StepInterest {
    /// Interest in every step action, for waiting and ended events.
    pub fn all() -> Self {
        StepInterest {
            actions: ActionFilter::All,
            kinds: default_step_kinds(),
        }
    }

    /// Interest in the given actions, for waiting and ended events.
    pub fn actions(actions: impl IntoIterator<Item = StepAction>) -> Self {
        StepInterest {
            actions: ActionFilter::only(actions),
            kinds: default_step_kinds(),
        }
    }

    /// Replaces the event kinds this interest listens for.
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }
}

fn default_step_kinds() -> BTreeSet<EventKind> {
    [EventKind::StepWaiting, EventKind::StepEnded]
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_action_wire_names_roundtrip() {
        for action in [
            StepAction::Validate,
            StepAction::Build,
            StepAction::BuildImage,
            StepAction::CodeQuality,
            StepAction::Deploy,
            StepAction::Approval,
            StepAction::Schedule,
            StepAction::Managed,
            StepAction::SecurityTest,
            StepAction::LoadTest,
            StepAction::ContentAudit,
            StepAction::ExperienceAudit,
            StepAction::ReportPerformanceTest,
        ] {
            assert_eq!(action.as_str().parse::<StepAction>(), Ok(action));
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", action.as_str()));
        }
    }

    #[test]
    fn unknown_action_is_an_error_not_a_panic() {
        assert_eq!(
            "teleport".parse::<StepAction>(),
            Err(UnknownAction("teleport".to_string()))
        );
    }

    #[test]
    fn terminal_statuses() {
        assert!(ExecutionStatus::Finished.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Error.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Cancelling.is_terminal());
    }

    #[test]
    fn execution_status_uses_screaming_case() {
        let status: ExecutionStatus = serde_json::from_str("\"NOT_STARTED\"").unwrap();
        assert_eq!(status, ExecutionStatus::NotStarted);
    }

    #[test]
    fn action_filter_all_contains_everything() {
        assert!(ActionFilter::All.contains(StepAction::Deploy));
        let only = ActionFilter::only([StepAction::Build]);
        assert!(only.contains(StepAction::Build));
        assert!(!only.contains(StepAction::Deploy));
    }

    #[test]
    fn step_interest_serde_roundtrip() {
        let interest = StepInterest::actions([StepAction::Approval, StepAction::Deploy])
            .with_kinds([EventKind::StepWaiting]);
        let json = serde_json::to_string(&interest).unwrap();
        let parsed: StepInterest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, interest);
    }
}

//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different ID types (e.g., using a
//! job-run id where a project name is expected) and make the code more
//! self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of one local CI job run (e.g. `folder/job#42`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobRunId(pub String);

impl JobRunId {
    pub fn new(s: impl Into<String>) -> Self {
        JobRunId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobRunId {
    fn from(s: &str) -> Self {
        JobRunId(s.to_string())
    }
}

/// Identifier of a waiting task.
///
/// Generated once when the task is created and persisted with the job run, so
/// it stays stable across process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generates a fresh random task id.
    pub fn generate() -> Self {
        TaskId(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one remote pipeline execution.
///
/// Equality is structural. Once attached to a job run it is never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRef {
    pub program_id: String,
    pub pipeline_id: String,
    pub execution_id: String,
}

impl ExecutionRef {
    pub fn new(
        program_id: impl Into<String>,
        pipeline_id: impl Into<String>,
        execution_id: impl Into<String>,
    ) -> Self {
        ExecutionRef {
            program_id: program_id.into(),
            pipeline_id: pipeline_id.into(),
            execution_id: execution_id.into(),
        }
    }
}

impl fmt::Display for ExecutionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.program_id, self.pipeline_id, self.execution_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod job_run_id {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn serde_roundtrip(s in "[a-z/]{1,20}#[0-9]{1,4}") {
                let id = JobRunId::new(&s);
                let json = serde_json::to_string(&id).unwrap();
                let parsed: JobRunId = serde_json::from_str(&json).unwrap();
                prop_assert_eq!(id, parsed);
            }
        }
    }

    mod task_id {
        use super::*;

        #[test]
        fn generated_ids_are_unique() {
            assert_ne!(TaskId::generate(), TaskId::generate());
        }

        #[test]
        fn serializes_as_bare_uuid() {
            let id = TaskId::generate();
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, format!("\"{}\"", id));
        }
    }

    mod execution_ref {
        use super::*;
        use proptest::prelude::*;

        #[test]
        fn uses_camel_case_on_the_wire() {
            let r = ExecutionRef::new("1", "2", "3");
            let json = serde_json::to_value(&r).unwrap();
            assert_eq!(
                json,
                serde_json::json!({"programId": "1", "pipelineId": "2", "executionId": "3"})
            );
        }

        #[test]
        fn display_format() {
            assert_eq!(ExecutionRef::new("p1", "pl1", "e1").to_string(), "p1/pl1/e1");
        }

        proptest! {
            #[test]
            fn equality_is_structural(
                a in ("[0-9]{1,3}", "[0-9]{1,3}", "[0-9]{1,3}"),
                b in ("[0-9]{1,3}", "[0-9]{1,3}", "[0-9]{1,3}")
            ) {
                let ra = ExecutionRef::new(&a.0, &a.1, &a.2);
                let rb = ExecutionRef::new(&b.0, &b.1, &b.2);
                prop_assert_eq!(ra == rb, a == b);
            }
        }
    }
}

//! Notification classifier and payload parser.
//!
//! This module turns a raw request body into a typed [`Event`]. The parser is
//! designed never to panic on hostile input: every failure is an
//! [`IngressError`].
//!
//! # Parsing Strategy
//!
//! 1. The content type selects the decoder (form-encoded or JSON)
//! 2. Form bodies must carry a `challenge` parameter and become challenge events
//! 3. JSON bodies are first read for their `kind` discriminator only
//! 4. The body is then decoded into the typed shape of that kind, which yields
//!    the organization scope and the execution reference
//!
//! # Payload Shapes
//!
//! ```text
//! {"kind": "execution-ended", "organizationScope": "org",
//!  "execution": {"programId": "1", "pipelineId": "2", "executionId": "3", "status": "FINISHED"}}
//!
//! {"kind": "step-waiting", "organizationScope": "org",
//!  "step": {"programId": "1", "pipelineId": "2", "executionId": "3",
//!           "action": "approval", "status": "WAITING"}}
//! ```

use serde::Deserialize;

use crate::types::{ExecutionRef, ExecutionStatus, StepStatus};

use super::error::{IngressError, Result};
use super::events::{Event, EventKind, ExecutionEvent, StepEvent};

/// Content type for JSON notifications.
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Content type for form-encoded challenges.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
/// Form parameter carrying the challenge token.
pub const CHALLENGE_PARAM: &str = "challenge";

/// Classifies a request body into a typed event.
///
/// # Returns
///
/// * `Ok(event)` - A challenge or one of the five JSON notification kinds
/// * `Err(UnsupportedContentType)` - Neither JSON nor form-encoded
/// * `Err(MalformedPayload)` - Body does not decode, or required fields are missing
/// * `Err(UnknownEventKind)` - JSON `kind` is not a known value
///
/// # Examples
///
/// ```
/// use execution_relay::webhooks::{classify, EventKind};
///
/// let body = br#"{
///     "kind": "step-ended",
///     "organizationScope": "org-1",
///     "step": {"programId": "1", "pipelineId": "2", "executionId": "3", "action": "build"}
/// }"#;
///
/// let event = classify(Some("application/json"), body).unwrap();
/// assert_eq!(event.kind(), EventKind::StepEnded);
/// assert_eq!(event.organization_scope(), Some("org-1"));
/// ```
pub fn classify(content_type: Option<&str>, body: &[u8]) -> Result<Event> {
    let mime = content_type.map(media_type).unwrap_or_default();

    match mime.as_str() {
        FORM_CONTENT_TYPE => parse_challenge(body),
        JSON_CONTENT_TYPE => parse_json(body),
        "" => Err(IngressError::UnsupportedContentType("<none>".to_string())),
        other => Err(IngressError::UnsupportedContentType(other.to_string())),
    }
}

/// Strips parameters (`; charset=...`) and normalizes case.
fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Parses a form-encoded challenge body (or query string).
pub fn parse_challenge(body: &[u8]) -> Result<Event> {
    let token = url::form_urlencoded::parse(body)
        .find(|(key, _)| key == CHALLENGE_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            IngressError::MalformedPayload(format!("missing `{}` parameter", CHALLENGE_PARAM))
        })?;

    Ok(Event::challenge(token))
}

fn parse_json(body: &[u8]) -> Result<Event> {
    let raw_kind: RawKind = serde_json::from_slice(body)?;
    let kind = EventKind::from_wire(&raw_kind.kind)
        .ok_or_else(|| IngressError::UnknownEventKind(raw_kind.kind.clone()))?;

    // Decode the full typed shape so malformed bodies never reach the router.
    let organization_scope = if kind.is_step() {
        parse_step_event(body)?.organization_scope
    } else {
        parse_execution_event(body)?.organization_scope
    };

    let raw = String::from_utf8(body.to_vec())
        .map_err(|e| IngressError::MalformedPayload(e.to_string()))?;

    Ok(Event::new(kind, Some(organization_scope), raw))
}

// ============================================================================
// Raw payload structures for deserialization
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawKind {
    kind: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawExecutionPayload {
    kind: String,
    organization_scope: String,
    execution: RawExecution,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawExecution {
    program_id: String,
    pipeline_id: String,
    execution_id: String,
    status: Option<ExecutionStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStepPayload {
    kind: String,
    organization_scope: String,
    step: RawStep,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStep {
    program_id: String,
    pipeline_id: String,
    execution_id: String,
    action: String,
    status: Option<StepStatus>,
}

/// Decodes an execution-level payload.
///
/// # Errors
///
/// `UnknownEventKind` if the kind is not an execution kind, `MalformedPayload`
/// if required fields are missing.
pub fn parse_execution_event(payload: &[u8]) -> Result<ExecutionEvent> {
    let raw: RawExecutionPayload = serde_json::from_slice(payload)?;

    let kind = EventKind::from_wire(&raw.kind)
        .filter(EventKind::is_execution)
        .ok_or_else(|| IngressError::UnknownEventKind(raw.kind.clone()))?;

    Ok(ExecutionEvent {
        kind,
        organization_scope: raw.organization_scope,
        execution: ExecutionRef::new(
            raw.execution.program_id,
            raw.execution.pipeline_id,
            raw.execution.execution_id,
        ),
        status: raw.execution.status,
    })
}

/// Decodes a step-level payload.
///
/// # Errors
///
/// `UnknownEventKind` if the kind is not a step kind, `MalformedPayload` if
/// required fields are missing.
pub fn parse_step_event(payload: &[u8]) -> Result<StepEvent> {
    let raw: RawStepPayload = serde_json::from_slice(payload)?;

    let kind = EventKind::from_wire(&raw.kind)
        .filter(EventKind::is_step)
        .ok_or_else(|| IngressError::UnknownEventKind(raw.kind.clone()))?;

    Ok(StepEvent {
        kind,
        organization_scope: raw.organization_scope,
        execution: ExecutionRef::new(raw.step.program_id, raw.step.pipeline_id, raw.step.execution_id),
        action: raw.step.action,
        status: raw.step.status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step_body(kind: &str, action: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "kind": kind,
            "organizationScope": "org-1",
            "step": {
                "programId": "1",
                "pipelineId": "2",
                "executionId": "3",
                "action": action,
                "status": "WAITING"
            }
        }))
        .unwrap()
    }

    fn execution_body(kind: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "kind": kind,
            "organizationScope": "org-1",
            "execution": {
                "programId": "1",
                "pipelineId": "2",
                "executionId": "3",
                "status": "CANCELLED"
            }
        }))
        .unwrap()
    }

    // ─── Content negotiation ───

    #[test]
    fn unsupported_content_type() {
        let result = classify(Some("text/xml"), b"<x/>");
        assert!(matches!(result, Err(IngressError::UnsupportedContentType(t)) if t == "text/xml"));
    }

    #[test]
    fn missing_content_type_is_unsupported() {
        assert!(matches!(
            classify(None, b"{}"),
            Err(IngressError::UnsupportedContentType(_))
        ));
    }

    #[test]
    fn content_type_parameters_are_ignored() {
        let event = classify(
            Some("Application/JSON; charset=utf-8"),
            &step_body("step-ended", "build"),
        )
        .unwrap();
        assert_eq!(event.kind(), EventKind::StepEnded);
    }

    // ─── Challenge ───

    #[test]
    fn form_body_with_challenge() {
        let event = classify(Some(FORM_CONTENT_TYPE), b"challenge=abc%20123").unwrap();
        assert_eq!(event.kind(), EventKind::Challenge);
        assert_eq!(event.challenge_token(), Some("abc 123"));
        assert_eq!(event.organization_scope(), None);
    }

    #[test]
    fn form_body_without_challenge_is_malformed() {
        let result = classify(Some(FORM_CONTENT_TYPE), b"other=1");
        assert!(matches!(result, Err(IngressError::MalformedPayload(_))));
    }

    #[test]
    fn empty_challenge_is_malformed() {
        let result = classify(Some(FORM_CONTENT_TYPE), b"challenge=");
        assert!(matches!(result, Err(IngressError::MalformedPayload(_))));
    }

    // ─── JSON ───

    #[test]
    fn step_event_classified() {
        let event = classify(Some(JSON_CONTENT_TYPE), &step_body("step-waiting", "approval")).unwrap();
        assert_eq!(event.kind(), EventKind::StepWaiting);
        assert_eq!(event.organization_scope(), Some("org-1"));
        assert!(event.raw_payload().contains("approval"));
    }

    #[test]
    fn execution_event_classified() {
        let event = classify(Some(JSON_CONTENT_TYPE), &execution_body("execution-ended")).unwrap();
        assert_eq!(event.kind(), EventKind::ExecutionEnded);
    }

    #[test]
    fn unknown_kind() {
        let body = serde_json::to_vec(&json!({"kind": "pipeline-exploded"})).unwrap();
        let result = classify(Some(JSON_CONTENT_TYPE), &body);
        assert!(matches!(result, Err(IngressError::UnknownEventKind(k)) if k == "pipeline-exploded"));
    }

    #[test]
    fn invalid_json_is_malformed() {
        let result = classify(Some(JSON_CONTENT_TYPE), b"{not json");
        assert!(matches!(result, Err(IngressError::MalformedPayload(_))));
    }

    #[test]
    fn missing_kind_is_malformed() {
        let result = classify(Some(JSON_CONTENT_TYPE), b"{\"organizationScope\":\"x\"}");
        assert!(matches!(result, Err(IngressError::MalformedPayload(_))));
    }

    #[test]
    fn missing_nested_fields_is_malformed() {
        let body = serde_json::to_vec(&json!({
            "kind": "step-ended",
            "organizationScope": "org-1",
            "step": {"programId": "1"}
        }))
        .unwrap();
        let result = classify(Some(JSON_CONTENT_TYPE), &body);
        assert!(matches!(result, Err(IngressError::MalformedPayload(_))));
    }

    #[test]
    fn step_kind_with_execution_shape_is_malformed() {
        let mut body: serde_json::Value = serde_json::from_slice(&execution_body("x")).unwrap();
        body["kind"] = json!("step-ended");
        let bytes = serde_json::to_vec(&body).unwrap();
        assert!(matches!(
            classify(Some(JSON_CONTENT_TYPE), &bytes),
            Err(IngressError::MalformedPayload(_))
        ));
    }

    // ─── Typed decoders ───

    #[test]
    fn parse_step_event_extracts_partial_ref_and_action() {
        let event = parse_step_event(&step_body("step-ended", "deploy")).unwrap();
        assert_eq!(event.kind, EventKind::StepEnded);
        assert_eq!(event.execution, ExecutionRef::new("1", "2", "3"));
        assert_eq!(event.action, "deploy");
        assert_eq!(event.status, Some(StepStatus::Waiting));
    }

    #[test]
    fn parse_step_event_keeps_unknown_action() {
        let event = parse_step_event(&step_body("step-ended", "teleport")).unwrap();
        assert_eq!(event.action, "teleport");
    }

    #[test]
    fn parse_execution_event_extracts_status() {
        let event = parse_execution_event(&execution_body("execution-ended")).unwrap();
        assert_eq!(event.kind, EventKind::ExecutionEnded);
        assert_eq!(event.status, Some(ExecutionStatus::Cancelled));
    }

    #[test]
    fn parse_execution_event_rejects_step_kind() {
        let result = parse_execution_event(&execution_body("step-ended"));
        assert!(matches!(result, Err(IngressError::UnknownEventKind(_))));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let body = serde_json::to_vec(&json!({
            "kind": "execution-started",
            "organizationScope": "org-1",
            "extra": [1, 2, 3],
            "execution": {
                "programId": "1",
                "pipelineId": "2",
                "executionId": "3",
                "trigger": "ON_DEMAND"
            }
        }))
        .unwrap();
        let event = parse_execution_event(&body).unwrap();
        assert_eq!(event.status, None);
    }
}

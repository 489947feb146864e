//! Webhook ingestion for remote pipeline notifications.
//!
//! This module provides:
//! - Signature verification for notification payloads (HMAC-SHA256, base64)
//! - Content negotiation and classification into typed events
//! - The ingress error taxonomy

pub mod error;
pub mod events;
pub mod parser;
pub mod signature;

pub use error::IngressError;
pub use events::{Event, EventKind, ExecutionEvent, StepEvent};
pub use parser::{
    FORM_CONTENT_TYPE, JSON_CONTENT_TYPE, classify, parse_challenge, parse_execution_event,
    parse_step_event,
};
pub use signature::{
    compute_signature, format_signature, parse_signature, verify_any, verify_signature,
};

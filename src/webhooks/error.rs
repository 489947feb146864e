//! Ingress-layer errors.
//!
//! Everything that can go wrong before an event reaches the router. The HTTP
//! layer turns each of these into a 400 response.

use thiserror::Error;

/// Error type for webhook verification and classification failures.
#[derive(Debug, Error)]
pub enum IngressError {
    /// Missing or non-matching signature, or no candidate secret at all.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(&'static str),

    /// Body does not decode into the shape its kind requires.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// JSON `kind` discriminator is not one of the known values.
    #[error("unknown event kind: {0}")]
    UnknownEventKind(String),

    /// Content type is neither JSON nor form-encoded.
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
}

impl From<serde_json::Error> for IngressError {
    fn from(e: serde_json::Error) -> Self {
        IngressError::MalformedPayload(e.to_string())
    }
}

/// Result type for ingress operations.
pub type Result<T> = std::result::Result<T, IngressError>;

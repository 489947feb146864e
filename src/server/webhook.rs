//! Webhook endpoint handlers.
//!
//! Verification and classification run inline on the request; everything
//! after that is handed to the event router, so the response never waits on
//! subscribers.

use axum::body::Bytes;
use axum::extract::{RawQuery, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AppState;
use crate::webhooks::{EventKind, IngressError, classify, parse_challenge, verify_any};

/// Header carrying the base64 HMAC-SHA256 of the signed content.
pub const HEADER_SIGNATURE: &str = "x-signature";

/// Errors that can occur when handling a webhook request.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// The webhook is administratively disabled.
    #[error("webhook disabled")]
    Disabled,

    #[error(transparent)]
    Ingress(#[from] IngressError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::Disabled => StatusCode::NOT_FOUND,
            WebhookError::Ingress(_) => StatusCode::BAD_REQUEST,
        };

        (status, self.to_string()).into_response()
    }
}

/// Challenge handler.
///
/// # Request
///
/// - Method: GET
/// - Query: `challenge=<token>`
/// - Header `X-Signature`: base64 HMAC-SHA256 of the token under any
///   configured project secret
///
/// # Response
///
/// - 200 OK, `text/plain`, body = token
/// - 400 Bad Request: missing token or signature mismatch
/// - 404 Not Found: webhook disabled
///
/// # Example
///
/// ```ignore
/// GET /cloudmanager-webhook/?challenge=abc123 HTTP/1.1
/// X-Signature: 5p0Vz...=
///
/// HTTP/1.1 200 OK
/// Content-Type: text/plain
///
/// abc123
/// ```
pub async fn challenge_handler(
    State(app_state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, WebhookError> {
    if !app_state.webhook().enabled {
        return Err(WebhookError::Disabled);
    }

    let event = parse_challenge(query.unwrap_or_default().as_bytes())?;
    let token = event.raw_payload();

    let candidates = app_state.projects().candidate_secrets(None);
    if let Err(e) = verify_any(token.as_bytes(), signature(&headers), candidates) {
        warn!(error = %e, "challenge rejected");
        return Err(e.into());
    }

    info!("challenge answered");
    Ok(plain_text(token.to_string()))
}

/// Notification handler.
///
/// # Request
///
/// - Method: POST
/// - Header `X-Signature`: base64 HMAC-SHA256 of the body
/// - Body: JSON notification `{kind, organizationScope, ...}`, or a
///   form-encoded `challenge=<token>`
///
/// # Response
///
/// - 200 OK once verified and classified, whether or not any task matched
/// - 200 OK, `text/plain` token for a form-encoded challenge
/// - 400 Bad Request: verification or parse failure
/// - 404 Not Found: webhook disabled
pub async fn notification_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, WebhookError> {
    if !app_state.webhook().enabled {
        return Err(WebhookError::Disabled);
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    let event = match classify(content_type, &body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "notification rejected");
            return Err(e.into());
        }
    };

    // Challenges reveal no scope yet, so every secret is a candidate.
    let scope = match event.kind() {
        EventKind::Challenge => None,
        _ => event.organization_scope(),
    };
    let candidates = app_state.projects().candidate_secrets(scope);
    if let Err(e) = verify_any(&body, signature(&headers), candidates) {
        warn!(kind = %event.kind(), scope = ?scope, error = %e, "notification rejected");
        return Err(e.into());
    }

    if let Some(token) = event.challenge_token() {
        info!("challenge answered");
        return Ok(plain_text(token.to_string()));
    }

    debug!(kind = %event.kind(), scope = ?scope, "notification accepted");
    app_state.router().route(event);

    Ok((StatusCode::OK, "OK").into_response())
}

fn signature(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(HEADER_SIGNATURE)
        .and_then(|v| v.to_str().ok())
}

fn plain_text(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_mapping() {
        assert_eq!(
            WebhookError::Disabled.into_response().status(),
            StatusCode::NOT_FOUND
        );
        for error in [
            IngressError::AuthenticationFailed("signature mismatch"),
            IngressError::MalformedPayload("x".to_string()),
            IngressError::UnknownEventKind("x".to_string()),
            IngressError::UnsupportedContentType("x".to_string()),
        ] {
            assert_eq!(
                WebhookError::from(error).into_response().status(),
                StatusCode::BAD_REQUEST
            );
        }
    }

    #[test]
    fn signature_header_lookup_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Signature", "abc=".parse().unwrap());
        assert_eq!(signature(&headers), Some("abc="));
        assert_eq!(signature(&HeaderMap::new()), None);
    }
}

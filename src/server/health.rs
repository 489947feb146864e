//! Health check endpoint for liveness checks.

use axum::http::StatusCode;

/// Returns 200 OK with the text "OK" while the server accepts connections.
///
/// Answers even when the webhook itself is disabled.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

//! HTTP server for the execution relay.
//!
//! This module implements the HTTP server that:
//! - Answers signed verification challenges from the remote service
//! - Accepts signed notifications, classifies them and hands them to the router
//! - Provides a health check for liveness monitoring
//!
//! # Endpoints
//!
//! - `GET /<path>/?challenge=<token>` - Echoes the token if the signature verifies
//! - `POST /<path>/` - Accepts a notification (returns 200 once verified)
//! - `GET /health` - Returns 200 if server is running
//!
//! `<path>` comes from [`WebhookConfig`]; both `/<path>` and `/<path>/` are
//! served.

use std::sync::Arc;

pub mod health;
pub mod webhook;

pub use health::health_handler;
pub use webhook::{challenge_handler, notification_handler};

use crate::config::{Projects, WebhookConfig};
use crate::router::EventRouter;

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Routes verified notifications; also owns the project list.
    router: EventRouter,

    webhook: WebhookConfig,
}

impl AppState {
    pub fn new(router: EventRouter, webhook: WebhookConfig) -> Self {
        AppState {
            inner: Arc::new(AppStateInner { router, webhook }),
        }
    }

    pub fn router(&self) -> &EventRouter {
        &self.inner.router
    }

    /// Configured projects, used to select candidate secrets.
    pub fn projects(&self) -> &Projects {
        self.inner.router.projects()
    }

    pub fn webhook(&self) -> &WebhookConfig {
        &self.inner.webhook
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::get;

    let path = format!("/{}", app_state.webhook().path);
    let endpoint = || get(challenge_handler).post(notification_handler);

    axum::Router::new()
        .route(&path, endpoint())
        .route(&format!("{}/", path), endpoint())
        .route("/health", get(health_handler))
        .with_state(app_state)
}

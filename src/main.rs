use std::sync::Arc;

use anyhow::Context;
use execution_relay::config::{EnvSecretStore, Projects, RelayConfig};
use execution_relay::correlation::{CorrelationEngine, CorrelationIndex};
use execution_relay::host::LocalHost;
use execution_relay::persistence::FileJobRunStore;
use execution_relay::router::EventRouter;
use execution_relay::server::{AppState, build_router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "execution_relay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RelayConfig::from_env().context("loading configuration")?;
    if config.projects.is_empty() {
        tracing::warn!("no projects configured; every notification will be rejected");
    }

    let store = Arc::new(FileJobRunStore::new(config.state_dir.clone()));
    let host = Arc::new(LocalHost::new());
    let index = Arc::new(CorrelationIndex::new(
        store,
        host,
        config.rehydrate_timeout,
    ));

    let projects = Projects::new(config.projects.clone(), Arc::new(EnvSecretStore));
    let router = EventRouter::new(projects);
    router.subscribe(Arc::new(CorrelationEngine::new(index)));

    let app = build_router(AppState::new(router, config.webhook.clone()));

    tracing::info!(
        addr = %config.bind_addr,
        path = %config.webhook.path,
        state_dir = %config.state_dir.display(),
        "listening"
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}

//! Process configuration.
//!
//! Everything is read from environment variables, with an optional JSON file
//! listing the remote projects:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `RELAY_BIND_ADDR` | `0.0.0.0:3000` | HTTP listen address |
//! | `RELAY_STATE_DIR` | `./relay-state` | Root of the job-run store |
//! | `RELAY_WEBHOOK_PATH` | `cloudmanager-webhook` | Path segment of the webhook |
//! | `RELAY_WEBHOOK_ENABLED` | `true` | `false` answers 404 on the webhook |
//! | `RELAY_PROJECTS_FILE` | none | JSON list of `{name, organization_id}` |
//! | `RELAY_REHYDRATE_TIMEOUT_SECS` | `60` | Bound on the rehydration search |
//! | `RELAY_POLL_PERIOD_SECS` | `300` | Poller period (clamped) |
//! | `RELAY_POLL_QUIET` | `false` | Suppress per-tick poll logging |
//!
//! Shared secrets are never part of the config file. They are resolved per
//! project through a [`SecretStore`]; [`EnvSecretStore`] reads
//! `RELAY_SECRET_<PROJECT>`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::poller::PollConfig;
use crate::poller::config::parse_flag;

/// Default HTTP listen address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

/// Default webhook path segment.
pub const DEFAULT_WEBHOOK_PATH: &str = "cloudmanager-webhook";

/// Default bound on the rehydration search.
pub const DEFAULT_REHYDRATE_TIMEOUT: Duration = Duration::from_secs(60);

/// Prefix of the per-project secret variables read by [`EnvSecretStore`].
pub const SECRET_ENV_PREFIX: &str = "RELAY_SECRET_";

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid bind address {value:?}: {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },

    #[error("invalid webhook path {0:?}")]
    InvalidWebhookPath(String),

    #[error("cannot read projects file {path}: {source}")]
    ProjectsFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid projects file {path}: {source}")]
    ProjectsJson {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// One configured remote account ("project").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Local name; also the key used to resolve the shared secret.
    pub name: String,
    /// Organization scope the remote service stamps on notifications.
    pub organization_id: String,
}

impl ProjectConfig {
    pub fn new(name: impl Into<String>, organization_id: impl Into<String>) -> Self {
        ProjectConfig {
            name: name.into(),
            organization_id: organization_id.into(),
        }
    }
}

/// Webhook endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    /// When false the endpoint answers 404.
    pub enabled: bool,
    /// Path segment, without slashes.
    pub path: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        WebhookConfig {
            enabled: true,
            path: DEFAULT_WEBHOOK_PATH.to_string(),
        }
    }
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: SocketAddr,
    pub state_dir: PathBuf,
    pub webhook: WebhookConfig,
    pub projects: Vec<ProjectConfig>,
    pub rehydrate_timeout: Duration,
    pub poll: PollConfig,
}

impl RelayConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`RelayConfig::from_env`], reading values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind = lookup("RELAY_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind
            .trim()
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddr {
                value: bind.clone(),
                source,
            })?;

        let state_dir = lookup("RELAY_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./relay-state"));

        let path = match lookup("RELAY_WEBHOOK_PATH") {
            Some(raw) => normalize_webhook_path(&raw)?,
            None => DEFAULT_WEBHOOK_PATH.to_string(),
        };
        let enabled = lookup("RELAY_WEBHOOK_ENABLED")
            .map(|s| parse_flag(&s))
            .unwrap_or(true);

        let projects = match lookup("RELAY_PROJECTS_FILE") {
            Some(file) => load_projects(PathBuf::from(file))?,
            None => Vec::new(),
        };

        let rehydrate_timeout = lookup("RELAY_REHYDRATE_TIMEOUT_SECS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REHYDRATE_TIMEOUT);

        Ok(RelayConfig {
            bind_addr,
            state_dir,
            webhook: WebhookConfig { enabled, path },
            projects,
            rehydrate_timeout,
            poll: PollConfig::from_lookup(&lookup),
        })
    }
}

/// Strips surrounding slashes; rejects empty paths and nested segments.
fn normalize_webhook_path(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() || trimmed.contains('/') || trimmed.contains("..") {
        return Err(ConfigError::InvalidWebhookPath(raw.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Reads the JSON projects file.
pub fn load_projects(path: PathBuf) -> Result<Vec<ProjectConfig>, ConfigError> {
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(source) => return Err(ConfigError::ProjectsFile { path, source }),
    };
    serde_json::from_slice(&bytes).map_err(|source| ConfigError::ProjectsJson { path, source })
}

// ============================================================================
// Secrets
// ============================================================================

/// Resolves a project name to its shared signing secret.
pub trait SecretStore: Send + Sync {
    /// Returns the secret, or `None` if the project has none configured.
    fn secret(&self, project: &str) -> Option<Vec<u8>>;
}

/// In-memory secrets, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretStore {
    secrets: HashMap<String, Vec<u8>>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, project: impl Into<String>, secret: impl AsRef<[u8]>) -> Self {
        self.secrets
            .insert(project.into(), secret.as_ref().to_vec());
        self
    }
}

impl SecretStore for StaticSecretStore {
    fn secret(&self, project: &str) -> Option<Vec<u8>> {
        self.secrets.get(project).cloned()
    }
}

/// Reads secrets from `RELAY_SECRET_<PROJECT>` environment variables.
///
/// The project name is upper-cased and every character outside `[A-Z0-9]`
/// becomes `_`, so project `my-project` reads `RELAY_SECRET_MY_PROJECT`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretStore;

impl EnvSecretStore {
    pub fn variable_name(project: &str) -> String {
        let suffix: String = project
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{}", SECRET_ENV_PREFIX, suffix)
    }
}

impl SecretStore for EnvSecretStore {
    fn secret(&self, project: &str) -> Option<Vec<u8>> {
        std::env::var(Self::variable_name(project))
            .ok()
            .filter(|s| !s.is_empty())
            .map(String::into_bytes)
    }
}

// ============================================================================
// Project resolution
// ============================================================================

/// The configured projects together with their secret source.
#[derive(Clone)]
pub struct Projects {
    projects: Arc<Vec<ProjectConfig>>,
    secrets: Arc<dyn SecretStore>,
}

impl std::fmt::Debug for Projects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Projects")
            .field("projects", &self.projects)
            .finish_non_exhaustive()
    }
}

impl Projects {
    pub fn new(projects: Vec<ProjectConfig>, secrets: Arc<dyn SecretStore>) -> Self {
        Projects {
            projects: Arc::new(projects),
            secrets,
        }
    }

    pub fn all(&self) -> &[ProjectConfig] {
        &self.projects
    }

    /// Finds the project whose organization id equals `organization_id`.
    pub fn by_organization(&self, organization_id: &str) -> Option<&ProjectConfig> {
        self.projects
            .iter()
            .find(|p| p.organization_id == organization_id)
    }

    /// Secrets eligible to verify a notification with the given scope.
    ///
    /// A blank or absent scope broadens the set to every configured secret.
    /// A scope that matches no project yields an empty set, which verification
    /// treats as a failure.
    pub fn candidate_secrets(&self, scope: Option<&str>) -> Vec<Vec<u8>> {
        match scope.map(str::trim).filter(|s| !s.is_empty()) {
            Some(scope) => self
                .projects
                .iter()
                .filter(|p| p.organization_id == scope)
                .filter_map(|p| self.secrets.secret(&p.name))
                .collect(),
            None => self
                .projects
                .iter()
                .filter_map(|p| self.secrets.secret(&p.name))
                .collect(),
        }
    }
}

//! ScriptAbility MCP tool server.
//!
//! Pharmacy tools over MCP, plus asynchronous podcast generation: a tool call
//! creates a job, a background runner calls the generation backend and
//! stores the WAV, and callers poll or wait on the job and fetch the audio
//! through `GET /files/medcast/{jobId}`.

pub mod jobs;
pub mod medcast;
pub mod storage;
pub mod telemetry;
pub mod tools;
pub mod upstream;
pub mod web;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderName;
use axum::Router;
use scriptconf::{EndpointsConfig, ScriptConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use jobs::{JobRegistry, WaitCoordinator};
use medcast::{JobRunner, MedcastClient};
use storage::{ArtifactStore, GcsObjectStore};
use tools::ScriptHandler;

pub const SERVER_NAME: &str = "scriptability-mcp";

/// JSON bodies on `/mcp` are capped at 4 MiB.
pub const MCP_BODY_LIMIT: usize = 4 * 1024 * 1024;

/// How long a tool call may block on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Applied when the caller gives no `waitMs`.
    pub auto_wait: Duration,
    /// Upper bound on any single wait.
    pub max_wait: Duration,
}

impl WaitPolicy {
    pub fn effective(&self, requested_ms: Option<u64>) -> Duration {
        requested_ms
            .map(Duration::from_millis)
            .unwrap_or(self.auto_wait)
            .min(self.max_wait)
    }
}

/// Everything a request handler can reach.
pub struct AppState {
    pub registry: Arc<JobRegistry>,
    pub waits: WaitCoordinator,
    pub store: Arc<ArtifactStore>,
    pub runner: JobRunner,
    pub http: reqwest::Client,
    pub endpoints: EndpointsConfig,
    pub waiting: WaitPolicy,
    /// Serve downloads as `attachment` instead of `inline`.
    pub force_attachment: bool,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: &ScriptConfig, store: ArtifactStore, http: reqwest::Client) -> Arc<Self> {
        let registry = Arc::new(JobRegistry::new());
        let waits = WaitCoordinator::new(registry.clone());
        let store = Arc::new(store);
        let client = MedcastClient::new(
            http.clone(),
            &config.endpoints.medcast_base,
            Duration::from_secs(config.medcast.timeout_secs),
        );
        let runner = JobRunner::new(registry.clone(), waits.clone(), store.clone(), client);

        Arc::new(Self {
            registry,
            waits,
            store,
            runner,
            http,
            endpoints: config.endpoints.clone(),
            waiting: WaitPolicy {
                auto_wait: Duration::from_millis(config.medcast.auto_wait_ms),
                max_wait: Duration::from_millis(config.medcast.max_wait_ms),
            },
            force_attachment: config.storage.force_attachment,
            started_at: Instant::now(),
        })
    }
}

/// Pick the artifact backend: a bucket when one is configured, else the
/// local output directory.
pub fn build_store(config: &ScriptConfig, http: &reqwest::Client) -> Result<ArtifactStore> {
    let storage = &config.storage;
    let public_base_url = config.server.public_base_url.clone();

    let Some(bucket) = storage.bucket.as_deref() else {
        tracing::info!(output_dir = %config.medcast.output_dir.display(), "Storing podcasts on local disk");
        return Ok(ArtifactStore::local(&config.medcast.output_dir).with_public_base_url(public_base_url));
    };

    let objects = match &storage.credentials_file {
        Some(path) => GcsObjectStore::from_key_file(http.clone(), bucket, path)
            .with_context(|| format!("Failed to load storage credentials from {}", path.display()))?,
        None => {
            tracing::info!("No credentials file set, using the metadata server for storage auth");
            GcsObjectStore::from_metadata_server(http.clone(), bucket)
        }
    };
    tracing::info!(
        storage.bucket = bucket,
        storage.prefix = %storage.object_prefix,
        storage.public_read = storage.public_read,
        "Storing podcasts in object storage"
    );

    Ok(ArtifactStore::remote(Arc::new(objects), storage.object_prefix.clone())
        .with_public_base_url(public_base_url)
        .with_signed_url_ttl(Duration::from_secs(storage.signed_url_expires_secs))
        .with_public_read(storage.public_read))
}

/// The full HTTP surface: MCP at `/mcp`, downloads and health at the root.
pub fn app_router(state: Arc<AppState>) -> Router {
    let mcp_server = Arc::new(mcpkit::McpServer::new(ScriptHandler::new(state.clone())));
    let mcp = mcpkit::transport::router(mcp_server).layer(DefaultBodyLimit::max(MCP_BODY_LIMIT));

    Router::new()
        .nest("/mcp", mcp)
        .merge(web::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers([HeaderName::from_static("mcp-session-id")]),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_policy() {
        let policy = WaitPolicy {
            auto_wait: Duration::from_millis(500),
            max_wait: Duration::from_secs(10),
        };
        assert_eq!(policy.effective(None), Duration::from_millis(500));
        assert_eq!(policy.effective(Some(0)), Duration::ZERO);
        assert_eq!(policy.effective(Some(60_000)), Duration::from_secs(10));
    }

    #[test]
    fn test_local_store_by_default() {
        let config = ScriptConfig::default();
        let store = build_store(&config, &reqwest::Client::new()).unwrap();
        assert!(!store.is_remote());
    }

    #[test]
    fn test_bucket_selects_remote_store() {
        let mut config = ScriptConfig::default();
        config.storage.bucket = Some("podcasts".to_string());
        let store = build_store(&config, &reqwest::Client::new()).unwrap();
        assert!(store.is_remote());
    }

    #[test]
    fn test_bad_credentials_file_is_an_error() {
        let mut config = ScriptConfig::default();
        config.storage.bucket = Some("podcasts".to_string());
        config.storage.credentials_file = Some("/nonexistent/key.json".into());
        let err = build_store(&config, &reqwest::Client::new()).err().unwrap();
        assert!(err.to_string().contains("/nonexistent/key.json"));
    }
}

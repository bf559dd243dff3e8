//! Shared setup for integration tests: a full app wired to mock upstreams.

#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use scriptability_mcp::storage::{ArtifactStore, MemoryObjectStore};
use scriptability_mcp::{app_router, AppState};
use scriptconf::ScriptConfig;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::MockServer;

pub struct TestApp {
    pub state: Arc<AppState>,
    pub router: Router,
    pub upstream: MockServer,
    pub output: TempDir,
}

/// Config pointing every backend at `upstream`.
pub fn config_for(upstream: &MockServer) -> ScriptConfig {
    let mut config = ScriptConfig::default();
    config.endpoints.sig = format!("{}/sig", upstream.uri());
    config.endpoints.ndc = format!("{}/ndc_descriptor.php", upstream.uri());
    config.endpoints.medcast_base = upstream.uri();
    config.endpoints.pill = format!("{}/analyze", upstream.uri());
    config.medcast.timeout_secs = 10;
    config
}

impl TestApp {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(customize: impl FnOnce(&mut ScriptConfig)) -> Self {
        Self::build(customize, |config| {
            ArtifactStore::local(&config.medcast.output_dir)
                .with_public_base_url(config.server.public_base_url.clone())
        })
        .await
    }

    /// Artifacts go to an in-memory bucket under the `medcast` prefix.
    pub async fn start_remote(objects: Arc<MemoryObjectStore>) -> Self {
        Self::build(|_| {}, move |config| {
            ArtifactStore::remote(objects, config.storage.object_prefix.clone())
                .with_public_base_url(config.server.public_base_url.clone())
        })
        .await
    }

    async fn build(
        customize: impl FnOnce(&mut ScriptConfig),
        make_store: impl FnOnce(&ScriptConfig) -> ArtifactStore,
    ) -> Self {
        let upstream = MockServer::start().await;
        let output = tempfile::tempdir().unwrap();

        let mut config = config_for(&upstream);
        config.medcast.output_dir = output.path().to_path_buf();
        customize(&mut config);

        let store = make_store(&config);
        let state = AppState::new(&config, store, reqwest::Client::new());
        let router = app_router(state.clone());

        Self {
            state,
            router,
            upstream,
            output,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, bytes::Bytes) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, body)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, axum::http::HeaderMap, bytes::Bytes) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    /// One JSON-RPC request to `/mcp`; returns the reply envelope.
    pub async fn rpc(&self, method: &str, params: Value) -> Value {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        let request = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, _, bytes) = self.send(request).await;
        assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&bytes));
        serde_json::from_slice(&bytes).unwrap()
    }

    /// `tools/call`; returns the `CallToolResult` object.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Value {
        let reply = self
            .rpc("tools/call", json!({ "name": name, "arguments": arguments }))
            .await;
        assert!(reply.get("error").is_none(), "unexpected rpc error: {}", reply);
        reply["result"].clone()
    }
}

pub fn first_text(result: &Value) -> &str {
    result["content"][0]["text"].as_str().unwrap_or_default()
}

pub fn is_error(result: &Value) -> bool {
    result["isError"].as_bool().unwrap_or(false)
}

/// A WAV header and a few samples, as the generation backend would return.
pub fn wav_bytes() -> Vec<u8> {
    let mut bytes = b"RIFF\x2c\x00\x00\x00WAVEfmt ".to_vec();
    bytes.extend_from_slice(&[0x10, 0, 0, 0, 1, 0, 1, 0]);
    bytes.extend_from_slice(&[0u8; 16]);
    bytes
}

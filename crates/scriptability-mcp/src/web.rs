//! Plain HTTP endpoints: podcast downloads and health.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use crate::jobs::{JobId, JobStatus};
use crate::storage::{Locator, StorageError};
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/files/medcast/{job_id}", get(download_podcast))
        .route("/health", get(health))
        .with_state(state)
}

fn is_valid_job_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// Where to read a job's audio from, or the response to send instead.
async fn locate(state: &AppState, job_id: &JobId) -> Result<Locator, Response> {
    if let Some(job) = state.registry.get(job_id) {
        if job.status != JobStatus::Succeeded {
            return Err(error(StatusCode::CONFLICT, "Job not completed"));
        }
        return job
            .path
            .as_deref()
            .map(Locator::parse)
            .ok_or_else(|| error(StatusCode::NOT_FOUND, "Artifact not found"));
    }

    // Unknown to this process; a bucket may still hold it from a previous run.
    match state.store.find_by_job(job_id).await {
        Ok(Some(locator)) => {
            tracing::info!(job.id = %job_id, artifact = %locator, "Serving artifact found by prefix listing");
            Ok(locator)
        }
        Ok(None) => Err(error(StatusCode::NOT_FOUND, "Not found")),
        Err(e) => {
            tracing::error!(job.id = %job_id, error = %e, "Artifact lookup failed");
            Err(error(StatusCode::BAD_GATEWAY, "Artifact lookup failed"))
        }
    }
}

#[tracing::instrument(
    name = "http.download_podcast",
    skip(state),
    fields(artifact.bytes = tracing::field::Empty, http.status = tracing::field::Empty)
)]
async fn download_podcast(State(state): State<Arc<AppState>>, Path(job_id): Path<String>) -> Response {
    let response = serve(&state, job_id).await;
    tracing::Span::current().record("http.status", response.status().as_u16());
    response
}

async fn serve(state: &AppState, job_id: String) -> Response {
    if !is_valid_job_id(&job_id) {
        return error(StatusCode::BAD_REQUEST, "Invalid job id");
    }
    let job_id = JobId::from(job_id);

    let locator = match locate(state, &job_id).await {
        Ok(locator) => locator,
        Err(response) => return response,
    };

    // Failures before the first byte still get a status code. Once the body
    // is streaming, a read error ends the connection.
    let artifact = match state.store.open(&locator).await {
        Ok(artifact) => artifact,
        Err(StorageError::NotFound(what)) => {
            tracing::warn!(job.id = %job_id, artifact = %what, "Artifact missing from storage");
            return error(StatusCode::NOT_FOUND, "Artifact not found");
        }
        Err(e) => {
            tracing::error!(job.id = %job_id, error = %e, "Failed to open artifact");
            return error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to open artifact");
        }
    };

    let disposition = if state.force_attachment { "attachment" } else { "inline" };
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "audio/wav")
        .header(
            header::CONTENT_DISPOSITION,
            format!("{}; filename=\"{}\"", disposition, artifact.file_name.replace('"', "")),
        );
    if let Some(len) = artifact.len {
        tracing::Span::current().record("artifact.bytes", len);
        builder = builder.header(header::CONTENT_LENGTH, len);
    }

    builder
        .body(Body::from_stream(artifact.stream))
        .map_err(|e| {
            tracing::error!("Failed to build response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
        .unwrap_or_else(|status| status.into_response())
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let jobs = state.registry.stats();
    Json(serde_json::json!({
        "status": "healthy",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "storage": if state.store.is_remote() { "remote" } else { "local" },
        "jobs": jobs,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobKind, JobPatch};
    use crate::storage::{ArtifactStore, MemoryObjectStore};
    use axum::body::to_bytes;
    use axum::http::Request;
    use bytes::Bytes;
    use scriptconf::ScriptConfig;
    use tower::ServiceExt;

    fn state_with(store: ArtifactStore, force_attachment: bool) -> Arc<AppState> {
        let mut config = ScriptConfig::default();
        config.storage.force_attachment = force_attachment;
        AppState::new(&config, store, reqwest::Client::new())
    }

    async fn get(state: Arc<AppState>, uri: &str) -> Response {
        router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    /// Push a job through to `succeeded` with `bytes` stored.
    async fn finished_job(state: &AppState, bytes: &'static [u8]) -> JobId {
        let job = state.registry.create(JobKind::PodcastGeneration);
        state.registry.update(&job.id, JobPatch::running());
        let stored = state
            .store
            .save(&job.id, Bytes::from_static(bytes), None)
            .await
            .unwrap();
        state.registry.update(&job.id, JobPatch::succeeded(&stored));
        job.id
    }

    #[test]
    fn test_job_id_charset() {
        assert!(is_valid_job_id("0b7e6a1c-4f7e-4a38-9d5e-1f2a3b4c5d6e"));
        assert!(is_valid_job_id("job_1"));
        assert!(!is_valid_job_id(""));
        assert!(!is_valid_job_id("..%2Fetc"));
        assert!(!is_valid_job_id("a.b"));
    }

    #[tokio::test]
    async fn test_download_local() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(ArtifactStore::local(dir.path()), false);
        let job_id = finished_job(&state, b"RIFF\x24\x00\x00\x00WAVE").await;

        let response = get(state, &format!("/files/medcast/{}", job_id)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/wav");
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.starts_with("inline; filename=\"output-"));
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "12");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"RIFF\x24\x00\x00\x00WAVE");
    }

    #[tokio::test]
    async fn test_force_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(ArtifactStore::local(dir.path()), true);
        let job_id = finished_job(&state, b"RIFF").await;

        let response = get(state, &format!("/files/medcast/{}", job_id)).await;
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.starts_with("attachment; filename="));
    }

    #[tokio::test]
    async fn test_incomplete_job_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(ArtifactStore::local(dir.path()), false);
        let job = state.registry.create(JobKind::PodcastGeneration);

        let response = get(state.clone(), &format!("/files/medcast/{}", job.id)).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        state.registry.update(&job.id, JobPatch::running());
        let response = get(state.clone(), &format!("/files/medcast/{}", job.id)).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        state.registry.update(&job.id, JobPatch::failed("boom"));
        let response = get(state, &format!("/files/medcast/{}", job.id)).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_unknown_job_local_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(ArtifactStore::local(dir.path()), false);
        let response = get(state, "/files/medcast/never-seen").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(ArtifactStore::local(dir.path()), false);
        let response = get(state, "/files/medcast/bad.id").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_deleted_local_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(ArtifactStore::local(dir.path()), false);
        let job_id = finished_job(&state, b"RIFF").await;
        let path = state.registry.get(&job_id).unwrap().path.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();

        let response = get(state, &format!("/files/medcast/{}", job_id)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_remote_fallback_after_restart() {
        let objects = Arc::new(MemoryObjectStore::new("podcasts"));

        // A previous process stored the artifact, then went away.
        let before = state_with(ArtifactStore::remote(objects.clone(), "medcast"), false);
        let job_id = finished_job(&before, b"RIFFremote").await;
        drop(before);

        let after = state_with(ArtifactStore::remote(objects, "medcast"), false);
        assert!(after.registry.get(&job_id).is_none());

        let response = get(after.clone(), &format!("/files/medcast/{}", job_id)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"RIFFremote");

        let response = get(after, "/files/medcast/other-job").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(ArtifactStore::local(dir.path()), false);
        state.registry.create(JobKind::PodcastGeneration);

        let response = get(state, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["storage"], "local");
        assert_eq!(json["jobs"]["total"], 1);
        assert_eq!(json["jobs"]["pending"], 1);
    }
}

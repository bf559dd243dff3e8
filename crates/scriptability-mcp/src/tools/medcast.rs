//! `medcast_generate_podcast` and `medcast_job_status`.

use mcpkit::{CallToolResult, Content};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use super::{required, ToolError, ToolResult};
use crate::jobs::{Job, JobId, JobKind, JobStatus};
use crate::medcast::MedcastSources;
use crate::storage::Locator;
use crate::upstream::pretty;
use crate::AppState;

pub const GENERATE: &str = "medcast_generate_podcast";
pub const STATUS: &str = "medcast_job_status";

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeneratePodcastArgs {
    /// Local file paths (.txt, .md, .pdf, .docx). Max 10, each <=5MB, total <=10MB
    #[serde(default)]
    pub files: Vec<String>,

    /// Free text source
    pub text: Option<String>,

    /// NDC number (optional)
    pub ndc: Option<String>,

    /// Directory to save output WAV when storing locally. Defaults to ./mcp_outputs/medcast
    pub output_dir: Option<String>,

    /// Milliseconds to wait for the job before returning. 0 returns the job id immediately
    pub wait_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusArgs {
    /// Job id returned by medcast_generate_podcast
    pub job_id: Option<String>,

    /// Milliseconds to wait for a running job to finish
    pub wait_ms: Option<u64>,
}

/// Full job descriptor, with a link part when there is something to fetch.
fn describe(job: &Job) -> CallToolResult {
    let value = serde_json::to_value(job).unwrap_or_else(|_| json!({ "id": job.id }));
    let mut content = vec![Content::text(pretty(&value))];
    if let (Some(url), Some(path)) = (&job.url, &job.path) {
        content.push(Content::resource_link(
            url.clone(),
            Locator::parse(path).file_name(),
            "audio/wav",
        ));
    }
    CallToolResult::success(content).with_structured(value)
}

/// Re-sign the object URLs of a succeeded job. Signed URLs expire, so the
/// ones recorded at upload time go stale; gateway routes and public URLs
/// do not, and jobs without a signed URL are returned as they are.
async fn refresh_links(state: &AppState, mut job: Job) -> Job {
    if job.status != JobStatus::Succeeded || job.signed_url.is_none() {
        return job;
    }
    let Some(locator) = job.path.as_deref().map(Locator::parse) else {
        return job;
    };

    job.url = state.store.resolve_download(&job.id, &locator).await.or(job.url);
    job.signed_url = if job.download_url.is_some() {
        state.store.sign(&locator).await.or(job.signed_url)
    } else {
        job.url.clone()
    };
    job
}

#[tracing::instrument(
    name = "mcp.tool.medcast_generate_podcast",
    skip(state, args),
    fields(job.id = tracing::field::Empty, medcast.files = args.files.len(), wait.ms = tracing::field::Empty)
)]
pub async fn generate(state: &AppState, args: GeneratePodcastArgs) -> ToolResult {
    let sources = MedcastSources::new(args.files, args.text, args.ndc, args.output_dir);
    sources
        .check_request()
        .map_err(|e| ToolError::invalid(e.to_string()))?;

    let job = state.registry.create(JobKind::PodcastGeneration);
    let wait = state.waiting.effective(args.wait_ms);
    let span = tracing::Span::current();
    span.record("job.id", job.id.as_str());
    span.record("wait.ms", wait.as_millis() as u64);

    state.runner.spawn(job.id.clone(), sources);

    if wait.is_zero() {
        let value = json!({ "jobId": job.id, "status": job.status });
        return Ok(CallToolResult::text(pretty(&value)).with_structured(value));
    }

    let current = state.waits.wait_for(&job.id, wait).await.unwrap_or(job);
    Ok(describe(&current))
}

#[tracing::instrument(
    name = "mcp.tool.medcast_job_status",
    skip(state, args),
    fields(job.id = tracing::field::Empty, job.status = tracing::field::Empty)
)]
pub async fn status(state: &AppState, args: JobStatusArgs) -> ToolResult {
    let job_id = JobId::from(required(args.job_id, "jobId")?);
    tracing::Span::current().record("job.id", job_id.as_str());

    let job = state
        .registry
        .get(&job_id)
        .ok_or_else(|| ToolError::invalid(format!("Unknown job: {}", job_id)))?;

    let wait = match args.wait_ms {
        Some(ms) if ms > 0 && !job.status.is_terminal() => state.waiting.effective(Some(ms)),
        _ => std::time::Duration::ZERO,
    };
    let job = if wait.is_zero() {
        job
    } else {
        state.waits.wait_for(&job_id, wait).await.unwrap_or(job)
    };

    let job = refresh_links(state, job).await;

    tracing::Span::current().record("job.status", job.status.as_str());
    Ok(describe(&job))
}

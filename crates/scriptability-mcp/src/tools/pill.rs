//! `pill_identifier`: check a medication photo against the expected drug.

use mcpkit::CallToolResult;
use reqwest::multipart::{Form, Part};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use super::{required, ToolError, ToolResult};
use crate::upstream::{error_body, inject_trace_context, pretty, pretty_if_json};
use crate::AppState;

pub const NAME: &str = "pill_identifier";

pub const MAX_IMAGE_BYTES: u64 = 5 * 1024 * 1024;
const ALLOWED_IMAGE_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/gif", "image/webp"];
const TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PillIdentifierArgs {
    /// Medication name
    pub name: Option<String>,

    /// Exactly 11 digits (hyphens removed automatically)
    pub ndc11: Option<String>,

    /// Local path to medication image (jpg, png, gif, webp). <=5MB
    pub image_path: Option<String>,

    /// Optional physical description
    pub description: Option<String>,
}

/// Validated request, ready to send.
#[derive(Debug, PartialEq)]
pub struct PillQuery {
    pub name: String,
    pub ndc: String,
    pub image_path: String,
    pub description: Option<String>,
}

impl PillQuery {
    /// Argument checks, in the order callers see their messages.
    pub fn from_args(args: PillIdentifierArgs) -> Result<Self, ToolError> {
        let name = required(args.name, "name")?;
        let ndc: String = args
            .ndc11
            .unwrap_or_default()
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        if ndc.is_empty() {
            return Err(ToolError::invalid("Missing 'ndc11'."));
        }
        if ndc.len() != 11 {
            return Err(ToolError::invalid("NDC must contain exactly 11 digits."));
        }
        let image_path = required(args.image_path, "imagePath")?;

        Ok(Self {
            name,
            ndc,
            image_path,
            description: args.description.filter(|d| !d.is_empty()),
        })
    }
}

/// MIME type of an accepted image, judged by extension.
pub fn image_mime(path: &Path) -> Option<&'static str> {
    let guessed = mime_guess::from_path(path).first()?;
    ALLOWED_IMAGE_TYPES
        .iter()
        .copied()
        .find(|allowed| *allowed == guessed.essence_str())
}

async fn build_form(query: &PillQuery) -> Result<Form, ToolError> {
    let path = Path::new(&query.image_path);
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|_| ToolError::invalid(format!("Image not found: {}", query.image_path)))?;
    if meta.len() > MAX_IMAGE_BYTES {
        return Err(ToolError::invalid("Image is too large. Max size is 5MB."));
    }
    let mime = image_mime(path)
        .ok_or_else(|| ToolError::invalid("Unsupported image format. Use JPG, PNG, GIF, or WebP."))?;

    let data = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());

    let mut form = Form::new()
        .text("medications[0][name]", query.name.clone())
        .text("medications[0][ndc]", query.ndc.clone());
    if let Some(description) = &query.description {
        form = form.text("medications[0][physical_description]", description.clone());
    }
    let image = Part::bytes(data).file_name(file_name).mime_str(mime)?;
    Ok(form.part("image[]", image))
}

#[tracing::instrument(name = "mcp.tool.pill_identifier", skip(state, args), fields(http.status = tracing::field::Empty))]
pub async fn identify(state: &AppState, args: PillIdentifierArgs) -> ToolResult {
    let query = PillQuery::from_args(args)?;
    let form = build_form(&query).await?;

    let request = state.http.post(&state.endpoints.pill).multipart(form).timeout(TIMEOUT);
    let response = inject_trace_context(request).send().await?;

    let status = response.status();
    tracing::Span::current().record("http.status", status.as_u16());
    if !status.is_success() {
        let body = error_body(response).await;
        return Err(ToolError::Http {
            status: status.as_u16(),
            body: pretty_if_json(&body),
        });
    }

    let data: Value = response.json().await?;
    Ok(CallToolResult::text(pretty(&data)))
}

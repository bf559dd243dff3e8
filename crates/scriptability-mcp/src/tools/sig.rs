//! `sig_normalize`: free-text SIG to structured JSON.

use mcpkit::CallToolResult;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{required, ToolError, ToolResult};
use crate::upstream::{error_body, inject_trace_context, pretty};
use crate::AppState;

pub const NAME: &str = "sig_normalize";

pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";
const PROMPT_ID: &str = "pmpt_68d1aac7137081978a62cfad87ffd3730b5be593908223a0";
const PROMPT_VERSION: &str = "7";
const MAX_SIG_CHARS: usize = 200;

/// The normalizer only answers requests from the patient access app.
const PERMITTED_ORIGIN: &str = "https://scriptability-patient-access.web.app";

const TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SigNormalizeArgs {
    /// Free-text SIG, max ~200 characters
    pub sig: Option<String>,

    /// OpenAI model ID override
    pub model: Option<String>,

    /// Force 'json' suffix in prompt
    pub include_json_suffix: Option<bool>,
}

/// Request body for the normalizer.
pub fn build_request(sig: &str, model: Option<&str>, force_json_suffix: bool) -> Value {
    let sig: String = sig.chars().take(MAX_SIG_CHARS).collect();
    let model = model.map(str::trim).filter(|m| !m.is_empty()).unwrap_or(DEFAULT_MODEL);
    let needs_suffix = force_json_suffix || !sig.to_lowercase().contains("json");
    let suffix = if needs_suffix { " json" } else { "" };

    json!({
        "model": model,
        "prompt": { "id": PROMPT_ID, "version": PROMPT_VERSION },
        "input": format!("SIG: {}{}", sig, suffix),
        "text": { "format": { "type": "json_object" } },
        "temperature": 0.25,
        "max_output_tokens": 2048,
        "top_p": 1,
        "store": true,
    })
}

/// Text of a Responses-API style payload: `output_text`, else the first
/// `output_text` part of the first `message` item.
pub fn extract_response_text(data: &Value) -> Option<String> {
    if let Some(text) = data["output_text"].as_str().filter(|t| !t.trim().is_empty()) {
        return Some(text.to_string());
    }

    data["output"]
        .as_array()?
        .iter()
        .filter(|item| item["type"] == "message")
        .filter_map(|item| item["content"].as_array())
        .flatten()
        .find(|part| part["type"] == "output_text" && part["text"].is_string())
        .and_then(|part| part["text"].as_str())
        .map(str::to_string)
}

/// Pretty-print text that looks like a JSON object or array.
fn format_output(text: &str) -> String {
    let trimmed = text.trim();
    let looks_like_json = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    if looks_like_json {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return pretty(&value);
        }
    }
    text.to_string()
}

#[tracing::instrument(name = "mcp.tool.sig_normalize", skip(state, args), fields(sig.model = tracing::field::Empty, http.status = tracing::field::Empty))]
pub async fn normalize(state: &AppState, args: SigNormalizeArgs) -> ToolResult {
    let sig = required(args.sig, "sig")?;
    let body = build_request(
        &sig,
        args.model.as_deref(),
        args.include_json_suffix == Some(true),
    );
    tracing::Span::current().record("sig.model", body["model"].as_str().unwrap_or_default());

    let request = state
        .http
        .post(&state.endpoints.sig)
        .header(reqwest::header::ORIGIN, PERMITTED_ORIGIN)
        .json(&body)
        .timeout(TIMEOUT);
    let response = inject_trace_context(request).send().await?;

    let status = response.status();
    tracing::Span::current().record("http.status", status.as_u16());
    if !status.is_success() {
        return Err(ToolError::Http {
            status: status.as_u16(),
            body: error_body(response).await,
        });
    }

    let data: Value = response.json().await?;
    let text = match extract_response_text(&data) {
        Some(text) => format_output(&text),
        None => pretty(&data),
    };
    Ok(CallToolResult::text(text))
}

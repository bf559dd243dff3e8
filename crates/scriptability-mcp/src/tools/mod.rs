//! The MCP tool catalog.
//!
//! `medcast_*` tools drive podcast jobs; the rest are single validated calls
//! to ScriptAbility pharmacy services.

pub mod medcast;
pub mod ndc;
pub mod pill;
pub mod sig;

use async_trait::async_trait;
use mcpkit::{schema_for, CallToolResult, ErrorData, Handler, Implementation, Tool};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::AppState;

/// Why a tool call failed. Rendered as `Error: <message>` to the client.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    Invalid(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("{0}")]
    Request(#[from] reqwest::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ToolError::Invalid(message.into())
    }
}

pub type ToolResult = Result<CallToolResult, ToolError>;

/// Missing or blank after trimming.
pub(crate) fn required(value: Option<String>, field: &str) -> Result<String, ToolError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ToolError::invalid(format!("Missing '{}'.", field)))
}

/// Schema for `T` with `fields` listed as required.
///
/// Argument structs keep every field optional so that a missing value gets
/// the tool's own message rather than a deserialization error.
fn schema_requiring<T: schemars::JsonSchema>(fields: &[&str]) -> Value {
    let mut schema = schema_for::<T>();
    if !fields.is_empty() {
        if let Some(object) = schema.as_object_mut() {
            object.insert("required".to_string(), serde_json::json!(fields));
        }
    }
    schema
}

fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments)
        .map_err(|e| ToolError::invalid(format!("Invalid arguments: {}", e)))
}

/// Serves the tool catalog over [`mcpkit`].
pub struct ScriptHandler {
    state: Arc<AppState>,
}

impl ScriptHandler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    async fn run(&self, name: &str, arguments: Value) -> ToolResult {
        let state = self.state.as_ref();
        match name {
            sig::NAME => sig::normalize(state, parse_args(arguments)?).await,
            ndc::NAME => ndc::analyze(state, parse_args(arguments)?).await,
            pill::NAME => pill::identify(state, parse_args(arguments)?).await,
            medcast::GENERATE => medcast::generate(state, parse_args(arguments)?).await,
            medcast::STATUS => medcast::status(state, parse_args(arguments)?).await,
            other => Err(ToolError::invalid(format!("Unknown tool: {}", other))),
        }
    }
}

#[async_trait]
impl Handler for ScriptHandler {
    fn tools(&self) -> Vec<Tool> {
        vec![
            Tool::new(
                sig::NAME,
                "Normalize pharmacy SIG instructions into a structured JSON using ScriptAbility pipeline.",
            )
            .with_input_schema(schema_requiring::<sig::SigNormalizeArgs>(&["sig"]))
            .read_only()
            .open_world(),
            Tool::new(
                ndc::NAME,
                "Look up NDC descriptor details for a given NDC (digits and hyphens allowed).",
            )
            .with_input_schema(schema_requiring::<ndc::NdcAnalysisArgs>(&["ndc"]))
            .read_only()
            .open_world(),
            Tool::new(
                medcast::GENERATE,
                "Generate a medication podcast from files, text, and/or NDC. Starts a background job and \
                 returns its id; pass waitMs to block until the WAV is ready.",
            )
            .with_input_schema(schema_requiring::<medcast::GeneratePodcastArgs>(&[]))
            .open_world(),
            Tool::new(
                medcast::STATUS,
                "Get the status of a podcast generation job, optionally waiting up to waitMs for it to finish.",
            )
            .with_input_schema(schema_requiring::<medcast::JobStatusArgs>(&["jobId"]))
            .read_only(),
            Tool::new(
                pill::NAME,
                "Analyze a medication image against expected medication details (name + 11-digit NDC).",
            )
            .with_input_schema(schema_requiring::<pill::PillIdentifierArgs>(&[
                "name",
                "ndc11",
                "imagePath",
            ]))
            .read_only()
            .open_world(),
        ]
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, ErrorData> {
        match self.run(name, arguments).await {
            Ok(result) => Ok(result),
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "Tool call failed");
                Ok(CallToolResult::error(e.to_string()))
            }
        }
    }

    fn server_info(&self) -> Implementation {
        Implementation::new(crate::SERVER_NAME, env!("CARGO_PKG_VERSION")).with_title("ScriptAbility")
    }

    fn instructions(&self) -> Option<String> {
        Some(
            "Podcast generation is asynchronous: medcast_generate_podcast returns a jobId, \
             poll medcast_job_status (optionally with waitMs) until status is succeeded or failed."
                .to_string(),
        )
    }
}

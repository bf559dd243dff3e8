//! `ndc_analysis`: NDC descriptor lookup.

use mcpkit::CallToolResult;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::{required, ToolError, ToolResult};
use crate::upstream::{error_body, inject_trace_context, pretty};
use crate::AppState;

pub const NAME: &str = "ndc_analysis";

const TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct NdcAnalysisArgs {
    /// NDC number (digits and hyphens)
    pub ndc: Option<String>,
}

/// Keep only digits and hyphens.
pub fn sanitize(ndc: &str) -> String {
    ndc.chars().filter(|c| c.is_ascii_digit() || *c == '-').collect()
}

pub fn lookup_url(endpoint: &str, ndc: &str) -> String {
    format!("{}?ndc={}", endpoint, urlencoding::encode(&sanitize(ndc)))
}

#[tracing::instrument(name = "mcp.tool.ndc_analysis", skip(state, args), fields(ndc = tracing::field::Empty, http.status = tracing::field::Empty))]
pub async fn analyze(state: &AppState, args: NdcAnalysisArgs) -> ToolResult {
    let ndc = required(args.ndc, "ndc")?;
    let span = tracing::Span::current();
    span.record("ndc", sanitize(&ndc).as_str());

    let request = state
        .http
        .get(lookup_url(&state.endpoints.ndc, &ndc))
        .header(reqwest::header::ACCEPT, "application/json")
        .timeout(TIMEOUT);
    let response = inject_trace_context(request).send().await?;

    let status = response.status();
    span.record("http.status", status.as_u16());
    if !status.is_success() {
        return Err(ToolError::Http {
            status: status.as_u16(),
            body: error_body(response).await,
        });
    }

    let data: Value = response.json().await?;
    Ok(CallToolResult::text(pretty(&data)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize(" 0093-7214 01x "), "0093-721401");
        assert_eq!(sanitize("abc"), "");
    }

    #[test]
    fn test_lookup_url() {
        assert_eq!(
            lookup_url("https://ndc.test/ndc_descriptor.php", "0093-7214-01"),
            "https://ndc.test/ndc_descriptor.php?ndc=0093-7214-01"
        );
    }
}

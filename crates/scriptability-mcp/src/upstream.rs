//! Plumbing shared by every outbound call to a pharmacy backend.

use std::time::Duration;

/// One pooled client for all backends. Per-call timeouts are set on the
/// request, so the client itself only bounds connection setup.
pub fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("scriptability-mcp/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Attach a W3C `traceparent` for the current span, if it has a valid context.
pub fn inject_trace_context(builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    use opentelemetry::trace::TraceContextExt;
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    let context = tracing::Span::current().context();
    let span = context.span();
    let span_context = span.span_context();

    if span_context.is_valid() {
        let flags = if span_context.is_sampled() { "01" } else { "00" };
        let traceparent = format!(
            "00-{}-{}-{}",
            span_context.trace_id(),
            span_context.span_id(),
            flags
        );
        builder.header("traceparent", traceparent)
    } else {
        builder
    }
}

/// Pretty-print `text` when it parses as JSON, otherwise hand it back as is.
pub fn pretty_if_json(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or_else(|| text.to_string())
}

pub fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Body of a failed response; never fails itself.
pub async fn error_body(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string())
}

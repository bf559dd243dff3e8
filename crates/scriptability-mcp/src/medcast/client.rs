//! Client for the podcast generation backend.

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use thiserror::Error;

use super::sources::{MedcastSources, SourceFile, ValidationError};
use crate::upstream::{error_body, inject_trace_context, pretty_if_json};

#[derive(Debug, Error)]
pub enum MedcastError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("Could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Request timed out ({}).", describe(.0))]
    Timeout(Duration),

    #[error("URL: {url}\nStatus: {status}\nResponse: {body}")]
    Upstream { url: String, status: u16, body: String },

    #[error("{0}")]
    Request(#[source] reqwest::Error),
}

fn describe(timeout: &Duration) -> String {
    let secs = timeout.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{} min", secs / 60)
    } else {
        format!("{}s", secs.max(1))
    }
}

#[derive(Clone)]
pub struct MedcastClient {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl MedcastClient {
    pub fn new(http: reqwest::Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            http,
            endpoint: format!("{}/generate_podcast", base_url.trim_end_matches('/')),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send the sources and return the WAV bytes.
    ///
    /// Runs the full size checks first; a source that fails them never
    /// reaches the network.
    #[tracing::instrument(
        name = "medcast.generate",
        skip(self, sources),
        fields(
            medcast.files = sources.files.len(),
            medcast.has_text = sources.text.is_some(),
            medcast.has_ndc = sources.ndc.is_some(),
            http.status = tracing::field::Empty,
            medcast.bytes = tracing::field::Empty,
        )
    )]
    pub async fn generate(&self, sources: &MedcastSources) -> Result<Bytes, MedcastError> {
        let files = sources.check_files().await?;
        let form = build_form(&files, sources).await?;

        let request = self.http.post(&self.endpoint).multipart(form).timeout(self.timeout);
        let response = inject_trace_context(request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        tracing::Span::current().record("http.status", status.as_u16());
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(MedcastError::Upstream {
                url: self.endpoint.clone(),
                status: status.as_u16(),
                body: pretty_if_json(&body),
            });
        }

        let audio = response.bytes().await.map_err(|e| self.classify(e))?;
        tracing::Span::current().record("medcast.bytes", audio.len());
        Ok(audio)
    }

    fn classify(&self, error: reqwest::Error) -> MedcastError {
        if error.is_timeout() {
            MedcastError::Timeout(self.timeout)
        } else {
            MedcastError::Request(error)
        }
    }
}

async fn build_form(files: &[SourceFile], sources: &MedcastSources) -> Result<Form, MedcastError> {
    let mut form = Form::new();

    for file in files {
        let data = tokio::fs::read(&file.path)
            .await
            .map_err(|source| MedcastError::Read {
                path: file.given.clone(),
                source,
            })?;
        let name = file
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.given.clone());
        let mime = mime_guess::from_path(&file.path).first_or_octet_stream();
        let part = Part::bytes(data)
            .file_name(name)
            .mime_str(mime.essence_str())
            .map_err(MedcastError::Request)?;
        form = form.part("source_files", part);
    }

    if let Some(text) = &sources.text {
        form = form.text("source_text", text.clone());
    }
    if let Some(ndc) = &sources.ndc {
        form = form.text("ndc_number", ndc.clone());
    }
    Ok(form)
}

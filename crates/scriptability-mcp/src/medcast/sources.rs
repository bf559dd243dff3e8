//! Source materials for one podcast and the checks they must pass.
//!
//! Checks that need no I/O (something to send, file count, extensions) run
//! before a job exists. Size checks stat the files and run inside the job,
//! ahead of any network traffic.

use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MAX_FILES: usize = 10;
pub const MAX_FILE_BYTES: u64 = 5 * 1024 * 1024;
pub const MAX_TOTAL_BYTES: u64 = 10 * 1024 * 1024;
pub const ALLOWED_EXTENSIONS: [&str; 4] = [".txt", ".md", ".pdf", ".docx"];

/// Messages are user-facing and end up after `Error: ` in tool results.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Provide at least one of: files, text, or ndc.")]
    NothingToSend,

    #[error("Too many files (max {MAX_FILES}).")]
    TooManyFiles,

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("File not found: {0}")]
    Missing(String),

    #[error("File too large (>5MB): {0}")]
    FileTooLarge(String),

    #[error("Total attachment size exceeds 10MB.")]
    TotalTooLarge,
}

/// One validated upload: display name plus resolved path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// As the caller wrote it, for messages.
    pub given: String,
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MedcastSources {
    pub files: Vec<String>,
    pub text: Option<String>,
    pub ndc: Option<String>,
    /// Local output directory override.
    pub output_dir: Option<PathBuf>,
}

impl MedcastSources {
    /// Blank text and NDC count as absent.
    pub fn new(
        files: Vec<String>,
        text: Option<String>,
        ndc: Option<String>,
        output_dir: Option<String>,
    ) -> Self {
        let non_blank = |s: Option<String>| s.filter(|v| !v.trim().is_empty());
        Self {
            files: files.into_iter().filter(|f| !f.trim().is_empty()).collect(),
            text: non_blank(text),
            ndc: non_blank(ndc).map(|n| n.trim().to_string()),
            output_dir: non_blank(output_dir).map(PathBuf::from),
        }
    }

    /// Checks that need no filesystem access.
    pub fn check_request(&self) -> Result<(), ValidationError> {
        if self.files.is_empty() && self.text.is_none() && self.ndc.is_none() {
            return Err(ValidationError::NothingToSend);
        }
        if self.files.len() > MAX_FILES {
            return Err(ValidationError::TooManyFiles);
        }
        if let Some(bad) = self.files.iter().find(|f| !has_allowed_extension(f)) {
            return Err(ValidationError::UnsupportedType(bad.clone()));
        }
        Ok(())
    }

    /// Full check, including per-file and total size, in caller order.
    pub async fn check_files(&self) -> Result<Vec<SourceFile>, ValidationError> {
        self.check_request()?;

        let mut total: u64 = 0;
        let mut checked = Vec::with_capacity(self.files.len());
        for given in &self.files {
            let path = Path::new(given).to_path_buf();
            let meta = tokio::fs::metadata(&path)
                .await
                .map_err(|_| ValidationError::Missing(given.clone()))?;
            if !meta.is_file() {
                return Err(ValidationError::Missing(given.clone()));
            }

            let size = meta.len();
            if size > MAX_FILE_BYTES {
                return Err(ValidationError::FileTooLarge(given.clone()));
            }
            total += size;
            if total > MAX_TOTAL_BYTES {
                return Err(ValidationError::TotalTooLarge);
            }

            checked.push(SourceFile {
                given: given.clone(),
                path,
                size,
            });
        }
        Ok(checked)
    }
}

fn has_allowed_extension(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

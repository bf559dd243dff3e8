//! Where finished podcasts live.
//!
//! Either a local directory (one timestamped WAV per job) or a bucket
//! (`<prefix>/<jobId>/output-<ts>.wav`). The bucket layout is what lets the
//! download gateway find an artifact after a restart has emptied the job
//! registry.

pub mod gcs;
pub mod object;

pub use gcs::GcsObjectStore;
pub use object::{ByteStream, MemoryObjectStore, ObjectStore};

use bytes::Bytes;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::io::ReaderStream;

use crate::jobs::JobId;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("storage returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("storage credentials unavailable: {0}")]
    Auth(String),

    #[error("URL signing failed: {0}")]
    Signing(String),
}

/// Where an artifact's bytes are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Local(PathBuf),
    Remote { bucket: String, key: String },
}

impl Locator {
    /// Inverse of `Display`: `gs://bucket/key` is remote, anything else a path.
    pub fn parse(s: &str) -> Self {
        if let Some(rest) = s.strip_prefix("gs://") {
            if let Some((bucket, key)) = rest.split_once('/') {
                return Locator::Remote {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                };
            }
        }
        Locator::Local(PathBuf::from(s))
    }

    pub fn file_name(&self) -> String {
        let name = match self {
            Locator::Local(path) => path.file_name().map(|n| n.to_string_lossy().into_owned()),
            Locator::Remote { key, .. } => key.rsplit('/').next().map(str::to_string),
        };
        name.filter(|n| !n.is_empty())
            .unwrap_or_else(|| "output.wav".to_string())
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Local(path) => write!(f, "{}", path.display()),
            Locator::Remote { bucket, key } => write!(f, "gs://{}/{}", bucket, key),
        }
    }
}

/// Result of persisting one artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredArtifact {
    pub locator: Locator,
    /// Stable route through the download gateway.
    pub download_url: Option<String>,
    /// Time-limited direct object URL.
    pub signed_url: Option<String>,
    /// Anonymous object URL, when the object was made public.
    pub public_url: Option<String>,
}

impl StoredArtifact {
    /// Gateway route, else public object URL, else signed URL.
    pub fn best_url(&self) -> Option<String> {
        self.download_url
            .clone()
            .or_else(|| self.public_url.clone())
            .or_else(|| self.signed_url.clone())
    }
}

/// Artifact bytes ready to stream.
pub struct ArtifactBody {
    pub stream: ByteStream,
    pub len: Option<u64>,
    pub file_name: String,
}

enum Backend {
    Local { root: PathBuf },
    Remote { objects: Arc<dyn ObjectStore>, prefix: String },
}

pub struct ArtifactStore {
    backend: Backend,
    public_base_url: Option<String>,
    signed_url_ttl: Duration,
    public_read: bool,
}

impl ArtifactStore {
    /// Store artifacts under `root` unless a call names its own directory.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Local { root: root.into() },
            public_base_url: None,
            signed_url_ttl: Duration::from_secs(3600),
            public_read: false,
        }
    }

    pub fn remote(objects: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            backend: Backend::Remote {
                objects,
                prefix: prefix.into().trim_matches('/').to_string(),
            },
            public_base_url: None,
            signed_url_ttl: Duration::from_secs(3600),
            public_read: false,
        }
    }

    pub fn with_public_base_url(mut self, base: Option<String>) -> Self {
        self.public_base_url = base.map(|b| b.trim_end_matches('/').to_string());
        self
    }

    pub fn with_signed_url_ttl(mut self, ttl: Duration) -> Self {
        self.signed_url_ttl = ttl;
        self
    }

    pub fn with_public_read(mut self, public_read: bool) -> Self {
        self.public_read = public_read;
        self
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.backend, Backend::Remote { .. })
    }

    fn object_key(prefix: &str, job_id: &JobId, file_name: &str) -> String {
        if prefix.is_empty() {
            format!("{}/{}", job_id, file_name)
        } else {
            format!("{}/{}/{}", prefix, job_id, file_name)
        }
    }

    fn job_prefix(prefix: &str, job_id: &JobId) -> String {
        Self::object_key(prefix, job_id, "")
    }

    fn route_for(&self, job_id: &JobId) -> Option<String> {
        self.public_base_url
            .as_ref()
            .map(|base| format!("{}/files/medcast/{}", base, job_id))
    }

    /// Persist one job's audio. Called once per job.
    ///
    /// `output_dir` only applies to local storage; relative paths resolve
    /// against the working directory.
    #[tracing::instrument(name = "artifact.save", skip(self, bytes, output_dir), fields(job.id = %job_id, artifact.bytes = bytes.len()))]
    pub async fn save(
        &self,
        job_id: &JobId,
        bytes: Bytes,
        output_dir: Option<&Path>,
    ) -> Result<StoredArtifact, StorageError> {
        let timestamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");

        match &self.backend {
            Backend::Local { root } => {
                let dir = absolute(output_dir.unwrap_or(root))?;
                tokio::fs::create_dir_all(&dir).await?;
                let path = dir.join(format!("output-{}-{}.wav", timestamp, job_id.short()));
                tokio::fs::write(&path, &bytes).await?;
                tracing::info!(artifact.path = %path.display(), "Artifact written to disk");

                Ok(StoredArtifact {
                    locator: Locator::Local(path),
                    download_url: self.route_for(job_id),
                    signed_url: None,
                    public_url: None,
                })
            }
            Backend::Remote { objects, prefix } => {
                let key = Self::object_key(prefix, job_id, &format!("output-{}.wav", timestamp));
                objects.put(&key, bytes, "audio/wav").await?;
                tracing::info!(artifact.bucket = objects.bucket(), artifact.key = %key, "Artifact uploaded");

                let mut public_url = None;
                if self.public_read {
                    match objects.make_public(&key).await {
                        Ok(()) => public_url = Some(objects.public_url(&key)),
                        Err(e) => tracing::warn!(
                            artifact.key = %key,
                            error = %e,
                            "Bucket refused public read, falling back to signed URL"
                        ),
                    }
                }

                let signed_url = if public_url.is_none() {
                    self.try_sign(objects.as_ref(), &key).await
                } else {
                    None
                };

                Ok(StoredArtifact {
                    locator: Locator::Remote {
                        bucket: objects.bucket().to_string(),
                        key,
                    },
                    download_url: self.route_for(job_id),
                    signed_url,
                    public_url,
                })
            }
        }
    }

    async fn try_sign(&self, objects: &dyn ObjectStore, key: &str) -> Option<String> {
        match objects.signed_url(key, self.signed_url_ttl).await {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(artifact.key = %key, error = %e, "Could not sign download URL");
                None
            }
        }
    }

    /// Best externally resolvable URL for a stored artifact: the gateway
    /// route when a public base URL is set, else a fresh signed URL for
    /// remote objects, else nothing (local files are read directly).
    pub async fn resolve_download(&self, job_id: &JobId, locator: &Locator) -> Option<String> {
        match self.route_for(job_id) {
            Some(route) => Some(route),
            None => self.sign(locator).await,
        }
    }

    /// A fresh signed URL for a remote object; `None` for local files or
    /// when signing fails.
    pub async fn sign(&self, locator: &Locator) -> Option<String> {
        match (&self.backend, locator) {
            (Backend::Remote { objects, .. }, Locator::Remote { key, .. }) => {
                self.try_sign(objects.as_ref(), key).await
            }
            _ => None,
        }
    }

    /// Look for a job's artifact in the bucket. Local storage keeps no
    /// reverse index, so this is always `None` there.
    ///
    /// With several WAVs under the job prefix the newest wins; the
    /// `output-<YYYYmmdd-HHMMSS>` names sort by time.
    pub async fn find_by_job(&self, job_id: &JobId) -> Result<Option<Locator>, StorageError> {
        let Backend::Remote { objects, prefix } = &self.backend else {
            return Ok(None);
        };

        let keys = objects.list(&Self::job_prefix(prefix, job_id)).await?;
        Ok(keys
            .into_iter()
            .filter(|key| key.ends_with(".wav"))
            .max()
            .map(|key| Locator::Remote {
                bucket: objects.bucket().to_string(),
                key,
            }))
    }

    /// Open an artifact for streaming.
    pub async fn open(&self, locator: &Locator) -> Result<ArtifactBody, StorageError> {
        let file_name = locator.file_name();
        match (locator, &self.backend) {
            (Locator::Local(path), _) => {
                let file = match tokio::fs::File::open(path).await {
                    Ok(file) => file,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(StorageError::NotFound(path.display().to_string()))
                    }
                    Err(e) => return Err(e.into()),
                };
                let len = file.metadata().await.ok().map(|m| m.len());
                Ok(ArtifactBody {
                    stream: ReaderStream::new(file).boxed(),
                    len,
                    file_name,
                })
            }
            (Locator::Remote { bucket, key }, Backend::Remote { objects, .. })
                if bucket == objects.bucket() =>
            {
                let (stream, len) = objects.get(key).await?;
                Ok(ArtifactBody {
                    stream,
                    len,
                    file_name,
                })
            }
            (Locator::Remote { .. }, _) => Err(StorageError::NotFound(locator.to_string())),
        }
    }
}

fn absolute(dir: &Path) -> std::io::Result<PathBuf> {
    if dir.is_absolute() {
        Ok(dir.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn collect(body: ArtifactBody) -> Vec<u8> {
        let chunks: Vec<Bytes> = body.stream.try_collect().await.unwrap();
        chunks.concat()
    }

    #[test]
    fn test_locator_round_trip() {
        let remote = Locator::Remote {
            bucket: "b".to_string(),
            key: "medcast/j/output-1.wav".to_string(),
        };
        assert_eq!(remote.to_string(), "gs://b/medcast/j/output-1.wav");
        assert_eq!(Locator::parse(&remote.to_string()), remote);
        assert_eq!(remote.file_name(), "output-1.wav");

        let local = Locator::parse("/tmp/x/output-2.wav");
        assert_eq!(local, Locator::Local(PathBuf::from("/tmp/x/output-2.wav")));
        assert_eq!(local.file_name(), "output-2.wav");
    }

    #[tokio::test]
    async fn test_local_save_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::local(dir.path());
        let job_id = JobId::new();

        let stored = store
            .save(&job_id, Bytes::from_static(b"RIFF1234"), None)
            .await
            .unwrap();
        let Locator::Local(path) = &stored.locator else {
            panic!("expected a local path");
        };
        assert!(path.starts_with(dir.path()));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("output-"));
        assert!(name.ends_with(&format!("-{}.wav", job_id.short())));
        assert!(stored.download_url.is_none() && stored.signed_url.is_none());

        assert_eq!(tokio::fs::read(path).await.unwrap(), b"RIFF1234");
        assert_eq!(collect(store.open(&stored.locator).await.unwrap()).await, b"RIFF1234");
        assert!(store.find_by_job(&job_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_output_dir_override() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let store = ArtifactStore::local(root.path());

        let stored = store
            .save(&JobId::new(), Bytes::from_static(b"x"), Some(other.path()))
            .await
            .unwrap();
        assert!(stored.locator.to_string().starts_with(&other.path().display().to_string()));
    }

    #[tokio::test]
    async fn test_public_base_url_builds_route() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::local(dir.path())
            .with_public_base_url(Some("https://mcp.example.test/".to_string()));
        let job_id = JobId::from("job-1");

        let stored = store.save(&job_id, Bytes::from_static(b"x"), None).await.unwrap();
        assert_eq!(
            stored.download_url.as_deref(),
            Some("https://mcp.example.test/files/medcast/job-1")
        );
        assert_eq!(stored.best_url(), stored.download_url);
    }

    #[tokio::test]
    async fn test_remote_save_signs_when_not_public() {
        let objects = Arc::new(MemoryObjectStore::new("podcasts"));
        let store = ArtifactStore::remote(objects.clone(), "medcast/");
        let job_id = JobId::from("job-2");

        let stored = store.save(&job_id, Bytes::from_static(b"RIFF"), None).await.unwrap();
        let Locator::Remote { bucket, key } = &stored.locator else {
            panic!("expected a remote locator");
        };
        assert_eq!(bucket, "podcasts");
        assert!(key.starts_with("medcast/job-2/output-"));
        assert!(stored.signed_url.is_some());
        assert!(stored.public_url.is_none());
        assert_eq!(stored.best_url(), stored.signed_url);
    }

    #[tokio::test]
    async fn test_public_read_refused_falls_back_to_signed() {
        let objects = Arc::new(MemoryObjectStore::new("podcasts").deny_public());
        let store = ArtifactStore::remote(objects, "medcast").with_public_read(true);

        let stored = store
            .save(&JobId::new(), Bytes::from_static(b"RIFF"), None)
            .await
            .unwrap();
        assert!(stored.public_url.is_none());
        assert!(stored.signed_url.is_some());
    }

    #[tokio::test]
    async fn test_public_read_accepted() {
        let objects = Arc::new(MemoryObjectStore::new("podcasts"));
        let store = ArtifactStore::remote(objects.clone(), "medcast").with_public_read(true);

        let stored = store
            .save(&JobId::new(), Bytes::from_static(b"RIFF"), None)
            .await
            .unwrap();
        assert!(stored.public_url.is_some());
        assert!(stored.signed_url.is_none());
        let Locator::Remote { key, .. } = &stored.locator else {
            panic!("expected a remote locator");
        };
        assert!(objects.is_public(key));
    }

    #[tokio::test]
    async fn test_find_by_job_after_registry_loss() {
        let objects = Arc::new(MemoryObjectStore::new("podcasts"));
        let store = ArtifactStore::remote(objects, "medcast");
        let job_id = JobId::new();

        let stored = store.save(&job_id, Bytes::from_static(b"RIFFdata"), None).await.unwrap();
        let found = store.find_by_job(&job_id).await.unwrap();
        assert_eq!(found.as_ref(), Some(&stored.locator));
        assert_eq!(collect(store.open(&stored.locator).await.unwrap()).await, b"RIFFdata");

        assert!(store.find_by_job(&JobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_job_prefers_newest() {
        let objects = Arc::new(MemoryObjectStore::new("podcasts"));
        let store = ArtifactStore::remote(objects.clone(), "medcast");
        let job_id = JobId::from("job-7");
        for key in [
            "medcast/job-7/output-20250101-090000.wav",
            "medcast/job-7/output-20250301-120000.wav",
            "medcast/job-7/output-20250201-100000.wav",
            "medcast/job-7/transcript.txt",
        ] {
            objects.put(key, Bytes::from_static(b"x"), "audio/wav").await.unwrap();
        }

        let found = store.find_by_job(&job_id).await.unwrap();
        assert_eq!(
            found,
            Some(Locator::Remote {
                bucket: "podcasts".to_string(),
                key: "medcast/job-7/output-20250301-120000.wav".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_resolve_download() {
        let objects = Arc::new(MemoryObjectStore::new("podcasts"));
        let remote = ArtifactStore::remote(objects, "medcast");
        let job_id = JobId::new();
        let stored = remote.save(&job_id, Bytes::from_static(b"x"), None).await.unwrap();
        let fresh = remote.resolve_download(&job_id, &stored.locator).await;
        assert!(fresh.is_some());
        assert_ne!(fresh, stored.signed_url);

        let dir = tempfile::tempdir().unwrap();
        let local = ArtifactStore::local(dir.path());
        let locator = Locator::Local(dir.path().join("a.wav"));
        assert!(local.resolve_download(&job_id, &locator).await.is_none());
    }

    #[tokio::test]
    async fn test_open_missing_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::local(dir.path());
        let result = store.open(&Locator::Local(dir.path().join("gone.wav"))).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }
}

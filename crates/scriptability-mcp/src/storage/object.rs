//! Object store abstraction.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::StorageError;

/// Streamed object bytes.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// The bucket operations the artifact store needs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StorageError>;

    /// Grant anonymous read. Buckets with uniform access policies refuse this.
    async fn make_public(&self, key: &str) -> Result<(), StorageError>;

    /// Anonymous URL for an object made public.
    fn public_url(&self, key: &str) -> String {
        format!(
            "https://storage.googleapis.com/{}/{}",
            self.bucket(),
            encode_key(key)
        )
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;

    /// Keys under `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Object bytes plus the length when known.
    async fn get(&self, key: &str) -> Result<(ByteStream, Option<u64>), StorageError>;
}

/// Percent-encode each path segment of an object key, keeping the slashes.
pub fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

struct StoredObject {
    data: Bytes,
    content_type: String,
    public: bool,
}

/// In-process bucket. Used by tests and local development.
pub struct MemoryObjectStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    allow_public: bool,
    signatures: AtomicU64,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(BTreeMap::new()),
            allow_public: true,
            signatures: AtomicU64::new(0),
        }
    }

    /// Behave like a bucket with public access prevention turned on.
    pub fn deny_public(mut self) -> Self {
        self.allow_public = false;
        self
    }

    fn objects(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_public(&self, key: &str) -> bool {
        self.objects().get(key).map(|o| o.public).unwrap_or(false)
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects().get(key).map(|o| o.content_type.clone())
    }

    /// Signed URLs handed out so far. Each one is distinct.
    pub fn signatures_issued(&self) -> u64 {
        self.signatures.load(Ordering::Relaxed)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects().keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StorageError> {
        self.objects().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
                public: false,
            },
        );
        Ok(())
    }

    async fn make_public(&self, key: &str) -> Result<(), StorageError> {
        if !self.allow_public {
            return Err(StorageError::Http {
                status: 412,
                body: "public access prevention is enforced on this bucket".to_string(),
            });
        }
        match self.objects().get_mut(key) {
            Some(object) => {
                object.public = true;
                Ok(())
            }
            None => Err(StorageError::NotFound(key.to_string())),
        }
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        if !self.objects().contains_key(key) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let signature = self.signatures.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(format!(
            "memory://{}/{}?expires={}&sig={}",
            self.bucket,
            encode_key(key),
            ttl.as_secs(),
            signature
        ))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .objects()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn get(&self, key: &str) -> Result<(ByteStream, Option<u64>), StorageError> {
        let data = self
            .objects()
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        let len = data.len() as u64;
        Ok((futures::stream::once(async move { Ok(data) }).boxed(), Some(len)))
    }
}

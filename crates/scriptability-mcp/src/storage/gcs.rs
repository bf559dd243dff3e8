//! Google Cloud Storage over the JSON API.
//!
//! Auth is a service-account key (JWT bearer grant) when one is configured,
//! otherwise the GCE/Cloud Run metadata server. V4 signed URLs need the key.

use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use super::object::{encode_key, ByteStream, ObjectStore};
use super::StorageError;

const STORAGE_HOST: &str = "storage.googleapis.com";
const DEFAULT_API_BASE: &str = "https://storage.googleapis.com";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
const JWT_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// V4 signatures are capped at seven days.
const MAX_SIGNED_URL_SECS: u64 = 604_800;

/// Refresh tokens this long before they expire.
const TOKEN_SLACK: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

enum Credentials {
    ServiceAccount {
        key: ServiceAccountKey,
        signer: EncodingKey,
    },
    Metadata,
    /// Pre-issued token, e.g. for a storage emulator.
    Static(String),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Serialize)]
struct GrantClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    items: Vec<ListedObject>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct ListedObject {
    name: String,
}

pub struct GcsObjectStore {
    http: reqwest::Client,
    bucket: String,
    api_base: String,
    credentials: Credentials,
    token: tokio::sync::Mutex<Option<CachedToken>>,
}

impl GcsObjectStore {
    fn with_credentials(http: reqwest::Client, bucket: String, credentials: Credentials) -> Self {
        Self {
            http,
            bucket,
            api_base: DEFAULT_API_BASE.to_string(),
            credentials,
            token: tokio::sync::Mutex::new(None),
        }
    }

    /// Authenticate with a service-account key file.
    pub fn from_key_file(
        http: reqwest::Client,
        bucket: impl Into<String>,
        path: &Path,
    ) -> Result<Self, StorageError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_key_json(http, bucket, &raw)
    }

    pub fn from_key_json(
        http: reqwest::Client,
        bucket: impl Into<String>,
        json: &str,
    ) -> Result<Self, StorageError> {
        let key: ServiceAccountKey = serde_json::from_str(json)
            .map_err(|e| StorageError::Auth(format!("Invalid service account key: {}", e)))?;
        let signer = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| StorageError::Auth(format!("Invalid RSA private key: {}", e)))?;

        tracing::info!(gcs.account = %key.client_email, "Using service account key for storage");
        Ok(Self::with_credentials(
            http,
            bucket.into(),
            Credentials::ServiceAccount { key, signer },
        ))
    }

    /// Authenticate through the instance metadata server.
    pub fn from_metadata_server(http: reqwest::Client, bucket: impl Into<String>) -> Self {
        Self::with_credentials(http, bucket.into(), Credentials::Metadata)
    }

    pub fn from_access_token(
        http: reqwest::Client,
        bucket: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self::with_credentials(http, bucket.into(), Credentials::Static(token.into()))
    }

    /// Point at a different API origin (emulators, tests).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.api_base,
            urlencoding::encode(&self.bucket),
            urlencoding::encode(key)
        )
    }

    async fn access_token(&self) -> Result<String, StorageError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_SLACK {
                return Ok(token.value.clone());
            }
        }

        let fresh = match &self.credentials {
            Credentials::Static(token) => return Ok(token.clone()),
            Credentials::ServiceAccount { key, signer } => self.jwt_grant(key, signer).await?,
            Credentials::Metadata => {
                let response = self
                    .http
                    .get(METADATA_TOKEN_URL)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .map_err(|e| StorageError::Auth(format!("metadata server unreachable: {}", e)))?;
                check(response).await?.json::<TokenResponse>().await?
            }
        };

        tracing::debug!(expires_in = fresh.expires_in, "Fetched storage access token");
        let value = fresh.access_token.clone();
        *cached = Some(CachedToken {
            value: fresh.access_token,
            expires_at: Instant::now() + Duration::from_secs(fresh.expires_in),
        });
        Ok(value)
    }

    async fn jwt_grant(
        &self,
        key: &ServiceAccountKey,
        signer: &EncodingKey,
    ) -> Result<TokenResponse, StorageError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| StorageError::Auth(format!("System time error: {}", e)))?
            .as_secs();
        let claims = GrantClaims {
            iss: &key.client_email,
            scope: SCOPE,
            aud: &key.token_uri,
            iat: now,
            exp: now + 3600,
        };
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, signer)
            .map_err(|e| StorageError::Auth(format!("Failed to encode JWT: {}", e)))?;

        let response = self
            .http
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await?;
        Ok(check(response).await?.json::<TokenResponse>().await?)
    }
}

/// Turn a non-2xx response into `StorageError::Http`.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StorageError::Http {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[tracing::instrument(name = "gcs.put", skip(self, data), fields(gcs.bucket = %self.bucket, gcs.bytes = data.len()))]
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StorageError> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/upload/storage/v1/b/{}/o",
            self.api_base,
            urlencoding::encode(&self.bucket)
        );
        let response = self
            .http
            .post(url)
            .query(&[("uploadType", "media"), ("name", key)])
            .bearer_auth(token)
            .header(CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    #[tracing::instrument(name = "gcs.make_public", skip(self))]
    async fn make_public(&self, key: &str) -> Result<(), StorageError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!("{}/acl", self.object_url(key)))
            .bearer_auth(token)
            .json(&serde_json::json!({ "entity": "allUsers", "role": "READER" }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let Credentials::ServiceAccount { key: account, signer } = &self.credentials else {
            return Err(StorageError::Signing(
                "signed URLs require a service account key".to_string(),
            ));
        };
        sign_v4(&account.client_email, signer, &self.bucket, key, ttl, Utc::now())
    }

    #[tracing::instrument(name = "gcs.list", skip(self))]
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/storage/v1/b/{}/o",
            self.api_base,
            urlencoding::encode(&self.bucket)
        );

        let mut names = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .http
                .get(&url)
                .bearer_auth(&token)
                .query(&[("prefix", prefix), ("fields", "items(name),nextPageToken")]);
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page.as_str())]);
            }

            let page: ListResponse = check(request.send().await?).await?.json().await?;
            names.extend(page.items.into_iter().map(|item| item.name));
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(names)
    }

    #[tracing::instrument(name = "gcs.get", skip(self))]
    async fn get(&self, key: &str) -> Result<(ByteStream, Option<u64>), StorageError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(self.object_url(key))
            .query(&[("alt", "media")])
            .bearer_auth(token)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(key.to_string()));
        }

        let response = check(response).await?;
        let len = response.content_length();
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed();
        Ok((stream, len))
    }
}

/// Build a V4 signed GET URL for `bucket/object`.
fn sign_v4(
    client_email: &str,
    signer: &EncodingKey,
    bucket: &str,
    object: &str,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<String, StorageError> {
    let expires = ttl.as_secs().clamp(1, MAX_SIGNED_URL_SECS);
    let datestamp = now.format("%Y%m%d").to_string();
    let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
    let scope = format!("{}/auto/storage/goog4_request", datestamp);
    let canonical_uri = format!("/{}/{}", bucket, encode_key(object));

    // Already in sorted key order.
    let params = [
        ("X-Goog-Algorithm", "GOOG4-RSA-SHA256".to_string()),
        ("X-Goog-Credential", format!("{}/{}", client_email, scope)),
        ("X-Goog-Date", timestamp.clone()),
        ("X-Goog-Expires", expires.to_string()),
        ("X-Goog-SignedHeaders", "host".to_string()),
    ];
    let canonical_query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let canonical_request = format!(
        "GET\n{}\n{}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
        canonical_uri, canonical_query, STORAGE_HOST
    );
    let string_to_sign = format!(
        "GOOG4-RSA-SHA256\n{}\n{}\n{}",
        timestamp,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let signature = jsonwebtoken::crypto::sign(string_to_sign.as_bytes(), signer, Algorithm::RS256)
        .map_err(|e| StorageError::Signing(e.to_string()))?;
    let signature = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|e| StorageError::Signing(e.to_string()))?;

    Ok(format!(
        "https://{}{}?{}&X-Goog-Signature={}",
        STORAGE_HOST,
        canonical_uri,
        canonical_query,
        hex::encode(signature)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use futures::TryStreamExt;
    use wiremock::matchers::{body_bytes, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY_JSON: &str = include_str!("../../tests/fixtures/service-account.json");
    const PUBLIC_PEM: &str = include_str!("../../tests/fixtures/service-account.pub.pem");

    fn keyed_store() -> GcsObjectStore {
        GcsObjectStore::from_key_json(reqwest::Client::new(), "podcasts", KEY_JSON).unwrap()
    }

    #[test]
    fn test_bad_key_is_auth_error() {
        let result = GcsObjectStore::from_key_json(
            reqwest::Client::new(),
            "b",
            r#"{"client_email":"x@y","private_key":"not a pem"}"#,
        );
        assert!(matches!(result, Err(StorageError::Auth(_))));
    }

    #[test]
    fn test_sign_v4_shape_and_signature() {
        let store = keyed_store();
        let Credentials::ServiceAccount { key, signer } = &store.credentials else {
            panic!("expected service account credentials");
        };
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap();
        let url = sign_v4(
            &key.client_email,
            signer,
            "podcasts",
            "medcast/job 1/output.wav",
            Duration::from_secs(3600),
            now,
        )
        .unwrap();

        assert!(url.starts_with("https://storage.googleapis.com/podcasts/medcast/job%201/output.wav?"));
        assert!(url.contains("X-Goog-Date=20250301T123000Z"));
        assert!(url.contains("X-Goog-Expires=3600"));
        assert!(url.contains("%2F20250301%2Fauto%2Fstorage%2Fgoog4_request"));

        let (unsigned, signature_hex) = url.split_once("&X-Goog-Signature=").unwrap();
        let signature = hex::decode(signature_hex).unwrap();
        assert_eq!(signature.len(), 256);

        // Recompute the string-to-sign and check it against the public key.
        let query = unsigned.split_once('?').unwrap().1;
        let canonical_request = format!(
            "GET\n/podcasts/medcast/job%201/output.wav\n{}\nhost:storage.googleapis.com\n\nhost\nUNSIGNED-PAYLOAD",
            query
        );
        let string_to_sign = format!(
            "GOOG4-RSA-SHA256\n20250301T123000Z\n20250301/auto/storage/goog4_request\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );
        let decoding = jsonwebtoken::DecodingKey::from_rsa_pem(PUBLIC_PEM.as_bytes()).unwrap();
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&signature);
        assert!(jsonwebtoken::crypto::verify(
            &encoded,
            string_to_sign.as_bytes(),
            &decoding,
            Algorithm::RS256
        )
        .unwrap());
    }

    #[test]
    fn test_expiry_is_capped() {
        let store = keyed_store();
        let Credentials::ServiceAccount { key, signer } = &store.credentials else {
            panic!("expected service account credentials");
        };
        let url = sign_v4(
            &key.client_email,
            signer,
            "b",
            "k.wav",
            Duration::from_secs(30 * 24 * 3600),
            Utc::now(),
        )
        .unwrap();
        assert!(url.contains("X-Goog-Expires=604800"));
    }

    #[tokio::test]
    async fn test_signed_url_needs_key() {
        let store = GcsObjectStore::from_access_token(reqwest::Client::new(), "b", "t");
        let result = store.signed_url("k", Duration::from_secs(60)).await;
        assert!(matches!(result, Err(StorageError::Signing(_))));
    }

    #[tokio::test]
    async fn test_put_uploads_media() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/storage/v1/b/podcasts/o"))
            .and(query_param("uploadType", "media"))
            .and(query_param("name", "medcast/j/output.wav"))
            .and(header("authorization", "Bearer test-token"))
            .and(header("content-type", "audio/wav"))
            .and(body_bytes(b"RIFF".to_vec()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "medcast/j/output.wav"})))
            .expect(1)
            .mount(&server)
            .await;

        let store = GcsObjectStore::from_access_token(reqwest::Client::new(), "podcasts", "test-token")
            .with_api_base(server.uri());
        store
            .put("medcast/j/output.wav", Bytes::from_static(b"RIFF"), "audio/wav")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_make_public_rejected_by_policy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/b/podcasts/o/medcast%2Fj%2Foutput.wav/acl"))
            .respond_with(ResponseTemplate::new(400).set_body_string("uniform bucket-level access is enabled"))
            .mount(&server)
            .await;

        let store = GcsObjectStore::from_access_token(reqwest::Client::new(), "podcasts", "t")
            .with_api_base(server.uri());
        let err = store.make_public("medcast/j/output.wav").await.unwrap_err();
        assert!(matches!(err, StorageError::Http { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_list_follows_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/podcasts/o"))
            .and(query_param("prefix", "medcast/j/"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"name": "medcast/j/b.wav"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/podcasts/o"))
            .and(query_param("prefix", "medcast/j/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"name": "medcast/j/a.wav"}],
                "nextPageToken": "p2"
            })))
            .mount(&server)
            .await;

        let store = GcsObjectStore::from_access_token(reqwest::Client::new(), "podcasts", "t")
            .with_api_base(server.uri());
        let names = store.list("medcast/j/").await.unwrap();
        assert_eq!(names, vec!["medcast/j/a.wav", "medcast/j/b.wav"]);
    }

    #[tokio::test]
    async fn test_get_streams_and_maps_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/podcasts/o/medcast%2Fj%2Fa.wav"))
            .and(query_param("alt", "media"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"RIFFdata".to_vec()))
            .mount(&server)
            .await;

        let store = GcsObjectStore::from_access_token(reqwest::Client::new(), "podcasts", "t")
            .with_api_base(server.uri());
        let (stream, len) = store.get("medcast/j/a.wav").await.unwrap();
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"RIFFdata");
        assert_eq!(len, Some(8));

        assert!(matches!(
            store.get("medcast/j/missing.wav").await,
            Err(StorageError::NotFound(_))
        ));
    }
}

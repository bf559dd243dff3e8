//! Config sections. Every field has a serde default so partial files work.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Transport selection and HTTP binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port for `/mcp`, `/health` and the download route.
    /// Default: 3333
    #[serde(default = "ServerConfig::default_http_port")]
    pub http_port: u16,

    /// Serve MCP over HTTP.
    #[serde(default)]
    pub http: bool,

    /// Serve MCP over stdin/stdout.
    #[serde(default)]
    pub stdio: bool,

    /// Externally reachable base URL of this server, used to build stable
    /// download links (`<base>/files/medcast/<jobId>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,
}

impl ServerConfig {
    fn default_http_port() -> u16 {
        3333
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: Self::default_http_port(),
            http: false,
            stdio: false,
            public_base_url: None,
        }
    }
}

/// Upstream service URLs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "EndpointsConfig::default_sig")]
    pub sig: String,

    #[serde(default = "EndpointsConfig::default_ndc")]
    pub ndc: String,

    /// Base URL; `/generate_podcast` is appended.
    #[serde(default = "EndpointsConfig::default_medcast_base")]
    pub medcast_base: String,

    #[serde(default = "EndpointsConfig::default_pill")]
    pub pill: String,
}

impl EndpointsConfig {
    fn default_sig() -> String {
        "https://normalizesig-z4vamvc43a-uc.a.run.app".to_string()
    }

    fn default_ndc() -> String {
        "https://ndcanalysis.scriptability.net/ndc_descriptor.php".to_string()
    }

    fn default_medcast_base() -> String {
        "https://medcast.scriptability.net".to_string()
    }

    fn default_pill() -> String {
        "https://picanalysis.scriptability.net/analyze".to_string()
    }
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            sig: Self::default_sig(),
            ndc: Self::default_ndc(),
            medcast_base: Self::default_medcast_base(),
            pill: Self::default_pill(),
        }
    }
}

/// Podcast job behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedcastConfig {
    /// Where WAVs land when no bucket is configured and the caller gives no
    /// `outputDir`. Relative paths resolve against the working directory.
    #[serde(default = "MedcastConfig::default_output_dir")]
    pub output_dir: PathBuf,

    /// Upstream generation timeout.
    /// Default: 180
    #[serde(default = "MedcastConfig::default_timeout_secs")]
    pub timeout_secs: u64,

    /// Wait applied to every call that does not pass `waitMs`.
    /// Default: 0 (return the job id immediately)
    #[serde(default)]
    pub auto_wait_ms: u64,

    /// Upper bound for any single wait.
    /// Default: 300000
    #[serde(default = "MedcastConfig::default_max_wait_ms")]
    pub max_wait_ms: u64,
}

impl MedcastConfig {
    fn default_output_dir() -> PathBuf {
        PathBuf::from("mcp_outputs/medcast")
    }

    fn default_timeout_secs() -> u64 {
        180
    }

    fn default_max_wait_ms() -> u64 {
        300_000
    }
}

impl Default for MedcastConfig {
    fn default() -> Self {
        Self {
            output_dir: Self::default_output_dir(),
            timeout_secs: Self::default_timeout_secs(),
            auto_wait_ms: 0,
            max_wait_ms: Self::default_max_wait_ms(),
        }
    }
}

/// Remote artifact storage. Local disk is used when `bucket` is unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    /// Key prefix; objects land at `<prefix>/<jobId>/output-<ts>.wav`.
    #[serde(default = "StorageConfig::default_object_prefix")]
    pub object_prefix: String,

    /// Lifetime of signed download URLs.
    /// Default: 3600
    #[serde(default = "StorageConfig::default_signed_url_expires_secs")]
    pub signed_url_expires_secs: u64,

    /// Try to make uploaded objects world-readable.
    #[serde(default)]
    pub public_read: bool,

    /// Serve downloads as `attachment` instead of `inline`.
    #[serde(default)]
    pub force_attachment: bool,

    /// Service-account key JSON. Falls back to `GOOGLE_APPLICATION_CREDENTIALS`,
    /// then the metadata server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<PathBuf>,
}

impl StorageConfig {
    fn default_object_prefix() -> String {
        "medcast".to_string()
    }

    fn default_signed_url_expires_secs() -> u64 {
        3600
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            object_prefix: Self::default_object_prefix(),
            signed_url_expires_secs: Self::default_signed_url_expires_secs(),
            public_read: false,
            force_attachment: false,
            credentials_file: None,
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint. Export is off when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp_endpoint: Option<String>,

    /// Filter directive (trace, debug, info, warn, error, or a full
    /// `EnvFilter` string).
    /// Default: info,scriptability_mcp=debug
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info,scriptability_mcp=debug".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: Self::default_log_level(),
        }
    }
}

//! Configuration loading for the ScriptAbility MCP server.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, key by key):
//! 1. `/etc/scriptability/config.toml` (system)
//! 2. `~/.config/scriptability/config.toml` (user)
//! 3. `./scriptability-mcp.toml` or the `--config` path (local override)
//! 4. Environment variables (`MCP_*`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [server]
//! http = true
//! http_port = 3333
//! public_base_url = "https://mcp.scriptability.net"
//!
//! [medcast]
//! output_dir = "~/medcast"
//! auto_wait_ms = 0
//!
//! [storage]
//! bucket = "scriptability-medcast"
//! object_prefix = "medcast"
//! signed_url_expires_secs = 3600
//!
//! [telemetry]
//! otlp_endpoint = "127.0.0.1:4317"
//! log_level = "info,scriptability_mcp=debug"
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};
pub use sections::{EndpointsConfig, MedcastConfig, ServerConfig, StorageConfig, TelemetryConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete server configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub endpoints: EndpointsConfig,

    #[serde(default)]
    pub medcast: MedcastConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl ScriptConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, with `config_path` replacing the local override file.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let origin = sources
            .files
            .last()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("<defaults>"));
        let mut config = loader::from_table(merged, &origin)?;

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let body = toml::to_string_pretty(self).unwrap_or_default();
        format!("# ScriptAbility MCP configuration\n\n{}", body)
    }
}

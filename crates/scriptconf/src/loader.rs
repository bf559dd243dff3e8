//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, ScriptConfig};
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// Returns existing paths in load order: system, user, then the CLI path if
/// given and present, else `./scriptability-mcp.toml`.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/scriptability/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("scriptability/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("scriptability-mcp.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read one file as a raw TOML table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base`. Nested tables merge key by key; any other
/// value in the overlay replaces the base value.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Turn a merged table into typed config, filling gaps with defaults.
pub fn from_table(table: toml::Table, origin: &Path) -> Result<ScriptConfig, ConfigError> {
    let mut config: ScriptConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;

    config.medcast.output_dir = expand_path(&config.medcast.output_dir.to_string_lossy());
    if let Some(creds) = config.storage.credentials_file.take() {
        config.storage.credentials_file = Some(expand_path(&creds.to_string_lossy()));
    }
    Ok(config)
}

/// Apply environment variable overrides from the process environment.
pub fn apply_env_overrides(config: &mut ScriptConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| std::env::var(key).ok());
}

/// Apply overrides from any key lookup. Values that fail to parse are ignored.
pub fn apply_overrides_from<F>(config: &mut ScriptConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let mut take = |key: &str| {
        let value = lookup(key).filter(|v| !v.trim().is_empty());
        if value.is_some() {
            sources.env_overrides.push(key.to_string());
        }
        value
    };

    // Server
    if let Some(port) = take("MCP_PORT").and_then(|v| v.trim().parse().ok()) {
        config.server.http_port = port;
    }
    if let Some(v) = take("MCP_HTTP") {
        config.server.http = parse_flag(&v);
    }
    if let Some(v) = take("MCP_STDIO") {
        config.server.stdio = parse_flag(&v);
    }
    if let Some(v) = take("MCP_PUBLIC_BASE_URL") {
        config.server.public_base_url = Some(v.trim_end_matches('/').to_string());
    }

    // Storage
    if let Some(v) = take("MCP_OUTPUT_BUCKET") {
        config.storage.bucket = Some(v);
    }
    if let Some(v) = take("MCP_OUTPUT_OBJECT_PREFIX") {
        config.storage.object_prefix = v.trim_matches('/').to_string();
    }
    if let Some(secs) = take("MCP_SIGNED_URL_EXPIRES_SEC").and_then(|v| v.trim().parse().ok()) {
        config.storage.signed_url_expires_secs = secs;
    }
    if let Some(v) = take("MCP_PUBLIC_READ") {
        config.storage.public_read = parse_flag(&v);
    }
    if let Some(v) = take("MCP_FORCE_ATTACHMENT") {
        config.storage.force_attachment = parse_flag(&v);
    }
    if let Some(v) = take("GOOGLE_APPLICATION_CREDENTIALS") {
        if config.storage.credentials_file.is_none() {
            config.storage.credentials_file = Some(expand_path(&v));
        }
    }

    // Medcast
    if let Some(ms) = take("MCP_AUTO_WAIT_MS").and_then(|v| v.trim().parse().ok()) {
        config.medcast.auto_wait_ms = ms;
    }
    if let Some(v) = take("MCP_OUTPUT_DIR") {
        config.medcast.output_dir = expand_path(&v);
    }
    if let Some(secs) = take("MCP_MEDCAST_TIMEOUT_SEC").and_then(|v| v.trim().parse().ok()) {
        config.medcast.timeout_secs = secs;
    }

    // Endpoints
    if let Some(v) = take("MCP_SIG_ENDPOINT") {
        config.endpoints.sig = v;
    }
    if let Some(v) = take("MCP_NDC_ENDPOINT") {
        config.endpoints.ndc = v;
    }
    if let Some(v) = take("MCP_MEDCAST_BASE") {
        config.endpoints.medcast_base = v.trim_end_matches('/').to_string();
    }
    if let Some(v) = take("MCP_PILL_ENDPOINT") {
        config.endpoints.pill = v;
    }

    // Telemetry
    if let Some(v) = take("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(v);
    }
    if let Some(v) = take("RUST_LOG") {
        config.telemetry.log_level = v;
    }
}

/// `1`, `true`, `yes` and `on` (any case) are true.
fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
        return PathBuf::from(path);
    }

    if let Some(stripped) = path.strip_prefix('$') {
        let (var_name, rest) = match stripped.find('/') {
            Some(pos) => (&stripped[..pos], Some(&stripped[pos + 1..])),
            None => (stripped, None),
        };
        return match (std::env::var(var_name), rest) {
            (Ok(value), Some(rest)) => PathBuf::from(value).join(rest),
            (Ok(value), None) => PathBuf::from(value),
            (Err(_), _) => PathBuf::from(path),
        };
    }

    PathBuf::from(path)
}

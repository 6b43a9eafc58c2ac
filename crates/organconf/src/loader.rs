//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, OrganConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/organist/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("organist/config.toml");
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

    let local = PathBuf::from("organist.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file into a raw table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Merge `overlay` into `base`. Nested tables merge key by key; any other
/// value in `overlay` replaces the one in `base`.
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

/// Build a config from a merged table, filling gaps with defaults.
pub fn config_from_table(table: toml::Table, origin: &Path) -> Result<OrganConfig, ConfigError> {
    let mut config: OrganConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;

    config.paths.upload_dir = expand_path(&config.paths.upload_dir.to_string_lossy());
    config.paths.results_dir = expand_path(&config.paths.results_dir.to_string_lossy());

    Ok(config)
}

/// Parse a single TOML document into a config.
pub fn parse_toml(contents: &str, path: &Path) -> Result<OrganConfig, ConfigError> {
    config_from_table(parse_table(contents, path)?, path)
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut OrganConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Apply overrides from any key lookup. `apply_env_overrides` uses the
/// process environment.
pub fn apply_overrides_from<F>(config: &mut OrganConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let mut take = |key: &str| {
        let value = lookup(key);
        if value.is_some() {
            sources.env_overrides.push(key.to_string());
        }
        value
    };

    // Paths
    if let Some(v) = take("ORGANIST_UPLOAD_DIR") {
        config.paths.upload_dir = expand_path(&v);
    }
    if let Some(v) = take("ORGANIST_RESULTS_DIR") {
        config.paths.results_dir = expand_path(&v);
    }

    // Bind
    if let Some(v) = take("ORGANIST_HOST") {
        config.bind.host = v;
    }
    if let Some(port) = take("ORGANIST_HTTP_PORT").and_then(|v| v.parse().ok()) {
        config.bind.http_port = port;
    }

    // Telemetry
    if let Some(v) = take("ORGANIST_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = v;
    }
    // Also support standard OTEL env var
    if let Some(v) = take("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = v;
    }
    if let Some(v) = take("ORGANIST_LOG_LEVEL") {
        config.telemetry.log_level = v;
    }
    if let Some(v) = take("RUST_LOG") {
        config.telemetry.log_level = v;
    }

    // Tools
    if let Some(v) = take("ORGANIST_SEPARATOR") {
        config.tools.separator = v;
    }
    if let Some(v) = take("ORGANIST_SEPARATOR_MODEL") {
        config.tools.separator_model = v;
    }
    if let Some(v) = take("ORGANIST_TRANSCRIBER") {
        config.tools.transcriber = v;
    }
    if let Some(secs) = take("ORGANIST_STEP_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.tools.step_timeout_secs = secs;
    }

    // Jobs
    if let Some(n) = take("ORGANIST_MAX_CONCURRENT_JOBS").and_then(|v| v.parse().ok()) {
        config.jobs.max_concurrent_jobs = n;
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // Handle $VAR/rest/of/path
        let (var_name, rest) = match stripped.find('/') {
            Some(pos) => (&stripped[..pos], Some(&stripped[pos + 1..])),
            None => (stripped, None),
        };
        if let Ok(var_value) = env::var(var_name) {
            let base = PathBuf::from(var_value);
            return match rest {
                Some(rest) => base.join(rest),
                None => base,
            };
        }
    }

    PathBuf::from(path)
}

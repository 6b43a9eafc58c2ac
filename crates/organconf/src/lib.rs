//! Minimal configuration loading for organist.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, key by key):
//! 1. `/etc/organist/config.toml` (system)
//! 2. `~/.config/organist/config.toml` (user)
//! 3. `./organist.toml` (local override), or the path given on the command line
//! 4. Environment variables (`ORGANIST_*`, `RUST_LOG`, `OTEL_EXPORTER_OTLP_ENDPOINT`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! upload_dir = "/app/data/uploads"
//! results_dir = "/app/data/results"
//!
//! [bind]
//! host = "0.0.0.0"
//! http_port = 5000
//!
//! [telemetry]
//! otlp_endpoint = "127.0.0.1:4317"
//! log_level = "info"
//!
//! [tools]
//! separator = "demucs"
//! separator_model = "htdemucs"
//! transcriber = "basic-pitch"
//! step_timeout_secs = 0
//!
//! [jobs]
//! max_concurrent_jobs = 2
//! max_upload_bytes = 104857600
//! ```

pub mod infra;
pub mod loader;
pub mod pipeline;

pub use infra::{BindConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};
pub use pipeline::{JobsConfig, ToolsConfig};

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

/// Complete organist configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OrganConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub jobs: JobsConfig,
}

impl OrganConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` replace `./organist.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut table = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::merge_tables(&mut table, loader::load_table(&path)?);
            sources.files.push(path);
        }

        let origin = sources
            .files
            .last()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("<defaults>"));
        let mut config = loader::config_from_table(table, &origin)?;

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# organist configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "upload_dir = \"{}\"\n",
            self.paths.upload_dir.display()
        ));
        output.push_str(&format!(
            "results_dir = \"{}\"\n",
            self.paths.results_dir.display()
        ));

        output.push_str("\n[bind]\n");
        output.push_str(&format!("host = \"{}\"\n", self.bind.host));
        output.push_str(&format!("http_port = {}\n", self.bind.http_port));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "otlp_endpoint = \"{}\"\n",
            self.telemetry.otlp_endpoint
        ));
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output.push_str("\n[tools]\n");
        output.push_str(&format!("separator = \"{}\"\n", self.tools.separator));
        output.push_str(&format!(
            "separator_model = \"{}\"\n",
            self.tools.separator_model
        ));
        output.push_str(&format!("transcriber = \"{}\"\n", self.tools.transcriber));
        output.push_str(&format!(
            "step_timeout_secs = {}\n",
            self.tools.step_timeout_secs
        ));

        output.push_str("\n[jobs]\n");
        output.push_str(&format!(
            "max_concurrent_jobs = {}\n",
            self.jobs.max_concurrent_jobs
        ));
        output.push_str(&format!(
            "max_upload_bytes = {}\n",
            self.jobs.max_upload_bytes
        ));
        output.push_str(&format!("require_stems = {}\n", self.jobs.require_stems));

        output
    }
}

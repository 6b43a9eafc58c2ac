//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem locations for uploads and job output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Where accepted uploads are persisted until their job finishes.
    /// Default: ~/.local/share/organist/uploads
    #[serde(default = "PathsConfig::default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Root of the per-job `{job_id}/stems` and `{job_id}/midi` trees.
    /// Default: ~/.local/share/organist/results
    #[serde(default = "PathsConfig::default_results_dir")]
    pub results_dir: PathBuf,
}

impl PathsConfig {
    fn data_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.data_dir().join("organist"))
            .unwrap_or_else(|| PathBuf::from(".local/share/organist"))
    }

    fn default_upload_dir() -> PathBuf {
        Self::data_dir().join("uploads")
    }

    fn default_results_dir() -> PathBuf {
        Self::data_dir().join("results")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            upload_dir: Self::default_upload_dir(),
            results_dir: Self::default_results_dir(),
        }
    }
}

/// HTTP bind address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindConfig {
    /// Default: 0.0.0.0
    #[serde(default = "BindConfig::default_host")]
    pub host: String,

    /// Default: 5000
    #[serde(default = "BindConfig::default_http_port")]
    pub http_port: u16,
}

impl BindConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_http_port() -> u16 {
        5000
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            http_port: Self::default_http_port(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint for OpenTelemetry, e.g. "127.0.0.1:4317".
    /// Empty disables export; logs still go to stderr.
    #[serde(default)]
    pub otlp_endpoint: String,

    /// Log filter (trace, debug, info, warn, error, or a full EnvFilter directive).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }

    pub fn otlp_enabled(&self) -> bool {
        !self.otlp_endpoint.trim().is_empty()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: String::new(),
            log_level: Self::default_log_level(),
        }
    }
}

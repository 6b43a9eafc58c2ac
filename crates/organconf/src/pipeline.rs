//! External tool and job scheduling settings.

use serde::{Deserialize, Serialize};

/// External separator and transcriber commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Source separation executable.
    /// Default: demucs
    #[serde(default = "ToolsConfig::default_separator")]
    pub separator: String,

    /// Separation model; also names the separator's output subdirectory.
    /// Default: htdemucs
    #[serde(default = "ToolsConfig::default_separator_model")]
    pub separator_model: String,

    /// Pitch transcription executable.
    /// Default: basic-pitch
    #[serde(default = "ToolsConfig::default_transcriber")]
    pub transcriber: String,

    /// Per-invocation time limit in seconds. 0 means no limit.
    #[serde(default)]
    pub step_timeout_secs: u64,
}

impl ToolsConfig {
    fn default_separator() -> String {
        "demucs".to_string()
    }

    fn default_separator_model() -> String {
        "htdemucs".to_string()
    }

    fn default_transcriber() -> String {
        "basic-pitch".to_string()
    }

    pub fn step_timeout(&self) -> Option<std::time::Duration> {
        (self.step_timeout_secs > 0).then(|| std::time::Duration::from_secs(self.step_timeout_secs))
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            separator: Self::default_separator(),
            separator_model: Self::default_separator_model(),
            transcriber: Self::default_transcriber(),
            step_timeout_secs: 0,
        }
    }
}

/// Job admission and merge policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Jobs allowed to run external tools at once; the rest wait queued.
    /// Default: 2
    #[serde(default = "JobsConfig::default_max_concurrent_jobs")]
    pub max_concurrent_jobs: u32,

    /// Upload size limit in bytes.
    /// Default: 100 MiB
    #[serde(default = "JobsConfig::default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Treat a merge with no stem MIDI files as a failure instead of
    /// writing an empty score.
    #[serde(default)]
    pub require_stems: bool,
}

impl JobsConfig {
    fn default_max_concurrent_jobs() -> u32 {
        2
    }

    fn default_max_upload_bytes() -> usize {
        100 * 1024 * 1024
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: Self::default_max_concurrent_jobs(),
            max_upload_bytes: Self::default_max_upload_bytes(),
            require_stems: false,
        }
    }
}

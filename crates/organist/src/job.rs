//! Job records as served to polling clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque job identifier: a random (v4) UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    /// Only canonical UUIDs are accepted, which keeps ids safe to use as
    /// directory names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(|u| Self(u.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }
}

/// Pipeline stage of a processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Separating,
    Transcribing,
    Merging,
}

/// Output of a completed job. Paths are absolute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultBundle {
    pub track_name: String,
    /// Stem name → separated audio
    pub stems: BTreeMap<String, PathBuf>,
    /// Stem name → transcribed MIDI
    pub midi_files: BTreeMap<String, PathBuf>,
    pub combined_midi: PathBuf,
}

/// The status record for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<ResultBundle>,
}

impl JobRecord {
    pub fn queued() -> Self {
        Self {
            status: JobStatus::Queued,
            progress: 0,
            message: "Waiting for a free worker...".to_string(),
            stage: None,
            started_at: None,
            completed_at: None,
            error_at: None,
            results: None,
        }
    }

    pub fn processing() -> Self {
        Self {
            status: JobStatus::Processing,
            progress: 0,
            message: "Starting audio separation...".to_string(),
            stage: None,
            started_at: Some(Utc::now()),
            completed_at: None,
            error_at: None,
            results: None,
        }
    }

    /// Next checkpoint of a processing record. Progress never moves backwards.
    pub fn advanced(&self, progress: u8, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Processing,
            progress: progress.max(self.progress).min(100),
            message: message.into(),
            stage: Some(stage),
            ..self.clone()
        }
    }

    pub fn completed(&self, results: ResultBundle) -> Self {
        Self {
            status: JobStatus::Completed,
            progress: 100,
            message: "Processing completed successfully!".to_string(),
            stage: None,
            started_at: self.started_at,
            completed_at: Some(Utc::now()),
            error_at: None,
            results: Some(results),
        }
    }

    pub fn failed(&self, cause: impl std::fmt::Display) -> Self {
        Self {
            status: JobStatus::Error,
            progress: self.progress,
            message: format!("Error: {cause}"),
            stage: self.stage,
            started_at: self.started_at,
            completed_at: None,
            error_at: Some(Utc::now()),
            results: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Seconds since the job started, up to its terminal timestamp.
    pub fn duration_secs(&self) -> Option<i64> {
        let started = self.started_at?;
        let end = self.completed_at.or(self.error_at).unwrap_or_else(Utc::now);
        Some((end - started).num_seconds())
    }
}

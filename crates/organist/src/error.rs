use crate::external::ToolError;
use crate::job::JobId;
use thiserror::Error;

/// Errors raised while accepting or running a job.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// User-correctable upload problem; no job is created.
    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error("{tool} failed on {file}: {source}")]
    ExternalTool {
        tool: String,
        file: String,
        #[source]
        source: ToolError,
    },

    #[error("merge failed: {0}")]
    Merge(#[from] organ_score::Error),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("job already exists: {0}")]
    JobExists(JobId),

    #[error("job already finished: {0}")]
    JobTerminal(JobId),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn io_at(action: &str, path: &std::path::Path, source: std::io::Error) -> Self {
        Self::io(format!("failed to {action} {}", path.display()), source)
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

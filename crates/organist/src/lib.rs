//! Organist - audio to pipe-organ MIDI service
//!
//! Library exposing the job pipeline and web surface for the binary and tests.

pub mod error;
pub mod external;
pub mod job;
pub mod job_system;
pub mod metrics;
pub mod orchestrator;
pub mod telemetry;
pub mod web;
pub mod worker;

pub use error::{PipelineError, Result};
pub use job::{JobId, JobRecord, JobStatus, ResultBundle, Stage};
pub use job_system::{JobStore, JobStoreStats};
pub use orchestrator::{JobRequest, Orchestrator};
pub use worker::JobRunner;

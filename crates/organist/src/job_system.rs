//! Job registry
//!
//! Process-wide map from job id to the job's latest status record. Cloned
//! into both the web layer (readers) and the orchestrator (single writer per
//! job). Entries live for the lifetime of the process.

use crate::error::{PipelineError, Result};
use crate::job::{JobId, JobRecord, JobStatus};
use crate::metrics::JobMetrics;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Per-status job counts, served by `/health`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStoreStats {
    pub total: usize,
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub error: usize,
}

/// Storage for job status records
#[derive(Clone)]
pub struct JobStore {
    jobs: Arc<Mutex<HashMap<JobId, JobRecord>>>,
    metrics: JobMetrics,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    /// Store reporting to the global meter provider; create it after telemetry init.
    pub fn new() -> Self {
        Self::with_metrics(JobMetrics::global())
    }

    pub fn with_metrics(metrics: JobMetrics) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            metrics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, JobRecord>> {
        // A panicking writer leaves whole records behind, never torn ones
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new job. Never overwrites an existing entry.
    pub fn create(&self, job_id: &JobId, record: JobRecord) -> Result<()> {
        let mut jobs = self.lock();
        if jobs.contains_key(job_id) {
            return Err(PipelineError::JobExists(job_id.clone()));
        }

        tracing::info!(
            job.id = %job_id,
            job.status = ?record.status,
            "Job created"
        );

        self.metrics.job_created(&record);
        jobs.insert(job_id.clone(), record);
        Ok(())
    }

    /// Replace a job's record. Terminal records are final.
    pub fn update(&self, job_id: &JobId, record: JobRecord) -> Result<()> {
        let mut jobs = self.lock();
        let current = jobs
            .get_mut(job_id)
            .ok_or_else(|| PipelineError::JobNotFound(job_id.clone()))?;

        if current.is_terminal() {
            return Err(PipelineError::JobTerminal(job_id.clone()));
        }

        match record.status {
            JobStatus::Completed => tracing::info!(
                job.id = %job_id,
                job.duration_secs = ?record.duration_secs(),
                "Job completed successfully"
            ),
            JobStatus::Error => tracing::error!(
                job.id = %job_id,
                job.duration_secs = ?record.duration_secs(),
                job.error = %record.message,
                "Job failed"
            ),
            _ => tracing::debug!(
                job.id = %job_id,
                job.status = ?record.status,
                job.progress = record.progress,
                job.message = %record.message,
                "Job updated"
            ),
        }

        self.metrics.job_finished(&record);
        *current = record;
        Ok(())
    }

    /// Snapshot of a job's current record
    pub fn get(&self, job_id: &JobId) -> Result<JobRecord> {
        self.lock()
            .get(job_id)
            .cloned()
            .ok_or_else(|| PipelineError::JobNotFound(job_id.clone()))
    }

    /// List all jobs
    pub fn list(&self) -> Vec<(JobId, JobRecord)> {
        self.lock()
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    /// Get job store statistics for monitoring
    pub fn stats(&self) -> JobStoreStats {
        let jobs = self.lock();
        let mut stats = JobStoreStats::default();

        for record in jobs.values() {
            stats.total += 1;
            match record.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Error => stats.error += 1,
            }
        }

        stats
    }
}

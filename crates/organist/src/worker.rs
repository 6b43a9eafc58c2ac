use crate::error::Result;
use crate::job::{JobId, JobRecord};
use crate::job_system::JobStore;
use crate::orchestrator::{remove_input, JobRequest, Orchestrator};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Starts jobs in the background, at most `max_concurrent_jobs` at a time.
///
/// Submitters never wait for a job; they poll the [`JobStore`] instead.
#[derive(Clone)]
pub struct JobRunner {
    orchestrator: Orchestrator,
    permits: Arc<Semaphore>,
    max_concurrent_jobs: usize,
}

impl JobRunner {
    pub fn new(orchestrator: Orchestrator, max_concurrent_jobs: usize) -> Self {
        let max_concurrent_jobs = max_concurrent_jobs.max(1);
        Self {
            orchestrator,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs)),
            max_concurrent_jobs,
        }
    }

    pub fn store(&self) -> &JobStore {
        self.orchestrator.store()
    }

    pub fn max_concurrent_jobs(&self) -> usize {
        self.max_concurrent_jobs
    }

    /// Jobs running right now
    pub fn active_jobs(&self) -> usize {
        self.max_concurrent_jobs - self.permits.available_permits()
    }

    /// Register `job_id` and start it as soon as a worker slot is free.
    ///
    /// When a slot is free the job is already `processing` once this returns;
    /// otherwise it waits as `queued`.
    pub fn submit(&self, job_id: JobId, request: JobRequest) -> Result<JoinHandle<()>> {
        let orchestrator = self.orchestrator.clone();

        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => {
                self.store().create(&job_id, JobRecord::processing())?;
                tracing::info!(job.id = %job_id, "Job accepted");

                Ok(tokio::spawn(async move {
                    let _permit = permit;
                    run_to_terminal(orchestrator, job_id, request).await;
                }))
            }
            Err(_) => {
                self.store().create(&job_id, JobRecord::queued())?;
                tracing::info!(job.id = %job_id, "Job queued, all workers busy");

                let permits = self.permits.clone();
                Ok(tokio::spawn(async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        tracing::error!(job.id = %job_id, "Worker pool closed, job dropped");
                        let _ = orchestrator
                            .store()
                            .update(&job_id, JobRecord::queued().failed("worker pool shut down"));
                        return;
                    };
                    run_to_terminal(orchestrator, job_id, request).await;
                }))
            }
        }
    }
}

/// Run the job on its own task so a panicking tool still ends in `error`.
async fn run_to_terminal(orchestrator: Orchestrator, job_id: JobId, request: JobRequest) {
    let store = orchestrator.store().clone();
    let input = request.input.clone();
    let delete_input = request.delete_input;

    let task_id = job_id.clone();
    let joined = tokio::spawn(async move { orchestrator.run(&task_id, request).await }).await;

    let Err(join_err) = joined else {
        return;
    };

    let cause = if join_err.is_panic() {
        "worker panicked"
    } else {
        "worker cancelled"
    };
    tracing::error!(job.id = %job_id, error = %join_err, "Job worker died");

    match store.get(&job_id) {
        Ok(record) if !record.is_terminal() => {
            if let Err(e) = store.update(&job_id, record.failed(cause)) {
                tracing::warn!(job.id = %job_id, error = %e, "Could not record job failure");
            }
        }
        _ => {}
    }

    if delete_input {
        remove_input(&input).await;
    }
}

//! Job orchestration
//!
//! Runs one job end to end: separate → transcribe(drums, bass, vocals,
//! other) → merge. Each checkpoint overwrites the job's record in the
//! [`JobStore`]; any failure is caught here and recorded as the job's
//! terminal `error` state.

use crate::error::{PipelineError, Result};
use crate::external::{
    BasicPitchTranscriber, DemucsSeparator, ProcessRunner, StemFiles, StemSeparator, Transcriber,
};
use crate::job::{JobId, JobRecord, JobStatus, ResultBundle, Stage};
use crate::job_system::JobStore;
use organ_score::{merge_to_file, MergeOptions, Stem};
use organconf::{JobsConfig, ToolsConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What to process and where to put it.
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// Audio file to separate
    pub input: PathBuf,
    /// Name the user knows the file by; the track name derives from it
    pub original_filename: String,
    /// Receives `stems/` and `midi/`
    pub job_dir: PathBuf,
    /// Remove `input` once the job reaches a terminal state
    pub delete_input: bool,
    /// Skip separation when `stems/` already holds all four stems
    pub reuse_existing_stems: bool,
}

impl JobRequest {
    /// A web upload: results under `{results_dir}/{job_id}`, input deleted afterwards.
    pub fn upload(
        input: PathBuf,
        original_filename: impl Into<String>,
        results_dir: &Path,
        job_id: &JobId,
    ) -> Self {
        Self {
            input,
            original_filename: original_filename.into(),
            job_dir: results_dir.join(job_id.as_str()),
            delete_input: true,
            reuse_existing_stems: false,
        }
    }

    pub fn track_name(&self) -> String {
        Path::new(&self.original_filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.original_filename.clone())
    }

    pub fn stems_dir(&self) -> PathBuf {
        self.job_dir.join("stems")
    }

    pub fn midi_dir(&self) -> PathBuf {
        self.job_dir.join("midi")
    }

    /// The same request with `input` and `job_dir` resolved against the
    /// working directory.
    pub fn absolutized(&self) -> Result<Self> {
        let absolute = |path: &Path| {
            std::path::absolute(path).map_err(|e| PipelineError::io_at("resolve", path, e))
        };
        Ok(Self {
            input: absolute(&self.input)?,
            job_dir: absolute(&self.job_dir)?,
            ..self.clone()
        })
    }
}

/// Where a separated stem is kept for download.
pub fn stem_output_path(stems_dir: &Path, track: &str, stem: Stem) -> PathBuf {
    stems_dir.join(format!("{track}_{stem}.wav"))
}

/// Progress after `completed` of `total` stems are transcribed.
pub fn transcription_progress(completed: usize, total: usize) -> u8 {
    let total = total.max(1);
    (50 + completed.min(total) * 30 / total) as u8
}

/// The single writer of one job's record while it runs.
struct Tracker<'a> {
    store: &'a JobStore,
    job_id: &'a JobId,
    record: JobRecord,
}

impl<'a> Tracker<'a> {
    /// Move the job into `processing`, unless the submitter already did.
    fn start(store: &'a JobStore, job_id: &'a JobId) -> Result<Self> {
        let mut record = store.get(job_id)?;
        if record.status != JobStatus::Processing {
            record = JobRecord::processing();
            store.update(job_id, record.clone())?;
        }
        Ok(Self {
            store,
            job_id,
            record,
        })
    }

    fn checkpoint(&mut self, progress: u8, stage: Stage, message: impl Into<String>) -> Result<()> {
        self.record = self.record.advanced(progress, stage, message);
        tracing::info!(
            job.id = %self.job_id,
            job.stage = ?stage,
            job.progress = self.record.progress,
            "{}",
            self.record.message
        );
        self.store.update(self.job_id, self.record.clone())
    }

    fn complete(self, bundle: ResultBundle) -> Result<()> {
        self.store.update(self.job_id, self.record.completed(bundle))
    }

    fn fail(self, cause: &PipelineError) -> Result<()> {
        self.store.update(self.job_id, self.record.failed(cause))
    }
}

/// Drives jobs through the external tools and the merge engine.
#[derive(Clone)]
pub struct Orchestrator {
    store: JobStore,
    separator: Arc<dyn StemSeparator>,
    transcriber: Arc<dyn Transcriber>,
    merge_options: MergeOptions,
}

impl Orchestrator {
    pub fn new(
        store: JobStore,
        separator: Arc<dyn StemSeparator>,
        transcriber: Arc<dyn Transcriber>,
        merge_options: MergeOptions,
    ) -> Self {
        Self {
            store,
            separator,
            transcriber,
            merge_options,
        }
    }

    /// Orchestrator wired to the real demucs and basic-pitch binaries.
    pub fn with_tools(store: JobStore, tools: &ToolsConfig, jobs: &JobsConfig) -> Self {
        let runner = Arc::new(ProcessRunner);
        let timeout = tools.step_timeout();
        Self::new(
            store,
            Arc::new(DemucsSeparator::new(
                runner.clone(),
                &tools.separator,
                &tools.separator_model,
                timeout,
            )),
            Arc::new(BasicPitchTranscriber::new(runner, &tools.transcriber, timeout)),
            MergeOptions {
                require_stems: jobs.require_stems,
            },
        )
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Run a registered job to a terminal state.
    ///
    /// The outcome is also recorded in the store; the returned error is the
    /// cause written into the job's `error` record.
    #[tracing::instrument(
        name = "job.run",
        skip(self, request),
        fields(job.id = %job_id, file = %request.original_filename)
    )]
    pub async fn run(&self, job_id: &JobId, request: JobRequest) -> Result<ResultBundle> {
        let mut tracker = Tracker::start(&self.store, job_id)?;

        let outcome = self.execute(&request, &mut tracker).await;

        if request.delete_input {
            remove_input(&request.input).await;
        }

        match outcome {
            Ok(bundle) => {
                tracker.complete(bundle.clone())?;
                Ok(bundle)
            }
            Err(err) => {
                if let Err(record_err) = tracker.fail(&err) {
                    tracing::warn!(
                        job.id = %job_id,
                        error = %record_err,
                        "Could not record job failure"
                    );
                }
                Err(err)
            }
        }
    }

    async fn execute(&self, request: &JobRequest, tracker: &mut Tracker<'_>) -> Result<ResultBundle> {
        // Bundle paths are absolute
        let request = &request.absolutized()?;
        let track = request.track_name();
        let stems_dir = request.stems_dir();
        let midi_dir = request.midi_dir();

        for dir in [&stems_dir, &midi_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| PipelineError::io_at("create", dir, e))?;
        }

        tracker.checkpoint(20, Stage::Separating, "Separating audio into stems...")?;

        let stems = match self.existing_stems(request, &track).await {
            Some(stems) => {
                tracing::info!(track = %track, "Using existing stems");
                stems
            }
            None => self.separate(request, &track).await?,
        };

        tracker.checkpoint(50, Stage::Transcribing, "Converting stems to MIDI...")?;

        let mut midi_files = BTreeMap::new();
        for (i, stem) in Stem::ALL.iter().enumerate() {
            let audio = stems
                .get(stem)
                .cloned()
                .unwrap_or_else(|| stem_output_path(&stems_dir, &track, *stem));
            let target = midi_dir.join(format!("{stem}.mid"));

            self.transcriber
                .transcribe(&audio, &target)
                .await
                .map_err(|source| PipelineError::ExternalTool {
                    tool: self.transcriber.name().to_string(),
                    file: format!("{} ({})", file_label(&audio), request.original_filename),
                    source,
                })?;

            midi_files.insert(*stem, target);
            tracker.checkpoint(
                transcription_progress(i + 1, Stem::ALL.len()),
                Stage::Transcribing,
                format!("Converting {stem} to MIDI..."),
            )?;
        }

        tracker.checkpoint(90, Stage::Merging, "Merging MIDI files...")?;

        let combined_midi = midi_dir.join("combined.mid");
        let inputs: Vec<(String, PathBuf)> = midi_files
            .iter()
            .map(|(stem, path)| (stem.to_string(), path.clone()))
            .collect();
        let out = combined_midi.clone();
        let options = self.merge_options.clone();
        tokio::task::spawn_blocking(move || merge_to_file(inputs, &out, &options))
            .await
            .map_err(|e| PipelineError::io("merge task failed", std::io::Error::other(e)))??;

        Ok(ResultBundle {
            track_name: track,
            stems: by_name(stems),
            midi_files: by_name(midi_files),
            combined_midi,
        })
    }

    /// All four stems from an earlier run, when reuse is allowed.
    async fn existing_stems(&self, request: &JobRequest, track: &str) -> Option<StemFiles> {
        if !request.reuse_existing_stems {
            return None;
        }
        let stems_dir = request.stems_dir();
        let mut stems = StemFiles::new();
        for stem in Stem::ALL {
            let path = stem_output_path(&stems_dir, track, stem);
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return None;
            }
            stems.insert(stem, path);
        }
        Some(stems)
    }

    /// Run the separator and copy its stems next to the job's other outputs.
    async fn separate(&self, request: &JobRequest, track: &str) -> Result<StemFiles> {
        let scratch = request.job_dir.join("separated");
        let separated = self
            .separator
            .separate(&request.input, &scratch)
            .await
            .map_err(|source| PipelineError::ExternalTool {
                tool: self.separator.name().to_string(),
                file: request.original_filename.clone(),
                source,
            })?;

        let stems_dir = request.stems_dir();
        let mut stems = StemFiles::new();
        for (stem, path) in separated {
            let dest = stem_output_path(&stems_dir, track, stem);
            tokio::fs::copy(&path, &dest)
                .await
                .map_err(|e| PipelineError::io_at("copy stem to", &dest, e))?;
            stems.insert(stem, dest);
        }

        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            tracing::debug!(path = %scratch.display(), error = %e, "Separator scratch dir not removed");
        }

        Ok(stems)
    }
}

fn by_name(files: BTreeMap<Stem, PathBuf>) -> BTreeMap<String, PathBuf> {
    files
        .into_iter()
        .map(|(stem, path)| (stem.to_string(), path))
        .collect()
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub(crate) async fn remove_input(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed uploaded input"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Could not remove uploaded input"),
    }
}

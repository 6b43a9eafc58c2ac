//! Orchestrator runs against fake separation and transcription tools.

use async_trait::async_trait;
use organ_score::{
    read_notes_from_path, write_score, Instrument, MergeOptions, NoteEvent, Score, Stem,
};
use organist::external::{StemFiles, StemSeparator, ToolError, Transcriber};
use organist::{JobId, JobRecord, JobRequest, JobStatus, JobStore, Orchestrator, PipelineError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Writes four placeholder stems, or fails like a crashed demucs.
#[derive(Default)]
struct FakeSeparator {
    fail: bool,
    calls: AtomicUsize,
}

#[async_trait]
impl StemSeparator for FakeSeparator {
    fn name(&self) -> &str {
        "demucs"
    }

    async fn separate(&self, _input: &Path, out_dir: &Path) -> Result<StemFiles, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ToolError::Failed {
                tool: "demucs".to_string(),
                exit_code: Some(1),
                stderr: "CUDA out of memory".to_string(),
            });
        }

        std::fs::create_dir_all(out_dir).unwrap();
        let mut stems = StemFiles::new();
        for stem in Stem::ALL {
            let path = out_dir.join(format!("{stem}.wav"));
            std::fs::write(&path, format!("RIFF {stem}")).unwrap();
            stems.insert(stem, path);
        }
        Ok(stems)
    }
}

/// Writes a one-note MIDI file per stem and records the job's progress
/// at the moment each transcription starts.
struct FakeTranscriber {
    fail_on: Option<&'static str>,
    store: JobStore,
    job_id: JobId,
    seen: Mutex<Vec<(PathBuf, u8)>>,
}

impl FakeTranscriber {
    fn new(store: &JobStore, job_id: &JobId) -> Self {
        Self {
            fail_on: None,
            store: store.clone(),
            job_id: job_id.clone(),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn failing_on(mut self, stem: &'static str) -> Self {
        self.fail_on = Some(stem);
        self
    }

    fn progress_seen(&self) -> Vec<u8> {
        self.seen.lock().unwrap().iter().map(|(_, p)| *p).collect()
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    fn name(&self) -> &str {
        "basic-pitch"
    }

    async fn transcribe(&self, audio: &Path, midi_target: &Path) -> Result<(), ToolError> {
        let progress = self.store.get(&self.job_id).unwrap().progress;
        self.seen
            .lock()
            .unwrap()
            .push((audio.to_path_buf(), progress));

        let name = audio.file_name().unwrap().to_string_lossy().into_owned();
        if let Some(stem) = self.fail_on {
            if name.ends_with(&format!("_{stem}.wav")) {
                return Err(ToolError::Failed {
                    tool: "basic-pitch".to_string(),
                    exit_code: Some(1),
                    stderr: String::new(),
                });
            }
        }

        let score = Score {
            instruments: vec![Instrument {
                name: "Piano".to_string(),
                program: 0,
                percussive: false,
                notes: vec![NoteEvent::new(64, 100, 0.0, 0.5)],
            }],
        };
        std::fs::write(midi_target, write_score(&score)).unwrap();
        Ok(())
    }
}

struct Fixture {
    _temp_dir: TempDir,
    store: JobStore,
    job_id: JobId,
    request: JobRequest,
}

fn fixture() -> Fixture {
    let temp_dir = TempDir::new().unwrap();
    let uploads = temp_dir.path().join("uploads");
    let results = temp_dir.path().join("results");
    std::fs::create_dir_all(&uploads).unwrap();

    let job_id = JobId::new();
    let input = uploads.join(format!("{job_id}_song.mp3"));
    std::fs::write(&input, b"ID3 fake").unwrap();

    let store = JobStore::new();
    store.create(&job_id, JobRecord::processing()).unwrap();

    let request = JobRequest::upload(input, "song.mp3", &results, &job_id);

    Fixture {
        _temp_dir: temp_dir,
        store,
        job_id,
        request,
    }
}

fn orchestrator(
    fx: &Fixture,
    separator: Arc<FakeSeparator>,
    transcriber: Arc<FakeTranscriber>,
) -> Orchestrator {
    Orchestrator::new(fx.store.clone(), separator, transcriber, MergeOptions::default())
}

#[tokio::test]
async fn successful_job_produces_result_bundle() {
    let fx = fixture();
    let separator = Arc::new(FakeSeparator::default());
    let transcriber = Arc::new(FakeTranscriber::new(&fx.store, &fx.job_id));

    let bundle = orchestrator(&fx, separator, transcriber)
        .run(&fx.job_id, fx.request.clone())
        .await
        .unwrap();

    let record = fx.store.get(&fx.job_id).unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.progress, 100);
    assert_eq!(record.message, "Processing completed successfully!");
    assert!(record.completed_at.is_some());
    assert_eq!(record.results.as_ref(), Some(&bundle));

    assert_eq!(bundle.track_name, "song");
    let stems_dir = fx.request.job_dir.join("stems");
    let midi_dir = fx.request.job_dir.join("midi");
    for stem in Stem::ALL {
        let name = stem.as_str();
        assert_eq!(bundle.stems[name], stems_dir.join(format!("song_{name}.wav")));
        assert_eq!(bundle.midi_files[name], midi_dir.join(format!("{name}.mid")));
        assert!(bundle.stems[name].exists());
        assert!(bundle.midi_files[name].exists());
    }

    assert_eq!(bundle.combined_midi, midi_dir.join("combined.mid"));
    let notes = read_notes_from_path(&bundle.combined_midi).unwrap();
    assert_eq!(notes.len(), 4);

    assert!(!fx.request.input.exists(), "uploaded input should be deleted");
}

#[tokio::test]
async fn progress_never_goes_backwards() {
    let fx = fixture();
    let transcriber = Arc::new(FakeTranscriber::new(&fx.store, &fx.job_id));

    orchestrator(&fx, Arc::new(FakeSeparator::default()), transcriber.clone())
        .run(&fx.job_id, fx.request.clone())
        .await
        .unwrap();

    assert_eq!(transcriber.progress_seen(), vec![50, 57, 65, 72]);

    let order: Vec<String> = transcriber
        .seen
        .lock()
        .unwrap()
        .iter()
        .map(|(path, _)| path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        order,
        vec!["song_drums.wav", "song_bass.wav", "song_vocals.wav", "song_other.wav"]
    );
}

#[tokio::test]
async fn separator_failure_stops_job() {
    let fx = fixture();
    let separator = Arc::new(FakeSeparator {
        fail: true,
        ..Default::default()
    });
    let transcriber = Arc::new(FakeTranscriber::new(&fx.store, &fx.job_id));

    let err = orchestrator(&fx, separator, transcriber.clone())
        .run(&fx.job_id, fx.request.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::ExternalTool { .. }));

    let record = fx.store.get(&fx.job_id).unwrap();
    assert_eq!(record.status, JobStatus::Error);
    assert_eq!(record.progress, 20);
    assert!(record.error_at.is_some());
    assert!(record.message.starts_with("Error: "));
    assert!(record.message.contains("demucs"));
    assert!(record.message.contains("song.mp3"));
    assert!(record.results.is_none());

    assert!(transcriber.progress_seen().is_empty());
    assert!(!fx.request.input.exists(), "input deleted on failure too");
}

#[tokio::test]
async fn transcriber_failure_fails_whole_job() {
    let fx = fixture();
    let transcriber = Arc::new(FakeTranscriber::new(&fx.store, &fx.job_id).failing_on("vocals"));

    orchestrator(&fx, Arc::new(FakeSeparator::default()), transcriber.clone())
        .run(&fx.job_id, fx.request.clone())
        .await
        .unwrap_err();

    let record = fx.store.get(&fx.job_id).unwrap();
    assert_eq!(record.status, JobStatus::Error);
    assert_eq!(record.progress, 65);
    assert!(record.message.contains("basic-pitch"));
    assert!(record.message.contains("song_vocals.wav"));
    assert!(record.message.contains("song.mp3"));

    // drums, bass, vocals attempted; other never reached
    assert_eq!(transcriber.progress_seen().len(), 3);
    assert!(!fx.request.job_dir.join("midi").join("combined.mid").exists());
    assert!(!fx.request.input.exists());
}

#[tokio::test]
async fn terminal_job_cannot_be_rewritten() {
    let fx = fixture();
    let transcriber = Arc::new(FakeTranscriber::new(&fx.store, &fx.job_id));
    let orchestrator = orchestrator(&fx, Arc::new(FakeSeparator::default()), transcriber);

    orchestrator
        .run(&fx.job_id, fx.request.clone())
        .await
        .unwrap();

    let err = orchestrator
        .run(&fx.job_id, fx.request.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::JobTerminal(_)));
    assert_eq!(fx.store.get(&fx.job_id).unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn queued_job_is_started_by_run() {
    let fx = fixture();
    let job_id = JobId::new();
    fx.store.create(&job_id, JobRecord::queued()).unwrap();
    std::fs::write(&fx.request.input, b"ID3 fake").unwrap();

    let transcriber = Arc::new(FakeTranscriber::new(&fx.store, &job_id));
    let mut request = fx.request.clone();
    request.job_dir = fx.request.job_dir.with_file_name(job_id.as_str());

    orchestrator(&fx, Arc::new(FakeSeparator::default()), transcriber)
        .run(&job_id, request)
        .await
        .unwrap();

    let record = fx.store.get(&job_id).unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert!(record.started_at.is_some());
}

#[tokio::test]
async fn existing_stems_skip_separation() {
    let fx = fixture();
    let stems_dir = fx.request.job_dir.join("stems");
    std::fs::create_dir_all(&stems_dir).unwrap();
    for stem in Stem::ALL {
        std::fs::write(stems_dir.join(format!("song_{stem}.wav")), b"RIFF").unwrap();
    }

    let mut request = fx.request.clone();
    request.reuse_existing_stems = true;
    request.delete_input = false;

    let separator = Arc::new(FakeSeparator::default());
    let transcriber = Arc::new(FakeTranscriber::new(&fx.store, &fx.job_id));

    let bundle = orchestrator(&fx, separator.clone(), transcriber)
        .run(&fx.job_id, request.clone())
        .await
        .unwrap();

    assert_eq!(separator.calls.load(Ordering::SeqCst), 0);
    assert_eq!(bundle.stems.len(), 4);
    assert!(request.input.exists(), "batch runs keep their input");
}

#[tokio::test]
async fn partial_stems_are_not_reused() {
    let fx = fixture();
    let stems_dir = fx.request.job_dir.join("stems");
    std::fs::create_dir_all(&stems_dir).unwrap();
    std::fs::write(stems_dir.join("song_drums.wav"), b"RIFF").unwrap();

    let mut request = fx.request.clone();
    request.reuse_existing_stems = true;

    let separator = Arc::new(FakeSeparator::default());
    let transcriber = Arc::new(FakeTranscriber::new(&fx.store, &fx.job_id));

    orchestrator(&fx, separator.clone(), transcriber)
        .run(&fx.job_id, request)
        .await
        .unwrap();

    assert_eq!(separator.calls.load(Ordering::SeqCst), 1);
}

/// `path` spelled relative to the working directory.
#[cfg(unix)]
fn relative_to_cwd(path: &Path) -> PathBuf {
    let cwd = std::env::current_dir().unwrap();
    let mut relative = PathBuf::new();
    for _ in cwd.components().skip(1) {
        relative.push("..");
    }
    relative.join(path.strip_prefix("/").unwrap())
}

#[cfg(unix)]
#[tokio::test]
async fn relative_results_dir_gives_absolute_bundle() {
    let fx = fixture();
    let mut request = fx.request.clone();
    request.job_dir = relative_to_cwd(&fx.request.job_dir);
    request.input = relative_to_cwd(&fx.request.input);
    assert!(request.job_dir.is_relative());

    let transcriber = Arc::new(FakeTranscriber::new(&fx.store, &fx.job_id));
    let bundle = orchestrator(&fx, Arc::new(FakeSeparator::default()), transcriber)
        .run(&fx.job_id, request)
        .await
        .unwrap();

    assert!(bundle.combined_midi.is_absolute());
    assert!(bundle.combined_midi.exists());
    assert!(bundle.stems.values().all(|p| p.is_absolute()));
    assert!(bundle.midi_files.values().all(|p| p.is_absolute()));
}

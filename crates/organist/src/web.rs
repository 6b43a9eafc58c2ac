//! Web endpoints for organist.
//!
//! Upload form, job polling, result pages and file downloads. Jobs are
//! handed to the [`JobRunner`]; handlers only ever read the job store.

mod pages;

use crate::job::{JobId, JobRecord, JobStatus};
use crate::orchestrator::JobRequest;
use crate::worker::JobRunner;
use axum::{
    body::Body,
    extract::{multipart::Field, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

/// Upload extensions the separator accepts.
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["mp3", "wav", "m4a", "flac"];

/// Shared state for web handlers
#[derive(Clone)]
pub struct WebState {
    pub runner: JobRunner,
    pub upload_dir: PathBuf,
    pub results_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub start_time: Instant,
}

pub fn router(state: WebState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        .route("/", get(index))
        .route("/upload", post(upload).layer(body_limit))
        .route("/processing/{job_id}", get(processing))
        .route("/api/status/{job_id}", get(job_status))
        .route("/results/{job_id}", get(results))
        .route("/download/{job_id}/{file_type}/{filename}", get(download))
        .route("/health", get(health))
        .with_state(state)
}

/// Whether `filename` carries one of [`ALLOWED_EXTENSIONS`], in any case.
pub fn allowed_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| {
            ALLOWED_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

/// Reduce a client-supplied filename to a safe single path component.
///
/// Path separators become spaces, whitespace runs become `_`, anything
/// outside `[A-Za-z0-9_.-]` is dropped and leading/trailing `.` and `_` are
/// trimmed.
pub fn secure_filename(filename: &str) -> String {
    let spaced: String = filename
        .chars()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}

#[derive(Debug, Deserialize)]
struct IndexQuery {
    error: Option<String>,
}

#[tracing::instrument(name = "http.index", skip_all)]
async fn index(Query(query): Query<IndexQuery>) -> Html<String> {
    Html(pages::index(query.error.as_deref().and_then(pages::notice)))
}

fn reject_upload(code: &str) -> Response {
    tracing::info!(reason = code, "Upload rejected");
    Redirect::to(&format!("/?error={code}")).into_response()
}

/// Stream one multipart field to `path`, returning the bytes written.
async fn save_field(field: &mut Field<'_>, path: &std::path::Path) -> Result<u64, Response> {
    let mut file = tokio::fs::File::create(path).await.map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "Failed to create upload file");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })?;

    let mut written = 0u64;
    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                file.write_all(&chunk).await.map_err(|e| {
                    tracing::error!(path = %path.display(), error = %e, "Failed to write upload");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                })?;
                written += chunk.len() as u64;
            }
            Ok(None) => break,
            Err(e) => return Err(e.into_response()),
        }
    }

    file.flush()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())?;
    Ok(written)
}

#[tracing::instrument(
    name = "http.upload",
    skip_all,
    fields(job.id = tracing::field::Empty, file = tracing::field::Empty)
)]
async fn upload(State(state): State<WebState>, mut multipart: Multipart) -> Response {
    loop {
        let mut field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return reject_upload("no_file"),
            Err(e) => return e.into_response(),
        };

        if field.name() != Some("file") {
            continue;
        }

        let original = field.file_name().unwrap_or_default().to_string();
        if original.is_empty() {
            return reject_upload("no_file");
        }
        if !allowed_file(&original) {
            return reject_upload("invalid_type");
        }

        let mut filename = secure_filename(&original);
        if !allowed_file(&filename) {
            // Nothing but the extension survived sanitizing
            let ext = original.rsplit_once('.').map(|(_, e)| e).unwrap_or("wav");
            filename = format!("upload.{}", ext.to_ascii_lowercase());
        }

        let job_id = JobId::new();
        let span = tracing::Span::current();
        span.record("job.id", tracing::field::display(&job_id));
        span.record("file", filename.as_str());

        let input = state.upload_dir.join(format!("{job_id}_{filename}"));
        let written = match save_field(&mut field, &input).await {
            Ok(written) => written,
            Err(response) => {
                let _ = tokio::fs::remove_file(&input).await;
                return response;
            }
        };

        if written == 0 {
            let _ = tokio::fs::remove_file(&input).await;
            return reject_upload("no_file");
        }

        tracing::info!(
            job.id = %job_id,
            file = %filename,
            bytes = written,
            "Upload saved"
        );

        let request = JobRequest::upload(input.clone(), filename, &state.results_dir, &job_id);
        if let Err(e) = state.runner.submit(job_id.clone(), request) {
            tracing::error!(job.id = %job_id, error = %e, "Failed to start job");
            let _ = tokio::fs::remove_file(&input).await;
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }

        return Redirect::to(&format!("/processing/{job_id}")).into_response();
    }
}

#[tracing::instrument(name = "http.processing", skip(state))]
async fn processing(State(state): State<WebState>, Path(job_id): Path<String>) -> Response {
    match job_id.parse::<JobId>() {
        Ok(job_id) if state.runner.store().get(&job_id).is_ok() => {
            Html(pages::processing(&job_id)).into_response()
        }
        _ => Redirect::to("/?error=not_found").into_response(),
    }
}

fn lookup(state: &WebState, job_id: &str) -> Option<(JobId, JobRecord)> {
    let job_id = job_id.parse::<JobId>().ok()?;
    let record = state.runner.store().get(&job_id).ok()?;
    Some((job_id, record))
}

#[tracing::instrument(name = "http.status", skip(state))]
async fn job_status(State(state): State<WebState>, Path(job_id): Path<String>) -> Response {
    match lookup(&state, &job_id) {
        Some((_, record)) => Json(record).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Job not found"})),
        )
            .into_response(),
    }
}

#[tracing::instrument(name = "http.results", skip(state))]
async fn results(State(state): State<WebState>, Path(job_id): Path<String>) -> Response {
    let Some((job_id, record)) = lookup(&state, &job_id) else {
        return Redirect::to("/?error=not_found").into_response();
    };

    match (&record.status, &record.results) {
        (JobStatus::Completed, Some(bundle)) => Html(pages::results(&job_id, bundle)).into_response(),
        _ => Redirect::to(&format!("/processing/{job_id}")).into_response(),
    }
}

fn content_type(filename: &str) -> &'static str {
    match filename.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "wav" => "audio/wav",
        Some(ext) if ext == "mid" || ext == "midi" => "audio/midi",
        _ => "application/octet-stream",
    }
}

#[tracing::instrument(name = "http.download", skip(state))]
async fn download(
    State(state): State<WebState>,
    Path((job_id, file_type, filename)): Path<(String, String, String)>,
) -> Response {
    let Some((job_id, record)) = lookup(&state, &job_id) else {
        return (StatusCode::NOT_FOUND, "Job not found").into_response();
    };

    if record.status != JobStatus::Completed {
        return (StatusCode::BAD_REQUEST, "Job not completed").into_response();
    }

    let subdir = match file_type.as_str() {
        "stem" => "stems",
        "midi" => "midi",
        _ => return (StatusCode::BAD_REQUEST, "Invalid file type").into_response(),
    };

    if filename.is_empty() || filename.contains(['/', '\\']) || filename.contains("..") {
        return (StatusCode::NOT_FOUND, "File not found").into_response();
    }

    let path = state
        .results_dir
        .join(job_id.as_str())
        .join(subdir)
        .join(&filename);

    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(_) => return (StatusCode::NOT_FOUND, "File not found").into_response(),
    };

    let body = Body::from_stream(ReaderStream::new(file));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type(&filename))
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(body)
        .map_err(|e| {
            tracing::error!("Failed to build response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
        .unwrap_or_else(|status| status.into_response())
}

async fn health(State(state): State<WebState>) -> Json<serde_json::Value> {
    let job_stats = state.runner.store().stats();

    Json(serde_json::json!({
        "status": "healthy",
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "jobs": job_stats,
        "workers": {
            "max": state.runner.max_concurrent_jobs(),
            "active": state.runner.active_jobs(),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{StemFiles, StemSeparator, ToolError, Transcriber};
    use crate::job::ResultBundle;
    use crate::job_system::JobStore;
    use crate::orchestrator::Orchestrator;
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use axum::http::Request;
    use organ_score::MergeOptions;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "organist-test-boundary";

    /// Counts invocations and always fails.
    #[derive(Default)]
    struct CountingSeparator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StemSeparator for CountingSeparator {
        fn name(&self) -> &str {
            "fake-demucs"
        }

        async fn separate(
            &self,
            _input: &std::path::Path,
            _out_dir: &std::path::Path,
        ) -> Result<StemFiles, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ToolError::Failed {
                tool: "fake-demucs".to_string(),
                exit_code: Some(1),
                stderr: String::new(),
            })
        }
    }

    struct NoTranscriber;

    #[async_trait]
    impl Transcriber for NoTranscriber {
        fn name(&self) -> &str {
            "fake-basic-pitch"
        }

        async fn transcribe(
            &self,
            _audio: &std::path::Path,
            _target: &std::path::Path,
        ) -> Result<(), ToolError> {
            Ok(())
        }
    }

    struct TestApp {
        state: WebState,
        separator: Arc<CountingSeparator>,
        _temp_dir: TempDir,
    }

    fn setup_test_state() -> TestApp {
        let temp_dir = TempDir::new().unwrap();
        let upload_dir = temp_dir.path().join("uploads");
        let results_dir = temp_dir.path().join("results");
        std::fs::create_dir_all(&upload_dir).unwrap();
        std::fs::create_dir_all(&results_dir).unwrap();

        let separator = Arc::new(CountingSeparator::default());
        let orchestrator = Orchestrator::new(
            JobStore::new(),
            separator.clone(),
            Arc::new(NoTranscriber),
            MergeOptions::default(),
        );

        TestApp {
            state: WebState {
                runner: JobRunner::new(orchestrator, 2),
                upload_dir,
                results_dir,
                max_upload_bytes: 1024 * 1024,
                start_time: Instant::now(),
            },
            separator,
            _temp_dir: temp_dir,
        }
    }

    fn multipart_request(filename: &str, content: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn location(response: &Response) -> String {
        response.headers()[header::LOCATION]
            .to_str()
            .unwrap()
            .to_string()
    }

    /// Register a finished job with one MIDI file on disk.
    fn completed_job(state: &WebState) -> JobId {
        let job_id = JobId::new();
        let midi_dir = state.results_dir.join(job_id.as_str()).join("midi");
        std::fs::create_dir_all(&midi_dir).unwrap();
        std::fs::write(midi_dir.join("combined.mid"), b"MThd-test").unwrap();

        let store = state.runner.store();
        let record = JobRecord::processing();
        store.create(&job_id, record.clone()).unwrap();
        store
            .update(
                &job_id,
                record.completed(ResultBundle {
                    track_name: "song".to_string(),
                    stems: BTreeMap::new(),
                    midi_files: BTreeMap::new(),
                    combined_midi: midi_dir.join("combined.mid"),
                }),
            )
            .unwrap();
        job_id
    }

    #[test]
    fn test_allowed_file() {
        assert!(allowed_file("song.mp3"));
        assert!(allowed_file("Song.FLAC"));
        assert!(allowed_file("a.b.m4a"));
        assert!(!allowed_file("song.txt"));
        assert!(!allowed_file("mp3"));
        assert!(!allowed_file(""));
    }

    #[test]
    fn test_secure_filename() {
        assert_eq!(secure_filename("My Song.mp3"), "My_Song.mp3");
        assert_eq!(secure_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(secure_filename("chanson é.wav"), "chanson_.wav");
        assert_eq!(secure_filename("..."), "");
    }

    #[tokio::test]
    async fn test_upload_invalid_type_creates_no_job() {
        let app = setup_test_state();
        let response = router(app.state.clone())
            .oneshot(multipart_request("notes.txt", b"hello"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/?error=invalid_type");
        assert!(app.state.runner.store().list().is_empty());
        assert_eq!(app.separator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read_dir(&app.state.upload_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_upload_without_filename_is_rejected() {
        let app = setup_test_state();
        let response = router(app.state.clone())
            .oneshot(multipart_request("", b""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/?error=no_file");
        assert!(app.state.runner.store().list().is_empty());
    }

    #[tokio::test]
    async fn test_upload_starts_job() {
        let app = setup_test_state();
        let response = router(app.state.clone())
            .oneshot(multipart_request("My Song.mp3", b"ID3 fake audio"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let target = location(&response);
        let job_id: JobId = target
            .strip_prefix("/processing/")
            .expect("redirects to processing page")
            .parse()
            .unwrap();

        let jobs = app.state.runner.store().list();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].0, job_id);
    }

    #[tokio::test]
    async fn test_status_unknown_job() {
        let app = setup_test_state();
        let response = router(app.state.clone())
            .oneshot(get(&format!("/api/status/{}", JobId::new())))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Job not found");
    }

    #[tokio::test]
    async fn test_status_returns_record() {
        let app = setup_test_state();
        let job_id = completed_job(&app.state);

        let response = router(app.state.clone())
            .oneshot(get(&format!("/api/status/{job_id}")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["progress"], 100);
        assert_eq!(json["results"]["track_name"], "song");
    }

    #[tokio::test]
    async fn test_download_midi() {
        let app = setup_test_state();
        let job_id = completed_job(&app.state);

        let response = router(app.state.clone())
            .oneshot(get(&format!("/download/{job_id}/midi/combined.mid")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/midi");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"combined.mid\""
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"MThd-test");
    }

    #[tokio::test]
    async fn test_download_errors() {
        let app = setup_test_state();
        let done = completed_job(&app.state);
        let running = JobId::new();
        app.state
            .runner
            .store()
            .create(&running, JobRecord::processing())
            .unwrap();

        let cases = [
            (format!("/download/{}/midi/combined.mid", JobId::new()), StatusCode::NOT_FOUND),
            (format!("/download/{running}/midi/combined.mid"), StatusCode::BAD_REQUEST),
            (format!("/download/{done}/audio/combined.mid"), StatusCode::BAD_REQUEST),
            (format!("/download/{done}/midi/missing.mid"), StatusCode::NOT_FOUND),
            (format!("/download/{done}/stem/..%2Fmidi%2Fcombined.mid"), StatusCode::NOT_FOUND),
        ];

        for (uri, expected) in cases {
            let response = router(app.state.clone()).oneshot(get(&uri)).await.unwrap();
            assert_eq!(response.status(), expected, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_results_redirects_until_complete() {
        let app = setup_test_state();
        let running = JobId::new();
        app.state
            .runner
            .store()
            .create(&running, JobRecord::processing())
            .unwrap();

        let response = router(app.state.clone())
            .oneshot(get(&format!("/results/{running}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), format!("/processing/{running}"));

        let response = router(app.state.clone())
            .oneshot(get(&format!("/results/{}", JobId::new())))
            .await
            .unwrap();
        assert_eq!(location(&response), "/?error=not_found");

        let done = completed_job(&app.state);
        let response = router(app.state.clone())
            .oneshot(get(&format!("/results/{done}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains(&format!("/download/{done}/midi/combined.mid")));
    }

    #[tokio::test]
    async fn test_index_shows_notice() {
        let app = setup_test_state();
        let response = router(app.state.clone())
            .oneshot(get("/?error=invalid_type"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("Invalid file type"));
    }

    #[tokio::test]
    async fn test_health() {
        let app = setup_test_state();
        completed_job(&app.state);

        let response = router(app.state.clone()).oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["jobs"]["total"], 1);
        assert_eq!(json["jobs"]["completed"], 1);
        assert_eq!(json["workers"]["max"], 2);
    }
}

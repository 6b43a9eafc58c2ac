use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use organconf::OrganConfig;
use organist::job::{JobId, JobRecord};
use organist::orchestrator::{JobRequest, Orchestrator};
use organist::web::{self, WebState};
use organist::{telemetry, JobRunner, JobStore};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Turn an audio recording into a pipe-organ MIDI score
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file to load instead of ./organist.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the upload page and job API (default)
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,
    },

    /// Process one file without the web server, reusing existing stems
    Process {
        /// Audio file to process
        input: PathBuf,

        /// Output root; results land in <OUT>/<track name>/
        #[arg(short, long, default_value = "output")]
        out: PathBuf,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = OrganConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    if let Some(Command::Config) = cli.command {
        print!("{}", config.to_toml());
        return Ok(());
    }

    let telemetry = telemetry::init(&config.telemetry).context("Failed to initialize telemetry")?;

    for file in &sources.files {
        tracing::info!("Loaded config: {}", file.display());
    }
    for var in &sources.env_overrides {
        tracing::debug!("Config override from env: {}", var);
    }

    let outcome = match cli.command {
        Some(Command::Process { input, out }) => process(&config, &input, &out).await,
        Some(Command::Serve { port, host }) => {
            if let Some(port) = port {
                config.bind.http_port = port;
            }
            if let Some(host) = host {
                config.bind.host = host;
            }
            serve(config).await
        }
        None | Some(Command::Config) => serve(config).await,
    };

    telemetry.shutdown();
    outcome
}

async fn serve(config: OrganConfig) -> Result<()> {
    tracing::info!("📂 Preparing storage...");
    for dir in [&config.paths.upload_dir, &config.paths.results_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }
    tracing::info!("   Uploads: {}", config.paths.upload_dir.display());
    tracing::info!("   Results: {}", config.paths.results_dir.display());

    tracing::info!("⚙️  Initializing job runner...");
    let job_store = JobStore::new();
    let orchestrator = Orchestrator::with_tools(job_store.clone(), &config.tools, &config.jobs);
    let runner = JobRunner::new(orchestrator, config.jobs.max_concurrent_jobs as usize);
    tracing::info!(
        "   {} concurrent jobs, separator: {} ({}), transcriber: {}",
        runner.max_concurrent_jobs(),
        config.tools.separator,
        config.tools.separator_model,
        config.tools.transcriber
    );
    if let Some(timeout) = config.tools.step_timeout() {
        tracing::info!("   Step timeout: {}s", timeout.as_secs());
    }

    let web_state = WebState {
        runner,
        upload_dir: config.paths.upload_dir.clone(),
        results_dir: config.paths.results_dir.clone(),
        max_upload_bytes: config.jobs.max_upload_bytes,
        start_time: Instant::now(),
    };
    let app_router = web::router(web_state);

    let addr = config.bind.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tracing::info!("🎹 Organist starting on http://{}", addr);
    tracing::info!("   Upload: GET http://{}/", addr);
    tracing::info!("   Job status: GET http://{}/api/status/:job_id", addr);
    tracing::info!("   Health: GET http://{}/health", addr);

    let shutdown_token = CancellationToken::new();

    let shutdown_token_srv = shutdown_token.clone();
    let server = axum::serve(listener, app_router).with_graceful_shutdown(async move {
        shutdown_token_srv.cancelled().await;
        tracing::info!("Server shutdown signal received");
    });

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.await {
            tracing::error!("Server shutdown with error: {:?}", e);
        }
    });

    // Periodic statistics logging
    let stats_job_store = job_store.clone();
    let stats_ct = shutdown_token.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let job_stats = stats_job_store.stats();
                    tracing::info!(
                        jobs.total = job_stats.total,
                        jobs.queued = job_stats.queued,
                        jobs.processing = job_stats.processing,
                        jobs.completed = job_stats.completed,
                        jobs.error = job_stats.error,
                        "Server statistics"
                    );
                }
                _ = stats_ct.cancelled() => {
                    break;
                }
            }
        }
    });

    tracing::info!("🎵 Server ready.");

    // Handle both SIGINT (Ctrl+C) and SIGTERM (systemd, containers)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = sigterm() => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        }
    }
    shutdown_token.cancel();

    if let Err(e) = server_handle.await {
        tracing::error!("Server task failed: {:?}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn sigterm() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to set up SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}

/// Run one job in-process, printing where the results went.
async fn process(config: &OrganConfig, input: &Path, out: &Path) -> Result<()> {
    anyhow::ensure!(
        input.exists(),
        "Missing input file: {}\nUsage: organist process <INPUT> [--out DIR]",
        input.display()
    );

    let original_filename = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("Input path has no file name")?;

    let mut request = JobRequest {
        input: input.to_path_buf(),
        original_filename,
        job_dir: PathBuf::new(),
        delete_input: false,
        reuse_existing_stems: true,
    };
    request.job_dir = out.join(request.track_name());

    let job_store = JobStore::new();
    let orchestrator = Orchestrator::with_tools(job_store.clone(), &config.tools, &config.jobs);
    let job_id = JobId::new();
    job_store.create(&job_id, JobRecord::processing())?;

    tracing::info!("🎹 Processing {} into {}", input.display(), request.job_dir.display());

    let bundle = orchestrator
        .run(&job_id, request)
        .await
        .with_context(|| format!("Failed to process {}", input.display()))?;

    println!("Saved separated stems:");
    for (stem, path) in &bundle.stems {
        println!("  - {}: {}", organ_score::title_case(stem), path.display());
    }
    println!("Saved individual MIDI files:");
    for (stem, path) in &bundle.midi_files {
        println!("  - {} MIDI: {}", organ_score::title_case(stem), path.display());
    }
    println!("Wrote merged MIDI to {}", bundle.combined_midi.display());

    Ok(())
}

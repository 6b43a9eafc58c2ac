//! Logging and OpenTelemetry initialization.
//!
//! Console logging through `tracing-subscriber` is always on. When an OTLP
//! endpoint is configured, traces, logs and metrics are exported over gRPC
//! as well.

use std::time::Duration;

use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use organconf::TelemetryConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Timeout for OTLP exports - prevents blocking on unavailable endpoints
const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

const SERVICE_NAME: &str = "organist";

/// Filter used when the configured level does not parse.
const FALLBACK_FILTER: &str = "info,organist=debug";

/// Keeps the OTLP providers alive; flushes them on [`TelemetryGuard::shutdown`].
#[derive(Default)]
pub struct TelemetryGuard {
    providers: Option<OtlpProviders>,
}

struct OtlpProviders {
    tracer: SdkTracerProvider,
    logger: SdkLoggerProvider,
    meter: SdkMeterProvider,
}

impl TelemetryGuard {
    /// Flush pending telemetry and stop the exporters.
    pub fn shutdown(self) {
        let Some(providers) = self.providers else {
            return;
        };
        tracing::info!("🔭 Shutting down OpenTelemetry...");
        if let Err(e) = providers.tracer.shutdown() {
            eprintln!("Failed to shut down tracer provider: {e}");
        }
        if let Err(e) = providers.logger.shutdown() {
            eprintln!("Failed to shut down logger provider: {e}");
        }
        if let Err(e) = providers.meter.shutdown() {
            eprintln!("Failed to shut down meter provider: {e}");
        }
    }
}

/// `host:port` gets an `http://` scheme; full URLs pass through.
pub fn endpoint_url(otlp_endpoint: &str) -> String {
    if otlp_endpoint.contains("://") {
        otlp_endpoint.to_string()
    } else {
        format!("http://{otlp_endpoint}")
    }
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER))
}

fn build_providers(endpoint: &str) -> Result<OtlpProviders> {
    let resource = Resource::builder_empty()
        .with_service_name(SERVICE_NAME)
        .with_attributes(vec![KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP span exporter")?;

    let tracer = SdkTracerProvider::builder()
        .with_span_processor(
            opentelemetry_sdk::trace::BatchSpanProcessor::builder(trace_exporter).build(),
        )
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource.clone())
        .build();

    let log_exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP log exporter")?;

    let logger = SdkLoggerProvider::builder()
        .with_log_processor(
            opentelemetry_sdk::logs::BatchLogProcessor::builder(log_exporter).build(),
        )
        .with_resource(resource.clone())
        .build();

    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP metric exporter")?;

    let meter = SdkMeterProvider::builder()
        .with_reader(opentelemetry_sdk::metrics::PeriodicReader::builder(metric_exporter).build())
        .with_resource(resource)
        .build();

    global::set_tracer_provider(tracer.clone());
    global::set_meter_provider(meter.clone());

    Ok(OtlpProviders {
        tracer,
        logger,
        meter,
    })
}

/// Install the global tracing subscriber.
pub fn init(config: &TelemetryConfig) -> Result<TelemetryGuard> {
    let providers = if config.otlp_enabled() {
        Some(build_providers(&endpoint_url(&config.otlp_endpoint))?)
    } else {
        None
    };

    let telemetry_layer = providers
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer.tracer(SERVICE_NAME)));
    let log_appender = providers.as_ref().map(|p| {
        opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&p.logger)
    });

    tracing_subscriber::registry()
        .with(env_filter(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .with(log_appender)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    if config.otlp_enabled() {
        tracing::info!(
            "🔭 OpenTelemetry initialized with OTLP endpoint: {}",
            config.otlp_endpoint
        );
        tracing::info!("📊 Exporting traces, logs, and metrics");
    } else {
        tracing::debug!("OTLP export disabled, logging to console only");
    }

    Ok(TelemetryGuard { providers })
}

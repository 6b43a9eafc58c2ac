//! Job counters and durations.
//!
//! Instruments come from an OpenTelemetry [`Meter`]; with no OTLP endpoint
//! configured the global meter is a no-op.

use crate::job::JobRecord;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};

const METER_NAME: &str = "organist";

#[derive(Clone)]
pub struct JobMetrics {
    created: Counter<u64>,
    finished: Counter<u64>,
    duration: Histogram<f64>,
}

impl JobMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            created: meter
                .u64_counter("organist.jobs.created")
                .with_description("Jobs registered")
                .build(),
            finished: meter
                .u64_counter("organist.jobs.finished")
                .with_description("Jobs that reached a terminal state")
                .build(),
            duration: meter
                .f64_histogram("organist.job.duration")
                .with_description("Time from start to terminal state")
                .with_unit("s")
                .build(),
        }
    }

    /// Instruments on the process-wide meter provider.
    pub fn global() -> Self {
        Self::new(&global::meter(METER_NAME))
    }

    pub fn job_created(&self, record: &JobRecord) {
        self.created
            .add(1, &[KeyValue::new("status", record.status.as_str())]);
    }

    pub fn job_finished(&self, record: &JobRecord) {
        if !record.status.is_terminal() {
            return;
        }
        let status = [KeyValue::new("status", record.status.as_str())];
        self.finished.add(1, &status);
        if let Some(secs) = record.duration_secs() {
            self.duration.record(secs as f64, &status);
        }
    }
}

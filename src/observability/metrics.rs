//! OpenTelemetry metrics for storage operations.
//!
//! Key metrics:
//! - batchlog_writes_total: Counter of writes by entity, operation and outcome
//! - batchlog_sample_size: Histogram of ids returned by random sampling
//!
//! Recording before [`init_metrics`] is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::OnceLock;

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Which table a write touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Batch,
    Message,
}

impl Entity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Batch => "batch",
            Self::Message => "message",
        }
    }
}

/// Batchlog metrics registry.
#[derive(Debug)]
pub struct Metrics {
    /// Writes by entity, operation and outcome (`applied` or `noop`).
    pub writes_total: Counter<u64>,
    /// Number of ids returned per sampling call.
    pub sample_size: Histogram<u64>,
}

impl Metrics {
    fn new(meter: &Meter) -> Self {
        Self {
            writes_total: meter
                .u64_counter("batchlog_writes_total")
                .with_description("Batch and message writes by outcome")
                .with_unit("1")
                .init(),
            sample_size: meter
                .u64_histogram("batchlog_sample_size")
                .with_description("Batch ids returned per random sample")
                .with_unit("1")
                .init(),
        }
    }
}

/// Initialize the metrics system.
///
/// This should be called once at startup. Subsequent calls are ignored.
/// The OTLP exporter needs a running Tokio runtime.
///
/// # Arguments
///
/// * `otel_endpoint` - Optional OTLP endpoint for metrics export
pub fn init_metrics_with_endpoint(otel_endpoint: Option<&str>) {
    METRICS.get_or_init(|| {
        if let Some(endpoint) = otel_endpoint {
            use opentelemetry_otlp::{Protocol, WithExportConfig};

            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_protocol(Protocol::Grpc);

            match opentelemetry_otlp::new_pipeline()
                .metrics(opentelemetry_sdk::runtime::Tokio)
                .with_exporter(exporter)
                .with_period(std::time::Duration::from_secs(10))
                .build()
            {
                Ok(provider) => {
                    global::set_meter_provider(provider);
                    tracing::info!(endpoint, "OTLP metrics exporter configured");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to create OTLP exporter, metrics stay local");
                    install_manual_provider();
                }
            }
        } else {
            install_manual_provider();
        }

        let meter = global::meter("batchlog");
        Metrics::new(&meter)
    });
}

/// Initialize the metrics system without OTLP export.
pub fn init_metrics() {
    init_metrics_with_endpoint(None);
}

/// Metrics are recorded but not exported.
fn install_manual_provider() {
    let reader = ManualReader::builder().build();
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    global::set_meter_provider(provider);
}

/// The global metrics instance, if initialized.
pub fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Record a create/update/transition and whether it changed a row.
pub fn record_write(entity: Entity, op: &'static str, applied: bool) {
    if let Some(m) = METRICS.get() {
        let attrs = [
            KeyValue::new("entity", entity.as_str()),
            KeyValue::new("op", op),
            KeyValue::new("outcome", if applied { "applied" } else { "noop" }),
        ];
        m.writes_total.add(1, &attrs);
    }
}

/// Record the size of a random sample for `status`.
pub fn record_sample(status: &str, size: usize) {
    if let Some(m) = METRICS.get() {
        let attrs = [KeyValue::new("status", status.to_string())];
        m.sample_size.record(size as u64, &attrs);
    }
}

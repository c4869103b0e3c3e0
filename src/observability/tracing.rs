//! Tracing subscriber setup.
//!
//! Every facade operation on [`crate::Storage`] runs inside a span named
//! after it (`create_batch`, `update_message`, `random_batches`, ...) that
//! carries the ids and statuses it was called with. No-op writes log a
//! `debug` event inside that span, and schema bootstrap and writer start and
//! stop log at `info`. A host that installs its own subscriber does not need
//! this module.

use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Default filter when `RUST_LOG` is unset: storage no-ops are visible.
const DEFAULT_FILTER: &str = "info,batchlog=debug";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a console subscriber for batchlog's operation spans.
///
/// Lines include the target, thread and source location, so writes issued
/// from the writer thread (`batchlog-writer`) are easy to tell apart from
/// direct `Storage` use.
///
/// # Panics
///
/// Panics if a global subscriber has already been installed.
pub fn init_tracing(service_name: &str) {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer)
        .init();

    tracing::info!(service = service_name, "Tracing initialized");
}

/// A layer that writes one JSON object per event, including the enclosing
/// operation span and its fields.
pub fn json_layer<S, W>(writer: W) -> impl Layer<S> + Send + Sync
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_writer(writer)
}

/// Install a JSON subscriber on stdout, for hosts that ship logs to a collector.
///
/// # Panics
///
/// Panics if a global subscriber has already been installed.
pub fn init_json_tracing(service_name: &str) {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(json_layer(std::io::stdout))
        .init();

    tracing::info!(service = service_name, "Tracing initialized");
}

/// Initialize tracing for tests (only logs errors).
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("error")
        .with_test_writer()
        .try_init();
}

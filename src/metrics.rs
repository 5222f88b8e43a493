//! Prometheus metrics for partwise.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`
//! and defines metric name constants.  There is no scrape endpoint: an
//! upload is a batch job, so the binary renders the exposition text to a
//! file once the upload has finished (node-exporter textfile style).

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

// -- Metric name constants ----------------------------------------------------

/// Part upload attempts (counter). Labels: outcome (`ok`, `transient`, `permanent`).
pub const PART_ATTEMPTS_TOTAL: &str = "partwise_part_attempts_total";

/// Retries scheduled after a transient part failure (counter).
pub const PART_RETRIES_TOTAL: &str = "partwise_part_retries_total";

/// Parts stored successfully (counter).
pub const PARTS_UPLOADED_TOTAL: &str = "partwise_parts_uploaded_total";

/// Part payload bytes stored successfully (counter).
pub const BYTES_UPLOADED_TOTAL: &str = "partwise_bytes_uploaded_total";

/// Duration of a successful part upload attempt in seconds (histogram).
pub const PART_UPLOAD_DURATION_SECONDS: &str = "partwise_part_upload_duration_seconds";

/// Finished uploads (counter). Labels: outcome (`completed`, `aborted`, `failed`).
pub const UPLOADS_TOTAL: &str = "partwise_uploads_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Serializes recorder installation so concurrent callers cannot race.
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests).
///
/// Fails if some other recorder was installed first.
pub fn init_metrics() -> anyhow::Result<&'static PrometheusHandle> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(PART_ATTEMPTS_TOTAL, "Part upload attempts by outcome");
    describe_counter!(PART_RETRIES_TOTAL, "Part retries after transient failures");
    describe_counter!(PARTS_UPLOADED_TOTAL, "Parts stored successfully");
    describe_counter!(BYTES_UPLOADED_TOTAL, "Part bytes stored successfully");
    describe_histogram!(
        PART_UPLOAD_DURATION_SECONDS,
        "Successful part upload duration in seconds"
    );
    describe_counter!(UPLOADS_TOTAL, "Finished uploads by outcome");
}

// -- Recording helpers --------------------------------------------------------

pub(crate) fn record_part_attempt(outcome: &'static str) {
    counter!(PART_ATTEMPTS_TOTAL, "outcome" => outcome).increment(1);
}

pub(crate) fn record_part_retry() {
    counter!(PART_RETRIES_TOTAL).increment(1);
}

pub(crate) fn record_part_uploaded(bytes: u64, elapsed: Duration) {
    counter!(PARTS_UPLOADED_TOTAL).increment(1);
    counter!(BYTES_UPLOADED_TOTAL).increment(bytes);
    histogram!(PART_UPLOAD_DURATION_SECONDS).record(elapsed.as_secs_f64());
}

pub(crate) fn record_upload(outcome: &'static str) {
    counter!(UPLOADS_TOTAL, "outcome" => outcome).increment(1);
}

// -- Export --------------------------------------------------------------------

/// Render the Prometheus exposition text, if a recorder is installed.
pub fn render() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(PrometheusHandle::render)
}

/// Write the exposition text to `path` via a temp file + rename, so a
/// collector never reads a half-written file.
pub fn write_textfile(path: impl AsRef<Path>) -> anyhow::Result<()> {
    let path = path.as_ref();
    let body = render().ok_or_else(|| anyhow::anyhow!("Prometheus recorder not initialized"))?;
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// -- Tests --------------------------------------------------------------------

//! Client-side metrics.
//!
//! Emits through the `metrics` facade; the library installs no recorder,
//! so nothing is collected unless the application installs one.  Metric
//! names are defined as constants and described by [`describe_metrics`].

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

use crate::constants::{QUERY_COMP, QUERY_RESTYPE};
use crate::transport::HttpRequest;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP attempts (counter). Labels: operation, status.
pub const REQUESTS_TOTAL: &str = "blobkit_requests_total";

/// Attempt duration in seconds, head to end of body (histogram). Labels: operation.
pub const REQUEST_DURATION_SECONDS: &str = "blobkit_request_duration_seconds";

/// Total retries scheduled by retry policies (counter). Labels: operation.
pub const RETRIES_TOTAL: &str = "blobkit_retries_total";

/// Total operations abandoned because the execution budget ran out (counter).
pub const CLIENT_TIMEOUTS_TOTAL: &str = "blobkit_client_timeouts_total";

/// Total bytes uploaded by output streams (counter).
pub const BYTES_UPLOADED_TOTAL: &str = "blobkit_bytes_uploaded_total";

/// Total bytes streamed from downloads (counter).
pub const BYTES_DOWNLOADED_TOTAL: &str = "blobkit_bytes_downloaded_total";

/// Register metric descriptions with whatever recorder is installed.
pub fn describe_metrics() {
    describe_counter!(REQUESTS_TOTAL, "Total HTTP attempts by operation and status");
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        "HTTP attempt duration in seconds"
    );
    describe_counter!(RETRIES_TOTAL, "Total retries scheduled");
    describe_counter!(
        CLIENT_TIMEOUTS_TOTAL,
        "Total operations that exhausted their execution budget"
    );
    describe_counter!(BYTES_UPLOADED_TOTAL, "Total bytes uploaded by output streams");
    describe_counter!(BYTES_DOWNLOADED_TOTAL, "Total bytes streamed from downloads");
}

// -- Recording helpers --------------------------------------------------------

/// Record one finished attempt.  `status` is `None` for transport failures.
pub fn record_attempt(operation: &str, status: Option<u16>, duration: Duration) {
    let status = status.map_or_else(|| "error".to_string(), |s| s.to_string());
    counter!(REQUESTS_TOTAL, "operation" => operation.to_string(), "status" => status)
        .increment(1);
    histogram!(REQUEST_DURATION_SECONDS, "operation" => operation.to_string())
        .record(duration.as_secs_f64());
}

pub fn record_retry(operation: &str) {
    counter!(RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}

pub fn record_client_timeout() {
    counter!(CLIENT_TIMEOUTS_TOTAL).increment(1);
}

pub fn record_bytes_uploaded(bytes: usize) {
    counter!(BYTES_UPLOADED_TOTAL).increment(bytes as u64);
}

pub fn record_bytes_downloaded(bytes: u64) {
    counter!(BYTES_DOWNLOADED_TOTAL).increment(bytes);
}

// -- Operation labels ---------------------------------------------------------

/// Low-cardinality label for a request: the method plus the `comp` or
/// `restype` query value, never the resource path.
///
/// Examples:
/// - `PUT ?comp=block&blockid=...` -> `PUT block`
/// - `GET ?restype=container&comp=list` -> `GET list`
/// - `PUT ?restype=container` -> `PUT container`
/// - `GET` (blob download) -> `GET`
pub fn operation_label(request: &HttpRequest) -> String {
    let mut comp = None;
    let mut restype = None;
    for (k, v) in request.url.query_pairs() {
        if k == QUERY_COMP {
            comp = Some(v.into_owned());
        } else if k == QUERY_RESTYPE {
            restype = Some(v.into_owned());
        }
    }
    match comp.or(restype) {
        Some(kind) => format!("{} {}", request.method, kind),
        None => request.method.to_string(),
    }
}

// -- Tests --------------------------------------------------------------------

//! Metrics module
//!
//! Prometheus metrics for the upload pipeline, exposed by [`server`].

pub mod server;

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    HistogramVec,
};

lazy_static! {
    // Per-file metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "media_uploads_total",
        "Files handed to a storage backend",
        &["backend", "status"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: CounterVec = register_counter_vec!(
        "media_upload_bytes_total",
        "Bytes stored",
        &["backend"]
    ).unwrap();

    pub static ref UPLOAD_DURATION: HistogramVec = register_histogram_vec!(
        "media_upload_duration_seconds",
        "Time to resolve a key and store one file",
        &["backend"],
        vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    // Collision metrics
    pub static ref COLLISIONS_RENAMED: Counter = register_counter!(
        "media_collisions_renamed_total",
        "Files stored under a suffixed name to avoid an overwrite"
    ).unwrap();

    pub static ref COLLISIONS_EXHAUSTED: Counter = register_counter!(
        "media_collisions_exhausted_total",
        "Files rejected because no free name was found"
    ).unwrap();

    // Request metrics
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "media_upload_requests_total",
        "Upload requests by shape and HTTP status",
        &["shape", "status"]
    ).unwrap();

    pub static ref REQUESTS_REJECTED: CounterVec = register_counter_vec!(
        "media_upload_requests_rejected_total",
        "Upload requests rejected before any storage call",
        &["reason"]
    ).unwrap();

    // Auth metrics
    pub static ref AUTH_ATTEMPTS: CounterVec = register_counter_vec!(
        "media_auth_attempts_total",
        "Authentication attempts",
        &["method", "status"]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "media_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record a stored file
pub fn record_upload_success(backend: &str, bytes: u64) {
    UPLOADS_TOTAL.with_label_values(&[backend, "success"]).inc();
    UPLOAD_BYTES_TOTAL
        .with_label_values(&[backend])
        .inc_by(bytes as f64);
}

/// Record a file that could not be stored
pub fn record_upload_failure(backend: &str) {
    UPLOADS_TOTAL.with_label_values(&[backend, "failure"]).inc();
}

pub fn record_upload_duration(backend: &str, duration_secs: f64) {
    UPLOAD_DURATION
        .with_label_values(&[backend])
        .observe(duration_secs);
}

pub fn record_collision_renamed() {
    COLLISIONS_RENAMED.inc();
}

pub fn record_collision_exhausted() {
    COLLISIONS_EXHAUSTED.inc();
}

/// Record a finished upload request
pub fn record_request(shape: &str, status: u16) {
    REQUESTS_TOTAL
        .with_label_values(&[shape, &status.to_string()])
        .inc();
}

/// Record a request rejected during intake or classification
pub fn record_request_rejected(reason: &str) {
    REQUESTS_REJECTED.with_label_values(&[reason]).inc();
}

/// Record authentication attempt
pub fn record_auth_attempt(method: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    AUTH_ATTEMPTS.with_label_values(&[method, status]).inc();
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

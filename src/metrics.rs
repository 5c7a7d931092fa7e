//! Metrics collection for backup operations and access control
//!
//! Provides Prometheus-compatible metrics for monitoring snapshot creation,
//! restores, downloads and authorization decisions.

use crate::backup::RestorePhase;
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    /// Counter for backup operations by outcome
    pub static ref BACKUP_OPERATIONS: IntCounterVec = register_int_counter_vec!(
        "bizops_backup_operations_total",
        "Total number of backup operations",
        &["operation", "status"]
    ).unwrap();

    /// Bytes moved by backup operations
    pub static ref BACKUP_BYTES: IntCounterVec = register_int_counter_vec!(
        "bizops_backup_bytes_total",
        "Total bytes copied or served by backup operations",
        &["operation"]
    ).unwrap();

    /// Histogram for backup operation duration
    pub static ref BACKUP_DURATION: HistogramVec = register_histogram_vec!(
        "bizops_backup_operation_duration_seconds",
        "Backup operation duration in seconds",
        &["operation"],
        vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]
    ).unwrap();

    /// Terminal phase reached by each restore
    pub static ref RESTORE_OUTCOMES: IntCounterVec = register_int_counter_vec!(
        "bizops_restore_outcomes_total",
        "Total number of restores by terminal phase",
        &["outcome"]
    ).unwrap();

    /// Counter for authentication attempts
    pub static ref AUTH_ATTEMPTS: IntCounterVec = register_int_counter_vec!(
        "bizops_auth_attempts_total",
        "Total number of authentication attempts",
        &["method", "status"]
    ).unwrap();

    /// Counter for authorization decisions
    pub static ref AUTHZ_DECISIONS: IntCounterVec = register_int_counter_vec!(
        "bizops_authz_decisions_total",
        "Total number of authorization decisions",
        &["action", "decision"]
    ).unwrap();

    /// Counter for audit log writes
    pub static ref AUDIT_LOGS_WRITTEN: IntCounterVec = register_int_counter_vec!(
        "bizops_audit_logs_written_total",
        "Total number of audit log entries written",
        &["event_type"]
    ).unwrap();
}

/// Backup metrics collector
pub struct BackupMetrics;

impl BackupMetrics {
    /// Record a backup operation
    pub fn record_operation(operation: &str, success: bool) {
        let status = if success { "success" } else { "failure" };
        BACKUP_OPERATIONS.with_label_values(&[operation, status]).inc();
    }

    /// Record bytes copied or served
    pub fn record_bytes(operation: &str, bytes: u64) {
        BACKUP_BYTES.with_label_values(&[operation]).inc_by(bytes);
    }

    /// Record how long an operation took
    pub fn observe_duration(operation: &str, seconds: f64) {
        BACKUP_DURATION.with_label_values(&[operation]).observe(seconds);
    }

    /// Record the terminal phase of a restore
    pub fn record_restore_outcome(phase: RestorePhase) {
        let outcome = match phase {
            RestorePhase::Committed => "committed",
            RestorePhase::RolledBack => "rolled_back",
            RestorePhase::Unrecoverable => "unrecoverable",
            _ => "incomplete",
        };
        RESTORE_OUTCOMES.with_label_values(&[outcome]).inc();
    }

    /// Record an authentication attempt
    pub fn record_auth_attempt(method: &str, success: bool) {
        let status = if success { "success" } else { "failure" };
        AUTH_ATTEMPTS.with_label_values(&[method, status]).inc();
    }

    /// Record an authorization decision
    pub fn record_authz_decision(action: &str, allowed: bool) {
        let decision = if allowed { "allowed" } else { "denied" };
        AUTHZ_DECISIONS.with_label_values(&[action, decision]).inc();
    }

    /// Record an audit log write
    pub fn record_audit_log(event_type: &str) {
        AUDIT_LOGS_WRITTEN.with_label_values(&[event_type]).inc();
    }

    /// Get all metrics in Prometheus text format
    pub fn export_metrics() -> Result<String, String> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| format!("Failed to encode metrics: {}", e))?;
        String::from_utf8(buffer).map_err(|e| format!("Failed to convert metrics to UTF-8: {}", e))
    }
}

use std::net::SocketAddr;

use crate::engine::{EngineError, ErrorKind};

// ── Lifecycle ───────────────────────────────────────────────────

/// Counter: start_booking calls. Labels: outcome (ok or an error label).
pub const BOOKINGS_STARTED_TOTAL: &str = "parkd_bookings_started_total";

/// Counter: successful check-ins.
pub const CHECK_INS_TOTAL: &str = "parkd_check_ins_total";

/// Counter: terminal transitions. Labels: status, actor (user, scheduler).
pub const BOOKINGS_CLOSED_TOTAL: &str = "parkd_bookings_closed_total";

/// Counter: wallet ledger entries posted. Labels: kind.
pub const WALLET_POSTINGS_TOTAL: &str = "parkd_wallet_postings_total";

// ── Locks ───────────────────────────────────────────────────────

/// Histogram: time spent acquiring a distributed lock, in seconds. Labels: backend.
pub const LOCK_WAIT_SECONDS: &str = "parkd_lock_wait_seconds";

/// Counter: acquisitions that gave up. Labels: backend.
pub const LOCK_TIMEOUTS_TOTAL: &str = "parkd_lock_timeouts_total";

// ── Scheduler ───────────────────────────────────────────────────

/// Counter: sweep passes run.
pub const SWEEP_RUNS_TOTAL: &str = "parkd_sweep_runs_total";

/// Counter: bookings closed by a sweep. Labels: sweep (overstay, no_show).
pub const SWEEP_BOOKINGS_TOTAL: &str = "parkd_sweep_bookings_total";

/// Counter: per-booking sweep failures.
pub const SWEEP_FAILURES_TOTAL: &str = "parkd_sweep_failures_total";

/// Counter: spots whose availability the daily reset restored.
pub const SPOT_RESETS_TOTAL: &str = "parkd_spot_resets_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "parkd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "parkd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for an error, for metrics.
pub fn error_label(err: &EngineError) -> &'static str {
    match err.kind() {
        ErrorKind::NotFound => "not_found",
        ErrorKind::Conflict => "conflict",
        ErrorKind::InsufficientFunds => "insufficient_funds",
        ErrorKind::IllegalState => "illegal_state",
        ErrorKind::LockTimeout => "lock_timeout",
        ErrorKind::BadRequest => "bad_request",
        ErrorKind::Internal => "internal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn labels_follow_error_kind() {
        assert_eq!(error_label(&EngineError::LockTimeout("spot:x".into())), "lock_timeout");
        assert_eq!(
            error_label(&EngineError::NotFound(crate::engine::Entity::Spot, Ulid::new())),
            "not_found"
        );
        assert_eq!(error_label(&EngineError::LimitExceeded("x")), "bad_request");
    }

    #[test]
    fn init_without_port_is_noop() {
        assert!(init(None).is_ok());
    }
}

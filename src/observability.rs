use std::net::SocketAddr;

use crate::rpc::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: procedure calls. Labels: function, status.
pub const CALLS_TOTAL: &str = "rackd_calls_total";

/// Histogram: procedure latency in seconds. Labels: function.
pub const CALL_DURATION_SECONDS: &str = "rackd_call_duration_seconds";

/// Counter: bulk update items. Labels: outcome.
pub const BULK_ITEMS_TOTAL: &str = "rackd_bulk_items_total";

// ── Audit trail health ──────────────────────────────────────────

/// Counter: audit entries persisted.
pub const AUDIT_ENTRIES_TOTAL: &str = "rackd_audit_entries_total";

/// Counter: audit writes that failed after a successful rack write.
pub const AUDIT_WRITE_FAILURES_TOTAL: &str = "rackd_audit_write_failures_total";

/// Gauge: audit entries waiting for the retry worker.
pub const AUDIT_PENDING: &str = "rackd_audit_pending";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "rackd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "rackd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "rackd_connections_rejected_total";

/// Counter: requests carrying a wrong master key.
pub const AUTH_FAILURES_TOTAL: &str = "rackd_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rackd_wal_flush_duration_seconds";

/// Histogram: events per WAL group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "rackd_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Procedure name as used on the wire, for metric labels.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::BulkUpdateRackingOccupied { .. } => "bulkUpdateRackingOccupied",
        Command::GetTodayHistory => "getTodayHistory",
        Command::CreateRacking { .. } => "createRacking",
        Command::UpdateRacking { .. } => "updateRacking",
        Command::GetRacking { .. } => "getRacking",
        Command::ListRacking => "listRacking",
        Command::CreateHistory { .. } => "createHistory",
    }
}

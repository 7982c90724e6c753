use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "reservd_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "reservd_query_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: committed workflow transitions. Labels: action.
pub const TRANSITIONS_TOTAL: &str = "reservd_transitions_total";

/// Counter: conflicting items found by the detector. Labels: kind.
pub const CONFLICTS_TOTAL: &str = "reservd_conflicts_total";

/// Counter: equipment found with more units booked than it has.
pub const AVAILABILITY_ANOMALIES_TOTAL: &str = "reservd_availability_anomalies_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "reservd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "reservd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "reservd_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "reservd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "reservd_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "reservd_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertFacility { .. } => "insert_facility",
        Command::InsertEquipment { .. } => "insert_equipment",
        Command::SetResourceActive { .. } => "set_resource_active",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::UpdateReservationItems { .. } => "update_reservation_items",
        Command::CancelReservation { .. } => "cancel_reservation",
        Command::InsertApprovalLog { .. } => "insert_approval_log",
        Command::SelectResources => "select_resources",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectItems { .. } => "select_items",
        Command::SelectApprovalLogs { .. } => "select_approval_logs",
        Command::SelectAudits { .. } => "select_audits",
        Command::SelectConflicts { .. } => "select_conflicts",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectCapacity { .. } => "select_capacity",
        Command::Listen { .. } => "listen",
    }
}

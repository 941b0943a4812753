use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "courtbook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "courtbook_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "courtbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "courtbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "courtbook_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "courtbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "courtbook_wal_flush_batch_size";

// ── Booking metrics ─────────────────────────────────────────────

/// Counter: bookings created.
pub const BOOKINGS_CREATED_TOTAL: &str = "courtbook_bookings_created_total";

/// Counter: create requests refused because the slot was taken.
pub const SLOT_CONFLICTS_TOTAL: &str = "courtbook_slot_conflicts_total";

/// Counter: status transitions. Labels: to.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "courtbook_booking_transitions_total";

/// Counter: unpaid bookings cancelled by the reaper.
pub const BOOKINGS_EXPIRED_TOTAL: &str = "courtbook_bookings_expired_total";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::PutVenue { .. } => "put_venue",
        Command::CreateBooking { .. } => "create_booking",
        Command::ConfirmPayment { .. } => "confirm_payment",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::FinishBooking { outcome, .. } => match outcome {
            crate::model::BookingStatus::NoShow => "mark_no_show",
            _ => "mark_completed",
        },
        Command::GetBooking { .. } => "get_booking",
        Command::ListBookings { venue_id: Some(_), .. } => "venue_bookings",
        Command::ListBookings { .. } => "list_bookings",
        Command::SelectAvailability { .. } => "select_availability",
    }
}

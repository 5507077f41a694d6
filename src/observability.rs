use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "ratecal_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "ratecal_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "ratecal_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "ratecal_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "ratecal_connections_rejected_total";

/// Gauge: calendars currently loaded.
pub const CALENDARS_ACTIVE: &str = "ratecal_calendars_active";

/// Histogram: operations per committed reconciliation batch.
pub const BATCH_OPERATIONS: &str = "ratecal_batch_operations";

/// Counter: log compactions run by the background compactor.
pub const COMPACTIONS_TOTAL: &str = "ratecal_compactions_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "ratecal_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "ratecal_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::Insert { .. } => "insert",
        Command::Update { .. } => "update",
        Command::Delete { .. } => "delete",
        Command::SelectAll => "select_all",
        Command::SelectOne { .. } => "select_one",
        Command::SelectRange { strict: false, .. } => "select_range",
        Command::SelectRange { strict: true, .. } => "select_range_strict",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::parse_sql;

    #[test]
    fn labels_follow_statement_kind() {
        let cmd = parse_sql("SELECT * FROM intervals").unwrap();
        assert_eq!(command_label(&cmd), "select_all");
        let delete = r#"DELETE FROM intervals WHERE "from" = '2019-02-20 15:00:00' AND "to" = '2019-02-20 16:00:00'"#;
        let cmd = parse_sql(delete).unwrap();
        assert_eq!(command_label(&cmd), "delete");
    }

    #[test]
    fn init_without_port_is_noop() {
        assert!(init(None).is_ok());
    }
}

//! Metric name constants, shared so crates cannot drift on spelling.

/// Inbound messages dispatched (counter, labels: action).
pub const DISPATCH_TOTAL: &str = "dispatch_total";
/// Dispatch failures (counter, labels: action, error_type).
pub const DISPATCH_ERRORS_TOTAL: &str = "dispatch_errors_total";
/// Inbound messages with no registered handler (counter).
pub const DISPATCH_UNHANDLED_TOTAL: &str = "dispatch_unhandled_total";
/// Sessions closed because a message failed to decode (counter).
pub const SESSIONS_DECODE_CLOSED_TOTAL: &str = "sessions_decode_closed_total";
/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime (histogram, seconds).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Outbound packets dropped on a full send queue (counter).
pub const SESSION_SEND_DROPS_TOTAL: &str = "session_send_drops_total";
/// Streamers started (counter).
pub const STREAMERS_STARTED_TOTAL: &str = "streamers_started_total";
/// Streamers stopped (counter, labels: reason).
pub const STREAMERS_STOPPED_TOTAL: &str = "streamers_stopped_total";
/// Running streamers (gauge).
pub const STREAMERS_ACTIVE: &str = "streamers_active";
/// Log lines forwarded to watchers (counter).
pub const LOG_LINES_FORWARDED_TOTAL: &str = "log_lines_forwarded_total";
/// Log lines accepted from workers (counter).
pub const LOG_LINES_INGESTED_TOTAL: &str = "log_lines_ingested_total";
/// Worker lines the bus refused (counter, labels: error_type).
pub const INGEST_ERRORS_TOTAL: &str = "ingest_errors_total";

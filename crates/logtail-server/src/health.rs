//! `/health` endpoint.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Wall-clock start time, RFC 3339.
    pub started_at: String,
    /// Registered sessions.
    pub sessions: usize,
    /// Running log streamers.
    pub streamers: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    started_at: DateTime<Utc>,
    sessions: usize,
    streamers: usize,
) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        started_at: started_at.to_rfc3339(),
        sessions,
        streamers,
    }
}

//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file only needs the fields it changes.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings.
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "streamer": { "pacingIntervalMs": 50 },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogtailSettings {
    pub server: ServerSettings,
    pub streamer: StreamerSettings,
    pub bus: BusSettings,
    pub logging: LoggingSettings,
}

impl LogtailSettings {
    /// Correct out-of-range values in place.
    ///
    /// Called automatically during loading. Bad values are replaced with a
    /// warning rather than rejected.
    pub fn validate(&mut self) {
        let server = &mut self.server;
        if server.max_send_queue == 0 {
            tracing::warn!("maxSendQueue must be positive, using 1");
            server.max_send_queue = 1;
        }
        if server.heartbeat_interval_secs == 0 {
            tracing::warn!("heartbeatIntervalSecs must be positive, using 1");
            server.heartbeat_interval_secs = 1;
        }
        if server.heartbeat_timeout_secs < server.heartbeat_interval_secs {
            tracing::warn!(
                "heartbeatTimeoutSecs ({}) < heartbeatIntervalSecs ({}), correcting",
                server.heartbeat_timeout_secs,
                server.heartbeat_interval_secs
            );
            server.heartbeat_timeout_secs = server.heartbeat_interval_secs;
        }

        if self.streamer.poll_timeout_ms == 0 {
            tracing::warn!("pollTimeoutMs must be positive, using 1");
            self.streamer.poll_timeout_ms = 1;
        }

        if self.bus.retention_per_topic == 0 {
            tracing::warn!("retentionPerTopic must be positive, using 1");
            self.bus.retention_per_topic = 1;
        }
        if self.bus.max_topics == 0 {
            tracing::warn!("maxTopics must be positive, using 1");
            self.bus.max_topics = 1;
        }
        if self.bus.reclaim_interval_secs == 0 {
            tracing::warn!("reclaimIntervalSecs must be positive, using 1");
            self.bus.reclaim_interval_secs = 1;
        }
    }
}

/// Network and connection settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Outbound packets buffered per connection before new ones are dropped.
    pub max_send_queue: usize,
    /// Interval between server Ping frames.
    pub heartbeat_interval_secs: u64,
    /// Disconnect a client silent for this long.
    pub heartbeat_timeout_secs: u64,
    /// Largest inbound WebSocket message accepted.
    pub max_message_size: usize,
    /// How long shutdown waits for background tasks.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 9090,
            max_send_queue: 1024,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 1024 * 1024,
            shutdown_timeout_secs: 10,
        }
    }
}

impl ServerSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Log streamer pacing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamerSettings {
    /// Upper bound on a single bus poll.
    pub poll_timeout_ms: u64,
    /// Pause after each forwarded line.
    pub pacing_interval_ms: u64,
}

impl Default for StreamerSettings {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 500,
            pacing_interval_ms: 100,
        }
    }
}

impl StreamerSettings {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn pacing_interval(&self) -> Duration {
        Duration::from_millis(self.pacing_interval_ms)
    }
}

/// In-memory bus settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusSettings {
    pub retention_per_topic: usize,
    /// Topics held at once. Creating another first reclaims idle ones.
    pub max_topics: usize,
    /// A topic with no consumer and no produce for this long is dropped.
    pub topic_idle_ttl_secs: u64,
    /// How often idle topics are swept.
    pub reclaim_interval_secs: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            retention_per_topic: 10_000,
            max_topics: 10_000,
            topic_idle_ttl_secs: 3600,
            reclaim_interval_secs: 60,
        }
    }
}

impl BusSettings {
    pub fn topic_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.topic_idle_ttl_secs)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }
}

/// Logging output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level. `RUST_LOG` takes precedence when set.
    pub level: String,
    /// JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module level overrides, e.g. `{"logtail_bus": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: true,
            module_levels: BTreeMap::new(),
        }
    }
}

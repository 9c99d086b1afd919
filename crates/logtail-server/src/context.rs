//! Shared dependencies handed to the dispatcher, handlers and streamers.

use std::sync::Arc;

use logtail_bus::LogBus;
use tokio_util::task::TaskTracker;

use crate::registry::SessionRegistry;
use crate::streamer::StreamerConfig;

/// Everything a handler or streamer needs beyond its own session.
#[derive(Clone)]
pub struct GatewayContext {
    /// Live sessions.
    pub registry: Arc<SessionRegistry>,
    /// Bus that workers produce to and streamers consume from.
    pub bus: Arc<dyn LogBus>,
    /// Poll and pacing for new streamers.
    pub streamer: StreamerConfig,
    /// Tracker every streamer is spawned on.
    pub streamers: TaskTracker,
}

impl GatewayContext {
    pub fn new(registry: Arc<SessionRegistry>, bus: Arc<dyn LogBus>, streamer: StreamerConfig) -> Self {
        Self {
            registry,
            bus,
            streamer,
            streamers: TaskTracker::new(),
        }
    }

    /// Spawn streamers on `tracker` instead of a private one.
    #[must_use]
    pub fn with_tracker(mut self, tracker: TaskTracker) -> Self {
        self.streamers = tracker;
        self
    }

    pub fn active_streamers(&self) -> usize {
        self.streamers.len()
    }
}

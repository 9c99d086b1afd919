//! Log streamer: one task per watched (session, topic).
//!
//! The streamer owns a bus consumer for its topic and forwards every line as
//! a `push_log` packet until one of these happens:
//!
//! - the client sends `stop` (observed at the top of the next cycle, so at
//!   most one `poll_timeout + pacing_interval` later, even if the topic was
//!   started again in between)
//! - the session is closed (observed immediately)
//! - the transport is gone
//! - the bus fails, in which case a best-effort `watch_log_end` is sent
//!
//! A streamer never touches the session's flags or registry entry on exit.

use std::sync::Arc;
use std::time::Duration;

use logtail_bus::{BusError, LogBus};
use logtail_core::wire::{JobRef, PushLogPacket, StreamEndPacket, StreamEndReason};
use logtail_core::{StreamId, TopicKey};
use logtail_settings::StreamerSettings;
use logtail_telemetry::metrics::{
    LOG_LINES_FORWARDED_TOTAL, STREAMERS_ACTIVE, STREAMERS_STARTED_TOTAL, STREAMERS_STOPPED_TOTAL,
};
use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::context::GatewayContext;
use crate::registry::SessionRegistry;
use crate::session::{SendError, Session};

/// Poll and pacing for a streamer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamerConfig {
    /// Upper bound on one bus poll.
    pub poll_timeout: Duration,
    /// Pause after each forwarded line.
    pub pacing_interval: Duration,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(500),
            pacing_interval: Duration::from_millis(100),
        }
    }
}

impl From<&StreamerSettings> for StreamerConfig {
    fn from(settings: &StreamerSettings) -> Self {
        Self {
            poll_timeout: settings.poll_timeout(),
            pacing_interval: settings.pacing_interval(),
        }
    }
}

/// Why a streamer stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamExit {
    /// The client disabled the topic.
    Stopped,
    /// The session was closed or left the registry.
    SessionGone,
    /// The session's outbound queue is gone.
    TransportClosed,
    /// The bus refused to create a consumer.
    ConsumerUnavailable,
    /// The consumer returned a non-transient error.
    ConsumeFailed,
}

impl StreamExit {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::SessionGone => "session_gone",
            Self::TransportClosed => "transport_closed",
            Self::ConsumerUnavailable => "consumer_unavailable",
            Self::ConsumeFailed => "consume_failed",
        }
    }
}

/// A single (session, topic) pump from the bus to a client.
pub struct LogStreamer {
    id: StreamId,
    session: Arc<Session>,
    topic: TopicKey,
    /// Stop count of `topic` when this streamer was created.
    stops: u64,
    job: JobRef,
    registry: Arc<SessionRegistry>,
    bus: Arc<dyn LogBus>,
    config: StreamerConfig,
}

impl LogStreamer {
    pub fn new(ctx: &GatewayContext, session: Arc<Session>, job: JobRef) -> Self {
        let topic = job.topic();
        Self {
            id: StreamId::new(),
            stops: session.topic_stops(&topic),
            topic,
            session,
            job,
            registry: Arc::clone(&ctx.registry),
            bus: Arc::clone(&ctx.bus),
            config: ctx.streamer,
        }
    }

    pub fn id(&self) -> &StreamId {
        &self.id
    }

    pub fn topic(&self) -> &TopicKey {
        &self.topic
    }

    /// Run until the stream ends and report why.
    #[instrument(
        skip_all,
        fields(stream_id = %self.id, session_id = %self.session.id(), topic = %self.topic)
    )]
    pub async fn run(self) -> StreamExit {
        counter!(STREAMERS_STARTED_TOTAL).increment(1);
        gauge!(STREAMERS_ACTIVE).increment(1.0);
        info!("log streamer started");

        let exit = self.pump().await;

        gauge!(STREAMERS_ACTIVE).decrement(1.0);
        counter!(STREAMERS_STOPPED_TOTAL, "reason" => exit.as_str()).increment(1);
        info!(reason = exit.as_str(), "log streamer stopped");
        exit
    }

    async fn pump(&self) -> StreamExit {
        let mut consumer = match self.bus.new_consumer(self.topic.as_str()).await {
            Ok(consumer) => consumer,
            Err(e) => {
                error!(error = %e, error_type = e.error_kind(), "failed to create bus consumer");
                self.send_end(StreamEndReason::ConsumerUnavailable);
                return StreamExit::ConsumerUnavailable;
            }
        };

        loop {
            if !self.registry.contains(self.session.id()) {
                return StreamExit::SessionGone;
            }
            if !self.session.watch_current(&self.topic, self.stops) {
                return StreamExit::Stopped;
            }

            let polled = tokio::select! {
                () = self.session.closed() => return StreamExit::SessionGone,
                polled = tokio::time::timeout(self.config.poll_timeout, consumer.consume()) => polled,
            };

            let message = match polled {
                Ok(Ok(message)) => message,
                Err(_elapsed) => continue,
                Ok(Err(e)) if e.is_transient() => {
                    tokio::task::yield_now().await;
                    continue;
                }
                Ok(Err(e)) => {
                    warn!(error = %e, error_type = e.error_kind(), "bus consume failed");
                    self.send_end(StreamEndReason::ConsumeFailed);
                    return StreamExit::ConsumeFailed;
                }
            };

            let line = String::from_utf8_lossy(&message.payload).into_owned();
            match self.session.send(&PushLogPacket::new(&self.job, line)) {
                Ok(()) => {
                    counter!(LOG_LINES_FORWARDED_TOTAL).increment(1);
                    debug!(offset = message.offset, "forwarded log line");
                }
                Err(SendError::TransportClosed) => return StreamExit::TransportClosed,
                Err(SendError::QueueFull) => {}
                Err(e @ SendError::Serialize(_)) => {
                    warn!(error = %e, offset = message.offset, "skipping unserializable line");
                }
            }

            tokio::select! {
                () = self.session.closed() => return StreamExit::SessionGone,
                () = tokio::time::sleep(self.config.pacing_interval) => {}
            }
        }
    }

    fn send_end(&self, reason: StreamEndReason) {
        if let Err(e) = self.session.send(&StreamEndPacket::new(&self.job, reason)) {
            debug!(error = %e, "could not deliver stream end notice");
        }
    }
}

/// Spawn a streamer for `job` on the context's streamer tracker.
pub fn spawn_streamer(ctx: &GatewayContext, session: Arc<Session>, job: JobRef) -> JoinHandle<StreamExit> {
    let streamer = LogStreamer::new(ctx, session, job);
    ctx.streamers.spawn(streamer.run())
}

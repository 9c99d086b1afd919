//! Per-connection session state.
//!
//! A [`Session`] owns the topic flags a client has asked to watch and the
//! sending half of the connection's bounded outbound queue. Streamers hold an
//! `Arc<Session>` but never keep it registered; teardown goes through
//! [`Session::on_closed`] exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use logtail_core::{SessionId, TopicKey};
use logtail_telemetry::metrics::SESSION_SEND_DROPS_TOTAL;
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, warn};

/// Why an outbound packet was not queued.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The session is closed or the writer is gone. Terminal for the caller.
    #[error("transport closed")]
    TransportClosed,
    /// The outbound queue is full; this packet was dropped.
    #[error("send queue full, packet dropped")]
    QueueFull,
    #[error("failed to serialize packet: {0}")]
    Serialize(String),
}

impl SendError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::TransportClosed => "transport_closed",
            Self::QueueFull => "queue_full",
            Self::Serialize(_) => "serialize",
        }
    }
}

/// Watch state of one topic on a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct TopicWatch {
    enabled: bool,
    /// Bumped on every disable, so a streamer started before a `stop` can
    /// tell it was stopped even if the topic was re-enabled since.
    stops: u64,
}

/// State of one connected client.
pub struct Session {
    id: SessionId,
    topics: RwLock<HashMap<TopicKey, TopicWatch>>,
    tx: mpsc::Sender<Arc<String>>,
    closed: CancellationToken,
    connected_at: Instant,
    last_seen: Mutex<Instant>,
    dropped_packets: AtomicU64,
}

impl Session {
    pub fn new(id: SessionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            topics: RwLock::new(HashMap::new()),
            tx,
            closed: CancellationToken::new(),
            connected_at: now,
            last_seen: Mutex::new(now),
            dropped_packets: AtomicU64::new(0),
        }
    }

    /// New session with a fresh id and an outbound queue of `capacity`.
    pub fn channel(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Arc::new(Self::new(SessionId::new(), tx)), rx)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Enable or disable forwarding for `topic`. Ignored once closed.
    ///
    /// Every disable counts as a stop (see [`Session::topic_stops`]).
    pub fn set_topic_enabled(&self, topic: &TopicKey, enabled: bool) {
        let mut topics = self.topics.write();
        if self.closed.is_cancelled() {
            debug!(session_id = %self.id, %topic, enabled, "ignoring topic change on closed session");
            return;
        }
        let watch = topics.entry(topic.clone()).or_default();
        watch.enabled = enabled;
        if !enabled {
            watch.stops += 1;
        }
    }

    /// Whether `topic` is currently enabled. Unknown topics read `false`.
    pub fn topic_enabled(&self, topic: &TopicKey) -> bool {
        self.topics.read().get(topic).is_some_and(|w| w.enabled)
    }

    /// How many times `topic` has been disabled on this session.
    pub fn topic_stops(&self, topic: &TopicKey) -> u64 {
        self.topics.read().get(topic).map_or(0, |w| w.stops)
    }

    /// True while `topic` is enabled and has not been stopped since the
    /// caller observed `stops` of them.
    pub fn watch_current(&self, topic: &TopicKey, stops: u64) -> bool {
        self.topics
            .read()
            .get(topic)
            .is_some_and(|w| w.enabled && w.stops == stops)
    }

    /// Topics currently enabled (sorted).
    pub fn enabled_topics(&self) -> Vec<TopicKey> {
        let mut enabled: Vec<TopicKey> = self
            .topics
            .read()
            .iter()
            .filter(|(_, watch)| watch.enabled)
            .map(|(topic, _)| topic.clone())
            .collect();
        enabled.sort();
        enabled
    }

    /// Serialize `packet` to JSON and queue it for the writer.
    pub fn send<T: Serialize>(&self, packet: &T) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::TransportClosed);
        }
        let json = serde_json::to_string(packet).map_err(|e| SendError::Serialize(e.to_string()))?;
        self.send_raw(Arc::new(json))
    }

    /// Queue an already-serialized packet.
    pub fn send_raw(&self, message: Arc<String>) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::TransportClosed);
        }
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped_packets.fetch_add(1, Ordering::Relaxed) + 1;
                counter!(SESSION_SEND_DROPS_TOTAL).increment(1);
                warn!(session_id = %self.id, dropped, "send queue full, dropping packet");
                Err(SendError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::TransportClosed),
        }
    }

    /// Tear the session down. Returns `true` for the call that closed it;
    /// later calls do nothing.
    pub fn on_closed(&self) -> bool {
        let mut topics = self.topics.write();
        if self.closed.is_cancelled() {
            return false;
        }
        for watch in topics.values_mut() {
            watch.enabled = false;
        }
        self.closed.cancel();
        debug!(session_id = %self.id, topics = topics.len(), "session closed");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the session is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Record inbound activity (any frame, including Pong).
    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound activity.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Packets dropped on a full outbound queue.
    pub fn dropped_packets(&self) -> u64 {
        self.dropped_packets.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("dropped_packets", &self.dropped_packets())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn topic(raw: &str) -> TopicKey {
        TopicKey::from_raw(raw)
    }

    #[test]
    fn unknown_topic_is_disabled() {
        let (session, _rx) = Session::channel(4);
        assert!(!session.topic_enabled(&topic("a__u__s__v1")));
    }

    #[test]
    fn set_topic_enabled_is_idempotent() {
        let (session, _rx) = Session::channel(4);
        let t = topic("a__u__s__v1");
        session.set_topic_enabled(&t, true);
        session.set_topic_enabled(&t, true);
        assert!(session.topic_enabled(&t));
        session.set_topic_enabled(&t, false);
        session.set_topic_enabled(&t, false);
        assert!(!session.topic_enabled(&t));
    }

    #[test]
    fn disable_counts_a_stop() {
        let (session, _rx) = Session::channel(4);
        let t = topic("a__u__s__v1");
        assert_eq!(session.topic_stops(&t), 0);
        session.set_topic_enabled(&t, true);
        session.set_topic_enabled(&t, false);
        session.set_topic_enabled(&t, true);
        assert_eq!(session.topic_stops(&t), 1);
        assert!(session.topic_enabled(&t));
    }

    #[test]
    fn watch_is_not_current_after_stop_and_restart() {
        let (session, _rx) = Session::channel(4);
        let t = topic("a__u__s__v1");
        session.set_topic_enabled(&t, true);
        let seen = session.topic_stops(&t);
        assert!(session.watch_current(&t, seen));

        session.set_topic_enabled(&t, false);
        session.set_topic_enabled(&t, true);
        assert!(!session.watch_current(&t, seen));
        assert!(session.watch_current(&t, session.topic_stops(&t)));
    }

    #[test]
    fn enabled_topics_lists_only_enabled() {
        let (session, _rx) = Session::channel(4);
        session.set_topic_enabled(&topic("b"), true);
        session.set_topic_enabled(&topic("a"), true);
        session.set_topic_enabled(&topic("c"), false);
        assert_eq!(session.enabled_topics(), vec![topic("a"), topic("b")]);
    }

    #[tokio::test]
    async fn send_queues_json() {
        let (session, mut rx) = Session::channel(4);
        session.send(&json!({"action": "push_log", "log": "hi"})).unwrap();
        let msg = rx.recv().await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(v["log"], "hi");
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let (session, _rx) = Session::channel(1);
        session.send(&json!({"n": 1})).unwrap();
        assert_eq!(session.send(&json!({"n": 2})), Err(SendError::QueueFull));
        assert_eq!(session.send(&json!({"n": 3})), Err(SendError::QueueFull));
        assert_eq!(session.dropped_packets(), 2);
        assert!(!session.is_closed());
    }

    #[test]
    fn dropped_receiver_is_transport_closed() {
        let (session, rx) = Session::channel(4);
        drop(rx);
        assert_eq!(session.send(&json!({})), Err(SendError::TransportClosed));
    }

    #[test]
    fn on_closed_clears_flags_and_blocks_sends() {
        let (session, _rx) = Session::channel(4);
        let t = topic("a__u__s__v1");
        session.set_topic_enabled(&t, true);

        assert!(session.on_closed());
        assert!(session.is_closed());
        assert!(!session.topic_enabled(&t));
        assert_eq!(session.send(&json!({})), Err(SendError::TransportClosed));
    }

    #[test]
    fn on_closed_takes_effect_once() {
        let (session, _rx) = Session::channel(4);
        assert!(session.on_closed());
        assert!(!session.on_closed());
        assert!(!session.on_closed());
    }

    #[test]
    fn closed_session_ignores_re_enable() {
        let (session, _rx) = Session::channel(4);
        let t = topic("a__u__s__v1");
        let _ = session.on_closed();
        session.set_topic_enabled(&t, true);
        assert!(!session.topic_enabled(&t));
        assert!(session.enabled_topics().is_empty());
    }

    #[tokio::test]
    async fn closed_future_resolves_on_close() {
        let (session, _rx) = Session::channel(4);
        let waiter = Arc::clone(&session);
        let handle = tokio::spawn(async move { waiter.closed().await });
        let _ = session.on_closed();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("closed() should resolve")
            .unwrap();
    }

    #[test]
    fn mark_alive_resets_idle() {
        let (session, _rx) = Session::channel(4);
        std::thread::sleep(Duration::from_millis(5));
        let before = session.idle_for();
        session.mark_alive();
        assert!(session.idle_for() < before);
    }

    #[test]
    fn send_error_kinds() {
        assert_eq!(SendError::TransportClosed.error_kind(), "transport_closed");
        assert_eq!(SendError::QueueFull.error_kind(), "queue_full");
        assert_eq!(SendError::Serialize("x".into()).error_kind(), "serialize");
    }
}

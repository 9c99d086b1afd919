//! WebSocket transport: drives one [`Session`] from upgrade to disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use logtail_settings::ServerSettings;
use logtail_telemetry::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use metrics::{counter, gauge, histogram};
use tracing::{debug, info, instrument, warn};

use crate::context::GatewayContext;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::session::Session;

/// Per-connection transport limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    /// Outbound packets buffered before new ones are dropped.
    pub max_send_queue: usize,
    /// Interval between server Ping frames.
    pub heartbeat_interval: Duration,
    /// Disconnect a client with no inbound activity for this long.
    pub heartbeat_timeout: Duration,
}

impl From<&ServerSettings> for TransportConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            max_send_queue: settings.max_send_queue,
            heartbeat_interval: settings.heartbeat_interval(),
            heartbeat_timeout: settings.heartbeat_timeout(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

/// How long the writer gets to flush a Close frame after the session ends.
const WRITER_GRACE: Duration = Duration::from_secs(1);

/// Inbound frame reduced to what the dispatcher cares about.
enum Inbound {
    Payload(Bytes),
    Close,
    Skip,
}

fn classify(message: Message) -> Inbound {
    match message {
        Message::Text(text) => Inbound::Payload(Bytes::copy_from_slice(text.as_str().as_bytes())),
        Message::Binary(data) => {
            if std::str::from_utf8(&data).is_ok() {
                Inbound::Payload(data)
            } else {
                info!(len = data.len(), "ignoring non-UTF8 binary frame");
                Inbound::Skip
            }
        }
        Message::Close(_) => Inbound::Close,
        Message::Ping(_) | Message::Pong(_) => Inbound::Skip,
    }
}

/// Run a connected client until either side goes away.
///
/// 1. Registers a new session with a bounded outbound queue
/// 2. Spawns a writer that drains the queue and sends periodic Pings
/// 3. Dispatches inbound text and UTF-8 binary frames
/// 4. Closes the session through the registry on exit
#[instrument(skip_all, fields(session_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    ctx: GatewayContext,
    dispatcher: Arc<Dispatcher>,
    config: TransportConfig,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (session, mut send_rx) = Session::channel(config.max_send_queue);
    let session_id = session.id().clone();
    let _ = tracing::Span::current().record("session_id", session_id.as_str());

    ctx.registry.put(Arc::clone(&session));
    let connection_start = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let writer_session = Arc::clone(&session);
    let writer_registry = Arc::clone(&ctx.registry);
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(config.heartbeat_interval);
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(Arc::unwrap_or_clone(text).into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if writer_session.idle_for() > config.heartbeat_timeout {
                        warn!("client unresponsive for {:?}, disconnecting", config.heartbeat_timeout);
                        break;
                    }
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
                () = writer_session.closed() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        let _ = writer_registry.close(writer_session.id());
    });

    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            () = session.closed() => break,
        };
        let message = match frame {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                debug!(error = %e, "websocket read failed");
                break;
            }
            None => break,
        };
        session.mark_alive();

        match classify(message) {
            Inbound::Payload(raw) => {
                if dispatcher.dispatch(&ctx, &session_id, &raw).await == DispatchOutcome::SessionClosed {
                    break;
                }
            }
            Inbound::Close => {
                info!("client sent close frame");
                break;
            }
            Inbound::Skip => {}
        }
    }

    let _ = ctx.registry.close(&session_id);
    if tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        debug!("writer did not finish, aborting");
        writer.abort();
    }

    info!(dropped = session.dropped_packets(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());
}

//! `watch_log`: start or stop streaming a job's log to this session.

use std::sync::Arc;

use async_trait::async_trait;
use logtail_core::wire::{AckPacket, Envelope, WatchOperation, WatchRequest};
use tracing::{info, instrument};

use crate::context::GatewayContext;
use crate::dispatcher::ActionHandler;
use crate::handlers::HandlerError;
use crate::session::Session;
use crate::streamer::spawn_streamer;

/// `start` enables the topic and spawns a streamer; `stop` disables it and
/// every streamer started before it ends on its next cycle, even if a new
/// `start` re-enabled the topic in the meantime. Both are acked immediately.
///
/// Repeated `start` for the same topic is not deduplicated: each one spawns
/// another streamer.
pub struct WatchLogHandler;

#[async_trait]
impl ActionHandler for WatchLogHandler {
    #[instrument(skip_all, fields(session_id = %session.id()))]
    async fn handle(
        &self,
        envelope: &Envelope,
        session: &Arc<Session>,
        ctx: &GatewayContext,
    ) -> Result<(), HandlerError> {
        let request: WatchRequest = envelope.decode()?;
        let topic = request.topic();
        let ack = AckPacket::success(&request.action, &request.request_id);

        match request.operation {
            WatchOperation::Start => {
                session.set_topic_enabled(&topic, true);
                if !session.topic_enabled(&topic) {
                    return Err(HandlerError::SessionGone(session.id().to_string()));
                }
                // Ack first so it reaches the client ahead of any line.
                let acked = session.send(&ack);
                let _handle = spawn_streamer(ctx, Arc::clone(session), request.job());
                info!(%topic, request_id = %request.request_id, "watch started");
                acked?;
            }
            WatchOperation::Stop => {
                session.set_topic_enabled(&topic, false);
                info!(%topic, request_id = %request.request_id, "watch stopped");
                session.send(&ack)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{DispatchOutcome, Dispatcher};
    use crate::handlers::test_helpers::make_test_context_with_bus;
    use bytes::Bytes;
    use logtail_bus::{LogBus, MemoryBus};
    use logtail_core::TopicKey;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn watch(operation: &str, request_id: &str) -> Vec<u8> {
        json!({
            "action": "watch_log",
            "requestId": request_id,
            "api": "a",
            "userId": "u",
            "serviceId": "s",
            "versionId": "v1",
            "operation": operation,
        })
        .to_string()
        .into_bytes()
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::builder().register("watch_log", WatchLogHandler).build()
    }

    async fn next(rx: &mut mpsc::Receiver<Arc<String>>) -> Value {
        let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for packet")
            .expect("queue closed");
        serde_json::from_str(&msg).unwrap()
    }

    async fn drain_until_stopped(ctx: &GatewayContext) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while ctx.active_streamers() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("streamers did not stop");
    }

    fn topic() -> TopicKey {
        TopicKey::from_raw("a__u__s__v1")
    }

    #[tokio::test]
    async fn start_enables_topic_and_acks() {
        let bus = Arc::new(MemoryBus::default());
        let ctx = make_test_context_with_bus(bus);
        let (session, mut rx) = Session::channel(16);
        ctx.registry.put(Arc::clone(&session));

        let outcome = dispatcher().dispatch(&ctx, session.id(), &watch("start", "r1")).await;
        assert_eq!(outcome, DispatchOutcome::Handled);
        assert!(session.topic_enabled(&topic()));
        assert_eq!(next(&mut rx).await, json!({"action": "watch_log", "requestId": "r1", "errorCode": 0}));
        assert_eq!(ctx.active_streamers(), 1);

        let _ = ctx.registry.close(session.id());
        drain_until_stopped(&ctx).await;
    }

    #[tokio::test]
    async fn started_watch_receives_produced_lines() {
        let bus = Arc::new(MemoryBus::default());
        let ctx = make_test_context_with_bus(bus.clone());
        let (session, mut rx) = Session::channel(16);
        ctx.registry.put(Arc::clone(&session));

        let _ = dispatcher().dispatch(&ctx, session.id(), &watch("start", "r1")).await;
        assert_eq!(next(&mut rx).await["requestId"], "r1");

        bus.produce("a__u__s__v1", Bytes::from_static(b"compiling")).await.unwrap();
        let packet = next(&mut rx).await;
        assert_eq!(packet["action"], "push_log");
        assert_eq!(packet["log"], "compiling");
        assert_eq!(packet["api"], "a");

        let _ = ctx.registry.close(session.id());
        drain_until_stopped(&ctx).await;
    }

    #[tokio::test]
    async fn stop_disables_topic_and_ends_streamer() {
        let bus = Arc::new(MemoryBus::default());
        let ctx = make_test_context_with_bus(bus.clone());
        let (session, mut rx) = Session::channel(16);
        ctx.registry.put(Arc::clone(&session));
        let d = dispatcher();

        let _ = d.dispatch(&ctx, session.id(), &watch("start", "r1")).await;
        let _ = next(&mut rx).await;

        let outcome = d.dispatch(&ctx, session.id(), &watch("stop", "r2")).await;
        assert_eq!(outcome, DispatchOutcome::Handled);
        assert!(!session.topic_enabled(&topic()));
        assert_eq!(next(&mut rx).await["requestId"], "r2");

        drain_until_stopped(&ctx).await;
        bus.produce("a__u__s__v1", Bytes::from_static(b"after stop")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        assert!(ctx.registry.contains(session.id()));
    }

    #[tokio::test]
    async fn quick_restart_delivers_each_line_once() {
        let bus = Arc::new(MemoryBus::default());
        let ctx = make_test_context_with_bus(bus.clone());
        let (session, mut rx) = Session::channel(16);
        ctx.registry.put(Arc::clone(&session));
        let d = dispatcher();

        let _ = d.dispatch(&ctx, session.id(), &watch("start", "r1")).await;
        assert_eq!(next(&mut rx).await["requestId"], "r1");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let _ = d.dispatch(&ctx, session.id(), &watch("stop", "r2")).await;
        let _ = d.dispatch(&ctx, session.id(), &watch("start", "r3")).await;
        assert_eq!(next(&mut rx).await["requestId"], "r2");
        assert_eq!(next(&mut rx).await["requestId"], "r3");

        tokio::time::timeout(Duration::from_secs(2), async {
            while ctx.active_streamers() > 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("stopped streamer kept running");
        assert_eq!(ctx.active_streamers(), 1);

        bus.produce("a__u__s__v1", Bytes::from_static(b"only once")).await.unwrap();
        assert_eq!(next(&mut rx).await["log"], "only once");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err(), "line was delivered twice");

        let _ = ctx.registry.close(session.id());
        drain_until_stopped(&ctx).await;
    }

    #[tokio::test]
    async fn stopped_watches_on_idle_jobs_leave_no_topics() {
        let bus = Arc::new(MemoryBus::default());
        let ctx = make_test_context_with_bus(bus.clone());
        let (session, _rx) = Session::channel(1024);
        ctx.registry.put(Arc::clone(&session));
        let d = dispatcher();

        for i in 0..200 {
            for operation in ["start", "stop"] {
                let raw = json!({
                    "action": "watch_log",
                    "requestId": format!("r{i}"),
                    "api": "a",
                    "userId": "u",
                    "serviceId": "s",
                    "versionId": format!("never-built-{i}"),
                    "operation": operation,
                })
                .to_string();
                let _ = d.dispatch(&ctx, session.id(), raw.as_bytes()).await;
            }
        }

        drain_until_stopped(&ctx).await;
        assert_eq!(bus.topic_count(), 0);
        assert!(ctx.registry.contains(session.id()));
    }

    #[tokio::test]
    async fn stop_without_start_still_acks() {
        let ctx = make_test_context_with_bus(Arc::new(MemoryBus::default()));
        let (session, mut rx) = Session::channel(16);
        ctx.registry.put(Arc::clone(&session));

        let _ = dispatcher().dispatch(&ctx, session.id(), &watch("stop", "r9")).await;
        assert_eq!(next(&mut rx).await["errorCode"], 0);
        assert_eq!(ctx.active_streamers(), 0);
    }

    #[tokio::test]
    async fn repeated_start_spawns_another_streamer() {
        let ctx = make_test_context_with_bus(Arc::new(MemoryBus::default()));
        let (session, mut rx) = Session::channel(16);
        ctx.registry.put(Arc::clone(&session));
        let d = dispatcher();

        let _ = d.dispatch(&ctx, session.id(), &watch("start", "r1")).await;
        let _ = d.dispatch(&ctx, session.id(), &watch("start", "r2")).await;
        let _ = next(&mut rx).await;
        let _ = next(&mut rx).await;
        assert_eq!(ctx.active_streamers(), 2);

        let _ = ctx.registry.close(session.id());
        drain_until_stopped(&ctx).await;
    }

    #[tokio::test]
    async fn unknown_operation_closes_session() {
        let ctx = make_test_context_with_bus(Arc::new(MemoryBus::default()));
        let (session, mut rx) = Session::channel(16);
        ctx.registry.put(Arc::clone(&session));

        let outcome = dispatcher().dispatch(&ctx, session.id(), &watch("pause", "r1")).await;
        assert_eq!(outcome, DispatchOutcome::SessionClosed);
        assert!(session.is_closed());
        assert!(rx.try_recv().is_err());
        assert_eq!(ctx.active_streamers(), 0);
    }

    #[tokio::test]
    async fn start_on_closed_session_spawns_nothing() {
        let ctx = make_test_context_with_bus(Arc::new(MemoryBus::default()));
        let (session, mut rx) = Session::channel(16);
        let _ = session.on_closed();

        let envelope = Envelope::parse(&watch("start", "r1")).unwrap();
        let err = WatchLogHandler.handle(&envelope, &session, &ctx).await.unwrap_err();
        assert!(matches!(err, HandlerError::SessionGone(_)));
        assert_eq!(ctx.active_streamers(), 0);
        assert!(rx.try_recv().is_err());
    }
}

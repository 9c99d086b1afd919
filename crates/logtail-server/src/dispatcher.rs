//! Inbound message routing on the envelope's `action`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use logtail_core::SessionId;
use logtail_core::wire::Envelope;
use logtail_telemetry::metrics::{
    DISPATCH_ERRORS_TOTAL, DISPATCH_TOTAL, DISPATCH_UNHANDLED_TOTAL, SESSIONS_DECODE_CLOSED_TOTAL,
};
use metrics::counter;
use tracing::{debug, info, instrument, warn};

use crate::context::GatewayContext;
use crate::handlers::HandlerError;
use crate::session::Session;

/// Trait implemented by every action handler.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Handle one decoded envelope for `session`.
    async fn handle(
        &self,
        envelope: &Envelope,
        session: &Arc<Session>,
        ctx: &GatewayContext,
    ) -> Result<(), HandlerError>;
}

/// What happened to an inbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler ran (it may have logged a non-fatal error).
    Handled,
    /// No handler for the action; the session stays open.
    NotHandled,
    /// The session is closed, either already or because of this message.
    SessionClosed,
}

/// Collects handlers before the table is frozen into a [`Dispatcher`].
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `action`, replacing any earlier one.
    #[must_use]
    pub fn register(mut self, action: &str, handler: impl ActionHandler + 'static) -> Self {
        let _ = self.handlers.insert(action.to_owned(), Arc::new(handler));
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: self.handlers,
        }
    }
}

/// Immutable action table.
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Decode `raw` from `session_id` and run the matching handler.
    ///
    /// A decode failure, in the envelope or in a handler's payload, closes
    /// the sending session. Nothing here panics or touches other sessions.
    #[instrument(skip_all, fields(session_id = %session_id, action))]
    pub async fn dispatch(&self, ctx: &GatewayContext, session_id: &SessionId, raw: &[u8]) -> DispatchOutcome {
        let Some(session) = ctx.registry.get(session_id) else {
            debug!("message for unregistered session, ignoring");
            return DispatchOutcome::SessionClosed;
        };

        let envelope = match Envelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, error_type = e.error_kind(), "undecodable message, closing session");
                counter!(SESSIONS_DECODE_CLOSED_TOTAL).increment(1);
                let _ = ctx.registry.close(session_id);
                return DispatchOutcome::SessionClosed;
            }
        };

        let action = envelope.action();
        let _ = tracing::Span::current().record("action", action);

        let Some(handler) = self.handlers.get(action) else {
            info!("no handler for action");
            counter!(DISPATCH_UNHANDLED_TOTAL).increment(1);
            return DispatchOutcome::NotHandled;
        };

        counter!(DISPATCH_TOTAL, "action" => action.to_owned()).increment(1);
        match handler.handle(&envelope, &session, ctx).await {
            Ok(()) => DispatchOutcome::Handled,
            Err(HandlerError::Decode(e)) => {
                warn!(error = %e, error_type = e.error_kind(), "invalid payload, closing session");
                counter!(
                    DISPATCH_ERRORS_TOTAL,
                    "action" => action.to_owned(),
                    "error_type" => e.error_kind()
                )
                .increment(1);
                counter!(SESSIONS_DECODE_CLOSED_TOTAL).increment(1);
                let _ = ctx.registry.close(session_id);
                DispatchOutcome::SessionClosed
            }
            Err(e) => {
                warn!(error = %e, error_type = e.error_kind(), "handler failed");
                counter!(
                    DISPATCH_ERRORS_TOTAL,
                    "action" => action.to_owned(),
                    "error_type" => e.error_kind()
                )
                .increment(1);
                DispatchOutcome::Handled
            }
        }
    }

    /// Registered action names (sorted).
    pub fn actions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_helpers::make_test_context;
    use crate::session::SendError;
    use logtail_core::DecodeError;
    use logtail_core::TopicKey;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct EchoHandler;

    #[async_trait]
    impl ActionHandler for EchoHandler {
        async fn handle(
            &self,
            envelope: &Envelope,
            session: &Arc<Session>,
            _ctx: &GatewayContext,
        ) -> Result<(), HandlerError> {
            session.send(&json!({"echo": envelope.action()}))?;
            Ok(())
        }
    }

    struct FailHandler;

    #[async_trait]
    impl ActionHandler for FailHandler {
        async fn handle(
            &self,
            _envelope: &Envelope,
            _session: &Arc<Session>,
            _ctx: &GatewayContext,
        ) -> Result<(), HandlerError> {
            Err(HandlerError::Send(SendError::QueueFull))
        }
    }

    struct BadPayloadHandler;

    #[async_trait]
    impl ActionHandler for BadPayloadHandler {
        async fn handle(
            &self,
            _envelope: &Envelope,
            _session: &Arc<Session>,
            _ctx: &GatewayContext,
        ) -> Result<(), HandlerError> {
            Err(HandlerError::Decode(DecodeError::MissingAction))
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::builder()
            .register("echo", EchoHandler)
            .register("fail", FailHandler)
            .register("bad", BadPayloadHandler)
            .build()
    }

    fn registered(ctx: &GatewayContext) -> (Arc<Session>, mpsc::Receiver<Arc<String>>) {
        let (session, rx) = Session::channel(8);
        ctx.registry.put(Arc::clone(&session));
        (session, rx)
    }

    #[tokio::test]
    async fn routes_to_matching_handler() {
        let ctx = make_test_context();
        let (session, mut rx) = registered(&ctx);

        let outcome = dispatcher().dispatch(&ctx, session.id(), br#"{"action":"echo"}"#).await;
        assert_eq!(outcome, DispatchOutcome::Handled);
        let v: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(v["echo"], "echo");
    }

    #[tokio::test]
    async fn unknown_action_keeps_session_open() {
        let ctx = make_test_context();
        let (session, mut rx) = registered(&ctx);
        let d = dispatcher();

        let outcome = d.dispatch(&ctx, session.id(), br#"{"action":"nope"}"#).await;
        assert_eq!(outcome, DispatchOutcome::NotHandled);
        assert!(ctx.registry.contains(session.id()));
        assert!(rx.try_recv().is_err());

        let outcome = d.dispatch(&ctx, session.id(), br#"{"action":"echo"}"#).await;
        assert_eq!(outcome, DispatchOutcome::Handled);
    }

    #[tokio::test]
    async fn malformed_json_closes_only_the_sender() {
        let ctx = make_test_context();
        let (bad, _rx_bad) = registered(&ctx);
        let (good, _rx_good) = registered(&ctx);
        let topic = TopicKey::from_raw("a__u__s__v1");
        bad.set_topic_enabled(&topic, true);

        let outcome = dispatcher().dispatch(&ctx, bad.id(), b"{not json").await;
        assert_eq!(outcome, DispatchOutcome::SessionClosed);
        assert!(ctx.registry.get(bad.id()).is_none());
        assert!(bad.is_closed());
        assert!(!bad.topic_enabled(&topic));

        assert!(ctx.registry.contains(good.id()));
        assert!(!good.is_closed());
    }

    #[tokio::test]
    async fn envelope_without_action_closes_session() {
        let ctx = make_test_context();
        let (session, _rx) = registered(&ctx);
        let outcome = dispatcher().dispatch(&ctx, session.id(), br#"{"op":"x"}"#).await;
        assert_eq!(outcome, DispatchOutcome::SessionClosed);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn handler_decode_error_closes_session() {
        let ctx = make_test_context();
        let (session, _rx) = registered(&ctx);
        let outcome = dispatcher().dispatch(&ctx, session.id(), br#"{"action":"bad"}"#).await;
        assert_eq!(outcome, DispatchOutcome::SessionClosed);
        assert!(!ctx.registry.contains(session.id()));
    }

    #[tokio::test]
    async fn other_handler_errors_keep_session_open() {
        let ctx = make_test_context();
        let (session, _rx) = registered(&ctx);
        let outcome = dispatcher().dispatch(&ctx, session.id(), br#"{"action":"fail"}"#).await;
        assert_eq!(outcome, DispatchOutcome::Handled);
        assert!(ctx.registry.contains(session.id()));
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn unregistered_session_is_ignored() {
        let ctx = make_test_context();
        let (session, mut rx) = Session::channel(8);
        let outcome = dispatcher().dispatch(&ctx, session.id(), br#"{"action":"echo"}"#).await;
        assert_eq!(outcome, DispatchOutcome::SessionClosed);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn actions_are_sorted() {
        let d = dispatcher();
        assert_eq!(d.actions(), vec!["bad", "echo", "fail"]);
        assert!(d.has_action("echo"));
        assert!(!d.has_action("watch_log"));
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let d = Dispatcher::builder()
            .register("x", FailHandler)
            .register("x", EchoHandler)
            .build();
        assert_eq!(d.actions(), vec!["x"]);
    }
}

//! `heart_beat`: client keepalive.

use std::sync::Arc;

use async_trait::async_trait;
use logtail_core::wire::Envelope;
use tracing::debug;

use crate::context::GatewayContext;
use crate::dispatcher::ActionHandler;
use crate::handlers::HandlerError;
use crate::session::Session;

/// Logs the beat. Liveness is already recorded by the transport for every
/// inbound frame, and nothing is sent back.
pub struct HeartBeatHandler;

#[async_trait]
impl ActionHandler for HeartBeatHandler {
    async fn handle(
        &self,
        _envelope: &Envelope,
        session: &Arc<Session>,
        _ctx: &GatewayContext,
    ) -> Result<(), HandlerError> {
        debug!(session_id = %session.id(), "heart beat");
        Ok(())
    }
}

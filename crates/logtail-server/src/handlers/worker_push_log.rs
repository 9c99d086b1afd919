//! `worker_push_log`: worker ingress onto the bus.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use logtail_core::wire::{Envelope, WorkerPushLog};
use logtail_telemetry::metrics::{INGEST_ERRORS_TOTAL, LOG_LINES_INGESTED_TOTAL};
use metrics::counter;
use tracing::{trace, warn};

use crate::context::GatewayContext;
use crate::dispatcher::ActionHandler;
use crate::handlers::HandlerError;
use crate::session::Session;

/// Produces the worker's line to its topic, verbatim. No ack is sent and
/// bus errors stay server-side.
pub struct WorkerPushLogHandler;

#[async_trait]
impl ActionHandler for WorkerPushLogHandler {
    async fn handle(
        &self,
        envelope: &Envelope,
        session: &Arc<Session>,
        ctx: &GatewayContext,
    ) -> Result<(), HandlerError> {
        let push: WorkerPushLog = envelope.decode()?;

        match ctx.bus.produce(&push.topic, Bytes::from(push.log)).await {
            Ok(()) => {
                counter!(LOG_LINES_INGESTED_TOTAL).increment(1);
                trace!(session_id = %session.id(), topic = %push.topic, "ingested log line");
            }
            Err(e) => {
                counter!(INGEST_ERRORS_TOTAL, "error_type" => e.error_kind()).increment(1);
                warn!(
                    session_id = %session.id(),
                    topic = %push.topic,
                    error = %e,
                    "failed to produce worker log line"
                );
            }
        }
        Ok(())
    }
}

//! Handlers for the three inbound actions.

pub mod heart_beat;
pub mod watch_log;
pub mod worker_push_log;

use logtail_core::DecodeError;
use logtail_core::wire::{ACTION_HEART_BEAT, ACTION_WATCH_LOG, ACTION_WORKER_PUSH_LOG};

use crate::dispatcher::Dispatcher;
use crate::session::SendError;

pub use heart_beat::HeartBeatHandler;
pub use watch_log::WatchLogHandler;
pub use worker_push_log::WorkerPushLogHandler;

/// Handler failure. Only [`HandlerError::Decode`] closes the session.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("session {0} is closed")]
    SessionGone(String),
    #[error("send failed: {0}")]
    Send(#[from] SendError),
}

impl HandlerError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Decode(e) => e.error_kind(),
            Self::SessionGone(_) => "session_gone",
            Self::Send(e) => e.error_kind(),
        }
    }
}

/// The production action table.
pub fn default_dispatcher() -> Dispatcher {
    Dispatcher::builder()
        .register(ACTION_WATCH_LOG, WatchLogHandler)
        .register(ACTION_HEART_BEAT, HeartBeatHandler)
        .register(ACTION_WORKER_PUSH_LOG, WorkerPushLogHandler)
        .build()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_has_every_action() {
        let d = default_dispatcher();
        assert_eq!(d.actions(), vec!["heart_beat", "watch_log", "worker_push_log"]);
    }

    #[test]
    fn error_kinds() {
        assert_eq!(
            HandlerError::from(DecodeError::MissingAction).error_kind(),
            "missing_action"
        );
        assert_eq!(HandlerError::SessionGone("s".into()).error_kind(), "session_gone");
        assert_eq!(HandlerError::from(SendError::QueueFull).error_kind(), "queue_full");
    }
}

//! Process-wide lookup from session id to live session.

use std::sync::Arc;

use dashmap::DashMap;
use logtail_core::SessionId;
use tracing::debug;

use crate::session::Session;

/// Registry of all connected sessions.
///
/// Only the transport accept path calls [`put`](Self::put). Every teardown
/// goes through [`close`](Self::close), so a removed session is never
/// re-registered by a handler.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn put(&self, session: Arc<Session>) {
        let id = session.id().clone();
        if let Some(previous) = self.sessions.insert(id.clone(), session) {
            debug!(session_id = %id, "replaced existing session");
            let _ = previous.on_closed();
        }
    }

    /// Remove without closing.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Remove `id` and run its close hook. Returns `false` if it was not
    /// registered (already closed).
    pub fn close(&self, id: &SessionId) -> bool {
        match self.remove(id) {
            Some(session) => {
                let _ = session.on_closed();
                true
            }
            None => false,
        }
    }

    /// Close every registered session. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.close(id)).count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

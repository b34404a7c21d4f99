use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::model::SessionId;

/// Holds the backend-issued conversation id across sends and reconnects.
///
/// Clones share the same slot.
#[derive(Clone, Debug, Default)]
pub struct SessionTracker {
    current: Arc<RwLock<Option<SessionId>>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the held session id.
    pub fn current(&self) -> Option<SessionId> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Adopts a server-asserted id. Blank ids are ignored.
    ///
    /// Returns `true` when the held id changed.
    pub fn adopt(&self, id: &SessionId) -> bool {
        if id.is_blank() {
            return false;
        }
        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref() == Some(id) {
            return false;
        }
        debug!(session_id = %id, previous = ?slot.as_ref().map(SessionId::as_str), "adopting session id");
        *slot = Some(id.clone());
        true
    }

    /// Overrides the held id with one learned out of band. A blank id clears it.
    pub fn set(&self, id: SessionId) {
        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *slot = if id.is_blank() { None } else { Some(id) };
    }

    /// Forgets the held id so the next send starts a new conversation.
    pub fn reset(&self) -> Option<SessionId> {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Picks the id for an outbound request: a non-blank explicit id wins,
    /// otherwise the held one. The explicit id is not stored.
    pub fn resolve(&self, explicit: Option<SessionId>) -> Option<SessionId> {
        explicit
            .filter(|id| !id.is_blank())
            .or_else(|| self.current())
    }
}

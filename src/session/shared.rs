//! Read-only session snapshots for the rendering layer
//!
//! The orchestration task owns the live session and publishes a fresh
//! snapshot after every transition. Readers never see partial updates and
//! never hold a lock across a render.

use crate::conversation::{ConversationId, ConversationStore, Message};
use crate::session::{SessionStatus, TurnPhase};
use parking_lot::RwLock;
use std::sync::Arc;

/// Sidebar entry for one conversation
#[derive(Clone, Debug, PartialEq)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub title: String,
    pub message_count: usize,
}

/// Immutable view of the session
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub active_conversation: ConversationId,
    /// Conversations in listing order
    pub conversations: Vec<ConversationSummary>,
    /// Messages of the active conversation
    pub messages: Vec<Message>,
    pub playback_active: bool,
    pub turn_active: bool,
}

impl SessionSnapshot {
    pub fn capture(
        store: &ConversationStore,
        status: SessionStatus,
        playback_active: bool,
        turn_active: bool,
    ) -> Self {
        Self {
            status,
            active_conversation: store.active_id(),
            conversations: store
                .iter()
                .map(|c| ConversationSummary {
                    id: c.id,
                    title: c.title.clone(),
                    message_count: c.messages.len(),
                })
                .collect(),
            messages: store.active().messages.clone(),
            playback_active,
            turn_active,
        }
    }

    /// Whether the capture trigger should be enabled
    pub fn can_start_turn(&self) -> bool {
        self.status.phase.accepts_new_turn()
    }
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self::capture(&ConversationStore::new(), SessionStatus::default(), false, false)
    }
}

/// Thread-safe handle on the latest snapshot
#[derive(Clone, Default)]
pub struct SharedSession {
    inner: Arc<RwLock<SessionSnapshot>>,
}

impl SharedSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the published snapshot
    pub fn publish(&self, snapshot: SessionSnapshot) {
        *self.inner.write() = snapshot;
    }

    /// Get a copy of the current snapshot (no lock held after return)
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.read().clone()
    }

    pub fn phase(&self) -> TurnPhase {
        self.inner.read().status.phase
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.read().status.clone()
    }

    pub fn active_conversation(&self) -> ConversationId {
        self.inner.read().active_conversation
    }

    pub fn is_idle(&self) -> bool {
        self.inner.read().can_start_turn()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::derive_status;

    #[test]
    fn test_default_snapshot_matches_bootstrap() {
        let snapshot = SessionSnapshot::default();
        assert_eq!(snapshot.active_conversation, ConversationId(1));
        assert_eq!(snapshot.conversations.len(), 1);
        assert_eq!(snapshot.messages.len(), 1);
        assert!(snapshot.can_start_turn());
    }

    #[test]
    fn test_snapshot_is_independent() {
        let shared = SharedSession::new();
        let before = shared.snapshot();

        let mut store = ConversationStore::new();
        let id = store.create().id;
        store.switch_to(id);
        shared.publish(SessionSnapshot::capture(
            &store,
            derive_status(TurnPhase::Listening, None, None),
            false,
            true,
        ));

        assert_eq!(before.active_conversation, ConversationId(1));
        assert_eq!(shared.active_conversation(), id);
        assert_eq!(shared.phase(), TurnPhase::Listening);
        assert!(!shared.is_idle());
    }

    #[test]
    fn test_listing_order_in_summary() {
        let mut store = ConversationStore::new();
        store.create();
        let snapshot =
            SessionSnapshot::capture(&store, SessionStatus::default(), false, false);
        let ids: Vec<_> = snapshot.conversations.iter().map(|c| c.id.0).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(snapshot.conversations[0].title, "New Chat 2");
    }
}

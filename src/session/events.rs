//! State-change notifications for the rendering layer

use crate::conversation::ConversationId;
use crate::session::SessionStatus;
use uuid::Uuid;

/// Events emitted by the session on every state change
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// Phase, emotion or detail changed
    StatusChanged(SessionStatus),

    /// Conversations were created, deleted, renamed or switched
    ConversationsChanged { active: ConversationId },

    /// A message was appended
    MessageAppended {
        conversation_id: ConversationId,
        message_id: Uuid,
    },

    /// A streamed message grew or received its final text
    MessageUpdated {
        conversation_id: ConversationId,
        message_id: Uuid,
    },

    /// The turn failed; carries a user-facing explanation
    TurnFailed { message: String },

    /// The session has shut down
    Shutdown,
}

/// Receives session events
///
/// Observers are called synchronously from the orchestration task and must
/// not block.
pub trait SessionObserver: Send {
    fn notify(&self, event: &SessionEvent);
}

impl<F> SessionObserver for F
where
    F: Fn(&SessionEvent) + Send,
{
    fn notify(&self, event: &SessionEvent) {
        self(event)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Registry of observers
#[derive(Default)]
pub struct Observers {
    entries: Vec<(SubscriptionId, Box<dyn SessionObserver>)>,
    next_id: u64,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Box<dyn SessionObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, observer));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub fn emit(&self, event: &SessionEvent) {
        for (_, observer) in &self.entries {
            observer.notify(event);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

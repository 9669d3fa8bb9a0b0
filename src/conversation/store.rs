//! Conversation threads and the active-thread pointer
//!
//! Pure data: no I/O, no locking. The store is owned by the turn controller
//! and mutated only from the orchestration task.

use super::types::{
    default_title, derive_title, Conversation, ConversationId, Message, DEFAULT_BOOTSTRAP_TITLE,
    DEFAULT_GREETING,
};
use crate::{ParlanceError, Result};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ConversationStore {
    /// Listing order: most recently created first
    conversations: Vec<Conversation>,
    active: ConversationId,
    next_id: u64,
    greeting: String,
}

impl ConversationStore {
    /// Bootstrap a store with one seeded conversation
    pub fn new() -> Self {
        Self::with_greeting(DEFAULT_BOOTSTRAP_TITLE, DEFAULT_GREETING)
    }

    pub fn with_greeting(bootstrap_title: impl Into<String>, greeting: impl Into<String>) -> Self {
        let greeting = greeting.into();
        let id = ConversationId(1);
        let mut first = Conversation::new(id, bootstrap_title);
        first.messages.push(Message::assistant(greeting.clone()));

        Self {
            conversations: vec![first],
            active: id,
            next_id: 2,
            greeting,
        }
    }

    /// Create a new conversation and put it first in the listing
    ///
    /// Ids increase monotonically and are never reused, even after deletes.
    pub fn create(&mut self) -> &Conversation {
        let id = ConversationId(self.next_id);
        self.next_id += 1;

        let mut conversation = Conversation::new(id, default_title(id));
        conversation
            .messages
            .push(Message::assistant(self.greeting.clone()));
        self.conversations.insert(0, conversation);
        debug!("Created conversation {}", id);

        &self.conversations[0]
    }

    /// Point the active conversation at `id`
    ///
    /// Unknown ids are ignored; returns whether the pointer moved.
    pub fn switch_to(&mut self, id: ConversationId) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.active = id;
        true
    }

    /// Delete a conversation
    ///
    /// Fails with `InvariantViolation` when it is the only one left. When the
    /// active conversation is deleted the pointer moves to the first remaining
    /// entry in listing order. Returns `Ok(false)` for unknown ids.
    pub fn delete(&mut self, id: ConversationId) -> Result<bool> {
        let Some(index) = self.position(id) else {
            return Ok(false);
        };
        if self.conversations.len() == 1 {
            return Err(ParlanceError::InvariantViolation(
                "cannot delete the last conversation".to_string(),
            ));
        }

        self.conversations.remove(index);
        if self.active == id {
            self.active = self.conversations[0].id;
        }
        debug!("Deleted conversation {}, active is {}", id, self.active);
        Ok(true)
    }

    /// Append a message, returning its id
    pub fn append_message(&mut self, id: ConversationId, message: Message) -> Result<Uuid> {
        let conversation = self.get_mut(id)?;
        let message_id = message.id;
        conversation.messages.push(message);
        Ok(message_id)
    }

    /// Mutate one message in place, keeping its identity and position
    pub fn update_message<F>(&mut self, id: ConversationId, message_id: Uuid, f: F) -> Result<()>
    where
        F: FnOnce(&mut Message),
    {
        let conversation = self.get_mut(id)?;
        let message = conversation
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| {
                ParlanceError::InvariantViolation(format!(
                    "message {} not found in conversation {}",
                    message_id, id
                ))
            })?;
        f(message);
        Ok(())
    }

    /// Rename from a candidate title while the title is still the default
    pub fn rename_if_default(&mut self, id: ConversationId, candidate: &str) -> bool {
        match self.get_mut(id) {
            Ok(conversation) if conversation.has_default_title() => {
                conversation.title = derive_title(candidate);
                debug!("Conversation {} titled {:?}", id, conversation.title);
                true
            }
            _ => false,
        }
    }

    /// Set a user-chosen title; it is never auto-renamed afterwards
    pub fn rename(&mut self, id: ConversationId, title: impl Into<String>) -> Result<()> {
        self.get_mut(id)?.title = title.into();
        Ok(())
    }

    pub fn get(&self, id: ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: ConversationId) -> bool {
        self.position(id).is_some()
    }

    pub fn active_id(&self) -> ConversationId {
        self.active
    }

    pub fn active(&self) -> &Conversation {
        // The pointer always names a live conversation: delete reassigns it
        // and the store is never empty.
        self.get(self.active).unwrap_or(&self.conversations[0])
    }

    /// Conversations in listing order
    pub fn iter(&self) -> impl Iterator<Item = &Conversation> {
        self.conversations.iter()
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    fn position(&self, id: ConversationId) -> Option<usize> {
        self.conversations.iter().position(|c| c.id == id)
    }

    fn get_mut(&mut self, id: ConversationId) -> Result<&mut Conversation> {
        self.conversations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(ParlanceError::UnknownConversation(id))
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

use crate::session::Emotion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Greeting seeded into every new conversation
pub const DEFAULT_GREETING: &str = "Hello! I'm your AI tutor. How can I help you today?";

/// Title of the conversation created at bootstrap
pub const DEFAULT_BOOTSTRAP_TITLE: &str = "Getting Started";

/// Prefix of auto-generated titles ("New Chat N")
pub const DEFAULT_TITLE_PREFIX: &str = "New Chat ";

/// Maximum number of characters kept when deriving a title
pub const TITLE_MAX_CHARS: usize = 30;

/// Appended to a derived title that was truncated
pub const TITLE_ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub u64);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    /// Emotion reported by the backend for an assistant reply
    pub emotion: Option<Emotion>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            emotion: None,
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Empty assistant message that a streamed reply grows into
    pub fn placeholder() -> Self {
        Self::assistant(String::new())
    }

    pub fn with_emotion(mut self, emotion: Emotion) -> Self {
        self.emotion = Some(emotion);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: ConversationId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            messages: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn message(&self, id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Whether the title is still the auto-generated "New Chat N"
    pub fn has_default_title(&self) -> bool {
        is_default_title(&self.title)
    }
}

/// Title given to the conversation with the given id
pub fn default_title(id: ConversationId) -> String {
    format!("{}{}", DEFAULT_TITLE_PREFIX, id)
}

pub fn is_default_title(title: &str) -> bool {
    match title.strip_prefix(DEFAULT_TITLE_PREFIX) {
        Some(n) => !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

/// Derive a conversation title from a message
///
/// Keeps the first 30 characters and appends an ellipsis when anything was cut.
pub fn derive_title(text: &str) -> String {
    let mut chars = text.chars();
    let prefix: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{}{}", prefix, TITLE_ELLIPSIS)
    } else {
        prefix
    }
}

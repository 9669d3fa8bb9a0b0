pub mod store;
pub mod types;

pub use store::ConversationStore;
pub use types::{
    default_title, derive_title, is_default_title, Conversation, ConversationId, Message, Role,
    DEFAULT_BOOTSTRAP_TITLE, DEFAULT_GREETING,
};

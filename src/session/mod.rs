//! Session status, events and published snapshots

pub mod events;
pub mod shared;
pub mod status;

pub use events::{Observers, SessionEvent, SessionObserver, SubscriptionId};
pub use shared::{ConversationSummary, SessionSnapshot, SharedSession};
pub use status::{derive_status, Emotion, MascotInfo, SessionStatus, TurnPhase};

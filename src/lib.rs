pub mod backend;
pub mod conversation;
pub mod integration;
pub mod session;
pub mod speech;
pub mod view;

use conversation::ConversationId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParlanceError {
    #[error("Speech capture is not supported on this device")]
    CaptureUnsupported,

    #[error("Microphone permission denied")]
    CapturePermissionDenied,

    #[error("Speech recognition error: {0}")]
    CaptureRecognition(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("A turn is already in progress")]
    AlreadyActive,

    #[error("Unknown conversation: {0}")]
    UnknownConversation(ConversationId),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ParlanceError {
    fn from(e: std::io::Error) -> Self {
        ParlanceError::Io(e.to_string())
    }
}

impl From<reqwest::Error> for ParlanceError {
    fn from(e: reqwest::Error) -> Self {
        ParlanceError::Transport(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ParlanceError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ParlanceError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for ParlanceError {
    fn from(e: serde_json::Error) -> Self {
        ParlanceError::Transport(format!("malformed payload: {}", e))
    }
}

impl ParlanceError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            // The user can simply try again
            ParlanceError::CaptureRecognition(_) => true,
            ParlanceError::Backend(_) => true,
            ParlanceError::Transport(_) => true,
            ParlanceError::Playback(_) => true,
            // Rejected at the call site, nothing changed
            ParlanceError::InvariantViolation(_) => true,
            ParlanceError::AlreadyActive => true,
            ParlanceError::UnknownConversation(_) => true,
            // Require user intervention
            ParlanceError::CaptureUnsupported => false,
            ParlanceError::CapturePermissionDenied => false,
            ParlanceError::Config(_) => false,
            ParlanceError::Channel(_) => false,
            ParlanceError::Io(_) => false,
        }
    }

    /// Get a user-friendly description
    ///
    /// Never contains raw backend or exception text.
    pub fn user_message(&self) -> String {
        match self {
            ParlanceError::CaptureUnsupported => {
                "Speech recognition is not supported on this device.".to_string()
            }
            ParlanceError::CapturePermissionDenied => {
                "Microphone access was denied. Please allow microphone access and try again."
                    .to_string()
            }
            ParlanceError::CaptureRecognition(_) => {
                "I didn't catch that. Please try speaking again.".to_string()
            }
            ParlanceError::Backend(_) => {
                "Sorry, I can't answer right now. Please try again in a moment.".to_string()
            }
            ParlanceError::Transport(_) => {
                "Sorry, I couldn't process your request. Please try again.".to_string()
            }
            ParlanceError::InvariantViolation(_) => {
                "Cannot delete the last conversation.".to_string()
            }
            ParlanceError::AlreadyActive => {
                "Please wait for the current response to finish, or press stop.".to_string()
            }
            ParlanceError::UnknownConversation(_) => "That conversation no longer exists.".to_string(),
            ParlanceError::Playback(_) => {
                "Audio playback failed. Please check your speakers.".to_string()
            }
            ParlanceError::Config(_) => "Configuration error. Please check settings.".to_string(),
            ParlanceError::Channel(_) => {
                "Internal communication error. Please restart the application.".to_string()
            }
            ParlanceError::Io(_) => "File system error occurred.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ParlanceError>;

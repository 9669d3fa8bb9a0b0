//! Plain-text rendering of a session snapshot
//!
//! Rendering is a pure function of the snapshot; nothing here mutates or
//! reads live state.

use crate::conversation::{Message, Role};
use crate::session::{SessionSnapshot, SessionStatus};
use std::fmt::Write;

/// Text view over one snapshot
pub struct SessionView<'a> {
    snapshot: &'a SessionSnapshot,
}

impl<'a> SessionView<'a> {
    pub fn new(snapshot: &'a SessionSnapshot) -> Self {
        Self { snapshot }
    }

    /// Sidebar, transcript and status line
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.sidebar());
        out.push('\n');
        out.push_str(&self.transcript());
        out.push('\n');
        out.push_str(&status_line(&self.snapshot.status));
        out
    }

    /// Conversation list in listing order, active entry marked
    pub fn sidebar(&self) -> String {
        let mut out = String::from("Conversations:\n");
        for summary in &self.snapshot.conversations {
            let marker = if summary.id == self.snapshot.active_conversation {
                '*'
            } else {
                ' '
            };
            let _ = writeln!(
                out,
                "{} [{}] {} ({})",
                marker, summary.id, summary.title, summary.message_count
            );
        }
        out
    }

    pub fn transcript(&self) -> String {
        self.snapshot
            .messages
            .iter()
            .map(message_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Label for the capture trigger
    pub fn trigger_label(&self) -> &'static str {
        if self.snapshot.can_start_turn() {
            "Speak"
        } else {
            "Stop"
        }
    }
}

pub fn message_line(message: &Message) -> String {
    match message.role {
        Role::User => format!("You: {}", message.text),
        Role::Assistant => match message.emotion {
            Some(emotion) => format!("Tutor {}: {}", emotion.mascot().emoji, message.text),
            None => format!("Tutor: {}", message.text),
        },
    }
}

/// Mascot, status text and any failure detail
pub fn status_line(status: &SessionStatus) -> String {
    let mascot = status.emotion.mascot();
    match &status.detail {
        Some(detail) => format!("{} {} - {}", mascot.emoji, status.status_text, detail),
        None => format!("{} {}", mascot.emoji, status.status_text),
    }
}

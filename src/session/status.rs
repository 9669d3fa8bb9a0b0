//! User-visible status derivation
//!
//! The status shown to the user is a pure function of the turn phase, the
//! emotion the backend declared for the current reply, and an optional
//! failure detail. Nothing here holds state of its own.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Turn phase as shown to the user
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnPhase {
    #[default]
    Idle,
    Listening,
    Thinking,
    Speaking,
    Stopped,
    Error,
}

impl TurnPhase {
    /// Whether a new turn may be started from this phase
    pub fn accepts_new_turn(&self) -> bool {
        matches!(self, TurnPhase::Idle | TurnPhase::Stopped | TurnPhase::Error)
    }

    pub fn status_text(&self) -> &'static str {
        match self {
            TurnPhase::Idle => "Idle",
            TurnPhase::Listening => "Listening...",
            TurnPhase::Thinking => "Thinking...",
            TurnPhase::Speaking => "Speaking...",
            TurnPhase::Stopped => "Stopped",
            TurnPhase::Error => "Error",
        }
    }
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status_text())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Sad,
    Excited,
    Thinking,
    Listening,
    Angry,
}

impl Emotion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Excited => "excited",
            Emotion::Thinking => "thinking",
            Emotion::Listening => "listening",
            Emotion::Angry => "angry",
        }
    }

    /// Emotion for a completed reply, as declared by the backend
    ///
    /// Missing or unrecognised values fall back to `Happy`. The tone labels
    /// `cheerful` and `empathetic` map to `Happy` and `Sad`.
    pub fn from_backend(declared: Option<&str>) -> Self {
        match declared.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("cheerful") => Emotion::Happy,
            Some("empathetic") => Emotion::Sad,
            Some(other) => other.parse().unwrap_or(Emotion::Happy),
            None => Emotion::Happy,
        }
    }

    /// Whether this emotion may be shown while the tutor speaks
    pub fn is_spoken(&self) -> bool {
        matches!(self, Emotion::Happy | Emotion::Sad | Emotion::Excited)
    }

    /// Presentation of the mascot for this emotion
    pub fn mascot(&self) -> MascotInfo {
        match self {
            Emotion::Happy => MascotInfo::new("😊", "#10b981", "Happy"),
            Emotion::Sad => MascotInfo::new("😢", "#ef4444", "Sad"),
            Emotion::Excited => MascotInfo::new("🤩", "#f59e0b", "Excited"),
            Emotion::Thinking => MascotInfo::new("🤔", "#8b5cf6", "Thinking"),
            Emotion::Listening => MascotInfo::new("👂", "#06b6d4", "Listening"),
            Emotion::Angry => MascotInfo::new("😡", "#ef4444", "Angry"),
            Emotion::Neutral => MascotInfo::new("🙂", "#6366f1", "Neutral"),
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Emotion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "neutral" => Ok(Emotion::Neutral),
            "happy" => Ok(Emotion::Happy),
            "sad" => Ok(Emotion::Sad),
            "excited" => Ok(Emotion::Excited),
            "thinking" => Ok(Emotion::Thinking),
            "listening" => Ok(Emotion::Listening),
            "angry" => Ok(Emotion::Angry),
            other => Err(format!("unknown emotion: {}", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MascotInfo {
    pub emoji: &'static str,
    pub color: &'static str,
    pub label: &'static str,
}

impl MascotInfo {
    const fn new(emoji: &'static str, color: &'static str, label: &'static str) -> Self {
        Self {
            emoji,
            color,
            label,
        }
    }
}

/// What the UI shows for the session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub phase: TurnPhase,
    pub status_text: String,
    pub emotion: Emotion,
    /// User-facing cause of the last failure, if the phase is `Error`
    pub detail: Option<String>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        derive_status(TurnPhase::Idle, None, None)
    }
}

/// Map phase and backend emotion onto the user-visible pair
///
/// Listening and Thinking mirror the phase. Speaking shows the backend's
/// emotion when it is happy, sad or excited and happy otherwise. Error is
/// sad, everything else is neutral.
pub fn derive_status(
    phase: TurnPhase,
    backend_emotion: Option<Emotion>,
    detail: Option<&str>,
) -> SessionStatus {
    let emotion = match phase {
        TurnPhase::Listening => Emotion::Listening,
        TurnPhase::Thinking => Emotion::Thinking,
        TurnPhase::Speaking => backend_emotion
            .filter(Emotion::is_spoken)
            .unwrap_or(Emotion::Happy),
        TurnPhase::Error => Emotion::Sad,
        TurnPhase::Idle | TurnPhase::Stopped => Emotion::Neutral,
    };

    SessionStatus {
        phase,
        status_text: phase.status_text().to_string(),
        emotion,
        detail: match phase {
            TurnPhase::Error => detail.map(str::to_string),
            _ => None,
        },
    }
}

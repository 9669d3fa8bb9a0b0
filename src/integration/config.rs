//! Configuration for a chat session
//!
//! Loaded from an optional TOML file; every field has a default so an empty
//! file is valid.

use crate::conversation::types::{DEFAULT_BOOTSTRAP_TITLE, DEFAULT_GREETING};
use crate::{ParlanceError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Environment variable overriding `backend_url`
pub const BACKEND_URL_ENV: &str = "PARLANCE_BACKEND_URL";

/// How queries reach the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// One request, one complete reply
    #[default]
    Rest,
    /// Token-streamed replies over the persistent chat channel
    Stream,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base URL of the tutor backend
    pub backend_url: String,

    /// Session id used for backend-side history
    pub session_id: String,

    pub transport: Transport,

    /// Use `/chat` instead of `/query` on the REST transport
    pub session_history: bool,

    /// Synthesis voice; the backend default when unset
    pub voice: Option<String>,

    pub request_timeout_ms: u64,

    /// Assistant greeting seeded into every new conversation
    pub greeting: String,

    /// Title of the conversation created at startup
    pub bootstrap_title: String,

    /// Capacity of the event channel towards the UI
    pub event_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8000".to_string(),
            session_id: "default".to_string(),
            transport: Transport::Rest,
            session_history: false,
            voice: None,
            request_timeout_ms: 30_000,
            greeting: DEFAULT_GREETING.to_string(),
            bootstrap_title: DEFAULT_BOOTSTRAP_TITLE.to_string(),
            event_buffer_size: 256,
        }
    }
}

impl SessionConfig {
    /// Load from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ParlanceError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| ParlanceError::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ParlanceError::Config(e.to_string()))
    }

    /// Apply overrides from the process environment
    pub fn with_env_overrides(self) -> Self {
        match std::env::var(BACKEND_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => self.with_backend_url(url.trim()),
            _ => self,
        }
    }

    pub fn with_backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend_url = url.into();
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Keep conversation history on the backend (`/chat`)
    pub fn with_session_history(mut self) -> Self {
        self.session_history = true;
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = greeting.into();
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let url = self.backend_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ParlanceError::Config(format!(
                "backend_url must be http(s): {}",
                self.backend_url
            )));
        }
        if self.session_id.trim().is_empty() {
            return Err(ParlanceError::Config("session_id is required".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ParlanceError::Config(
                "request_timeout_ms must be positive".into(),
            ));
        }
        if self.bootstrap_title.trim().is_empty() {
            return Err(ParlanceError::Config("bootstrap_title is required".into()));
        }
        if self.event_buffer_size == 0 {
            return Err(ParlanceError::Config(
                "event_buffer_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.transport, Transport::Rest);
        assert!(!config.session_history);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = SessionConfig::default()
            .with_backend_url("http://tutor.local:9000")
            .with_transport(Transport::Stream)
            .with_session_history()
            .with_voice("en_US-amy");

        assert_eq!(config.backend_url, "http://tutor.local:9000");
        assert_eq!(config.transport, Transport::Stream);
        assert!(config.session_history);
        assert_eq!(config.voice.as_deref(), Some("en_US-amy"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SessionConfig::from_toml_str(
            r#"
            backend_url = "http://10.0.0.2:8000"
            transport = "stream"
            "#,
        )
        .unwrap();

        assert_eq!(config.backend_url, "http://10.0.0.2:8000");
        assert_eq!(config.transport, Transport::Stream);
        assert_eq!(config.greeting, DEFAULT_GREETING);
        assert_eq!(config.request_timeout_ms, 30_000);
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            SessionConfig::from_toml_str("transport = \"carrier pigeon\""),
            Err(ParlanceError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects() {
        let config = SessionConfig::default().with_backend_url("ftp://nope");
        assert!(config.validate().is_err());

        let config = SessionConfig::default().with_session_id("  ");
        assert!(config.validate().is_err());

        let config = SessionConfig {
            request_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

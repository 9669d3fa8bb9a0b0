//! HTTP client for the tutor backend REST endpoints

use crate::backend::protocol::{
    ChatRequest, ErrorReply, HealthReport, QueryReply, QueryRequest, SynthesisRequest,
    TranscriptionReply,
};
use crate::speech::AudioClip;
use crate::{ParlanceError, Result};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone, Debug)]
pub struct BackendClient {
    http: Client,
    base_url: String,
    voice: Option<String>,
}

impl BackendClient {
    /// Create a client for the backend at `base_url`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ParlanceError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            voice: None,
        })
    }

    /// Request a specific synthesis voice
    pub fn with_voice(mut self, voice: Option<String>) -> Self {
        self.voice = voice;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `POST /query`: one complete, history-free answer
    pub async fn query(&self, text: &str) -> Result<QueryReply> {
        debug!("POST /query ({} chars)", text.len());
        let response = self
            .http
            .post(self.url("/query"))
            .json(&QueryRequest { query: text })
            .send()
            .await?;
        read_json(response).await
    }

    /// `POST /chat`: answer using the backend's history for `session_id`
    pub async fn chat(&self, session_id: &str, text: &str) -> Result<QueryReply> {
        debug!("POST /chat (session={})", session_id);
        let response = self
            .http
            .post(self.url("/chat"))
            .json(&ChatRequest {
                session_id,
                query: text,
            })
            .send()
            .await?;
        read_json(response).await
    }

    /// `POST /tts`: synthesize speech, returning raw audio bytes
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        debug!("POST /tts ({} chars)", text.len());
        let response = self
            .http
            .post(self.url("/tts"))
            .json(&SynthesisRequest {
                text,
                voice: self.voice.as_deref(),
            })
            .send()
            .await?;

        let status = response.status();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/json"))
            .unwrap_or(false);
        let body = response.bytes().await?;

        if !status.is_success() || is_json {
            return Err(match serde_json::from_slice::<ErrorReply>(&body) {
                Ok(reply) => ParlanceError::Backend(reply.error),
                Err(_) => ParlanceError::Transport(format!("synthesis failed with HTTP {}", status)),
            });
        }
        if body.is_empty() {
            return Err(ParlanceError::Transport(
                "synthesis returned no audio".to_string(),
            ));
        }

        Ok(body.to_vec())
    }

    /// `POST /stt`: transcribe a recorded clip
    pub async fn transcribe(&self, clip: AudioClip) -> Result<String> {
        info!(
            "Uploading {} ({} bytes) for transcription",
            clip.file_name,
            clip.bytes.len()
        );
        let part = Part::bytes(clip.bytes)
            .file_name(clip.file_name)
            .mime_str(&clip.mime_type)?;
        let form = Form::new().part("file", part);

        let response = self
            .http
            .post(self.url("/stt"))
            .multipart(form)
            .send()
            .await?;
        let reply: TranscriptionReply = read_json(response).await?;

        match (reply.text, reply.error) {
            (_, Some(error)) => Err(ParlanceError::Backend(error)),
            (Some(text), None) => Ok(text),
            (None, None) => Err(ParlanceError::Transport(
                "transcription reply carried no text".to_string(),
            )),
        }
    }

    /// `GET /healthz`
    pub async fn health(&self) -> Result<HealthReport> {
        let response = self.http.get(self.url("/healthz")).send().await?;
        read_json(response).await
    }
}

/// Decode a JSON body regardless of status
///
/// The backend reports its own failures as `{error}` bodies with a 4xx/5xx
/// status, so the body is parsed first and the status only matters when it
/// cannot be.
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let body = response.bytes().await?;

    match serde_json::from_slice(&body) {
        Ok(value) => Ok(value),
        Err(_) if !status.is_success() => Err(ParlanceError::Transport(format!(
            "request failed with HTTP {}",
            status
        ))),
        Err(e) => Err(e.into()),
    }
}

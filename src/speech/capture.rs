//! Single-shot speech capture over a platform recognition capability

use crate::backend::BackendClient;
use crate::ParlanceError;
use async_trait::async_trait;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("speech capture unsupported")]
    Unsupported,

    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("recognition failed: {0}")]
    Recognition(String),
}

impl From<CaptureError> for ParlanceError {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::Unsupported => ParlanceError::CaptureUnsupported,
            CaptureError::PermissionDenied => ParlanceError::CapturePermissionDenied,
            CaptureError::Recognition(msg) => ParlanceError::CaptureRecognition(msg),
        }
    }
}

/// Events of one recognition session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Result(String),
    Error(CaptureError),
    End,
}

/// Platform speech-recognition capability
pub trait SpeechRecognizer: Send + Sync {
    /// Begin a recognition session
    ///
    /// Dropping the receiver abandons the session.
    fn start(&self) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>, CaptureError>;
}

/// Single-shot capture: the first result or error wins
pub struct SpeechCapture {
    recognizer: Arc<dyn SpeechRecognizer>,
}

impl SpeechCapture {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        Self { recognizer }
    }

    /// Capture one utterance
    ///
    /// No retries. Anything the recognizer emits after the first result or
    /// error is ignored.
    pub async fn capture(&self) -> Result<String, CaptureError> {
        let mut events = self.recognizer.start()?;
        debug!("Speech capture started");

        while let Some(event) = events.recv().await {
            match event {
                RecognitionEvent::Result(text) => {
                    let transcript = text.trim();
                    if transcript.is_empty() {
                        return Err(CaptureError::Recognition("no speech detected".to_string()));
                    }
                    info!("Captured transcript ({} chars)", transcript.len());
                    return Ok(transcript.to_string());
                }
                RecognitionEvent::Error(e) => {
                    warn!("Speech capture failed: {}", e);
                    return Err(e);
                }
                RecognitionEvent::End => break,
            }
        }

        Err(CaptureError::Recognition(
            "recognition ended without a result".to_string(),
        ))
    }
}

/// A recorded audio clip ready for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            file_name: file_name.into(),
        }
    }

    /// Clip as produced by a browser-style media recorder
    pub fn webm(bytes: Vec<u8>) -> Self {
        Self::new(bytes, "audio/webm", "recording.webm")
    }
}

/// Platform media-capture capability (stream → recorder → clip)
#[async_trait]
pub trait AudioRecorder: Send + Sync {
    async fn record(&self) -> Result<AudioClip, CaptureError>;
}

/// Recorder that hands back a clip previously saved to disk
pub struct FileRecorder {
    path: PathBuf,
}

impl FileRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AudioRecorder for FileRecorder {
    async fn record(&self) -> Result<AudioClip, CaptureError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CaptureError::Unsupported,
            std::io::ErrorKind::PermissionDenied => CaptureError::PermissionDenied,
            _ => CaptureError::Recognition(e.to_string()),
        })?;

        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("recording.webm")
            .to_string();
        Ok(AudioClip::new(bytes, mime_for_path(&self.path), file_name))
    }
}

fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        _ => "audio/webm",
    }
}

/// Recognition by recording a clip and transcribing it on the backend (`/stt`)
pub struct RecordedRecognizer {
    recorder: Arc<dyn AudioRecorder>,
    client: BackendClient,
}

impl RecordedRecognizer {
    pub fn new(recorder: Arc<dyn AudioRecorder>, client: BackendClient) -> Self {
        Self { recorder, client }
    }
}

impl SpeechRecognizer for RecordedRecognizer {
    fn start(&self) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>, CaptureError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| CaptureError::Unsupported)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = Arc::clone(&self.recorder);
        let client = self.client.clone();

        runtime.spawn(async move {
            let work = async {
                match recorder.record().await {
                    Ok(clip) => client
                        .transcribe(clip)
                        .await
                        .map_err(|e| CaptureError::Recognition(e.to_string())),
                    Err(e) => Err(e),
                }
            };

            tokio::select! {
                _ = tx.closed() => debug!("Recording abandoned"),
                result = work => {
                    let event = match result {
                        Ok(text) => RecognitionEvent::Result(text),
                        Err(e) => RecognitionEvent::Error(e),
                    };
                    let _ = tx.send(event);
                    let _ = tx.send(RecognitionEvent::End);
                }
            }
        });

        Ok(rx)
    }
}

/// Recognizer fed with utterances by the front-end (typed or scripted speech)
pub struct QueuedRecognizer {
    utterances: Receiver<String>,
}

/// Producer side of a [`QueuedRecognizer`]
///
/// Holds at most one pending utterance: a new push replaces one that no
/// turn has taken yet.
#[derive(Clone)]
pub struct UtteranceQueue {
    tx: Sender<String>,
    pending: Receiver<String>,
}

impl UtteranceQueue {
    pub fn push(&self, utterance: impl Into<String>) {
        if self.clear() > 0 {
            debug!("Replaced an utterance no turn picked up");
        }
        let _ = self.tx.send(utterance.into());
    }

    /// Drop any utterance still waiting; returns how many were dropped
    pub fn clear(&self) -> usize {
        self.pending.try_iter().count()
    }
}

impl QueuedRecognizer {
    pub fn new() -> (Self, UtteranceQueue) {
        let (tx, rx) = unbounded();
        (
            Self {
                utterances: rx.clone(),
            },
            UtteranceQueue { tx, pending: rx },
        )
    }
}

impl SpeechRecognizer for QueuedRecognizer {
    fn start(&self) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>, CaptureError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let event = match self.utterances.try_recv() {
            Ok(text) => RecognitionEvent::Result(text),
            Err(_) => RecognitionEvent::Error(CaptureError::Recognition(
                "nothing was said".to_string(),
            )),
        };
        let _ = tx.send(event);
        let _ = tx.send(RecognitionEvent::End);
        Ok(rx)
    }
}

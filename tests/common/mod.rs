//! Fakes shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use parlance::backend::{QueryBackend, QueryEvent, QueryStream};
use parlance::integration::{SessionConfig, TurnController};
use parlance::session::{SessionEvent, SessionStatus};
use parlance::speech::{PlaybackController, QueuedRecognizer, SilentPlayback, SpeechCapture, UtteranceQueue};
use parlance::{ParlanceError, Result};
use std::sync::Arc;
use tokio::sync::Notify;

/// One scripted reply: stream items, optionally ending without a terminal event
pub type Reply = Vec<Result<QueryEvent>>;

/// Backend replaying scripted replies, optionally held until released
pub struct FakeBackend {
    replies: Mutex<Vec<Reply>>,
    gate: Option<Arc<Notify>>,
    synthesis: Mutex<Option<ParlanceError>>,
    pub queries: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies),
            gate: None,
            synthesis: Mutex::new(None),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Queries wait until the returned gate is notified
    pub fn gated(replies: Vec<Reply>) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let mut backend = Self::new(replies);
        backend.gate = Some(Arc::clone(&gate));
        (backend, gate)
    }

    pub fn failing_synthesis(self, error: ParlanceError) -> Self {
        *self.synthesis.lock() = Some(error);
        self
    }
}

#[async_trait]
impl QueryBackend for FakeBackend {
    async fn query(&self, text: &str) -> Result<QueryStream> {
        self.queries.lock().push(text.to_string());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let reply = {
            let mut replies = self.replies.lock();
            if replies.is_empty() {
                Vec::new()
            } else {
                replies.remove(0)
            }
        };
        Ok(stream::iter(reply).boxed())
    }

    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
        match self.synthesis.lock().clone() {
            Some(error) => Err(error),
            None => Ok(b"audio".to_vec()),
        }
    }
}

pub fn reply(events: Vec<QueryEvent>) -> Reply {
    events.into_iter().map(Ok).collect()
}

pub fn token(text: &str) -> QueryEvent {
    QueryEvent::Token { text: text.into() }
}

pub fn final_event(text: &str, emotion: Option<&str>) -> QueryEvent {
    QueryEvent::Final {
        text: text.into(),
        emotion: emotion.map(str::to_string),
    }
}

/// Controller with a typed-utterance recognizer and silent playback
pub fn controller(backend: Arc<dyn QueryBackend>) -> (TurnController, UtteranceQueue) {
    let (recognizer, queue) = QueuedRecognizer::new();
    let controller = TurnController::new(
        &SessionConfig::default(),
        SpeechCapture::new(Arc::new(recognizer)),
        backend,
        PlaybackController::new(Box::new(SilentPlayback::new())),
    );
    (controller, queue)
}

/// Record every status the controller reports
pub fn record_statuses(controller: &mut TurnController) -> Arc<Mutex<Vec<SessionStatus>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    controller.subscribe(Box::new(move |event: &SessionEvent| {
        if let SessionEvent::StatusChanged(status) = event {
            sink.lock().push(status.clone());
        }
    }));
    seen
}

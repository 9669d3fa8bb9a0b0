//! Turn state machine
//!
//! One voice turn runs capture → query → (stream) → synthesize → play. Every
//! suspension point is a spawned task that reports back through a channel as
//! a [`TurnEnvelope`] tagged with the generation that started it. The
//! controller applies envelopes one at a time; anything from a generation
//! other than the live turn's is discarded before it can touch state.

use crate::backend::{QueryBackend, QueryEvent};
use crate::conversation::{ConversationId, ConversationStore, Message};
use crate::integration::config::SessionConfig;
use crate::session::{
    derive_status, Emotion, Observers, SessionEvent, SessionObserver, SessionSnapshot,
    SessionStatus, SharedSession, SubscriptionId, TurnPhase,
};
use crate::speech::{CaptureError, PlaybackController, PlaybackHandle, SpeechCapture};
use crate::{ParlanceError, Result};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Listening,
    Transcribing,
    Querying,
    Streaming,
    Synthesizing,
    Playing,
    /// Stopped by the user
    Interrupted,
    Errored,
}

impl TurnState {
    /// States that accept a new turn
    pub fn is_resting(&self) -> bool {
        matches!(
            self,
            TurnState::Idle | TurnState::Interrupted | TurnState::Errored
        )
    }

    pub fn phase(&self) -> TurnPhase {
        match self {
            TurnState::Idle => TurnPhase::Idle,
            TurnState::Listening => TurnPhase::Listening,
            TurnState::Transcribing | TurnState::Querying | TurnState::Streaming => {
                TurnPhase::Thinking
            }
            TurnState::Synthesizing | TurnState::Playing => TurnPhase::Speaking,
            TurnState::Interrupted => TurnPhase::Stopped,
            TurnState::Errored => TurnPhase::Error,
        }
    }
}

/// Results reported by turn tasks
#[derive(Debug)]
pub enum TurnInput {
    Captured(std::result::Result<String, CaptureError>),
    Reply(QueryEvent),
    /// The query could not be issued or its stream failed
    ReplyFailed(ParlanceError),
    /// The reply stream ended without a terminal event
    ReplyClosed,
    Synthesized(Result<Vec<u8>>),
    PlaybackEnded(PlaybackHandle),
}

#[derive(Debug)]
pub struct TurnEnvelope {
    pub generation: u64,
    pub input: TurnInput,
}

struct ActiveTurn {
    generation: u64,
    conversation_id: ConversationId,
    token: CancellationToken,
    /// Assistant message the reply is written into
    reply: Option<Uuid>,
    reply_text: String,
}

pub struct TurnController {
    store: ConversationStore,
    state: TurnState,
    backend_emotion: Option<Emotion>,
    /// User-facing cause of the last failure
    failure: Option<String>,
    generation: u64,
    turn: Option<ActiveTurn>,
    capture: Arc<SpeechCapture>,
    backend: Arc<dyn QueryBackend>,
    playback: PlaybackController,
    inputs_tx: mpsc::UnboundedSender<TurnEnvelope>,
    inputs_rx: mpsc::UnboundedReceiver<TurnEnvelope>,
    observers: Observers,
    shared: SharedSession,
    pending: Vec<SessionEvent>,
    last_status: SessionStatus,
}

impl TurnController {
    pub fn new(
        config: &SessionConfig,
        capture: SpeechCapture,
        backend: Arc<dyn QueryBackend>,
        playback: PlaybackController,
    ) -> Self {
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let store = ConversationStore::with_greeting(&config.bootstrap_title, &config.greeting);
        let last_status = derive_status(TurnPhase::Idle, None, None);
        let shared = SharedSession::new();
        shared.publish(SessionSnapshot::capture(&store, last_status.clone(), false, false));

        Self {
            store,
            state: TurnState::Idle,
            backend_emotion: None,
            failure: None,
            generation: 0,
            turn: None,
            capture: Arc::new(capture),
            backend,
            playback,
            inputs_tx,
            inputs_rx,
            observers: Observers::new(),
            shared,
            pending: Vec::new(),
            last_status,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn status(&self) -> SessionStatus {
        derive_status(
            self.state.phase(),
            self.backend_emotion,
            self.failure.as_deref(),
        )
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_turn_active(&self) -> bool {
        self.turn.is_some()
    }

    /// Handle on the published snapshots
    pub fn shared(&self) -> SharedSession {
        self.shared.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::capture(
            &self.store,
            self.status(),
            self.playback.is_playing(),
            self.turn.is_some(),
        )
    }

    pub fn subscribe(&mut self, observer: Box<dyn SessionObserver>) -> SubscriptionId {
        self.observers.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Begin a voice turn in the active conversation
    pub fn start_turn(&mut self) -> Result<u64> {
        if !self.state.is_resting() {
            return Err(ParlanceError::AlreadyActive);
        }

        self.generation += 1;
        let generation = self.generation;
        let token = CancellationToken::new();
        self.turn = Some(ActiveTurn {
            generation,
            conversation_id: self.store.active_id(),
            token: token.clone(),
            reply: None,
            reply_text: String::new(),
        });
        self.backend_emotion = None;
        self.failure = None;
        self.state = TurnState::Listening;
        info!("Turn {} started", generation);

        let capture = Arc::clone(&self.capture);
        let tx = self.inputs_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => debug!("Capture for turn {} cancelled", generation),
                result = capture.capture() => {
                    let _ = tx.send(TurnEnvelope { generation, input: TurnInput::Captured(result) });
                }
            }
        });

        self.flush();
        Ok(generation)
    }

    /// Cancel the turn in flight
    ///
    /// Returns false when there was nothing to stop.
    pub fn stop(&mut self) -> bool {
        let stopped = self.interrupt();
        self.flush();
        stopped
    }

    pub fn switch_conversation(&mut self, id: ConversationId) -> Result<()> {
        if !self.store.contains(id) {
            return Err(ParlanceError::UnknownConversation(id));
        }

        self.interrupt();
        self.store.switch_to(id);
        self.settle_idle();
        self.pending
            .push(SessionEvent::ConversationsChanged { active: id });
        info!("Switched to conversation {}", id);
        self.flush();
        Ok(())
    }

    /// Start a fresh conversation and make it active
    pub fn new_chat(&mut self) -> ConversationId {
        self.interrupt();
        let id = self.store.create().id;
        self.store.switch_to(id);
        self.settle_idle();
        self.pending
            .push(SessionEvent::ConversationsChanged { active: id });
        info!("New chat {}", id);
        self.flush();
        id
    }

    /// Delete a conversation; `Ok(false)` when it does not exist
    pub fn delete_conversation(&mut self, id: ConversationId) -> Result<bool> {
        if !self.store.contains(id) {
            return Ok(false);
        }
        if self.store.len() == 1 {
            return Err(ParlanceError::InvariantViolation(
                "cannot delete the last conversation".to_string(),
            ));
        }

        let owns_turn = self
            .turn
            .as_ref()
            .map(|t| t.conversation_id == id)
            .unwrap_or(false);
        if owns_turn {
            self.interrupt();
        }

        let deleted = self.store.delete(id)?;
        self.pending.push(SessionEvent::ConversationsChanged {
            active: self.store.active_id(),
        });
        self.flush();
        Ok(deleted)
    }

    /// Set a user-chosen title
    pub fn rename_conversation(&mut self, id: ConversationId, title: &str) -> Result<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ParlanceError::InvariantViolation(
                "title cannot be empty".to_string(),
            ));
        }
        self.store.rename(id, title)?;
        self.pending.push(SessionEvent::ConversationsChanged {
            active: self.store.active_id(),
        });
        self.flush();
        Ok(())
    }

    /// Tell observers the session is over
    pub fn emit_shutdown(&mut self) {
        self.pending.push(SessionEvent::Shutdown);
        self.flush();
    }

    /// Wait for the next task report
    pub async fn next_input(&mut self) -> Option<TurnEnvelope> {
        self.inputs_rx.recv().await
    }

    /// Wait for and apply one task report
    pub async fn step(&mut self) {
        if let Some(envelope) = self.next_input().await {
            self.handle_input(envelope);
        }
    }

    /// Apply task reports until the turn comes to rest
    pub async fn run_turn(&mut self) {
        while self.turn.is_some() {
            self.step().await;
        }
    }

    /// Apply one task report
    pub fn handle_input(&mut self, envelope: TurnEnvelope) {
        let live = self.turn.as_ref().map(|t| t.generation);
        if live != Some(envelope.generation) {
            debug!(
                "Discarding input from generation {} (live: {:?})",
                envelope.generation, live
            );
            return;
        }

        match envelope.input {
            TurnInput::Captured(Ok(transcript)) => self.on_transcript(transcript),
            TurnInput::Captured(Err(e)) => self.on_capture_failed(e.into()),
            TurnInput::Reply(event) => self.on_reply_event(event),
            TurnInput::ReplyFailed(e) => self.fail_with_message(e),
            TurnInput::ReplyClosed => self.fail_with_message(ParlanceError::Transport(
                "reply ended before the final event".to_string(),
            )),
            TurnInput::Synthesized(Ok(audio)) => self.on_audio(audio),
            TurnInput::Synthesized(Err(e)) => self.fail_with_message(
                ParlanceError::Transport(format!("synthesis failed: {}", e)),
            ),
            TurnInput::PlaybackEnded(handle) => {
                if self.playback.finish(handle) {
                    info!("Turn {} finished", envelope.generation);
                    self.end_turn(TurnState::Idle);
                }
            }
        }

        self.flush();
    }

    fn on_transcript(&mut self, transcript: String) {
        self.state = TurnState::Transcribing;
        let Some(conversation_id) = self.turn.as_ref().map(|t| t.conversation_id) else {
            return;
        };

        match self
            .store
            .append_message(conversation_id, Message::user(transcript.clone()))
        {
            Ok(message_id) => self.pending.push(SessionEvent::MessageAppended {
                conversation_id,
                message_id,
            }),
            Err(e) => {
                error!("Cannot record transcript: {}", e);
                self.end_turn(TurnState::Errored);
                return;
            }
        }
        if self.store.rename_if_default(conversation_id, &transcript) {
            self.pending.push(SessionEvent::ConversationsChanged {
                active: self.store.active_id(),
            });
        }

        self.state = TurnState::Querying;
        self.spawn_query(transcript);
    }

    fn on_capture_failed(&mut self, e: ParlanceError) {
        warn!("Capture failed: {}", e);
        let message = e.user_message();
        self.end_turn(TurnState::Errored);
        self.failure = Some(message.clone());
        self.pending.push(SessionEvent::TurnFailed { message });
    }

    fn on_reply_event(&mut self, event: QueryEvent) {
        match event {
            QueryEvent::Start => {
                self.ensure_reply();
                self.state = TurnState::Streaming;
            }
            QueryEvent::Token { text } => {
                self.ensure_reply();
                self.state = TurnState::Streaming;
                if let Some(turn) = self.turn.as_mut() {
                    turn.reply_text.push_str(&text);
                }
                self.update_reply(|m| m.text.push_str(&text));
            }
            QueryEvent::Final { text, emotion } => {
                self.ensure_reply();
                let emotion = Emotion::from_backend(emotion.as_deref());
                self.backend_emotion = Some(emotion);

                let changed = self
                    .turn
                    .as_ref()
                    .map(|t| t.reply_text != text)
                    .unwrap_or(false);
                if let Some(turn) = self.turn.as_mut() {
                    turn.reply_text = text.clone();
                }
                self.update_reply(|m| {
                    if changed {
                        m.text = text.clone();
                    }
                    m.emotion = Some(emotion);
                });

                if text.trim().is_empty() {
                    debug!("Empty reply, nothing to speak");
                    self.end_turn(TurnState::Idle);
                    return;
                }
                self.state = TurnState::Synthesizing;
                self.spawn_synthesis(text);
            }
            QueryEvent::Error { message } => {
                warn!("Backend declined the query: {}", message);
                self.fail_with_message(ParlanceError::Backend(message));
            }
        }
    }

    fn on_audio(&mut self, audio: Vec<u8>) {
        let Some(generation) = self.turn.as_ref().map(|t| t.generation) else {
            return;
        };
        let tx = self.inputs_tx.clone();
        let played = self.playback.play(audio, move |handle| {
            let _ = tx.send(TurnEnvelope {
                generation,
                input: TurnInput::PlaybackEnded(handle),
            });
        });

        match played {
            Ok(_) => self.state = TurnState::Playing,
            Err(e) => {
                error!("Playback failed: {}", e);
                self.end_turn(TurnState::Errored);
                self.failure = Some(e.user_message());
            }
        }
    }

    /// Create the assistant message on first use
    fn ensure_reply(&mut self) {
        let Some(turn) = self.turn.as_mut() else {
            return;
        };
        if turn.reply.is_some() {
            return;
        }
        let conversation_id = turn.conversation_id;
        match self
            .store
            .append_message(conversation_id, Message::placeholder())
        {
            Ok(message_id) => {
                turn.reply = Some(message_id);
                self.pending.push(SessionEvent::MessageAppended {
                    conversation_id,
                    message_id,
                });
            }
            Err(e) => error!("Cannot create reply message: {}", e),
        }
    }

    fn update_reply<F: FnOnce(&mut Message)>(&mut self, f: F) {
        let Some((conversation_id, message_id)) = self
            .turn
            .as_ref()
            .and_then(|t| t.reply.map(|m| (t.conversation_id, m)))
        else {
            return;
        };
        match self.store.update_message(conversation_id, message_id, f) {
            Ok(()) => self.pending.push(SessionEvent::MessageUpdated {
                conversation_id,
                message_id,
            }),
            Err(e) => error!("Cannot update reply message: {}", e),
        }
    }

    /// End the turn with one assistant message explaining the failure
    fn fail_with_message(&mut self, e: ParlanceError) {
        warn!("Turn failed: {}", e);
        let message = e.user_message();

        let reuse_placeholder = self
            .turn
            .as_ref()
            .map(|t| t.reply.is_some() && t.reply_text.is_empty())
            .unwrap_or(false);
        if reuse_placeholder {
            let text = message.clone();
            self.update_reply(move |m| m.text = text);
        } else if let Some(conversation_id) = self.turn.as_ref().map(|t| t.conversation_id) {
            match self
                .store
                .append_message(conversation_id, Message::assistant(message.clone()))
            {
                Ok(message_id) => self.pending.push(SessionEvent::MessageAppended {
                    conversation_id,
                    message_id,
                }),
                Err(e) => error!("Cannot record failure message: {}", e),
            }
        }

        self.end_turn(TurnState::Errored);
        self.failure = Some(message.clone());
        self.pending.push(SessionEvent::TurnFailed { message });
    }

    /// Cancel the live turn's tasks and move to `state`
    fn end_turn(&mut self, state: TurnState) {
        if let Some(turn) = self.turn.take() {
            turn.token.cancel();
        }
        self.state = state;
        if state != TurnState::Errored {
            self.failure = None;
        }
        self.backend_emotion = None;
    }

    fn interrupt(&mut self) -> bool {
        if self.state.is_resting() {
            return false;
        }
        if let Some(handle) = self.playback.stop_active() {
            debug!("Stopped clip {}", handle.id());
        }
        // Inputs already queued by the old turn no longer match
        self.generation += 1;
        self.end_turn(TurnState::Interrupted);
        info!("Turn interrupted");
        true
    }

    fn settle_idle(&mut self) {
        self.state = TurnState::Idle;
        self.failure = None;
        self.backend_emotion = None;
    }

    fn spawn_query(&self, text: String) {
        let Some(turn) = self.turn.as_ref() else {
            return;
        };
        let generation = turn.generation;
        let token = turn.token.clone();
        let backend = Arc::clone(&self.backend);
        let tx = self.inputs_tx.clone();

        tokio::spawn(async move {
            let send = |input: TurnInput| {
                let _ = tx.send(TurnEnvelope { generation, input });
            };
            let relay = async {
                let mut stream = match backend.query(&text).await {
                    Ok(stream) => stream,
                    Err(e) => return send(TurnInput::ReplyFailed(e)),
                };
                loop {
                    match stream.next().await {
                        Some(Ok(event)) => {
                            let terminal = event.is_terminal();
                            send(TurnInput::Reply(event));
                            if terminal {
                                return;
                            }
                        }
                        Some(Err(e)) => return send(TurnInput::ReplyFailed(e)),
                        None => return send(TurnInput::ReplyClosed),
                    }
                }
            };

            tokio::select! {
                _ = token.cancelled() => debug!("Query for turn {} cancelled", generation),
                _ = relay => {}
            }
        });
    }

    fn spawn_synthesis(&self, text: String) {
        let Some(turn) = self.turn.as_ref() else {
            return;
        };
        let generation = turn.generation;
        let token = turn.token.clone();
        let backend = Arc::clone(&self.backend);
        let tx = self.inputs_tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => debug!("Synthesis for turn {} cancelled", generation),
                audio = backend.synthesize(&text) => {
                    let _ = tx.send(TurnEnvelope { generation, input: TurnInput::Synthesized(audio) });
                }
            }
        });
    }

    /// Publish the snapshot, then notify observers
    fn flush(&mut self) {
        let status = self.status();
        if status != self.last_status {
            self.pending.push(SessionEvent::StatusChanged(status.clone()));
            self.last_status = status;
        }

        self.shared.publish(self.snapshot());
        for event in std::mem::take(&mut self.pending) {
            self.observers.emit(&event);
        }
    }
}

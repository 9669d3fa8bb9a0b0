//! Async driver for the session
//!
//! Owns the [`TurnController`] on a single tokio task and serializes UI
//! commands with turn-task reports. The UI talks to it through an
//! [`OrchestratorHandle`]: commands go in over a channel, session events come
//! back over a crossbeam channel, and the latest snapshot is always readable
//! through [`SharedSession`].

use crate::backend::QueryBackend;
use crate::conversation::ConversationId;
use crate::integration::config::SessionConfig;
use crate::integration::controller::TurnController;
use crate::session::{SessionEvent, SessionSnapshot, SharedSession};
use crate::speech::{PlaybackController, SpeechCapture};
use crate::{ParlanceError, Result};
use crossbeam_channel::{bounded, Receiver, TryRecvError, TrySendError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Commands accepted by the orchestrator
#[derive(Debug)]
pub enum SessionCommand {
    StartTurn {
        reply: oneshot::Sender<Result<u64>>,
    },
    Stop {
        reply: oneshot::Sender<bool>,
    },
    NewChat {
        reply: oneshot::Sender<ConversationId>,
    },
    Switch {
        id: ConversationId,
        reply: oneshot::Sender<Result<()>>,
    },
    Delete {
        id: ConversationId,
        reply: oneshot::Sender<Result<bool>>,
    },
    Rename {
        id: ConversationId,
        title: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

/// Handle for controlling the session from the UI
#[derive(Clone)]
pub struct OrchestratorHandle {
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    event_rx: Receiver<SessionEvent>,
    shared: SharedSession,
}

impl OrchestratorHandle {
    fn send(&self, command: SessionCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| ParlanceError::Channel("orchestrator is not running".to_string()))
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply))?;
        rx.await
            .map_err(|_| ParlanceError::Channel("orchestrator dropped the reply".to_string()))
    }

    /// Begin a voice turn; returns its generation
    pub async fn start_turn(&self) -> Result<u64> {
        self.request(|reply| SessionCommand::StartTurn { reply }).await?
    }

    /// Stop the turn in flight; false when nothing was running
    pub async fn stop(&self) -> Result<bool> {
        self.request(|reply| SessionCommand::Stop { reply }).await
    }

    pub async fn new_chat(&self) -> Result<ConversationId> {
        self.request(|reply| SessionCommand::NewChat { reply }).await
    }

    pub async fn switch_conversation(&self, id: ConversationId) -> Result<()> {
        self.request(|reply| SessionCommand::Switch { id, reply })
            .await?
    }

    pub async fn delete_conversation(&self, id: ConversationId) -> Result<bool> {
        self.request(|reply| SessionCommand::Delete { id, reply })
            .await?
    }

    pub async fn rename_conversation(&self, id: ConversationId, title: impl Into<String>) -> Result<()> {
        let title = title.into();
        self.request(|reply| SessionCommand::Rename { id, title, reply })
            .await?
    }

    /// Ask the orchestrator to shut down
    pub fn shutdown(&self) -> Result<()> {
        self.send(SessionCommand::Shutdown)
    }

    /// Try to receive an event from the orchestrator
    pub fn try_recv_event(&self) -> Option<SessionEvent> {
        match self.event_rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the next event
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<SessionEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    /// Event receiver for a dedicated UI thread
    pub fn event_receiver(&self) -> Receiver<SessionEvent> {
        self.event_rx.clone()
    }

    pub fn shared(&self) -> SharedSession {
        self.shared.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot()
    }
}

/// Owns the session and runs its event loop
pub struct Orchestrator {
    controller: TurnController,
    backend: Arc<dyn QueryBackend>,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,
}

impl Orchestrator {
    pub fn new(
        config: &SessionConfig,
        capture: SpeechCapture,
        backend: Arc<dyn QueryBackend>,
        playback: PlaybackController,
    ) -> (Self, OrchestratorHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = bounded(config.event_buffer_size.max(1));

        let mut controller =
            TurnController::new(config, capture, Arc::clone(&backend), playback);
        controller.subscribe(Box::new(move |event: &SessionEvent| {
            match event_tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => warn!("UI is not draining events, dropping one"),
                Err(TrySendError::Disconnected(_)) => {}
            }
        }));

        let handle = OrchestratorHandle {
            command_tx,
            event_rx,
            shared: controller.shared(),
        };

        let orchestrator = Self {
            controller,
            backend,
            command_rx,
        };

        (orchestrator, handle)
    }

    /// Start the event loop on the current runtime
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!("Orchestrator started");

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => {
                        info!("Orchestrator shutdown requested");
                        break;
                    }
                    Some(command) => self.apply(command),
                },
                Some(envelope) = self.controller.next_input() => {
                    self.controller.handle_input(envelope);
                }
            }
        }

        self.controller.stop();
        if let Err(e) = self.backend.shutdown().await {
            warn!("Backend shutdown failed: {}", e);
        }
        self.controller.emit_shutdown();
        info!("Orchestrator stopped");
    }

    fn apply(&mut self, command: SessionCommand) {
        debug!("Command: {:?}", command);
        match command {
            SessionCommand::StartTurn { reply } => {
                let _ = reply.send(self.controller.start_turn());
            }
            SessionCommand::Stop { reply } => {
                let _ = reply.send(self.controller.stop());
            }
            SessionCommand::NewChat { reply } => {
                let _ = reply.send(self.controller.new_chat());
            }
            SessionCommand::Switch { id, reply } => {
                let _ = reply.send(self.controller.switch_conversation(id));
            }
            SessionCommand::Delete { id, reply } => {
                let _ = reply.send(self.controller.delete_conversation(id));
            }
            SessionCommand::Rename { id, title, reply } => {
                let _ = reply.send(self.controller.rename_conversation(id, &title));
            }
            SessionCommand::Shutdown => {}
        }
    }
}

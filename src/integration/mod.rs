//! Turn orchestration: configuration, the turn state machine and its async driver

pub mod config;
pub mod controller;
pub mod orchestrator;

pub use config::{SessionConfig, Transport};
pub use controller::{TurnController, TurnEnvelope, TurnInput, TurnState};
pub use orchestrator::{Orchestrator, OrchestratorHandle, SessionCommand};

use anyhow::{Context, Result};
use clap::Parser;
use parlance::backend::{backend_from_config, BackendClient};
use parlance::conversation::ConversationId;
use parlance::integration::{Orchestrator, OrchestratorHandle, SessionConfig, Transport};
use parlance::session::{SessionEvent, TurnPhase};
use parlance::speech::{
    default_provider, FileRecorder, PlaybackController, QueuedRecognizer, RecordedRecognizer,
    SpeechCapture, UtteranceQueue,
};
use parlance::view::{message_line, status_line, SessionView};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Voice tutor chat client
#[derive(Parser, Debug)]
#[command(name = "parlance", version, about = "Voice tutor chat client")]
struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Backend base URL (overrides config and environment)
    #[arg(long, value_name = "URL")]
    backend_url: Option<String>,

    /// Stream replies over the chat channel
    #[arg(long)]
    stream: bool,

    /// Session id for backend-side history
    #[arg(long, value_name = "ID")]
    session_id: Option<String>,

    /// Speak by uploading this recording instead of typing
    #[arg(long, value_name = "PATH")]
    audio_file: Option<PathBuf>,

    /// Do not play replies on the output device
    #[arg(long)]
    no_audio: bool,
}

enum Input {
    Utterance(String),
    New,
    Switch(ConversationId),
    Delete(ConversationId),
    Rename(ConversationId, String),
    Stop,
    List,
    Health,
    Quit,
    Help,
}

fn parse_input(line: &str) -> Option<Input> {
    let line = line.trim();
    let Some(command) = line.strip_prefix('/') else {
        return Some(Input::Utterance(line.to_string()));
    };

    let mut parts = command.splitn(3, ' ');
    let id = |s: Option<&str>| s.and_then(|s| s.parse().ok()).map(ConversationId);
    match parts.next()? {
        "new" => Some(Input::New),
        "switch" => id(parts.next()).map(Input::Switch),
        "delete" => id(parts.next()).map(Input::Delete),
        "rename" => {
            let target = id(parts.next())?;
            let title = parts.next()?.to_string();
            Some(Input::Rename(target, title))
        }
        "stop" => Some(Input::Stop),
        "list" => Some(Input::List),
        "health" => Some(Input::Health),
        "quit" | "exit" => Some(Input::Quit),
        _ => Some(Input::Help),
    }
}

const HELP: &str = "Type to speak. Commands: /new, /switch N, /delete N, /rename N title, /stop, /list, /health, /quit";

fn load_config(cli: &Cli) -> Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    }
    .with_env_overrides();

    if let Some(url) = &cli.backend_url {
        config = config.with_backend_url(url);
    }
    if let Some(session_id) = &cli.session_id {
        config = config.with_session_id(session_id);
    }
    if cli.stream {
        config = config.with_transport(Transport::Stream);
    }
    config.validate()?;
    Ok(config)
}

/// Print session events as they arrive
fn spawn_printer(handle: &OrchestratorHandle) -> std::thread::JoinHandle<()> {
    let events = handle.event_receiver();
    let shared = handle.shared();
    std::thread::spawn(move || {
        while let Ok(event) = events.recv() {
            match event {
                SessionEvent::StatusChanged(status) => {
                    if status.phase == TurnPhase::Speaking {
                        if let Some(reply) = shared.snapshot().messages.last() {
                            println!("{}", message_line(reply));
                        }
                    }
                    println!("  [{}]", status_line(&status));
                }
                SessionEvent::TurnFailed { message } => println!("Tutor: {}", message),
                SessionEvent::Shutdown => break,
                _ => {}
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlance=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli).context("invalid configuration")?;
    info!("Starting parlance against {}", config.backend_url);

    let client = BackendClient::new(&config.backend_url, config.request_timeout())?;
    let backend = backend_from_config(&config)?;

    let (capture, queue): (SpeechCapture, Option<UtteranceQueue>) = match &cli.audio_file {
        Some(path) => {
            let recognizer =
                RecordedRecognizer::new(Arc::new(FileRecorder::new(path)), client.clone());
            (SpeechCapture::new(Arc::new(recognizer)), None)
        }
        None => {
            let (recognizer, queue) = QueuedRecognizer::new();
            (SpeechCapture::new(Arc::new(recognizer)), Some(queue))
        }
    };
    let playback = PlaybackController::new(default_provider(!cli.no_audio));

    let (orchestrator, handle) = Orchestrator::new(&config, capture, backend, playback);
    let task = orchestrator.start();
    let printer = spawn_printer(&handle);

    println!("{}", SessionView::new(&handle.snapshot()).render());
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(input) = parse_input(&line) else {
            println!("{}", HELP);
            continue;
        };

        let outcome = match input {
            Input::Utterance(text) => {
                if let Some(queue) = &queue {
                    if text.is_empty() {
                        continue;
                    }
                    queue.push(text);
                }
                let started = handle.start_turn().await.map(|_| ());
                if started.is_err() {
                    if let Some(queue) = &queue {
                        queue.clear();
                    }
                }
                started
            }
            Input::New => handle.new_chat().await.map(|id| {
                println!("Started conversation {}", id);
            }),
            Input::Switch(id) => handle.switch_conversation(id).await.map(|_| {
                println!("{}", SessionView::new(&handle.snapshot()).transcript());
            }),
            Input::Delete(id) => handle.delete_conversation(id).await.map(|deleted| {
                if !deleted {
                    println!("No conversation {}", id);
                }
            }),
            Input::Rename(id, title) => handle.rename_conversation(id, title).await,
            Input::Stop => handle.stop().await.map(|_| ()),
            Input::List => {
                println!("{}", SessionView::new(&handle.snapshot()).sidebar());
                Ok(())
            }
            Input::Health => match client.health().await {
                Ok(report) => {
                    println!(
                        "Backend {} (retrieval available: {})",
                        report.status, report.rag_available
                    );
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Input::Quit => break,
            Input::Help => {
                println!("{}", HELP);
                Ok(())
            }
        };

        if let Err(e) = outcome {
            warn!("{}", e);
            println!("{}", e.user_message());
        }
    }

    handle.shutdown()?;
    task.await?;
    if printer.join().is_err() {
        warn!("Event printer panicked");
    }
    info!("Goodbye");
    Ok(())
}

//! Query and synthesis backends
//!
//! Both the request/response endpoints and the streamed chat channel are
//! exposed through one contract: a query yields a stream of [`QueryEvent`]s.
//! A complete REST reply is simply a `Start` followed by a `Final`.

pub mod channel;
pub mod client;
pub mod protocol;

pub use channel::ChatChannel;
pub use client::BackendClient;
pub use protocol::{HealthReport, QueryEvent, QueryReply};

use crate::integration::config::{SessionConfig, Transport};
use crate::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tracing::info;

/// Reply events in arrival order
pub type QueryStream = BoxStream<'static, Result<QueryEvent>>;

#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Issue a query; the stream ends after a terminal event
    async fn query(&self, text: &str) -> Result<QueryStream>;

    /// Synthesize speech for a completed reply
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;

    /// Release persistent connections when the session ends
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Request/response backend (`/query`, or `/chat` with session history)
pub struct RestBackend {
    client: BackendClient,
    session_id: Option<String>,
}

impl RestBackend {
    pub fn new(client: BackendClient) -> Self {
        Self {
            client,
            session_id: None,
        }
    }

    /// Use `/chat` so the backend keeps history for `session_id`
    pub fn with_session_history(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[async_trait]
impl QueryBackend for RestBackend {
    async fn query(&self, text: &str) -> Result<QueryStream> {
        let reply = match &self.session_id {
            Some(session_id) => self.client.chat(session_id, text).await?,
            None => self.client.query(text).await?,
        };
        let events = reply.into_events()?;
        Ok(stream::iter(events.into_iter().map(Ok)).boxed())
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.client.synthesize(text).await
    }
}

/// Streamed replies over the chat channel, synthesis over HTTP
pub struct StreamingBackend {
    client: BackendClient,
    channel: ChatChannel,
}

impl StreamingBackend {
    pub fn new(client: BackendClient, channel: ChatChannel) -> Self {
        Self { client, channel }
    }

    pub fn channel(&self) -> &ChatChannel {
        &self.channel
    }
}

#[async_trait]
impl QueryBackend for StreamingBackend {
    async fn query(&self, text: &str) -> Result<QueryStream> {
        self.channel.query(text).await
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.client.synthesize(text).await
    }

    async fn shutdown(&self) -> Result<()> {
        self.channel.close().await
    }
}

/// Build the backend selected by the configuration
pub fn backend_from_config(config: &SessionConfig) -> Result<Arc<dyn QueryBackend>> {
    let client = BackendClient::new(&config.backend_url, config.request_timeout())?
        .with_voice(config.voice.clone());

    let backend: Arc<dyn QueryBackend> = match config.transport {
        Transport::Rest => {
            let rest = RestBackend::new(client);
            if config.session_history {
                Arc::new(rest.with_session_history(config.session_id.clone()))
            } else {
                Arc::new(rest)
            }
        }
        Transport::Stream => {
            let channel = ChatChannel::new(&config.backend_url, &config.session_id)?;
            Arc::new(StreamingBackend::new(client, channel))
        }
    };

    info!(
        "Using {:?} backend at {}",
        config.transport, config.backend_url
    );
    Ok(backend)
}

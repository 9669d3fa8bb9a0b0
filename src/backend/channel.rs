//! Persistent streaming chat channel (`/ws/chat`)
//!
//! The server does not tag frames with a request id, so frames from an
//! abandoned reply would be indistinguishable from the next reply's. The
//! connection therefore travels with the reply stream: it is returned to the
//! channel only after a terminal frame. Dropping a stream early drops the
//! connection, and the next query reconnects.

use crate::backend::protocol::{parse_server_frame, QueryRequest};
use crate::backend::QueryStream;
use crate::{ParlanceError, Result};
use async_stream::stream;
use futures::{SinkExt, StreamExt};
use reqwest::Url;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type Connection = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct ChatChannel {
    url: Url,
    slot: Arc<Mutex<Option<Connection>>>,
}

impl ChatChannel {
    /// Channel for `session_id` on the backend at `base_url` (`http://` or `ws://`)
    pub fn new(base_url: &str, session_id: &str) -> Result<Self> {
        Ok(Self {
            url: chat_url(base_url, session_id)?,
            slot: Arc::new(Mutex::new(None)),
        })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    /// Whether an idle connection is currently held
    pub async fn is_connected(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Open the connection ahead of the first query
    pub async fn connect(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        if slot.is_none() {
            *slot = Some(self.open().await?);
        }
        Ok(())
    }

    /// Close the connection when the session ends
    pub async fn close(&self) -> Result<()> {
        if let Some(mut conn) = self.slot.lock().await.take() {
            conn.close(None).await?;
            info!("Chat channel closed");
        }
        Ok(())
    }

    /// Send a query and stream the reply frames
    pub async fn query(&self, text: &str) -> Result<QueryStream> {
        let held = self.slot.lock().await.take();
        let mut conn = match held {
            Some(conn) => conn,
            None => self.open().await?,
        };

        let payload = serde_json::to_string(&QueryRequest { query: text })?;
        conn.send(Frame::Text(payload)).await?;
        debug!("Query sent on chat channel");

        let slot = Arc::clone(&self.slot);
        let reply = stream! {
            let terminal = loop {
                match conn.next().await {
                    Some(Ok(Frame::Text(text))) => match parse_server_frame(&text) {
                        Ok(event) if event.is_terminal() => break Ok(event),
                        Ok(event) => {
                            yield Ok(event);
                        }
                        Err(e) => warn!("Ignoring unrecognised chat frame: {}", e),
                    },
                    Some(Ok(Frame::Close(_))) | None => {
                        break Err(ParlanceError::Transport(
                            "chat channel closed before the reply finished".to_string(),
                        ));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(ParlanceError::from(e)),
                }
            };

            if terminal.is_ok() {
                *slot.lock().await = Some(conn);
            }
            yield terminal;
        };

        Ok(Box::pin(reply))
    }

    async fn open(&self) -> Result<Connection> {
        let (conn, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        info!("Chat channel connected: {}", self.url);
        Ok(conn)
    }
}

/// Build `ws://host/ws/chat?session_id=<id>` from the backend base URL
pub fn chat_url(base_url: &str, session_id: &str) -> Result<Url> {
    let mut url = Url::parse(base_url)
        .map_err(|e| ParlanceError::Config(format!("Invalid backend URL {}: {}", base_url, e)))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ParlanceError::Config(format!(
                "Unsupported backend scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ParlanceError::Config(format!("Cannot use {} for {}", scheme, base_url)))?;

    let path = format!("{}/ws/chat", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    url.query_pairs_mut().append_pair("session_id", session_id);

    Ok(url)
}

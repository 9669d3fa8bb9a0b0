//! Wire formats for the tutor backend

use crate::{ParlanceError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct QueryRequest<'a> {
    pub query: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub session_id: &'a str,
    pub query: &'a str,
}

#[derive(Debug, Serialize)]
pub struct SynthesisRequest<'a> {
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<&'a str>,
}

/// Body of `/query` and `/chat` replies: `{text, emotion?}` or `{error}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryReply {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub emotion: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl QueryReply {
    /// Express a complete reply as the events a streamed reply would produce
    pub fn into_events(self) -> Result<Vec<QueryEvent>> {
        if let Some(message) = self.error {
            return Ok(vec![QueryEvent::Error { message }]);
        }
        match self.text {
            Some(text) => Ok(vec![
                QueryEvent::Start,
                QueryEvent::Final {
                    text,
                    emotion: self.emotion,
                },
            ]),
            None => Err(ParlanceError::Transport(
                "reply carried neither text nor error".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptionReply {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorReply {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(default)]
    pub rag_available: bool,
}

impl HealthReport {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// One step of a reply, shared by the request/response and streamed paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QueryEvent {
    /// Reply started; the client creates the placeholder message
    Start,
    /// Incremental text appended to the placeholder
    Token { text: String },
    /// Complete reply text, superseding the accumulated tokens
    Final {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        emotion: Option<String>,
    },
    /// Backend-declared failure
    Error {
        #[serde(alias = "error")]
        message: String,
    },
}

impl QueryEvent {
    /// Whether the reply ends with this event
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryEvent::Final { .. } | QueryEvent::Error { .. })
    }
}

/// Parse one frame received on the chat channel
pub fn parse_server_frame(frame: &str) -> Result<QueryEvent> {
    Ok(serde_json::from_str(frame)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stream_frames() {
        assert_eq!(parse_server_frame(r#"{"type":"start"}"#).unwrap(), QueryEvent::Start);
        assert_eq!(
            parse_server_frame(r#"{"type":"token","text":"Hel"}"#).unwrap(),
            QueryEvent::Token { text: "Hel".into() }
        );
        assert_eq!(
            parse_server_frame(r#"{"type":"final","text":"Hello","emotion":"happy"}"#).unwrap(),
            QueryEvent::Final {
                text: "Hello".into(),
                emotion: Some("happy".into())
            }
        );
        assert_eq!(
            parse_server_frame(r#"{"type":"final","text":"Hello"}"#).unwrap(),
            QueryEvent::Final {
                text: "Hello".into(),
                emotion: None
            }
        );
        assert_eq!(
            parse_server_frame(r#"{"type":"error","message":"Empty query"}"#).unwrap(),
            QueryEvent::Error {
                message: "Empty query".into()
            }
        );
    }

    #[test]
    fn test_unknown_frame_is_error() {
        let result = parse_server_frame(r#"{"type":"heartbeat"}"#);
        assert!(matches!(result, Err(ParlanceError::Transport(_))));
    }

    #[test]
    fn test_reply_into_events() {
        let reply: QueryReply =
            serde_json::from_str(r#"{"text":"Water boils at 100C","emotion":"excited"}"#).unwrap();
        let events = reply.into_events().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], QueryEvent::Start);
        assert!(events[1].is_terminal());

        let reply: QueryReply = serde_json::from_str(r#"{"error":"rate limited"}"#).unwrap();
        assert_eq!(
            reply.into_events().unwrap(),
            vec![QueryEvent::Error {
                message: "rate limited".into()
            }]
        );

        let reply: QueryReply = serde_json::from_str("{}").unwrap();
        assert!(reply.into_events().is_err());
    }

    #[test]
    fn test_synthesis_request_omits_missing_voice() {
        let body = serde_json::to_string(&SynthesisRequest {
            text: "hi",
            voice: None,
        })
        .unwrap();
        assert_eq!(body, r#"{"text":"hi"}"#);
    }
}

//! JSON framing for the streaming endpoint.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{ClientError, ErrorKind};
use crate::event::{ClientEvent, Completion, ErrorEvent, SourceRef, StreamChunk};
use crate::model::{RequestId, SessionId};

/// Outbound chat request, one text frame per request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatRequest {
    /// User text. The backend reads it from the `query` field.
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub request_id: RequestId,
}

impl ChatRequest {
    pub fn new(query: impl Into<String>, session_id: Option<SessionId>) -> Self {
        Self {
            query: query.into(),
            session_id,
            request_id: RequestId::new(),
        }
    }
}

pub fn encode_request(request: &ChatRequest) -> Result<String, ClientError> {
    serde_json::to_string(request)
        .map_err(|e| ClientError::protocol(format!("failed to encode chat request: {e}")))
}

#[derive(Deserialize)]
struct StreamFrame {
    content: String,
    #[serde(default)]
    is_complete: bool,
    #[serde(default)]
    request_id: Option<String>,
}

#[derive(Deserialize)]
struct CompleteFrame {
    #[serde(default)]
    sources: Option<Vec<SourceRef>>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
}

#[derive(Deserialize)]
struct ErrorFrame {
    #[serde(default, alias = "detail")]
    message: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
}

/// Decodes one server text frame.
///
/// Returns `Ok(None)` for well-formed frames of a type this client does not
/// know, so newer servers can add frame types.
pub fn decode_frame(text: &str) -> Result<Option<ClientEvent>, ClientError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| ClientError::protocol(format!("invalid JSON frame: {e}")))?;
    decode_value(value)
}

pub fn decode_value(value: serde_json::Value) -> Result<Option<ClientEvent>, ClientError> {
    if !value.is_object() {
        return Err(ClientError::protocol("frame is not a JSON object"));
    }
    let Some(frame_type) = value.get("type").and_then(|v| v.as_str()) else {
        return Err(ClientError::protocol("frame has no `type` field"));
    };
    match frame_type {
        "stream" => {
            let frame: StreamFrame = parse_frame("stream", value)?;
            Ok(Some(ClientEvent::Stream(StreamChunk {
                request_id: parse_request_id(frame.request_id.as_deref()),
                seq: 0,
                content: frame.content,
                is_complete: frame.is_complete,
            })))
        }
        "complete" => {
            let frame: CompleteFrame = parse_frame("complete", value)?;
            Ok(Some(ClientEvent::Complete(Completion {
                request_id: parse_request_id(frame.request_id.as_deref()),
                sources: frame.sources.unwrap_or_default(),
                session_id: frame
                    .session_id
                    .map(SessionId::new)
                    .filter(|id| !id.is_blank()),
                error: frame.error.filter(|e| !e.trim().is_empty()),
            })))
        }
        "error" => {
            let frame: ErrorFrame = parse_frame("error", value)?;
            let mut event = ErrorEvent::new(
                ErrorKind::Server,
                frame
                    .message
                    .unwrap_or_else(|| "server reported an error".to_string()),
            );
            event.request_id = parse_request_id(frame.request_id.as_deref());
            Ok(Some(ClientEvent::Error(event)))
        }
        other => {
            debug!(frame_type = other, "ignoring unknown frame type");
            Ok(None)
        }
    }
}

fn parse_frame<T: serde::de::DeserializeOwned>(
    frame_type: &str,
    value: serde_json::Value,
) -> Result<T, ClientError> {
    serde_json::from_value(value)
        .map_err(|e| ClientError::protocol(format!("malformed `{frame_type}` frame: {e}")))
}

fn parse_request_id(raw: Option<&str>) -> Option<RequestId> {
    raw.and_then(RequestId::parse)
}

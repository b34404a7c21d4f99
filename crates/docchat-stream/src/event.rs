use std::fmt;
use std::str::FromStr;

use crate::bus::Categorized;
use crate::errors::{ClientError, ErrorKind};
use crate::model::{RequestId, SessionId};

/// Event categories a subscriber can register for.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EventKind {
    Open,
    Close,
    Error,
    Stream,
    Complete,
}

impl EventKind {
    /// Every category, in lifecycle order.
    pub const ALL: [EventKind; 5] = [
        EventKind::Open,
        EventKind::Close,
        EventKind::Error,
        EventKind::Stream,
        EventKind::Complete,
    ];

    /// Wire/log name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Error => "error",
            Self::Stream => "stream",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ClientError::config(format!("unknown event category: {s}")))
    }
}

/// Page reference on a citation. The backend sends a number when it knows the
/// page and a label such as `"N/A"` when it does not.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum PageRef {
    Number(u64),
    Label(String),
}

impl fmt::Display for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Label(label) => f.write_str(label),
        }
    }
}

/// Citation attached to a finished answer.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SourceRef {
    pub document_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<PageRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, alias = "content", skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f64>,
}

impl SourceRef {
    /// Creates a citation that only names its document.
    pub fn named(document_name: impl Into<String>) -> Self {
        Self {
            document_name: document_name.into(),
            document_id: None,
            page: None,
            section: None,
            excerpt: None,
            similarity_score: None,
        }
    }

    pub fn with_page(mut self, page: PageRef) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = Some(excerpt.into());
        self
    }
}

/// Incremental fragment of an answer.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamChunk {
    /// Request this fragment belongs to, when known.
    pub request_id: Option<RequestId>,
    /// Position of the fragment within its request, starting at 0.
    pub seq: u64,
    pub content: String,
    /// Set on the marker that ends the streaming phase. Metadata still
    /// arrives separately through `Complete`.
    pub is_complete: bool,
}

impl StreamChunk {
    pub fn fragment(content: impl Into<String>) -> Self {
        Self {
            request_id: None,
            seq: 0,
            content: content.into(),
            is_complete: false,
        }
    }

    pub fn end() -> Self {
        Self {
            request_id: None,
            seq: 0,
            content: String::new(),
            is_complete: true,
        }
    }
}

/// Terminal event for one answer.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Completion {
    pub request_id: Option<RequestId>,
    pub sources: Vec<SourceRef>,
    /// Session id asserted by the server, to be echoed on later requests.
    pub session_id: Option<SessionId>,
    /// Failure reported by the server alongside an otherwise empty completion.
    pub error: Option<String>,
}

/// Payload of an `Error` event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub message: String,
    /// Request the failure applies to, when it applies to one.
    pub request_id: Option<RequestId>,
}

impl ErrorEvent {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            request_id: None,
        }
    }

    pub fn for_request(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

impl From<&ClientError> for ErrorEvent {
    fn from(value: &ClientError) -> Self {
        ErrorEvent::new(value.event_kind(), value.to_string())
    }
}

/// Everything the client delivers to subscribers.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    /// The connection reached `Open`.
    Open,
    /// The connection left `Open`. `reason` may be empty.
    Close { reason: String },
    /// Transport, protocol or server failure. Does not imply `Close`.
    Error(ErrorEvent),
    /// Partial answer content.
    Stream(StreamChunk),
    /// End of an answer, carrying citations and the session id.
    Complete(Completion),
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::Close { .. } => EventKind::Close,
            Self::Error(_) => EventKind::Error,
            Self::Stream(_) => EventKind::Stream,
            Self::Complete(_) => EventKind::Complete,
        }
    }

    /// Request id carried by application events, if any.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Stream(chunk) => chunk.request_id,
            Self::Complete(completion) => completion.request_id,
            Self::Error(error) => error.request_id,
            Self::Open | Self::Close { .. } => None,
        }
    }
}

impl Categorized for ClientEvent {
    type Category = EventKind;

    fn category(&self) -> EventKind {
        self.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_round_trips_through_its_name() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().expect("parse"), kind);
        }
        assert!("message".parse::<EventKind>().is_err());
    }

    #[test]
    fn source_ref_accepts_label_pages_and_content_alias() {
        let source: SourceRef = serde_json::from_value(serde_json::json!({
            "document_name": "mock_doc.pdf",
            "page": "N/A",
            "content": "Mock content"
        }))
        .expect("source");
        assert_eq!(source.page, Some(PageRef::Label("N/A".into())));
        assert_eq!(source.excerpt.as_deref(), Some("Mock content"));

        let numbered: SourceRef =
            serde_json::from_value(serde_json::json!({"document_name": "a.pdf", "page": 3}))
                .expect("numbered");
        assert_eq!(numbered.page, Some(PageRef::Number(3)));
    }

    #[test]
    fn client_event_kind_matches_variant() {
        assert_eq!(ClientEvent::Open.kind(), EventKind::Open);
        assert_eq!(
            ClientEvent::Stream(StreamChunk::fragment("x")).kind(),
            EventKind::Stream
        );
        assert_eq!(
            ClientEvent::Complete(Completion::default()).kind(),
            EventKind::Complete
        );
    }
}

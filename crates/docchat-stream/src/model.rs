use std::fmt;

/// Client-generated correlation id attached to every outbound chat request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub uuid::Uuid);

impl RequestId {
    /// Creates a fresh random request id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parses a request id echoed by the server. Anything that is not a UUID
    /// yields `None`.
    pub fn parse(value: &str) -> Option<Self> {
        uuid::Uuid::parse_str(value.trim()).ok().map(Self)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque conversation id issued by the backend.
///
/// The client only ever adopts ids asserted by the server or supplied by the
/// caller; it never generates one.
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Creates a session id from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` when the id carries no usable value.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Lifecycle of the shared streaming connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default)]
pub enum ConnectionState {
    /// No connection has been requested yet.
    #[default]
    Idle,
    /// A connect attempt (handshake) is in progress.
    Connecting,
    /// The link is up; sends are accepted.
    Open,
    /// The client is closing the link on shutdown.
    Closing,
    /// The link is down and no reconnect is scheduled.
    Closed,
    /// The link is down and a reconnect attempt is scheduled.
    Reconnecting,
}

impl ConnectionState {
    /// Returns `true` while a connection exists or is being established, i.e.
    /// when `connect` must not create another one.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connecting | Self::Open | Self::Reconnecting)
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

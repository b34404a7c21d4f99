/// Top-level error type for the public client API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Invalid client configuration (environment or builder input).
    #[error("config error: {0}")]
    Config(String),
    /// The streaming endpoint URL could not be used.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// No tokio runtime was available to drive the connection.
    #[error("runtime error: {0}")]
    Runtime(String),
    /// Transport or socket I/O failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// A frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A bounded wait elapsed.
    #[error("timeout: {0}")]
    Timeout(String),
    /// The owning client has been shut down.
    #[error("client has been shut down")]
    Shutdown,
}

impl ClientError {
    /// Creates a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates a protocol-level error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Maps this error onto the kind carried by an `Error` event.
    pub fn event_kind(&self) -> ErrorKind {
        match self {
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Config(_)
            | Self::InvalidUrl(_)
            | Self::Runtime(_)
            | Self::Transport(_)
            | Self::Shutdown => ErrorKind::Transport,
        }
    }
}

impl From<url::ParseError> for ClientError {
    fn from(value: url::ParseError) -> Self {
        ClientError::InvalidUrl(value.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Transport(value.to_string())
    }
}

/// Category of failure reported through `ClientEvent::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection refused, DNS failure, abrupt close, or a failed write.
    Transport,
    /// The server sent a frame the client could not understand.
    Protocol,
    /// The server reported an application-level failure.
    Server,
    /// The connect handshake did not finish in time.
    Timeout,
    /// A request saw no progress within the completion timeout.
    CompletionTimeout,
}

impl ErrorKind {
    /// Stable lowercase name, used in logs and the console.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Server => "server",
            Self::Timeout => "timeout",
            Self::CompletionTimeout => "completion_timeout",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

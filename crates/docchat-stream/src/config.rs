use std::time::Duration;

use url::Url;

use crate::errors::ClientError;
use crate::policy::ReconnectPolicy;

/// Origin used when `DOCCHAT_WS_URL` is not set.
pub const DEFAULT_BASE_URL: &str = "ws://localhost:8000";
/// Path of the streaming endpoint on the backend origin.
pub const STREAM_PATH: &str = "/ws";

/// Configuration for the streaming client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Backend origin (`ws://` or `wss://`). [`STREAM_PATH`] is appended
    /// unless already present.
    pub base_url: String,
    /// Bearer credential sent on the handshake, both as the `access_token`
    /// cookie and as an `Authorization` header.
    pub access_token: Option<String>,
    /// Bound on the connect handshake.
    pub connect_timeout: Duration,
    /// Idle bound on an in-flight request. `None` waits forever.
    pub completion_timeout: Option<Duration>,
    /// Automatic reconnect behaviour.
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientConfig {
    /// Creates a config pointing at the local development backend.
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            access_token: None,
            connect_timeout: Duration::from_secs(10),
            completion_timeout: Some(Duration::from_secs(120)),
            reconnect: ReconnectPolicy::none(),
        }
    }

    /// Builds a config from `DOCCHAT_*` environment variables.
    ///
    /// - `DOCCHAT_WS_URL`: backend origin.
    /// - `DOCCHAT_ACCESS_TOKEN`: bearer credential.
    /// - `DOCCHAT_CONNECT_TIMEOUT_SECS`: handshake bound.
    /// - `DOCCHAT_COMPLETION_TIMEOUT_SECS`: idle request bound, `0` disables.
    /// - `DOCCHAT_RECONNECT_MAX_RETRIES`: reconnect attempts, `0` disables.
    /// - `DOCCHAT_RECONNECT_INITIAL_BACKOFF_MS` / `DOCCHAT_RECONNECT_MAX_BACKOFF_MS`.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ClientError> {
        let mut config = Self::new();
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(base_url) = read("DOCCHAT_WS_URL") {
            config.base_url = base_url.trim().to_string();
        }
        config.access_token = read("DOCCHAT_ACCESS_TOKEN").map(|t| t.trim().to_string());
        if let Some(secs) = parse_u64(&read, "DOCCHAT_CONNECT_TIMEOUT_SECS")? {
            config.connect_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = parse_u64(&read, "DOCCHAT_COMPLETION_TIMEOUT_SECS")? {
            config.completion_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        let retries = parse_u64(&read, "DOCCHAT_RECONNECT_MAX_RETRIES")?.unwrap_or(0);
        if retries > 0 {
            let initial = parse_u64(&read, "DOCCHAT_RECONNECT_INITIAL_BACKOFF_MS")?.unwrap_or(0);
            let max = parse_u64(&read, "DOCCHAT_RECONNECT_MAX_BACKOFF_MS")?.unwrap_or(0);
            let policy = ReconnectPolicy::exponential(
                u32::try_from(retries).unwrap_or(u32::MAX),
                Duration::from_millis(initial),
                Duration::from_millis(max),
            );
            config.reconnect = policy;
        }

        config.stream_url()?;
        Ok(config)
    }

    /// Overrides the backend origin.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.access_token = (!token.trim().is_empty()).then_some(token);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the idle bound on in-flight requests; `None` disables it.
    pub fn completion_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.completion_timeout = timeout;
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Full streaming endpoint URL derived from `base_url`.
    pub fn stream_url(&self) -> Result<Url, ClientError> {
        let base = self.base_url.trim().trim_end_matches('/');
        let full = if base.ends_with(STREAM_PATH) {
            base.to_string()
        } else {
            format!("{base}{STREAM_PATH}")
        };
        parse_stream_url(&full)
    }

    pub(crate) fn validate(&self) -> Result<(), ClientError> {
        if self.connect_timeout.is_zero() {
            return Err(ClientError::config("connect_timeout must be greater than 0"));
        }
        if self.completion_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ClientError::config(
                "completion_timeout must be greater than 0 when set",
            ));
        }
        Ok(())
    }
}

/// Parses and validates a streaming endpoint URL.
pub fn parse_stream_url(raw: &str) -> Result<Url, ClientError> {
    let url = Url::parse(raw.trim())?;
    if url.scheme() != "ws" && url.scheme() != "wss" {
        return Err(ClientError::InvalidUrl(format!(
            "URL must use ws:// or wss:// scheme, got: {}",
            url.scheme()
        )));
    }
    Ok(url)
}

fn parse_u64(read: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>, ClientError> {
    read(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map_err(|e| ClientError::config(format!("{key} must be a whole number: {e}")))
        })
        .transpose()
}

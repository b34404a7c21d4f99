//! Socket abstraction used by the connection driver.

use std::pin::Pin;

use futures::future;
use futures::{Sink, SinkExt as _, Stream, StreamExt as _};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, COOKIE};
use tracing::debug;
use url::Url;

use crate::errors::ClientError;

/// Inbound unit delivered by a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// Peer-initiated close. `reason` may be empty.
    Close { reason: String },
}

pub type FrameSink = Pin<Box<dyn Sink<String, Error = ClientError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, ClientError>> + Send>>;

/// An established link: outbound text frames and inbound frames.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Where and how to connect.
#[derive(Clone, Debug)]
pub struct ConnectTarget {
    pub url: Url,
    pub access_token: Option<String>,
}

/// Opens transports. One call to `open` is one underlying socket.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, target: &ConnectTarget) -> Result<Transport, ClientError>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Clone, Debug, Default)]
pub struct WsConnector;

#[async_trait::async_trait]
impl Connector for WsConnector {
    async fn open(&self, target: &ConnectTarget) -> Result<Transport, ClientError> {
        let mut request = target.url.as_str().into_client_request()?;
        if let Some(token) = &target.access_token {
            let headers = request.headers_mut();
            headers.insert(COOKIE, header_value(&format!("access_token={token}"))?);
            headers.insert(AUTHORIZATION, header_value(&format!("Bearer {token}"))?);
        }

        let (socket, response) = connect_async(request).await?;
        debug!(url = %target.url, status = %response.status(), "websocket handshake complete");

        let (write, read) = socket.split();
        let sink = write
            .sink_map_err(|e| ClientError::transport(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, ClientError>(Message::text(text))));
        let stream = read.filter_map(|message| future::ready(map_message(message)));

        Ok(Transport {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn header_value(raw: &str) -> Result<HeaderValue, ClientError> {
    HeaderValue::from_str(raw)
        .map_err(|e| ClientError::config(format!("access token is not a valid header value: {e}")))
}

fn map_message(
    message: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<Frame, ClientError>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Some(Ok(Frame::Text(text))),
            Err(_) => Some(Err(ClientError::protocol("binary frame is not valid UTF-8"))),
        },
        Ok(Message::Close(frame)) => Some(Ok(Frame::Close {
            reason: frame
                .map(|f| f.reason.as_str().to_owned())
                .unwrap_or_default(),
        })),
        // Ping/pong are answered by tungstenite itself.
        Ok(_) => None,
        Err(e) => Some(Err(ClientError::transport(e.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    #[test]
    fn text_and_close_messages_become_frames() {
        assert_eq!(
            map_message(Ok(Message::text("hi"))),
            Some(Ok(Frame::Text("hi".into())))
        );
        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Policy,
            reason: "Invalid authentication token".into(),
        }));
        assert_eq!(
            map_message(Ok(close)),
            Some(Ok(Frame::Close {
                reason: "Invalid authentication token".into()
            }))
        );
        assert_eq!(
            map_message(Ok(Message::Close(None))),
            Some(Ok(Frame::Close {
                reason: String::new()
            }))
        );
    }

    #[test]
    fn control_frames_are_skipped() {
        assert_eq!(map_message(Ok(Message::Ping(Default::default()))), None);
    }

    #[test]
    fn non_utf8_binary_is_a_protocol_error() {
        let result = map_message(Ok(Message::binary(vec![0xffu8, 0xfe])));
        assert!(matches!(result, Some(Err(ClientError::Protocol(_)))));
    }
}

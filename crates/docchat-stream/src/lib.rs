//! Streaming chat client for the docchat document-QA backend.
//!
//! One [`StreamClient`] owns the WebSocket connection for the whole process.
//! Components get a [`ClientHandle`], subscribe to the event kinds they care
//! about and send chat messages; answers arrive as a sequence of `Stream`
//! fragments followed by a `Complete` event carrying cited sources.
//!
//! ```no_run
//! use docchat_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ClientError> {
//! let client = StreamClient::builder()
//!     .config(ClientConfig::from_env()?)
//!     .build()?;
//! let handle = client.handle();
//!
//! let sub = handle.on(EventKind::Stream, |event| {
//!     if let ClientEvent::Stream(chunk) = event {
//!         print!("{}", chunk.content);
//!     }
//! });
//! handle.connect_default()?;
//! // ... once `Open` has fired:
//! handle.send_message("What does chapter 2 cover?", None);
//!
//! sub.unsubscribe();
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

/// Category-keyed callback registry.
pub mod bus;
/// Client owner, builder and shared handle.
pub mod client;
/// Client configuration and environment loading.
pub mod config;
mod connection;
/// Public error types.
pub mod errors;
/// Events delivered to subscribers.
pub mod event;
/// Folding events into a displayable conversation.
pub mod message;
/// Request, session and connection-state identifiers.
pub mod model;
/// Process-wide logging setup.
pub mod observability;
/// Automatic reconnect policy.
pub mod policy;
/// Common imports for typical usage.
pub mod prelude;
/// JSON wire format of the streaming endpoint.
pub mod protocol;
/// Conversation session tracking.
pub mod session;
/// Socket abstraction and the WebSocket connector.
pub mod transport;

#[cfg(test)]
mod testing;

pub use bus::{Categorized, EventBus, Subscription};
pub use client::{ClientHandle, StreamClient, StreamClientBuilder};
pub use config::ClientConfig;
pub use errors::{ClientError, ErrorKind};
pub use event::{ClientEvent, Completion, ErrorEvent, EventKind, PageRef, SourceRef, StreamChunk};
pub use message::{Conversation, Message, MessageStatus, Role};
pub use model::{ConnectionState, RequestId, SessionId};
pub use observability::{LogSettings, LogSink, init_logging};
pub use policy::{Backoff, ReconnectPolicy, ReconnectSchedule};
pub use transport::{Connector, WsConnector};

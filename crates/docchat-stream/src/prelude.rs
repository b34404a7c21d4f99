//! Common imports for typical client usage.
pub use crate::{
    ClientConfig, ClientError, ClientEvent, ClientHandle, Completion, ConnectionState,
    Conversation, ErrorEvent, ErrorKind, EventKind, ReconnectPolicy, RequestId, SessionId,
    SourceRef, StreamChunk, StreamClient, Subscription,
};

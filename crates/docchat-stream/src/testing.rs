//! In-memory transport and helpers for driving the client in tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::channel::mpsc as chan;
use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::mpsc;

use crate::client::ClientHandle;
use crate::errors::ClientError;
use crate::event::{ClientEvent, EventKind};
use crate::model::ConnectionState;
use crate::transport::{ConnectTarget, Connector, Frame, Transport};

const WAIT: Duration = Duration::from_secs(30);

/// Connector whose sockets are channel pairs. Each successful `open` hands
/// the server half to the test through the receiver returned by `new`.
pub(crate) struct MemoryConnector {
    opened: AtomicUsize,
    refuse: AtomicUsize,
    servers: mpsc::UnboundedSender<ServerSide>,
}

impl MemoryConnector {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSide>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            opened: AtomicUsize::new(0),
            refuse: AtomicUsize::new(0),
            servers,
        });
        (connector, rx)
    }

    /// Number of connect attempts so far, refused ones included.
    pub(crate) fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Fails the next `count` connect attempts.
    pub(crate) fn refuse_next(&self, count: usize) {
        self.refuse.store(count, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, target: &ConnectTarget) -> Result<Transport, ClientError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ClientError::transport(format!(
                "connection refused: {}",
                target.url
            )));
        }

        let (inbound_tx, inbound_rx) = chan::unbounded::<Result<Frame, ClientError>>();
        let (outbound_tx, outbound_rx) = chan::unbounded::<String>();
        self.servers
            .send(ServerSide {
                inbound: inbound_tx,
                outbound: outbound_rx,
            })
            .map_err(|_| ClientError::transport("test dropped the server receiver"))?;

        Ok(Transport {
            sink: Box::pin(outbound_tx.sink_map_err(|e| ClientError::transport(e.to_string()))),
            stream: Box::pin(inbound_rx),
        })
    }
}

/// Server end of an in-memory socket.
pub(crate) struct ServerSide {
    inbound: chan::UnboundedSender<Result<Frame, ClientError>>,
    outbound: chan::UnboundedReceiver<String>,
}

impl ServerSide {
    pub(crate) fn send_text(&self, text: &str) {
        self.inbound
            .unbounded_send(Ok(Frame::Text(text.to_string())))
            .expect("client side alive");
    }

    pub(crate) fn send_json(&self, value: serde_json::Value) {
        self.send_text(&value.to_string());
    }

    pub(crate) fn close(&self, reason: &str) {
        self.inbound
            .unbounded_send(Ok(Frame::Close {
                reason: reason.to_string(),
            }))
            .expect("client side alive");
    }

    /// Next request the client wrote, parsed as JSON.
    pub(crate) async fn next_request(&mut self) -> serde_json::Value {
        let text = tokio::time::timeout(WAIT, self.outbound.next())
            .await
            .expect("request in time")
            .expect("client sink open");
        serde_json::from_str(&text).expect("request is JSON")
    }

    /// `true` once the client has closed its sink.
    pub(crate) async fn is_closed(&mut self) -> bool {
        matches!(tokio::time::timeout(WAIT, self.outbound.next()).await, Ok(None))
    }
}

/// Forwards every event of the given kinds into a channel.
pub(crate) fn record(handle: &ClientHandle, kinds: &[EventKind]) -> mpsc::UnboundedReceiver<ClientEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    for kind in kinds {
        let tx = tx.clone();
        let _ = handle.on(*kind, move |event| {
            let _ = tx.send(event.clone());
        });
    }
    rx
}

pub(crate) async fn next_event(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("event in time")
        .expect("recorder alive")
}

pub(crate) async fn wait_for_state(handle: &ClientHandle, state: ConnectionState) {
    let mut rx = handle.watch_state();
    tokio::time::timeout(WAIT, rx.wait_for(|current| *current == state))
        .await
        .expect("state reached in time")
        .expect("state channel open");
}

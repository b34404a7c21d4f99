use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use url::Url;

use crate::bus::{EventBus, Subscription};
use crate::config::{ClientConfig, parse_stream_url};
use crate::connection::{self, Link};
use crate::errors::ClientError;
use crate::event::{ClientEvent, Completion, EventKind};
use crate::model::{ConnectionState, RequestId, SessionId};
use crate::protocol::ChatRequest;
use crate::session::SessionTracker;
use crate::transport::{Connector, WsConnector};

struct DriverHandle {
    url: Url,
    outbound: mpsc::UnboundedSender<ChatRequest>,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    pub(crate) connector: Arc<dyn Connector>,
    bus: EventBus<ClientEvent>,
    session: SessionTracker,
    state_tx: watch::Sender<ConnectionState>,
    generation: AtomicU64,
    driver: Mutex<Option<DriverHandle>>,
    shutdown_tx: watch::Sender<bool>,
}

impl ClientInner {
    fn driver_slot(&self) -> MutexGuard<'_, Option<DriverHandle>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    /// Applies a state transition unless a newer driver has taken over.
    pub(crate) fn set_state(&self, generation: u64, next: ConnectionState) {
        if !self.is_current(generation) {
            return;
        }
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(from = %current, to = %next, generation, "connection state");
            *current = next;
            true
        });
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Adopts any server-asserted session id, then fans the event out.
    pub(crate) fn publish(&self, event: ClientEvent) {
        if let ClientEvent::Complete(Completion {
            session_id: Some(id),
            ..
        }) = &event
        {
            self.session.adopt(id);
        }
        let delivered = self.bus.publish(&event);
        trace!(kind = %event.kind(), delivered, "event dispatched");
    }

    fn connect(self: &Arc<Self>, url: Url) -> Result<(), ClientError> {
        if *self.shutdown_tx.borrow() {
            return Err(ClientError::Shutdown);
        }
        let mut driver = self.driver_slot();
        let state = self.state();
        if state.is_live() {
            match driver.as_ref() {
                Some(existing) if state == ConnectionState::Reconnecting => {
                    debug!(url = %existing.url, "connect during backoff: retrying now");
                    existing.wake.notify_one();
                }
                Some(existing) if existing.url != url => {
                    debug!(current = %existing.url, requested = %url, "connect ignored: a connection is already live");
                }
                _ => {}
            }
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ClientError::Runtime(format!("connect needs a tokio runtime: {e}")))?;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let wake = Arc::new(Notify::new());
        self.set_state(generation, ConnectionState::Connecting);

        let task = runtime.spawn(connection::drive(
            self.clone(),
            Link {
                generation,
                url: url.clone(),
                outbound: outbound_rx,
                wake: wake.clone(),
            },
        ));
        *driver = Some(DriverHandle {
            url,
            outbound: outbound_tx,
            wake,
            task,
        });
        Ok(())
    }
}

/// Root owner of the streaming connection.
///
/// Build one per application with [`StreamClient::builder`] and hand
/// [`ClientHandle`]s to the components that need it. Only the owner can shut
/// the connection down; dropping the owner does the same.
pub struct StreamClient {
    handle: ClientHandle,
}

impl StreamClient {
    pub fn builder() -> StreamClientBuilder {
        StreamClientBuilder::default()
    }

    /// Cloneable handle for components.
    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    /// Closes the connection, stops reconnecting and waits for the driver
    /// task to finish. Later `connect` calls fail with `ClientError::Shutdown`.
    pub async fn shutdown(&self) {
        let inner = &self.handle.inner;
        inner.shutdown_tx.send_replace(true);
        let driver = inner.driver_slot().take();
        if let Some(driver) = driver
            && let Err(err) = driver.task.await
            && !err.is_cancelled()
        {
            warn!(error = %err, "connection driver ended abnormally");
        }
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.handle.inner.shutdown_tx.send_replace(true);
    }
}

/// Builder used to configure a [`StreamClient`].
#[derive(Default)]
pub struct StreamClientBuilder {
    config: Option<ClientConfig>,
    connector: Option<Arc<dyn Connector>>,
}

impl StreamClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replaces the WebSocket connector (used for tests and custom transports).
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn build(self) -> Result<StreamClient, ClientError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WsConnector) as Arc<dyn Connector>);
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (shutdown_tx, _) = watch::channel(false);
        let inner = Arc::new(ClientInner {
            config,
            connector,
            bus: EventBus::new(),
            session: SessionTracker::new(),
            state_tx,
            generation: AtomicU64::new(0),
            driver: Mutex::new(None),
            shutdown_tx,
        });
        Ok(StreamClient {
            handle: ClientHandle { inner },
        })
    }
}

/// Shared, cheaply cloneable access to the client.
///
/// Handles never close the connection; unsubscribing on teardown is all a
/// component needs to do.
#[derive(Clone)]
pub struct ClientHandle {
    inner: Arc<ClientInner>,
}

impl ClientHandle {
    /// Connects to `url` unless a connection is already live.
    ///
    /// Returns once the attempt is scheduled; watch `Open`/`Error` events or
    /// [`ClientHandle::watch_state`] for the outcome.
    pub fn connect(&self, url: &str) -> Result<(), ClientError> {
        let url = parse_stream_url(url)?;
        self.inner.connect(url)
    }

    /// Connects to the endpoint derived from the client configuration.
    pub fn connect_default(&self) -> Result<(), ClientError> {
        let url = self.inner.config.stream_url()?;
        self.inner.connect(url)
    }

    /// Registers `callback` for events of `kind`.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(kind, callback)
    }

    /// Sends a chat message on the open connection.
    ///
    /// `session_id` overrides the held id for this request only. Returns the
    /// request id, or `None` when the message was dropped because the
    /// connection is not open or the text is blank.
    pub fn send_message(&self, text: &str, session_id: Option<&str>) -> Option<RequestId> {
        let state = self.inner.state();
        if state != ConnectionState::Open {
            warn!(%state, "dropping chat message: connection is not open");
            return None;
        }
        if text.trim().is_empty() {
            warn!("dropping empty chat message");
            return None;
        }

        let request = ChatRequest::new(
            text,
            self.inner.session.resolve(session_id.map(SessionId::from)),
        );
        let request_id = request.request_id;
        let driver = self.inner.driver_slot();
        let Some(driver) = driver.as_ref() else {
            warn!("dropping chat message: no connection driver");
            return None;
        };
        if driver.outbound.send(request).is_err() {
            warn!("dropping chat message: connection driver has stopped");
            return None;
        }
        debug!(%request_id, "chat message queued");
        Some(request_id)
    }

    /// Replaces the held session id with one learned out of band.
    pub fn set_session_id(&self, id: impl Into<SessionId>) {
        self.inner.session.set(id.into());
    }

    /// Forgets the held session id so the next message starts a new
    /// conversation on the backend.
    pub fn reset_session(&self) -> Option<SessionId> {
        self.inner.session.reset()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.session.current()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Receiver that observes every connection state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

//! Connection driver: one task per `connect`, owning the socket, the
//! reconnect loop and the in-flight request table.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tracing::{debug, info, warn};
use url::Url;

use crate::client::ClientInner;
use crate::errors::{ClientError, ErrorKind};
use crate::event::{ClientEvent, ErrorEvent, StreamChunk};
use crate::model::{ConnectionState, RequestId};
use crate::protocol::{self, ChatRequest};
use crate::transport::{ConnectTarget, Frame, FrameSink, Transport};

/// Receiving half of a driver, created by `connect`.
pub(crate) struct Link {
    pub(crate) generation: u64,
    pub(crate) url: Url,
    pub(crate) outbound: mpsc::UnboundedReceiver<ChatRequest>,
    pub(crate) wake: Arc<Notify>,
}

enum LinkEnd {
    /// The peer closed the link or it failed.
    Closed { reason: String },
    /// The owning client shut down.
    Shutdown,
    /// A newer `connect` replaced this driver.
    Superseded,
}

pub(crate) async fn drive(inner: Arc<ClientInner>, mut link: Link) {
    let generation = link.generation;
    let mut shutdown = inner.shutdown_signal();
    let mut schedule = inner.config.reconnect.schedule();
    let target = ConnectTarget {
        url: link.url.clone(),
        access_token: inner.config.access_token.clone(),
    };

    loop {
        if !inner.is_current(generation) {
            return;
        }
        inner.set_state(generation, ConnectionState::Connecting);
        info!(url = %target.url, attempt = schedule.attempts(), "connecting to streaming endpoint");

        let attempt = tokio::select! {
            result = timeout(inner.config.connect_timeout, inner.connector.open(&target)) => result,
            _ = shutdown_requested(&mut shutdown) => {
                inner.set_state(generation, ConnectionState::Closed);
                return;
            }
        };

        match attempt {
            Ok(Ok(transport)) => {
                schedule.connected();
                inner.set_state(generation, ConnectionState::Open);
                info!(url = %target.url, "streaming connection open");
                inner.publish(ClientEvent::Open);

                let (end, abandoned) = run_link(&inner, transport, &mut link, &mut shutdown).await;
                let reason = match &end {
                    LinkEnd::Closed { reason } => reason.clone(),
                    LinkEnd::Shutdown => "client shut down".to_string(),
                    LinkEnd::Superseded => "connection replaced".to_string(),
                };
                inner.set_state(generation, ConnectionState::Closed);
                info!(url = %target.url, %reason, "streaming connection closed");
                inner.publish(ClientEvent::Close { reason });
                for request_id in abandoned {
                    inner.publish(ClientEvent::Error(
                        ErrorEvent::new(
                            ErrorKind::Transport,
                            "connection closed before the response completed",
                        )
                        .for_request(request_id),
                    ));
                }
                if !matches!(end, LinkEnd::Closed { .. }) {
                    return;
                }
            }
            Ok(Err(err)) => {
                warn!(url = %target.url, error = %err, "connect failed");
                inner.set_state(generation, ConnectionState::Closed);
                inner.publish(ClientEvent::Error(ErrorEvent::from(&err)));
            }
            Err(_) => {
                let err = ClientError::Timeout(format!(
                    "connect did not finish within {:?}",
                    inner.config.connect_timeout
                ));
                warn!(url = %target.url, error = %err, "connect timed out");
                inner.set_state(generation, ConnectionState::Closed);
                inner.publish(ClientEvent::Error(ErrorEvent::from(&err)));
            }
        }

        // A subscriber may have called `connect` from a close/error callback.
        if !inner.is_current(generation) {
            return;
        }
        let Some(delay) = schedule.next_delay() else {
            return;
        };
        inner.set_state(generation, ConnectionState::Reconnecting);
        info!(?delay, attempt = schedule.attempts(), max_attempts = schedule.max_attempts(), "reconnect scheduled");

        tokio::select! {
            _ = sleep(delay) => {}
            _ = link.wake.notified() => debug!("reconnect requested early"),
            _ = shutdown_requested(&mut shutdown) => {
                inner.set_state(generation, ConnectionState::Closed);
                return;
            }
        }
    }
}

async fn run_link(
    inner: &ClientInner,
    transport: Transport,
    link: &mut Link,
    shutdown: &mut watch::Receiver<bool>,
) -> (LinkEnd, Vec<RequestId>) {
    let Transport {
        mut sink,
        mut stream,
    } = transport;
    let mut in_flight = InFlight::new(inner.config.completion_timeout);

    let end = loop {
        let deadline = in_flight.next_deadline();
        tokio::select! {
            biased;
            _ = shutdown_requested(shutdown) => {
                inner.set_state(link.generation, ConnectionState::Closing);
                if let Err(err) = sink.close().await {
                    debug!(error = %err, "close handshake failed");
                }
                break LinkEnd::Shutdown;
            }
            frame = stream.next() => match frame {
                Some(Ok(Frame::Text(text))) => handle_text(inner, &mut in_flight, &text),
                Some(Ok(Frame::Close { reason })) => break LinkEnd::Closed { reason },
                Some(Err(err)) => {
                    warn!(error = %err, "streaming connection failed");
                    inner.publish(ClientEvent::Error(ErrorEvent::from(&err)));
                    break LinkEnd::Closed { reason: err.to_string() };
                }
                None => break LinkEnd::Closed { reason: String::new() },
            },
            request = link.outbound.recv() => match request {
                Some(request) => match write_request(&mut sink, &request).await {
                    Ok(()) => in_flight.register(request.request_id, Instant::now()),
                    Err(err) => {
                        warn!(request_id = %request.request_id, error = %err, "failed to send chat message");
                        inner.publish(ClientEvent::Error(
                            ErrorEvent::from(&err).for_request(request.request_id),
                        ));
                        if matches!(err, ClientError::Transport(_)) {
                            break LinkEnd::Closed { reason: err.to_string() };
                        }
                    }
                },
                None => {
                    let _ = sink.close().await;
                    break LinkEnd::Superseded;
                }
            },
            _ = sleep_until(deadline.unwrap_or_else(far_future)), if deadline.is_some() => {
                for request_id in in_flight.expire(Instant::now()) {
                    warn!(%request_id, "no response within completion timeout");
                    inner.publish(ClientEvent::Error(
                        ErrorEvent::new(
                            ErrorKind::CompletionTimeout,
                            "no response within the completion timeout",
                        )
                        .for_request(request_id),
                    ));
                }
            }
        }
    };

    let mut abandoned = in_flight.drain();
    while let Ok(request) = link.outbound.try_recv() {
        warn!(request_id = %request.request_id, "discarding unsent chat message");
        abandoned.push(request.request_id);
    }
    (end, abandoned)
}

async fn write_request(sink: &mut FrameSink, request: &ChatRequest) -> Result<(), ClientError> {
    let text = protocol::encode_request(request)?;
    sink.send(text).await?;
    debug!(request_id = %request.request_id, has_session = request.session_id.is_some(), "chat message sent");
    Ok(())
}

fn handle_text(inner: &ClientInner, in_flight: &mut InFlight, text: &str) {
    let event = match protocol::decode_frame(text) {
        Ok(Some(event)) => event,
        Ok(None) => return,
        Err(err) => {
            warn!(error = %err, "undecodable frame from server");
            inner.publish(ClientEvent::Error(ErrorEvent::from(&err)));
            return;
        }
    };

    let now = Instant::now();
    let event = match event {
        ClientEvent::Stream(mut chunk) => match in_flight.attribute_chunk(&mut chunk, now) {
            Attribution::Deliver(_) => {
                debug!(request_id = ?chunk.request_id, seq = chunk.seq, bytes = chunk.content.len(), is_complete = chunk.is_complete, "stream fragment");
                ClientEvent::Stream(chunk)
            }
            Attribution::Abandoned(request_id) => {
                debug!(%request_id, "dropping late fragment of an abandoned request");
                return;
            }
        },
        ClientEvent::Complete(mut completion) => {
            // A late completion still carries the session id, so it is
            // published under the abandoned request's id.
            completion.request_id = match in_flight.finish(completion.request_id, now) {
                Attribution::Deliver(id) => id,
                Attribution::Abandoned(id) => {
                    debug!(request_id = %id, "late completion of an abandoned request");
                    Some(id)
                }
            };
            debug!(request_id = ?completion.request_id, sources = completion.sources.len(), "response complete");
            ClientEvent::Complete(completion)
        }
        ClientEvent::Error(mut error) => match in_flight.finish(error.request_id, now) {
            Attribution::Deliver(id) => {
                error.request_id = id;
                warn!(request_id = ?error.request_id, message = %error.message, "server reported an error");
                ClientEvent::Error(error)
            }
            Attribution::Abandoned(request_id) => {
                debug!(%request_id, message = %error.message, "late error of an abandoned request");
                return;
            }
        },
        other => other,
    };
    inner.publish(event);
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    // A dropped sender counts as shutdown.
    let _ = rx.wait_for(|stop| *stop).await;
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(60 * 60 * 24 * 365)
}

struct Pending {
    request_id: RequestId,
    next_seq: u64,
    deadline: Option<Instant>,
    /// Timed out and already reported; its late frames are swallowed.
    abandoned: bool,
}

/// Where a frame belongs after matching it against the in-flight table.
#[derive(Debug, PartialEq, Eq)]
enum Attribution {
    /// Publish it, labelled with this request id.
    Deliver(Option<RequestId>),
    /// It belongs to a request that already timed out.
    Abandoned(RequestId),
}

/// Requests written on the current link that have not completed yet, oldest
/// first. Frames without a request id belong to the oldest entry.
///
/// The backend answers one request at a time, so the idle timer of a request
/// only runs once it is at the head of the queue. A timed-out request stays
/// queued (abandoned) until its terminal frame arrives, or until it stays
/// silent for another full timeout, so its late answer is never mistaken for
/// the next request's.
struct InFlight {
    timeout: Option<Duration>,
    pending: VecDeque<Pending>,
}

impl InFlight {
    fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            pending: VecDeque::new(),
        }
    }

    fn register(&mut self, request_id: RequestId, now: Instant) {
        self.pending.push_back(Pending {
            request_id,
            next_seq: 0,
            deadline: None,
            abandoned: false,
        });
        self.arm_head(now);
    }

    fn arm_head(&mut self, now: Instant) {
        if let Some(timeout) = self.timeout
            && let Some(head) = self.pending.front_mut()
            && head.deadline.is_none()
        {
            head.deadline = Some(now + timeout);
        }
    }

    fn position(&self, request_id: Option<RequestId>) -> Option<usize> {
        match request_id {
            Some(id) => self.pending.iter().position(|p| p.request_id == id),
            None => (!self.pending.is_empty()).then_some(0),
        }
    }

    /// Fills in request id and sequence number and re-arms the idle timer.
    fn attribute_chunk(&mut self, chunk: &mut StreamChunk, now: Instant) -> Attribution {
        let timeout = self.timeout;
        let Some(index) = self.position(chunk.request_id) else {
            return Attribution::Deliver(chunk.request_id);
        };
        let pending = &mut self.pending[index];
        pending.deadline = timeout.map(|t| now + t);
        if pending.abandoned {
            return Attribution::Abandoned(pending.request_id);
        }
        chunk.request_id = Some(pending.request_id);
        chunk.seq = pending.next_seq;
        pending.next_seq = pending.next_seq.saturating_add(1);
        Attribution::Deliver(chunk.request_id)
    }

    /// Removes the request a terminal frame belongs to. A frame matching
    /// nothing in flight keeps its own id.
    fn finish(&mut self, request_id: Option<RequestId>, now: Instant) -> Attribution {
        let Some(finished) = self
            .position(request_id)
            .and_then(|index| self.pending.remove(index))
        else {
            return Attribution::Deliver(request_id);
        };
        self.arm_head(now);
        if finished.abandoned {
            Attribution::Abandoned(finished.request_id)
        } else {
            Attribution::Deliver(Some(finished.request_id))
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().filter_map(|p| p.deadline).min()
    }

    /// Abandons live requests whose timer ran out and returns their ids.
    /// Abandoned requests that stayed silent for another timeout are dropped.
    fn expire(&mut self, now: Instant) -> Vec<RequestId> {
        let Some(timeout) = self.timeout else {
            return Vec::new();
        };
        let mut expired = Vec::new();
        self.pending.retain_mut(|p| {
            if p.deadline.is_none_or(|deadline| deadline > now) {
                return true;
            }
            if p.abandoned {
                return false;
            }
            p.abandoned = true;
            p.deadline = Some(now + timeout);
            expired.push(p.request_id);
            true
        });
        self.arm_head(now);
        expired
    }

    /// Empties the table, returning the requests nobody was told about yet.
    fn drain(&mut self) -> Vec<RequestId> {
        self.pending
            .drain(..)
            .filter(|p| !p.abandoned)
            .map(|p| p.request_id)
            .collect()
    }
}

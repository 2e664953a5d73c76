//! The listening side's half of the polling inversion (spec.md §4.7,
//! §3's "Poll Queue" data model entry).
//!
//! When a polling participant dials in, the Listener doesn't hand its
//! accepted socket to the Request Dispatcher (as it would for an
//! ordinary listening connection) — it hands it here, where it is
//! either immediately paired with a request already waiting in the
//! queue, or parked until one arrives. The hub plays Caller on this
//! socket even though it was *accepted*, not dialed; that's the
//! inversion spec.md §9's Design Notes call "the single most
//! error-prone piece."

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::connection::Connection;
use crate::error::{Error, ErrorKind, Result};
use crate::frame::{Frame, RequestFrame, ResponseFrame};
use crate::identity::Thumbprint;
use crate::stream::StreamAttachment;

/// Default per-subscription bound on queued requests, per spec.md §5.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

type CallOutcome = Result<(ResponseFrame, Vec<StreamAttachment>)>;

struct PendingCall {
    expected_peer_thumbprint: Thumbprint,
    request: RequestFrame,
    request_streams: Vec<StreamAttachment>,
    reply: oneshot::Sender<CallOutcome>,
}

/// Keyed by subscription id: a FIFO of pending calls, and a FIFO of
/// dialed-in Connections ready to carry one.
pub struct PollQueue {
    pending: Mutex<HashMap<String, VecDeque<PendingCall>>>,
    available: Mutex<HashMap<String, VecDeque<Connection>>>,
    capacity: usize,
}

impl PollQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        PollQueue {
            pending: Mutex::new(HashMap::new()),
            available: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Called by the Client Proxy for a `poll://` endpoint. Pairs
    /// immediately with an available connection, or enqueues and awaits
    /// one, failing with `QueueFull` if the subscription's queue is
    /// already at capacity.
    pub async fn call(
        &self,
        subscription_id: &str,
        expected_peer_thumbprint: Thumbprint,
        request: RequestFrame,
        request_streams: Vec<StreamAttachment>,
    ) -> CallOutcome {
        let immediate = {
            let mut available = self.available.lock();
            available.get_mut(subscription_id).and_then(|deque| deque.pop_front())
        };

        if let Some(connection) = immediate {
            return self
                .service_then_return(connection, subscription_id, expected_peer_thumbprint, request, request_streams)
                .await;
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            let deque = pending.entry(subscription_id.to_owned()).or_default();
            if deque.len() >= self.capacity {
                return Err(Error::simple(ErrorKind::QueueFull));
            }
            deque.push_back(PendingCall {
                expected_peer_thumbprint,
                request,
                request_streams,
                reply: tx,
            });
        }

        rx.await.unwrap_or_else(|_| Err(Error::simple(ErrorKind::Shutdown)))
    }

    /// Called by the Listener once it has completed the TLS + identity
    /// handshake on a polling-in connection. If a call is already
    /// waiting for `subscription_id`, services it immediately and loops
    /// to check for more; otherwise parks the connection as available.
    pub async fn register_connection(&self, subscription_id: &str, connection: Connection) {
        self.drain_pending_or_park(subscription_id, connection).await;
    }

    /// Services calls queued for `subscription_id` against `connection`
    /// until either the connection breaks or no call is waiting, in
    /// which case it is parked in `available`. Shared by
    /// `register_connection` (a freshly dialed-in connection) and
    /// `service_then_return` (a connection just freed by a call), so a
    /// call that arrived while the only connection was mid-service is
    /// never left stranded in `pending` with nothing left to wake it.
    async fn drain_pending_or_park(&self, subscription_id: &str, mut connection: Connection) {
        loop {
            let next_call = {
                let mut pending = self.pending.lock();
                pending.get_mut(subscription_id).and_then(|deque| deque.pop_front())
            };

            let call = match next_call {
                Some(call) => call,
                None => {
                    let mut available = self.available.lock();
                    available.entry(subscription_id.to_owned()).or_default().push_back(connection);
                    return;
                }
            };

            let outcome = self
                .service_call(&mut connection, &call.expected_peer_thumbprint, call.request, call.request_streams)
                .await;
            let broken = connection.is_broken();
            let _ = call.reply.send(outcome);
            if broken {
                debug!(subscription_id, "polling-in connection broke mid-dispatch");
                return;
            }
        }
    }

    async fn service_then_return(
        &self,
        connection: Connection,
        subscription_id: &str,
        expected_peer_thumbprint: Thumbprint,
        request: RequestFrame,
        request_streams: Vec<StreamAttachment>,
    ) -> CallOutcome {
        let mut connection = connection;
        let outcome = self
            .service_call(&mut connection, &expected_peer_thumbprint, request, request_streams)
            .await;
        if !connection.is_broken() {
            // Re-enter the pending-drain loop rather than parking
            // unconditionally: another call may have enqueued onto
            // `pending` while this one was in flight, and
            // `register_connection` is only invoked once per dialed-in
            // socket, so nothing else would ever wake it.
            self.drain_pending_or_park(subscription_id, connection).await;
        }
        outcome
    }

    async fn service_call(
        &self,
        connection: &mut Connection,
        expected_peer_thumbprint: &Thumbprint,
        request: RequestFrame,
        request_streams: Vec<StreamAttachment>,
    ) -> CallOutcome {
        if connection.peer_thumbprint() != expected_peer_thumbprint {
            connection.mark_broken();
            return Err(Error::simple(ErrorKind::UntrustedPeer));
        }

        connection.mark_busy();
        connection.write_frame(&Frame::Request(request)).await?;
        for attachment in &request_streams {
            connection.write_stream(attachment, |_| {}).await?;
        }

        let frame = connection.read_frame().await?;
        let response = match frame {
            Frame::Response(r) => r,
            _ => {
                connection.mark_broken();
                return Err(Error::simple(ErrorKind::ProtocolViolation));
            }
        };

        let mut response_streams = Vec::with_capacity(response.attached_stream_ids.len());
        for _ in 0..response.attached_stream_ids.len() {
            response_streams.push(connection.read_stream(|_| {}).await?);
        }

        connection.mark_idle();
        Ok((response, response_streams))
    }
}

impl Default for PollQueue {
    fn default() -> Self {
        Self::new()
    }
}

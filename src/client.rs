//! The Client Proxy: turns a service/method invocation plus an
//! `Endpoint` into a request dispatched over whichever transport the
//! endpoint's scheme names (spec.md §4.8).
//!
//! Grounded on the teacher's `tx_side_connect_task` for the `tls://`
//! dial-and-handshake sequence, generalized to also cover the `poll://`
//! path by handing off to `poll_queue::PollQueue::call` instead of
//! dialing at all.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rustls::ServerName;
use tokio_rustls::TlsConnector;
use tracing::warn;

use crate::connection::{Connection, Role};
use crate::endpoint::{Endpoint, Scheme};
use crate::error::{Error, ErrorKind, Result, ResultSimpleExt};
use crate::frame::{Frame, IdentityAnnounce, RequestFrame};
use crate::identity::Identity;
use crate::pool::ConnectionPool;
use crate::poll_queue::PollQueue;
use crate::socket;
use crate::stream::StreamAttachment;
use crate::tls::{self, check_trusted};
use crate::trust::TrustSet;

/// A request id unique enough for correlation purposes: this runtime
/// never persists or compares ids across restarts, so 80 bits of
/// randomness (not a UUID layout) is plenty.
fn new_request_id() -> String {
    let bytes: [u8; 10] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// A single invocation's result: the response payload plus any stream
/// attachments the callee sent back.
pub type InvokeOutcome = Result<(serde_json::Value, Vec<StreamAttachment>)>;

/// Owns what every outbound call needs: this runtime's identity (to
/// dial with), the pool of warm `tls://` connections, and the Poll
/// Queue for `poll://` endpoints.
pub struct ClientProxy {
    identity: Arc<Identity>,
    trust: Arc<TrustSet>,
    pool: Arc<ConnectionPool>,
    poll_queue: Arc<PollQueue>,
    handshake_deadline: Duration,
}

impl ClientProxy {
    pub fn new(
        identity: Arc<Identity>,
        trust: Arc<TrustSet>,
        pool: Arc<ConnectionPool>,
        poll_queue: Arc<PollQueue>,
        handshake_deadline: Duration,
    ) -> Self {
        ClientProxy { identity, trust, pool, poll_queue, handshake_deadline }
    }

    /// Invokes `service_name.method_name(arguments)` at `endpoint`,
    /// per spec.md §4.8's pseudocode: `tls://` acquires from the pool
    /// or dials fresh and releases (or destroys) on completion;
    /// `poll://` hands the call to the Poll Queue, which owns the
    /// dialed-in connection's lifecycle itself.
    pub async fn invoke(
        &self,
        endpoint: &Endpoint,
        service_name: &str,
        method_name: &str,
        arguments: serde_json::Value,
        request_streams: Vec<StreamAttachment>,
    ) -> InvokeOutcome {
        let request = RequestFrame::new(
            new_request_id(),
            service_name,
            method_name,
            arguments,
            request_streams.iter().map(|s| s.id).collect(),
        );

        match endpoint.scheme {
            Scheme::Poll => {
                let (response, streams) = self
                    .poll_queue
                    .call(&endpoint.authority, endpoint.expected_peer_thumbprint.clone(), request, request_streams)
                    .await?;
                outcome_of(response, streams)
            }
            Scheme::Tls => self.invoke_tls(endpoint, request, request_streams).await,
        }
    }

    async fn invoke_tls(
        &self,
        endpoint: &Endpoint,
        request: RequestFrame,
        request_streams: Vec<StreamAttachment>,
    ) -> InvokeOutcome {
        let mut connection = match self.pool.try_acquire(endpoint) {
            Some(connection) => connection,
            None => self.dial(endpoint).await?,
        };

        if connection.peer_thumbprint() != &endpoint.expected_peer_thumbprint {
            connection.mark_broken();
            return Err(Error::simple(ErrorKind::UntrustedPeer));
        }

        connection.mark_busy();
        let result = self.service_once(&mut connection, request, request_streams).await;

        // A broken Connection is destroyed simply by not handing it
        // back to the pool here.
        if !connection.is_broken() {
            connection.mark_idle();
            self.pool.release(endpoint, connection);
        }
        result
    }

    async fn service_once(
        &self,
        connection: &mut Connection,
        request: RequestFrame,
        request_streams: Vec<StreamAttachment>,
    ) -> InvokeOutcome {
        connection.write_frame(&Frame::Request(request)).await?;
        for attachment in &request_streams {
            connection.write_stream(attachment, |_| {}).await?;
        }

        let response = match connection.read_frame().await? {
            Frame::Response(response) => response,
            _ => {
                connection.mark_broken();
                return Err(Error::simple(ErrorKind::ProtocolViolation));
            }
        };

        let mut streams = Vec::with_capacity(response.attached_stream_ids.len());
        for _ in 0..response.attached_stream_ids.len() {
            streams.push(connection.read_stream(|_| {}).await?);
        }
        outcome_of(response, streams)
    }

    /// Dials `endpoint` fresh: TCP connect, TLS upgrade, thumbprint
    /// check, identity sub-handshake. Used when the pool has nothing
    /// warm to hand back.
    async fn dial(&self, endpoint: &Endpoint) -> Result<Connection> {
        let client_config = tls::client_config(&self.identity)?;
        let connector = TlsConnector::from(Arc::new(client_config));

        let addr: std::net::SocketAddr = endpoint.authority.parse().simple(ErrorKind::HandshakeFailed)?;
        let hostname = endpoint
            .authority
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&endpoint.authority);
        let server_name = ServerName::try_from(hostname).simple(ErrorKind::HandshakeFailed)?;

        let sock = socket::connect(addr).await?;
        let channel = tls::connect(&connector, server_name, sock, self.handshake_deadline).await?;

        // Both checks from spec.md §4.3/§4.8: the observed thumbprint
        // must be in this runtime's Trust Set, *and* match the
        // specific peer the caller asked to reach.
        check_trusted(&channel, |tp| self.trust.is_trusted(tp))?;
        if channel.peer_thumbprint != endpoint.expected_peer_thumbprint {
            warn!(endpoint = %endpoint, "dialed peer's thumbprint does not match the endpoint's pin");
            return Err(Error::simple(ErrorKind::UntrustedPeer));
        }

        Connection::establish(channel, Role::Caller, IdentityAnnounce::listening()).await
    }
}

fn outcome_of(response: crate::frame::ResponseFrame, streams: Vec<StreamAttachment>) -> InvokeOutcome {
    match response.outcome {
        crate::frame::Outcome::Success(value) => Ok((value, streams)),
        crate::frame::Outcome::Error(descriptor) => Err(Error::service_invocation(
            descriptor.message,
            descriptor.remote_stack_detail,
        )),
    }
}

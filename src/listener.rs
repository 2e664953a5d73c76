//! The listening orientation's accept loop (spec.md §4.5), plus the
//! Friendly Page it serves to a stray HTTP client.
//!
//! Grounded on the teacher's `Node::rx_side_accept`/`rx_side_accept_task`
//! pair: an outer loop spawns one task per accepted socket, and the
//! task drops the connection silently on any handshake fault. Extended
//! with the pre- and post-TLS HTTP sniffing spec.md §4.5/§6 call for,
//! using `Peeked` so the sniffed bytes are never lost to the RPC codec.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::connection::{Connection, Role};
use crate::dispatcher;
use crate::frame::IdentityAnnounce;
use crate::peek::{close_fast, looks_like_http};
use crate::poll_queue::PollQueue;
use crate::registry::ServiceRegistry;
use crate::rt;
use crate::socket::{self, Listener as RawListener};
use crate::tls::{self, check_trusted};
use crate::trust::TrustSet;

/// How long a pre-TLS peek or a post-TLS sniff waits for bytes before
/// giving up and proceeding as if nothing arrived.
const SNIFF_DEADLINE: Duration = Duration::from_millis(200);

/// Bytes sniffed looking for an HTTP request line; `"OPTIONS "` is the
/// longest method name we check for.
const SNIFF_LEN: usize = 8;

/// The page served in place of the RPC protocol to a client that
/// clearly isn't speaking it (spec.md §4.5 Testable Property 7).
/// `body` reverting to the built-in default on an empty string is the
/// Open Question resolution recorded in DESIGN.md.
#[derive(Debug, Clone)]
pub struct FriendlyPage {
    body: String,
    headers: Vec<(String, String)>,
}

impl FriendlyPage {
    const DEFAULT_BODY: &'static str = "<html><body><p>Hello!</p></body></html>";

    pub fn new() -> Self {
        FriendlyPage {
            body: Self::DEFAULT_BODY.to_owned(),
            headers: vec![
                ("X-Content-Type-Options".to_owned(), "nosniff".to_owned()),
                ("X-Frame-Options".to_owned(), "DENY".to_owned()),
            ],
        }
    }

    /// Sets the page body; an empty string reverts to the built-in
    /// default rather than serving an empty page.
    pub fn set_body(&mut self, body: impl Into<String>) {
        let body = body.into();
        self.body = if body.is_empty() { Self::DEFAULT_BODY.to_owned() } else { body };
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    fn render(&self) -> Vec<u8> {
        let mut response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\n",
            self.body.len()
        );
        for (name, value) in &self.headers {
            response.push_str(name);
            response.push_str(": ");
            response.push_str(value);
            response.push_str("\r\n");
        }
        response.push_str("Connection: close\r\n\r\n");
        response.push_str(&self.body);
        response.into_bytes()
    }

    /// Writes the rendered response and closes `io`.
    async fn serve<S: tokio::io::AsyncWrite + Unpin>(&self, mut io: S) {
        let _ = io.write_all(&self.render()).await;
        close_fast(io).await;
    }
}

impl Default for FriendlyPage {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a single bound listening socket needs to run its accept
/// loop: identity/trust/registry are shared with the rest of the
/// runtime, the Poll Queue receives polling-in connections.
pub struct ListenerHandle {
    acceptor: TlsAcceptor,
    trust: Arc<TrustSet>,
    registry: Arc<ServiceRegistry>,
    poll_queue: Arc<PollQueue>,
    friendly_page: Arc<FriendlyPage>,
    handshake_deadline: Duration,
}

impl ListenerHandle {
    pub fn new(
        acceptor: TlsAcceptor,
        trust: Arc<TrustSet>,
        registry: Arc<ServiceRegistry>,
        poll_queue: Arc<PollQueue>,
        friendly_page: Arc<FriendlyPage>,
        handshake_deadline: Duration,
    ) -> Self {
        ListenerHandle { acceptor, trust, registry, poll_queue, friendly_page, handshake_deadline }
    }

    /// Binds `addr` and runs the accept loop forever, spawning one task
    /// per accepted socket. Returns the bound address so callers can
    /// discover an OS-assigned port (`addr`'s port `0`).
    pub async fn listen(self: Arc<Self>, addr: SocketAddr) -> std::io::Result<SocketAddr> {
        let raw = socket::bind(addr).await?;
        let local_addr = raw.local_addr()?;
        rt::spawn(self.accept_loop(raw));
        Ok(local_addr)
    }

    async fn accept_loop(self: Arc<Self>, raw: RawListener) {
        loop {
            match raw.accept().await {
                Ok((sock, peer_addr)) => {
                    let this = Arc::clone(&self);
                    rt::spawn(this.accept_one(sock, peer_addr));
                }
                Err(e) => {
                    warn!("accept failed: {}", e);
                }
            }
        }
    }

    async fn accept_one(self: Arc<Self>, sock: socket::Socket, peer_addr: SocketAddr) {
        // Pre-TLS: a client that speaks plaintext HTTP to a TLS port is
        // closed fast, without a page (spec.md §6, Testable Property 2).
        let mut peek_buf = [0u8; SNIFF_LEN];
        if let Ok(Ok(n)) = tokio::time::timeout(SNIFF_DEADLINE, sock.peek(&mut peek_buf)).await {
            if n > 0 && looks_like_http(&peek_buf[..n]) {
                debug!(%peer_addr, "plaintext HTTP on a TLS port, closing fast");
                close_fast(sock).await;
                return;
            }
        }

        let channel = match tls::accept(&self.acceptor, sock, self.handshake_deadline).await {
            Ok(channel) => channel,
            Err(e) => {
                debug!(%peer_addr, "TLS handshake failed: {}", e);
                return;
            }
        };

        let mut channel = channel;
        // Post-TLS: a client that negotiated TLS but then speaks
        // HTTP/1.1 gets the Friendly Page over the TLS stream itself
        // (Testable Property 7), rather than the fast pre-TLS close.
        // This check runs before the trust check below: the page is a
        // diagnostic courtesy to any TLS-capable visitor, not an RPC
        // response, so it doesn't require the peer to be trusted.
        if let Ok(sniffed) = channel.io.sniff(SNIFF_LEN, SNIFF_DEADLINE).await {
            if looks_like_http(sniffed) {
                info!(peer = %channel.peer_thumbprint, "serving friendly page over TLS");
                self.friendly_page.serve(channel.io).await;
                return;
            }
        }

        if let Err(e) = check_trusted(&channel, |tp| self.trust.is_trusted(tp)) {
            warn!(%peer_addr, peer = %channel.peer_thumbprint, "rejecting untrusted peer: {}", e);
            return;
        }

        let mut connection = match Connection::establish(channel, Role::Callee, IdentityAnnounce::listening()).await
        {
            Ok(connection) => connection,
            Err(e) => {
                debug!(%peer_addr, "identity handshake failed: {}", e);
                return;
            }
        };

        match connection.subscription_id().map(str::to_owned) {
            Some(subscription_id) => {
                // Polling inversion (spec.md §4.7): this socket was
                // accepted, but the hub plays Caller on it.
                connection.set_role(Role::Caller);
                self.poll_queue.register_connection(&subscription_id, connection).await;
            }
            None => {
                dispatcher::run_loop(&mut connection, &self.registry).await;
            }
        }
    }
}

//! `Runtime` (spec.md §4.9): owns identity, trust set, registry, every
//! bound Listener and running Poller, the connection pool, and the
//! Poll Queue, and offers the handful of entry points applications use
//! to stand up a hub or a node.
//!
//! Grounded on the teacher's `Node::bootstrap`, which performs the
//! analogous job of binding a listener, spawning the accept task, and
//! kicking off outbound connection tasks from one config struct.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::info;

use crate::client::ClientProxy;
use crate::endpoint::Endpoint;
use crate::error::{ErrorKind, Result};
use crate::identity::{Identity, Thumbprint};
use crate::listener::{FriendlyPage, ListenerHandle};
use crate::pool::{self, ConnectionPool};
use crate::poll_queue::{self, PollQueue};
use crate::poller::{self, PollerConfig};
use crate::registry::ServiceRegistry;
use crate::rt;
use crate::tls::{self, DEFAULT_HANDSHAKE_DEADLINE};
use crate::trust::TrustSet;

/// Grace period given to in-flight dispatch to finish on shutdown
/// before sockets are closed regardless (spec.md §5). Same value as
/// `RuntimeConfig::default_shutdown_grace()`; kept as a free constant
/// too since `shutdown()` itself has no `RuntimeConfig` to read.
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// What a `Runtime` needs at construction (grounded on the teacher's
/// `NodeConfig`, a flat field struct the caller builds directly): its
/// own identity, the registry of services it serves, the peers it
/// trusts from the start, and every tunable spec.md §4/§5 gives a
/// stated default for. `Runtime::trust`/`Runtime::set_friendly_page`
/// remain the way to change trust or the Friendly Page after startup.
pub struct RuntimeConfig {
    pub identity: Identity,
    pub registry: ServiceRegistry,
    pub initial_trust: Vec<Thumbprint>,
    pub handshake_deadline: Duration,
    pub idle_deadline: Duration,
    pub pool_soft_bound: usize,
    pub queue_capacity: usize,
    pub shutdown_grace: Duration,
}

impl RuntimeConfig {
    /// `identity`/`registry` with every other field at spec.md's
    /// stated defaults (30s handshake, 60s idle, 5 pooled idle
    /// connections, 1000 queue capacity, 5s shutdown grace) and no
    /// initial trust.
    pub fn new(identity: Identity, registry: ServiceRegistry) -> Self {
        RuntimeConfig {
            identity,
            registry,
            initial_trust: Vec::new(),
            handshake_deadline: DEFAULT_HANDSHAKE_DEADLINE,
            idle_deadline: pool::DEFAULT_IDLE_DEADLINE,
            pool_soft_bound: pool::DEFAULT_SOFT_BOUND,
            queue_capacity: poll_queue::DEFAULT_QUEUE_CAPACITY,
            shutdown_grace: SHUTDOWN_GRACE_PERIOD,
        }
    }
}

/// Fleet communication endpoint: binds listening sockets, dials
/// polling subscriptions, and dispatches outbound calls, all sharing
/// one identity, trust set, and registry.
pub struct Runtime {
    identity: Arc<Identity>,
    trust: Arc<TrustSet>,
    registry: Arc<ServiceRegistry>,
    pool: Arc<ConnectionPool>,
    poll_queue: Arc<PollQueue>,
    friendly_page: Arc<FriendlyPage>,
    handshake_deadline: Duration,
    shutdown_grace: Duration,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Runtime {
            identity: Arc::new(config.identity),
            trust: Arc::new(TrustSet::from_iter(config.initial_trust)),
            registry: Arc::new(config.registry),
            pool: Arc::new(ConnectionPool::with_limits(config.idle_deadline, config.pool_soft_bound)),
            poll_queue: Arc::new(PollQueue::with_capacity(config.queue_capacity)),
            friendly_page: Arc::new(FriendlyPage::new()),
            handshake_deadline: config.handshake_deadline,
            shutdown_grace: config.shutdown_grace,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn thumbprint(&self) -> &Thumbprint {
        self.identity.thumbprint()
    }

    /// Adds a peer thumbprint to the Trust Set (spec.md §4.9).
    pub fn trust(&self, thumbprint: Thumbprint) {
        self.trust.trust(thumbprint);
    }

    pub fn revoke(&self, thumbprint: &Thumbprint) {
        self.trust.revoke(thumbprint);
    }

    /// Replaces the Friendly Page served to stray HTTP clients.
    pub fn set_friendly_page(&mut self, page: FriendlyPage) {
        self.friendly_page = Arc::new(page);
    }

    /// Binds an OS-assigned port on `0.0.0.0` and starts accepting.
    /// Returns the bound port (spec.md §4.9: `listen() -> port`).
    pub async fn listen(&self) -> std::io::Result<u16> {
        let addr: SocketAddr = "0.0.0.0:0".parse().expect("static address parses");
        Ok(self.listen_on(addr).await?.port())
    }

    /// Binds `addr` and starts accepting (spec.md §4.9: `listen_on`).
    pub async fn listen_on(&self, addr: SocketAddr) -> std::io::Result<SocketAddr> {
        let server_config = tls::server_config(&self.identity).map_err(to_io_error)?;
        let acceptor = TlsAcceptor::from(Arc::new(server_config));

        let handle = Arc::new(ListenerHandle::new(
            acceptor,
            Arc::clone(&self.trust),
            Arc::clone(&self.registry),
            Arc::clone(&self.poll_queue),
            Arc::clone(&self.friendly_page),
            self.handshake_deadline,
        ));
        let local_addr = handle.listen(addr).await?;
        info!(%local_addr, "listening");
        Ok(local_addr)
    }

    /// Registers a polling subscription and starts its dial/reconnect
    /// loop as a background task (spec.md §4.9: `poll(subscription_uri,
    /// remote_endpoint)`).
    pub fn poll(&self, subscription_id: impl Into<String>, remote_addr: SocketAddr, remote_hostname: impl Into<String>) -> Result<()> {
        let remote_hostname = remote_hostname.into();
        poller::validate_hostname(&remote_hostname)?;

        let config = PollerConfig {
            subscription_id: subscription_id.into(),
            remote_addr,
            remote_hostname,
            handshake_deadline: self.handshake_deadline,
        };
        rt::spawn(poller::run_subscription(
            Arc::clone(&self.identity),
            Arc::clone(&self.trust),
            Arc::clone(&self.registry),
            config,
            self.shutdown_rx.clone(),
        ));
        Ok(())
    }

    /// Builds a Client Proxy for outbound calls (spec.md §4.9:
    /// `client(endpoint) -> proxy`).
    pub fn client(&self) -> ClientProxy {
        ClientProxy::new(
            Arc::clone(&self.identity),
            Arc::clone(&self.trust),
            Arc::clone(&self.pool),
            Arc::clone(&self.poll_queue),
            self.handshake_deadline,
        )
    }

    /// Parses an endpoint URI against `expected_peer_thumbprint`, a
    /// convenience so callers don't need to import `Endpoint` directly
    /// for the common case.
    pub fn endpoint(&self, uri: &str, expected_peer_thumbprint: Thumbprint) -> Result<Endpoint> {
        Endpoint::parse(uri, expected_peer_thumbprint)
    }

    /// Signals every running Poller to stop reconnecting, drains the
    /// connection pool, and gives in-flight dispatch `grace_period` to
    /// finish before returning (spec.md §5).
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.pool.drain();
        tokio::time::sleep(self.shutdown_grace).await;
    }
}

fn to_io_error(e: crate::error::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}

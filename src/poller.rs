//! The dialing-out side of the polling inversion (spec.md §4.7).
//!
//! Grounded on the teacher's `Node::tx_side_connect_task` (dial, then
//! retry with backoff on failure), generalized from a fixed 1s retry to
//! spec.md's exponential-with-full-jitter backoff, and with the
//! connection's role inverted to callee once established.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rustls::ServerName;
use tokio::sync::watch;
use tokio_rustls::TlsConnector;
use tracing::{info, warn};

use crate::connection::{Connection, Role};
use crate::dispatcher;
use crate::error::{Error, ErrorKind, Result, ResultSimpleExt};
use crate::frame::IdentityAnnounce;
use crate::identity::Identity;
use crate::registry::ServiceRegistry;
use crate::socket;
use crate::tls::{self, check_trusted};
use crate::trust::TrustSet;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Where a subscription's remote Listener lives, and the subscription
/// id this Poller announces to it.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub subscription_id: String,
    pub remote_addr: SocketAddr,
    pub remote_hostname: String,
    pub handshake_deadline: Duration,
}

/// Full-jitter exponential backoff: `Uniform(0, min(cap, base * 2^attempt))`.
fn backoff_delay(attempt: u32) -> Duration {
    let exp_ms = (BACKOFF_BASE.as_millis() as u64).saturating_mul(1u64 << attempt.min(5));
    let capped_ms = exp_ms.min(BACKOFF_CAP.as_millis() as u64).max(1);
    let jitter_ms = rand::thread_rng().gen_range(0..=capped_ms);
    Duration::from_millis(jitter_ms)
}

/// Dials once, runs the handshake, then the callee loop until the
/// connection breaks. Returns once the socket is no longer usable;
/// reconnection is the caller's responsibility.
async fn run_connection_once(
    connector: &TlsConnector,
    identity: &Identity,
    trust: &TrustSet,
    registry: &ServiceRegistry,
    config: &PollerConfig,
) -> Result<()> {
    let socket = socket::connect(config.remote_addr).await?;
    let server_name = ServerName::try_from(config.remote_hostname.as_str())
        .simple(ErrorKind::HandshakeFailed)?;

    let channel = tls::connect(connector, server_name, socket, config.handshake_deadline).await?;
    check_trusted(&channel, |tp| trust.is_trusted(tp))?;

    let mut connection = Connection::establish(
        channel,
        Role::Callee,
        IdentityAnnounce::polling(config.subscription_id.clone()),
    )
    .await?;

    let _ = identity; // identity is baked into `connector`'s ClientConfig already
    dispatcher::run_loop(&mut connection, registry).await;
    Ok(())
}

/// Runs one subscription's dial/reconnect loop until `shutdown` fires.
/// Requests enqueued on the hub's Poll Queue while this subscription is
/// disconnected simply wait there (spec.md §4.7): reconnection here has
/// no knowledge of, or effect on, queued work.
pub async fn run_subscription(
    identity: Arc<Identity>,
    trust: Arc<TrustSet>,
    registry: Arc<ServiceRegistry>,
    config: PollerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let client_config = match tls::client_config(&identity) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(subscription = %config.subscription_id, "failed to build TLS client config: {}", e);
            return;
        }
    };
    let connector = TlsConnector::from(Arc::new(client_config));

    let mut attempt: u32 = 0;
    loop {
        if *shutdown.borrow() {
            return;
        }

        info!(subscription = %config.subscription_id, attempt, "dialing remote listener");
        match run_connection_once(&connector, &identity, &trust, &registry, &config).await {
            Ok(()) => {
                info!(subscription = %config.subscription_id, "polling connection ended cleanly, reconnecting");
                attempt = 0;
            }
            Err(e) => {
                warn!(subscription = %config.subscription_id, "polling connection failed: {}", e);
                attempt = attempt.saturating_add(1);
            }
        }

        let delay = backoff_delay(attempt);
        info!(subscription = %config.subscription_id, ?delay, "backing off before reconnect");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

/// A convenience error constructor kept alongside the backoff math it
/// guards: used by `runtime.rs` when a subscription's remote hostname
/// fails to parse as a TLS `ServerName` at registration time rather
/// than at first dial.
pub fn validate_hostname(hostname: &str) -> Result<()> {
    ServerName::try_from(hostname)
        .map(|_| ())
        .map_err(|_| Error::simple(ErrorKind::ProtocolViolation))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_never_exceeds_cap_plus_jitter_bound() {
        for attempt in 0..20 {
            let delay = backoff_delay(attempt);
            assert!(delay <= BACKOFF_CAP);
        }
    }

    #[test]
    fn backoff_at_attempt_zero_is_bounded_by_base() {
        let delay = backoff_delay(0);
        assert!(delay <= BACKOFF_BASE);
    }
}

//! `ConnectionPool` behavior that needs a real `Connection` to test
//! (spec.md §4.4, §8 Testable Property 8).

mod common;

use std::time::Duration;

use common::{connected_pair, self_signed_identity};
use haltether::endpoint::{Endpoint, Scheme};
use haltether::frame::IdentityAnnounce;
use haltether::identity::Thumbprint;
use haltether::pool::ConnectionPool;

fn endpoint() -> Endpoint {
    Endpoint { scheme: Scheme::Tls, authority: "peer:443".into(), expected_peer_thumbprint: Thumbprint::from("x") }
}

async fn two_connections() -> (haltether::connection::Connection, haltether::connection::Connection) {
    let hub = self_signed_identity("hub.local");
    let node = self_signed_identity("node.local");
    connected_pair(&hub, &node, IdentityAnnounce::listening(), IdentityAnnounce::listening()).await
}

#[tokio::test]
async fn release_then_acquire_round_trips_the_same_connection() {
    let pool = ConnectionPool::new();
    let (conn, _peer) = two_connections().await;
    let endpoint = endpoint();

    pool.release(&endpoint, conn);
    assert_eq!(pool.idle_count(&endpoint), 1);

    let acquired = pool.try_acquire(&endpoint);
    assert!(acquired.is_some());
    assert_eq!(pool.idle_count(&endpoint), 0);
}

#[tokio::test]
async fn releasing_a_broken_connection_is_a_no_op() {
    let pool = ConnectionPool::new();
    let (mut conn, _peer) = two_connections().await;
    conn.mark_broken();

    let endpoint = endpoint();
    pool.release(&endpoint, conn);
    assert_eq!(pool.idle_count(&endpoint), 0);
    assert!(pool.try_acquire(&endpoint).is_none());
}

#[tokio::test]
async fn acquire_discards_entries_older_than_the_idle_deadline() {
    let pool = ConnectionPool::with_limits(Duration::from_millis(10), 5);
    let (conn, _peer) = two_connections().await;
    let endpoint = endpoint();

    pool.release(&endpoint, conn);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(pool.try_acquire(&endpoint).is_none());
}

#[tokio::test]
async fn soft_bound_drops_overflow_connections_instead_of_queuing_them() {
    let pool = ConnectionPool::with_limits(Duration::from_secs(60), 1);
    let endpoint = endpoint();

    let (a, _peer_a) = two_connections().await;
    let (b, _peer_b) = two_connections().await;

    pool.release(&endpoint, a);
    pool.release(&endpoint, b);
    assert_eq!(pool.idle_count(&endpoint), 1);
}

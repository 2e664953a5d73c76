//! A bounded per-endpoint cache of idle Connections (spec.md §4.4).
//!
//! No direct teacher analogue — the teacher keeps exactly one
//! permanent connection per peer rather than a pool of interchangeable
//! ones — so this is grounded on spec.md's own stated invariants (LIFO
//! keeps recently-used sockets warm; soft-bounded; idle eviction) plus
//! the acquire/release/evict shape common to connection-pool code in
//! the wider corpus (e.g. `other_examples/..._connection_pool.rs.rs`).

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::connection::{Connection, ConnectionState};
use crate::endpoint::Endpoint;

/// Default idle deadline: an `Idle` connection older than this is
/// discarded rather than handed out, per spec.md §4.4.
pub const DEFAULT_IDLE_DEADLINE: Duration = Duration::from_secs(60);

/// Default soft bound on idle connections kept per endpoint.
pub const DEFAULT_SOFT_BOUND: usize = 5;

pub struct ConnectionPool {
    entries: Mutex<HashMap<Endpoint, VecDeque<Connection>>>,
    idle_deadline: Duration,
    soft_bound: usize,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_IDLE_DEADLINE, DEFAULT_SOFT_BOUND)
    }

    pub fn with_limits(idle_deadline: Duration, soft_bound: usize) -> Self {
        ConnectionPool {
            entries: Mutex::new(HashMap::new()),
            idle_deadline,
            soft_bound,
        }
    }

    /// Pops the most-recently-released Idle connection for `endpoint`,
    /// discarding (and trying the next) any that are stale. Does not
    /// dial: an empty result means the caller must dial a fresh
    /// connection itself (spec.md §4.5/§4.8), which keeps this pool
    /// transport-agnostic.
    pub fn try_acquire(&self, endpoint: &Endpoint) -> Option<Connection> {
        let mut entries = self.entries.lock();
        let deque = entries.get_mut(endpoint)?;

        while let Some(conn) = deque.pop_front() {
            if conn.state() != ConnectionState::Idle {
                continue;
            }
            if conn.last_used_at().elapsed() > self.idle_deadline {
                debug!(endpoint = %endpoint, "discarding stale idle connection");
                continue;
            }
            return Some(conn);
        }
        None
    }

    /// Returns a Connection to the pool if it is still `Idle`;
    /// otherwise destroys it (drops it). Releasing an already-released
    /// or broken Connection is a no-op and never re-pools a broken one
    /// (Testable Property 8).
    pub fn release(&self, endpoint: &Endpoint, mut connection: Connection) {
        if connection.state() != ConnectionState::Idle {
            return;
        }
        connection.mark_idle();

        let mut entries = self.entries.lock();
        let deque = entries.entry(endpoint.clone()).or_insert_with(VecDeque::new);
        if deque.len() >= self.soft_bound {
            debug!(endpoint = %endpoint, "pool at soft bound, closing overflow connection");
            return;
        }
        deque.push_front(connection);
    }

    /// Drains and drops every pooled connection for every endpoint,
    /// used on runtime shutdown.
    pub fn drain(&self) {
        let mut entries = self.entries.lock();
        entries.clear();
    }

    /// The number of idle connections currently pooled for `endpoint`.
    /// Mainly useful for tests; not part of the acquire/release cycle.
    pub fn idle_count(&self, endpoint: &Endpoint) -> usize {
        self.entries
            .lock()
            .get(endpoint)
            .map(|d| d.len())
            .unwrap_or(0)
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

// Unit tests for this module live in tests/pool.rs, since constructing
// a real `Connection` requires a full TLS handshake pair; see that
// file for LIFO-order and idempotent-release coverage.

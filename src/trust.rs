//! The set of peer thumbprints a runtime will accept.
//!
//! Grounded on spec.md §5: "Trust set and registry are read-mostly;
//! updates use a copy-on-write or reader/writer discipline so reads
//! never block." Implemented as a `parking_lot::RwLock` guarding an
//! `Arc` snapshot, the same lock the teacher already depends on.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::identity::Thumbprint;

/// A set of peer thumbprints this runtime will accept. Trust is
/// asymmetric: each side of a connection maintains its own `TrustSet`.
pub struct TrustSet {
    inner: RwLock<Arc<HashSet<Thumbprint>>>,
}

impl TrustSet {
    pub fn new() -> Self {
        TrustSet { inner: RwLock::new(Arc::new(HashSet::new())) }
    }

    pub fn from_iter<I: IntoIterator<Item = Thumbprint>>(iter: I) -> Self {
        TrustSet { inner: RwLock::new(Arc::new(iter.into_iter().collect())) }
    }

    /// Adds a thumbprint to the trust set. Readers in flight continue to
    /// see the pre-update snapshot.
    pub fn trust(&self, thumbprint: Thumbprint) {
        let mut guard = self.inner.write();
        let mut next = HashSet::clone(&guard);
        next.insert(thumbprint);
        *guard = Arc::new(next);
    }

    /// Removes a thumbprint from the trust set, if present.
    pub fn revoke(&self, thumbprint: &Thumbprint) {
        let mut guard = self.inner.write();
        if guard.contains(thumbprint) {
            let mut next = HashSet::clone(&guard);
            next.remove(thumbprint);
            *guard = Arc::new(next);
        }
    }

    /// Returns `true` iff `thumbprint` is in the trust set.
    pub fn is_trusted(&self, thumbprint: &Thumbprint) -> bool {
        self.inner.read().contains(thumbprint)
    }

    /// A cheap, lock-free-after-the-fact snapshot of the current set.
    pub fn snapshot(&self) -> Arc<HashSet<Thumbprint>> {
        self.inner.read().clone()
    }
}

impl Default for TrustSet {
    fn default() -> Self {
        Self::new()
    }
}

//! Logical addressing for callers: `(scheme, authority, expected peer
//! thumbprint)` per spec.md §3, parsed from the `tls://`/`poll://` URI
//! forms in §6.

use std::fmt;

use crate::error::{Error, ErrorKind, Result};
use crate::identity::Thumbprint;

/// Which orientation a peer presents at this endpoint.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Scheme {
    /// `tls://host:port` — the peer is a Listener; dial it directly.
    Tls,
    /// `poll://subscription-id` — the peer is a Poller; enqueue onto
    /// its Poll Queue and wait for it to dial in.
    Poll,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Tls => write!(f, "tls"),
            Scheme::Poll => write!(f, "poll"),
        }
    }
}

/// `(scheme, authority, expected_peer_thumbprint)`. For `Scheme::Tls`,
/// `authority` is `host:port`; for `Scheme::Poll`, it is the
/// subscription id.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub authority: String,
    pub expected_peer_thumbprint: Thumbprint,
}

impl Endpoint {
    pub fn tls(authority: impl Into<String>, expected_peer_thumbprint: Thumbprint) -> Self {
        Endpoint { scheme: Scheme::Tls, authority: authority.into(), expected_peer_thumbprint }
    }

    pub fn poll(subscription_id: impl Into<String>, expected_peer_thumbprint: Thumbprint) -> Self {
        Endpoint { scheme: Scheme::Poll, authority: subscription_id.into(), expected_peer_thumbprint }
    }

    /// Parses `tls://host:port` or `poll://subscription-id`. The
    /// expected thumbprint isn't part of the URI (spec.md doesn't place
    /// it on the wire); it must be supplied by the caller alongside the
    /// URI, the way a client pins it out of band.
    pub fn parse(uri: &str, expected_peer_thumbprint: Thumbprint) -> Result<Self> {
        if let Some(rest) = uri.strip_prefix("tls://") {
            if rest.is_empty() {
                return Err(Error::simple(ErrorKind::ProtocolViolation));
            }
            return Ok(Endpoint::tls(rest, expected_peer_thumbprint));
        }
        if let Some(rest) = uri.strip_prefix("poll://") {
            if rest.is_empty() {
                return Err(Error::simple(ErrorKind::ProtocolViolation));
            }
            return Ok(Endpoint::poll(rest, expected_peer_thumbprint));
        }
        Err(Error::simple(ErrorKind::ProtocolViolation))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority)
    }
}

//! Peer identity: X.509 certificates and the thumbprint derived from them.
//!
//! Grounded on the teacher's fixed-length digest newtype
//! (`bft::crypto::hash::ring_sha2::Digest`), generalized from a SHA-256
//! content hash to the lowercase-hex SHA-1 thumbprint spec.md §3 defines
//! as the sole identity token.

use std::fmt;
use std::io::BufReader;

use rustls::{Certificate, PrivateKey};
use sha1::{Digest as _, Sha1};

use crate::error::{Error, ErrorKind, Result, ResultWrappedExt};

/// Lowercase hex SHA-1 of a certificate's DER encoding.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Thumbprint(String);

impl Thumbprint {
    /// Computes the thumbprint of a DER-encoded certificate.
    pub fn of(cert: &Certificate) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(&cert.0);
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            use std::fmt::Write;
            write!(&mut hex, "{:02x}", byte).expect("writing to a String cannot fail");
        }
        Thumbprint(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thumbprint({})", self.0)
    }
}

impl fmt::Display for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Thumbprint {
    fn from(s: &str) -> Self {
        Thumbprint(s.to_ascii_lowercase())
    }
}

impl From<String> for Thumbprint {
    fn from(s: String) -> Self {
        Thumbprint(s.to_ascii_lowercase())
    }
}

/// This runtime's own certificate + private key, presented during the
/// TLS handshake on both the listening and the polling side.
#[derive(Clone)]
pub struct Identity {
    cert_chain: Vec<Certificate>,
    key: PrivateKey,
    thumbprint: Thumbprint,
}

impl Identity {
    /// Builds an `Identity` from an already-parsed certificate chain and
    /// private key. The thumbprint is taken from the leaf (first)
    /// certificate.
    pub fn new(cert_chain: Vec<Certificate>, key: PrivateKey) -> Result<Self> {
        let leaf = cert_chain
            .first()
            .ok_or(())
            .simple_msg(ErrorKind::HandshakeFailed, "empty certificate chain")?;
        let thumbprint = Thumbprint::of(leaf);
        Ok(Identity { cert_chain, key, thumbprint })
    }

    /// Parses a PEM-encoded certificate chain and PKCS#8/RSA private key.
    ///
    /// This is the full extent of this crate's involvement with
    /// "credentials on disk" (out of scope per spec.md §1): it only turns
    /// bytes the caller already obtained into TLS-usable types.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let mut cert_reader = BufReader::new(cert_pem);
        let cert_chain = rustls_pemfile::certs(&mut cert_reader)
            .wrapped(ErrorKind::HandshakeFailed)?
            .into_iter()
            .map(Certificate)
            .collect::<Vec<_>>();

        let mut key_reader = BufReader::new(key_pem);
        let key = rustls_pemfile::pkcs8_private_keys(&mut key_reader)
            .wrapped(ErrorKind::HandshakeFailed)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::simple(ErrorKind::HandshakeFailed))?;

        Self::new(cert_chain, PrivateKey(key))
    }

    pub fn cert_chain(&self) -> &[Certificate] {
        &self.cert_chain
    }

    pub fn key(&self) -> PrivateKey {
        self.key.clone()
    }

    pub fn thumbprint(&self) -> &Thumbprint {
        &self.thumbprint
    }
}

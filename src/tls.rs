//! Mutual-TLS upgrade of a raw socket, with no certificate-chain
//! validation: trust is established entirely by thumbprint pinning
//! against the `TrustSet` (spec.md §4.2), not by a PKI chain.
//!
//! Grounded on the teacher's use of `rustls::{ClientConfig, ServerConfig}`
//! + `TlsAcceptor`/`TlsConnector` in `communication::mod`, re-pointed at
//! `tokio-rustls` and extended with custom verifiers that accept any
//! well-formed certificate and simply record its thumbprint.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::server::{ClientCertVerified, ClientCertVerifier};
use rustls::{Certificate, ClientConfig, DistinguishedNames, Error as RustlsError, ServerConfig, ServerName};
use tokio::time::timeout;
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};

use crate::error::{Error, ErrorKind, Result, ResultSimpleExt};
use crate::identity::{Identity, Thumbprint};
use crate::peek::Peeked;
use crate::socket::Socket;

/// Default TLS handshake deadline, per spec.md §4.2.
pub const DEFAULT_HANDSHAKE_DEADLINE: Duration = Duration::from_secs(30);

/// Accepts any certificate offered, valid or not: this runtime does not
/// walk a PKI chain, it only records the thumbprint (spec.md §4.2,
/// Non-goals in §1: "No certificate-chain validation, no revocation").
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, RustlsError> {
        Ok(ServerCertVerified::assertion())
    }
}

/// Requests a client certificate and accepts whatever is offered; the
/// handshake still fails if the client offers none at all (rustls
/// enforces that once client auth is mandatory).
struct AcceptAnyClientCert;

impl ClientCertVerifier for AcceptAnyClientCert {
    fn client_auth_root_subjects(&self) -> Option<DistinguishedNames> {
        Some(DistinguishedNames::new())
    }

    fn verify_client_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _now: SystemTime,
    ) -> std::result::Result<ClientCertVerified, RustlsError> {
        Ok(ClientCertVerified::assertion())
    }
}

/// Builds the server-side TLS configuration: present `identity`, require
/// (and accept any) client certificate.
pub fn server_config(identity: &Identity) -> Result<ServerConfig> {
    ServerConfig::builder()
        .with_safe_defaults()
        .with_client_cert_verifier(Arc::new(AcceptAnyClientCert))
        .with_single_cert(identity.cert_chain().to_vec(), identity.key())
        .wrapped(ErrorKind::HandshakeFailed)
}

/// Builds the client-side TLS configuration: present `identity`, accept
/// whatever certificate the server presents.
pub fn client_config(identity: &Identity) -> Result<ClientConfig> {
    ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_single_cert(identity.cert_chain().to_vec(), identity.key())
        .wrapped(ErrorKind::HandshakeFailed)
}

/// A TLS-upgraded socket plus the peer's certificate thumbprint,
/// observed once at handshake time and fixed for the Connection's
/// lifetime (spec.md §3 invariant).
///
/// `io` is wrapped in `Peeked` so the Listener can sniff the first
/// decrypted bytes (to tell an RPC frame apart from a stray HTTP
/// request, spec.md §6) without consuming them; for a dialed-out
/// connection this is a zero-cost passthrough.
pub struct SecureChannel {
    pub io: Peeked<TlsStream<Socket>>,
    pub peer_thumbprint: Thumbprint,
}

/// Server-side upgrade: present `identity`, require a client
/// certificate, enforce the handshake deadline.
pub async fn accept(
    acceptor: &TlsAcceptor,
    socket: Socket,
    deadline: Duration,
) -> Result<SecureChannel> {
    let stream = timeout(deadline, acceptor.accept(socket))
        .await
        .simple(ErrorKind::HandshakeFailed)?
        .wrapped(ErrorKind::HandshakeFailed)?;

    let peer_thumbprint = {
        let (_, connection) = stream.get_ref();
        let certs = connection
            .peer_certificates()
            .ok_or(())
            .simple(ErrorKind::HandshakeFailed)?;
        let leaf = certs.first().ok_or(()).simple(ErrorKind::HandshakeFailed)?;
        Thumbprint::of(leaf)
    };

    Ok(SecureChannel { io: Peeked::new(TlsStream::Server(stream)), peer_thumbprint })
}

/// Client-side upgrade: present `identity`, accept the server's
/// certificate unconditionally at the TLS layer, enforce the handshake
/// deadline.
pub async fn connect(
    connector: &TlsConnector,
    server_name: ServerName,
    socket: Socket,
    deadline: Duration,
) -> Result<SecureChannel> {
    let stream = timeout(deadline, connector.connect(server_name, socket))
        .await
        .simple(ErrorKind::HandshakeFailed)?
        .wrapped(ErrorKind::HandshakeFailed)?;

    let peer_thumbprint = {
        let (_, connection) = stream.get_ref();
        let certs = connection
            .peer_certificates()
            .ok_or(())
            .simple(ErrorKind::HandshakeFailed)?;
        let leaf = certs.first().ok_or(()).simple(ErrorKind::HandshakeFailed)?;
        Thumbprint::of(leaf)
    };

    Ok(SecureChannel { io: Peeked::new(TlsStream::Client(stream)), peer_thumbprint })
}

/// Fails an untrusted peer fast: closes the Connection (by dropping
/// `channel`) and reports `UntrustedPeer`, per spec.md §4.2/§7.
pub fn check_trusted(channel: &SecureChannel, is_trusted: impl FnOnce(&Thumbprint) -> bool) -> Result<()> {
    if is_trusted(&channel.peer_thumbprint) {
        Ok(())
    } else {
        Err(Error::simple(ErrorKind::UntrustedPeer))
    }
}

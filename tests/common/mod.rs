//! Shared fixtures for integration tests: throwaway self-signed
//! identities and a helper that stands up a real loopback TLS pair,
//! since `Connection` is built on `tokio::net::TcpStream` rather than
//! an in-memory duplex stream.

use std::sync::Arc;

use haltether::connection::{Connection, Role};
use haltether::frame::IdentityAnnounce;
use haltether::identity::Identity;
use haltether::socket;
use haltether::tls;

pub fn self_signed_identity(hostname: &str) -> Identity {
    let cert = rcgen::generate_simple_self_signed(vec![hostname.to_owned()]).expect("self-signed cert");
    let cert_der = cert.serialize_der().expect("serialize cert");
    let key_der = cert.serialize_private_key_der();
    Identity::new(vec![rustls::Certificate(cert_der)], rustls::PrivateKey(key_der)).expect("build identity")
}

/// Binds an ephemeral loopback listener, dials it, and runs the TLS +
/// identity handshake on both ends concurrently, returning
/// `(server_connection, client_connection)`.
pub async fn connected_pair(
    server_identity: &Identity,
    client_identity: &Identity,
    server_announce: IdentityAnnounce,
    client_announce: IdentityAnnounce,
) -> (Connection, Connection) {
    let listener = socket::bind("127.0.0.1:0".parse().unwrap()).await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let server_config = tls::server_config(server_identity).expect("server config");
    let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(server_config));

    let client_config = tls::client_config(client_identity).expect("client config");
    let connector = tokio_rustls::TlsConnector::from(Arc::new(client_config));

    let server_task = tokio::spawn(async move {
        let (sock, _) = listener.accept().await.expect("accept");
        let channel = tls::accept(&acceptor, sock, tls::DEFAULT_HANDSHAKE_DEADLINE).await.expect("tls accept");
        Connection::establish(channel, Role::Callee, server_announce).await.expect("establish")
    });

    let client_sock = socket::connect(addr).await.expect("connect");
    let server_name = rustls::ServerName::try_from("localhost").expect("server name");
    let channel = tls::connect(&connector, server_name, client_sock, tls::DEFAULT_HANDSHAKE_DEADLINE)
        .await
        .expect("tls connect");
    let client_connection = Connection::establish(channel, Role::Caller, client_announce).await.expect("establish");

    let server_connection = server_task.await.expect("server task");
    (server_connection, client_connection)
}

//! Runtime-level integration tests exercising the listening and
//! polling orientations together, plus the Friendly Page and the
//! plaintext-on-a-TLS-port fast close (spec.md §8 Testable Properties
//! 1, 2, 4, 7).

mod common;

use std::io::ErrorKind as IoErrorKind;
use std::time::Duration;

use common::self_signed_identity;
use haltether::endpoint::Endpoint;
use haltether::registry::{ArgShape, Service, ServiceRegistry};
use haltether::runtime::{Runtime, RuntimeConfig};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn greeter_registry() -> ServiceRegistry {
    let mut registry = ServiceRegistry::new();
    registry.register(
        "Greeter",
        Service::new().method("ping", vec![], |_, _| Ok(json!("pong"))),
    );
    registry
}

#[tokio::test]
async fn tls_listening_call_round_trips_and_checks_trust_pinning() {
    let hub = Runtime::new(RuntimeConfig::new(self_signed_identity("hub.local"), greeter_registry()));
    let node = Runtime::new(RuntimeConfig::new(self_signed_identity("node.local"), ServiceRegistry::new()));

    hub.trust(node.thumbprint().clone());
    node.trust(hub.thumbprint().clone());

    let addr = hub.listen_on("127.0.0.1:0".parse().unwrap()).await.expect("listen");

    let client = node.client();
    let endpoint = Endpoint::tls(addr.to_string(), hub.thumbprint().clone());
    let (result, _streams) = client.invoke(&endpoint, "Greeter", "ping", json!([]), vec![]).await.expect("invoke");
    assert_eq!(result, json!("pong"));

    // Testable Property 1: a caller pinning the wrong thumbprint fails
    // `UntrustedPeer` rather than silently talking to the real hub.
    let wrong_endpoint = Endpoint::tls(addr.to_string(), node.thumbprint().clone());
    let err = client.invoke(&wrong_endpoint, "Greeter", "ping", json!([]), vec![]).await.unwrap_err();
    assert_eq!(err.kind(), haltether::error::ErrorKind::UntrustedPeer);
}

#[tokio::test]
async fn polling_node_serves_calls_from_a_listening_only_hub() {
    let hub = Runtime::new(RuntimeConfig::new(self_signed_identity("hub.local"), ServiceRegistry::new()));
    let node = Runtime::new(RuntimeConfig::new(self_signed_identity("node.local"), greeter_registry()));

    hub.trust(node.thumbprint().clone());
    node.trust(hub.thumbprint().clone());

    let addr = hub.listen_on("127.0.0.1:0".parse().unwrap()).await.expect("listen");
    node.poll("demo-sub", addr, "hub.local").expect("poll");

    // give the poller a moment to dial in and register itself
    tokio::time::sleep(Duration::from_millis(200)).await;

    let client = hub.client();
    let endpoint = Endpoint::poll("demo-sub", node.thumbprint().clone());
    let (result, _streams) = client.invoke(&endpoint, "Greeter", "ping", json!([]), vec![]).await.expect("invoke");
    assert_eq!(result, json!("pong"));
}

#[tokio::test]
async fn friendly_page_is_served_over_tls_and_is_configurable() {
    let mut hub = Runtime::new(RuntimeConfig::new(self_signed_identity("hub.local"), ServiceRegistry::new()));
    let mut page = haltether::listener::FriendlyPage::new();
    page.set_body("Simple text works too!");
    hub.set_friendly_page(page);

    let addr = hub.listen_on("127.0.0.1:0".parse().unwrap()).await.expect("listen");

    let visitor = self_signed_identity("visitor.local");
    let client_config = haltether::tls::client_config(&visitor).expect("client config");
    let connector = tokio_rustls::TlsConnector::from(std::sync::Arc::new(client_config));

    let sock = TcpStream::connect(addr).await.expect("connect");
    let server_name = rustls::ServerName::try_from("localhost").unwrap();
    let mut tls = connector.connect(server_name, sock).await.expect("tls connect");

    tls.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await.expect("write request");
    let mut response = Vec::new();
    let _ = tls.read_to_end(&mut response).await;
    let response = String::from_utf8_lossy(&response);

    assert!(response.contains("Simple text works too!"));
    assert!(response.contains("X-Frame-Options: DENY"));
}

#[tokio::test]
async fn plaintext_http_on_a_tls_port_closes_fast() {
    let hub = Runtime::new(RuntimeConfig::new(self_signed_identity("hub.local"), ServiceRegistry::new()));
    let addr = hub.listen_on("127.0.0.1:0".parse().unwrap()).await.expect("listen");

    let mut sock = TcpStream::connect(addr).await.expect("connect");
    sock.write_all(b"GET / HTTP/1.1\r\n\r\n").await.expect("write");

    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(5), sock.read(&mut buf)).await.expect("within deadline");
    match read {
        Ok(0) => {}
        Ok(_) => panic!("expected the connection to close without an RPC/HTTP reply"),
        Err(e) => assert!(matches!(e.kind(), IoErrorKind::ConnectionReset | IoErrorKind::UnexpectedEof)),
    }
}

//! Minimal node: dials the hub as a polling participant and answers
//! nothing itself; it just keeps the subscription open so the hub can
//! call `Greeter.hello` against it... except in this toy pairing the
//! node doesn't register any services, so a call to it always fails
//! `ServiceNotFound`. Pair with `demos/hub.rs`, whose registry is the
//! one actually worth calling — this demo exists to show the dial +
//! `poll://` side of the handshake, not a two-way service mesh.

use std::env;

use haltether::error::Result;
use haltether::identity::{Identity, Thumbprint};
use haltether::registry::ServiceRegistry;
use haltether::runtime::{Runtime, RuntimeConfig};

fn self_signed_identity() -> Identity {
    let cert = rcgen::generate_simple_self_signed(vec!["node.local".into()]).expect("self-signed cert");
    let cert_der = cert.serialize_der().expect("serialize cert");
    let key_der = cert.serialize_private_key_der();
    Identity::new(vec![rustls::Certificate(cert_der)], rustls::PrivateKey(key_der)).expect("build identity")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let hub_thumbprint = env::args().nth(1).expect("usage: node <hub-thumbprint>");

    let runtime = Runtime::new(RuntimeConfig::new(self_signed_identity(), ServiceRegistry::new()));
    println!("node thumbprint: {}", runtime.thumbprint());

    runtime.trust(Thumbprint::from(hub_thumbprint));
    runtime.poll("demo-node-1", "127.0.0.1:7443".parse().unwrap(), "hub.local")?;

    std::future::pending::<()>().await;
    Ok(())
}

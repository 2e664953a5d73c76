//! Minimal hub: binds a listening socket, registers one service, and
//! trusts whichever node connects to it by a thumbprint given on the
//! command line.
//!
//! Run two terminals: `cargo run --example hub -- <node-thumbprint>`,
//! then `cargo run --example node -- <hub-thumbprint>`.

use std::env;

use haltether::error::Result;
use haltether::identity::{Identity, Thumbprint};
use haltether::registry::{ArgShape, Service, ServiceRegistry};
use haltether::runtime::{Runtime, RuntimeConfig};
use serde_json::json;

fn self_signed_identity() -> Identity {
    let cert = rcgen::generate_simple_self_signed(vec!["hub.local".into()]).expect("self-signed cert");
    let cert_der = cert.serialize_der().expect("serialize cert");
    let key_der = cert.serialize_private_key_der();
    Identity::new(vec![rustls::Certificate(cert_der)], rustls::PrivateKey(key_der)).expect("build identity")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let node_thumbprint = env::args().nth(1).expect("usage: hub <node-thumbprint>");

    let mut registry = ServiceRegistry::new();
    registry.register(
        "Greeter",
        Service::new().method("hello", vec![ArgShape::String], |args, _streams| {
            let name = args[0].as_str().unwrap_or("stranger");
            Ok(json!(format!("hello, {}!", name)))
        }),
    );

    let runtime = Runtime::new(RuntimeConfig::new(self_signed_identity(), registry));
    println!("hub thumbprint: {}", runtime.thumbprint());

    runtime.trust(Thumbprint::from(node_thumbprint));
    let addr = runtime.listen_on("127.0.0.1:7443".parse().unwrap()).await?;
    println!("hub listening on {}", addr);

    std::future::pending::<()>().await;
    Ok(())
}

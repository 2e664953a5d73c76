//! Request-direction streaming through the actual dispatcher loop
//! (spec.md §3, §8 Testable Property 5's `count_bytes` echo), as
//! opposed to `tests/stream_roundtrip.rs`, which only drives the codec
//! directly and never proves the dispatcher hands attachments to a
//! handler or drains them fully.

mod common;

use common::{connected_pair, self_signed_identity};
use haltether::dispatcher;
use haltether::frame::{Frame, IdentityAnnounce, Outcome, RequestFrame};
use haltether::registry::{Service, ServiceRegistry};
use serde_json::json;

fn count_bytes_registry() -> ServiceRegistry {
    let mut registry = ServiceRegistry::new();
    registry.register(
        "Echo",
        Service::new().method("count_bytes", vec![], |_, streams| {
            Ok(json!(streams.iter().map(|s| s.len()).sum::<usize>()))
        }),
    );
    registry
}

#[tokio::test]
async fn request_stream_attachments_reach_the_handler_and_the_connection_stays_usable() {
    let server_identity = self_signed_identity("server.local");
    let client_identity = self_signed_identity("client.local");
    let (mut server, mut client) = connected_pair(
        &server_identity,
        &client_identity,
        IdentityAnnounce::listening(),
        IdentityAnnounce::listening(),
    )
    .await;

    let registry = count_bytes_registry();
    let server_task = tokio::spawn(async move {
        dispatcher::run_loop(&mut server, &registry).await;
    });

    const LEN: usize = 1_048_591;
    let payload = vec![7u8; LEN];

    for _ in 0..2 {
        let request = RequestFrame::new("1", "Echo", "count_bytes", json!(null), vec![1]);
        client.write_frame(&Frame::Request(request)).await.expect("write request");
        client.write_stream(&haltether::stream::StreamAttachment::new(1, payload.clone()), |_| {})
            .await
            .expect("write stream");

        let response = match client.read_frame().await.expect("read response") {
            Frame::Response(r) => r,
            other => panic!("expected a response frame, got {:?}", other),
        };
        match response.outcome {
            Outcome::Success(value) => assert_eq!(value, json!(LEN)),
            Outcome::Error(e) => panic!("unexpected error: {:?}", e),
        }
    }

    drop(client);
    server_task.await.expect("server task");
}

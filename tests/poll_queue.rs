//! `PollQueue`'s pairing between queued `poll://` calls and the single
//! dialed-in connection a subscription typically has (spec.md §4.7,
//! §9 Design Notes: "the single most error-prone piece").
//!
//! Reproduces the lost-wakeup scenario: a second call enqueues onto
//! `pending` while the first is still being serviced on the only
//! available connection. Before the fix, the connection went straight
//! back to `available` without re-checking `pending`, and the second
//! call's `oneshot::Receiver` would hang forever.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{connected_pair, self_signed_identity};
use haltether::dispatcher;
use haltether::frame::{IdentityAnnounce, Outcome, RequestFrame};
use haltether::identity::Thumbprint;
use haltether::poll_queue::PollQueue;
use haltether::registry::{Service, ServiceRegistry};
use serde_json::json;

fn slow_echo_registry() -> ServiceRegistry {
    let mut registry = ServiceRegistry::new();
    registry.register(
        "Echo",
        Service::new().method("wait_then_echo", vec![], |_, _| {
            std::thread::sleep(Duration::from_millis(150));
            Ok(json!("done"))
        }),
    );
    registry
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_call_queued_behind_an_in_flight_call_still_resolves() {
    let hub_identity = self_signed_identity("hub.local");
    let node_identity = self_signed_identity("node.local");
    let (hub_side, node_side) = connected_pair(
        &hub_identity,
        &node_identity,
        IdentityAnnounce::listening(),
        IdentityAnnounce::polling("sub-1"),
    )
    .await;

    let registry = slow_echo_registry();
    tokio::spawn(async move {
        let mut node_side = node_side;
        dispatcher::run_loop(&mut node_side, &registry).await;
    });

    let queue = Arc::new(PollQueue::new());
    queue.register_connection("sub-1", hub_side).await;

    let thumbprint = Thumbprint::from(node_identity.thumbprint().to_string());

    let first_handle = tokio::spawn({
        let queue = Arc::clone(&queue);
        let thumbprint = thumbprint.clone();
        async move {
            queue
                .call(
                    "sub-1",
                    thumbprint,
                    RequestFrame::new("1", "Echo", "wait_then_echo", json!(null), vec![]),
                    vec![],
                )
                .await
        }
    });

    // Give the first call time to pop the only available connection
    // and start servicing before the second one enqueues.
    tokio::time::sleep(Duration::from_millis(30)).await;

    let second_handle = tokio::spawn({
        let queue = Arc::clone(&queue);
        async move {
            queue
                .call(
                    "sub-1",
                    thumbprint,
                    RequestFrame::new("2", "Echo", "wait_then_echo", json!(null), vec![]),
                    vec![],
                )
                .await
        }
    });

    let (first_result, second_result) = tokio::time::timeout(Duration::from_secs(5), async {
        let first_result = first_handle.await.expect("first call task");
        let second_result = second_handle.await.expect("second call task");
        (first_result, second_result)
    })
    .await
    .expect("both calls resolved within the deadline, proving the second wasn't lost");

    assert_eq!(first_result.expect("first call").0.outcome, Outcome::Success(json!("done")));
    assert_eq!(second_result.expect("second call").0.outcome, Outcome::Success(json!("done")));
}

//! Callee-side request-handling loop (spec.md §4.6).
//!
//! Grounded on the teacher's `Node::rx_side_accept_task`/
//! `tx_side_connect_task`: a task owns exactly one socket end-to-end and
//! runs until a fault or an intentional shutdown retires it.

use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::ErrorKind;
use crate::frame::{ErrorDescriptor, Frame, RequestFrame, ResponseFrame};
use crate::registry::ServiceRegistry;
use crate::stream::StreamAttachment;

/// Runs the callee loop on `connection` until a protocol/IO fault marks
/// it `Broken`, or the registry-resolved handler completes and the loop
/// returns for the Connection to be released back to its owner (the
/// Poller for a polling-inverted connection, the Listener's accept task
/// otherwise).
///
/// Per spec.md §5: "A single Connection is strictly serial: request N's
/// response is fully sent before request N+1 is read." This loop reads
/// one request, replies, and loops — it never reads ahead.
pub async fn run_once(connection: &mut Connection, registry: &ServiceRegistry) -> bool {
    let frame = match connection.read_frame().await {
        Ok(frame) => frame,
        Err(e) => {
            warn!(peer = %connection.peer_thumbprint(), "dispatcher read fault: {}", e);
            return false;
        }
    };

    let request = match frame {
        Frame::Request(r) => r,
        other => {
            warn!(peer = %connection.peer_thumbprint(), ?other, "expected a request frame");
            connection.mark_broken();
            return false;
        }
    };

    // Drain every attachment the request declared, in order, before
    // touching the registry: the handler needs the bytes to act on
    // (spec §3's `count_bytes`-style services), and leaving any
    // undrained would desync the next `read_frame` (codec.rs's
    // pending-attachment check).
    let mut request_streams = Vec::with_capacity(request.attached_stream_ids.len());
    for _ in 0..request.attached_stream_ids.len() {
        match connection.read_stream(|_| {}).await {
            Ok(attachment) => request_streams.push(attachment),
            Err(e) => {
                warn!(peer = %connection.peer_thumbprint(), "dispatcher stream read fault: {}", e);
                return false;
            }
        }
    }

    let response = handle(&request, &request_streams, registry);
    match connection.write_frame(&Frame::Response(response)).await {
        Ok(()) => true,
        Err(e) => {
            warn!(peer = %connection.peer_thumbprint(), "dispatcher write fault: {}", e);
            false
        }
    }
}

/// Runs `run_once` in a loop until it reports the Connection is no
/// longer usable.
pub async fn run_loop(connection: &mut Connection, registry: &ServiceRegistry) {
    while run_once(connection, registry).await {}
}

fn handle(request: &RequestFrame, request_streams: &[StreamAttachment], registry: &ServiceRegistry) -> ResponseFrame {
    let arguments = match request.arguments.as_array() {
        Some(args) => args.clone(),
        None => vec![request.arguments.clone()],
    };

    match registry.invoke(&request.service_name, &request.method_name, &arguments, request_streams) {
        Ok(Ok(result)) => {
            debug!(id = %request.id, "request dispatched successfully");
            ResponseFrame::success(request.id.clone(), result, Vec::new())
        }
        Ok(Err(user_message)) => ResponseFrame::error(
            request.id.clone(),
            ErrorDescriptor {
                kind: format!("{:?}", ErrorKind::ServiceInvocation),
                message: user_message,
                remote_stack_detail: None,
            },
        ),
        Err(e) => ResponseFrame::error(
            request.id.clone(),
            ErrorDescriptor {
                kind: format!("{:?}", e.kind()),
                message: e.to_string(),
                remote_stack_detail: None,
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ArgShape, Service};
    use serde_json::json;

    fn registry() -> ServiceRegistry {
        let mut registry = ServiceRegistry::new();
        registry.register(
            "Calculator",
            Service::new().method("add", vec![ArgShape::Integer, ArgShape::Integer], |args, _| {
                Ok(json!(args[0].as_i64().unwrap() + args[1].as_i64().unwrap()))
            }),
        );
        registry
    }

    #[test]
    fn handle_resolves_and_returns_success() {
        let request = RequestFrame::new("1", "Calculator", "add", json!([2, 3]), vec![]);
        let response = handle(&request, &[], &registry());
        match response.outcome {
            crate::frame::Outcome::Success(v) => assert_eq!(v, json!(5)),
            _ => panic!("expected success"),
        }
    }

    #[test]
    fn handle_missing_service_returns_service_not_found() {
        let request = RequestFrame::new("1", "Nope", "add", json!([]), vec![]);
        let response = handle(&request, &[], &registry());
        match response.outcome {
            crate::frame::Outcome::Error(desc) => assert_eq!(desc.kind, "ServiceNotFound"),
            _ => panic!("expected error"),
        }
    }
}

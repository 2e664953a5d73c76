//! The discriminated union of messages traded over a `Connection`.
//!
//! Grounded on the teacher's `communication::message::{Message,
//! SystemMessage}` shape (a tagged enum wrapping protocol-specific
//! payloads), generalized to the three frame kinds spec.md §3/§6 define:
//! `IdentityAnnounce`, `Request`, and `Response`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The wire protocol version this runtime speaks. spec.md §4.3: "If the
/// version token is unknown the Connection transitions to `Broken`."
pub const PROTOCOL_VERSION: u32 = 1;

/// The outermost tagged union written to the wire, one per `tagged_object_bytes`
/// payload (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Frame {
    IdentityAnnounce(IdentityAnnounce),
    Request(RequestFrame),
    Response(ResponseFrame),
}

/// Exchanged immediately after the TLS handshake completes (spec.md §4.3).
/// Listening-orientation connections have `subscription_id == None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityAnnounce {
    pub protocol_version: u32,
    pub subscription_id: Option<String>,
}

impl IdentityAnnounce {
    pub fn listening() -> Self {
        IdentityAnnounce { protocol_version: PROTOCOL_VERSION, subscription_id: None }
    }

    pub fn polling(subscription_id: impl Into<String>) -> Self {
        IdentityAnnounce {
            protocol_version: PROTOCOL_VERSION,
            subscription_id: Some(subscription_id.into()),
        }
    }

    pub fn is_known_version(&self) -> bool {
        self.protocol_version == PROTOCOL_VERSION
    }
}

/// `(id, service_name, method_name, arguments, attached_stream_ids)` per
/// spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestFrame {
    pub id: String,
    pub service_name: String,
    pub method_name: String,
    pub arguments: Value,
    pub attached_stream_ids: Vec<u32>,
}

impl RequestFrame {
    pub fn new(
        id: impl Into<String>,
        service_name: impl Into<String>,
        method_name: impl Into<String>,
        arguments: Value,
        attached_stream_ids: Vec<u32>,
    ) -> Self {
        RequestFrame {
            id: id.into(),
            service_name: service_name.into(),
            method_name: method_name.into(),
            arguments,
            attached_stream_ids,
        }
    }
}

/// `(id, result_or_error, attached_stream_ids)` per spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseFrame {
    pub id: String,
    pub outcome: Outcome,
    pub attached_stream_ids: Vec<u32>,
}

/// Exactly one of a success payload or an error descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Outcome {
    Success(Value),
    Error(ErrorDescriptor),
}

/// `(kind, message, remote_stack_detail?)` per spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDescriptor {
    pub kind: String,
    pub message: String,
    pub remote_stack_detail: Option<String>,
}

impl ResponseFrame {
    pub fn success(id: impl Into<String>, result: Value, attached_stream_ids: Vec<u32>) -> Self {
        ResponseFrame {
            id: id.into(),
            outcome: Outcome::Success(result),
            attached_stream_ids,
        }
    }

    pub fn error(id: impl Into<String>, descriptor: ErrorDescriptor) -> Self {
        ResponseFrame { id: id.into(), outcome: Outcome::Error(descriptor), attached_stream_ids: Vec::new() }
    }
}

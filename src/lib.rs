//! `haltether` is a secure, bidirectional RPC runtime for fleet
//! communication between a central hub and many remote nodes.
//!
//! Trust is established by X.509 thumbprint pinning rather than a PKI
//! chain, and the runtime supports two connection orientations with
//! identical application semantics: a **listening** party accepts
//! inbound TLS connections, and a **polling** party dials out and then
//! services calls in the reverse direction over that same socket, so a
//! hub can reach nodes sitting behind NATs without an inbound port.
//!
//! See [`runtime::Runtime`] for the entry point most applications use.

pub mod client;
pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod identity;
pub mod listener;
pub mod peek;
pub mod poll_queue;
pub mod poller;
pub mod pool;
pub mod registry;
pub mod rt;
pub mod runtime;
pub mod socket;
pub mod stream;
pub mod tls;
pub mod trust;

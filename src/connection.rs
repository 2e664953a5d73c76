//! A Secure Channel plus a Framing Codec, in a known role, with an
//! identity-handshake state and idle/busy lifecycle (spec.md §3/§4.3).

use std::time::Instant;

use tokio_rustls::TlsStream;
use tracing::{debug, warn};

use crate::codec::FramingCodec;
use crate::error::{Error, ErrorKind, Result};
use crate::frame::{Frame, IdentityAnnounce};
use crate::identity::Thumbprint;
use crate::peek::Peeked;
use crate::socket::Socket;
use crate::stream::StreamAttachment;
use crate::tls::SecureChannel;

/// Which side of the strictly-alternating request/response protocol
/// this Connection plays on this socket.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Role {
    /// Writes requests, reads responses.
    Caller,
    /// Reads requests, writes responses (spec.md §4.6).
    Callee,
}

/// spec.md §4.3 state machine. `Broken` is terminal: a Connection never
/// transitions out of it, it is destroyed.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectionState {
    Handshaking,
    Idle,
    Busy,
    Broken,
}

/// `(secure_channel, codec, role, peer_thumbprint, subscription_id?,
/// last_used_at, state)` per spec.md §3.
pub struct Connection {
    codec: FramingCodec<Peeked<TlsStream<Socket>>>,
    role: Role,
    peer_thumbprint: Thumbprint,
    subscription_id: Option<String>,
    last_used_at: Instant,
    state: ConnectionState,
}

impl Connection {
    /// Runs the post-TLS identity sub-handshake (spec.md §4.3): both
    /// sides write their own `IdentityAnnounce`, then read the peer's.
    /// Transitions to `Idle` on success, `Broken` on any fault
    /// (including an unknown protocol version).
    pub async fn establish(
        channel: SecureChannel,
        role: Role,
        local_announce: IdentityAnnounce,
    ) -> Result<Connection> {
        let mut codec = FramingCodec::new(channel.io);

        if let Err(e) = codec.write_frame(&Frame::IdentityAnnounce(local_announce)).await {
            warn!(peer = %channel.peer_thumbprint, "identity announce write failed: {}", e);
            return Err(e);
        }

        let peer_announce = match codec.read_frame().await {
            Ok(Frame::IdentityAnnounce(announce)) => announce,
            Ok(_) => {
                warn!(peer = %channel.peer_thumbprint, "expected identity announce, got another frame kind");
                return Err(Error::simple(ErrorKind::ProtocolViolation));
            }
            Err(e) => {
                warn!(peer = %channel.peer_thumbprint, "identity announce read failed: {}", e);
                return Err(e);
            }
        };

        if !peer_announce.is_known_version() {
            warn!(peer = %channel.peer_thumbprint, version = peer_announce.protocol_version, "unknown protocol version");
            return Err(Error::simple(ErrorKind::ProtocolViolation));
        }

        debug!(peer = %channel.peer_thumbprint, ?role, "connection established");
        Ok(Connection {
            codec,
            role,
            peer_thumbprint: channel.peer_thumbprint,
            subscription_id: peer_announce.subscription_id,
            last_used_at: Instant::now(),
            state: ConnectionState::Idle,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Flips the Connection's role after the fact. The Listener needs
    /// this for a polling-in socket: it is accepted, so `establish` is
    /// called with `Role::Callee`, but once the peer's announce reveals
    /// a `subscription_id` the hub plays `Caller` on it (spec.md §4.7).
    pub fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    pub fn peer_thumbprint(&self) -> &Thumbprint {
        &self.peer_thumbprint
    }

    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription_id.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    /// Marks the Connection `Idle` and stamps `last_used_at`. Per the
    /// Open Question resolved in SPEC_FULL.md/DESIGN.md, this happens on
    /// release, not acquire.
    pub fn mark_idle(&mut self) {
        self.state = ConnectionState::Idle;
        self.last_used_at = Instant::now();
    }

    pub fn mark_busy(&mut self) {
        self.state = ConnectionState::Busy;
    }

    pub fn mark_broken(&mut self) {
        self.state = ConnectionState::Broken;
    }

    pub fn is_broken(&self) -> bool {
        self.state == ConnectionState::Broken
    }

    /// Writes a frame and, if it declares attachments, the caller must
    /// follow up with `write_stream` for each one, in order.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        match self.codec.write_frame(frame).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.mark_broken();
                Err(e)
            }
        }
    }

    pub async fn write_stream(&mut self, attachment: &StreamAttachment, progress: impl FnMut(u8)) -> Result<()> {
        match self.codec.write_stream(&attachment.bytes, progress).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.mark_broken();
                Err(e)
            }
        }
    }

    pub async fn read_frame(&mut self) -> Result<Frame> {
        match self.codec.read_frame().await {
            Ok(frame) => Ok(frame),
            Err(e) => {
                self.mark_broken();
                Err(e)
            }
        }
    }

    pub async fn read_stream(&mut self, progress: impl FnMut(u8)) -> Result<StreamAttachment> {
        match self.codec.read_stream(progress).await {
            Ok((id, bytes)) => Ok(StreamAttachment::new(id, bytes)),
            Err(e) => {
                self.mark_broken();
                Err(e)
            }
        }
    }
}

//! Error related business logic of `haltether`.
//!
//! Contains the `ErrorKind` enum mirroring spec.md §7, as well as
//! extensions of the standard library's `Result` type to work with our
//! own `Error` type.

use std::error;
use std::fmt;
use std::io;
use std::result;

/// Extension of the standard library's `Result` type,
/// used to wrap its error in a `haltether::error::Error`.
pub trait ResultWrappedExt {
    type T;

    fn wrapped_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T>;
    fn wrapped(self, kind: ErrorKind) -> Result<Self::T>;
}

/// Extension of the standard library's `Result` type.
///
/// Different from `ResultWrappedExt`, this trait drops the underlying
/// error type, which is useful when that type isn't `Send`.
pub trait ResultSimpleExt {
    type T;

    fn simple(self, kind: ErrorKind) -> Result<Self::T>;
    fn simple_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T>;
}

impl<T, E> ResultWrappedExt for result::Result<T, E>
where
    E: Into<Box<dyn error::Error + Send + Sync>>,
{
    type T = T;

    fn wrapped(self, kind: ErrorKind) -> Result<Self::T> {
        self.map_err(|e| Error::wrapped(kind, e))
    }

    fn wrapped_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T> {
        self.map_err(|e| Error::wrapped(kind, format!("{}: {}", msg, e.into())))
    }
}

impl<T, E> ResultSimpleExt for result::Result<T, E> {
    type T = T;

    fn simple(self, kind: ErrorKind) -> Result<Self::T> {
        self.map_err(|_| Error::simple(kind))
    }

    fn simple_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T> {
        self.map_err(|_| Error::wrapped(kind, msg.to_owned()))
    }
}

/// Wrapper result type for `std::result::Result`.
pub type Result<T> = result::Result<T, Error>;

/// The error kinds surfaced to RPC callers, per spec.md §7.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Peer thumbprint not in trust set, or didn't match the endpoint's
    /// expected thumbprint.
    UntrustedPeer,
    /// TLS negotiation failure or handshake deadline expired.
    HandshakeFailed,
    /// Transport closed before a response was fully received.
    ConnectionClosed,
    /// Per-request deadline expired.
    Timeout,
    /// Registry has no handler for the requested service/method.
    ServiceNotFound,
    /// Multiple overloads matched a call equally well.
    AmbiguousMethod,
    /// The handler raised a user-level error.
    ServiceInvocation,
    /// Malformed frame, unread stream attachment, or unknown version.
    ProtocolViolation,
    /// A poll queue was at capacity.
    QueueFull,
    /// The runtime is shutting down.
    Shutdown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The error type used throughout this crate.
pub struct Error {
    inner: ErrorInner,
}

enum ErrorInner {
    Simple(ErrorKind),
    Wrapped(ErrorKind, Box<dyn error::Error + Send + Sync>),
    /// A `ServiceInvocation` error preserves the remote handler's message
    /// and an optional stack/trace detail verbatim, per spec.md §7.
    ServiceInvocation { message: String, detail: Option<String> },
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ErrorInner::Simple(k) => write!(f, "Simple({:?})", k),
            ErrorInner::Wrapped(k, e) => write!(f, "Wrapped({:?}, {})", k, e),
            ErrorInner::ServiceInvocation { message, detail } => {
                write!(f, "ServiceInvocation({:?}, {:?})", message, detail)
            }
        }
    }
}

impl Error {
    /// Returns an error not wrapping another error implementation,
    /// with kind `ErrorKind`.
    pub fn simple(kind: ErrorKind) -> Self {
        Error { inner: ErrorInner::Simple(kind) }
    }

    /// Wraps an arbitrary error in an `Error`, with kind `ErrorKind`.
    pub fn wrapped<E>(kind: ErrorKind, e: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Error { inner: ErrorInner::Wrapped(kind, e.into()) }
    }

    /// Builds a `ServiceInvocation` error carrying the handler's message
    /// and optional remote stack/trace detail.
    pub fn service_invocation(message: impl Into<String>, detail: Option<String>) -> Self {
        Error {
            inner: ErrorInner::ServiceInvocation { message: message.into(), detail },
        }
    }

    /// Returns a copy of the `ErrorKind` of this `Error`.
    pub fn kind(&self) -> ErrorKind {
        match &self.inner {
            ErrorInner::Simple(k) => *k,
            ErrorInner::Wrapped(k, _) => *k,
            ErrorInner::ServiceInvocation { .. } => ErrorKind::ServiceInvocation,
        }
    }

    /// The handler-provided message, for `ServiceInvocation` errors.
    pub fn message(&self) -> Option<&str> {
        match &self.inner {
            ErrorInner::ServiceInvocation { message, .. } => Some(message),
            _ => None,
        }
    }

    /// The remote stack/trace detail, for `ServiceInvocation` errors.
    pub fn detail(&self) -> Option<&str> {
        match &self.inner {
            ErrorInner::ServiceInvocation { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ErrorInner::Simple(k) => write!(f, "{}", k),
            ErrorInner::Wrapped(k, e) => write!(f, "{}: {}", k, e),
            ErrorInner::ServiceInvocation { message, .. } => {
                write!(f, "ServiceInvocation: {}", message)
            }
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::wrapped(ErrorKind::ConnectionClosed, e)
    }
}

impl error::Error for Error {}

//! A byte-stream wrapper that lets the Listener "un-read" bytes it
//! sniffed to tell an RPC frame apart from a stray HTTP request — both
//! pre-TLS (raw socket bytes) and post-TLS (decrypted bytes, for the
//! "client negotiated TLS but speaks HTTP/1.1" case in spec.md §6).

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::time::timeout;

/// Wraps `S`, replaying `prefix` before any bytes from `S` itself.
/// Constructing one with an empty prefix is a zero-cost passthrough.
pub struct Peeked<S> {
    inner: S,
    prefix: Vec<u8>,
    pos: usize,
}

impl<S> Peeked<S> {
    pub fn new(inner: S) -> Self {
        Peeked { inner, prefix: Vec::new(), pos: 0 }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> Peeked<S> {
    /// Reads up to `want` bytes (fewer if `deadline` elapses or the
    /// peer has written less so far) and stores them to be replayed by
    /// subsequent reads, leaving the stream logically untouched from
    /// the caller's perspective.
    pub async fn sniff(&mut self, want: usize, deadline: Duration) -> io::Result<&[u8]> {
        let mut buf = vec![0u8; want];
        let mut filled = 0;
        let _ = timeout(deadline, async {
            while filled < want {
                let mut read_buf = ReadBuf::new(&mut buf[filled..]);
                std::future::poll_fn(|cx| Pin::new(&mut self.inner).poll_read(cx, &mut read_buf)).await?;
                let n = read_buf.filled().len();
                if n == 0 {
                    break;
                }
                filled += n;
            }
            Ok::<_, io::Error>(())
        })
        .await;

        buf.truncate(filled);
        self.prefix = buf;
        self.pos = 0;
        Ok(&self.prefix[..])
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Peeked<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pos < self.prefix.len() {
            let remaining = self.prefix.len() - self.pos;
            let n = remaining.min(buf.remaining());
            let start = self.pos;
            buf.put_slice(&self.prefix[start..start + n]);
            self.pos += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Peeked<S> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Closes `io` promptly; used for the "plaintext HTTP on a TLS port"
/// fast-close path (spec.md §6), where we don't want to wait on the
/// caller's own shutdown sequencing.
pub async fn close_fast<S: AsyncWrite + Unpin>(mut io: S) {
    let _ = io.shutdown().await;
}

/// Returns `true` if `bytes` looks like the start of an HTTP/1.x
/// request line.
pub fn looks_like_http(bytes: &[u8]) -> bool {
    const METHODS: &[&[u8]] = &[b"GET ", b"POST ", b"PUT ", b"HEAD ", b"DELETE ", b"OPTIONS ", b"PATCH "];
    METHODS.iter().any(|m| bytes.starts_with(m))
}

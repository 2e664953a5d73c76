//! Stream attachments and the progress-reporting sidechannel.
//!
//! Grounded on spec.md §4.1 ("Progress reporting...") and the Design
//! Notes in §9: "Progress callbacks are a push contract; prefer a
//! bounded-capacity sink to a direct callback so slow consumers cannot
//! stall the sender."

use tokio::sync::mpsc;

/// A binary stream attachment fully materialized in memory: `(id,
/// length_in_bytes, byte_content)` per spec.md §3. The codec only ever
/// deals in raw bytes; this is the type higher layers (dispatcher,
/// client proxy) pass around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAttachment {
    pub id: u32,
    pub bytes: Vec<u8>,
}

impl StreamAttachment {
    pub fn new(id: u32, bytes: Vec<u8>) -> Self {
        StreamAttachment { id, bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// The sending half of a bounded progress channel. `report` never
/// blocks the sender: a full channel (an inattentive consumer) simply
/// drops the update, since percentages are idempotent to re-derive and
/// the final `100` matters far more than every intermediate tick.
#[derive(Clone)]
pub struct ProgressSink {
    tx: mpsc::Sender<u8>,
}

/// The receiving half, handed to whoever wants to observe progress
/// (a UI, a test assertion, a metrics counter).
pub struct ProgressStream {
    rx: mpsc::Receiver<u8>,
}

/// Default bound: generous enough that a consumer polling once per
/// event loop tick won't see drops in practice, small enough that a
/// vanished consumer can't accumulate unbounded memory.
const DEFAULT_CAPACITY: usize = 64;

pub fn progress_channel() -> (ProgressSink, ProgressStream) {
    let (tx, rx) = mpsc::channel(DEFAULT_CAPACITY);
    (ProgressSink { tx }, ProgressStream { rx })
}

impl ProgressSink {
    /// Returns a closure suitable for passing to
    /// `FramingCodec::{write_stream, read_stream}` as the progress
    /// callback.
    pub fn callback(&self) -> impl FnMut(u8) + '_ {
        move |percent: u8| {
            let _ = self.tx.try_send(percent);
        }
    }
}

impl ProgressStream {
    /// Awaits the next percentage update, or `None` once the sink side
    /// has been dropped (transfer complete or aborted).
    pub async fn recv(&mut self) -> Option<u8> {
        self.rx.recv().await
    }
}

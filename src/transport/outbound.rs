//! Best-effort outbound audio queue
//!
//! The capture callback must never block on the network. Chunks go into a
//! bounded channel; when it is full or the transport is gone the chunk is
//! dropped and counted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::voice::EncodedChunk;

/// Result of a non-blocking submit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Chunk is waiting for the transport writer
    Queued,
    /// Queue was full; chunk discarded
    DroppedFull,
    /// Transport writer is gone; chunk discarded
    DroppedClosed,
}

/// Sending half of the outbound queue
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::Sender<EncodedChunk>,
    dropped: Arc<AtomicU64>,
}

/// Create an outbound queue holding at most `capacity` chunks
#[must_use]
pub fn outbound_queue(capacity: usize) -> (OutboundQueue, mpsc::Receiver<EncodedChunk>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let queue = OutboundQueue {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (queue, rx)
}

impl OutboundQueue {
    /// Enqueue a chunk without waiting
    pub fn submit(&self, chunk: EncodedChunk) -> SubmitOutcome {
        let outcome = match self.tx.try_send(chunk) {
            Ok(()) => return SubmitOutcome::Queued,
            Err(TrySendError::Full(_)) => SubmitOutcome::DroppedFull,
            Err(TrySendError::Closed(_)) => SubmitOutcome::DroppedClosed,
        };

        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(?outcome, dropped, "outbound audio chunk dropped");
        outcome
    }

    /// Number of chunks dropped so far
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the receiving side has gone away
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

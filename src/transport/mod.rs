//! Duplex channel to the live conversational audio service
//!
//! The voice session only sees this module's types: a [`Connector`] opens a
//! [`TransportHandle`], outbound audio goes through its best-effort queue, and
//! everything the service says comes back as a [`TransportEvent`].

pub mod live;
mod outbound;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

pub use live::LiveConnector;
pub use outbound::{OutboundQueue, SubmitOutcome, outbound_queue};

use crate::Result;

/// Capacity of the inbound event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Parameters sent when the session is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetup {
    /// Model identifier on the live service
    pub model: String,
    /// Prebuilt voice used for synthesized speech
    pub voice: String,
    /// MIME descriptor of outbound audio
    pub input_mime_type: String,
    /// MIME descriptor requested for inbound audio
    pub output_mime_type: String,
    /// Persona instructions plus user context
    pub system_instruction: String,
}

/// A message from the service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerMessage {
    /// Base64 PCM16 speech at the inbound rate
    pub audio_data: Option<String>,
    /// The user started speaking over playback
    pub interrupted: bool,
}

/// Something the transport reports to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Channel is ready for realtime input
    Open,
    /// Audio and/or control flags from the service
    Message(ServerMessage),
    /// Channel failed
    Error(String),
    /// Remote side closed the channel
    Close,
}

/// Opens live sessions
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a session configured by `setup`
    async fn connect(&self, setup: &SessionSetup) -> Result<TransportHandle>;
}

/// An open session channel
///
/// Closing is idempotent and also happens on drop.
#[derive(Debug)]
pub struct TransportHandle {
    outbound: OutboundQueue,
    events: mpsc::Receiver<TransportEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    tasks: Vec<AbortHandle>,
    closed: bool,
}

impl TransportHandle {
    /// Wrap an outbound queue and an event receiver
    #[must_use]
    pub const fn new(outbound: OutboundQueue, events: mpsc::Receiver<TransportEvent>) -> Self {
        Self {
            outbound,
            events,
            shutdown: None,
            tasks: Vec::new(),
            closed: false,
        }
    }

    /// Signal sent to the writer when the handle closes
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: oneshot::Sender<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Background task aborted when the handle closes
    #[must_use]
    pub fn with_task(mut self, task: AbortHandle) -> Self {
        self.tasks.push(task);
        self
    }

    /// Sender for realtime input
    #[must_use]
    pub fn outbound(&self) -> OutboundQueue {
        self.outbound.clone()
    }

    /// Wait for the next event; `None` once the channel is gone
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        if self.closed {
            return None;
        }
        self.events.recv().await
    }

    /// Whether [`close`](Self::close) has run
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close the channel and stop its background tasks
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.events.close();

        tracing::debug!(dropped_chunks = self.outbound.dropped(), "transport closed");
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.close();
    }
}

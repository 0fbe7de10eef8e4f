//! Sapling Voice - realtime voice pipeline for the Sapling focus companion
//!
//! This library streams microphone audio to a live conversational audio
//! service and plays its synthesized speech back without gaps:
//! - Capture, resampling and PCM16 encoding of microphone input
//! - Gapless playback scheduling with barge-in handling
//! - Session lifecycle binding devices to the transport
//! - Persona context and a text chat collaborator
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  EncodedChunk   ┌──────────────┐   realtimeInput   ┌─────────┐
//! │ AudioCapture ├────────────────▶│              ├──────────────────▶│         │
//! └──────────────┘ (drop-on-full)  │   Session    │                   │  Live   │
//! ┌──────────────┐ PlaybackFragment│  Lifecycle   │   serverContent   │ service │
//! │  Scheduler   │◀────────────────┤              │◀──────────────────┤         │
//! └──────────────┘                 └──────────────┘                   └─────────┘
//! ```

pub mod chat;
pub mod config;
pub mod error;
pub mod prompt;
pub mod session;
pub mod transport;
pub mod voice;

pub use chat::{ChatMessage, Conversation, GenerateContentClient, TextCompletion};
pub use config::Config;
pub use error::{Error, Result};
pub use prompt::{ContextSnapshot, FocusTarget, UserState};
pub use session::{
    AudioIo, CpalAudio, SessionLifecycle, SessionOptions, SessionState, SessionStats, StopHandle,
};
pub use transport::{Connector, LiveConnector, TransportEvent, TransportHandle};

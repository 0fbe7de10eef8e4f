//! Live voice session lifecycle
//!
//! One [`SessionLifecycle`] owns everything a conversation needs: the output
//! device and its playback scheduler, the microphone, and the transport
//! handle. Transport events, user stop requests and device callbacks all
//! funnel through it, and every path out of a session ends in the same
//! idempotent teardown.
//!
//! ```text
//!  Idle ──start──▶ Connecting ──open──▶ Active ──stop──▶ Closing ─┐
//!                      │                  │ │                      │
//!                      └──failure──▶ Failed ◀─error   close──▶ Closed
//!                                       │                          │
//!                                       └────────teardown──────────┴──▶ Idle
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

use crate::config::Config;
use crate::prompt::ContextSnapshot;
use crate::transport::{Connector, ServerMessage, SessionSetup, TransportEvent, TransportHandle};
use crate::voice::{
    AudioCapture, AudioPlayback, CaptureDevice, CapturePipeline, DEFAULT_BLOCK_SIZE,
    INPUT_MIME_TYPE, OUTPUT_MIME_TYPE, OUTPUT_SAMPLE_RATE, OutputSink, PlaybackFragment,
    PlaybackScheduler,
};
use crate::Result;

/// Where a session is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session
    Idle,
    /// Devices acquired, waiting for the transport to open
    Connecting,
    /// Streaming in both directions
    Active,
    /// User asked to stop
    Closing,
    /// Remote side ended the session
    Closed,
    /// Something fatal happened
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Opens the audio devices a session needs
pub trait AudioIo {
    /// Microphone type
    type Input: CaptureDevice;
    /// Speaker type
    type Output: OutputSink;

    /// Acquire the output device at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the device is unavailable
    fn open_output(&self, sample_rate: u32) -> Result<Self::Output>;

    /// Acquire the input device
    ///
    /// # Errors
    ///
    /// Returns error if the device is unavailable or permission is denied
    fn open_input(&self) -> Result<Self::Input>;
}

/// The default cpal host devices
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalAudio;

impl AudioIo for CpalAudio {
    type Input = AudioCapture;
    type Output = AudioPlayback;

    fn open_output(&self, sample_rate: u32) -> Result<AudioPlayback> {
        AudioPlayback::new(sample_rate)
    }

    fn open_input(&self) -> Result<AudioCapture> {
        AudioCapture::new()
    }
}

/// Per-session settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Live model identifier
    pub model: String,
    /// Prebuilt voice name
    pub voice: String,
    /// Native-rate samples per capture frame
    pub block_size: usize,
}

impl SessionOptions {
    /// Settings taken from the loaded configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.live.model.clone(),
            voice: config.live.voice.clone(),
            block_size: config.audio.block_size,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            model: crate::config::DEFAULT_LIVE_MODEL.to_string(),
            voice: crate::config::DEFAULT_VOICE.to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Requests a stop from another task
///
/// Cheap to clone. A stop that arrives while the session is suspended is
/// observed by the session's next liveness check.
#[derive(Debug, Clone)]
pub struct StopHandle {
    epoch: Arc<watch::Sender<u64>>,
}

impl StopHandle {
    /// Ask the session to stop
    pub fn stop(&self) {
        self.epoch.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
    }
}

/// Counters for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Fragments handed to the output device
    pub fragments_scheduled: u64,
    /// Fragments skipped because they failed to decode
    pub decode_failures: u64,
    /// Fragments discarded because the session stopped mid-flight
    pub stale_fragments: u64,
    /// Barge-in resets
    pub interruptions: u64,
}

/// Owns one live voice session at a time
pub struct SessionLifecycle<C, A: AudioIo> {
    id: Uuid,
    connector: C,
    audio: A,
    options: SessionOptions,
    state: SessionState,
    transport: Option<TransportHandle>,
    input: Option<A::Input>,
    scheduler: Option<PlaybackScheduler<A::Output>>,
    stop_tx: Arc<watch::Sender<u64>>,
    stop_rx: watch::Receiver<u64>,
    voice_active: watch::Sender<bool>,
    stats: SessionStats,
}

impl<C: Connector, A: AudioIo> SessionLifecycle<C, A> {
    /// Create an idle lifecycle
    #[must_use]
    pub fn new(connector: C, audio: A, options: SessionOptions) -> Self {
        let (stop_tx, stop_rx) = watch::channel(0);
        let (voice_active, _) = watch::channel(false);
        Self {
            id: Uuid::nil(),
            connector,
            audio,
            options,
            state: SessionState::Idle,
            transport: None,
            input: None,
            scheduler: None,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
            voice_active,
            stats: SessionStats::default(),
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Identifier of the current or last session
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Counters of the current or last session
    #[must_use]
    pub const fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Handle for stopping the session from elsewhere
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            epoch: Arc::clone(&self.stop_tx),
        }
    }

    /// Watch the observable "voice active" flag
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.voice_active.subscribe()
    }

    /// Whether voice is active from the user's point of view
    #[must_use]
    pub fn is_voice_active(&self) -> bool {
        *self.voice_active.borrow()
    }

    /// Active and no stop requested since the session started
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active && !self.stop_rx.has_changed().unwrap_or(true)
    }

    /// Connecting or active
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self.state, SessionState::Connecting | SessionState::Active)
    }

    /// Next free playback start time, `0.0` when unset
    #[must_use]
    pub fn cursor(&self) -> f64 {
        self.scheduler.as_ref().map_or(0.0, PlaybackScheduler::cursor)
    }

    /// The output device of the running session
    #[must_use]
    pub fn output(&self) -> Option<&A::Output> {
        self.scheduler.as_ref().map(PlaybackScheduler::output)
    }

    /// Acquire devices and open the transport
    ///
    /// Does nothing unless idle. Returns once the transport handshake has
    /// finished; capture begins when the transport reports it is open.
    ///
    /// # Errors
    ///
    /// Returns error if a device or the transport could not be opened. The
    /// lifecycle is back to idle when this returns.
    pub async fn start(&mut self, context: &ContextSnapshot) -> Result<()> {
        if self.state != SessionState::Idle {
            tracing::debug!(session = %self.id, state = %self.state, "start ignored");
            return Ok(());
        }

        self.stop_rx.borrow_and_update();
        self.id = Uuid::new_v4();
        self.stats = SessionStats::default();
        self.voice_active.send_replace(true);
        self.transition(SessionState::Connecting);

        match self.open(context).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::info!(session = %self.id, "stopped while connecting");
                self.transition(SessionState::Closing);
                self.teardown();
                Ok(())
            }
            Err(e) => {
                tracing::error!(session = %self.id, error = %e, "voice session failed to start");
                self.transition(SessionState::Failed);
                self.teardown();
                Err(e)
            }
        }
    }

    /// Open devices then the transport; `false` if a stop won the race
    async fn open(&mut self, context: &ContextSnapshot) -> Result<bool> {
        let output = self.audio.open_output(OUTPUT_SAMPLE_RATE)?;
        self.scheduler = Some(PlaybackScheduler::new(output));
        self.input = Some(self.audio.open_input()?);

        let setup = SessionSetup {
            model: self.options.model.clone(),
            voice: self.options.voice.clone(),
            input_mime_type: INPUT_MIME_TYPE.to_string(),
            output_mime_type: OUTPUT_MIME_TYPE.to_string(),
            system_instruction: context.system_instruction(),
        };

        let stop_rx = &mut self.stop_rx;
        let transport = tokio::select! {
            result = self.connector.connect(&setup) => result?,
            _ = stop_rx.changed() => return Ok(false),
        };

        self.transport = Some(transport);
        Ok(true)
    }

    /// Drive the session until it returns to idle
    ///
    /// Returns immediately when no session is running.
    pub async fn run(&mut self) {
        while self.is_running() {
            let Some(transport) = self.transport.as_mut() else {
                break;
            };
            let stop_rx = &mut self.stop_rx;

            let next = tokio::select! {
                biased;
                _ = stop_rx.changed() => None,
                event = transport.next_event() => Some(event),
            };

            match next {
                None => self.stop(),
                // A vanished event channel is a close we were never told about
                Some(event) => {
                    self.handle_event(event.unwrap_or(TransportEvent::Close))
                        .await;
                }
            }
        }
    }

    /// React to one transport event
    pub async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Message(message) => self.on_message(message).await,
            TransportEvent::Error(reason) => {
                if matches!(self.state, SessionState::Connecting | SessionState::Active) {
                    tracing::warn!(session = %self.id, %reason, "transport error");
                    self.transition(SessionState::Failed);
                    self.teardown();
                }
            }
            TransportEvent::Close => match self.state {
                SessionState::Connecting => {
                    tracing::warn!(session = %self.id, "transport closed before opening");
                    self.transition(SessionState::Failed);
                    self.teardown();
                }
                SessionState::Active => {
                    self.transition(SessionState::Closed);
                    self.teardown();
                }
                _ => {}
            },
        }
    }

    fn on_open(&mut self) {
        if self.state != SessionState::Connecting || self.stop_rx.has_changed().unwrap_or(true) {
            tracing::debug!(session = %self.id, state = %self.state, "stale open ignored");
            return;
        }

        let (Some(input), Some(transport)) = (self.input.as_mut(), self.transport.as_ref()) else {
            return;
        };

        let pipeline =
            CapturePipeline::new(input.sample_rate(), self.options.block_size, transport.outbound());
        let input_rate = input.sample_rate();

        if let Err(e) = input.start(pipeline.into_callback()) {
            tracing::error!(session = %self.id, error = %e, "microphone failed to start");
            self.transition(SessionState::Failed);
            self.teardown();
            return;
        }

        tracing::debug!(session = %self.id, input_rate, "capture streaming");
        self.transition(SessionState::Active);
    }

    async fn on_message(&mut self, message: ServerMessage) {
        if !self.is_active() {
            tracing::trace!(session = %self.id, state = %self.state, "message after stop ignored");
            return;
        }

        if let Some(data) = message.audio_data.as_deref() {
            self.play(data).await;
        }

        if message.interrupted
            && self.is_active()
            && let Some(scheduler) = self.scheduler.as_mut()
        {
            scheduler.interrupt();
            self.stats.interruptions += 1;
        }
    }

    /// Decode and schedule one fragment
    async fn play(&mut self, data: &str) {
        let fragment = match PlaybackFragment::from_transport_text(data) {
            Ok(fragment) => fragment,
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "undecodable audio fragment skipped");
                self.stats.decode_failures += 1;
                return;
            }
        };

        let Some(scheduler) = self.scheduler.as_mut() else {
            return;
        };
        if let Err(e) = scheduler.ensure_running().await {
            tracing::warn!(session = %self.id, error = %e, "output resume failed, fragment skipped");
            return;
        }

        // Stop may have landed while the device was resuming
        if !self.is_active() {
            self.stats.stale_fragments += 1;
            return;
        }

        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.schedule(fragment);
            self.stats.fragments_scheduled += 1;
        }
    }

    /// End the session from any state
    ///
    /// Safe to call repeatedly and before [`start`](Self::start).
    pub fn stop(&mut self) {
        if self.state != SessionState::Idle {
            self.transition(SessionState::Closing);
        }
        self.teardown();
    }

    /// Release everything and return to idle
    fn teardown(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        if let Some(mut input) = self.input.take() {
            input.stop();
        }
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.close();
        }

        if self.state != SessionState::Idle {
            tracing::info!(
                session = %self.id,
                fragments = self.stats.fragments_scheduled,
                decode_failures = self.stats.decode_failures,
                interruptions = self.stats.interruptions,
                "voice session ended"
            );
            self.transition(SessionState::Idle);
        }
        self.voice_active.send_replace(false);
    }

    fn transition(&mut self, to: SessionState) {
        tracing::debug!(session = %self.id, from = %self.state, %to, "session state");
        self.state = to;
    }
}

impl<C, A: AudioIo> Drop for SessionLifecycle<C, A> {
    fn drop(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        if let Some(mut input) = self.input.take() {
            input.stop();
        }
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.close();
        }
    }
}

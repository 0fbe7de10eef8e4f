//! Shared test utilities
//!
//! Hardware-free stand-ins for the microphone, the speaker and the live
//! service, so session behavior can be driven deterministically.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use sapling_voice::transport::{
    Connector, EVENT_CHANNEL_CAPACITY, SessionSetup, TransportEvent, TransportHandle,
    outbound_queue,
};
use sapling_voice::voice::{
    CaptureDevice, EncodedChunk, OutputSink, SampleCallback, pcm16_to_bytes, quantize,
    to_transport_text,
};
use sapling_voice::{AudioIo, Error, Result, StopHandle};

/// Base64 PCM16 payload of `seconds` of a constant level at 24 kHz
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn speech(seconds: f64) -> String {
    let len = (seconds * 24000.0).round() as usize;
    to_transport_text(&pcm16_to_bytes(&quantize(&vec![0.2; len])))
}

/// What the fake microphone has been through
#[derive(Default)]
pub struct CaptureState {
    pub callback: Option<SampleCallback>,
    pub starts: usize,
    pub stops: usize,
}

/// What the fake speaker has been through
#[derive(Debug, Default)]
pub struct OutputState {
    pub now: f64,
    pub suspended: bool,
    pub resumes: usize,
    pub scheduled: Vec<(f64, usize)>,
    pub closes: usize,
    /// Stop requested from inside `resume`, as if it raced the await
    pub stop_on_resume: Option<StopHandle>,
}

/// Fake microphone sharing its state with the test
pub struct FakeCapture {
    rate: u32,
    state: Arc<Mutex<CaptureState>>,
}

impl CaptureDevice for FakeCapture {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn start(&mut self, on_samples: SampleCallback) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.callback = Some(on_samples);
        state.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.callback = None;
        state.stops += 1;
    }

    fn is_capturing(&self) -> bool {
        self.state.lock().unwrap().callback.is_some()
    }
}

/// Fake speaker with a test-controlled clock
pub struct FakeOutput {
    state: Arc<Mutex<OutputState>>,
}

#[async_trait(?Send)]
impl OutputSink for FakeOutput {
    fn sample_rate(&self) -> u32 {
        24000
    }

    fn current_time(&self) -> f64 {
        self.state.lock().unwrap().now
    }

    fn is_suspended(&self) -> bool {
        self.state.lock().unwrap().suspended
    }

    async fn resume(&mut self) -> Result<()> {
        let stop = {
            let mut state = self.state.lock().unwrap();
            state.suspended = false;
            state.resumes += 1;
            state.stop_on_resume.take()
        };
        if let Some(stop) = stop {
            stop.stop();
        }
        tokio::task::yield_now().await;
        Ok(())
    }

    fn schedule(&mut self, samples: Vec<f32>, start: f64) {
        self.state.lock().unwrap().scheduled.push((start, samples.len()));
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closes += 1;
    }
}

/// Device factory handing out fakes
#[derive(Clone)]
pub struct FakeAudio {
    pub input_rate: u32,
    pub input: Arc<Mutex<CaptureState>>,
    pub output: Arc<Mutex<OutputState>>,
    pub fail_input: bool,
}

impl FakeAudio {
    #[must_use]
    pub fn new(input_rate: u32) -> Self {
        Self {
            input_rate,
            input: Arc::default(),
            output: Arc::default(),
            fail_input: false,
        }
    }

    /// Deliver samples as the device callback would
    pub fn feed(&self, samples: &[f32]) {
        if let Some(callback) = self.input.lock().unwrap().callback.as_mut() {
            callback(samples);
        }
    }

    pub fn set_now(&self, now: f64) {
        self.output.lock().unwrap().now = now;
    }

    #[must_use]
    pub fn scheduled(&self) -> Vec<(f64, usize)> {
        self.output.lock().unwrap().scheduled.clone()
    }
}

impl AudioIo for FakeAudio {
    type Input = FakeCapture;
    type Output = FakeOutput;

    fn open_output(&self, _sample_rate: u32) -> Result<FakeOutput> {
        Ok(FakeOutput {
            state: Arc::clone(&self.output),
        })
    }

    fn open_input(&self) -> Result<FakeCapture> {
        if self.fail_input {
            return Err(Error::Audio("permission denied".to_string()));
        }
        Ok(FakeCapture {
            rate: self.input_rate,
            state: Arc::clone(&self.input),
        })
    }
}

/// The service side of a fake transport
pub struct Remote {
    pub events: mpsc::Sender<TransportEvent>,
    pub audio: mpsc::Receiver<EncodedChunk>,
}

/// How the fake connector answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    Accept,
    Refuse,
    Hang,
}

/// Connector handing out one pre-built transport
pub struct FakeConnector {
    mode: ConnectMode,
    handle: Mutex<Option<TransportHandle>>,
    pub setups: Arc<Mutex<Vec<SessionSetup>>>,
}

impl FakeConnector {
    /// A connector and the remote end of its transport
    #[must_use]
    pub fn new(mode: ConnectMode) -> (Self, Remote) {
        let (queue, audio) = outbound_queue(8);
        let (events, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let connector = Self {
            mode,
            handle: Mutex::new(Some(TransportHandle::new(queue, event_rx))),
            setups: Arc::default(),
        };
        (connector, Remote { events, audio })
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, setup: &SessionSetup) -> Result<TransportHandle> {
        self.setups.lock().unwrap().push(setup.clone());
        match self.mode {
            ConnectMode::Accept => self
                .handle
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| Error::Transport("already connected".to_string())),
            ConnectMode::Refuse => Err(Error::Transport("connection refused".to_string())),
            ConnectMode::Hang => std::future::pending().await,
        }
    }
}

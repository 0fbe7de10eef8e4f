//! Audio playback to speakers
//!
//! Speech arrives as a stream of short fragments. The [`PlaybackScheduler`]
//! lines them up back to back on the output device's clock so consecutive
//! fragments neither overlap nor leave silence between them, as long as they
//! arrive before their slot.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use super::codec::PlaybackFragment;
use crate::{Error, Result};

/// An output device with a monotonic clock
#[async_trait(?Send)]
pub trait OutputSink {
    /// Sample rate buffers are played at
    fn sample_rate(&self) -> u32;

    /// Current device time in seconds
    fn current_time(&self) -> f64;

    /// Whether the device clock is paused
    fn is_suspended(&self) -> bool;

    /// Restart a suspended device and wait until it runs
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be restarted
    async fn resume(&mut self) -> Result<()>;

    /// Play `samples` starting at device time `start`
    fn schedule(&mut self, samples: Vec<f32>, start: f64);

    /// Stop output and release the device
    ///
    /// Safe to call repeatedly.
    fn close(&mut self);
}

/// When and how long a fragment will play
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledFragment {
    /// Device time playback begins
    pub start: f64,
    /// Length in seconds
    pub duration: f64,
}

/// Schedules fragments for gapless, in-order playback
#[derive(Debug)]
pub struct PlaybackScheduler<O> {
    output: O,
    /// Next free start time; `0.0` means unset
    cursor: f64,
}

impl<O: OutputSink> PlaybackScheduler<O> {
    /// Create a scheduler driving `output`
    pub const fn new(output: O) -> Self {
        Self {
            output,
            cursor: 0.0,
        }
    }

    /// Resume the device if it is suspended
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be resumed
    pub async fn ensure_running(&mut self) -> Result<()> {
        if self.output.is_suspended() {
            tracing::debug!("resuming suspended output device");
            self.output.resume().await?;
        }
        Ok(())
    }

    /// Place `fragment` right after everything already scheduled
    ///
    /// Never schedules in the past: if the cursor has fallen behind the
    /// device clock the fragment starts now and the gap is accepted.
    pub fn schedule(&mut self, fragment: PlaybackFragment) -> ScheduledFragment {
        let now = self.output.current_time();
        self.cursor = self.cursor.max(now);

        let scheduled = ScheduledFragment {
            start: self.cursor,
            duration: fragment.duration(),
        };

        tracing::trace!(
            start = scheduled.start,
            duration = scheduled.duration,
            lead = scheduled.start - now,
            "fragment scheduled"
        );

        self.output.schedule(fragment.samples, scheduled.start);
        self.cursor += scheduled.duration;
        scheduled
    }

    /// Resume if needed, then schedule
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be resumed
    pub async fn enqueue(&mut self, fragment: PlaybackFragment) -> Result<ScheduledFragment> {
        self.ensure_running().await?;
        Ok(self.schedule(fragment))
    }

    /// Drop scheduling continuity after a barge-in
    ///
    /// The next fragment starts at the device's current time. Buffers
    /// already handed to the device are left alone.
    pub fn interrupt(&mut self) {
        tracing::debug!(cursor = self.cursor, "playback interrupted");
        self.cursor = 0.0;
    }

    /// Next free start time, `0.0` when unset
    #[must_use]
    pub const fn cursor(&self) -> f64 {
        self.cursor
    }

    /// The underlying output
    #[must_use]
    pub const fn output(&self) -> &O {
        &self.output
    }

    /// Close the output and forget the cursor
    pub fn close(&mut self) {
        self.cursor = 0.0;
        self.output.close();
    }
}

/// A buffer waiting on the device timeline
#[derive(Debug)]
struct Segment {
    start_frame: u64,
    samples: Vec<f32>,
}

/// Shared between the scheduler side and the device callback
#[derive(Debug, Default)]
struct Timeline {
    rendered_frames: u64,
    segments: VecDeque<Segment>,
}

impl Timeline {
    /// Insert keeping segments ordered by start
    fn insert(&mut self, segment: Segment) {
        let index = self
            .segments
            .iter()
            .position(|s| s.start_frame > segment.start_frame)
            .unwrap_or(self.segments.len());
        self.segments.insert(index, segment);
    }

    /// Mix everything due into `out`, one sample per frame, and advance
    #[allow(clippy::cast_possible_truncation)]
    fn render(&mut self, frames: usize, mut write: impl FnMut(usize, f32)) {
        let base = self.rendered_frames;
        for i in 0..frames {
            let frame = base + i as u64;
            let mut value = 0.0f32;
            for segment in &self.segments {
                if segment.start_frame > frame {
                    break;
                }
                let offset = (frame - segment.start_frame) as usize;
                if let Some(sample) = segment.samples.get(offset) {
                    value += sample;
                }
            }
            write(i, value.clamp(-1.0, 1.0));
        }

        self.rendered_frames = base + frames as u64;
        let now = self.rendered_frames;
        self.segments
            .retain(|s| s.start_frame + s.samples.len() as u64 > now);
    }
}

/// Plays scheduled buffers on the default output device
///
/// Device time is derived from the number of frames the device has
/// consumed, so it stands still while the stream is paused.
pub struct AudioPlayback {
    config: StreamConfig,
    timeline: Arc<Mutex<Timeline>>,
    stream: Option<Stream>,
    suspended: bool,
}

impl AudioPlayback {
    /// Open the default output device at `sample_rate`
    ///
    /// The stream starts suspended; the first [`OutputSink::resume`] starts
    /// the clock.
    ///
    /// # Errors
    ///
    /// Returns error if the audio device cannot be opened
    pub fn new(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(sample_rate)
                        && c.max_sample_rate() >= SampleRate(sample_rate)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(sample_rate))
            .config();

        let timeline = Arc::new(Mutex::new(Timeline::default()));
        let callback_timeline = Arc::clone(&timeline);
        let channels = usize::from(config.channels);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut timeline = callback_timeline
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    let frames = data.len() / channels;
                    timeline.render(frames, |i, value| {
                        for out in &mut data[i * channels..(i + 1) * channels] {
                            *out = value;
                        }
                    });
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        // Some backends start streams immediately; hold the clock until resume
        let _ = stream.pause();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            config,
            timeline,
            stream: Some(stream),
            suspended: true,
        })
    }

    /// Whether any scheduled audio is still waiting to be played
    #[must_use]
    pub fn is_draining(&self) -> bool {
        !self
            .timeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .segments
            .is_empty()
    }
}

#[async_trait(?Send)]
impl OutputSink for AudioPlayback {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    #[allow(clippy::cast_precision_loss)]
    fn current_time(&self) -> f64 {
        let frames = self
            .timeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rendered_frames;
        frames as f64 / f64::from(self.sample_rate())
    }

    fn is_suspended(&self) -> bool {
        self.suspended
    }

    async fn resume(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| Error::Audio("output device is closed".to_string()))?;
        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.suspended = false;
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn schedule(&mut self, samples: Vec<f32>, start: f64) {
        if samples.is_empty() || self.stream.is_none() {
            return;
        }
        let start_frame = (start * f64::from(self.sample_rate())).round().max(0.0) as u64;
        self.timeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Segment {
                start_frame,
                samples,
            });
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            self.timeline
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .segments
                .clear();
            self.suspended = true;
            tracing::debug!("audio playback closed");
        }
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.close();
    }
}

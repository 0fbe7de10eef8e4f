//! Audio capture from microphone
//!
//! The device delivers buffers of arbitrary size at its native rate. The
//! [`CapturePipeline`] cuts them into fixed-size frames, downsamples each frame
//! to 16 kHz, quantizes it and pushes it onto the outbound queue without ever
//! waiting on the network.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};

use super::codec::{EncodedChunk, INPUT_SAMPLE_RATE, quantize};
use super::resample::resample;
use crate::transport::{OutboundQueue, SubmitOutcome};
use crate::{Error, Result};

/// Default number of native-rate samples per frame
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Callback receiving mono samples at the device's native rate
pub type SampleCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// A block of samples straight from the capture device
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Interleaved samples
    pub samples: Vec<f32>,
    /// Native sample rate
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
}

/// A microphone that can feed a [`SampleCallback`]
pub trait CaptureDevice {
    /// Native sample rate of delivered samples
    fn sample_rate(&self) -> u32;

    /// Begin delivering samples
    ///
    /// # Errors
    ///
    /// Returns error if the input stream cannot be started
    fn start(&mut self, on_samples: SampleCallback) -> Result<()>;

    /// Stop delivering samples and release the stream
    ///
    /// Safe to call repeatedly and before [`start`](Self::start).
    fn stop(&mut self);

    /// Whether samples are currently being delivered
    fn is_capturing(&self) -> bool;
}

/// Cuts a continuous sample stream into fixed-size blocks
#[derive(Debug)]
pub struct FrameChunker {
    block_size: usize,
    pending: Vec<f32>,
}

impl FrameChunker {
    /// Create a chunker emitting `block_size` samples at a time
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Append samples, calling `emit` for every completed block
    pub fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(&[f32])) {
        while !samples.is_empty() {
            let wanted = self.block_size - self.pending.len();
            let take = wanted.min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.block_size {
                emit(&self.pending);
                self.pending.clear();
            }
        }
    }

    /// Samples waiting for the next block
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Turns native-rate microphone samples into outbound chunks
#[derive(Debug)]
pub struct CapturePipeline {
    input_rate: u32,
    chunker: FrameChunker,
    queue: OutboundQueue,
    frames: u64,
}

impl CapturePipeline {
    /// Create a pipeline for a device running at `input_rate`
    #[must_use]
    pub fn new(input_rate: u32, block_size: usize, queue: OutboundQueue) -> Self {
        Self {
            input_rate,
            chunker: FrameChunker::new(block_size),
            queue,
            frames: 0,
        }
    }

    /// Feed mono samples from the device callback
    pub fn push_samples(&mut self, samples: &[f32]) {
        let sample_rate = self.input_rate;
        let mut ready = Vec::new();

        self.chunker.push(samples, |block| {
            ready.push(AudioFrame {
                samples: block.to_vec(),
                sample_rate,
                channels: 1,
            });
        });

        for frame in &ready {
            self.process_frame(frame);
        }
    }

    /// Encode and submit one frame, returning what the queue did with it
    pub fn process_frame(&mut self, frame: &AudioFrame) -> SubmitOutcome {
        let mono = first_channel(&frame.samples, frame.channels);
        let outcome = self.queue.submit(encode_block(&mono, frame.sample_rate));
        if outcome == SubmitOutcome::Queued {
            self.frames += 1;
        }
        outcome
    }

    /// Frames handed to the transport so far
    #[must_use]
    pub const fn frames_queued(&self) -> u64 {
        self.frames
    }

    /// Convert into a device callback
    #[must_use]
    pub fn into_callback(mut self) -> SampleCallback {
        Box::new(move |samples| self.push_samples(samples))
    }
}

/// Resample a native-rate block to the outbound rate and encode it
#[must_use]
pub fn encode_block(samples: &[f32], input_rate: u32) -> EncodedChunk {
    EncodedChunk::from_samples(&resample(samples, input_rate, INPUT_SAMPLE_RATE))
}

/// Take channel 0 of an interleaved buffer
fn first_channel(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 | 1 => samples.to_vec(),
        n => samples.iter().step_by(usize::from(n)).copied().collect(),
    }
}

/// Captures audio from the default input device at its native rate
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    running: Arc<AtomicBool>,
}

impl AudioCapture {
    /// Open the default input device
    ///
    /// # Errors
    ///
    /// Returns error if no input device is available or it reports no
    /// usable configuration
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let config = device
            .default_input_config()
            .map_err(|e| Error::Audio(e.to_string()))?
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            stream: None,
            running: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl CaptureDevice for AudioCapture {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn start(&mut self, mut on_samples: SampleCallback) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let running = Arc::clone(&self.running);
        let channels = self.config.channels;
        let mut mono = Vec::new();

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !running.load(Ordering::Acquire) {
                        return;
                    }
                    if channels <= 1 {
                        on_samples(data);
                    } else {
                        mono.clear();
                        mono.extend(data.iter().step_by(usize::from(channels)).copied());
                        on_samples(&mono);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        self.running.store(true, Ordering::Release);
        if let Err(e) = stream.play() {
            self.running.store(false, Ordering::Release);
            return Err(Error::Audio(e.to_string()));
        }
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Convert f32 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for sample in quantize(samples) {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::outbound_queue;
    use crate::voice::codec::from_transport_text;

    #[test]
    fn chunker_emits_fixed_blocks_across_pushes() {
        let mut chunker = FrameChunker::new(4);
        let mut blocks = Vec::new();

        chunker.push(&[1.0, 2.0, 3.0], |b| blocks.push(b.to_vec()));
        assert!(blocks.is_empty());
        assert_eq!(chunker.pending(), 3);

        chunker.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0], |b| blocks.push(b.to_vec()));
        assert_eq!(blocks, vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]);
        assert_eq!(chunker.pending(), 1);
    }

    #[test]
    fn pipeline_submits_one_chunk_per_block() {
        let (queue, mut rx) = outbound_queue(8);
        let mut pipeline = CapturePipeline::new(48000, 4096, queue);

        pipeline.push_samples(&vec![0.25; 1024]);
        assert!(rx.try_recv().is_err());

        pipeline.push_samples(&vec![0.25; 3072]);
        let chunk = rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(pipeline.frames_queued(), 1);

        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        let bytes = from_transport_text(&chunk.data).unwrap();
        assert_eq!(bytes.len(), 1365 * 2);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 8192);
    }

    #[test]
    fn pipeline_keeps_running_when_queue_is_full() {
        let (queue, mut rx) = outbound_queue(1);
        let mut pipeline = CapturePipeline::new(16000, 160, queue.clone());

        pipeline.push_samples(&vec![0.0; 160 * 3]);

        assert_eq!(pipeline.frames_queued(), 1);
        assert_eq!(queue.dropped(), 2);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn process_frame_uses_first_channel() {
        let (queue, mut rx) = outbound_queue(1);
        let mut pipeline = CapturePipeline::new(16000, 4, queue);

        let frame = AudioFrame {
            samples: vec![0.5, -1.0, 0.5, -1.0],
            sample_rate: 16000,
            channels: 2,
        };
        assert_eq!(pipeline.process_frame(&frame), SubmitOutcome::Queued);

        let bytes = from_transport_text(&rx.try_recv().unwrap().data).unwrap();
        assert_eq!(bytes, vec![0x00, 0x40, 0x00, 0x40]);
    }

    #[test]
    fn pushed_samples_become_mono_frames() {
        let (queue, mut rx) = outbound_queue(4);
        let mut pipeline = CapturePipeline::new(16000, 2, queue);

        pipeline.push_samples(&[0.5, 0.5, 0.25, 0.25, 0.5]);
        assert_eq!(pipeline.frames_queued(), 2);

        let first = from_transport_text(&rx.try_recv().unwrap().data).unwrap();
        assert_eq!(first, vec![0x00, 0x40, 0x00, 0x40]);
        let second = from_transport_text(&rx.try_recv().unwrap().data).unwrap();
        assert_eq!(second, vec![0x00, 0x20, 0x00, 0x20]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn callback_drives_pipeline() {
        let (queue, mut rx) = outbound_queue(4);
        let mut callback = CapturePipeline::new(16000, 2, queue).into_callback();

        callback(&[0.1, 0.2, 0.3]);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn wav_header_and_length() {
        let wav = samples_to_wav(&[0.0, 0.5, -0.5, 1.0], 16000).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 4 * 2);
    }
}

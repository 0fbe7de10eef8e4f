//! Voice processing module
//!
//! Handles microphone capture, the PCM wire codec, and gapless playback.

mod capture;
mod codec;
mod playback;
mod resample;

pub use capture::{
    AudioCapture, AudioFrame, CaptureDevice, CapturePipeline, DEFAULT_BLOCK_SIZE, FrameChunker,
    SampleCallback, encode_block, samples_to_wav,
};
pub use codec::{
    EncodedChunk, INPUT_MIME_TYPE, INPUT_SAMPLE_RATE, OUTPUT_MIME_TYPE, OUTPUT_SAMPLE_RATE,
    PlaybackFragment, dequantize, from_transport_text, pcm16_to_bytes, quantize,
    to_transport_text,
};
pub use playback::{AudioPlayback, OutputSink, PlaybackScheduler, ScheduledFragment};
pub use resample::resample;

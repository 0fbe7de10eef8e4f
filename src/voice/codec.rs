//! PCM16 quantization and transport text encoding
//!
//! Outbound audio is 16 kHz mono PCM16 little-endian; inbound audio is 24 kHz
//! mono PCM16 little-endian. Both travel as base64 text on the wire.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::{Error, Result};

/// Sample rate of audio sent to the live service
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of audio received from the live service
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// MIME descriptor attached to every outbound chunk
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// MIME descriptor requested for synthesized speech
pub const OUTPUT_MIME_TYPE: &str = "audio/pcm;rate=24000";

/// Full-scale divisor for PCM16
const PCM16_SCALE: f32 = 32768.0;

/// A base64 PCM16 chunk ready for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    /// Base64 text of little-endian PCM16 samples
    pub data: String,
    /// MIME descriptor of the payload
    pub mime_type: &'static str,
}

impl EncodedChunk {
    /// Encode float samples already at 16 kHz mono
    #[must_use]
    pub fn from_samples(samples: &[f32]) -> Self {
        Self {
            data: to_transport_text(&pcm16_to_bytes(&quantize(samples))),
            mime_type: INPUT_MIME_TYPE,
        }
    }
}

/// Decoded speech ready to be scheduled
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackFragment {
    /// Mono samples in `[-1, 1]`
    pub samples: Vec<f32>,
    /// Sample rate of `samples`
    pub sample_rate: u32,
}

impl PlaybackFragment {
    /// Decode a base64 PCM16 payload at the inbound rate
    ///
    /// # Errors
    ///
    /// Returns error if the text is not base64 or the bytes are not whole
    /// PCM16 frames
    pub fn from_transport_text(text: &str) -> Result<Self> {
        let bytes = from_transport_text(text)?;
        let mut channels = dequantize(&bytes, 1)?;
        Ok(Self {
            samples: channels.pop().unwrap_or_default(),
            sample_rate: OUTPUT_SAMPLE_RATE,
        })
    }

    /// Playback duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Quantize float samples to PCM16
///
/// Samples are clamped to `[-1, 1]` before scaling so transient overshoot
/// saturates instead of wrapping.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn quantize(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let clamped = if s.is_nan() { 0.0 } else { s.clamp(-1.0, 1.0) };
            (clamped * PCM16_SCALE).clamp(-PCM16_SCALE, PCM16_SCALE - 1.0) as i16
        })
        .collect()
}

/// Serialize PCM16 samples as little-endian bytes
#[must_use]
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Split interleaved little-endian PCM16 bytes into per-channel float buffers
///
/// # Errors
///
/// Returns error if `channels` is zero or the byte count is not a whole
/// number of frames
pub fn dequantize(bytes: &[u8], channels: usize) -> Result<Vec<Vec<f32>>> {
    if channels == 0 {
        return Err(Error::Decode("channel count must be non-zero".to_string()));
    }

    let frame_bytes = channels * 2;
    if bytes.len() % frame_bytes != 0 {
        return Err(Error::Decode(format!(
            "{} bytes is not a whole number of {channels}-channel PCM16 frames",
            bytes.len()
        )));
    }

    let frames = bytes.len() / frame_bytes;
    let mut output = vec![Vec::with_capacity(frames); channels];

    for frame in bytes.chunks_exact(frame_bytes) {
        for (channel, sample) in frame.chunks_exact(2).enumerate() {
            let value = i16::from_le_bytes([sample[0], sample[1]]);
            output[channel].push(f32::from(value) / PCM16_SCALE);
        }
    }

    Ok(output)
}

/// Encode raw bytes as transport-safe text
#[must_use]
pub fn to_transport_text(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode transport text back to raw bytes
///
/// # Errors
///
/// Returns error if the text is not valid base64
pub fn from_transport_text(text: &str) -> Result<Vec<u8>> {
    Ok(BASE64.decode(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_clamps_out_of_range() {
        assert_eq!(quantize(&[1.5]), quantize(&[1.0]));
        assert_eq!(quantize(&[-2.0]), quantize(&[-1.0]));
        assert_eq!(quantize(&[1.0, -1.0]), vec![i16::MAX, i16::MIN]);
    }

    #[test]
    fn quantize_truncates_toward_zero() {
        // 0.5 / 32768 above zero still truncates to zero
        let tiny = 0.5 / 32768.0;
        assert_eq!(quantize(&[tiny, -tiny]), vec![0, 0]);
        assert_eq!(quantize(&[0.5, -0.5]), vec![16384, -16384]);
    }

    #[test]
    fn quantize_maps_nan_to_silence() {
        assert_eq!(quantize(&[f32::NAN]), vec![0]);
    }

    #[test]
    fn round_trip_error_is_bounded() {
        #[allow(clippy::cast_precision_loss)]
        let input: Vec<f32> = (-1000..=1000).map(|i| i as f32 / 1000.0).collect();
        let bytes = pcm16_to_bytes(&quantize(&input));
        let output = dequantize(&bytes, 1).unwrap().remove(0);

        assert_eq!(output.len(), input.len());
        for (x, y) in input.iter().zip(&output) {
            assert!((x - y).abs() <= 1.0 / 32768.0, "{x} -> {y}");
        }
    }

    #[test]
    fn dequantize_splits_interleaved_channels() {
        let bytes = pcm16_to_bytes(&[16384, -16384, 0, 8192]);
        let channels = dequantize(&bytes, 2).unwrap();
        assert_eq!(channels, vec![vec![0.5, 0.0], vec![-0.5, 0.25]]);
    }

    #[test]
    fn dequantize_rejects_partial_frames() {
        assert!(matches!(dequantize(&[0, 1, 2], 1), Err(Error::Decode(_))));
        assert!(matches!(dequantize(&[0, 1, 2, 3, 4, 5], 2), Err(Error::Decode(_))));
        assert!(matches!(dequantize(&[0, 1], 0), Err(Error::Decode(_))));
    }

    #[test]
    fn pcm16_bytes_are_little_endian() {
        assert_eq!(pcm16_to_bytes(&[0x0102, -2]), vec![0x02, 0x01, 0xfe, 0xff]);
    }

    #[test]
    fn transport_text_round_trips_every_byte() {
        let bytes: Vec<u8> = (0..=255).collect();
        let text = to_transport_text(&bytes);
        assert!(text.is_ascii());
        assert_eq!(from_transport_text(&text).unwrap(), bytes);
    }

    #[test]
    fn transport_text_rejects_garbage() {
        assert!(matches!(from_transport_text("not base64!"), Err(Error::Base64(_))));
    }

    #[test]
    fn encoded_chunk_carries_input_mime() {
        let chunk = EncodedChunk::from_samples(&[0.0; 1366]);
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        assert_eq!(from_transport_text(&chunk.data).unwrap().len(), 1366 * 2);
    }

    #[test]
    fn fragment_duration_at_inbound_rate() {
        let bytes = pcm16_to_bytes(&vec![0i16; 12000]);
        let fragment = PlaybackFragment::from_transport_text(&to_transport_text(&bytes)).unwrap();
        assert_eq!(fragment.sample_rate, OUTPUT_SAMPLE_RATE);
        assert!((fragment.duration() - 0.5).abs() < 1e-9);
    }
}

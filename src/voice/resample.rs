//! Block-mean sample rate conversion
//!
//! Each output sample is the mean of the contiguous run of input samples that
//! maps onto it. This is a cheap low-pass approximation that is good enough for
//! speech-band audio; it is not an anti-aliasing filter.

use std::borrow::Cow;

/// Convert `samples` from `input_rate` to `output_rate`
///
/// Returns the input untouched when the rates match. A zero rate on either
/// side yields an empty buffer.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn resample(samples: &[f32], input_rate: u32, output_rate: u32) -> Cow<'_, [f32]> {
    if input_rate == output_rate {
        return Cow::Borrowed(samples);
    }
    if input_rate == 0 || output_rate == 0 || samples.is_empty() {
        return Cow::Owned(Vec::new());
    }

    let ratio = f64::from(input_rate) / f64::from(output_rate);
    let output_len = (samples.len() as f64 / ratio).round() as usize;
    let mut output = Vec::with_capacity(output_len);

    let mut block_start = 0usize;
    for i in 0..output_len {
        let block_end = ((i + 1) as f64 * ratio).round() as usize;
        let end = block_end.min(samples.len());

        let block = samples.get(block_start..end).unwrap_or_default();
        let value = if block.is_empty() {
            // Upsampling leaves some blocks empty; hold the nearest input sample
            samples[block_start.min(samples.len() - 1)]
        } else {
            block.iter().sum::<f32>() / block.len() as f32
        };

        output.push(value);
        block_start = block_end;
    }

    Cow::Owned(output)
}

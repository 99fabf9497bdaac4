//! Channel downmixing and sample-rate conversion at the PCM boundary.
//! Uses linear interpolation, which is adequate for rates at or above the
//! configured channel rate.

use crate::error::{Result, StegoError};

/// Average interleaved multi-channel audio into mono
///
/// # Arguments
/// * `samples` - Interleaved samples [c0, c1, ..., c0, c1, ...]
/// * `channels` - Number of interleaved channels
///
/// # Errors
/// `FormatError` if `channels` is zero or does not divide the sample count
pub fn downmix(samples: &[f32], channels: usize) -> Result<Vec<f32>> {
    if channels == 0 {
        return Err(StegoError::FormatError("channel count must be positive".into()));
    }
    if channels == 1 {
        return Ok(samples.to_vec());
    }
    if samples.len() % channels != 0 {
        return Err(StegoError::FormatError(format!(
            "{} samples do not split into {} channels",
            samples.len(),
            channels
        )));
    }

    Ok(samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect())
}

/// Resample audio to a target sample rate using linear interpolation
///
/// Linear interpolation rolls off as `sinc²(f / from_rate)`: near-ultrasonic
/// tones lose a lot of level, about half their amplitude for 19.5 kHz at
/// 44.1 kHz. The demodulator's correlation is level-normalized, so this
/// costs detection margin against `detection_threshold` rather than bits.
///
/// # Example
/// ```ignore
/// let audio_44k = vec![0.1, 0.2, 0.3];
/// let audio_48k = resample_audio(&audio_44k, 44_100, 48_000);
/// ```
pub fn resample_audio(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let new_length = (samples.len() as u64 * to_rate as u64).div_ceil(from_rate as u64) as usize;
    let mut resampled = Vec::with_capacity(new_length);

    for i in 0..new_length {
        let src_idx = i as f64 / ratio;
        let floor = src_idx.floor() as usize;
        let fraction = (src_idx - floor as f64) as f32;

        let interpolated = match (samples.get(floor), samples.get(floor + 1)) {
            (Some(&a), Some(&b)) => a * (1.0 - fraction) + b * fraction,
            (Some(&a), None) => a,
            _ => samples[samples.len() - 1],
        };

        resampled.push(interpolated);
    }

    resampled
}

use crate::error::{Result, StegoError};
use crate::resample::resample_audio;

/// Mono PCM samples tagged with their sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Signal {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn silence(duration_secs: f32, sample_rate: u32) -> Self {
        let len = (duration_secs as f64 * sample_rate as f64).round() as usize;
        Self::new(vec![0.0; len], sample_rate)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// This signal converted to `sample_rate`
    pub fn resampled(&self, sample_rate: u32) -> Signal {
        Signal::new(
            resample_audio(&self.samples, self.sample_rate, sample_rate),
            sample_rate,
        )
    }

    /// Overlay `other` on this signal starting at sample 0.
    ///
    /// The result is as long as the longer input and clipped to [-1, 1].
    pub fn mix(&self, other: &Signal) -> Result<Signal> {
        if self.sample_rate != other.sample_rate {
            return Err(StegoError::InvalidConfig(format!(
                "cannot mix {} Hz with {} Hz audio",
                self.sample_rate, other.sample_rate
            )));
        }

        let len = self.len().max(other.len());
        let mut mixed = vec![0.0f32; len];
        for (out, &s) in mixed.iter_mut().zip(self.samples.iter()) {
            *out = s;
        }
        for (out, &s) in mixed.iter_mut().zip(other.samples.iter()) {
            *out = (*out + s).clamp(-1.0, 1.0);
        }

        Ok(Signal::new(mixed, self.sample_rate))
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_extends_to_longer_input() {
        let carrier = Signal::new(vec![0.5; 4], 48_000);
        let overlay = Signal::new(vec![0.25; 6], 48_000);
        let mixed = carrier.mix(&overlay).unwrap();
        assert_eq!(mixed.len(), 6);
        assert!((mixed.samples[0] - 0.75).abs() < 1e-6);
        assert!((mixed.samples[5] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_mix_clips() {
        let a = Signal::new(vec![0.9, -0.9], 48_000);
        let b = Signal::new(vec![0.5, -0.5], 48_000);
        let mixed = a.mix(&b).unwrap();
        assert_eq!(mixed.samples, vec![1.0, -1.0]);
    }

    #[test]
    fn test_mix_rejects_rate_mismatch() {
        let a = Signal::new(vec![0.0; 4], 44_100);
        let b = Signal::new(vec![0.0; 4], 48_000);
        assert!(a.mix(&b).is_err());
    }

    #[test]
    fn test_silence_duration() {
        let s = Signal::silence(0.5, 48_000);
        assert_eq!(s.len(), 24_000);
        assert!((s.duration_secs() - 0.5).abs() < 1e-6);
        assert_eq!(s.peak(), 0.0);
    }
}

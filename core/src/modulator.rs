use crate::config::CodecConfig;
use crate::error::Result;
use crate::signal::Signal;
use std::f64::consts::PI;

/// Fraction of each bit tone faded at either edge.
const EDGE_FADE_RATIO: usize = 100; // 1% of the bit

/// Gain at the outermost sample of a faded edge.
///
/// A shallow 0.9 -> 1.0 ramp is enough to soften the phase reset between
/// bits. Deeper or longer windows widen the tone's spectral peak and cost
/// detection margin at the receiver.
const EDGE_FADE_FLOOR: f32 = 0.9;

/// Binary FSK modulator for the near-ultrasonic channel
///
/// Each bit becomes one constant tone lasting `bit_duration` seconds:
/// `freq_0` for a 0, `freq_1` for a 1. Tone phase restarts at zero on every
/// bit so that any bit window can be correlated against a reference tone that
/// also starts at zero.
pub struct UltrasonicModulator {
    freq_0: f32,
    freq_1: f32,
    sample_rate: u32,
    samples_per_bit: usize,
    amplitude: f32,
    /// Per-sample gain shared by every bit tone
    envelope: Vec<f32>,
}

impl UltrasonicModulator {
    pub fn new(config: &CodecConfig) -> Result<Self> {
        config.validate()?;
        let samples_per_bit = config.samples_per_bit();

        Ok(Self {
            freq_0: config.freq_0,
            freq_1: config.freq_1,
            sample_rate: config.sample_rate,
            samples_per_bit,
            amplitude: config.amplitude,
            envelope: edge_fade_envelope(samples_per_bit),
        })
    }

    pub fn samples_per_bit(&self) -> usize {
        self.samples_per_bit
    }

    /// Samples produced for `bit_count` bits
    pub fn rendered_len(&self, bit_count: usize) -> usize {
        bit_count * self.samples_per_bit
    }

    /// Render one bit tone
    fn tone(&self, bit: bool) -> Vec<f32> {
        let frequency = if bit { self.freq_1 } else { self.freq_0 };
        let angular = 2.0 * PI * frequency as f64 / self.sample_rate as f64;

        self.envelope
            .iter()
            .enumerate()
            .map(|(i, &gain)| self.amplitude * gain * (angular * i as f64).sin() as f32)
            .collect()
    }

    /// Modulate a bit sequence into a waveform.
    pub fn render(&self, bits: &[bool]) -> Signal {
        let zero = self.tone(false);
        let one = self.tone(true);

        let mut samples = Vec::with_capacity(self.rendered_len(bits.len()));
        for &bit in bits {
            samples.extend_from_slice(if bit { &one } else { &zero });
        }

        Signal::new(samples, self.sample_rate)
    }
}

/// Linear fade from `EDGE_FADE_FLOOR` to 1.0 over the first 1% of the bit and
/// back down over the last 1%; unity in between.
fn edge_fade_envelope(len: usize) -> Vec<f32> {
    let mut envelope = vec![1.0f32; len];
    let fade = (len / EDGE_FADE_RATIO).max(1).min(len / 2);
    if fade == 0 {
        return envelope;
    }

    for i in 0..fade {
        let progress = if fade > 1 {
            i as f32 / (fade - 1) as f32
        } else {
            0.0
        };
        let gain = EDGE_FADE_FLOOR + (1.0 - EDGE_FADE_FLOOR) * progress;
        envelope[i] = gain;
        envelope[len - 1 - i] = gain;
    }

    envelope
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StegoError;

    fn modulator() -> UltrasonicModulator {
        UltrasonicModulator::new(&CodecConfig::default()).unwrap()
    }

    #[test]
    fn test_render_length() {
        let m = modulator();
        let signal = m.render(&[true, false, true]);
        assert_eq!(signal.len(), 3 * 480);
        assert_eq!(signal.sample_rate, 48_000);
        assert!(m.render(&[]).is_empty());
    }

    #[test]
    fn test_amplitude_bound() {
        let config = CodecConfig {
            amplitude: 0.3,
            ..CodecConfig::default()
        };
        let m = UltrasonicModulator::new(&config).unwrap();
        let signal = m.render(&[true, false, false, true, true]);
        assert!(signal.peak() <= 0.3 + 1e-6);
        assert!(signal.peak() > 0.29);
    }

    #[test]
    fn test_bit_selects_frequency() {
        let m = modulator();
        let zero = m.render(&[false]);
        let one = m.render(&[true]);

        // Count zero crossings: 18.5 kHz over 10 ms = 185 cycles, 19.5 kHz = 195
        let crossings = |s: &[f32]| s.windows(2).filter(|w| (w[0] < 0.0) != (w[1] < 0.0)).count();
        let c0 = crossings(&zero.samples);
        let c1 = crossings(&one.samples);
        assert!((c0 as i64 - 370).abs() <= 2, "bit 0 crossings: {}", c0);
        assert!((c1 as i64 - 390).abs() <= 2, "bit 1 crossings: {}", c1);
    }

    #[test]
    fn test_edge_fade_is_shallow_and_short() {
        let envelope = edge_fade_envelope(480);
        // 1% of 480 = 4 samples faded per edge
        assert!((envelope[0] - 0.9).abs() < 1e-6);
        assert!((envelope[3] - 1.0).abs() < 1e-6);
        assert!(envelope[4..476].iter().all(|&g| g == 1.0));
        assert!((envelope[479] - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_edge_fade_tiny_bits() {
        assert_eq!(edge_fade_envelope(1), vec![1.0]);
        let two = edge_fade_envelope(2);
        assert_eq!(two, vec![0.9, 0.9]);
    }

    #[test]
    fn test_render_deterministic() {
        let bits = [true, true, false, true, false, false, true];
        let a = modulator().render(&bits);
        let b = modulator().render(&bits);
        assert_eq!(a.samples, b.samples);
    }

    #[test]
    fn test_nyquist_violation_rejected() {
        let config = CodecConfig::default().with_frequencies(18_000.0, 25_000.0);
        assert!(matches!(
            UltrasonicModulator::new(&config),
            Err(StegoError::NyquistViolation { .. })
        ));
    }
}

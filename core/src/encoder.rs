use crate::cipher::{self, Key, MAX_RANDOM_PADDING, MIN_PAYLOAD_LEN};
use crate::config::CodecConfig;
use crate::error::{Result, StegoError};
use crate::framing::{frame_bit_len, FrameEncoder};
use crate::modulator::UltrasonicModulator;
use crate::signal::Signal;

/// Carriers shorter than this are padded with silence before mixing.
pub const MIN_CARRIER_SECS: f32 = 5.0;

/// Whether a carrier can hold the configured tones
#[derive(Debug, Clone, PartialEq)]
pub struct CompatibilityReport {
    pub compatible: bool,
    pub sample_rate: u32,
    pub nyquist_frequency: f32,
    /// (low, high) tone frequencies
    pub frequency_range: (f32, f32),
    /// Lowest rate comfortably above the upper tone, never below 48 kHz
    pub recommended_sample_rate: u32,
    pub duration_secs: f32,
}

/// Command-to-audio pipeline: encrypt, optionally pad, frame, modulate
///
/// Stateless apart from the configuration it was built with; one encoder can
/// serve any number of commands and keys.
pub struct CommandEncoder {
    config: CodecConfig,
    modulator: UltrasonicModulator,
}

impl CommandEncoder {
    pub fn new(config: &CodecConfig) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            modulator: UltrasonicModulator::new(config)?,
        })
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Encrypted (and, when configured, padded) bytes for `command`.
    pub fn seal_command(&self, command: &str, key: &Key) -> Result<Vec<u8>> {
        let encrypted = cipher::encrypt(key, command.as_bytes())?;
        if self.config.obfuscate {
            Ok(cipher::add_obfuscation(&encrypted))
        } else {
            Ok(encrypted)
        }
    }

    /// Frame and modulate an already sealed payload.
    pub fn encode_payload(&self, payload: &[u8]) -> Result<Signal> {
        if payload.len() > self.config.max_payload_bytes {
            return Err(StegoError::FormatError(format!(
                "payload of {} bytes exceeds limit of {}",
                payload.len(),
                self.config.max_payload_bytes
            )));
        }
        let bits = FrameEncoder::build_frame(payload)?;
        Ok(self.modulator.render(&bits))
    }

    /// Render `command` as a standalone ultrasonic signal.
    pub fn embed(&self, command: &str, key: &Key) -> Result<Signal> {
        let payload = self.seal_command(command, key)?;
        let signal = self.encode_payload(&payload)?;
        log::info!(
            "Embedded {}-byte command as {}-byte payload ({:.2} s)",
            command.len(),
            payload.len(),
            signal.duration_secs()
        );
        Ok(signal)
    }

    /// Mix `command` into `carrier`, starting at its first sample.
    ///
    /// The carrier is converted to the configured rate and padded with
    /// silence to at least `MIN_CARRIER_SECS` or the frame length.
    ///
    /// # Errors
    /// `NyquistViolation` if the carrier's rate cannot hold the tones.
    pub fn embed_into(&self, carrier: &Signal, command: &str, key: &Key) -> Result<Signal> {
        let report = self.check_compatibility(carrier);
        if !report.compatible {
            return Err(StegoError::NyquistViolation {
                frequency: report.frequency_range.1,
                nyquist: report.nyquist_frequency,
            });
        }

        let overlay = self.embed(command, key)?;
        let mut base = carrier.resampled(self.config.sample_rate);
        let min_len = (MIN_CARRIER_SECS * self.config.sample_rate as f32).round() as usize;
        if base.len() < min_len {
            base.samples.resize(min_len, 0.0);
        }

        base.mix(&overlay)
    }

    /// Longest time the frame for `command` can take, in seconds.
    ///
    /// Padding is random, so the estimate assumes the largest pad.
    pub fn estimate_duration(&self, command: &str) -> f32 {
        let mut payload_len = command.len() + MIN_PAYLOAD_LEN;
        if self.config.obfuscate {
            payload_len += 1 + MAX_RANDOM_PADDING as usize;
        }
        let samples = self.modulator.rendered_len(frame_bit_len(payload_len));
        samples as f32 / self.config.sample_rate as f32
    }

    /// Whether `carrier` can carry the configured tones.
    pub fn check_compatibility(&self, carrier: &Signal) -> CompatibilityReport {
        let nyquist_frequency = carrier.sample_rate as f32 / 2.0;
        let frequency_range = self.config.frequency_range();
        let recommended = (frequency_range.1 as f64 * 2.5).ceil() as u32;

        CompatibilityReport {
            compatible: frequency_range.1 < nyquist_frequency,
            sample_rate: carrier.sample_rate,
            nyquist_frequency,
            frequency_range,
            recommended_sample_rate: recommended.max(48_000),
            duration_secs: carrier.duration_secs(),
        }
    }
}

/// Encrypt and modulate `command` into a fresh signal.
pub fn embed(command: &str, key: &Key, config: &CodecConfig) -> Result<Signal> {
    CommandEncoder::new(config)?.embed(command, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> Key {
        Key::from_bytes(&[7u8; 32]).unwrap()
    }

    #[test]
    fn test_embed_length_matches_frame() {
        let config = CodecConfig {
            obfuscate: false,
            ..CodecConfig::default()
        };
        let signal = embed("ping", &key(), &config).unwrap();
        let payload_len = 4 + MIN_PAYLOAD_LEN;
        assert_eq!(signal.len(), frame_bit_len(payload_len) * 480);
        assert_eq!(signal.sample_rate, 48_000);
        assert!(signal.peak() <= config.amplitude + 1e-6);
    }

    #[test]
    fn test_obfuscation_varies_length() {
        let encoder = CommandEncoder::new(&CodecConfig::default()).unwrap();
        let lengths: std::collections::HashSet<usize> = (0..20)
            .map(|_| encoder.embed("status", &key()).unwrap().len())
            .collect();
        assert!(lengths.len() > 1);
    }

    #[test]
    fn test_estimate_is_upper_bound() {
        let encoder = CommandEncoder::new(&CodecConfig::default()).unwrap();
        let estimate = encoder.estimate_duration("execute:status_check");
        for _ in 0..10 {
            let signal = encoder.embed("execute:status_check", &key()).unwrap();
            assert!(signal.duration_secs() <= estimate + 1e-6);
        }
        // 20 + 32 + 33 bytes -> 24 + 16 + 9 * 85 bits at 10 ms
        assert!((estimate - 8.05).abs() < 1e-3, "estimate {}", estimate);
    }

    #[test]
    fn test_payload_limit_enforced() {
        let config = CodecConfig {
            max_payload_bytes: 40,
            obfuscate: false,
            ..CodecConfig::default()
        };
        let encoder = CommandEncoder::new(&config).unwrap();
        assert!(encoder.embed("short", &key()).is_ok());
        assert!(matches!(
            encoder.embed("this command is too long", &key()),
            Err(StegoError::FormatError(_))
        ));
    }

    #[test]
    fn test_compatibility_report() {
        let encoder = CommandEncoder::new(&CodecConfig::default()).unwrap();

        let cd = encoder.check_compatibility(&Signal::silence(2.0, 44_100));
        assert!(cd.compatible);
        assert_eq!(cd.nyquist_frequency, 22_050.0);
        assert_eq!(cd.recommended_sample_rate, 48_750);
        assert!((cd.duration_secs - 2.0).abs() < 1e-6);

        let phone = encoder.check_compatibility(&Signal::silence(1.0, 16_000));
        assert!(!phone.compatible);
    }

    #[test]
    fn test_embed_into_pads_short_carrier() {
        let config = CodecConfig {
            obfuscate: false,
            ..CodecConfig::default()
        };
        let encoder = CommandEncoder::new(&config).unwrap();
        let carrier = Signal::silence(1.0, 48_000);
        // 34-byte payload renders 3.46 s, shorter than the padded carrier
        let mixed = encoder.embed_into(&carrier, "ls", &key()).unwrap();
        assert_eq!(mixed.len(), 5 * 48_000);

        let long_carrier = Signal::silence(7.0, 44_100);
        let mixed = encoder.embed_into(&long_carrier, "ls", &key()).unwrap();
        assert_eq!(mixed.sample_rate, 48_000);
        assert_eq!(mixed.len(), 7 * 48_000);
    }

    #[test]
    fn test_embed_into_rejects_low_rate_carrier() {
        let encoder = CommandEncoder::new(&CodecConfig::default()).unwrap();
        let carrier = Signal::silence(1.0, 22_050);
        assert!(matches!(
            encoder.embed_into(&carrier, "ls", &key()),
            Err(StegoError::NyquistViolation { .. })
        ));
    }
}

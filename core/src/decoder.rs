use crate::analyzer::DetectionResult;
use crate::cipher::{self, Key};
use crate::config::CodecConfig;
use crate::demodulator::{RecoveredBits, UltrasonicDemodulator};
use crate::error::{Absence, Result, StegoError};
use crate::framing::FrameDecoder;
use crate::signal::Signal;

/// Everything known about one signal: presence, spectrum and decode outcome
#[derive(Debug)]
pub struct AnalysisReport {
    pub detection: DetectionResult,
    /// (low, high) configured tone frequencies
    pub frequency_range: (f32, f32),
    pub duration_secs: f32,
    pub sample_rate: u32,
    pub decoded: Result<String>,
}

/// A decoded command and where its frame sits in the analyzed signal
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCommand {
    pub command: String,
    /// First sample of the preamble, at the configured rate
    pub start_sample: usize,
    /// One past the last sample of the frame, at the configured rate
    pub end_sample: usize,
}

/// Audio-to-command pipeline: demodulate, check frame, unwrap, decrypt
pub struct CommandDecoder {
    config: CodecConfig,
    demodulator: UltrasonicDemodulator,
}

impl CommandDecoder {
    pub fn new(config: &CodecConfig) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            demodulator: UltrasonicDemodulator::new(config)?,
        })
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    fn recover_frame(&self, signal: &Signal) -> Result<(Vec<u8>, RecoveredBits)> {
        let recovered = self.demodulator.recover_bits(signal)?;
        let payload = FrameDecoder::parse_frame(&recovered.bits, self.config.error_tolerance)?;
        log::debug!(
            "Frame at sample {} carried {} bytes (sync {:.3}, {} low-confidence bits)",
            recovered.start_sample,
            payload.len(),
            recovered.sync_score,
            recovered.low_confidence_bits
        );
        Ok((payload, recovered))
    }

    /// Demodulate and validate the frame carried by `signal`.
    pub fn decode_payload(&self, signal: &Signal) -> Result<Vec<u8>> {
        self.recover_frame(signal).map(|(payload, _)| payload)
    }

    /// Decrypt a frame payload into the command string.
    ///
    /// With obfuscation enabled the padded layout is tried first, then the
    /// bare one; failing both is a single `AuthenticationError`.
    pub fn open_payload(&self, payload: &[u8], key: &Key) -> Result<String> {
        let plaintext = if self.config.obfuscate {
            cipher::remove_obfuscation(payload)
                .and_then(|inner| cipher::decrypt(key, &inner))
                .or_else(|_| cipher::decrypt(key, payload))?
        } else {
            cipher::decrypt(key, payload)?
        };

        String::from_utf8(plaintext)
            .map_err(|e| StegoError::FormatError(format!("command is not UTF-8: {}", e)))
    }

    /// Recover the command hidden in `signal`.
    ///
    /// # Errors
    /// * `NoSignalDetected` when nothing is hidden
    /// * `SyncError` / `ParityError` when a frame is present but damaged
    /// * `AuthenticationError` for a wrong key or tampered payload
    pub fn decode(&self, signal: &Signal, key: &Key) -> Result<String> {
        self.decode_located(signal, key).map(|decoded| decoded.command)
    }

    /// Like `decode`, also reporting the frame's sample span.
    pub fn decode_located(&self, signal: &Signal, key: &Key) -> Result<DecodedCommand> {
        let (payload, recovered) = self.recover_frame(signal)?;
        let command = self.open_payload(&payload, key)?;
        log::info!(
            "Decoded {}-byte command at sample {}",
            command.len(),
            recovered.start_sample
        );

        let frame_samples = recovered.bits.len() * self.config.samples_per_bit();
        Ok(DecodedCommand {
            command,
            start_sample: recovered.start_sample,
            end_sample: recovered.start_sample + frame_samples,
        })
    }

    /// Presence, spectrum and decode outcome for `signal`.
    pub fn analyze(&self, signal: &Signal, key: &Key) -> Result<AnalysisReport> {
        let detection = self.demodulator.analyzer().analyze(signal)?;
        let decoded = if detection.has_signal {
            self.decode(signal, key)
        } else {
            Err(StegoError::NoSignalDetected(Absence::BelowThreshold {
                strength: detection.strength,
                threshold: self.config.detection_threshold,
            }))
        };

        Ok(AnalysisReport {
            detection,
            frequency_range: self.config.frequency_range(),
            duration_secs: signal.duration_secs(),
            sample_rate: signal.sample_rate,
            decoded,
        })
    }
}

/// Recover the command hidden in `signal`.
pub fn decode(signal: &Signal, key: &Key, config: &CodecConfig) -> Result<String> {
    CommandDecoder::new(config)?.decode(signal, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::CommandEncoder;
    use crate::error::FailureClass;

    fn key() -> Key {
        Key::from_bytes(&[3u8; 16]).unwrap()
    }

    #[test]
    fn test_open_payload_accepts_both_layouts() {
        let decoder = CommandDecoder::new(&CodecConfig::default()).unwrap();
        let bare = cipher::encrypt(&key(), b"reboot").unwrap();
        let padded = cipher::add_obfuscation(&bare);

        assert_eq!(decoder.open_payload(&padded, &key()).unwrap(), "reboot");
        assert_eq!(decoder.open_payload(&bare, &key()).unwrap(), "reboot");
    }

    #[test]
    fn test_open_payload_strict_without_obfuscation() {
        let config = CodecConfig {
            obfuscate: false,
            ..CodecConfig::default()
        };
        let decoder = CommandDecoder::new(&config).unwrap();
        let padded = cipher::add_obfuscation_with(&cipher::encrypt(&key(), b"x").unwrap(), 4);
        assert!(matches!(
            decoder.open_payload(&padded, &key()),
            Err(StegoError::AuthenticationError)
        ));
    }

    #[test]
    fn test_open_payload_rejects_non_utf8() {
        let decoder = CommandDecoder::new(&CodecConfig::default()).unwrap();
        let payload = cipher::encrypt(&key(), &[0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(
            decoder.open_payload(&payload, &key()),
            Err(StegoError::FormatError(_))
        ));
    }

    #[test]
    fn test_decode_roundtrip() {
        let config = CodecConfig::default();
        let signal = CommandEncoder::new(&config)
            .unwrap()
            .embed("open:door", &key())
            .unwrap();
        assert_eq!(decode(&signal, &key(), &config).unwrap(), "open:door");
    }

    #[test]
    fn test_decode_located_span() {
        let config = CodecConfig {
            obfuscate: false,
            ..CodecConfig::default()
        };
        let frame = CommandEncoder::new(&config)
            .unwrap()
            .embed("locate", &key())
            .unwrap();
        let mut samples = vec![0.0f32; 9_600];
        samples.extend_from_slice(&frame.samples);
        samples.extend(std::iter::repeat(0.0).take(9_600));

        let decoded = CommandDecoder::new(&config)
            .unwrap()
            .decode_located(&Signal::new(samples, 48_000), &key())
            .unwrap();
        assert_eq!(decoded.command, "locate");
        assert!((decoded.start_sample as i64 - 9_600).abs() <= 4);
        assert_eq!(decoded.end_sample - decoded.start_sample, frame.len());
    }

    #[test]
    fn test_analyze_reports_decode_outcome() {
        let config = CodecConfig::default();
        let decoder = CommandDecoder::new(&config).unwrap();
        let signal = CommandEncoder::new(&config)
            .unwrap()
            .embed("probe", &key())
            .unwrap();

        let report = decoder.analyze(&signal, &key()).unwrap();
        assert!(report.detection.has_signal);
        assert_eq!(report.frequency_range, (18_500.0, 19_500.0));
        assert_eq!(report.sample_rate, 48_000);
        assert_eq!(report.decoded.unwrap(), "probe");

        let silent = decoder.analyze(&Signal::silence(1.0, 48_000), &key()).unwrap();
        assert!(!silent.detection.has_signal);
        assert_eq!(silent.decoded.unwrap_err().class(), FailureClass::Absence);
    }
}

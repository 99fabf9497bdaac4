use crate::analyzer::SignalAnalyzer;
use crate::config::CodecConfig;
use crate::correlate::BitCorrelator;
use crate::error::{Absence, Result, StegoError, SyncFailure};
use crate::framing::{frame_bit_len, read_length_field, LENGTH_FIELD_BITS, PREAMBLE, PREAMBLE_BITS};
use crate::signal::Signal;

/// Coarse preamble search advances by this fraction of a bit.
const COARSE_STEPS_PER_BIT: usize = 8;

/// Bits whose summed tone amplitude falls below this fraction of the
/// detection threshold count toward the end-of-signal run.
const LOW_POWER_FRACTION: f64 = 0.2;

/// Frame bits recovered from audio, before frame validation
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredBits {
    /// Preamble, length field and payload groups as demodulated
    pub bits: Vec<bool>,
    /// Sample offset (at the configured rate) of the first preamble bit
    pub start_sample: usize,
    /// Preamble score at `start_sample`
    pub sync_score: f32,
    /// Bits decided with less than `min_power_ratio` separation
    pub low_confidence_bits: usize,
}

/// Binary FSK receiver
///
/// Band-limits the signal, checks in-band presence, locks onto the preamble by
/// normalized tone correlation, then decides each bit by comparing the two
/// tone powers over its window.
pub struct UltrasonicDemodulator {
    config: CodecConfig,
    analyzer: SignalAnalyzer,
    samples_per_bit: usize,
}

impl UltrasonicDemodulator {
    pub fn new(config: &CodecConfig) -> Result<Self> {
        let analyzer = SignalAnalyzer::new(config)?;
        Ok(Self {
            config: config.clone(),
            analyzer,
            samples_per_bit: config.samples_per_bit(),
        })
    }

    pub fn analyzer(&self) -> &SignalAnalyzer {
        &self.analyzer
    }

    /// Recover the raw frame bits carried by `signal`.
    ///
    /// # Errors
    /// * `NoSignalDetected` when nothing in-band is loud enough or no preamble matches
    /// * `SyncError` when the length field is implausible or the frame is cut short
    /// * `NyquistViolation` when the signal's rate cannot carry the tones
    pub fn recover_bits(&self, signal: &Signal) -> Result<RecoveredBits> {
        let samples = self.analyzer.conform(signal)?;
        let filtered = self.analyzer.band_limit(&samples);

        let strength = self.analyzer.in_band_strength(&filtered);
        let threshold = self.config.detection_threshold;
        if !(strength > threshold) {
            log::debug!("In-band strength {:.4} not above {:.4}", strength, threshold);
            return Err(StegoError::NoSignalDetected(Absence::BelowThreshold {
                strength,
                threshold,
            }));
        }

        let (freq_0, freq_1) = (self.config.freq_0, self.config.freq_1);
        let correlator = BitCorrelator::new(
            &filtered,
            freq_0,
            freq_1,
            self.config.sample_rate,
            self.samples_per_bit,
        );

        let (start_sample, sync_score) = self.find_preamble(&correlator)?;
        log::debug!(
            "Preamble locked at sample {} (score {:.3}, strength {:.4})",
            start_sample,
            sync_score,
            strength
        );

        let (bits, low_confidence_bits) = self.extract_frame(&correlator, start_sample)?;
        log::debug!(
            "Recovered {} frame bits, {} low confidence",
            bits.len(),
            low_confidence_bits
        );

        Ok(RecoveredBits {
            bits,
            start_sample,
            sync_score,
            low_confidence_bits,
        })
    }

    /// Mean tone contrast over the preamble bits starting at `start`.
    fn preamble_score(&self, correlator: &BitCorrelator, start: usize) -> f32 {
        let total: f64 = PREAMBLE
            .iter()
            .enumerate()
            .map(|(i, &expected)| {
                let (rho_0, rho_1) = correlator.normalized(start + i * self.samples_per_bit);
                if expected {
                    rho_1 - rho_0
                } else {
                    rho_0 - rho_1
                }
            })
            .sum();
        (total / PREAMBLE_BITS as f64) as f32
    }

    /// Locate the frame start.
    ///
    /// The coarse scan runs until one preamble span past the first window
    /// scoring at least `sync_threshold` and keeps the best window seen; a
    /// sample-step search around that window picks the final position.
    /// Partially overlapping alignments also clear the threshold, so the
    /// first crossing is usually early.
    fn find_preamble(&self, correlator: &BitCorrelator) -> Result<(usize, f32)> {
        let preamble_len = PREAMBLE_BITS * self.samples_per_bit;
        let Some(last) = correlator.len().checked_sub(preamble_len) else {
            return Err(StegoError::NoSignalDetected(Absence::NoPreamble {
                best_score: 0.0,
            }));
        };

        let step = (self.samples_per_bit / COARSE_STEPS_PER_BIT).max(1);
        let threshold = self.config.sync_threshold;
        let mut best_score = f32::MIN;
        let mut peak: Option<(usize, f32)> = None;
        let mut scan_end = last;

        let mut coarse = 0;
        while coarse <= scan_end {
            let score = self.preamble_score(correlator, coarse);
            best_score = best_score.max(score);
            if score >= threshold {
                match peak {
                    None => {
                        scan_end = (coarse + preamble_len + self.samples_per_bit).min(last);
                        peak = Some((coarse, score));
                    }
                    Some((_, peak_score)) if score > peak_score => peak = Some((coarse, score)),
                    Some(_) => {}
                }
            }
            coarse += step;
        }

        let Some((coarse, score)) = peak else {
            log::debug!("No preamble match, best score {:.3}", best_score);
            return Err(StegoError::NoSignalDetected(Absence::NoPreamble {
                best_score: best_score.max(0.0),
            }));
        };

        let mut best = (coarse, score);
        for position in coarse.saturating_sub(step)..=(coarse + step).min(last) {
            let candidate = self.preamble_score(correlator, position);
            if candidate > best.1 {
                best = (position, candidate);
            }
        }
        Ok(best)
    }

    /// Decide one bit: `(bit, low_confidence, summed_amplitude)`.
    fn decide(&self, correlator: &BitCorrelator, start: usize) -> (bool, bool, f64) {
        let (p0, p1) = correlator.powers(start);
        let sum = p0 + p1;
        let separation = if sum > 0.0 { (p0 - p1).abs() / sum } else { 0.0 };
        let low_confidence = separation < self.config.min_power_ratio as f64;
        (p0 <= p1, low_confidence, correlator.amplitude(sum))
    }

    /// Demodulate preamble, length field and payload groups.
    fn extract_frame(&self, correlator: &BitCorrelator, start: usize) -> Result<(Vec<bool>, usize)> {
        let header_bits = PREAMBLE_BITS + LENGTH_FIELD_BITS;
        let quiet_level = LOW_POWER_FRACTION * self.config.detection_threshold as f64;

        let mut bits = Vec::with_capacity(header_bits);
        let mut low_confidence = 0usize;
        let mut quiet_run = 0usize;
        let mut budget = header_bits;

        while bits.len() < budget {
            let mut position = start + bits.len() * self.samples_per_bit;
            if !correlator.fits(position) {
                // A lock a few samples late leaves the final window hanging
                // past the end of the signal; read it flush with the end.
                let slack = self.samples_per_bit / COARSE_STEPS_PER_BIT;
                match correlator.len().checked_sub(self.samples_per_bit) {
                    Some(tail) if bits.len() + 1 == budget && position - tail <= slack => {
                        position = tail;
                    }
                    _ => break,
                }
            }

            let (bit, uncertain, amplitude) = self.decide(correlator, position);
            bits.push(bit);
            if uncertain {
                low_confidence += 1;
            }

            if amplitude < quiet_level {
                quiet_run += 1;
                if quiet_run >= self.config.low_power_run {
                    log::debug!("Signal went quiet after {} bits", bits.len());
                    break;
                }
            } else {
                quiet_run = 0;
            }

            if bits.len() == header_bits {
                let declared = read_length_field(&bits).unwrap_or(0);
                if declared > self.config.max_payload_bytes {
                    return Err(StegoError::SyncError(SyncFailure::LengthOutOfRange {
                        declared,
                        limit: self.config.max_payload_bytes,
                    }));
                }
                budget = frame_bit_len(declared);
            }
        }

        if bits.len() < header_bits {
            return Err(StegoError::SyncError(SyncFailure::ShortHeader { bits: bits.len() }));
        }
        if bits.len() < budget {
            return Err(StegoError::SyncError(SyncFailure::Truncated {
                present: bits.len(),
                needed: budget,
            }));
        }

        Ok((bits, low_confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::FrameEncoder;
    use crate::modulator::UltrasonicModulator;

    fn render(config: &CodecConfig, payload: &[u8]) -> Signal {
        let bits = FrameEncoder::build_frame(payload).unwrap();
        UltrasonicModulator::new(config).unwrap().render(&bits)
    }

    fn pad(signal: &Signal, before: usize, after: usize) -> Signal {
        let mut samples = vec![0.0f32; before];
        samples.extend_from_slice(&signal.samples);
        samples.extend(std::iter::repeat(0.0).take(after));
        Signal::new(samples, signal.sample_rate)
    }

    #[test]
    fn test_recovers_clean_frame() {
        let config = CodecConfig::default();
        let payload = b"status";
        let signal = render(&config, payload);
        let expected = FrameEncoder::build_frame(payload).unwrap();

        let demod = UltrasonicDemodulator::new(&config).unwrap();
        let recovered = demod.recover_bits(&signal).unwrap();

        assert_eq!(recovered.bits, expected);
        assert!(recovered.start_sample <= 2, "start {}", recovered.start_sample);
        assert!(recovered.sync_score > 0.8, "score {}", recovered.sync_score);
        assert_eq!(recovered.low_confidence_bits, 0);
    }

    #[test]
    fn test_locates_offset_frame() {
        let config = CodecConfig::default();
        let payload = [0xA5, 0x00, 0xFF];
        let signal = pad(&render(&config, &payload), 7_321, 4_800);

        let recovered = UltrasonicDemodulator::new(&config)
            .unwrap()
            .recover_bits(&signal)
            .unwrap();

        assert_eq!(recovered.bits, FrameEncoder::build_frame(&payload).unwrap());
        let offset = recovered.start_sample as i64 - 7_321;
        assert!(offset.abs() <= 4, "offset {}", offset);
    }

    #[test]
    fn test_locks_after_short_lead_in() {
        let config = CodecConfig::default();
        let payload = b"status";
        let expected = FrameEncoder::build_frame(payload).unwrap();
        let demod = UltrasonicDemodulator::new(&config).unwrap();

        // Alignments a few bits early overlap the preamble well enough to
        // clear the sync threshold on their own
        for lead_bits in [2, 3, 10] {
            let lead = lead_bits * 480;
            let signal = pad(&render(&config, payload), lead, 0);
            let recovered = demod.recover_bits(&signal).unwrap();

            let offset = recovered.start_sample as i64 - lead as i64;
            assert!(offset.abs() <= 4, "lead {} bits: offset {}", lead_bits, offset);
            assert!(recovered.sync_score > 0.9, "lead {} bits: score {}", lead_bits, recovered.sync_score);
            assert_eq!(recovered.bits, expected, "lead {} bits", lead_bits);
        }
    }

    #[test]
    fn test_final_bit_read_flush_with_signal_end() {
        let config = CodecConfig::default();
        let payload = b"edge";
        let full = render(&config, payload);
        let clipped = Signal::new(full.samples[..full.len() - 3].to_vec(), 48_000);

        let recovered = UltrasonicDemodulator::new(&config)
            .unwrap()
            .recover_bits(&clipped)
            .unwrap();
        assert_eq!(recovered.bits, FrameEncoder::build_frame(payload).unwrap());
    }

    #[test]
    fn test_silence_is_below_threshold() {
        let demod = UltrasonicDemodulator::new(&CodecConfig::default()).unwrap();
        match demod.recover_bits(&Signal::silence(1.0, 48_000)) {
            Err(StegoError::NoSignalDetected(Absence::BelowThreshold { strength, .. })) => {
                assert_eq!(strength, 0.0);
            }
            other => panic!("Expected BelowThreshold, got {:?}", other),
        }
    }

    #[test]
    fn test_tone_without_preamble() {
        // Steady in-band tone: loud enough, but never matches the preamble
        let samples = (0..48_000)
            .map(|i| 0.2 * (2.0 * std::f32::consts::PI * 18_500.0 * i as f32 / 48_000.0).sin())
            .collect();
        let demod = UltrasonicDemodulator::new(&CodecConfig::default()).unwrap();
        match demod.recover_bits(&Signal::new(samples, 48_000)) {
            Err(StegoError::NoSignalDetected(Absence::NoPreamble { best_score })) => {
                assert!(best_score < 0.5);
            }
            other => panic!("Expected NoPreamble, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_frame_is_sync_error() {
        let config = CodecConfig::default();
        let signal = render(&config, b"truncate me");
        let cut = Signal::new(signal.samples[..signal.len() - 20 * 480].to_vec(), 48_000);

        let demod = UltrasonicDemodulator::new(&config).unwrap();
        let err = demod.recover_bits(&cut).unwrap_err();
        assert!(err.is_incomplete(), "{:?}", err);
    }

    #[test]
    fn test_oversized_length_is_sync_error() {
        let config = CodecConfig {
            max_payload_bytes: 4,
            ..CodecConfig::default()
        };
        let signal = render(&config, b"too long");
        let demod = UltrasonicDemodulator::new(&config).unwrap();
        match demod.recover_bits(&signal) {
            Err(StegoError::SyncError(SyncFailure::LengthOutOfRange { declared, limit })) => {
                assert_eq!((declared, limit), (8, 4));
            }
            other => panic!("Expected LengthOutOfRange, got {:?}", other),
        }
    }

    #[test]
    fn test_quiet_tail_stops_extraction() {
        let config = CodecConfig::default();
        let full = render(&config, b"abcdef");
        // Keep header and two groups, silence the rest
        let keep = (PREAMBLE_BITS + LENGTH_FIELD_BITS + 18) * 480;
        let mut samples = full.samples.clone();
        samples[keep..].iter_mut().for_each(|s| *s = 0.0);

        let demod = UltrasonicDemodulator::new(&config).unwrap();
        match demod.recover_bits(&Signal::new(samples, 48_000)) {
            Err(StegoError::SyncError(SyncFailure::Truncated { needed, .. })) => {
                assert_eq!(needed, frame_bit_len(6));
            }
            other => panic!("Expected Truncated, got {:?}", other),
        }
    }

    #[test]
    fn test_resamples_foreign_rate() {
        let config = CodecConfig::default();
        let payload = b"hi";
        let native = pad(&render(&config, payload), 2_400, 2_400);
        let upsampled = native.resampled(96_000);

        let recovered = UltrasonicDemodulator::new(&config)
            .unwrap()
            .recover_bits(&upsampled)
            .unwrap();
        assert_eq!(recovered.bits, FrameEncoder::build_frame(payload).unwrap());
    }
}

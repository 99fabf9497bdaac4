use crate::error::{Result, StegoError};

// Channel defaults
//
// Frequency plan:
// - Bit 0 at 18.5 kHz, bit 1 at 19.5 kHz
// - 1 kHz separation keeps the two tones orthogonal over a 10 ms bit
//   (exactly 10 cycles apart)
// - Both sit above typical adult hearing but below 24 kHz Nyquist at 48 kHz
//
// Bit timing (at 48 kHz):
// - 10 ms per bit = 480 samples, 100 bits/sec raw
pub const DEFAULT_FREQ_0: f32 = 18_500.0;
pub const DEFAULT_FREQ_1: f32 = 19_500.0;
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_BIT_DURATION: f32 = 0.01;
pub const DEFAULT_AMPLITUDE: f32 = 0.2;
pub const DEFAULT_DETECTION_THRESHOLD: f32 = 0.01;
pub const DEFAULT_ERROR_TOLERANCE: f32 = 0.10;

/// Minimum preamble score (mean tone contrast over the 24 preamble bits).
pub const DEFAULT_SYNC_THRESHOLD: f32 = 0.5;

/// Relative power difference below which a bit decision is low confidence.
pub const DEFAULT_MIN_POWER_RATIO: f32 = 0.05;

/// Extra pass band on each side of the tone pair.
pub const DEFAULT_GUARD_BAND_HZ: f32 = 1_000.0;

/// Consecutive near-silent bits that end extraction early.
pub const DEFAULT_LOW_POWER_RUN: usize = 5;

pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;

/// Immutable channel configuration passed into every codec call.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecConfig {
    /// Tone for bit 0 (Hz)
    pub freq_0: f32,
    /// Tone for bit 1 (Hz)
    pub freq_1: f32,
    pub sample_rate: u32,
    /// Seconds per bit
    pub bit_duration: f32,
    /// Peak amplitude of each tone, in (0, 1]
    pub amplitude: f32,
    /// In-band strength a signal must exceed to be considered present
    pub detection_threshold: f32,
    /// Largest accepted fraction of mismatched parity bits
    pub error_tolerance: f32,
    pub sync_threshold: f32,
    pub min_power_ratio: f32,
    pub guard_band_hz: f32,
    pub low_power_run: usize,
    pub max_payload_bytes: usize,
    /// Prepend random-length padding before framing
    pub obfuscate: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            freq_0: DEFAULT_FREQ_0,
            freq_1: DEFAULT_FREQ_1,
            sample_rate: DEFAULT_SAMPLE_RATE,
            bit_duration: DEFAULT_BIT_DURATION,
            amplitude: DEFAULT_AMPLITUDE,
            detection_threshold: DEFAULT_DETECTION_THRESHOLD,
            error_tolerance: DEFAULT_ERROR_TOLERANCE,
            sync_threshold: DEFAULT_SYNC_THRESHOLD,
            min_power_ratio: DEFAULT_MIN_POWER_RATIO,
            guard_band_hz: DEFAULT_GUARD_BAND_HZ,
            low_power_run: DEFAULT_LOW_POWER_RUN,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            obfuscate: true,
        }
    }
}

impl CodecConfig {
    /// Copy of this configuration with a different tone pair.
    pub fn with_frequencies(&self, freq_0: f32, freq_1: f32) -> Self {
        Self {
            freq_0,
            freq_1,
            ..self.clone()
        }
    }

    pub fn nyquist(&self) -> f32 {
        self.sample_rate as f32 / 2.0
    }

    /// Samples per bit, rounded to the nearest whole sample
    pub fn samples_per_bit(&self) -> usize {
        (self.sample_rate as f64 * self.bit_duration as f64).round() as usize
    }

    /// (low, high) tone frequencies
    pub fn frequency_range(&self) -> (f32, f32) {
        (self.freq_0.min(self.freq_1), self.freq_0.max(self.freq_1))
    }

    /// Pass band of the demodulator's band-limiting filter.
    pub fn pass_band(&self) -> (f32, f32) {
        let (low, high) = self.frequency_range();
        let nyquist = self.nyquist();
        let low_edge = (low - self.guard_band_hz).max(100.0);
        let high_edge = (high + self.guard_band_hz).min(nyquist - 100.0);
        (low_edge, high_edge)
    }

    /// Reject parameters that cannot produce or recover a valid channel.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(StegoError::InvalidConfig("sample rate must be positive".into()));
        }

        let nyquist = self.nyquist();
        for frequency in [self.freq_0, self.freq_1] {
            if !(frequency > 0.0) {
                return Err(StegoError::InvalidConfig(format!(
                    "tone frequency must be positive, got {}",
                    frequency
                )));
            }
            if frequency >= nyquist {
                return Err(StegoError::NyquistViolation { frequency, nyquist });
            }
        }
        if self.freq_0 == self.freq_1 {
            return Err(StegoError::InvalidConfig("freq_0 and freq_1 must differ".into()));
        }

        if !(self.bit_duration > 0.0) || self.samples_per_bit() == 0 {
            return Err(StegoError::InvalidConfig(format!(
                "bit duration {} s yields no samples at {} Hz",
                self.bit_duration, self.sample_rate
            )));
        }
        if !(self.amplitude > 0.0 && self.amplitude <= 1.0) {
            return Err(StegoError::InvalidConfig(format!(
                "amplitude must be in (0, 1], got {}",
                self.amplitude
            )));
        }
        if !(self.detection_threshold >= 0.0) {
            return Err(StegoError::InvalidConfig("detection threshold must be >= 0".into()));
        }
        if !(0.0..=1.0).contains(&self.error_tolerance) {
            return Err(StegoError::InvalidConfig(format!(
                "error tolerance must be in [0, 1], got {}",
                self.error_tolerance
            )));
        }
        if !(self.sync_threshold > 0.0 && self.sync_threshold <= 1.0) {
            return Err(StegoError::InvalidConfig(format!(
                "sync threshold must be in (0, 1], got {}",
                self.sync_threshold
            )));
        }
        if !(0.0..1.0).contains(&self.min_power_ratio) {
            return Err(StegoError::InvalidConfig("min power ratio must be in [0, 1)".into()));
        }
        if !(self.guard_band_hz >= 0.0) {
            return Err(StegoError::InvalidConfig("guard band must be >= 0".into()));
        }
        let (low_edge, high_edge) = self.pass_band();
        if low_edge >= high_edge {
            return Err(StegoError::InvalidConfig(format!(
                "empty pass band {}..{} Hz",
                low_edge, high_edge
            )));
        }
        if self.low_power_run == 0 {
            return Err(StegoError::InvalidConfig("low power run must be at least 1 bit".into()));
        }
        if self.max_payload_bytes == 0 || self.max_payload_bytes > u16::MAX as usize {
            return Err(StegoError::InvalidConfig(format!(
                "max payload must be in 1..={}, got {}",
                u16::MAX,
                self.max_payload_bytes
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CodecConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.samples_per_bit(), 480);
        assert_eq!(config.frequency_range(), (18_500.0, 19_500.0));
    }

    #[test]
    fn test_nyquist_violation() {
        let config = CodecConfig::default().with_frequencies(18_500.0, 24_000.0);
        match config.validate() {
            Err(StegoError::NyquistViolation { frequency, nyquist }) => {
                assert_eq!(frequency, 24_000.0);
                assert_eq!(nyquist, 24_000.0);
            }
            other => panic!("Expected NyquistViolation, got {:?}", other),
        }

        let low_rate = CodecConfig {
            sample_rate: 32_000,
            ..CodecConfig::default()
        };
        assert!(matches!(
            low_rate.validate(),
            Err(StegoError::NyquistViolation { .. })
        ));
    }

    #[test]
    fn test_invalid_amplitude_and_tolerance() {
        let zero_amp = CodecConfig {
            amplitude: 0.0,
            ..CodecConfig::default()
        };
        assert!(matches!(zero_amp.validate(), Err(StegoError::InvalidConfig(_))));

        let tolerance = CodecConfig {
            error_tolerance: 1.5,
            ..CodecConfig::default()
        };
        assert!(matches!(tolerance.validate(), Err(StegoError::InvalidConfig(_))));
    }

    #[test]
    fn test_pass_band_clamped_below_nyquist() {
        let config = CodecConfig::default().with_frequencies(21_000.0, 23_500.0);
        let (low, high) = config.pass_band();
        assert_eq!(low, 20_000.0);
        assert_eq!(high, 23_900.0);
    }

    #[test]
    fn test_payload_limit_bounds() {
        for limit in [0, u16::MAX as usize + 1] {
            let config = CodecConfig {
                max_payload_bytes: limit,
                ..CodecConfig::default()
            };
            assert!(matches!(config.validate(), Err(StegoError::InvalidConfig(_))));
        }
        let widest = CodecConfig {
            max_payload_bytes: u16::MAX as usize,
            ..CodecConfig::default()
        };
        assert!(widest.validate().is_ok());
    }

    #[test]
    fn test_identical_tones_rejected() {
        let config = CodecConfig::default().with_frequencies(19_000.0, 19_000.0);
        assert!(matches!(config.validate(), Err(StegoError::InvalidConfig(_))));
    }
}

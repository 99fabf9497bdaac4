use crate::config::CodecConfig;
use crate::correlate::SlidingEnergy;
use crate::error::{Result, StegoError};
use crate::filter::BandPass;
use crate::framing::PREAMBLE_BITS;
use crate::signal::Signal;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::f32::consts::PI;

/// Lowest frequency considered when listing dominant tones.
pub const ULTRASONIC_FLOOR_HZ: f32 = 15_000.0;

/// Welch frame length for spectral estimates.
const SPECTRUM_FRAME: usize = 4096;
/// Shortest signal for which a spectrum is computed.
const MIN_SPECTRUM_FRAME: usize = 256;
/// Peaks below this fraction of the strongest in-band bin are ignored.
const PEAK_FLOOR_RATIO: f32 = 0.1;
const MAX_PEAKS: usize = 5;

/// Result of a presence check on one signal
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub has_signal: bool,
    /// Peak in-band RMS, in [0, 1]
    pub strength: f32,
    /// Strongest in-band spectral peaks (Hz), strongest first
    pub dominant_frequencies: Vec<f32>,
}

/// In-band energy and spectral inspection for the configured tone pair
pub struct SignalAnalyzer {
    config: CodecConfig,
    filter: BandPass,
}

impl SignalAnalyzer {
    pub fn new(config: &CodecConfig) -> Result<Self> {
        config.validate()?;
        let (low, high) = config.pass_band();
        Ok(Self {
            config: config.clone(),
            filter: BandPass::new(low, high, config.sample_rate),
        })
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Samples of `signal` at the configured rate.
    ///
    /// # Errors
    /// `NyquistViolation` when the signal's rate cannot carry the upper tone.
    pub fn conform(&self, signal: &Signal) -> Result<Vec<f32>> {
        if signal.sample_rate == self.config.sample_rate {
            return Ok(signal.samples.clone());
        }
        if signal.sample_rate == 0 {
            return Err(StegoError::InvalidConfig("signal sample rate is zero".into()));
        }

        let nyquist = signal.sample_rate as f32 / 2.0;
        let (_, high) = self.config.frequency_range();
        if high >= nyquist {
            return Err(StegoError::NyquistViolation {
                frequency: high,
                nyquist,
            });
        }

        log::debug!(
            "Resampling {} samples from {} Hz to {} Hz",
            signal.len(),
            signal.sample_rate,
            self.config.sample_rate
        );
        Ok(signal.resampled(self.config.sample_rate).samples)
    }

    /// Band-limit samples already at the configured rate.
    pub fn band_limit(&self, samples: &[f32]) -> Vec<f32> {
        self.filter.apply(samples)
    }

    /// Peak RMS of already band-limited samples over preamble-length windows.
    pub fn in_band_strength(&self, filtered: &[f32]) -> f32 {
        if filtered.is_empty() {
            return 0.0;
        }

        let window = PREAMBLE_BITS * self.config.samples_per_bit();
        if filtered.len() <= window {
            let energy: f64 = filtered.iter().map(|&x| x as f64 * x as f64).sum();
            return ((energy / filtered.len() as f64).sqrt() as f32).min(1.0);
        }

        let energy = SlidingEnergy::new(filtered, window);
        let hop = (window / 2).max(1);
        let last = filtered.len() - window;

        let peak = (0..=last)
            .step_by(hop)
            .chain(std::iter::once(last))
            .map(|start| energy.energy(start))
            .fold(0.0f64, f64::max);

        ((peak / window as f64).sqrt() as f32).min(1.0)
    }

    /// In-band signal strength in [0, 1].
    pub fn strength(&self, signal: &Signal) -> Result<f32> {
        let samples = self.conform(signal)?;
        Ok(self.in_band_strength(&self.band_limit(&samples)))
    }

    pub fn detect_presence(&self, signal: &Signal) -> Result<bool> {
        Ok(self.strength(signal)? > self.config.detection_threshold)
    }

    /// Spectral peaks in the ultrasonic band, strongest first.
    pub fn dominant_frequencies(&self, signal: &Signal) -> Result<Vec<f32>> {
        let samples = self.conform(signal)?;
        Ok(self.spectral_peaks(&samples))
    }

    pub fn analyze(&self, signal: &Signal) -> Result<DetectionResult> {
        let samples = self.conform(signal)?;
        let strength = self.in_band_strength(&self.band_limit(&samples));
        let has_signal = strength > self.config.detection_threshold;

        log::debug!(
            "Analysis: strength {:.4} (threshold {:.4}), present: {}",
            strength,
            self.config.detection_threshold,
            has_signal
        );

        Ok(DetectionResult {
            has_signal,
            strength,
            dominant_frequencies: self.spectral_peaks(&samples),
        })
    }

    fn spectral_peaks(&self, samples: &[f32]) -> Vec<f32> {
        let Some(spectrum) = welch_magnitude(samples) else {
            return Vec::new();
        };
        let fft_len = (spectrum.len() - 1) * 2;
        let bin_hz = self.config.sample_rate as f32 / fft_len as f32;

        let (low, _) = self.config.frequency_range();
        let floor_hz = ULTRASONIC_FLOOR_HZ.max(low - self.config.guard_band_hz);
        let first = ((floor_hz / bin_hz).ceil() as usize).max(1);
        // Nyquist bin excluded
        let end = spectrum.len() - 1;
        if first >= end {
            return Vec::new();
        }

        let band_max = spectrum[first..end].iter().cloned().fold(0.0f32, f32::max);
        if band_max <= f32::EPSILON {
            return Vec::new();
        }
        let floor = band_max * PEAK_FLOOR_RATIO;

        let mut peaks: Vec<(f32, f32)> = (first..end)
            .filter(|&k| {
                let m = spectrum[k];
                m >= floor && m > spectrum[k - 1] && m >= spectrum[k + 1]
            })
            .map(|k| (interpolate_peak(&spectrum, k) * bin_hz, spectrum[k]))
            .collect();

        peaks.sort_by(|a, b| b.1.total_cmp(&a.1));
        peaks.truncate(MAX_PEAKS);
        peaks.into_iter().map(|(freq, _)| freq).collect()
    }
}

/// Average Hann-windowed FFT magnitude over half-overlapping frames.
///
/// Returns bins `0..=n/2`, or `None` for signals too short to analyze.
fn welch_magnitude(samples: &[f32]) -> Option<Vec<f32>> {
    let frame = if samples.len() >= SPECTRUM_FRAME {
        SPECTRUM_FRAME
    } else if samples.len() >= MIN_SPECTRUM_FRAME {
        // Largest power of two that fits
        1 << (usize::BITS - 1 - samples.len().leading_zeros())
    } else {
        return None;
    };
    let hop = frame / 2;

    let window: Vec<f32> = (0..frame)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / frame as f32).cos())
        .collect();

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(frame);
    let mut accum = vec![0.0f32; frame / 2 + 1];
    let mut buffer = vec![Complex::new(0.0f32, 0.0f32); frame];
    let mut frames = 0usize;

    let mut start = 0;
    while start + frame <= samples.len() {
        for (slot, (&x, &w)) in buffer
            .iter_mut()
            .zip(samples[start..start + frame].iter().zip(window.iter()))
        {
            *slot = Complex::new(x * w, 0.0);
        }
        fft.process(&mut buffer);
        for (acc, bin) in accum.iter_mut().zip(buffer.iter()) {
            *acc += bin.norm();
        }
        frames += 1;
        start += hop;
    }

    let scale = 1.0 / frames.max(1) as f32;
    accum.iter_mut().for_each(|m| *m *= scale);
    Some(accum)
}

/// Fractional bin of a peak by parabolic interpolation over its neighbours.
fn interpolate_peak(spectrum: &[f32], k: usize) -> f32 {
    let (a, b, c) = (spectrum[k - 1], spectrum[k], spectrum[k + 1]);
    let denom = a - 2.0 * b + c;
    if denom.abs() <= f32::EPSILON {
        return k as f32;
    }
    let offset = 0.5 * (a - c) / denom;
    k as f32 + offset.clamp(-0.5, 0.5)
}

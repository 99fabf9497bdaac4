//! Sliding tone correlation
//!
//! For a window of `N` samples starting at `s`, the correlation with a tone
//! of angular frequency `w` is
//!
//! ```text
//! X(s) = sum_{k<N} x[s+k] * e^{-j w k}
//! ```
//!
//! Its real part is the dot product with a reference cosine and its imaginary
//! part the dot product with a reference sine, so `|X(s)|` does not depend on
//! the carrier phase inside the window. Because `|X(s)|` equals
//! `|P[s+N] - P[s]|` for the running sum `P[m] = sum_{i<m} x[i] e^{-j w i}`,
//! every window position costs O(1) after one O(len) pass.

use rustfft::num_complex::Complex;
use std::f64::consts::TAU;

/// Running correlation of one signal against one tone
pub struct ToneCorrelator {
    window: usize,
    prefix: Vec<Complex<f64>>,
}

impl ToneCorrelator {
    pub fn new(samples: &[f32], frequency: f32, sample_rate: u32, window: usize) -> Self {
        let step = TAU * frequency as f64 / sample_rate as f64;
        let mut prefix = Vec::with_capacity(samples.len() + 1);
        let mut acc = Complex::new(0.0f64, 0.0f64);
        prefix.push(acc);

        for (m, &x) in samples.iter().enumerate() {
            let (sin, cos) = (step * m as f64).sin_cos();
            acc += Complex::new(x as f64 * cos, -(x as f64) * sin);
            prefix.push(acc);
        }

        Self { window, prefix }
    }

    /// Correlation magnitude of the window starting at `start`.
    pub fn magnitude(&self, start: usize) -> f64 {
        match self.prefix.get(start + self.window) {
            Some(end) => (end - self.prefix[start]).norm(),
            None => 0.0,
        }
    }
}

/// Running window energy
pub struct SlidingEnergy {
    window: usize,
    prefix: Vec<f64>,
}

impl SlidingEnergy {
    pub fn new(samples: &[f32], window: usize) -> Self {
        let mut prefix = Vec::with_capacity(samples.len() + 1);
        let mut acc = 0.0f64;
        prefix.push(acc);
        for &x in samples {
            acc += x as f64 * x as f64;
            prefix.push(acc);
        }
        Self { window, prefix }
    }

    pub fn energy(&self, start: usize) -> f64 {
        match self.prefix.get(start + self.window) {
            Some(end) => (end - self.prefix[start]).max(0.0),
            None => 0.0,
        }
    }
}

/// Energy below which a window is treated as silent
const SILENT_WINDOW_ENERGY: f64 = 1e-12;

/// Both FSK tones correlated against one signal at bit-window granularity
pub struct BitCorrelator {
    window: usize,
    len: usize,
    zero: ToneCorrelator,
    one: ToneCorrelator,
    energy: SlidingEnergy,
}

impl BitCorrelator {
    pub fn new(samples: &[f32], freq_0: f32, freq_1: f32, sample_rate: u32, window: usize) -> Self {
        Self {
            window,
            len: samples.len(),
            zero: ToneCorrelator::new(samples, freq_0, sample_rate, window),
            one: ToneCorrelator::new(samples, freq_1, sample_rate, window),
            energy: SlidingEnergy::new(samples, window),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Length of the correlated signal in samples
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether a full window fits at `start`
    pub fn fits(&self, start: usize) -> bool {
        start + self.window <= self.len
    }

    /// Raw correlation magnitudes `(power_0, power_1)` of one bit window
    pub fn powers(&self, start: usize) -> (f64, f64) {
        (self.zero.magnitude(start), self.one.magnitude(start))
    }

    /// Tone amplitude implied by a correlation magnitude
    pub fn amplitude(&self, magnitude: f64) -> f64 {
        2.0 * magnitude / self.window as f64
    }

    /// Correlations normalized to [0, 1]; a clean tone scores 1 on its own
    /// frequency regardless of level.
    pub fn normalized(&self, start: usize) -> (f64, f64) {
        let energy = self.energy.energy(start);
        if energy < SILENT_WINDOW_ENERGY {
            return (0.0, 0.0);
        }
        let scale = (energy * self.window as f64 / 2.0).sqrt();
        let (p0, p1) = self.powers(start);
        ((p0 / scale).min(1.0), (p1 / scale).min(1.0))
    }
}

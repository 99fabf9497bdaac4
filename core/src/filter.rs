//! Butterworth band-limiting for the receiver
//!
//! The band-pass is a cascade of a Butterworth high-pass at the lower edge and
//! a Butterworth low-pass at the upper edge, each built from second-order
//! sections designed with the bilinear transform (cutoff pre-warped).
//! Filtering runs forward then backward so tone boundaries stay where the
//! transmitter put them.

use std::f64::consts::PI;

/// Butterworth order of each edge.
pub const BUTTERWORTH_ORDER: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Lowpass,
    Highpass,
}

/// Second-order section, Direct Form II Transposed.
///
/// H(z) = (b0 + b1 z^-1 + b2 z^-2) / (1 + a1 z^-1 + a2 z^-2)
#[derive(Debug, Clone)]
struct Biquad {
    b: [f64; 3],
    a: [f64; 2],
    state: [f64; 2],
}

impl Biquad {
    fn new(edge: Edge, cutoff_hz: f64, sample_rate: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * cutoff_hz / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);
        let a0 = 1.0 + alpha;

        let b = match edge {
            Edge::Lowpass => {
                let k = (1.0 - cos_w0) / 2.0;
                [k, 1.0 - cos_w0, k]
            }
            Edge::Highpass => {
                let k = (1.0 + cos_w0) / 2.0;
                [k, -(1.0 + cos_w0), k]
            }
        };

        Self {
            b: [b[0] / a0, b[1] / a0, b[2] / a0],
            a: [-2.0 * cos_w0 / a0, (1.0 - alpha) / a0],
            state: [0.0; 2],
        }
    }

    fn process(&mut self, input: f64) -> f64 {
        let output = self.b[0] * input + self.state[0];
        self.state[0] = self.b[1] * input - self.a[0] * output + self.state[1];
        self.state[1] = self.b[2] * input - self.a[1] * output;
        output
    }

    fn reset(&mut self) {
        self.state = [0.0; 2];
    }
}

/// Q of each second-order section of an even-order Butterworth filter
fn butterworth_q(order: usize) -> Vec<f64> {
    (0..order / 2)
        .map(|k| 1.0 / (2.0 * (PI * (2 * k + 1) as f64 / (2 * order) as f64).sin()))
        .collect()
}

fn design(edge: Edge, order: usize, cutoff_hz: f64, sample_rate: f64) -> Vec<Biquad> {
    butterworth_q(order)
        .into_iter()
        .map(|q| Biquad::new(edge, cutoff_hz, sample_rate, q))
        .collect()
}

/// Zero-phase Butterworth band-pass
#[derive(Debug, Clone)]
pub struct BandPass {
    sections: Vec<Biquad>,
    low_hz: f32,
    high_hz: f32,
}

impl BandPass {
    /// Design a band-pass passing `low_hz..high_hz`.
    ///
    /// Callers guarantee `0 < low_hz < high_hz < sample_rate / 2`.
    pub fn new(low_hz: f32, high_hz: f32, sample_rate: u32) -> Self {
        let rate = sample_rate as f64;
        let mut sections = design(Edge::Highpass, BUTTERWORTH_ORDER, low_hz as f64, rate);
        sections.extend(design(Edge::Lowpass, BUTTERWORTH_ORDER, high_hz as f64, rate));

        Self {
            sections,
            low_hz,
            high_hz,
        }
    }

    pub fn band(&self) -> (f32, f32) {
        (self.low_hz, self.high_hz)
    }

    fn run(&self, data: &mut [f64]) {
        let mut sections = self.sections.clone();
        for section in sections.iter_mut() {
            section.reset();
            for x in data.iter_mut() {
                *x = section.process(*x);
            }
        }
    }

    /// Filter forward and backward (zero phase, squared magnitude response).
    pub fn apply(&self, samples: &[f32]) -> Vec<f32> {
        let mut data: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
        self.run(&mut data);
        data.reverse();
        self.run(&mut data);
        data.reverse();
        data.into_iter().map(|x| x as f32).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f64, sample_rate: f64, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f64 / sample_rate).sin() as f32)
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_butterworth_q_values() {
        let q = butterworth_q(4);
        assert_eq!(q.len(), 2);
        assert!((q[0] - 1.3066).abs() < 1e-3);
        assert!((q[1] - 0.5412).abs() < 1e-3);
    }

    #[test]
    fn test_biquads_are_stable() {
        let filter = BandPass::new(17_500.0, 20_500.0, 48_000);
        for section in &filter.sections {
            let [a1, a2] = section.a;
            assert!(a2.abs() < 1.0 && a1.abs() < 1.0 + a2);
        }
    }

    #[test]
    fn test_passes_center_rejects_audible() {
        let filter = BandPass::new(17_500.0, 20_500.0, 48_000);
        let n = 9_600;

        let in_band = filter.apply(&tone(19_000.0, 48_000.0, n));
        let audible = filter.apply(&tone(1_000.0, 48_000.0, n));

        // Measure away from the edges
        let mid = n / 4..3 * n / 4;
        let pass = rms(&in_band[mid.clone()]);
        let stop = rms(&audible[mid]);

        assert!(pass > 0.5, "in-band rms {}", pass);
        assert!(stop < 1e-3, "audible rms {}", stop);
    }

    #[test]
    fn test_edge_gain_is_half_power_squared() {
        // Each pass is -3 dB at the cutoff, forward+backward gives -6 dB (x0.5)
        let filter = BandPass::new(17_500.0, 20_500.0, 48_000);
        let n = 19_200;
        let out = filter.apply(&tone(17_500.0, 48_000.0, n));
        let gain = rms(&out[n / 4..3 * n / 4]) / (1.0 / 2f32.sqrt());
        assert!((gain - 0.5).abs() < 0.08, "edge gain {}", gain);
    }

    #[test]
    fn test_zero_phase() {
        let filter = BandPass::new(17_500.0, 20_500.0, 48_000);
        let input = tone(19_000.0, 48_000.0, 9_600);
        let output = filter.apply(&input);

        // Correlation at lag 0 should dominate neighbouring lags
        let corr = |lag: usize| -> f32 {
            (2_000..7_000).map(|i| input[i] * output[i + lag]).sum()
        };
        assert!(corr(0) > corr(1));
        assert!(corr(0) > 0.0);
    }
}

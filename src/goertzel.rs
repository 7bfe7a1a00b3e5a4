use std::f32::consts::PI;

/// A bank of Goertzel filters sharing one Hamming analysis window.
///
/// Amplitudes are normalized so that a steady sinusoid of amplitude `A` at a
/// bank frequency reads as roughly `A`.
pub struct GoertzelBank {
    coeffs: Vec<f32>,
    window: Vec<f32>,
    norm: f32,
    state: Vec<(f32, f32)>,
}

impl GoertzelBank {
    pub fn new(frequencies: &[f32], sample_rate: u32, window_len: usize) -> Self {
        let coeffs = frequencies
            .iter()
            .map(|&f| 2.0 * (2.0 * PI * f / sample_rate as f32).cos())
            .collect();
        let window = hamming_window(window_len);
        let sum: f32 = window.iter().sum();

        Self {
            coeffs,
            window,
            norm: if sum > 0.0 { 2.0 / sum } else { 0.0 },
            state: vec![(0.0, 0.0); frequencies.len()],
        }
    }

    pub fn len(&self) -> usize {
        self.coeffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coeffs.is_empty()
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Run every filter over `head` followed by `tail`, oldest sample first.
    /// The two slices together must hold exactly `window_len` samples, which
    /// lets callers pass the two halves of a ring buffer without copying.
    pub fn evaluate(&mut self, head: &[f32], tail: &[f32], amplitudes: &mut [f32]) {
        debug_assert_eq!(head.len() + tail.len(), self.window.len());
        debug_assert_eq!(amplitudes.len(), self.coeffs.len());

        for s in self.state.iter_mut() {
            *s = (0.0, 0.0);
        }

        let samples = head.iter().chain(tail.iter());
        for (&sample, &weight) in samples.zip(self.window.iter()) {
            let x = sample * weight;
            for (state, &coeff) in self.state.iter_mut().zip(self.coeffs.iter()) {
                let s0 = x + coeff * state.0 - state.1;
                state.1 = state.0;
                state.0 = s0;
            }
        }

        for ((amplitude, &(s1, s2)), &coeff) in amplitudes
            .iter_mut()
            .zip(self.state.iter())
            .zip(self.coeffs.iter())
        {
            let power = (s1 * s1 + s2 * s2 - coeff * s1 * s2).max(0.0);
            *amplitude = power.sqrt() * self.norm;
        }
    }
}

/// Amplitude of `frequency` in `samples` with a rectangular window.
pub fn amplitude(samples: &[f32], frequency: f32, sample_rate: u32) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let coeff = 2.0 * (2.0 * PI * frequency / sample_rate as f32).cos();

    let mut s1 = 0.0f32;
    let mut s2 = 0.0f32;
    for &sample in samples {
        let s0 = sample + coeff * s1 - s2;
        s2 = s1;
        s1 = s0;
    }

    let power = (s1 * s1 + s2 * s2 - coeff * s1 * s2).max(0.0);
    power.sqrt() * 2.0 / samples.len() as f32
}

pub fn hamming_window(len: usize) -> Vec<f32> {
    if len < 2 {
        return vec![1.0; len];
    }
    (0..len)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f32 / (len as f32 - 1.0)).cos())
        .collect()
}

//! FFT magnitude spectrum, used for diagnostics only.

use rustfft::{num_complex::Complex, FftPlanner};

/// `(frequency, magnitude)` pairs for the first `fft_size / 2` bins of the
/// zero-padded or truncated input.
pub fn analyze_spectrum(samples: &[f32], sample_rate: u32, fft_size: usize) -> Vec<(f32, f32)> {
    if fft_size == 0 {
        return Vec::new();
    }

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(fft_size);

    let mut input: Vec<Complex<f32>> = samples
        .iter()
        .take(fft_size)
        .map(|&s| Complex::new(s, 0.0))
        .collect();
    input.resize(fft_size, Complex::new(0.0, 0.0));

    fft.process(&mut input);

    let resolution = sample_rate as f32 / fft_size as f32;
    input
        .iter()
        .take(fft_size / 2)
        .enumerate()
        .map(|(i, c)| (i as f32 * resolution, c.norm() / fft_size as f32))
        .collect()
}

/// Frequency of the strongest bin, ignoring DC.
pub fn dominant_frequency(samples: &[f32], sample_rate: u32, fft_size: usize) -> Option<f32> {
    analyze_spectrum(samples, sample_rate, fft_size)
        .into_iter()
        .skip(1)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(frequency, _)| frequency)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_dominant_frequency() {
        let samples: Vec<f32> = (0..8192)
            .map(|i| (2.0 * PI * 2349.3 * i as f32 / 44100.0).sin())
            .collect();
        let peak = dominant_frequency(&samples, 44100, 8192).unwrap();
        assert!((peak - 2349.3).abs() < 44100.0 / 8192.0);
    }

    #[test]
    fn test_spectrum_shape() {
        let spectrum = analyze_spectrum(&[0.0; 100], 8000, 256);
        assert_eq!(spectrum.len(), 128);
        assert_eq!(spectrum[1].0, 8000.0 / 256.0);
        assert!(spectrum.iter().all(|&(_, m)| m == 0.0));
        assert!(analyze_spectrum(&[1.0], 8000, 0).is_empty());
        assert_eq!(dominant_frequency(&[], 8000, 0), None);
    }
}

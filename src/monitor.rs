use std::time::Duration;

/// Processing speed relative to real time over one measurement window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthReport {
    /// Seconds of audio processed per second of processing time.
    pub ratio: f64,
    pub samples: u64,
    pub elapsed: Duration,
}

impl HealthReport {
    pub fn new(samples: u64, elapsed: Duration, sample_rate: u32) -> Self {
        let audio = samples as f64 / sample_rate as f64;
        let spent = elapsed.as_secs_f64();
        let ratio = if spent > 0.0 { audio / spent } else { f64::INFINITY };
        Self {
            ratio,
            samples,
            elapsed,
        }
    }

    pub fn is_realtime(&self) -> bool {
        self.ratio >= 1.0
    }
}

/// Accumulates processing time reported by the host and emits a report every
/// `window` of audio.
#[derive(Debug)]
pub struct PerformanceMonitor {
    sample_rate: u32,
    window_samples: u64,
    samples: u64,
    elapsed: Duration,
    last: Option<HealthReport>,
}

impl PerformanceMonitor {
    pub fn new(sample_rate: u32, window: Duration) -> Self {
        let window_samples = (window.as_secs_f64() * sample_rate as f64).ceil() as u64;
        Self {
            sample_rate,
            window_samples: window_samples.max(1),
            samples: 0,
            elapsed: Duration::ZERO,
            last: None,
        }
    }

    pub fn record(&mut self, samples: usize, elapsed: Duration) -> Option<HealthReport> {
        self.samples += samples as u64;
        self.elapsed += elapsed;
        if self.samples < self.window_samples {
            return None;
        }

        let report = HealthReport::new(self.samples, self.elapsed, self.sample_rate);
        if !report.is_realtime() {
            log::warn!(
                "receiver is falling behind: {:.2}x real time over {} samples",
                report.ratio,
                report.samples
            );
        }
        self.samples = 0;
        self.elapsed = Duration::ZERO;
        self.last = Some(report);
        Some(report)
    }

    /// True until a finished window says otherwise.
    pub fn is_realtime(&self) -> bool {
        self.last.map_or(true, |r| r.is_realtime())
    }

    pub fn last_report(&self) -> Option<HealthReport> {
        self.last
    }
}

/// Time a scratch receiver over `audio_seconds` of rendered packets.
#[cfg(not(target_arch = "wasm32"))]
pub fn measure_throughput(
    protocol: std::sync::Arc<crate::config::ProtocolConfig>,
    sample_rate: u32,
    audio_seconds: f32,
) -> crate::error::Result<HealthReport> {
    use crate::demodulation::Demodulator;
    use crate::modulation::{render, Modulator};
    use std::time::Instant;

    protocol.check_sample_rate(sample_rate)?;

    let modulator = Modulator::new(protocol.clone())?;
    let symbols = protocol.alphabet().len();
    let payload: Vec<u8> = (0..protocol.payload_len())
        .map(|i| ((i * 7 + 3) % symbols) as u8)
        .collect();
    let packet = render(&modulator.modulate(&payload)?, sample_rate, 0.5);

    let wanted = (audio_seconds.max(0.0) * sample_rate as f32) as usize;
    let mut audio = Vec::with_capacity(wanted + packet.len());
    while audio.len() < wanted {
        audio.extend_from_slice(&packet);
    }

    let mut demodulator = Demodulator::new(protocol, sample_rate)?;
    let started = Instant::now();
    let mut decoded = 0;
    for &sample in &audio {
        if demodulator.push_sample(sample).is_some() {
            decoded += 1;
        }
    }
    let report = HealthReport::new(audio.len() as u64, started.elapsed(), sample_rate);
    log::info!(
        "processed {} samples ({} payloads) at {:.1}x real time",
        report.samples,
        decoded,
        report.ratio
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolConfig;

    #[test]
    fn test_report_ratio() {
        let report = HealthReport::new(48_000, Duration::from_millis(500), 48_000);
        assert!((report.ratio - 2.0).abs() < 1e-9);
        assert!(report.is_realtime());

        let slow = HealthReport::new(4_800, Duration::from_millis(200), 48_000);
        assert!((slow.ratio - 0.5).abs() < 1e-9);
        assert!(!slow.is_realtime());
    }

    #[test]
    fn test_monitor_windows() {
        let mut monitor = PerformanceMonitor::new(1000, Duration::from_secs(1));
        assert!(monitor.is_realtime());
        assert_eq!(monitor.record(600, Duration::from_millis(100)), None);

        let report = monitor.record(600, Duration::from_millis(100)).unwrap();
        assert_eq!(report.samples, 1200);
        assert!((report.ratio - 6.0).abs() < 1e-9);
        assert_eq!(monitor.last_report(), Some(report));

        let report = monitor.record(1000, Duration::from_secs(2)).unwrap();
        assert!(!report.is_realtime());
        assert!(!monitor.is_realtime());
    }

    #[test]
    fn test_measure_throughput() {
        let report = measure_throughput(ProtocolConfig::standard(), 44100, 1.0).unwrap();
        assert!(report.samples >= 44100);
        assert!(report.ratio > 0.0);

        assert!(measure_throughput(ProtocolConfig::standard(), 8000, 1.0).is_err());
    }
}

//! Streaming receiver.
//!
//! Samples go into a ring buffer one at a time. Every hop the Goertzel bank
//! runs over the newest half-beep window; those hop evaluations find the first
//! tone of a frame, estimate where it started and later track the edges between
//! differing tones. Symbols themselves are read from windows centred on each
//! slot of the resulting grid, which may lie slightly in the past. A full
//! frame is handed to the packet codec and only a valid payload is reported.

use crate::alphabet::Symbol;
use crate::codec::PacketCodec;
use crate::config::{DetectorConfig, ProtocolConfig};
use crate::error::{DecodeFailure, Result};
use crate::goertzel::GoertzelBank;
use log::{debug, trace};
use std::sync::Arc;

/// The strongest carrier may grow by at most this factor between two hops and
/// still count as settled.
const PLATEAU_GROWTH: f32 = 1.02;

/// Outcome of one evaluation of the filter bank.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Detection {
    Silence,
    Ambiguous { best: f32, second: f32 },
    Tone { symbol: Symbol, amplitude: f32 },
}

pub fn classify(amplitudes: &[f32], detector: &DetectorConfig) -> Detection {
    let mut best = 0;
    let mut best_amplitude = 0.0f32;
    let mut second = 0.0f32;

    for (i, &amplitude) in amplitudes.iter().enumerate() {
        if amplitude > best_amplitude {
            second = best_amplitude;
            best_amplitude = amplitude;
            best = i;
        } else if amplitude > second {
            second = amplitude;
        }
    }

    if best_amplitude < detector.min_amplitude {
        Detection::Silence
    } else if best_amplitude < detector.min_margin * second {
        Detection::Ambiguous {
            best: best_amplitude,
            second,
        }
    } else {
        Detection::Tone {
            symbol: best as Symbol,
            amplitude: best_amplitude,
        }
    }
}

fn argmax(amplitudes: &[f32]) -> (usize, f32) {
    amplitudes
        .iter()
        .enumerate()
        .fold((0, 0.0), |(i, m), (j, &a)| if a > m { (j, a) } else { (i, m) })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub payloads: u64,
    pub incomplete_frames: u64,
    /// Complete frames that failed the preamble or parity check.
    pub rejected_frames: u64,
    pub corrected_symbols: u64,
    pub ambiguous_slots: u64,
    pub resyncs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Idle,
    Acquiring { symbol: Symbol, detected_at: u64 },
    /// `onset` is the estimated first sample of the frame; slot `k` spans
    /// `onset + k * beep .. onset + (k + 1) * beep`.
    Locked { onset: f64, next_slot_at: u64 },
    AwaitSilence,
}

/// Fixed-size record of the most recent hop evaluations.
struct HopHistory {
    positions: Vec<u64>,
    amplitudes: Vec<f32>,
    width: usize,
    next: usize,
    len: usize,
}

impl HopHistory {
    fn new(capacity: usize, width: usize) -> Self {
        Self {
            positions: vec![0; capacity],
            amplitudes: vec![0.0; capacity * width],
            width,
            next: 0,
            len: 0,
        }
    }

    fn clear(&mut self) {
        self.next = 0;
        self.len = 0;
    }

    fn len(&self) -> usize {
        self.len
    }

    fn push(&mut self, position: u64, amplitudes: &[f32]) {
        let slot = self.next;
        self.positions[slot] = position;
        self.amplitudes[slot * self.width..(slot + 1) * self.width].copy_from_slice(amplitudes);
        self.next = (slot + 1) % self.positions.len();
        self.len = (self.len + 1).min(self.positions.len());
    }

    /// Entry `age` hops back; age 0 is the newest.
    fn get(&self, age: usize) -> (u64, &[f32]) {
        let capacity = self.positions.len();
        let slot = (self.next + capacity - 1 - age) % capacity;
        (
            self.positions[slot],
            &self.amplitudes[slot * self.width..(slot + 1) * self.width],
        )
    }
}

pub struct Demodulator {
    protocol: Arc<ProtocolConfig>,
    detector: DetectorConfig,
    sample_rate: u32,
    codec: PacketCodec,
    bank: GoertzelBank,
    beep: usize,
    window: usize,
    hop: usize,
    attack: usize,
    ring: Vec<f32>,
    position: u64,
    amplitudes: Vec<f32>,
    history: HopHistory,
    decoded: Vec<Symbol>,
    payload: Vec<Symbol>,
    state: State,
    muted: bool,
    stats: DecodeStats,
}

impl Demodulator {
    pub fn new(protocol: Arc<ProtocolConfig>, sample_rate: u32) -> Result<Self> {
        Self::with_detector(protocol, sample_rate, DetectorConfig::default())
    }

    pub fn with_detector(
        protocol: Arc<ProtocolConfig>,
        sample_rate: u32,
        detector: DetectorConfig,
    ) -> Result<Self> {
        let codec = PacketCodec::new(protocol.clone())?;
        let beep = protocol.beep_samples(sample_rate);
        let window = (beep / 2).max(1);
        let hop = (beep / detector.hops_per_beep.max(1)).max(1);
        let attack = protocol.attack_samples(sample_rate);
        let carriers = protocol.alphabet().len();
        let history_len = (2 * (window + attack + hop)) / hop + 3;

        Ok(Self {
            bank: GoertzelBank::new(protocol.alphabet().frequencies(), sample_rate, window),
            ring: vec![0.0; window + beep + hop],
            position: 0,
            amplitudes: vec![0.0; carriers],
            history: HopHistory::new(history_len, carriers),
            decoded: Vec::with_capacity(protocol.packet_len()),
            payload: Vec::with_capacity(protocol.payload_len()),
            state: State::Idle,
            muted: false,
            stats: DecodeStats::default(),
            beep,
            window,
            hop,
            attack,
            codec,
            protocol,
            detector,
            sample_rate,
        })
    }

    pub fn protocol(&self) -> &Arc<ProtocolConfig> {
        &self.protocol
    }

    pub fn detector(&self) -> &DetectorConfig {
        &self.detector
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// True while a frame is being acquired or read.
    pub fn is_receiving(&self) -> bool {
        matches!(self.state, State::Acquiring { .. } | State::Locked { .. })
    }

    /// Muting drops any partial frame and ignores input until unmuted. After
    /// unmuting the receiver first waits for silence.
    pub fn set_muted(&mut self, muted: bool) {
        if muted == self.muted {
            return;
        }
        self.muted = muted;
        self.decoded.clear();
        if muted {
            self.state = State::Idle;
        } else {
            self.clear_buffers();
            self.state = State::AwaitSilence;
        }
    }

    pub fn reset(&mut self) {
        self.clear_buffers();
        self.decoded.clear();
        self.state = State::Idle;
    }

    fn clear_buffers(&mut self) {
        self.ring.fill(0.0);
        self.position = 0;
        self.history.clear();
    }

    /// Feed one sample. Returns the payload when this sample completes one.
    pub fn push_sample(&mut self, sample: f32) -> Option<&[Symbol]> {
        if self.muted {
            return None;
        }

        let capacity = self.ring.len() as u64;
        self.ring[(self.position % capacity) as usize] = if sample.is_finite() { sample } else { 0.0 };
        self.position += 1;

        if self.position % self.hop as u64 == 0 {
            self.on_hop();
        }

        let mut completed = false;
        if let State::Locked { next_slot_at, .. } = self.state {
            if self.position >= next_slot_at {
                completed = self.on_slot(next_slot_at);
            }
        }

        if completed {
            Some(&self.payload)
        } else {
            None
        }
    }

    /// Evaluate the window ending just before sample `end`. Before the ring
    /// has filled, the unwritten zeros stand in for earlier silence.
    fn evaluate(&mut self, end: u64) -> Detection {
        let capacity = self.ring.len();
        let start = ((end + (capacity - self.window) as u64) % capacity as u64) as usize;
        let first = (capacity - start).min(self.window);
        let head = &self.ring[start..start + first];
        let tail = &self.ring[..self.window - first];
        self.bank.evaluate(head, tail, &mut self.amplitudes);
        classify(&self.amplitudes, &self.detector)
    }

    fn reachable(&self, end: u64) -> bool {
        end <= self.position && self.position - end <= (self.ring.len() - self.window) as u64
    }

    fn slot_end(&self, onset: f64, slot: usize) -> u64 {
        let centre = onset + (slot as f64 + 0.5) * self.beep as f64;
        (centre + self.window as f64 / 2.0).round().max(0.0) as u64
    }

    fn on_hop(&mut self) {
        let position = self.position;
        let detection = self.evaluate(position);
        self.history.push(position, &self.amplitudes);

        match self.state {
            State::Idle => {
                if let Detection::Tone { symbol, amplitude } = detection {
                    trace!("tone {} ({:.3}) at sample {}", symbol, amplitude, position);
                    self.state = State::Acquiring {
                        symbol,
                        detected_at: position,
                    };
                }
            }
            State::Acquiring {
                symbol,
                detected_at,
            } => self.acquire(detection, symbol, detected_at),
            State::Locked { onset, .. } => self.track_edge(onset),
            State::AwaitSilence => {
                if !matches!(detection, Detection::Tone { .. }) {
                    self.state = State::Idle;
                }
            }
        }
    }

    fn acquire(&mut self, detection: Detection, symbol: Symbol, detected_at: u64) {
        match detection {
            Detection::Silence => {
                trace!("tone {} vanished before it settled", symbol);
                self.state = State::Idle;
                return;
            }
            Detection::Tone { symbol: other, .. } if other != symbol => {
                debug!("tone changed from {} to {} during acquisition", symbol, other);
                self.state = State::AwaitSilence;
                return;
            }
            _ => {}
        }

        let s = symbol as usize;
        let current = self.history.get(0).1[s];
        let previous = if self.history.len() > 1 {
            self.history.get(1).1[s]
        } else {
            0.0
        };
        let hop = self.hop as u64;
        let settled = self.position >= detected_at + hop && current <= previous * PLATEAU_GROWTH;
        let deadline = detected_at + (self.window + self.attack) as u64 + hop;
        if !settled && self.position < deadline {
            return;
        }

        match self.estimate_onset(s) {
            Some(onset) => {
                debug!("locked on symbol {}, frame starts at sample {:.1}", symbol, onset);
                self.decoded.clear();
                self.state = State::Locked {
                    onset,
                    next_slot_at: self.slot_end(onset, 0),
                };
            }
            None => {
                debug!("could not find the start of tone {}", symbol);
                self.state = State::AwaitSilence;
            }
        }
    }

    /// Find where the carrier `s` crossed half its plateau and translate that
    /// into the first sample of the tone.
    fn estimate_onset(&self, s: usize) -> Option<f64> {
        let (newest_at, newest) = self.history.get(0);
        let mut plateau = newest[s];
        if self.history.len() > 1 {
            plateau = plateau.max(self.history.get(1).1[s]);
        }
        let half = plateau * 0.5;

        let mut newer = (newest_at, newest[s]);
        for age in 1..self.history.len() {
            let (at, amplitudes) = self.history.get(age);
            let amplitude = amplitudes[s];
            if amplitude < half {
                let fraction = ((half - amplitude) / (newer.1 - amplitude)) as f64;
                let crossing = at as f64 + fraction * (newer.0 - at) as f64;
                let onset = crossing - self.window as f64 / 2.0 - self.attack as f64 / 2.0;
                return (onset > -(self.hop as f64)).then_some(onset);
            }
            newer = (at, amplitude);
        }
        None
    }

    fn track_edge(&mut self, onset: f64) {
        if self.history.len() < 2 {
            return;
        }
        let (now, current) = self.history.get(0);
        let (before, previous) = self.history.get(1);
        if now - before != self.hop as u64 {
            return;
        }

        let (a, a_amplitude) = argmax(previous);
        let (b, b_amplitude) = argmax(current);
        if a == b
            || a_amplitude < self.detector.min_amplitude
            || b_amplitude < self.detector.min_amplitude
        {
            return;
        }

        let lead_before = previous[b] - previous[a];
        let lead_now = current[b] - current[a];
        if lead_now <= lead_before {
            return;
        }
        let fraction = (-lead_before / (lead_now - lead_before)) as f64;
        let crossing = before as f64 + fraction * self.hop as f64;
        let boundary = crossing - self.window as f64 / 2.0;

        self.resync(onset, boundary);
    }

    fn resync(&mut self, onset: f64, boundary: f64) {
        let beep = self.beep as f64;
        let slot = ((boundary - onset) / beep).round();
        if slot < 1.0 {
            return;
        }
        let correction = boundary - (onset + slot * beep);
        if correction.abs() >= beep / 4.0 {
            trace!("ignoring edge {:.1} samples off the slot grid", correction);
            return;
        }

        let onset = onset + correction;
        self.state = State::Locked {
            onset,
            next_slot_at: self.slot_end(onset, self.decoded.len()),
        };
        if correction.abs() >= 1.0 {
            trace!("slot grid moved by {:.1} samples", correction);
            self.stats.resyncs += 1;
        }
    }

    fn on_slot(&mut self, end: u64) -> bool {
        let detection = if self.reachable(end) {
            self.evaluate(end)
        } else {
            Detection::Silence
        };

        match detection {
            Detection::Tone { symbol, .. } => {
                self.decoded.push(symbol);
                if self.decoded.len() == self.protocol.packet_len() {
                    self.state = State::AwaitSilence;
                    return self.finish_frame();
                }
                if let State::Locked { onset, .. } = self.state {
                    self.state = State::Locked {
                        onset,
                        next_slot_at: self.slot_end(onset, self.decoded.len()),
                    };
                }
                false
            }
            Detection::Ambiguous { best, second } => {
                self.stats.ambiguous_slots += 1;
                debug!("{}", DecodeFailure::AmbiguousTone { best, second });
                self.abandon_frame();
                false
            }
            Detection::Silence => {
                self.abandon_frame();
                false
            }
        }
    }

    fn finish_frame(&mut self) -> bool {
        match self.codec.decode(&self.decoded, &mut self.payload) {
            Ok(repaired) => {
                self.stats.payloads += 1;
                self.stats.corrected_symbols += repaired as u64;
                debug!("decoded payload {:?}", self.payload);
                true
            }
            Err(failure) => {
                self.stats.rejected_frames += 1;
                debug!("rejecting frame {:?}: {}", self.decoded, failure);
                false
            }
        }
    }

    fn abandon_frame(&mut self) {
        let failure = DecodeFailure::FrameIncomplete {
            decoded: self.decoded.len(),
            expected: self.protocol.packet_len(),
        };
        debug!("dropping frame: {}", failure);
        self.stats.incomplete_frames += 1;
        self.decoded.clear();
        self.state = State::AwaitSilence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::Alphabet;
    use crate::modulation::{render, render_beep, Modulator};
    use std::f32::consts::PI;

    fn letters() -> Arc<ProtocolConfig> {
        Arc::new(
            ProtocolConfig::builder()
                .alphabet(Alphabet::linear("ABCDEFGH", 800.0, 100.0).unwrap())
                .payload_len(4)
                .unguarded()
                .build()
                .unwrap(),
        )
    }

    fn feed(demodulator: &mut Demodulator, samples: &[f32]) -> Vec<Vec<Symbol>> {
        samples
            .iter()
            .filter_map(|&s| demodulator.push_sample(s).map(|p| p.to_vec()))
            .collect()
    }

    fn packet(protocol: &Arc<ProtocolConfig>, payload: &[Symbol], sample_rate: u32) -> Vec<f32> {
        let plan = Modulator::new(protocol.clone())
            .unwrap()
            .modulate(payload)
            .unwrap();
        render(&plan, sample_rate, 0.5)
    }

    #[test]
    fn test_classify() {
        let detector = DetectorConfig::default();
        assert_eq!(classify(&[0.001, 0.002, 0.0], &detector), Detection::Silence);
        assert_eq!(
            classify(&[0.2, 0.1, 0.0], &detector),
            Detection::Ambiguous {
                best: 0.2,
                second: 0.1
            }
        );
        assert_eq!(
            classify(&[0.01, 0.4, 0.1], &detector),
            Detection::Tone {
                symbol: 1,
                amplitude: 0.4
            }
        );
    }

    #[test]
    fn test_decode_abcd() {
        let protocol = letters();
        let mut demodulator = Demodulator::new(protocol.clone(), 8000).unwrap();

        let mut samples = vec![0.0; 1000];
        samples.extend(packet(&protocol, &[0, 1, 2, 3], 8000));

        assert_eq!(feed(&mut demodulator, &samples), vec![vec![0, 1, 2, 3]]);
        assert_eq!(demodulator.stats().payloads, 1);
        assert_eq!(demodulator.stats().incomplete_frames, 0);
    }

    #[test]
    fn test_frame_at_stream_start() {
        let protocol = letters();
        let mut demodulator = Demodulator::new(protocol.clone(), 8000).unwrap();
        let samples = packet(&protocol, &[5, 1, 5, 1], 8000);

        assert_eq!(feed(&mut demodulator, &samples), vec![vec![5, 1, 5, 1]]);
    }

    #[test]
    fn test_back_to_back_packets() {
        let protocol = letters();
        let mut demodulator = Demodulator::new(protocol.clone(), 8000).unwrap();

        let mut samples = vec![0.0; 123];
        samples.extend(packet(&protocol, &[7, 0, 7, 0], 8000));
        samples.extend(packet(&protocol, &[3, 3, 3, 3], 8000));
        samples.extend(packet(&protocol, &[1, 6, 2, 5], 8000));

        assert_eq!(
            feed(&mut demodulator, &samples),
            vec![vec![7, 0, 7, 0], vec![3, 3, 3, 3], vec![1, 6, 2, 5]]
        );
    }

    #[test]
    fn test_truncated_frame_is_dropped() {
        let protocol = letters();
        let mut demodulator = Demodulator::new(protocol.clone(), 8000).unwrap();
        let beep = protocol.beep_samples(8000);

        let mut samples = vec![0.0; 500];
        let full = packet(&protocol, &[0, 1, 2, 3], 8000);
        samples.extend_from_slice(&full[..2 * beep]);
        samples.extend(vec![0.0; 4000]);

        assert!(feed(&mut demodulator, &samples).is_empty());
        let stats = demodulator.stats();
        assert_eq!(stats.payloads, 0);
        assert_eq!(stats.incomplete_frames, 1);
        assert!(!demodulator.is_receiving());
    }

    #[test]
    fn test_silence_decodes_nothing() {
        let mut demodulator = Demodulator::new(letters(), 8000).unwrap();
        assert!(feed(&mut demodulator, &vec![0.0; 20_000]).is_empty());
        assert_eq!(demodulator.stats(), DecodeStats::default());
    }

    #[test]
    fn test_muted_input_is_discarded() {
        let protocol = letters();
        let mut demodulator = Demodulator::new(protocol.clone(), 8000).unwrap();
        let mut samples = vec![0.0; 400];
        samples.extend(packet(&protocol, &[4, 5, 6, 7], 8000));

        demodulator.set_muted(true);
        assert!(demodulator.is_muted());
        assert!(feed(&mut demodulator, &samples).is_empty());

        demodulator.set_muted(false);
        assert_eq!(feed(&mut demodulator, &samples), vec![vec![4, 5, 6, 7]]);
    }

    #[test]
    fn test_mute_mid_frame() {
        let protocol = letters();
        let mut demodulator = Demodulator::new(protocol.clone(), 8000).unwrap();
        let mut samples = vec![0.0; 400];
        samples.extend(packet(&protocol, &[4, 5, 6, 7], 8000));
        let cut = 400 + 2 * protocol.beep_samples(8000);

        assert!(feed(&mut demodulator, &samples[..cut]).is_empty());
        assert!(demodulator.is_receiving());
        demodulator.set_muted(true);
        assert!(!demodulator.is_receiving());
        assert!(feed(&mut demodulator, &samples[cut..]).is_empty());
        assert_eq!(demodulator.stats().payloads, 0);
    }

    #[test]
    fn test_slot_grid_follows_tone_edges() {
        let protocol = ProtocolConfig::standard();
        let mut demodulator = Demodulator::new(protocol.clone(), 44100).unwrap();
        let payload: Vec<Symbol> = vec![0, 5, 1, 6, 2, 7, 3, 8, 4, 9];
        let wire = PacketCodec::new(protocol.clone())
            .unwrap()
            .encode(&payload)
            .unwrap();

        // every beep is 6% longer than the receiver expects
        let mut samples = vec![0.0; 2000];
        for &symbol in &wire {
            samples.extend(render_beep(
                protocol.alphabet().frequency(symbol),
                protocol.beep_time() * 1.06,
                protocol.attack_time(),
                protocol.release_time(),
                44100,
                0.5,
            ));
        }
        samples.extend(vec![0.0; protocol.gap_samples(44100)]);

        assert_eq!(feed(&mut demodulator, &samples), vec![payload]);
        assert!(demodulator.stats().resyncs > 0);
    }

    #[test]
    fn test_reset_clears_partial_frame() {
        let protocol = letters();
        let mut demodulator = Demodulator::new(protocol.clone(), 8000).unwrap();
        let mut samples = vec![0.0; 400];
        samples.extend(packet(&protocol, &[2, 2, 2, 2], 8000));
        let cut = 400 + protocol.beep_samples(8000) * 3 / 2;

        feed(&mut demodulator, &samples[..cut]);
        demodulator.reset();
        assert!(!demodulator.is_receiving());
        assert!(feed(&mut demodulator, &samples[cut..]).is_empty());
        assert_eq!(feed(&mut demodulator, &samples), vec![vec![2, 2, 2, 2]]);
    }

    #[test]
    fn test_standard_packet_decodes() {
        let protocol = ProtocolConfig::standard();
        let mut demodulator = Demodulator::new(protocol.clone(), 44100).unwrap();
        let payload = protocol.alphabet().parse("0he11o4bcd").unwrap();

        let mut samples = vec![0.0; 3000];
        samples.extend(packet(&protocol, &payload, 44100));

        assert_eq!(feed(&mut demodulator, &samples), vec![payload]);
        let stats = demodulator.stats();
        assert_eq!(stats.payloads, 1);
        assert_eq!(stats.rejected_frames, 0);
        assert_eq!(stats.corrected_symbols, 0);
    }

    #[test]
    fn test_steady_tone_is_not_a_payload() {
        let protocol = ProtocolConfig::standard();
        for symbol in [0, 17, 19, 31] {
            let frequency = protocol.alphabet().frequency(symbol);
            let mut samples: Vec<f32> = (0..2 * 44100)
                .map(|i| 0.3 * (2.0 * PI * frequency * i as f32 / 44100.0).sin())
                .collect();
            samples.extend(vec![0.0; 44100]);

            let mut demodulator = Demodulator::new(protocol.clone(), 44100).unwrap();
            assert!(feed(&mut demodulator, &samples).is_empty(), "symbol {}", symbol);
            let stats = demodulator.stats();
            assert_eq!(stats.payloads, 0);
            assert!(stats.rejected_frames >= 1, "symbol {}", symbol);
        }
    }

    #[test]
    fn test_frame_with_foreign_preamble_is_rejected() {
        let protocol = ProtocolConfig::standard();
        let foreign = Arc::new(
            ProtocolConfig::builder()
                .guard(crate::config::PacketGuard {
                    preamble: vec![4, 4],
                    parity_bytes: crate::PARITY_BYTES,
                })
                .build()
                .unwrap(),
        );
        let payload = protocol.alphabet().parse("0123456789").unwrap();

        let mut samples = vec![0.0; 3000];
        samples.extend(packet(&foreign, &payload, 44100));

        let mut demodulator = Demodulator::new(protocol, 44100).unwrap();
        assert!(feed(&mut demodulator, &samples).is_empty());
        assert_eq!(demodulator.stats().rejected_frames, 1);
    }
}

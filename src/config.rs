use crate::alphabet::{Alphabet, Symbol};
use crate::error::{Result, TransceiverError};
use crate::{
    ATTACK_TIME, BASE_FREQUENCY, BEEP_TIME, MAX_MESSAGE_LEN, PACKET_GAP_TIME, PARITY_BYTES,
    PAYLOAD_LEN, RELEASE_TIME, START_SYMBOLS, SYMBOL_MNEMONICS,
};
use std::sync::{Arc, OnceLock};

/// Preamble and parity wrapped around every payload on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketGuard {
    pub preamble: Vec<Symbol>,
    /// Reed-Solomon parity bytes; each one is sent as several symbols.
    pub parity_bytes: usize,
}

impl Default for PacketGuard {
    fn default() -> Self {
        Self {
            preamble: START_SYMBOLS.to_vec(),
            parity_bytes: PARITY_BYTES,
        }
    }
}

/// Alphabet and timing shared by every component of one link.
///
/// Modulator and demodulator stay synchronized only if they agree on these
/// values, so a single instance is built once and handed around as an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolConfig {
    alphabet: Alphabet,
    beep_time: f32,
    attack_time: f32,
    release_time: f32,
    packet_gap_time: f32,
    payload_len: usize,
    max_message_len: usize,
    guard: Option<PacketGuard>,
}

impl ProtocolConfig {
    /// The protocol described by the crate-level constants.
    pub fn standard() -> Arc<ProtocolConfig> {
        static STANDARD: OnceLock<Arc<ProtocolConfig>> = OnceLock::new();
        STANDARD
            .get_or_init(|| {
                let config = ProtocolConfigBuilder::default()
                    .build()
                    .expect("standard protocol constants are consistent");
                Arc::new(config)
            })
            .clone()
    }

    pub fn builder() -> ProtocolConfigBuilder {
        ProtocolConfigBuilder::default()
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    pub fn beep_time(&self) -> f32 {
        self.beep_time
    }

    pub fn attack_time(&self) -> f32 {
        self.attack_time
    }

    pub fn release_time(&self) -> f32 {
        self.release_time
    }

    pub fn packet_gap_time(&self) -> f32 {
        self.packet_gap_time
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    pub fn max_message_len(&self) -> usize {
        self.max_message_len
    }

    /// `None` for bare frames, where the payload symbols are all that is sent.
    pub fn guard(&self) -> Option<&PacketGuard> {
        self.guard.as_ref()
    }

    /// Symbols carrying one parity byte.
    pub fn symbols_per_parity_byte(&self) -> usize {
        8usize.div_ceil(self.alphabet.bits_per_symbol() as usize)
    }

    /// Beeps per packet on the wire.
    pub fn packet_len(&self) -> usize {
        match &self.guard {
            Some(guard) => {
                guard.preamble.len()
                    + self.payload_len
                    + guard.parity_bytes * self.symbols_per_parity_byte()
            }
            None => self.payload_len,
        }
    }

    /// How long a partial message waits for its next packet: two packets
    /// plus the gap, leaving room for a late host.
    pub fn message_timeout_samples(&self, sample_rate: u32) -> u64 {
        (2 * self.packet_len() * self.beep_samples(sample_rate) + self.gap_samples(sample_rate))
            as u64
    }

    pub fn beep_samples(&self, sample_rate: u32) -> usize {
        seconds_to_samples(self.beep_time, sample_rate).max(1)
    }

    pub fn attack_samples(&self, sample_rate: u32) -> usize {
        seconds_to_samples(self.attack_time, sample_rate)
    }

    pub fn release_samples(&self, sample_rate: u32) -> usize {
        seconds_to_samples(self.release_time, sample_rate)
    }

    pub fn gap_samples(&self, sample_rate: u32) -> usize {
        seconds_to_samples(self.packet_gap_time, sample_rate)
    }

    /// Nyquist bound for the highest carrier.
    pub fn min_sample_rate(&self) -> u32 {
        (self.alphabet.max_frequency() * 2.0).ceil() as u32
    }

    pub fn check_sample_rate(&self, sample_rate: u32) -> Result<()> {
        let min = self.min_sample_rate();
        if sample_rate < min {
            return Err(TransceiverError::SampleRateTooLow {
                min,
                actual: sample_rate,
            });
        }
        Ok(())
    }

    /// Bytes of message stream that fit in one payload after its header symbol.
    pub fn message_bytes_per_packet(&self) -> usize {
        (self.payload_len - 1) * self.alphabet.bits_per_symbol() as usize / 8
    }

    /// Smallest carrier spacing the half-beep analysis window can separate.
    pub fn required_spacing(&self) -> f32 {
        8.0 / self.beep_time
    }
}

fn seconds_to_samples(seconds: f32, sample_rate: u32) -> usize {
    (seconds * sample_rate as f32).round() as usize
}

#[derive(Debug, Clone)]
pub struct ProtocolConfigBuilder {
    alphabet: Option<Alphabet>,
    beep_time: f32,
    attack_time: f32,
    release_time: f32,
    packet_gap_time: f32,
    payload_len: usize,
    max_message_len: usize,
    guard: Option<PacketGuard>,
}

impl Default for ProtocolConfigBuilder {
    fn default() -> Self {
        Self {
            alphabet: None,
            beep_time: BEEP_TIME,
            attack_time: ATTACK_TIME,
            release_time: RELEASE_TIME,
            packet_gap_time: PACKET_GAP_TIME,
            payload_len: PAYLOAD_LEN,
            max_message_len: MAX_MESSAGE_LEN,
            guard: Some(PacketGuard::default()),
        }
    }
}

impl ProtocolConfigBuilder {
    pub fn alphabet(mut self, alphabet: Alphabet) -> Self {
        self.alphabet = Some(alphabet);
        self
    }

    pub fn beep_time(mut self, seconds: f32) -> Self {
        self.beep_time = seconds;
        self
    }

    pub fn attack_time(mut self, seconds: f32) -> Self {
        self.attack_time = seconds;
        self
    }

    pub fn release_time(mut self, seconds: f32) -> Self {
        self.release_time = seconds;
        self
    }

    pub fn packet_gap_time(mut self, seconds: f32) -> Self {
        self.packet_gap_time = seconds;
        self
    }

    pub fn payload_len(mut self, symbols: usize) -> Self {
        self.payload_len = symbols;
        self
    }

    pub fn max_message_len(mut self, bytes: usize) -> Self {
        self.max_message_len = bytes;
        self
    }

    pub fn guard(mut self, guard: PacketGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Send payloads bare, without preamble or parity.
    pub fn unguarded(mut self) -> Self {
        self.guard = None;
        self
    }

    pub fn build(self) -> Result<ProtocolConfig> {
        let alphabet = match self.alphabet {
            Some(alphabet) => alphabet,
            None => Alphabet::semitones(SYMBOL_MNEMONICS, BASE_FREQUENCY)?,
        };

        let invalid = |msg: String| Err(TransceiverError::InvalidConfig(msg));

        if !(self.beep_time > 0.0) {
            return invalid(format!("beep time must be positive, is {}", self.beep_time));
        }
        if self.attack_time < 0.0 || self.release_time < 0.0 {
            return invalid("ramp times must not be negative".into());
        }
        if self.attack_time + self.release_time >= self.beep_time {
            return invalid(format!(
                "attack {} s + release {} s must be shorter than the beep {} s",
                self.attack_time, self.release_time, self.beep_time
            ));
        }
        if self.packet_gap_time < 1.5 * self.beep_time {
            return invalid(format!(
                "packet gap {} s must be at least 1.5 beeps ({} s)",
                self.packet_gap_time,
                1.5 * self.beep_time
            ));
        }
        if self.payload_len < 2 {
            return invalid(format!(
                "payload must be at least 2 symbols, is {}",
                self.payload_len
            ));
        }
        let data_bits = (self.payload_len - 1) * alphabet.bits_per_symbol() as usize;
        if data_bits < 8 {
            return invalid(format!(
                "payload of {} symbols carries only {} data bits, need at least 8",
                self.payload_len, data_bits
            ));
        }
        if self.max_message_len == 0 || self.max_message_len > u16::MAX as usize {
            return invalid(format!(
                "maximum message length must be within 1..={}, is {}",
                u16::MAX,
                self.max_message_len
            ));
        }

        if let Some(guard) = &self.guard {
            if guard.preamble.is_empty() {
                return invalid("packet preamble must not be empty".into());
            }
            if let Some(&symbol) = guard.preamble.iter().find(|&&s| !alphabet.contains(s)) {
                return invalid(format!(
                    "preamble symbol {} is outside the {}-symbol alphabet",
                    symbol,
                    alphabet.len()
                ));
            }
            if guard.parity_bytes < 2 {
                return invalid(format!(
                    "at least 2 parity bytes are needed to correct a symbol, got {}",
                    guard.parity_bytes
                ));
            }
            let shards = guard.preamble.len() + self.payload_len + guard.parity_bytes;
            if shards > 256 {
                return invalid(format!(
                    "guarded packet spans {} Reed-Solomon shards, at most 256 fit",
                    shards
                ));
            }
        }

        let required = 8.0 / self.beep_time;
        let spacing = alphabet.min_spacing();
        if spacing < required * 0.999 {
            return invalid(format!(
                "carrier spacing {:.1} Hz is below the {:.1} Hz a {} s beep can resolve",
                spacing, required, self.beep_time
            ));
        }

        Ok(ProtocolConfig {
            alphabet,
            beep_time: self.beep_time,
            attack_time: self.attack_time,
            release_time: self.release_time,
            packet_gap_time: self.packet_gap_time,
            payload_len: self.payload_len,
            max_message_len: self.max_message_len,
            guard: self.guard,
        })
    }
}

/// Demodulator tuning. Independent of the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    /// Amplitude below which a window counts as silence.
    pub min_amplitude: f32,
    /// Required ratio between the strongest and second strongest carrier.
    pub min_margin: f32,
    /// Analysis hops per beep.
    pub hops_per_beep: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_amplitude: 0.01,
            min_margin: 3.0,
            hops_per_beep: 8,
        }
    }
}

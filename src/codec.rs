//! Packet framing on the wire.
//!
//! A guarded packet is sent as
//!
//! ```text
//! preamble | payload | parity
//! ```
//!
//! The parity block is a systematic Reed-Solomon code over GF(2^8) with one
//! shard per preamble or payload symbol. Each parity byte is spread MSB-first
//! over as many symbols as it needs. A received frame is accepted when its
//! parity checks out, after repairing at most one shard, and its preamble
//! matches. Bare protocols send the payload symbols alone.

use crate::alphabet::Symbol;
use crate::config::ProtocolConfig;
use crate::error::{DecodeFailure, Result, TransceiverError};
use log::trace;
use reed_solomon_erasure::galois_8::ReedSolomon;
use std::sync::Arc;

fn correction_error(err: impl std::fmt::Display) -> TransceiverError {
    TransceiverError::ErrorCorrection(err.to_string())
}

struct Guard {
    rs: ReedSolomon,
    preamble: Vec<Symbol>,
    parity_bytes: usize,
    bits: u32,
    symbols_per_byte: usize,
}

impl Guard {
    fn spread(&self, byte: u8, out: &mut Vec<Symbol>) {
        let mask = (1u32 << self.bits) - 1;
        for i in (0..self.symbols_per_byte as u32).rev() {
            out.push(((byte as u32 >> (i * self.bits)) & mask) as Symbol);
        }
    }

    fn gather(&self, symbols: &[Symbol]) -> u32 {
        symbols
            .iter()
            .fold(0u32, |acc, &s| (acc << self.bits) | s as u32)
    }

    /// Treat shard `position` as lost and rebuild it. Only a result that
    /// passes the full parity check is returned.
    fn repair(&self, shards: &[Vec<u8>], position: usize) -> Option<Vec<Vec<u8>>> {
        let mut trial: Vec<Option<Vec<u8>>> = shards.iter().cloned().map(Some).collect();
        trial[position] = None;
        self.rs.reconstruct(&mut trial).ok()?;

        let trial: Vec<Vec<u8>> = trial.into_iter().flatten().collect();
        match self.rs.verify(&trial) {
            Ok(true) => Some(trial),
            _ => None,
        }
    }
}

pub struct PacketCodec {
    protocol: Arc<ProtocolConfig>,
    guard: Option<Guard>,
}

impl PacketCodec {
    pub fn new(protocol: Arc<ProtocolConfig>) -> Result<Self> {
        let guard = match protocol.guard() {
            Some(guard) => {
                let data_shards = guard.preamble.len() + protocol.payload_len();
                let rs = ReedSolomon::new(data_shards, guard.parity_bytes)
                    .map_err(correction_error)?;
                Some(Guard {
                    rs,
                    preamble: guard.preamble.clone(),
                    parity_bytes: guard.parity_bytes,
                    bits: protocol.alphabet().bits_per_symbol(),
                    symbols_per_byte: protocol.symbols_per_parity_byte(),
                })
            }
            None => None,
        };

        Ok(Self { protocol, guard })
    }

    pub fn protocol(&self) -> &Arc<ProtocolConfig> {
        &self.protocol
    }

    /// Wire symbols carrying `payload`.
    pub fn encode(&self, payload: &[Symbol]) -> Result<Vec<Symbol>> {
        let expected = self.protocol.payload_len();
        if payload.len() != expected {
            return Err(TransceiverError::PayloadLengthMismatch {
                expected,
                actual: payload.len(),
            });
        }
        let alphabet = self.protocol.alphabet();
        for &symbol in payload {
            alphabet.check(symbol)?;
        }

        let guard = match &self.guard {
            Some(guard) => guard,
            None => return Ok(payload.to_vec()),
        };

        let mut shards: Vec<Vec<u8>> = guard
            .preamble
            .iter()
            .chain(payload)
            .map(|&s| vec![s])
            .collect();
        let data_shards = shards.len();
        shards.resize(data_shards + guard.parity_bytes, vec![0]);
        guard.rs.encode(&mut shards).map_err(correction_error)?;

        let mut symbols = Vec::with_capacity(self.protocol.packet_len());
        symbols.extend_from_slice(&guard.preamble);
        symbols.extend_from_slice(payload);
        for shard in &shards[data_shards..] {
            guard.spread(shard[0], &mut symbols);
        }
        Ok(symbols)
    }

    /// Check a received frame of `packet_len` symbols and write its payload
    /// into `payload`. Returns the number of repaired shards.
    pub fn decode(
        &self,
        frame: &[Symbol],
        payload: &mut Vec<Symbol>,
    ) -> std::result::Result<usize, DecodeFailure> {
        payload.clear();
        let expected = self.protocol.packet_len();
        if frame.len() != expected {
            return Err(DecodeFailure::FrameIncomplete {
                decoded: frame.len(),
                expected,
            });
        }

        let guard = match &self.guard {
            Some(guard) => guard,
            None => {
                payload.extend_from_slice(frame);
                return Ok(0);
            }
        };

        let data_shards = guard.preamble.len() + self.protocol.payload_len();
        let mut shards: Vec<Vec<u8>> = frame[..data_shards].iter().map(|&s| vec![s]).collect();
        // a parity byte that does not fit in 8 bits is a known erasure
        let mut erased = None;
        for (i, chunk) in frame[data_shards..]
            .chunks(guard.symbols_per_byte)
            .enumerate()
        {
            let value = guard.gather(chunk);
            if value > u8::MAX as u32 && erased.replace(data_shards + i).is_some() {
                return Err(DecodeFailure::Uncorrectable);
            }
            shards.push(vec![value as u8]);
        }

        let (codeword, repaired) = match erased {
            Some(position) => {
                let codeword = guard
                    .repair(&shards, position)
                    .ok_or(DecodeFailure::Uncorrectable)?;
                (codeword, 1)
            }
            None if guard.rs.verify(&shards).unwrap_or(false) => (shards, 0),
            None => {
                let codeword = (0..shards.len())
                    .find_map(|position| guard.repair(&shards, position))
                    .ok_or(DecodeFailure::Uncorrectable)?;
                (codeword, 1)
            }
        };

        for (position, (shard, &expected)) in codeword.iter().zip(&guard.preamble).enumerate() {
            if shard[0] != expected {
                return Err(DecodeFailure::BadPreamble {
                    position,
                    expected,
                    actual: shard[0],
                });
            }
        }

        let alphabet = self.protocol.alphabet();
        for shard in &codeword[guard.preamble.len()..data_shards] {
            if !alphabet.contains(shard[0]) {
                payload.clear();
                return Err(DecodeFailure::Uncorrectable);
            }
            payload.push(shard[0]);
        }

        if repaired > 0 {
            trace!("repaired one shard of frame {:?}", frame);
        }
        Ok(repaired)
    }
}

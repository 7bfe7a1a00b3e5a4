//! Message segmentation and reassembly.
//!
//! Every message packet starts with one header symbol whose two top bits are
//! the FIRST and LAST flags; the remaining header bits hold a sequence number
//! that wraps. The other symbols of the payload carry the message stream
//!
//! ```text
//! length: u16 BE | message bytes | crc32(length | message): u32 BE
//! ```
//!
//! cut into equal chunks, the last one zero padded.

use crate::alphabet::Symbol;
use crate::config::ProtocolConfig;
use crate::error::{Result, TransceiverError};
use byteorder::{BigEndian, ByteOrder};
use log::debug;
use std::sync::Arc;

const LENGTH_BYTES: usize = 2;
const CHECKSUM_BYTES: usize = 4;

/// Bit layout of message packets for one protocol.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PacketLayout {
    payload_len: usize,
    bits: u32,
    bytes_per_packet: usize,
}

impl PacketLayout {
    fn new(protocol: &ProtocolConfig) -> Self {
        Self {
            payload_len: protocol.payload_len(),
            bits: protocol.alphabet().bits_per_symbol(),
            bytes_per_packet: protocol.message_bytes_per_packet(),
        }
    }

    fn first_flag(&self) -> Symbol {
        1 << (self.bits - 1)
    }

    fn last_flag(&self) -> Symbol {
        1 << (self.bits - 2)
    }

    fn seq_mask(&self) -> Symbol {
        self.last_flag() - 1
    }

    fn symbol_limit(&self) -> u16 {
        1 << self.bits
    }

    fn header(&self, first: bool, last: bool, seq: usize) -> Symbol {
        let mut header = (seq as Symbol) & self.seq_mask();
        if first {
            header |= self.first_flag();
        }
        if last {
            header |= self.last_flag();
        }
        header
    }

    /// Spread `bytes` MSB-first over `payload_len - 1` symbols.
    fn pack(&self, bytes: &[u8], out: &mut Vec<Symbol>) {
        let mask = (1u32 << self.bits) - 1;
        let mut acc = 0u32;
        let mut acc_bits = 0u32;
        let mut bytes = bytes.iter();

        for _ in 1..self.payload_len {
            while acc_bits < self.bits {
                acc = (acc << 8) | bytes.next().copied().unwrap_or(0) as u32;
                acc_bits += 8;
            }
            acc_bits -= self.bits;
            out.push(((acc >> acc_bits) & mask) as Symbol);
            acc &= (1u32 << acc_bits) - 1;
        }
    }

    /// Inverse of [`PacketLayout::pack`]; appends `bytes_per_packet` bytes.
    fn unpack(&self, symbols: &[Symbol], out: &mut Vec<u8>) {
        let mut acc = 0u32;
        let mut acc_bits = 0u32;
        let mut produced = 0;

        for &symbol in symbols {
            acc = (acc << self.bits) | symbol as u32;
            acc_bits += self.bits;
            while acc_bits >= 8 && produced < self.bytes_per_packet {
                acc_bits -= 8;
                out.push((acc >> acc_bits) as u8);
                acc &= (1u32 << acc_bits) - 1;
                produced += 1;
            }
        }
    }

    fn stream_capacity(&self, max_message_len: usize) -> usize {
        let stream = LENGTH_BYTES + max_message_len + CHECKSUM_BYTES;
        stream.div_ceil(self.bytes_per_packet) * self.bytes_per_packet
    }
}

/// Splits messages into payloads.
pub struct MessageFramer {
    protocol: Arc<ProtocolConfig>,
    layout: PacketLayout,
}

impl MessageFramer {
    pub fn new(protocol: Arc<ProtocolConfig>) -> Self {
        let layout = PacketLayout::new(&protocol);
        Self { protocol, layout }
    }

    pub fn packet_count(&self, message_len: usize) -> usize {
        (LENGTH_BYTES + message_len + CHECKSUM_BYTES).div_ceil(self.layout.bytes_per_packet)
    }

    pub fn segment(&self, message: &[u8]) -> Result<Vec<Vec<Symbol>>> {
        let max = self.protocol.max_message_len();
        if message.len() > max {
            return Err(TransceiverError::MessageTooLong {
                max,
                actual: message.len(),
            });
        }

        let body = LENGTH_BYTES + message.len();
        let mut stream = vec![0u8; body + CHECKSUM_BYTES];
        BigEndian::write_u16(&mut stream[..LENGTH_BYTES], message.len() as u16);
        stream[LENGTH_BYTES..body].copy_from_slice(message);
        let checksum = crc32fast::hash(&stream[..body]);
        BigEndian::write_u32(&mut stream[body..], checksum);

        let chunks: Vec<&[u8]> = stream.chunks(self.layout.bytes_per_packet).collect();
        let count = chunks.len();
        let payloads = chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let mut payload = Vec::with_capacity(self.layout.payload_len);
                payload.push(self.layout.header(i == 0, i + 1 == count, i));
                self.layout.pack(chunk, &mut payload);
                payload
            })
            .collect();

        Ok(payloads)
    }
}

/// Rebuilds messages from decoded payloads.
///
/// Packets must arrive in order. A continuation that does not match the
/// expected sequence number is ignored and the partial message stays pending
/// until the missing packet or a new first packet arrives.
pub struct MessageAssembler {
    layout: PacketLayout,
    max_message_len: usize,
    capacity: usize,
    buffer: Vec<u8>,
    expected_seq: Symbol,
    active: bool,
    timeout: Option<u64>,
    idle: u64,
}

impl MessageAssembler {
    pub fn new(protocol: Arc<ProtocolConfig>) -> Self {
        let layout = PacketLayout::new(&protocol);
        let capacity = layout.stream_capacity(protocol.max_message_len());
        Self {
            layout,
            max_message_len: protocol.max_message_len(),
            capacity,
            buffer: Vec::with_capacity(capacity),
            expected_seq: 0,
            active: false,
            timeout: None,
            idle: 0,
        }
    }

    /// Drop a partial message once more than `samples` pass without its next
    /// packet.
    pub fn with_timeout(mut self, samples: u64) -> Self {
        self.timeout = Some(samples);
        self
    }

    /// Account for `samples` of received audio.
    pub fn tick(&mut self, samples: u64) {
        if !self.active {
            return;
        }
        self.idle += samples;
        if matches!(self.timeout, Some(timeout) if self.idle > timeout) {
            self.invalidate("next packet overdue");
        }
    }

    /// True while a partial message is waiting for further packets.
    pub fn pending(&self) -> bool {
        self.active
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.active = false;
        self.expected_seq = 0;
        self.idle = 0;
    }

    fn invalidate(&mut self, reason: &str) {
        debug!("dropping partial message: {}", reason);
        self.reset();
    }

    pub fn push(&mut self, payload: &[Symbol]) -> Option<&[u8]> {
        let layout = self.layout;
        if payload.len() != layout.payload_len
            || payload.iter().any(|&s| s as u16 >= layout.symbol_limit())
        {
            return None;
        }

        let header = payload[0];
        let first = header & layout.first_flag() != 0;
        let last = header & layout.last_flag() != 0;
        let seq = header & layout.seq_mask();

        if first {
            self.reset();
            if seq != 0 {
                return None;
            }
            self.active = true;
        } else if !self.active {
            debug!("ignoring continuation packet {} with nothing pending", seq);
            return None;
        } else if seq != self.expected_seq {
            debug!(
                "ignoring out-of-order packet {} (expected {})",
                seq, self.expected_seq
            );
            return None;
        }

        if self.buffer.len() + layout.bytes_per_packet > self.capacity {
            self.invalidate("reassembly buffer overflow");
            return None;
        }
        layout.unpack(&payload[1..], &mut self.buffer);
        self.expected_seq = (self.expected_seq + 1) & layout.seq_mask();
        self.idle = 0;

        let declared = if self.buffer.len() >= LENGTH_BYTES {
            let declared = BigEndian::read_u16(&self.buffer[..LENGTH_BYTES]) as usize;
            if declared > self.max_message_len {
                self.invalidate("declared length exceeds maximum");
                return None;
            }
            Some(declared)
        } else {
            None
        };

        if !last {
            return None;
        }
        self.active = false;

        let len = match declared {
            Some(len) => len,
            None => {
                self.invalidate("last packet before length field");
                return None;
            }
        };
        let body = LENGTH_BYTES + len;
        if self.buffer.len() < body + CHECKSUM_BYTES {
            self.invalidate("message shorter than declared length");
            return None;
        }
        let checksum = BigEndian::read_u32(&self.buffer[body..body + CHECKSUM_BYTES]);
        if checksum != crc32fast::hash(&self.buffer[..body]) {
            self.invalidate("checksum mismatch");
            return None;
        }

        Some(&self.buffer[LENGTH_BYTES..body])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::Alphabet;

    fn letters() -> Arc<ProtocolConfig> {
        Arc::new(
            ProtocolConfig::builder()
                .alphabet(Alphabet::linear("ABCDEFGH", 800.0, 100.0).unwrap())
                .payload_len(4)
                .max_message_len(40)
                .unguarded()
                .build()
                .unwrap(),
        )
    }

    fn reassemble(assembler: &mut MessageAssembler, payloads: &[Vec<Symbol>]) -> Option<Vec<u8>> {
        let mut result = None;
        for payload in payloads {
            if let Some(message) = assembler.push(payload) {
                result = Some(message.to_vec());
            }
        }
        result
    }

    #[test]
    fn test_pack_unpack_bits() {
        let layout = PacketLayout::new(&ProtocolConfig::standard());
        let mut symbols = Vec::new();
        layout.pack(&[0xDE, 0xAD, 0xBE, 0xEF, 0x42], &mut symbols);
        assert_eq!(symbols.len(), 9);
        assert!(symbols.iter().all(|&s| s < 32));

        let mut bytes = Vec::new();
        layout.unpack(&symbols, &mut bytes);
        assert_eq!(bytes, vec![0xDE, 0xAD, 0xBE, 0xEF, 0x42]);
    }

    #[test]
    fn test_headers() {
        let framer = MessageFramer::new(ProtocolConfig::standard());
        let payloads = framer.segment(b"Hello, world!").unwrap();
        assert_eq!(payloads.len(), 4);
        assert_eq!(payloads[0][0], 0b10000);
        assert_eq!(payloads[1][0], 0b00001);
        assert_eq!(payloads[2][0], 0b00010);
        assert_eq!(payloads[3][0], 0b01011);

        let single = framer.segment(b"").unwrap();
        assert_eq!(single.len(), 2);
        let framer = MessageFramer::new(letters());
        assert_eq!(framer.segment(b"").unwrap().len(), 6);
    }

    #[test]
    fn test_roundtrip_every_length() {
        for protocol in [ProtocolConfig::standard(), letters()] {
            let framer = MessageFramer::new(protocol.clone());
            let mut assembler = MessageAssembler::new(protocol.clone());
            for len in 0..=protocol.max_message_len() {
                let message: Vec<u8> = (0..len).map(|i| (i * 37 + len) as u8).collect();
                let payloads = framer.segment(&message).unwrap();
                assert_eq!(payloads.len(), framer.packet_count(len));
                for payload in &payloads {
                    assert_eq!(payload.len(), protocol.payload_len());
                }
                assert_eq!(reassemble(&mut assembler, &payloads), Some(message));
                assert!(!assembler.pending());
            }
        }
    }

    #[test]
    fn test_too_long() {
        let framer = MessageFramer::new(letters());
        assert_eq!(
            framer.segment(&[0u8; 41]),
            Err(TransceiverError::MessageTooLong { max: 40, actual: 41 })
        );
    }

    #[test]
    fn test_out_of_order_stays_pending() {
        let protocol = ProtocolConfig::standard();
        let framer = MessageFramer::new(protocol.clone());
        let mut assembler = MessageAssembler::new(protocol);
        let payloads = framer.segment(b"ordering matters here").unwrap();
        assert!(payloads.len() >= 4);

        assert!(assembler.push(&payloads[0]).is_none());
        assert!(assembler.push(&payloads[2]).is_none());
        assert!(assembler.pending());

        // the skipped packet arrives late, then the rest in order
        let rest: Vec<Vec<Symbol>> = payloads[1..].to_vec();
        assert_eq!(
            reassemble(&mut assembler, &rest),
            Some(b"ordering matters here".to_vec())
        );
    }

    #[test]
    fn test_stalled_message_is_replaced() {
        let protocol = ProtocolConfig::standard();
        let framer = MessageFramer::new(protocol.clone());
        let mut assembler = MessageAssembler::new(protocol);

        let stalled = framer.segment(b"never finished message").unwrap();
        assert!(assembler.push(&stalled[0]).is_none());
        assert!(assembler.push(&stalled[1]).is_none());
        assert!(assembler.pending());

        let fresh = framer.segment(b"ok").unwrap();
        assert_eq!(reassemble(&mut assembler, &fresh), Some(b"ok".to_vec()));
    }

    #[test]
    fn test_overdue_continuation_is_ignored() {
        let framer = MessageFramer::new(letters());
        let payloads = framer.segment(b"hi").unwrap();
        assert!(payloads.len() > 2);

        let mut assembler = MessageAssembler::new(letters()).with_timeout(1000);
        assert!(assembler.push(&payloads[0]).is_none());
        assembler.tick(1000);
        assert!(assembler.pending());
        assembler.tick(1);
        assert!(!assembler.pending());
        assert_eq!(reassemble(&mut assembler, &payloads[1..]), None);

        // packets arriving within the timeout still complete the message
        let mut assembler = MessageAssembler::new(letters()).with_timeout(1000);
        let mut message = None;
        for payload in &payloads {
            assembler.tick(900);
            if let Some(m) = assembler.push(payload) {
                message = Some(m.to_vec());
            }
        }
        assert_eq!(message.as_deref(), Some(&b"hi"[..]));
    }

    #[test]
    fn test_continuation_without_first_is_ignored() {
        let protocol = ProtocolConfig::standard();
        let framer = MessageFramer::new(protocol.clone());
        let mut assembler = MessageAssembler::new(protocol);
        let payloads = framer.segment(b"Hello, world!").unwrap();

        assert_eq!(reassemble(&mut assembler, &payloads[1..]), None);
        assert!(!assembler.pending());
    }

    #[test]
    fn test_corruption_is_rejected() {
        let protocol = ProtocolConfig::standard();
        let framer = MessageFramer::new(protocol.clone());
        let mut assembler = MessageAssembler::new(protocol);
        let mut payloads = framer.segment(b"Hello, world!").unwrap();
        payloads[1][3] ^= 0b00100;

        assert_eq!(reassemble(&mut assembler, &payloads), None);
        assert!(!assembler.pending());
    }

    #[test]
    fn test_overflow_invalidates() {
        let protocol = letters();
        let framer = MessageFramer::new(protocol.clone());
        let mut assembler = MessageAssembler::new(protocol.clone());
        let payloads = framer.segment(&[7u8; 40]).unwrap();

        // feed continuations forever without the last packet
        assert!(assembler.push(&payloads[0]).is_none());
        let mut seq = 1;
        let mut invalidated = false;
        for _ in 0..200 {
            let mut continuation = payloads[1].clone();
            continuation[0] = (seq & 1) as Symbol;
            assert!(assembler.push(&continuation).is_none());
            seq += 1;
            if !assembler.pending() {
                invalidated = true;
                break;
            }
        }
        assert!(invalidated);
    }

    #[test]
    fn test_foreign_payload_is_ignored() {
        let protocol = letters();
        let mut assembler = MessageAssembler::new(protocol);
        assert!(assembler.push(&[0, 1, 2, 3]).is_none());
        assert!(assembler.push(&[6, 1, 2, 3]).is_none());
        assert!(assembler.push(&[0, 1, 2]).is_none());
    }
}

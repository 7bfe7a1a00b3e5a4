//! Half-duplex acoustic data link.
//!
//! Payloads of fixed length are sent as a sequence of audible beeps, one
//! carrier per symbol, and recovered sample by sample from a live input
//! stream. On the wire every payload is wrapped in a short preamble and a
//! Reed-Solomon parity block, so stray tones never pass as packets. Longer
//! messages are segmented into several payloads.

pub mod alphabet;
pub mod codec;
pub mod config;
pub mod error;
pub mod goertzel;
pub mod modulation;
pub mod demodulation;
pub mod protocol;
pub mod scheduler;
pub mod monitor;
pub mod transceiver;
pub mod spectrum;

#[cfg(not(target_arch = "wasm32"))]
pub mod audio;

#[cfg(target_arch = "wasm32")]
pub mod wasm;

pub use alphabet::*;
pub use codec::*;
pub use config::*;
pub use error::*;
pub use modulation::*;
pub use demodulation::*;
pub use protocol::*;
pub use scheduler::*;
pub use monitor::*;
pub use transceiver::*;

/// Duration of one beep in seconds.
pub const BEEP_TIME: f32 = 0.0872;
/// Linear fade-in at the start of every beep.
pub const ATTACK_TIME: f32 = 0.012;
/// Linear fade-out at the end of every beep.
pub const RELEASE_TIME: f32 = 0.012;
/// Silence following every packet.
pub const PACKET_GAP_TIME: f32 = 0.25;
/// Symbols per payload.
pub const PAYLOAD_LEN: usize = 10;
/// Sync symbols opening every packet.
pub const START_SYMBOLS: [alphabet::Symbol; 2] = [17, 19];
/// Reed-Solomon parity bytes closing every packet.
pub const PARITY_BYTES: usize = 4;
/// Beeps per packet on the wire: preamble, payload and parity (two symbols
/// per parity byte).
pub const PACKET_LEN: usize = START_SYMBOLS.len() + PAYLOAD_LEN + 2 * PARITY_BYTES;
/// Largest message accepted by `send_message`.
pub const MAX_MESSAGE_LEN: usize = 255;
pub const SYMBOL_MNEMONICS: &str = "0123456789abcdefghijklmnopqrstuv";
pub const SYMBOL_COUNT: usize = 32;
/// Carrier of symbol 0; each following symbol is one semitone higher.
pub const BASE_FREQUENCY: f32 = 1760.0;

use crate::alphabet::Symbol;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransceiverError {
    #[error("Unknown symbol mnemonic {0:?}")]
    UnknownSymbol(char),

    #[error("Symbol {symbol} out of range: alphabet has {count} symbols")]
    SymbolOutOfRange { symbol: Symbol, count: usize },

    #[error(
        "Payload length mismatch: expected {expected} symbols but got {actual} (off by {})",
        .actual.abs_diff(*.expected)
    )]
    PayloadLengthMismatch { expected: usize, actual: usize },

    #[error(
        "Message too long: {actual} bytes exceeds the maximum of {max} by {}",
        .actual.saturating_sub(*.max)
    )]
    MessageTooLong { max: usize, actual: usize },

    #[error("Sample rate too low: must be at least {min} Hz but is {actual} Hz")]
    SampleRateTooLow { min: u32, actual: u32 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Error correction failed: {0}")]
    ErrorCorrection(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),
}

pub type Result<T> = std::result::Result<T, TransceiverError>;

/// Reasons a frame is dropped inside the demodulator. These never reach the
/// caller as errors; they are logged and counted in the decode statistics.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum DecodeFailure {
    #[error("frame incomplete: decoded {decoded} of {expected} symbols")]
    FrameIncomplete { decoded: usize, expected: usize },

    #[error("ambiguous tone: best amplitude {best:.4} vs runner-up {second:.4}")]
    AmbiguousTone { best: f32, second: f32 },

    #[error("preamble mismatch at symbol {position}: expected {expected}, got {actual}")]
    BadPreamble {
        position: usize,
        expected: Symbol,
        actual: Symbol,
    },

    #[error("parity check failed and no single symbol repair restores it")]
    Uncorrectable,
}

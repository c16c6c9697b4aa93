//! # Core Error Handling
//!
//! Defines the `CoreError` enum covering every failure mode the wire
//! exchange engine and firmware-transfer state machine can report.

use thiserror::Error;

/// Errors surfaced by the ground-control wire exchange core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// CRC mismatch or malformed length while framing the byte stream.
    #[error("frame error: {0}")]
    FrameError(String),

    /// Unknown stream, unknown opcode, or decode failure past framing.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Reliable packet counter fell outside the accepted window.
    #[error("sequence error on stream {stream:?}: got counter {got}, expected {expected}")]
    SequenceError {
        stream: crate::packet::StreamType,
        got: u16,
        expected: u16,
    },

    /// Firmware-transfer state machine hit an unexpected message, a
    /// size/hash mismatch, or a nonce mismatch.
    #[error("firmware error: {0}")]
    FirmwareError(String),

    /// Retransmission budget exhausted, or project decode failed after a
    /// successful download. Surfaced to the parent actor.
    #[error("fatal error: {0}")]
    FatalError(String),

    /// The transport adapter failed to send or receive bytes.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Failure to load or store the persisted firmware/project cache.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// A catch-all for uncategorized cases.
    #[error("other error: {0}")]
    Other(String),
}

//! Wire protocol constants fixed by the on-the-wire contract (the SYNC
//! pair, the CRC polynomial, hash/varint sizes). Tunables that are a
//! matter of policy rather than wire compatibility — retry budgets, timer
//! intervals — live in `crate::config` instead.

/// First SYNC byte of every framed packet.
pub const SYNC_BYTE_0: u8 = 0x9C;
/// Second SYNC byte of every framed packet.
pub const SYNC_BYTE_1: u8 = 0x3E;

/// Minimum size of a fully framed packet: SYNC(2) + len(2) + CRC(2).
pub const MIN_FRAME_SIZE: usize = 6;

/// Default maximum payload size a `Framer`/`Codec` will accept.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024;

/// CRC-16/CCITT-FALSE parameters: poly 0x1021, init 0xFFFF, no reflection,
/// no final xor.
pub const CRC16_POLY: u16 = 0x1021;
pub const CRC16_INIT: u16 = 0xFFFF;

/// Default retransmission interval for a reliable packet awaiting receipt.
pub const DEFAULT_RETRANSMIT_INTERVAL_MS: u64 = 500;

/// Default number of retransmissions before a stream raises a fatal error.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Default number of consecutive malformed payloads on one stream before
/// a protocol error is surfaced to the parent.
pub const DEFAULT_PROTOCOL_ERROR_THRESHOLD: u32 = 5;

/// Interval between `RequestHash`/`Start` retries while awaiting a
/// response from the firmware-transfer peer.
pub const FWT_REQUEST_INTERVAL_MS: u64 = 500;

/// Length in bytes of the SHA3-512 firmware image digest.
pub const FIRMWARE_HASH_SIZE: usize = 64;

/// Maximum varuint/varint length in bytes (LEB128-style, 7 bits/byte).
pub const MAX_VARINT_BYTES: usize = 10;

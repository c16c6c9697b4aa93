//! Tunable parameters the core leaves as configuration rather than
//! hard-coded constants: retransmission budgets, timer intervals, and
//! framing limits. The `Default` impls below carry sensible out-of-the-box
//! values so behavior is unchanged unless an embedder opts into something
//! else.

use std::time::Duration;

use crate::constants::{
    DEFAULT_MAX_PAYLOAD_SIZE, DEFAULT_MAX_RETRIES, DEFAULT_PROTOCOL_ERROR_THRESHOLD,
    DEFAULT_RETRANSMIT_INTERVAL_MS, FWT_REQUEST_INTERVAL_MS,
};

/// Ingest-side framing limits.
#[derive(Debug, Clone, Copy)]
pub struct FramerConfig {
    /// Payloads larger than this are dropped rather than handed upstream.
    pub max_payload_size: usize,
}

impl Default for FramerConfig {
    fn default() -> Self {
        FramerConfig {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

/// Retransmission and malformed-payload policy for the [`crate::exchange::Exchange`].
#[derive(Debug, Clone, Copy)]
pub struct ExchangeConfig {
    /// How long to wait for a receipt before resending the head of a
    /// stream's reliable queue.
    pub retransmit_interval: Duration,
    /// Number of retransmissions tolerated before a stream raises a
    /// fatal error and has its queue cleared.
    pub max_retries: u32,
    /// Number of consecutive malformed payloads on one stream before a
    /// protocol error is surfaced to the parent.
    pub protocol_error_threshold: u32,
    /// The peer's device id; inbound packets addressed to anyone else
    /// are rejected.
    pub peer_device_id: u64,
    /// This end's own device id, stamped into the header of every
    /// outbound packet.
    pub self_device_id: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            retransmit_interval: Duration::from_millis(DEFAULT_RETRANSMIT_INTERVAL_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            protocol_error_threshold: DEFAULT_PROTOCOL_ERROR_THRESHOLD,
            peer_device_id: 0,
            self_device_id: 0,
        }
    }
}

/// Pacing for the firmware-transfer client's hash/start/chunk retries.
#[derive(Debug, Clone, Copy)]
pub struct FwtConfig {
    pub hash_retry_interval: Duration,
    pub start_retry_interval: Duration,
    pub check_interval: Duration,
}

impl Default for FwtConfig {
    fn default() -> Self {
        let interval = Duration::from_millis(FWT_REQUEST_INTERVAL_MS);
        FwtConfig {
            hash_retry_interval: interval,
            start_retry_interval: interval,
            check_interval: interval,
        }
    }
}

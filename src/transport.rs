//! The byte-oriented transport contract: a small `async_trait` interface
//! an embedder implements once per physical link (serial, UDP, a test
//! double) and hands to [`crate::ground_control::GroundControl`].
//!
//! The core never depends on a concrete transport; it only ever calls
//! [`TransportSink::send`].

use async_trait::async_trait;

use crate::error::CoreError;

/// A full-duplex, lossy byte sink. May drop bytes wholesale but must
/// not reorder bytes within a single `send` call.
#[async_trait]
pub trait TransportSink: Send + Sync {
    async fn send(&self, bytes: &[u8]) -> Result<(), CoreError>;
}

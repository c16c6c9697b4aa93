//! Ground-control wire exchange engine and firmware-transfer state
//! machine.
//!
//! This crate implements the link-layer framing/CRC/reliability contract
//! used to talk to an embedded ground-control device over an unreliable
//! byte stream, plus the firmware-transfer client that downloads and
//! verifies a new interface-description image over that link. It does
//! not parse the interface description language itself, nor does it own
//! a concrete transport: both are supplied by the embedder through the
//! [`project`] and [`transport`] traits.

pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod exchange;
pub mod framer;
pub mod fwt;
pub mod ground_control;
pub mod interval_set;
pub mod logging;
pub mod messages;
pub mod packet;
pub mod persistence;
pub mod project;
pub mod stream_state;
pub mod transport;

pub use config::{ExchangeConfig, FramerConfig, FwtConfig};
pub use error::CoreError;
pub use ground_control::GroundControl;
pub use messages::{GcCommand, GcEvent};
pub use packet::{PacketHeader, PacketRequest, PacketResponse, Receipt, ReceiptType, StreamDirection, StreamType};
pub use project::{Device, Project, ProjectDecoder, StreamClient};
pub use transport::TransportSink;

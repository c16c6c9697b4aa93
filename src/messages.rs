//! Actor-mailbox message and event types for [`crate::ground_control::GroundControl`].
//!
//! Every inbound command is a variant of the one [`GcCommand`] enum, sent
//! over an `mpsc` channel and matched in a plain loop; every outbound
//! notification is a variant of [`GcEvent`].

use std::sync::Arc;

use crate::packet::StreamType;
use crate::project::Project;

/// Messages the embedder (or a transport read loop) sends into a running
/// [`crate::ground_control::GroundControl`] actor.
#[derive(Debug)]
pub enum GcCommand {
    /// Raw bytes read off the transport; fed to the framer.
    RecvData(Vec<u8>),
    /// Send `body` unreliably on `stream`.
    SendUnreliablePacket { stream: StreamType, body: Vec<u8> },
    /// Send `body` reliably on `stream` (queued if one is already in flight).
    SendReliablePacket { stream: StreamType, body: Vec<u8> },
    /// A command/telemetry frame for the CmdTelem stream, built by
    /// whatever implements the embedder's command protocol on top of it.
    SendGcCommand(Vec<u8>),
    /// Supplies (or re-supplies) the resolved project, e.g. loaded from
    /// disk at start-up, to validate against the firmware cache.
    SetProject(Arc<dyn Project>),
    /// Starts the firmware-transfer client from `Idle`.
    Start,
    /// Stops the firmware-transfer client and clears its buffer.
    Stop,
    /// Turns verbose per-packet logging on or off.
    EnableLogging(bool),
}

/// Observable events the actor publishes to subscribers, combining
/// [`crate::exchange::ExchangeEvent`] and [`crate::fwt::FwtEvent`] into
/// one stream.
#[derive(Debug, Clone)]
pub enum GcEvent {
    Delivered { stream: StreamType, body: Vec<u8> },
    StreamError(String),
    Fwt(crate::fwt::FwtEvent),
}

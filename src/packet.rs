//! Payload header layout shared by every packet on every stream.
//!
//! The header is a single bit-packed byte followed by a `varuint` device
//! id, a `varuint` tick time, and a fixed `u16` counter:
//!
//! ```text
//! bit:    7        6 5          3 2      0
//!      [ dir ][ packet_type (2) ][ stream_type (2) ][ reserved (3) ]
//! ```
//!
//! Layout used below (see [`HeaderByte`]): bit 7 is `stream_direction`,
//! bits 6-5 are `packet_type`, bits 4-3 are `stream_type`, bits 2-0 are
//! reserved and always written zero.

use crate::codec::{ByteReader, ByteWriter};

/// Which end of the link originated a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    Uplink = 0,
    Downlink = 1,
}

impl StreamDirection {
    fn from_bit(bit: u8) -> Self {
        if bit == 0 {
            StreamDirection::Uplink
        } else {
            StreamDirection::Downlink
        }
    }

    fn as_bit(self) -> u8 {
        self as u8
    }
}

/// The logical channel a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Firmware = 0,
    CmdTelem = 1,
    User = 2,
}

impl StreamType {
    pub const ALL: [StreamType; 3] = [StreamType::Firmware, StreamType::CmdTelem, StreamType::User];

    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(StreamType::Firmware),
            1 => Some(StreamType::CmdTelem),
            2 => Some(StreamType::User),
            _ => None,
        }
    }

    fn as_bits(self) -> u8 {
        self as u8
    }
}

/// Delivery semantics requested for a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Unreliable = 0,
    Reliable = 1,
    Receipt = 2,
}

impl PacketType {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(PacketType::Unreliable),
            1 => Some(PacketType::Reliable),
            2 => Some(PacketType::Receipt),
            _ => None,
        }
    }

    fn as_bits(self) -> u8 {
        self as u8
    }
}

/// Outcome reported by a [`PacketType::Receipt`] packet's body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptType {
    Ok = 0,
    PacketError = 1,
    PayloadError = 2,
    CounterCorrection = 3,
}

impl ReceiptType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ReceiptType::Ok),
            1 => Some(ReceiptType::PacketError),
            2 => Some(ReceiptType::PayloadError),
            3 => Some(ReceiptType::CounterCorrection),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// The bit-packed first byte of every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeaderByte {
    direction: StreamDirection,
    packet_type: PacketType,
    stream_type: StreamType,
}

impl HeaderByte {
    fn encode(self) -> u8 {
        (self.direction.as_bit() << 7) | (self.packet_type.as_bits() << 5) | (self.stream_type.as_bits() << 3)
    }

    fn decode(byte: u8) -> Option<Self> {
        let direction = StreamDirection::from_bit((byte >> 7) & 0x1);
        let packet_type = PacketType::from_bits((byte >> 5) & 0x3)?;
        let stream_type = StreamType::from_bits((byte >> 3) & 0x3)?;
        Some(HeaderByte {
            direction,
            packet_type,
            stream_type,
        })
    }
}

/// The decoded payload header common to every packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub direction: StreamDirection,
    pub packet_type: PacketType,
    pub stream_type: StreamType,
    pub device_id: u64,
    pub tick_time: u64,
    pub counter: u16,
}

impl PacketHeader {
    pub fn encode(&self, w: &mut ByteWriter) -> bool {
        let header_byte = HeaderByte {
            direction: self.direction,
            packet_type: self.packet_type,
            stream_type: self.stream_type,
        };
        w.write_u8(header_byte.encode())
            && w.write_varuint(self.device_id)
            && w.write_varuint(self.tick_time)
            && w.write_u16_le(self.counter)
    }

    pub fn decode(r: &mut ByteReader) -> Option<Self> {
        let header_byte = HeaderByte::decode(r.read_u8()?)?;
        let device_id = r.read_varuint()?;
        let tick_time = r.read_varuint()?;
        let counter = r.read_u16_le()?;
        Some(PacketHeader {
            direction: header_byte.direction,
            packet_type: header_byte.packet_type,
            stream_type: header_byte.stream_type,
            device_id,
            tick_time,
            counter,
        })
    }
}

/// The body of a [`PacketType::Receipt`] packet: a `receipt_type` tag
/// followed by type-specific data. Only `CounterCorrection` carries a
/// payload (the peer's expected counter); the others are bare tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    Ok,
    PacketError,
    PayloadError,
    CounterCorrection(u16),
}

impl Receipt {
    pub fn encode(self, w: &mut ByteWriter) -> bool {
        match self {
            Receipt::Ok => w.write_varuint(ReceiptType::Ok.as_u8() as u64),
            Receipt::PacketError => w.write_varuint(ReceiptType::PacketError.as_u8() as u64),
            Receipt::PayloadError => w.write_varuint(ReceiptType::PayloadError.as_u8() as u64),
            Receipt::CounterCorrection(counter) => {
                w.write_varuint(ReceiptType::CounterCorrection.as_u8() as u64) && w.write_varuint(counter as u64)
            }
        }
    }

    pub fn decode(r: &mut ByteReader) -> Option<Self> {
        let tag = r.read_varuint()?;
        match ReceiptType::from_u8(tag as u8)? {
            ReceiptType::Ok => Some(Receipt::Ok),
            ReceiptType::PacketError => Some(Receipt::PacketError),
            ReceiptType::PayloadError => Some(Receipt::PayloadError),
            ReceiptType::CounterCorrection => {
                let counter = r.read_varuint()?;
                Some(Receipt::CounterCorrection(counter as u16))
            }
        }
    }
}

/// A fully decoded incoming packet: header plus the remaining body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRequest {
    pub header: PacketHeader,
    pub body: Vec<u8>,
}

/// A packet queued to be framed and sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketResponse {
    pub header: PacketHeader,
    pub body: Vec<u8>,
}

impl PacketResponse {
    /// Encodes the header and body into `buf`, returning the number of
    /// bytes written, or `None` if `buf` is too small.
    pub fn encode_into(&self, buf: &mut [u8]) -> Option<usize> {
        let mut w = ByteWriter::new(buf);
        if !self.header.encode(&mut w) || !w.write_raw(&self.body) {
            return None;
        }
        Some(w.position())
    }
}

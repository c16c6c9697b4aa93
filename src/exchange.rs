//! Demultiplexes inbound payloads to streams, fans out outbound packets,
//! and enforces the counter/receipt contract across the three fixed
//! streams.
//!
//! The type is a pure, synchronous core: handling one payload or timer
//! tick returns the effects (frames to send) and events (things to tell
//! the embedder) that resulted, rather than performing I/O itself. An
//! async shell drives it with real timers and a real transport.

use std::collections::HashMap;

use crate::config::ExchangeConfig;
use crate::packet::{
    PacketHeader, PacketRequest, PacketResponse, PacketType, Receipt, StreamDirection, StreamType,
};
use crate::stream_state::{compare_counters, CounterOrdering, StreamState};

/// Something the core needs the embedder to do as a result of handling a
/// message: frame and transmit a packet, or surface an event.
#[derive(Debug)]
pub enum ExchangeEffect {
    /// Send this already-framed packet to the transport.
    Send(PacketResponse),
}

/// Observable outcomes of handling one inbound payload or timer tick.
#[derive(Debug, Clone)]
pub enum ExchangeEvent {
    /// A payload was delivered to its stream's client, in order.
    Delivered { stream: StreamType, body: Vec<u8> },
    /// A malformed payload was dropped; not yet over threshold.
    MalformedPayload { stream: Option<StreamType>, reason: String },
    /// The malformed-payload rate for a stream (or, for failures that
    /// precede header decoding, the link as a whole) exceeded the
    /// configured threshold.
    ProtocolError { stream: Option<StreamType>, reason: String },
    /// The retransmission budget for a stream was exhausted; its queue
    /// was cleared.
    FatalError { stream: StreamType, reason: String },
}

/// Result of feeding one inbound payload or timer tick to the [`Exchange`].
#[derive(Debug, Default)]
pub struct ExchangeOutcome {
    pub effects: Vec<ExchangeEffect>,
    pub events: Vec<ExchangeEvent>,
}

impl ExchangeOutcome {
    fn send(&mut self, response: PacketResponse) {
        self.effects.push(ExchangeEffect::Send(response));
    }
}

/// Demultiplexer and reliability core for the three fixed streams.
pub struct Exchange {
    config: ExchangeConfig,
    streams: HashMap<StreamType, StreamState>,
    /// Consecutive decode failures too early to attribute to a stream
    /// (the header itself didn't decode). Counted separately from each
    /// stream's own `malformed_count`.
    framing_malformed_count: u32,
}

impl Exchange {
    pub fn new(config: ExchangeConfig) -> Self {
        let mut streams = HashMap::new();
        for stream_type in StreamType::ALL {
            streams.insert(stream_type, StreamState::new(stream_type));
        }
        Exchange { config, streams, framing_malformed_count: 0 }
    }

    fn stream_mut(&mut self, stream_type: StreamType) -> &mut StreamState {
        self.streams
            .get_mut(&stream_type)
            .expect("all stream types are pre-populated in new()")
    }

    fn build_header(&self, stream_type: StreamType, packet_type: PacketType, counter: u16, tick_time: u64) -> PacketHeader {
        PacketHeader {
            direction: StreamDirection::Uplink,
            packet_type,
            stream_type,
            device_id: self.config.self_device_id,
            tick_time,
            counter,
        }
    }

    /// Sends `body` unreliably on `stream`: no queue entry, no receipt
    /// expected.
    pub fn send_unreliable(&mut self, stream: StreamType, tick_time: u64, body: Vec<u8>) -> PacketResponse {
        let counter = self.stream_mut(stream).next_unreliable_counter();
        let header = self.build_header(stream, PacketType::Unreliable, counter, tick_time);
        PacketResponse { header, body }
    }

    /// Queues `body` for reliable delivery on `stream`. Returns the
    /// packet to transmit immediately only if it became the new head of
    /// the queue — at most one reliable packet per stream is ever in
    /// flight at a time.
    pub fn send_reliable(&mut self, stream: StreamType, tick_time: u64, body: Vec<u8>) -> Option<PacketResponse> {
        let state = self.stream_mut(stream);
        let counter = state.reliable_counter();
        let header = self.build_header(stream, PacketType::Reliable, counter, tick_time);
        let response = PacketResponse { header, body };
        let (became_head, _generation) = state.enqueue(response.clone());
        if became_head {
            Some(response)
        } else {
            None
        }
    }

    /// Handles one fully-framed, CRC-valid payload already extracted by
    /// the [`crate::framer::Framer`].
    pub fn handle_inbound_payload(&mut self, payload: &[u8]) -> ExchangeOutcome {
        let mut outcome = ExchangeOutcome::default();

        let mut reader = crate::codec::ByteReader::new(payload);
        let header = match PacketHeader::decode(&mut reader) {
            Some(h) => h,
            None => {
                outcome.events.push(ExchangeEvent::MalformedPayload {
                    stream: None,
                    reason: "failed to decode packet header".to_owned(),
                });
                if let Some(reason) = self.note_malformed(None, "failed to decode packet header".to_owned()) {
                    outcome.events.push(ExchangeEvent::ProtocolError { stream: None, reason });
                }
                return outcome;
            }
        };

        if header.device_id != self.config.peer_device_id {
            let stream = header.stream_type;
            let reason = format!("device id mismatch: got {}, expected {}", header.device_id, self.config.peer_device_id);
            outcome.events.push(ExchangeEvent::MalformedPayload { stream: Some(stream), reason: reason.clone() });
            if let Some(reason) = self.note_malformed(Some(stream), reason) {
                outcome.events.push(ExchangeEvent::ProtocolError { stream: Some(stream), reason });
            }
            return outcome;
        }

        let body = reader.read_raw(reader.remaining()).unwrap_or(&[]).to_vec();
        let request = PacketRequest { header, body };

        match request.header.packet_type {
            PacketType::Unreliable => {
                outcome.events.push(ExchangeEvent::Delivered {
                    stream: request.header.stream_type,
                    body: request.body,
                });
            }
            PacketType::Reliable => self.handle_reliable(request, &mut outcome),
            PacketType::Receipt => self.handle_receipt(request, &mut outcome),
        }

        outcome
    }

    fn handle_reliable(&mut self, request: PacketRequest, outcome: &mut ExchangeOutcome) {
        let stream_type = request.header.stream_type;
        let counter = request.header.counter;
        let tick_time = request.header.tick_time;
        let expected = self.stream_mut(stream_type).expected_inbound_counter();

        match compare_counters(counter, expected) {
            CounterOrdering::Expected => {
                let state = self.stream_mut(stream_type);
                state.advance_inbound_counter();
                state.record_ok_receipt(counter);
                outcome.events.push(ExchangeEvent::Delivered {
                    stream: stream_type,
                    body: request.body,
                });
                let receipt_header = self.build_header(stream_type, PacketType::Receipt, counter, tick_time);
                outcome.send(encode_receipt(receipt_header, Receipt::Ok));
            }
            CounterOrdering::Older => {
                let last_ok = self
                    .stream_mut(stream_type)
                    .last_ok_receipt()
                    .unwrap_or(expected.wrapping_sub(1));
                let receipt_header = self.build_header(stream_type, PacketType::Receipt, last_ok, tick_time);
                outcome.send(encode_receipt(receipt_header, Receipt::Ok));
            }
            CounterOrdering::Newer => {
                let receipt_header = self.build_header(stream_type, PacketType::Receipt, counter, tick_time);
                outcome.send(encode_receipt(receipt_header, Receipt::CounterCorrection(expected)));
            }
        }
    }

    fn handle_receipt(&mut self, request: PacketRequest, outcome: &mut ExchangeOutcome) {
        let stream_type = request.header.stream_type;
        let tick_time = request.header.tick_time;

        let mut reader = crate::codec::ByteReader::new(&request.body);
        let receipt = match Receipt::decode(&mut reader) {
            Some(r) => r,
            None => {
                let reason = self.note_malformed(Some(stream_type), "failed to decode receipt body".to_owned());
                if let Some(reason) = reason {
                    outcome.events.push(ExchangeEvent::ProtocolError { stream: Some(stream_type), reason });
                }
                return;
            }
        };

        let state = self.stream_mut(stream_type);
        let head_counter = match state.head() {
            Some(head) => head.response.header.counter,
            None => return,
        };

        if request.header.counter != head_counter {
            // Stale receipt for an already-resolved packet; ignore.
            return;
        }

        match receipt {
            Receipt::Ok => {
                state.pop_head_acked();
            }
            Receipt::CounterCorrection(peer_expected) => {
                state.set_reliable_counter(peer_expected);
                if let Some(head) = state.head_mut() {
                    head.response.header.counter = peer_expected;
                    head.retry_count += 1;
                    outcome.send(head.response.clone());
                }
            }
            Receipt::PacketError | Receipt::PayloadError => {
                if let Some(head) = state.head_mut() {
                    head.retry_count += 1;
                    outcome.send(head.response.clone());
                }
            }
        }
        let _ = tick_time;
    }

    /// Counts one malformed payload toward the protocol-error threshold.
    /// `stream` is `None` for failures that precede header decoding (no
    /// stream is known yet), in which case the link-wide counter is used.
    fn note_malformed(&mut self, stream: Option<StreamType>, _reason: String) -> Option<String> {
        let count = match stream {
            Some(stream) => self.stream_mut(stream).record_malformed(),
            None => {
                self.framing_malformed_count += 1;
                self.framing_malformed_count
            }
        };
        if count >= self.config.protocol_error_threshold {
            match stream {
                Some(stream) => self.stream_mut(stream).reset_malformed(),
                None => self.framing_malformed_count = 0,
            }
            Some(match stream {
                Some(stream) => format!("{count} consecutive malformed payloads on {stream:?}"),
                None => format!("{count} consecutive payloads failed to decode a packet header"),
            })
        } else {
            None
        }
    }

    /// Called when the retransmission timer for `stream` fires at
    /// `generation`. Resends the head of the queue if the generation is
    /// still current; otherwise the tick is stale and ignored. Returns
    /// `FatalError` and clears the queue if the retry budget is
    /// exhausted.
    pub fn on_retransmit_timeout(&mut self, stream: StreamType, generation: u64, tick_time: u64) -> ExchangeOutcome {
        let mut outcome = ExchangeOutcome::default();
        let state = self.stream_mut(stream);
        if state.armed_generation() != generation {
            return outcome;
        }
        let Some(head) = state.head_mut() else {
            return outcome;
        };
        if head.retry_count >= self.config.max_retries {
            let reason = format!("retransmission budget ({}) exhausted", self.config.max_retries);
            state.clear_queue();
            outcome.events.push(ExchangeEvent::FatalError { stream, reason });
            return outcome;
        }
        head.retry_count += 1;
        head.response.header.tick_time = tick_time;
        outcome.send(head.response.clone());
        outcome
    }

    pub fn armed_generation(&self, stream: StreamType) -> u64 {
        self.streams
            .get(&stream)
            .map(StreamState::armed_generation)
            .unwrap_or(0)
    }

    pub fn queue_len(&self, stream: StreamType) -> usize {
        self.streams.get(&stream).map(StreamState::queue_len).unwrap_or(0)
    }
}

fn encode_receipt(header: PacketHeader, receipt: Receipt) -> PacketResponse {
    let mut buf = [0u8; 16];
    let mut w = crate::codec::ByteWriter::new(&mut buf);
    receipt.encode(&mut w);
    let body = w.written().to_vec();
    PacketResponse { header, body }
}

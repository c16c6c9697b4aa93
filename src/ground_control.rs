//! The top-level actor: owns the inbound byte buffer, the [`Exchange`]
//! demultiplexer, and the [`FwtClient`] state machine, and drives them
//! from a single `mpsc` mailbox.
//!
//! [`GroundControlCore`] is the pure, synchronous routing table: feed it
//! a [`GcCommand`] and it returns the frames to send and the events to
//! publish. [`GroundControl`] is the `tokio::spawn` + `mpsc` shell around
//! it that owns the real transport and timers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::{ExchangeConfig, FramerConfig, FwtConfig};
use crate::error::CoreError;
use crate::exchange::{Exchange, ExchangeEffect, ExchangeEvent};
use crate::framer::{frame_payload, Framer};
use crate::fwt::{FwtClient, FwtEffect, FwtEvent, FwtPersistence};
use crate::messages::{GcCommand, GcEvent};
use crate::packet::{PacketResponse, StreamType};
use crate::project::{ProjectDecoder, StreamClient};
use crate::transport::TransportSink;

/// Things the async shell must do in response to one mailbox message:
/// write framed bytes to the transport, or arm a timer.
#[derive(Debug)]
enum GcEffect {
    SendFrame(Vec<u8>),
    ScheduleRetransmit { stream: StreamType, generation: u64, after: Duration },
    ScheduleFwtHash { generation: u64, after: Duration },
    ScheduleFwtStart { generation: u64, after: Duration },
    ScheduleFwtCheck { generation: u64, after: Duration },
}

#[derive(Debug, Default)]
struct GcOutcome {
    effects: Vec<GcEffect>,
    events: Vec<GcEvent>,
}

impl GcOutcome {
    fn merge(&mut self, other: GcOutcome) {
        self.effects.extend(other.effects);
        self.events.extend(other.events);
    }
}

/// The pure, synchronous core: everything [`GroundControl`] does boils
/// down to calling one of these methods and acting on the result.
struct GroundControlCore {
    exchange_config: ExchangeConfig,
    fwt_config: FwtConfig,
    framer: Framer,
    exchange: Exchange,
    fwt: FwtClient,
    /// The command/telemetry stream's external consumer. `None` simply
    /// drops CmdTelem payloads after publishing them as [`GcEvent::Delivered`].
    cmd_stream_client: Option<Arc<dyn StreamClient>>,
    logging_enabled: bool,
}

impl GroundControlCore {
    fn new(
        exchange_config: ExchangeConfig,
        fwt_config: FwtConfig,
        framer_config: FramerConfig,
        decoder: Arc<dyn ProjectDecoder>,
        persistence: Option<Arc<dyn FwtPersistence>>,
        cmd_stream_client: Option<Arc<dyn StreamClient>>,
    ) -> Self {
        GroundControlCore {
            framer: Framer::new(framer_config.max_payload_size),
            exchange: Exchange::new(exchange_config),
            fwt: FwtClient::new(fwt_config, decoder, persistence),
            cmd_stream_client,
            exchange_config,
            fwt_config,
            logging_enabled: false,
        }
    }

    fn encode_frame(&self, response: &PacketResponse) -> Vec<u8> {
        let mut buf = vec![0u8; response.body.len() + 32];
        let n = response.encode_into(&mut buf).expect("header plus body always fits an oversized scratch buffer");
        frame_payload(&buf[..n])
    }

    /// Wraps a firmware-transfer command body in an unreliable packet on
    /// the Firmware stream and frames it for the transport. The fwt
    /// client retries its own commands on a timer, so it does not use
    /// the `Exchange`'s reliable queue.
    fn frame_fwt_send(&mut self, body: Vec<u8>) -> Vec<u8> {
        let response = self.exchange.send_unreliable(StreamType::Firmware, 0, body);
        self.encode_frame(&response)
    }

    fn apply_fwt_outcome(&mut self, outcome: crate::fwt::FwtOutcome, out: &mut GcOutcome) {
        for effect in outcome.effects {
            match effect {
                FwtEffect::Send(body) => out.effects.push(GcEffect::SendFrame(self.frame_fwt_send(body))),
                FwtEffect::ScheduleHashTimer(generation) => out.effects.push(GcEffect::ScheduleFwtHash {
                    generation,
                    after: self.fwt_config.hash_retry_interval,
                }),
                FwtEffect::ScheduleStartTimer(generation) => out.effects.push(GcEffect::ScheduleFwtStart {
                    generation,
                    after: self.fwt_config.start_retry_interval,
                }),
                FwtEffect::ScheduleCheckTimer(generation) => out.effects.push(GcEffect::ScheduleFwtCheck {
                    generation,
                    after: self.fwt_config.check_interval,
                }),
            }
        }
        for event in outcome.events {
            if matches!(event, FwtEvent::Error(_)) && self.logging_enabled {
                crate::logging::log_warn(&format!("{event:?}"));
            }
            out.events.push(GcEvent::Fwt(event));
        }
    }

    fn handle_inbound_bytes(&mut self, bytes: Vec<u8>, out: &mut GcOutcome) {
        self.framer.feed(&bytes);
        while let Some(payload) = self.framer.next_payload() {
            let exchange_outcome = self.exchange.handle_inbound_payload(&payload);
            for effect in exchange_outcome.effects {
                let ExchangeEffect::Send(response) = effect;
                out.effects.push(GcEffect::SendFrame(self.encode_frame(&response)));
            }
            for event in exchange_outcome.events {
                match event {
                    ExchangeEvent::Delivered { stream: StreamType::Firmware, body } => {
                        let fwt_outcome = self.fwt.accept_data(&body);
                        self.apply_fwt_outcome(fwt_outcome, out);
                    }
                    ExchangeEvent::Delivered { stream: StreamType::CmdTelem, body } => {
                        if let Some(client) = &self.cmd_stream_client {
                            client.on_payload(&body);
                        }
                        out.events.push(GcEvent::Delivered { stream: StreamType::CmdTelem, body });
                    }
                    ExchangeEvent::Delivered { stream, body } => {
                        out.events.push(GcEvent::Delivered { stream, body });
                    }
                    ExchangeEvent::MalformedPayload { reason, .. } => {
                        if self.logging_enabled {
                            crate::logging::log_debug(&reason);
                        }
                    }
                    ExchangeEvent::ProtocolError { reason, .. } | ExchangeEvent::FatalError { reason, .. } => {
                        out.events.push(GcEvent::StreamError(reason));
                    }
                }
            }
        }
    }

    fn handle(&mut self, command: GcCommand) -> GcOutcome {
        let mut out = GcOutcome::default();
        match command {
            GcCommand::RecvData(bytes) => self.handle_inbound_bytes(bytes, &mut out),
            GcCommand::SendUnreliablePacket { stream, body } => {
                let response = self.exchange.send_unreliable(stream, 0, body);
                out.effects.push(GcEffect::SendFrame(self.encode_frame(&response)));
            }
            GcCommand::SendReliablePacket { stream, body } => {
                if let Some(response) = self.exchange.send_reliable(stream, 0, body) {
                    out.effects.push(GcEffect::SendFrame(self.encode_frame(&response)));
                    out.effects.push(GcEffect::ScheduleRetransmit {
                        stream,
                        generation: self.exchange.armed_generation(stream),
                        after: self.exchange_config.retransmit_interval,
                    });
                }
            }
            GcCommand::SendGcCommand(body) => {
                if let Some(response) = self.exchange.send_reliable(StreamType::CmdTelem, 0, body) {
                    out.effects.push(GcEffect::SendFrame(self.encode_frame(&response)));
                    out.effects.push(GcEffect::ScheduleRetransmit {
                        stream: StreamType::CmdTelem,
                        generation: self.exchange.armed_generation(StreamType::CmdTelem),
                        after: self.exchange_config.retransmit_interval,
                    });
                }
            }
            GcCommand::SetProject(project) => {
                let fwt_outcome = self.fwt.on_project_set(&*project);
                self.apply_fwt_outcome(fwt_outcome, &mut out);
            }
            GcCommand::Start => {
                let fwt_outcome = self.fwt.start();
                self.apply_fwt_outcome(fwt_outcome, &mut out);
            }
            GcCommand::Stop => {
                let fwt_outcome = self.fwt.stop();
                self.apply_fwt_outcome(fwt_outcome, &mut out);
            }
            GcCommand::EnableLogging(enabled) => self.logging_enabled = enabled,
        }
        out
    }

    fn on_retransmit_timeout(&mut self, stream: StreamType, generation: u64) -> GcOutcome {
        let mut out = GcOutcome::default();
        let exchange_outcome = self.exchange.on_retransmit_timeout(stream, generation, 0);
        for effect in exchange_outcome.effects {
            let ExchangeEffect::Send(response) = effect;
            out.effects.push(GcEffect::SendFrame(self.encode_frame(&response)));
            out.effects.push(GcEffect::ScheduleRetransmit {
                stream,
                generation: self.exchange.armed_generation(stream),
                after: self.exchange_config.retransmit_interval,
            });
        }
        for event in exchange_outcome.events {
            if let ExchangeEvent::FatalError { reason, .. } = event {
                out.events.push(GcEvent::StreamError(reason));
            }
        }
        out
    }

    fn on_fwt_hash_timer(&mut self, generation: u64) -> GcOutcome {
        let mut out = GcOutcome::default();
        let outcome = self.fwt.on_hash_timer(generation);
        self.apply_fwt_outcome(outcome, &mut out);
        out
    }

    fn on_fwt_start_timer(&mut self, generation: u64) -> GcOutcome {
        let mut out = GcOutcome::default();
        let outcome = self.fwt.on_start_timer(generation);
        self.apply_fwt_outcome(outcome, &mut out);
        out
    }

    fn on_fwt_check_timer(&mut self, generation: u64) -> GcOutcome {
        let mut out = GcOutcome::default();
        let outcome = self.fwt.on_check_timer(generation);
        self.apply_fwt_outcome(outcome, &mut out);
        out
    }
}

/// Internal mailbox: embedder commands plus the actor's own delayed
/// timer messages, sharing one channel so every handler call is
/// run-to-completion against a single, un-shared `GroundControlCore`.
#[derive(Debug)]
enum Mailbox {
    Command(GcCommand),
    RetransmitTimeout { stream: StreamType, generation: u64 },
    FwtHashTimer(u64),
    FwtStartTimer(u64),
    FwtCheckTimer(u64),
}

/// A handle to a running ground-control actor task.
pub struct GroundControl {
    mailbox: mpsc::Sender<Mailbox>,
}

impl GroundControl {
    /// Spawns the actor task and returns a handle to its mailbox.
    /// `events` receives every [`GcEvent`] the actor publishes;
    /// `transport` is where framed bytes are written.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        exchange_config: ExchangeConfig,
        fwt_config: FwtConfig,
        framer_config: FramerConfig,
        decoder: Arc<dyn ProjectDecoder>,
        persistence: Option<Arc<dyn FwtPersistence>>,
        cmd_stream_client: Option<Arc<dyn StreamClient>>,
        transport: Arc<dyn TransportSink>,
        events: mpsc::Sender<GcEvent>,
    ) -> GroundControl {
        let core = GroundControlCore::new(exchange_config, fwt_config, framer_config, decoder, persistence, cmd_stream_client);
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(run(core, rx, tx.clone(), transport, events));
        GroundControl { mailbox: tx }
    }

    /// Sends a command into the actor's mailbox.
    pub async fn send(&self, command: GcCommand) -> Result<(), CoreError> {
        self.mailbox
            .send(Mailbox::Command(command))
            .await
            .map_err(|_| CoreError::FatalError("ground control actor has stopped".to_owned()))
    }
}

async fn run(
    mut core: GroundControlCore,
    mut mailbox: mpsc::Receiver<Mailbox>,
    self_tx: mpsc::Sender<Mailbox>,
    transport: Arc<dyn TransportSink>,
    events: mpsc::Sender<GcEvent>,
) {
    while let Some(message) = mailbox.recv().await {
        let outcome = match message {
            Mailbox::Command(command) => core.handle(command),
            Mailbox::RetransmitTimeout { stream, generation } => core.on_retransmit_timeout(stream, generation),
            Mailbox::FwtHashTimer(generation) => core.on_fwt_hash_timer(generation),
            Mailbox::FwtStartTimer(generation) => core.on_fwt_start_timer(generation),
            Mailbox::FwtCheckTimer(generation) => core.on_fwt_check_timer(generation),
        };

        for effect in outcome.effects {
            match effect {
                GcEffect::SendFrame(bytes) => {
                    if let Err(e) = transport.send(&bytes).await {
                        let _ = events.send(GcEvent::StreamError(format!("transport send failed: {e}"))).await;
                    }
                }
                GcEffect::ScheduleRetransmit { stream, generation, after } => {
                    arm_timer(self_tx.clone(), after, Mailbox::RetransmitTimeout { stream, generation });
                }
                GcEffect::ScheduleFwtHash { generation, after } => {
                    arm_timer(self_tx.clone(), after, Mailbox::FwtHashTimer(generation));
                }
                GcEffect::ScheduleFwtStart { generation, after } => {
                    arm_timer(self_tx.clone(), after, Mailbox::FwtStartTimer(generation));
                }
                GcEffect::ScheduleFwtCheck { generation, after } => {
                    arm_timer(self_tx.clone(), after, Mailbox::FwtCheckTimer(generation));
                }
            }
        }

        for event in outcome.events {
            let _ = events.send(event).await;
        }
    }
}

fn arm_timer(tx: mpsc::Sender<Mailbox>, after: Duration, message: Mailbox) {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        let _ = tx.send(message).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use crate::error::CoreError as Err;
    use crate::framer::find_packet;
    use crate::project::{Device, Project};

    #[derive(Debug)]
    struct NullDevice;
    impl Device for NullDevice {
        fn name(&self) -> &str {
            "null"
        }
    }

    #[derive(Debug)]
    struct NullProject;
    impl Project for NullProject {
        fn device_with_name(&self, _name: &str) -> Option<Arc<dyn Device>> {
            Some(Arc::new(NullDevice))
        }
        fn encode(&self) -> Vec<u8> {
            Vec::new()
        }
    }

    struct NullDecoder;
    impl ProjectDecoder for NullDecoder {
        fn decode_from_memory(&self, _bytes: &[u8]) -> Result<Arc<dyn Project>, Err> {
            Ok(Arc::new(NullProject))
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        sent: StdMutex<Vec<Vec<u8>>>,
    }

    #[async_trait::async_trait]
    impl TransportSink for RecordingTransport {
        async fn send(&self, bytes: &[u8]) -> Result<(), Err> {
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    fn core() -> GroundControlCore {
        GroundControlCore::new(
            ExchangeConfig {
                peer_device_id: 0,
                self_device_id: 1,
                ..ExchangeConfig::default()
            },
            FwtConfig::default(),
            FramerConfig::default(),
            Arc::new(NullDecoder),
            None,
            None,
        )
    }

    #[test]
    fn start_command_frames_a_hash_request_onto_the_wire() {
        let mut c = core();
        let outcome = c.handle(GcCommand::Start);
        assert_eq!(outcome.effects.len(), 1);
        let GcEffect::SendFrame(bytes) = &outcome.effects[0] else {
            panic!("expected a framed send")
        };
        let result = find_packet(bytes);
        assert_eq!(result.data_size, bytes.len());
    }

    #[test]
    fn send_unreliable_packet_produces_exactly_one_frame() {
        let mut c = core();
        let outcome = c.handle(GcCommand::SendUnreliablePacket {
            stream: StreamType::User,
            body: b"hi".to_vec(),
        });
        assert_eq!(outcome.effects.len(), 1);
    }

    #[test]
    fn send_reliable_packet_arms_a_retransmit_timer() {
        let mut c = core();
        let outcome = c.handle(GcCommand::SendReliablePacket {
            stream: StreamType::User,
            body: b"hi".to_vec(),
        });
        assert_eq!(outcome.effects.len(), 2);
        assert!(matches!(outcome.effects[0], GcEffect::SendFrame(_)));
        assert!(matches!(outcome.effects[1], GcEffect::ScheduleRetransmit { .. }));
    }

    #[tokio::test]
    async fn spawned_actor_writes_start_frame_to_transport() {
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let transport = Arc::new(RecordingTransport::default());
        let gc = GroundControl::spawn(
            ExchangeConfig {
                peer_device_id: 0,
                self_device_id: 1,
                ..ExchangeConfig::default()
            },
            FwtConfig::default(),
            FramerConfig::default(),
            Arc::new(NullDecoder),
            None,
            None,
            transport.clone(),
            events_tx,
        );
        gc.send(GcCommand::Start).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), events_rx.recv()).await.expect("event arrives");
        assert!(matches!(event, Some(GcEvent::Fwt(FwtEvent::DownloadStarted))));
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }
}

//! Firmware-transfer (FWT) client: drives the hash/start/chunk download
//! protocol and owns the download buffer and [`IntervalSet`].
//!
//! Like [`crate::exchange::Exchange`], this is a synchronous core:
//! `accept_data`, `on_hash_timer`, `on_start_timer`, and `on_check_timer`
//! each return the actions ([`FwtEffect`]) an async shell should take
//! (send a packet, arm a timer) rather than performing them directly.

use std::sync::Arc;

use rand::Rng;
use sha3::{Digest, Sha3_512};

use crate::codec::{ByteReader, ByteWriter};
use crate::config::FwtConfig;
use crate::constants::FIRMWARE_HASH_SIZE;
use crate::error::CoreError;
use crate::interval_set::IntervalSet;
use crate::project::{Device, Project, ProjectDecoder};

/// Firmware opcodes sent to the peer.
mod opcode {
    pub const REQUEST_HASH: u64 = 0;
    pub const REQUEST_CHUNK: u64 = 1;
    pub const START: u64 = 2;
    pub const STOP: u64 = 3;
}

/// Response tags the peer sends back (same numbering as [`opcode`]).
mod response_tag {
    pub const HASH: u64 = 0;
    pub const CHUNK: u64 = 1;
    pub const START: u64 = 2;
    pub const STOP: u64 = 3;
}

/// The firmware-transfer state machine's current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FwtPhase {
    Idle,
    AwaitingHash,
    AwaitingStart,
    Downloading,
    Verifying,
    Ready,
}

/// Persisted `(device_name, image_hash, project_bytes)` triplet, used to
/// skip a re-download on reconnect when the firmware hasn't changed.
pub trait FwtPersistence: Send + Sync {
    fn load(&self, device_name: &str) -> Result<Option<PersistedFirmware>, CoreError>;
    fn store(&self, record: &PersistedFirmware) -> Result<(), CoreError>;
}

#[derive(Debug, Clone)]
pub struct PersistedFirmware {
    pub device_name: String,
    pub image_hash: [u8; FIRMWARE_HASH_SIZE],
    pub project_bytes: Vec<u8>,
}

/// Observable milestones the embedder subscribes to.
#[derive(Debug, Clone)]
pub enum FwtEvent {
    DownloadStarted,
    SizeReceived(usize),
    HashDownloaded { device_name: String, hash: [u8; FIRMWARE_HASH_SIZE] },
    StartCmdSent,
    StartCmdPassed,
    Progress(usize),
    DownloadFinished,
    Error(String),
    ProjectReady { project: Arc<dyn Project>, device: Arc<dyn Device> },
}

/// Things the async shell must do as a result of a step: send a command
/// body on the Firmware stream, or (re)arm a timer carrying the current
/// generation.
#[derive(Debug, Clone)]
pub enum FwtEffect {
    Send(Vec<u8>),
    ScheduleHashTimer(u64),
    ScheduleStartTimer(u64),
    ScheduleCheckTimer(u64),
}

#[derive(Debug, Default)]
pub struct FwtOutcome {
    pub effects: Vec<FwtEffect>,
    pub events: Vec<FwtEvent>,
}

impl FwtOutcome {
    fn send(&mut self, body: Vec<u8>) {
        self.effects.push(FwtEffect::Send(body));
    }
}

fn hash_matches(expected: &[u8; FIRMWARE_HASH_SIZE], data: &[u8]) -> bool {
    let digest = Sha3_512::digest(data);
    digest.as_slice() == expected.as_slice()
}

/// Computes the policy-selected next chunk range given what's already
/// received. Returns `None` once `received` fully covers `[0, image_size)`.
fn next_chunk_request(received: &IntervalSet, image_size: usize) -> Option<(usize, usize)> {
    if received.is_empty() {
        return Some((0, image_size));
    }
    if received.len() == 1 {
        let iv = received.at(0).expect("len() == 1");
        if iv.start() == 0 {
            if iv.end() >= image_size {
                return None;
            }
            return Some((iv.end(), image_size));
        }
        return Some((0, iv.start()));
    }
    let first = received.at(0).expect("len() >= 2");
    let second = received.at(1).expect("len() >= 2");
    if first.start() == 0 {
        Some((first.end(), second.start()))
    } else {
        Some((0, first.start()))
    }
}

/// The firmware-transfer client. One instance per remote device.
pub struct FwtClient {
    config: FwtConfig,
    decoder: Arc<dyn ProjectDecoder>,
    persistence: Option<Arc<dyn FwtPersistence>>,

    phase: FwtPhase,
    expected_hash: Option<[u8; FIRMWARE_HASH_SIZE]>,
    image_size: usize,
    buffer: Vec<u8>,
    received: IntervalSet,
    start_nonce: u64,
    device_name: String,
    /// Generation counter bumped on start/stop/restart; stale timer
    /// ticks carrying an older generation are no-ops.
    generation: u64,
    downloaded_hash: Option<[u8; FIRMWARE_HASH_SIZE]>,
}

impl FwtClient {
    pub fn new(config: FwtConfig, decoder: Arc<dyn ProjectDecoder>, persistence: Option<Arc<dyn FwtPersistence>>) -> Self {
        FwtClient {
            config,
            decoder,
            persistence,
            phase: FwtPhase::Idle,
            expected_hash: None,
            image_size: 0,
            buffer: Vec::new(),
            received: IntervalSet::new(),
            start_nonce: 0,
            device_name: String::new(),
            generation: 0,
            downloaded_hash: None,
        }
    }

    pub fn phase(&self) -> FwtPhase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn reset_to_idle(&mut self) {
        self.phase = FwtPhase::Idle;
        self.expected_hash = None;
        self.image_size = 0;
        self.buffer = Vec::new();
        self.received.clear();
        self.device_name.clear();
        self.generation += 1;
    }

    /// Begins (or restarts) a download from the top: `Idle -> AwaitingHash`.
    pub fn start(&mut self) -> FwtOutcome {
        self.reset_to_idle();
        self.phase = FwtPhase::AwaitingHash;
        let mut outcome = FwtOutcome::default();
        outcome.events.push(FwtEvent::DownloadStarted);
        outcome.send(encode_tagged(opcode::REQUEST_HASH, |_| {}));
        outcome.effects.push(FwtEffect::ScheduleHashTimer(self.generation));
        outcome
    }

    /// `Stop` message: returns to `Idle`, releases the buffer, and bumps
    /// the generation so outstanding timers become no-ops.
    pub fn stop(&mut self) -> FwtOutcome {
        self.reset_to_idle();
        FwtOutcome::default()
    }

    /// The embedder supplied (or re-supplied) a project. If it no longer
    /// matches the last downloaded hash, the cache is invalidated and a
    /// fresh download starts.
    pub fn on_project_set(&mut self, project: &dyn Project) -> FwtOutcome {
        match &self.downloaded_hash {
            None => self.start(),
            Some(hash) => {
                let encoded = project.encode();
                if hash_matches(hash, &encoded) {
                    FwtOutcome::default()
                } else {
                    self.downloaded_hash = None;
                    self.start()
                }
            }
        }
    }

    pub fn on_hash_timer(&mut self, generation: u64) -> FwtOutcome {
        let mut outcome = FwtOutcome::default();
        if generation != self.generation || self.phase != FwtPhase::AwaitingHash {
            return outcome;
        }
        outcome.send(encode_tagged(opcode::REQUEST_HASH, |_| {}));
        outcome.effects.push(FwtEffect::ScheduleHashTimer(self.generation));
        outcome
    }

    pub fn on_start_timer(&mut self, generation: u64) -> FwtOutcome {
        let mut outcome = FwtOutcome::default();
        if generation != self.generation || self.phase != FwtPhase::AwaitingStart {
            return outcome;
        }
        outcome.events.push(FwtEvent::StartCmdSent);
        outcome.send(encode_tagged(opcode::START, |w| {
            w.write_varuint(self.start_nonce);
        }));
        outcome.effects.push(FwtEffect::ScheduleStartTimer(self.generation));
        outcome
    }

    pub fn on_check_timer(&mut self, generation: u64) -> FwtOutcome {
        let mut outcome = FwtOutcome::default();
        if generation != self.generation || self.phase != FwtPhase::Downloading {
            return outcome;
        }
        self.apply_chunk_policy(&mut outcome);
        outcome
    }

    /// Dispatches one inbound firmware-stream payload to its response
    /// handler, per the leading `varuint` tag.
    pub fn accept_data(&mut self, body: &[u8]) -> FwtOutcome {
        let mut outcome = FwtOutcome::default();
        if self.phase == FwtPhase::Idle {
            return outcome;
        }
        let mut reader = ByteReader::new(body);
        let tag = match reader.read_varuint() {
            Some(t) => t,
            None => {
                outcome.events.push(FwtEvent::Error("received firmware response with no tag".to_owned()));
                return outcome;
            }
        };
        match tag {
            response_tag::HASH => self.accept_hash_response(&mut reader, &mut outcome),
            response_tag::CHUNK => self.accept_chunk_response(&mut reader, &mut outcome),
            response_tag::START => self.accept_start_response(&mut reader, &mut outcome),
            response_tag::STOP => {}
            other => outcome.events.push(FwtEvent::Error(format!("received invalid fwt response tag: {other}"))),
        }
        outcome
    }

    fn accept_hash_response(&mut self, reader: &mut ByteReader, outcome: &mut FwtOutcome) {
        if self.phase != FwtPhase::AwaitingHash {
            return;
        }
        let image_size = match reader.read_varuint() {
            Some(v) => v as usize,
            None => {
                outcome.events.push(FwtEvent::Error("received hash response with invalid firmware size".to_owned()));
                return;
            }
        };
        let device_name = match reader.read_string() {
            Some(s) => s,
            None => {
                outcome.events.push(FwtEvent::Error("received hash response with invalid device name".to_owned()));
                return;
            }
        };
        let hash_bytes = match reader.read_raw(FIRMWARE_HASH_SIZE) {
            Some(b) => b,
            None => {
                outcome.events.push(FwtEvent::Error(format!(
                    "received hash response with invalid hash size: {} bytes left",
                    reader.remaining()
                )));
                return;
            }
        };
        let mut hash = [0u8; FIRMWARE_HASH_SIZE];
        hash.copy_from_slice(hash_bytes);

        self.image_size = image_size;
        self.device_name = device_name.clone();
        self.expected_hash = Some(hash);
        self.buffer = vec![0u8; image_size];
        self.received.clear();
        self.start_nonce = rand::thread_rng().gen::<u64>();

        outcome.events.push(FwtEvent::SizeReceived(image_size));
        outcome.events.push(FwtEvent::HashDownloaded { device_name: device_name.clone(), hash });

        if let Some(persistence) = &self.persistence {
            if let Ok(Some(record)) = persistence.load(&device_name) {
                if record.image_hash == hash {
                    if let Ok(project) = self.decoder.decode_from_memory(&record.project_bytes) {
                        if let Some(device) = project.device_with_name(&device_name) {
                            self.downloaded_hash = Some(hash);
                            self.phase = FwtPhase::Ready;
                            outcome.events.push(FwtEvent::DownloadFinished);
                            outcome.events.push(FwtEvent::ProjectReady { project, device });
                            return;
                        }
                    }
                }
            }
        }

        self.phase = FwtPhase::AwaitingStart;
        outcome.events.push(FwtEvent::StartCmdSent);
        outcome.send(encode_tagged(opcode::START, |w| {
            w.write_varuint(self.start_nonce);
        }));
        outcome.effects.push(FwtEffect::ScheduleStartTimer(self.generation));
    }

    fn accept_start_response(&mut self, reader: &mut ByteReader, outcome: &mut FwtOutcome) {
        if self.phase != FwtPhase::AwaitingStart {
            return;
        }
        let echoed = match reader.read_varuint() {
            Some(v) => v,
            None => {
                outcome.events.push(FwtEvent::Error("received invalid start command nonce".to_owned()));
                return;
            }
        };
        if echoed != self.start_nonce {
            outcome.events.push(FwtEvent::Error(format!(
                "received mismatched start nonce: expected {}, got {echoed}",
                self.start_nonce
            )));
            return;
        }
        self.phase = FwtPhase::Downloading;
        outcome.events.push(FwtEvent::StartCmdPassed);
        self.apply_chunk_policy(outcome);
    }

    fn accept_chunk_response(&mut self, reader: &mut ByteReader, outcome: &mut FwtOutcome) {
        if self.phase != FwtPhase::Downloading {
            if matches!(self.phase, FwtPhase::AwaitingHash | FwtPhase::AwaitingStart) {
                outcome.events.push(FwtEvent::Error("received firmware chunk before start completed".to_owned()));
            }
            return;
        }
        let start = match reader.read_varuint() {
            Some(v) => v as usize,
            None => {
                outcome.events.push(FwtEvent::Error("received firmware chunk with invalid start offset".to_owned()));
                return;
            }
        };
        let chunk = reader.read_raw(reader.remaining()).unwrap_or(&[]);
        let end = start + chunk.len();

        if start > self.image_size || end > self.image_size {
            outcome.events.push(FwtEvent::Error("received firmware chunk out of bounds".to_owned()));
            return;
        }

        self.buffer[start..end].copy_from_slice(chunk);
        self.received.add(start, end);
        self.generation += 1;
        outcome.events.push(FwtEvent::Progress(self.received.total_covered()));
        self.apply_chunk_policy(outcome);
    }

    /// Re-evaluates the chunk-request policy: requests the next range,
    /// or transitions to `Verifying` once fully covered.
    fn apply_chunk_policy(&mut self, outcome: &mut FwtOutcome) {
        match next_chunk_request(&self.received, self.image_size) {
            Some((start, end)) => {
                outcome.send(encode_tagged(opcode::REQUEST_CHUNK, |w| {
                    w.write_varuint(start as u64);
                    w.write_varuint(end as u64);
                }));
                outcome.effects.push(FwtEffect::ScheduleCheckTimer(self.generation));
            }
            None => self.verify(outcome),
        }
    }

    fn verify(&mut self, outcome: &mut FwtOutcome) {
        self.phase = FwtPhase::Verifying;
        outcome.events.push(FwtEvent::DownloadFinished);

        let expected = match &self.expected_hash {
            Some(h) => *h,
            None => {
                outcome.events.push(FwtEvent::Error("verifying with no expected hash recorded".to_owned()));
                self.reset_to_idle();
                return;
            }
        };

        if !hash_matches(&expected, &self.buffer) {
            outcome.events.push(FwtEvent::Error("invalid firmware hash".to_owned()));
            self.reset_to_idle();
            self.phase = FwtPhase::AwaitingHash;
            outcome.send(encode_tagged(opcode::REQUEST_HASH, |_| {}));
            outcome.effects.push(FwtEffect::ScheduleHashTimer(self.generation));
            return;
        }

        let project = match self.decoder.decode_from_memory(&self.buffer) {
            Ok(p) => p,
            Err(e) => {
                outcome.events.push(FwtEvent::Error(format!("failed to decode downloaded project: {e}")));
                self.reset_to_idle();
                return;
            }
        };
        let device = match project.device_with_name(&self.device_name) {
            Some(d) => d,
            None => {
                outcome.events.push(FwtEvent::Error(format!("project has no device named '{}'", self.device_name)));
                self.reset_to_idle();
                return;
            }
        };

        if let Some(persistence) = &self.persistence {
            let _ = persistence.store(&PersistedFirmware {
                device_name: self.device_name.clone(),
                image_hash: expected,
                project_bytes: self.buffer.clone(),
            });
        }

        self.downloaded_hash = Some(expected);
        self.phase = FwtPhase::Ready;
        self.buffer = Vec::new();
        outcome.events.push(FwtEvent::ProjectReady { project, device });
    }
}

fn encode_tagged(tag: u64, build_body: impl FnOnce(&mut ByteWriter)) -> Vec<u8> {
    let mut buf = vec![0u8; 256];
    let mut w = ByteWriter::new(&mut buf);
    w.write_varuint(tag);
    build_body(&mut w);
    let n = w.position();
    buf.truncate(n);
    buf
}

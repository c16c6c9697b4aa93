//! Demonstrates wiring [`groundcontrol_rs::GroundControl`] to a real
//! serial port via `tokio_serial`.
//!
//! Run with `cargo run --example serial_transport -- /dev/ttyUSB0`.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{split, AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use groundcontrol_rs::error::CoreError;
use groundcontrol_rs::fwt::FwtEvent;
use groundcontrol_rs::project::{Device, Project, ProjectDecoder};
use groundcontrol_rs::transport::TransportSink;
use groundcontrol_rs::{ExchangeConfig, FramerConfig, FwtConfig, GcCommand, GcEvent, GroundControl};

const BAUD_RATE: u32 = 115_200;

/// Wraps the write half of a split `tokio_serial::SerialStream` behind
/// [`TransportSink`].
struct SerialTransport {
    writer: Mutex<WriteHalf<SerialStream>>,
}

#[async_trait]
impl TransportSink for SerialTransport {
    async fn send(&self, bytes: &[u8]) -> Result<(), CoreError> {
        let mut port = self.writer.lock().await;
        port.write_all(bytes).await.map_err(|e| CoreError::TransportError(e.to_string()))
    }
}

/// A project decoder that has nothing to decode; stand-in until the
/// embedder supplies a real interface-description parser.
struct NoProjectDecoder;

#[derive(Debug)]
struct UnnamedDevice;
impl Device for UnnamedDevice {
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug)]
struct EmptyProject;
impl Project for EmptyProject {
    fn device_with_name(&self, _name: &str) -> Option<Arc<dyn Device>> {
        Some(Arc::new(UnnamedDevice))
    }
    fn encode(&self) -> Vec<u8> {
        Vec::new()
    }
}

impl ProjectDecoder for NoProjectDecoder {
    fn decode_from_memory(&self, _bytes: &[u8]) -> Result<Arc<dyn Project>, CoreError> {
        Ok(Arc::new(EmptyProject))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    groundcontrol_rs::logging::init_logger();

    let port_name = env::args().nth(1).unwrap_or_else(|| "/dev/ttyUSB0".to_owned());

    let port = tokio_serial::new(&port_name, BAUD_RATE)
        .data_bits(tokio_serial::DataBits::Eight)
        .stop_bits(tokio_serial::StopBits::One)
        .parity(tokio_serial::Parity::None)
        .timeout(Duration::from_millis(500))
        .open_native_async()?;

    let (mut reader, writer) = split(port);
    let transport = Arc::new(SerialTransport { writer: Mutex::new(writer) });
    let (events_tx, mut events_rx) = mpsc::channel(64);

    let gc = GroundControl::spawn(
        ExchangeConfig::default(),
        FwtConfig::default(),
        FramerConfig::default(),
        Arc::new(NoProjectDecoder),
        None,
        None,
        transport,
        events_tx,
    );

    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                GcEvent::Fwt(FwtEvent::Progress(bytes)) => println!("firmware progress: {bytes} bytes"),
                GcEvent::Fwt(FwtEvent::DownloadFinished) => println!("firmware download finished"),
                GcEvent::StreamError(reason) => eprintln!("stream error: {reason}"),
                other => println!("{other:?}"),
            }
        }
    });

    gc.send(GcCommand::Start).await?;

    let mut buf = [0u8; 1024];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if gc.send(GcCommand::RecvData(buf[..n].to_vec())).await.is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

//! Line-delimited JSON transport over TCP.
//!
//! Host to device: `{"type":"hello","token":..}`, `{"type":"run","entrypoint":..,"program":<base64>}`
//! and `{"type":"stop"}`. Device to host: `status`, `telemetry` and `display`
//! messages, one JSON object per line.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::error::ConnectionError;
use super::transport::{DeviceConnector, Transport};
use super::types::{
    DeviceDescriptor, DeviceStatus, DisplayKind, DisplayMessage, Endpoint, PeripheralReading,
    TransportEvent,
};
use crate::evaluator::CompiledProgram;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    Hello { token: String },
    Run { entrypoint: String, program: String },
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    Status { online: bool },
    Telemetry { port: String, kind: String, value: f64 },
    Display { kind: DisplayKind, text: String },
}

impl From<DeviceMessage> for TransportEvent {
    fn from(message: DeviceMessage) -> Self {
        match message {
            DeviceMessage::Status { online: true } => TransportEvent::Status(DeviceStatus::Online),
            DeviceMessage::Status { online: false } => TransportEvent::Status(DeviceStatus::Offline),
            DeviceMessage::Telemetry { port, kind, value } => {
                TransportEvent::Telemetry(PeripheralReading { port, kind, value })
            }
            DeviceMessage::Display { kind, text } => {
                TransportEvent::Display(DisplayMessage { kind, text })
            }
        }
    }
}

pub struct TcpTransport {
    endpoint: Endpoint,
    writer: Option<OwnedWriteHalf>,
    reader: Option<JoinHandle<()>>,
}

impl TcpTransport {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            writer: None,
            reader: None,
        }
    }

    async fn send(&mut self, message: &HostMessage) -> Result<(), ConnectionError> {
        let writer = self.writer.as_mut().ok_or(ConnectionError::NotConnected)?;
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, ConnectionError> {
        let stream = TcpStream::connect(&self.endpoint.address).await?;
        let (read, write) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        self.writer = Some(write);
        self.reader = Some(tokio::spawn(read_events(read, tx)));
        if let Some(token) = self.endpoint.token.clone() {
            self.send(&HostMessage::Hello { token }).await?;
        }
        Ok(rx)
    }

    async fn send_run(&mut self, program: &CompiledProgram) -> Result<(), ConnectionError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&program.bytes);
        self.send(&HostMessage::Run {
            entrypoint: program.entrypoint.clone(),
            program: encoded,
        })
        .await
    }

    async fn send_stop(&mut self) -> Result<(), ConnectionError> {
        self.send(&HostMessage::Stop).await
    }

    async fn disconnect(&mut self) -> Result<(), ConnectionError> {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown().await?;
        }
        Ok(())
    }
}

async fn read_events(read: OwnedReadHalf, tx: mpsc::UnboundedSender<TransportEvent>) {
    let mut lines = BufReader::new(read).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<DeviceMessage>(&line) {
                    Ok(message) => {
                        if tx.send(message.into()).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "ignoring malformed device message"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "device connection read failed");
                break;
            }
        }
    }
}

/// Connector over a fixed table of device addresses (`host:port`).
pub struct StaticConnector {
    addresses: HashMap<String, String>,
    resolve_timeout: Duration,
}

impl Default for StaticConnector {
    fn default() -> Self {
        Self {
            addresses: HashMap::new(),
            resolve_timeout: Duration::from_secs(5),
        }
    }
}

impl StaticConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, id: impl Into<String>, address: impl Into<String>) -> Self {
        self.addresses.insert(id.into(), address.into());
        self
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }
}

#[async_trait]
impl DeviceConnector for StaticConnector {
    async fn resolve_endpoint(&self, device: &DeviceDescriptor) -> Result<Endpoint, ConnectionError> {
        let address = self
            .addresses
            .get(&device.id)
            .ok_or_else(|| ConnectionError::Resolution(format!("unknown device {}", device.id)))?;
        let mut resolved = tokio::time::timeout(self.resolve_timeout, tokio::net::lookup_host(address.as_str()))
            .await
            .map_err(|_| ConnectionError::ResolutionTimeout(device.id.clone()))?
            .map_err(|e| ConnectionError::Resolution(format!("{}: {}", address, e)))?;
        let addr = resolved
            .next()
            .ok_or_else(|| ConnectionError::Resolution(format!("{} has no addresses", address)))?;
        Ok(Endpoint {
            address: addr.to_string(),
            token: device.secret.clone(),
        })
    }

    fn open(&self, endpoint: &Endpoint) -> Box<dyn Transport> {
        Box::new(TcpTransport::new(endpoint.clone()))
    }
}

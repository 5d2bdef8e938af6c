use serde::{Deserialize, Serialize};

/// A device the user can connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    /// Pairing secret presented to the device after connecting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            secret: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }
}

/// Resolved address of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub token: Option<String>,
}

/// Lifecycle of a workspace's remote session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed {
        reason: String,
    },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Online/offline status pushed by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Offline,
}

/// One peripheral value reported by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeripheralReading {
    pub port: String,
    pub kind: String,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayKind {
    Output,
    Result,
    Error,
}

/// Text a device asks the host to display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayMessage {
    pub kind: DisplayKind,
    pub text: String,
}

impl DisplayMessage {
    pub fn new(kind: DisplayKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// Event received from a connected transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Status(DeviceStatus),
    Telemetry(PeripheralReading),
    Display(DisplayMessage),
}

/// Event forwarded from the session to the workspace that owns it.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    Display(DisplayMessage),
    /// The connected device went away without an explicit disconnect.
    SessionLost { reason: String },
}

//! Remote device sessions: connection lifecycle, transports and telemetry.

pub mod error;
pub mod mock;
pub mod session;
pub mod tcp;
pub mod telemetry;
pub mod transport;
pub mod types;

pub use error::ConnectionError;
pub use mock::{MockConnector, MockDevice};
pub use session::RemoteSessionManager;
pub use tcp::{StaticConnector, TcpTransport};
pub use telemetry::TelemetrySnapshot;
pub use transport::{DeviceConnector, Transport};
pub use types::{
    ConnectionState, DeviceDescriptor, DeviceStatus, DisplayKind, DisplayMessage, Endpoint,
    PeripheralReading, RemoteEvent, TransportEvent,
};

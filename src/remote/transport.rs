use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::ConnectionError;
use super::types::{DeviceDescriptor, Endpoint, TransportEvent};
use crate::evaluator::CompiledProgram;

/// A bidirectional link to one device.
#[async_trait]
pub trait Transport: Send {
    /// Open the link. Incoming events arrive on the returned channel until
    /// the link closes.
    async fn connect(&mut self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, ConnectionError>;

    async fn send_run(&mut self, program: &CompiledProgram) -> Result<(), ConnectionError>;

    async fn send_stop(&mut self) -> Result<(), ConnectionError>;

    async fn disconnect(&mut self) -> Result<(), ConnectionError>;
}

/// Resolves devices to endpoints and opens transports to them.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    async fn resolve_endpoint(&self, device: &DeviceDescriptor) -> Result<Endpoint, ConnectionError>;

    fn open(&self, endpoint: &Endpoint) -> Box<dyn Transport>;
}

//! In-memory device and connector for tests and offline development.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use super::error::ConnectionError;
use super::transport::{DeviceConnector, Transport};
use super::types::{DeviceDescriptor, Endpoint, TransportEvent};
use crate::evaluator::CompiledProgram;

/// Scriptable fake device. Clones share state.
#[derive(Clone, Default)]
pub struct MockDevice {
    inner: Arc<MockDeviceInner>,
}

#[derive(Default)]
struct MockDeviceInner {
    state: Mutex<MockDeviceState>,
    release: Notify,
}

#[derive(Default)]
struct MockDeviceState {
    hold: bool,
    fail: Option<String>,
    fail_sends: bool,
    connected: bool,
    connect_attempts: usize,
    closes: usize,
    runs: Vec<CompiledProgram>,
    stops: usize,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device whose connect blocks until [`MockDevice::release`].
    pub fn holding() -> Self {
        let device = Self::new();
        device.inner.state.lock().hold = true;
        device
    }

    /// A device that refuses connections.
    pub fn failing(reason: impl Into<String>) -> Self {
        let device = Self::new();
        device.inner.state.lock().fail = Some(reason.into());
        device
    }

    /// A device that accepts connections but rejects programs.
    pub fn failing_sends() -> Self {
        let device = Self::new();
        device.inner.state.lock().fail_sends = true;
        device
    }

    pub fn release(&self) {
        self.inner.release.notify_one();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().connected
    }

    pub fn connect_attempts(&self) -> usize {
        self.inner.state.lock().connect_attempts
    }

    pub fn close_count(&self) -> usize {
        self.inner.state.lock().closes
    }

    pub fn runs(&self) -> Vec<CompiledProgram> {
        self.inner.state.lock().runs.clone()
    }

    pub fn stop_count(&self) -> usize {
        self.inner.state.lock().stops
    }

    /// Deliver an event as if the device had sent it.
    pub fn push(&self, event: TransportEvent) -> bool {
        match &self.inner.state.lock().events {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }
}

/// Transport bound to a [`MockDevice`].
pub struct MockTransport {
    device: MockDevice,
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, ConnectionError> {
        let (hold, fail) = {
            let mut state = self.device.inner.state.lock();
            state.connect_attempts += 1;
            (state.hold, state.fail.clone())
        };
        if hold {
            self.device.inner.release.notified().await;
        }
        if let Some(reason) = fail {
            return Err(ConnectionError::Transport(reason));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.device.inner.state.lock();
        state.connected = true;
        state.events = Some(tx);
        Ok(rx)
    }

    async fn send_run(&mut self, program: &CompiledProgram) -> Result<(), ConnectionError> {
        let mut state = self.device.inner.state.lock();
        if !state.connected {
            return Err(ConnectionError::NotConnected);
        }
        if state.fail_sends {
            return Err(ConnectionError::Transport("device rejected program".into()));
        }
        state.runs.push(program.clone());
        Ok(())
    }

    async fn send_stop(&mut self) -> Result<(), ConnectionError> {
        let mut state = self.device.inner.state.lock();
        if !state.connected {
            return Err(ConnectionError::NotConnected);
        }
        state.stops += 1;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ConnectionError> {
        let mut state = self.device.inner.state.lock();
        state.closes += 1;
        state.connected = false;
        state.events = None;
        Ok(())
    }
}

/// Connector resolving device ids to [`MockDevice`]s.
#[derive(Default)]
pub struct MockConnector {
    devices: HashMap<String, MockDevice>,
    unresolvable: HashMap<String, String>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, id: impl Into<String>, device: MockDevice) -> Self {
        self.devices.insert(id.into(), device);
        self
    }

    pub fn with_unresolvable(mut self, id: impl Into<String>, reason: impl Into<String>) -> Self {
        self.unresolvable.insert(id.into(), reason.into());
        self
    }
}

#[async_trait]
impl DeviceConnector for MockConnector {
    async fn resolve_endpoint(&self, device: &DeviceDescriptor) -> Result<Endpoint, ConnectionError> {
        if let Some(reason) = self.unresolvable.get(&device.id) {
            return Err(ConnectionError::Resolution(reason.clone()));
        }
        if !self.devices.contains_key(&device.id) {
            return Err(ConnectionError::Resolution(format!("unknown device {}", device.id)));
        }
        Ok(Endpoint {
            address: device.id.clone(),
            token: device.secret.clone(),
        })
    }

    fn open(&self, endpoint: &Endpoint) -> Box<dyn Transport> {
        let device = self.devices.get(&endpoint.address).cloned().unwrap_or_default();
        Box::new(MockTransport { device })
    }
}

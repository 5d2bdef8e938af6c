//! Remote session lifecycle for one workspace.
//!
//! Every connect or disconnect bumps a generation counter and cancels the
//! previous attempt's token. An attempt only commits its outcome while its
//! generation is still current, so a superseded attempt can never overwrite
//! the state of a newer one.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::ConnectionError;
use super::telemetry::TelemetrySnapshot;
use super::transport::{DeviceConnector, Transport};
use super::types::{ConnectionState, DeviceDescriptor, DeviceStatus, RemoteEvent, TransportEvent};
use crate::core::event_bus::{Notification, NotificationEmitter};
use crate::core::shutdown::ShutdownSignal;
use crate::evaluator::CompiledProgram;

type SharedTransport = Arc<AsyncMutex<Box<dyn Transport>>>;

#[derive(Default)]
struct SessionSlot {
    generation: u64,
    state: ConnectionState,
    device: Option<DeviceDescriptor>,
    transport: Option<SharedTransport>,
    attempt: Option<CancellationToken>,
}

/// Owns the connection of one workspace to a remote device.
#[derive(Clone)]
pub struct RemoteSessionManager {
    slot: Arc<Mutex<SessionSlot>>,
    connector: Option<Arc<dyn DeviceConnector>>,
    emitter: NotificationEmitter,
    events: mpsc::UnboundedSender<RemoteEvent>,
    shutdown: ShutdownSignal,
    staleness: Duration,
}

impl RemoteSessionManager {
    pub fn new(
        connector: Option<Arc<dyn DeviceConnector>>,
        emitter: NotificationEmitter,
        shutdown: ShutdownSignal,
        staleness: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<RemoteEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            slot: Arc::new(Mutex::new(SessionSlot::default())),
            connector,
            emitter,
            events,
            shutdown,
            staleness,
        };
        (manager, events_rx)
    }

    pub fn state(&self) -> ConnectionState {
        self.slot.lock().state.clone()
    }

    pub fn device(&self) -> Option<DeviceDescriptor> {
        self.slot.lock().device.clone()
    }

    /// Start connecting to `device`, superseding any attempt or session in
    /// progress. The returned task finishes once the attempt has settled; the
    /// event pump of a successful session keeps running on its own task.
    pub fn connect(&self, device: DeviceDescriptor) -> JoinHandle<()> {
        let (generation, token, prior) = {
            let mut slot = self.slot.lock();
            slot.generation += 1;
            if let Some(previous) = slot.attempt.take() {
                previous.cancel();
            }
            let prior = slot.transport.take();
            let token = self.shutdown.child_token();
            slot.attempt = Some(token.clone());
            slot.device = Some(device.clone());
            slot.state = ConnectionState::Connecting;
            self.emitter.emit(Notification::ConnectionStateChanged {
                state: ConnectionState::Connecting,
            });
            (slot.generation, token, prior)
        };
        tracing::info!(
            workspace = %self.emitter.workspace(),
            device = %device.id,
            generation,
            "connecting"
        );

        let this = self.clone();
        tokio::spawn(async move {
            if let Some(prior) = prior {
                close_transport(prior).await;
            }
            this.run_attempt(generation, token, device).await;
        })
    }

    /// Drop the session or cancel the attempt in progress.
    pub async fn disconnect(&self) {
        let transport = {
            let mut slot = self.slot.lock();
            slot.generation += 1;
            if let Some(attempt) = slot.attempt.take() {
                attempt.cancel();
            }
            slot.device = None;
            if slot.state != ConnectionState::Disconnected {
                slot.state = ConnectionState::Disconnected;
                self.emitter.emit(Notification::ConnectionStateChanged {
                    state: ConnectionState::Disconnected,
                });
            }
            slot.transport.take()
        };
        if let Some(transport) = transport {
            close_transport(transport).await;
        }
    }

    /// Mark the current session failed, e.g. after a send error.
    pub async fn mark_failed(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let transport = {
            let mut slot = self.slot.lock();
            slot.generation += 1;
            if let Some(attempt) = slot.attempt.take() {
                attempt.cancel();
            }
            slot.state = ConnectionState::Failed {
                reason: reason.clone(),
            };
            self.emitter.emit(Notification::ConnectionStateChanged {
                state: slot.state.clone(),
            });
            slot.transport.take()
        };
        tracing::warn!(workspace = %self.emitter.workspace(), %reason, "remote session failed");
        if let Some(transport) = transport {
            close_transport(transport).await;
        }
    }

    pub async fn send_run(&self, program: &CompiledProgram) -> Result<(), ConnectionError> {
        let transport = self.connected_transport()?;
        let mut transport = transport.lock().await;
        transport.send_run(program).await
    }

    pub async fn send_stop(&self) -> Result<(), ConnectionError> {
        let transport = self.connected_transport()?;
        let mut transport = transport.lock().await;
        transport.send_stop().await
    }

    fn connected_transport(&self) -> Result<SharedTransport, ConnectionError> {
        let slot = self.slot.lock();
        match (&slot.state, &slot.transport) {
            (ConnectionState::Connected, Some(transport)) => Ok(transport.clone()),
            _ => Err(ConnectionError::NotConnected),
        }
    }

    async fn run_attempt(&self, generation: u64, token: CancellationToken, device: DeviceDescriptor) {
        let Some(connector) = self.connector.clone() else {
            self.fail_if_current(generation, "No device connector configured".into());
            return;
        };

        let resolved = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            resolved = connector.resolve_endpoint(&device) => resolved,
        };
        let endpoint = match resolved {
            Ok(endpoint) => endpoint,
            Err(e) => {
                tracing::warn!(device = %device.id, error = %e, "endpoint resolution failed");
                self.fail_if_current(generation, e.to_string());
                return;
            }
        };

        let transport: SharedTransport = Arc::new(AsyncMutex::new(connector.open(&endpoint)));
        let registered = {
            let mut slot = self.slot.lock();
            if slot.generation == generation {
                slot.transport = Some(transport.clone());
                true
            } else {
                false
            }
        };
        if !registered {
            close_transport(transport).await;
            return;
        }

        let connected = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = async { transport.lock().await.connect().await } => Some(result),
        };

        match connected {
            None => {
                tracing::debug!(device = %device.id, generation, "connection attempt superseded");
                close_transport(transport).await;
            }
            Some(Err(e)) => {
                tracing::warn!(device = %device.id, error = %e, "transport connect failed");
                self.fail_if_current(generation, e.to_string());
                close_transport(transport).await;
            }
            Some(Ok(events)) => {
                let accepted = {
                    let mut slot = self.slot.lock();
                    if slot.generation == generation {
                        slot.state = ConnectionState::Connected;
                        self.emitter.emit(Notification::ConnectionStateChanged {
                            state: ConnectionState::Connected,
                        });
                        true
                    } else {
                        false
                    }
                };
                if !accepted {
                    close_transport(transport).await;
                    return;
                }
                tracing::info!(device = %device.id, generation, "connected");
                let this = self.clone();
                tokio::spawn(async move { this.pump(generation, token, events).await });
            }
        }
    }

    /// Forward transport events until the session ends or is superseded.
    async fn pump(
        &self,
        generation: u64,
        token: CancellationToken,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let mut telemetry = TelemetrySnapshot::new(self.staleness);
        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                event = events.recv() => event,
            };
            match event {
                Some(TransportEvent::Status(DeviceStatus::Online)) => {
                    tracing::debug!(generation, "device online");
                }
                Some(TransportEvent::Status(DeviceStatus::Offline)) => {
                    self.lose_if_current(generation, "Device went offline").await;
                    return;
                }
                None => {
                    self.lose_if_current(generation, "Connection closed by device").await;
                    return;
                }
                Some(TransportEvent::Telemetry(reading)) => {
                    telemetry.update(reading, Instant::now());
                    self.emitter.emit(Notification::TelemetryUpdated {
                        readings: telemetry.readings(),
                    });
                }
                Some(TransportEvent::Display(message)) => {
                    if self.events.send(RemoteEvent::Display(message)).is_err() {
                        return;
                    }
                }
            }
        }
    }

    fn fail_if_current(&self, generation: u64, reason: String) -> bool {
        let mut slot = self.slot.lock();
        if slot.generation != generation {
            return false;
        }
        slot.state = ConnectionState::Failed { reason };
        slot.transport = None;
        slot.attempt = None;
        self.emitter.emit(Notification::ConnectionStateChanged {
            state: slot.state.clone(),
        });
        true
    }

    async fn lose_if_current(&self, generation: u64, reason: &str) {
        let transport = {
            let mut slot = self.slot.lock();
            if slot.generation != generation {
                return;
            }
            slot.generation += 1;
            slot.state = ConnectionState::Disconnected;
            slot.attempt = None;
            self.emitter.emit(Notification::ConnectionStateChanged {
                state: ConnectionState::Disconnected,
            });
            slot.transport.take()
        };
        tracing::warn!(workspace = %self.emitter.workspace(), reason, "remote session lost");
        let _ = self.events.send(RemoteEvent::SessionLost {
            reason: reason.to_string(),
        });
        if let Some(transport) = transport {
            close_transport(transport).await;
        }
    }
}

async fn close_transport(transport: SharedTransport) {
    if let Err(e) = transport.lock().await.disconnect().await {
        tracing::debug!(error = %e, "transport close failed");
    }
}

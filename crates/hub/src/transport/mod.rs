//! Transports carrying hub frames
//!
//! Every transport exposes the same [`TransportAdapter`] contract. Inbound
//! frames and disconnect notices are delivered on the transport's event
//! channel, so a session only ever reads one stream regardless of whether
//! bytes arrive from a GATT notification, a relay push or an HTTP poll.

pub mod ble;
pub mod bridge;
pub mod mock;
pub mod relay;

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use common::{EventReceiver, EventSender, create_event_channel};
use tracing::{debug, warn};

use crate::config::{HubConfig, HubProtocol, TransportKind};
use crate::error::{HubError, Result};

pub use ble::{BleTransport, GattBackend};
pub use bridge::BridgeTransport;
pub use mock::{MockHandle, MockTransport};
pub use relay::{RelayFlavor, RelayTransport};

/// Link state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    /// Dropped without a disconnect request
    Lost = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Lost,
            _ => Self::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Lost => "lost",
        };
        f.write_str(name)
    }
}

/// Uniform connect/send/receive contract over BLE, relay socket or HTTP bridge
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Establish the link; frames flow on [`events`](Self::events) afterwards
    async fn connect(&self) -> Result<()>;

    /// Tear the link down; never fails on an already closed link
    async fn disconnect(&self) -> Result<()>;

    /// Write one frame; fails with `NotConnected` when the link is down
    async fn send(&self, bytes: &[u8]) -> Result<()>;

    /// Stream of inbound frames and disconnect notices
    fn events(&self) -> EventReceiver;

    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// State and event plumbing shared by every transport implementation
#[derive(Debug, Clone)]
pub(crate) struct LinkState {
    state: Arc<AtomicU8>,
    events_tx: EventSender,
    events_rx: EventReceiver,
}

impl LinkState {
    pub(crate) fn new() -> Self {
        let (events_tx, events_rx) = create_event_channel();
        Self {
            state: Arc::new(AtomicU8::new(ConnectionState::Disconnected as u8)),
            events_tx,
            events_rx,
        }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        let previous = ConnectionState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            debug!("Link state {} -> {}", previous, state);
        }
    }

    pub(crate) fn require_connected(&self) -> Result<()> {
        if self.get() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(HubError::NotConnected)
        }
    }

    pub(crate) fn sender(&self) -> &EventSender {
        &self.events_tx
    }

    pub(crate) fn receiver(&self) -> EventReceiver {
        self.events_rx.clone()
    }

    /// Hand an inbound frame to the session
    pub(crate) async fn deliver(&self, bytes: Vec<u8>) {
        if let Err(e) = self.events_tx.frame(bytes).await {
            warn!("Dropping inbound frame: {}", e);
        }
    }

    /// Record an unrequested loss and notify the session once
    pub(crate) async fn lose(&self, reason: impl Into<String>) {
        let swapped = self.state.compare_exchange(
            ConnectionState::Connected as u8,
            ConnectionState::Lost as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if swapped.is_err() {
            return;
        }

        let reason = reason.into();
        warn!("Link lost: {}", reason);
        if let Err(e) = self.events_tx.disconnected(reason).await {
            debug!("No session listening for disconnect: {}", e);
        }
    }
}

/// Build the transport named in the configuration
///
/// `Ble` needs a platform GATT backend, which the embedding application
/// supplies through [`BleTransport::new`]; it cannot be built from config.
pub fn from_config(config: &HubConfig) -> Result<Arc<dyn TransportAdapter>> {
    match config.transport.kind {
        TransportKind::Relay => {
            let flavor = match config.hub.protocol {
                HubProtocol::Poweredup => RelayFlavor::Ble,
                HubProtocol::Nxt => RelayFlavor::Bluetooth {
                    pin: config.transport.pin.clone(),
                },
            };
            Ok(Arc::new(RelayTransport::new(
                config.relay_url(),
                flavor,
                config.timing.request_timeout(),
            )))
        }
        TransportKind::Bridge => Ok(Arc::new(BridgeTransport::new(
            config.transport.bridge_url.clone(),
            std::time::Duration::from_millis(config.transport.poll_interval_ms),
        )?)),
        TransportKind::Ble => Err(HubError::Unsupported(
            "no GATT backend is available to the command line tool".to_string(),
        )),
    }
}

//! Direct BLE GATT transport
//!
//! The Bluetooth stack itself is left to the embedding application: it
//! implements [`GattBackend`] on top of whatever platform API it has, and
//! pushes characteristic notifications into the [`NotificationSink`] it is
//! handed when notifications start.

use std::sync::Arc;

use async_trait::async_trait;
use common::EventReceiver;
use protocol::lwp3::{CHARACTERISTIC_UUID, SERVICE_UUID};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ConnectionState, LinkState, TransportAdapter};
use crate::error::{HubError, Result};

/// Peripheral selected by [`GattBackend::request_device`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattDevice {
    pub id: String,
    pub name: Option<String>,
}

/// Receives characteristic value changes from a backend
#[derive(Debug, Clone)]
pub struct NotificationSink {
    link: LinkState,
}

impl NotificationSink {
    /// A characteristic value changed
    pub async fn notify(&self, value: Vec<u8>) {
        self.link.deliver(value).await;
    }

    /// The peripheral went away
    pub async fn disconnected(&self, reason: &str) {
        self.link.lose(reason).await;
    }
}

/// Minimal GATT client surface needed to talk to a hub
#[async_trait]
pub trait GattBackend: Send + Sync {
    /// Scan for a peripheral advertising `service`
    async fn request_device(&self, service: &str) -> Result<GattDevice>;

    async fn connect(&self, device: &GattDevice) -> Result<()>;

    async fn start_notifications(
        &self,
        service: &str,
        characteristic: &str,
        sink: NotificationSink,
    ) -> Result<()>;

    async fn write(&self, service: &str, characteristic: &str, bytes: &[u8]) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

/// Transport over a [`GattBackend`]
pub struct BleTransport<B: GattBackend> {
    backend: Arc<B>,
    service: String,
    characteristic: String,
    link: LinkState,
    device: Mutex<Option<GattDevice>>,
}

impl<B: GattBackend> BleTransport<B> {
    /// Transport using the LWP3 hub service
    pub fn new(backend: B) -> Self {
        Self::with_ids(backend, SERVICE_UUID, CHARACTERISTIC_UUID)
    }

    pub fn with_ids(backend: B, service: &str, characteristic: &str) -> Self {
        Self {
            backend: Arc::new(backend),
            service: service.to_string(),
            characteristic: characteristic.to_string(),
            link: LinkState::new(),
            device: Mutex::new(None),
        }
    }

    /// Peripheral of the current connection
    pub async fn device(&self) -> Option<GattDevice> {
        self.device.lock().await.clone()
    }

    async fn establish(&self) -> Result<GattDevice> {
        let device = self.backend.request_device(&self.service).await?;
        debug!("Selected peripheral {} ({:?})", device.id, device.name);

        self.backend.connect(&device).await?;
        self.backend
            .start_notifications(
                &self.service,
                &self.characteristic,
                NotificationSink {
                    link: self.link.clone(),
                },
            )
            .await?;
        Ok(device)
    }
}

#[async_trait]
impl<B: GattBackend + 'static> TransportAdapter for BleTransport<B> {
    async fn connect(&self) -> Result<()> {
        self.link.set(ConnectionState::Connecting);

        match self.establish().await {
            Ok(device) => {
                info!(
                    "Connected to {}",
                    device.name.as_deref().unwrap_or(device.id.as_str())
                );
                *self.device.lock().await = Some(device);
                self.link.set(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                self.link.set(ConnectionState::Disconnected);
                // Leave the backend clean if it got part way
                if let Err(cleanup) = self.backend.disconnect().await {
                    debug!("Cleanup after failed connect: {}", cleanup);
                }
                Err(match e {
                    HubError::Connection(_) => e,
                    other => HubError::Connection(other.to_string()),
                })
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.link.set(ConnectionState::Disconnected);
        self.device.lock().await.take();
        if let Err(e) = self.backend.disconnect().await {
            warn!("GATT disconnect failed: {}", e);
        }
        Ok(())
    }

    async fn send(&self, bytes: &[u8]) -> Result<()> {
        self.link.require_connected()?;
        self.backend
            .write(&self.service, &self.characteristic, bytes)
            .await
    }

    fn events(&self) -> EventReceiver {
        self.link.receiver()
    }

    fn state(&self) -> ConnectionState {
        self.link.get()
    }

    fn name(&self) -> &'static str {
        "ble"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::TransportEvent;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FakeGatt {
        sink: Mutex<Option<NotificationSink>>,
        written: Mutex<Vec<(String, Vec<u8>)>>,
        no_devices: AtomicBool,
    }

    #[async_trait]
    impl GattBackend for FakeGatt {
        async fn request_device(&self, _service: &str) -> Result<GattDevice> {
            if self.no_devices.load(Ordering::Relaxed) {
                return Err(HubError::Connection("no hub found".to_string()));
            }
            Ok(GattDevice {
                id: "AA:BB".to_string(),
                name: Some("Technic Hub".to_string()),
            })
        }

        async fn connect(&self, _device: &GattDevice) -> Result<()> {
            Ok(())
        }

        async fn start_notifications(
            &self,
            _service: &str,
            _characteristic: &str,
            sink: NotificationSink,
        ) -> Result<()> {
            *self.sink.lock().await = Some(sink);
            Ok(())
        }

        async fn write(&self, _service: &str, characteristic: &str, bytes: &[u8]) -> Result<()> {
            self.written
                .lock()
                .await
                .push((characteristic.to_string(), bytes.to_vec()));
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_connect_and_write_lwp3_characteristic() {
        let transport = BleTransport::new(FakeGatt::default());
        transport.connect().await.unwrap();
        assert!(transport.is_connected());

        transport.send(&[4, 0, 2, 1]).await.unwrap();

        let written = transport.backend.written.lock().await.clone();
        assert_eq!(written[0].0, CHARACTERISTIC_UUID);
        assert_eq!(written[0].1, vec![4, 0, 2, 1]);
    }

    #[tokio::test]
    async fn test_notifications_reach_event_stream() {
        let transport = BleTransport::new(FakeGatt::default());
        transport.connect().await.unwrap();

        let sink = transport.backend.sink.lock().await.clone().unwrap();
        sink.notify(vec![5, 0, 4, 1, 0]).await;
        sink.disconnected("peripheral gone").await;

        let events = transport.events();
        assert_eq!(
            events.recv().await.unwrap(),
            TransportEvent::Frame(vec![5, 0, 4, 1, 0])
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            TransportEvent::Disconnected { .. }
        ));
        assert_eq!(transport.state(), ConnectionState::Lost);
    }

    #[tokio::test]
    async fn test_connect_failure_is_connection_error() {
        let backend = FakeGatt::default();
        backend.no_devices.store(true, Ordering::Relaxed);
        let transport = BleTransport::new(backend);

        let Err(HubError::Connection(_)) = transport.connect().await else {
            panic!("expected connection error");
        };
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }
}

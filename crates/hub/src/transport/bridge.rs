//! Local HTTP bridge transport
//!
//! A helper process on the host owns the radio and exposes a small REST API.
//! The bridge cannot push, so inbound notifications are polled.

use std::time::Duration;

use async_trait::async_trait;
use common::EventReceiver;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::{ConnectionState, LinkState, TransportAdapter};
use crate::error::{HubError, Result};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ScanEntry {
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceRequest<'a> {
    device_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteRequest<'a> {
    device_id: &'a str,
    characteristic: &'a str,
    data: &'a [u8],
}

#[derive(Debug, Deserialize)]
struct Notification {
    data: Vec<u8>,
}

/// Transport through the HTTP bridge
pub struct BridgeTransport {
    base_url: String,
    characteristic: String,
    poll_interval: Duration,
    client: reqwest::Client,
    link: LinkState,
    device_id: Mutex<Option<String>>,
    poller: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl BridgeTransport {
    pub fn new(base_url: impl Into<String>, poll_interval: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            characteristic: protocol::lwp3::CHARACTERISTIC_UUID.to_string(),
            poll_interval,
            client,
            link: LinkState::new(),
            device_id: Mutex::new(None),
            poller: Mutex::new(None),
        })
    }

    /// Characteristic named in `/write` requests
    pub fn with_characteristic(mut self, characteristic: &str) -> Self {
        self.characteristic = characteristic.to_string();
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response)
    }

    async fn open(&self) -> Result<String> {
        let devices: Vec<ScanEntry> = self
            .client
            .post(self.endpoint("scan"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        info!("Bridge found {} device(s)", devices.len());

        let device_id = devices
            .into_iter()
            .next()
            .map(|d| d.id)
            .ok_or_else(|| HubError::Connection("bridge found no devices".to_string()))?;

        self.post("connect", &DeviceRequest {
            device_id: &device_id,
        })
        .await?;
        Ok(device_id)
    }

    async fn stop_polling(&self) {
        if let Some((stop, handle)) = self.poller.lock().await.take() {
            let _ = stop.send(true);
            handle.abort();
        }
    }
}

async fn poll_loop(
    client: reqwest::Client,
    endpoint: String,
    device_id: String,
    interval: Duration,
    link: LinkState,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }

        let fetched = fetch_notifications(&client, &endpoint, &device_id).await;
        let notifications: Vec<Notification> = match fetched {
            Ok(list) => list,
            Err(e) => {
                // The bridge may be restarting; keep polling
                warn!("Polling error: {}", e);
                continue;
            }
        };

        for notification in notifications {
            trace!("bridge -> {:02x?}", notification.data);
            link.deliver(notification.data).await;
        }
    }
    debug!("Notification polling stopped");
}

fn notifications_request(
    client: &reqwest::Client,
    endpoint: &str,
    device_id: &str,
) -> reqwest::RequestBuilder {
    client.get(endpoint).query(&[("deviceId", device_id)])
}

async fn fetch_notifications(
    client: &reqwest::Client,
    endpoint: &str,
    device_id: &str,
) -> Result<Vec<Notification>> {
    let list = notifications_request(client, endpoint, device_id)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(list)
}

#[async_trait]
impl TransportAdapter for BridgeTransport {
    async fn connect(&self) -> Result<()> {
        self.link.set(ConnectionState::Connecting);

        let device_id = match self.open().await {
            Ok(id) => id,
            Err(e) => {
                self.link.set(ConnectionState::Disconnected);
                return Err(match e {
                    HubError::Connection(_) => e,
                    other => HubError::Connection(other.to_string()),
                });
            }
        };
        info!("Connected to {} via bridge {}", device_id, self.base_url);

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(poll_loop(
            self.client.clone(),
            self.endpoint("notifications"),
            device_id.clone(),
            self.poll_interval,
            self.link.clone(),
            stop_rx,
        ));

        self.stop_polling().await;
        *self.poller.lock().await = Some((stop_tx, handle));
        *self.device_id.lock().await = Some(device_id);
        self.link.set(ConnectionState::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.link.set(ConnectionState::Disconnected);
        self.stop_polling().await;

        let device_id = self.device_id.lock().await.take();
        if let Some(device_id) = device_id
            && let Err(e) = self
                .post("disconnect", &DeviceRequest {
                    device_id: &device_id,
                })
                .await
        {
            warn!("Disconnect request failed: {}", e);
        }
        Ok(())
    }

    async fn send(&self, bytes: &[u8]) -> Result<()> {
        self.link.require_connected()?;
        let device_id = self
            .device_id
            .lock()
            .await
            .clone()
            .ok_or(HubError::NotConnected)?;

        trace!("bridge <- {:02x?}", bytes);
        self.post("write", &WriteRequest {
            device_id: &device_id,
            characteristic: &self.characteristic,
            data: bytes,
        })
        .await?;
        Ok(())
    }

    fn events(&self) -> EventReceiver {
        self.link.receiver()
    }

    fn state(&self) -> ConnectionState {
        self.link.get()
    }

    fn name(&self) -> &'static str {
        "bridge"
    }
}

impl Drop for BridgeTransport {
    fn drop(&mut self) {
        if let Some((_, handle)) = self.poller.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let bridge = BridgeTransport::new("http://localhost:8080/", Duration::from_millis(100)).unwrap();
        assert_eq!(bridge.endpoint("scan"), "http://localhost:8080/scan");
    }

    #[test]
    fn test_write_request_shape() {
        let body = WriteRequest {
            device_id: "hub-1",
            characteristic: protocol::lwp3::CHARACTERISTIC_UUID,
            data: &[4, 0, 2, 1],
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["deviceId"], "hub-1");
        assert_eq!(value["data"], serde_json::json!([4, 0, 2, 1]));
    }

    #[test]
    fn test_notifications_query_is_encoded() {
        let client = reqwest::Client::new();
        let endpoint = "http://localhost:8080/notifications";
        let request = notifications_request(&client, endpoint, "hub 1&x=2")
            .build()
            .unwrap();
        let pairs: Vec<(String, String)> = request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs, vec![("deviceId".to_string(), "hub 1&x=2".to_string())]);
        assert_eq!(request.url().path(), "/notifications");
    }

    #[test]
    fn test_notification_shape() {
        let list: Vec<Notification> =
            serde_json::from_str(r#"[{"data":[5,0,4,1,0]},{"data":[]}]"#).unwrap();
        assert_eq!(list[0].data, vec![5, 0, 4, 1, 0]);
        assert!(list[1].data.is_empty());
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let bridge = BridgeTransport::new("http://localhost:8080", Duration::from_millis(100)).unwrap();
        let Err(HubError::NotConnected) = bridge.send(&[1]).await else {
            panic!("expected NotConnected");
        };
    }

    #[tokio::test]
    async fn test_unreachable_bridge_is_connection_error() {
        let bridge = BridgeTransport::new("http://127.0.0.1:1", Duration::from_millis(100)).unwrap();
        let Err(HubError::Connection(_)) = bridge.connect().await else {
            panic!("expected connection error");
        };
        assert_eq!(bridge.state(), ConnectionState::Disconnected);
    }
}

//! Scratch Link style relay over WebSocket
//!
//! The relay owns the Bluetooth radio and speaks JSON-RPC 2.0 on a WebSocket.
//! Two flavors exist: the BLE relay (LWP3 hubs, GATT characteristic writes)
//! and the classic Bluetooth relay (NXT bricks, raw RFCOMM bytes). Payloads
//! travel base64 encoded in both directions.
//!
//! Requests we issue are correlated by id. The relay also calls us: peripheral
//! discovery, inbound data and a `ping` that must be answered with `42`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use common::EventReceiver;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use super::{ConnectionState, LinkState, TransportAdapter};
use crate::correlator::{CorrelationMode, RequestCorrelator};
use crate::error::{HubError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;

/// How long the relay may take to report a peripheral
pub const DISCOVER_TIMEOUT: Duration = Duration::from_secs(15);

/// Answer expected by the relay's keep-alive `ping`
pub const PING_RESULT: i64 = 42;

const JSONRPC_VERSION: &str = "2.0";

/// NXT bricks advertise the "toy" device class
const BT_MAJOR_DEVICE_CLASS: u8 = 8;
const BT_MINOR_DEVICE_CLASS: u8 = 1;

/// Which relay endpoint and method set to use
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFlavor {
    /// GATT relay for LWP3 hubs
    Ble,
    /// RFCOMM relay for NXT bricks
    Bluetooth { pin: String },
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Serialize)]
struct RpcResult {
    jsonrpc: &'static str,
    id: Value,
    result: Value,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Any frame the relay sends us: a response, a notification or a call
#[derive(Debug, Deserialize)]
struct RpcIncoming {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

struct RelayShared {
    link: LinkState,
    flavor: RelayFlavor,
    correlator: RequestCorrelator<Value>,
    writer: Mutex<Option<WsWriter>>,
    /// Waiter for the first `didDiscoverPeripheral`
    discovered: Mutex<Option<oneshot::Sender<String>>>,
}

/// Transport through a Scratch Link relay
pub struct RelayTransport {
    url: String,
    shared: Arc<RelayShared>,
    reader: Mutex<Option<JoinHandle<()>>>,
    peripheral: Mutex<Option<String>>,
}

impl RelayTransport {
    pub fn new(url: impl Into<String>, flavor: RelayFlavor, request_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            shared: Arc::new(RelayShared {
                link: LinkState::new(),
                flavor,
                correlator: RequestCorrelator::new(CorrelationMode::Id, request_timeout),
                writer: Mutex::new(None),
                discovered: Mutex::new(None),
            }),
            reader: Mutex::new(None),
            peripheral: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Peripheral id picked during the last connect
    pub async fn peripheral_id(&self) -> Option<String> {
        self.peripheral.lock().await.clone()
    }

    async fn open(&self) -> Result<String> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| HubError::Connection(format!("{}: {}", self.url, e)))?;
        debug!("Relay socket open: {}", self.url);

        let (writer, reader) = stream.split();
        *self.shared.writer.lock().await = Some(writer);

        let shared = self.shared.clone();
        let handle = tokio::spawn(async move { read_loop(shared, reader).await });
        if let Some(previous) = self.reader.lock().await.replace(handle) {
            previous.abort();
        }

        let peripheral_id = self.discover().await?;

        let mut params = json!({ "peripheralId": peripheral_id });
        if let RelayFlavor::Bluetooth { pin } = &self.shared.flavor {
            params["pin"] = json!(pin);
        }
        self.shared.call("connect", params).await?;

        if self.shared.flavor == RelayFlavor::Ble {
            self.shared
                .call(
                    "startNotifications",
                    json!({
                        "serviceId": protocol::lwp3::SERVICE_UUID,
                        "characteristicId": protocol::lwp3::CHARACTERISTIC_UUID,
                    }),
                )
                .await?;
        }

        Ok(peripheral_id)
    }

    /// Ask the relay for a peripheral
    ///
    /// Some relays return the peripheral in the `discover` result, others push
    /// it afterwards as `didDiscoverPeripheral`; both are accepted.
    async fn discover(&self) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        *self.shared.discovered.lock().await = Some(tx);

        let params = match self.shared.flavor {
            RelayFlavor::Ble => json!({
                "filters": [{ "services": [protocol::lwp3::SERVICE_UUID] }]
            }),
            RelayFlavor::Bluetooth { .. } => json!({
                "majorDeviceClass": BT_MAJOR_DEVICE_CLASS,
                "minorDeviceClass": BT_MINOR_DEVICE_CLASS,
            }),
        };
        let result = self.shared.call("discover", params).await?;

        if let Some(id) = result.get("peripheralId").and_then(Value::as_str) {
            self.shared.discovered.lock().await.take();
            return Ok(id.to_string());
        }

        match tokio::time::timeout(DISCOVER_TIMEOUT, rx).await {
            Ok(Ok(id)) => Ok(id),
            Ok(Err(_)) => Err(HubError::ConnectionLost),
            Err(_) => Err(HubError::Connection("no peripheral found".to_string())),
        }
    }

    async fn close_socket(&self) {
        if let Some(mut writer) = self.shared.writer.lock().await.take()
            && let Err(e) = writer.close().await
        {
            debug!("Relay socket close: {}", e);
        }
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        self.shared.correlator.fail_all().await;
    }
}

impl RelayShared {
    async fn write_json<T: Serialize>(&self, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        trace!("relay <- {}", text);

        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(HubError::NotConnected)?;
        writer.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Issue a JSON-RPC request and wait for its response
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let pending = self.correlator.register(0).await;
        let request = RpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id: pending.id,
            method,
            params,
        };

        if let Err(e) = self.write_json(&request).await {
            self.correlator.cancel(pending).await;
            return Err(e);
        }
        self.correlator.wait(pending).await
    }

    async fn handle_text(&self, text: &str) {
        let incoming: RpcIncoming = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Ignoring malformed relay message: {}", e);
                return;
            }
        };

        match incoming.method.as_deref() {
            Some(method) => {
                self.handle_call(method, incoming.id, incoming.params.unwrap_or(Value::Null))
                    .await;
            }
            None => self.handle_response(incoming).await,
        }
    }

    async fn handle_response(&self, incoming: RpcIncoming) {
        let Some(id) = incoming.id.as_ref().and_then(Value::as_u64) else {
            debug!("Relay response without a numeric id");
            return;
        };

        let result = match incoming.error {
            Some(err) => Err(HubError::Relay {
                code: err.code,
                message: err.message,
            }),
            None => Ok(incoming.result.unwrap_or(Value::Null)),
        };
        self.correlator.resolve_id(id, result).await;
    }

    async fn handle_call(&self, method: &str, id: Option<Value>, params: Value) {
        match method {
            "characteristicDidChange" | "didReceiveMessage" => {
                let Some(message) = params.get("message").and_then(Value::as_str) else {
                    warn!("{} without a message", method);
                    return;
                };
                match BASE64.decode(message) {
                    Ok(bytes) => {
                        trace!("relay -> {:02x?}", bytes);
                        self.link.deliver(bytes).await;
                    }
                    Err(e) => warn!("Undecodable relay payload: {}", e),
                }
            }
            "didDiscoverPeripheral" | "userDidPickPeripheral" => {
                let Some(peripheral) = params.get("peripheralId").and_then(Value::as_str) else {
                    return;
                };
                let name = params.get("name").and_then(Value::as_str).unwrap_or("?");
                debug!("Discovered peripheral {} ({})", peripheral, name);
                if let Some(tx) = self.discovered.lock().await.take() {
                    let _ = tx.send(peripheral.to_string());
                }
            }
            "ping" => {
                let Some(id) = id else {
                    return;
                };
                let reply = RpcResult {
                    jsonrpc: JSONRPC_VERSION,
                    id,
                    result: json!(PING_RESULT),
                };
                if let Err(e) = self.write_json(&reply).await {
                    warn!("Failed to answer relay ping: {}", e);
                }
            }
            other => debug!("Unhandled relay call: {}", other),
        }
    }
}

async fn read_loop(shared: Arc<RelayShared>, mut reader: SplitStream<WsStream>) {
    let reason = loop {
        match reader.next().await {
            Some(Ok(Message::Text(text))) => shared.handle_text(&text).await,
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => shared.handle_text(text).await,
                Err(_) => debug!("Ignoring binary relay frame ({} bytes)", data.len()),
            },
            Some(Ok(Message::Close(_))) | None => break "relay closed the socket".to_string(),
            Some(Ok(_)) => {}
            Some(Err(e)) => break format!("relay socket error: {}", e),
        }
    };

    shared.correlator.fail_all().await;
    shared.link.lose(reason).await;
}

#[async_trait]
impl TransportAdapter for RelayTransport {
    async fn connect(&self) -> Result<()> {
        self.shared.link.set(ConnectionState::Connecting);

        match self.open().await {
            Ok(peripheral_id) => {
                info!("Connected to peripheral {} via {}", peripheral_id, self.url);
                *self.peripheral.lock().await = Some(peripheral_id);
                self.shared.link.set(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                self.close_socket().await;
                self.shared.link.set(ConnectionState::Disconnected);
                Err(match e {
                    HubError::Connection(_) => e,
                    other => HubError::Connection(other.to_string()),
                })
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.shared.link.set(ConnectionState::Disconnected);
        self.close_socket().await;
        self.peripheral.lock().await.take();
        Ok(())
    }

    async fn send(&self, bytes: &[u8]) -> Result<()> {
        self.shared.link.require_connected()?;
        let message = BASE64.encode(bytes);

        match &self.shared.flavor {
            RelayFlavor::Ble => {
                self.shared
                    .call(
                        "write",
                        json!({
                            "serviceId": protocol::lwp3::SERVICE_UUID,
                            "characteristicId": protocol::lwp3::CHARACTERISTIC_UUID,
                            "message": message,
                            "encoding": "base64",
                        }),
                    )
                    .await?;
            }
            RelayFlavor::Bluetooth { .. } => {
                self.shared
                    .call("send", json!({ "message": message, "encoding": "base64" }))
                    .await?;
            }
        }
        Ok(())
    }

    fn events(&self) -> EventReceiver {
        self.shared.link.receiver()
    }

    fn state(&self) -> ConnectionState {
        self.shared.link.get()
    }

    fn name(&self) -> &'static str {
        match self.shared.flavor {
            RelayFlavor::Ble => "ble-relay",
            RelayFlavor::Bluetooth { .. } => "bt-relay",
        }
    }
}

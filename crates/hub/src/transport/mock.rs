//! In-memory transport for tests and demos
//!
//! Records every frame written to it and lets a scripted responder answer
//! them. A [`MockHandle`] kept by the test injects unsolicited frames (attach
//! events, sensor values) and simulates link loss.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::EventReceiver;
use tokio::sync::Mutex;
use tracing::trace;

use super::{ConnectionState, LinkState, TransportAdapter};
use crate::error::{HubError, Result};

/// Produces the inbound frames a hub would answer `sent` with
pub type Responder = Box<dyn Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync>;

struct MockInner {
    sent: Mutex<Vec<Vec<u8>>>,
    responder: Mutex<Option<Responder>>,
    fail_connect: AtomicBool,
}

/// Transport that talks to a script instead of a hub
pub struct MockTransport {
    link: LinkState,
    inner: Arc<MockInner>,
}

/// Test-side controls for a [`MockTransport`]
#[derive(Clone)]
pub struct MockHandle {
    link: LinkState,
    inner: Arc<MockInner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            link: LinkState::new(),
            inner: Arc::new(MockInner {
                sent: Mutex::new(Vec::new()),
                responder: Mutex::new(None),
                fail_connect: AtomicBool::new(false),
            }),
        }
    }

    /// Create a mock whose responder answers every send
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static,
    {
        let transport = Self::new();
        if let Ok(mut slot) = transport.inner.responder.try_lock() {
            *slot = Some(Box::new(responder));
        }
        transport
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            link: self.link.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportAdapter for MockTransport {
    async fn connect(&self) -> Result<()> {
        self.link.set(ConnectionState::Connecting);
        if self.inner.fail_connect.load(Ordering::Acquire) {
            self.link.set(ConnectionState::Disconnected);
            return Err(HubError::Connection("mock refused connection".to_string()));
        }
        self.link.set(ConnectionState::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.link.set(ConnectionState::Disconnected);
        Ok(())
    }

    async fn send(&self, bytes: &[u8]) -> Result<()> {
        self.link.require_connected()?;
        trace!("mock <- {:02x?}", bytes);
        self.inner.sent.lock().await.push(bytes.to_vec());

        let replies = match self.inner.responder.lock().await.as_ref() {
            Some(responder) => responder(bytes),
            None => Vec::new(),
        };
        for reply in replies {
            self.link.deliver(reply).await;
        }
        Ok(())
    }

    fn events(&self) -> EventReceiver {
        self.link.receiver()
    }

    fn state(&self) -> ConnectionState {
        self.link.get()
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

impl MockHandle {
    /// Deliver an unsolicited inbound frame
    pub async fn inject(&self, frame: Vec<u8>) {
        self.link.deliver(frame).await;
    }

    /// Simulate the link dropping
    pub async fn drop_link(&self, reason: &str) {
        self.link.lose(reason).await;
    }

    pub async fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static,
    {
        *self.inner.responder.lock().await = Some(Box::new(responder));
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.fail_connect.store(refuse, Ordering::Release);
    }

    /// Every frame written so far
    pub async fn sent(&self) -> Vec<Vec<u8>> {
        self.inner.sent.lock().await.clone()
    }

    pub async fn clear_sent(&self) {
        self.inner.sent.lock().await.clear();
    }
}

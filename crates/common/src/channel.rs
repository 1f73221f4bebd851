//! Event channel between a transport and the session consuming it
//!
//! Transports run their own reader tasks (WebSocket pump, HTTP poller, GATT
//! notification callback) and hand inbound frames to the session through this
//! channel. A disconnect notice travels on the same channel so the session sees
//! it strictly after every frame that preceded it.

use async_channel::{Receiver, Sender, TrySendError, bounded};

/// Capacity of the inbound event queue
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events from a transport to its session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound delivery (an LWP3 frame, or raw NXT bytes needing reassembly)
    Frame(Vec<u8>),

    /// The link went away without being asked to
    Disconnected {
        /// Human readable cause
        reason: String,
    },
}

/// Producer half, owned by the transport
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<TransportEvent>,
}

impl EventSender {
    /// Queue an event, waiting for room if the session lags behind
    pub async fn send(&self, event: TransportEvent) -> crate::Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| crate::Error::QueueClosed)
    }

    /// Queue an event from synchronous code (GATT callbacks, tests)
    pub fn try_send(&self, event: TransportEvent) -> crate::Result<()> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => crate::Error::QueueFull,
            TrySendError::Closed(_) => crate::Error::QueueClosed,
        })
    }

    /// Convenience for [`TransportEvent::Frame`]
    pub async fn frame(&self, bytes: Vec<u8>) -> crate::Result<()> {
        self.send(TransportEvent::Frame(bytes)).await
    }

    /// Convenience for [`TransportEvent::Disconnected`]
    pub async fn disconnected(&self, reason: impl Into<String>) -> crate::Result<()> {
        self.send(TransportEvent::Disconnected {
            reason: reason.into(),
        })
        .await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, read by the session's reader task
#[derive(Debug, Clone)]
pub struct EventReceiver {
    rx: Receiver<TransportEvent>,
}

impl EventReceiver {
    /// Wait for the next event; fails once every sender is gone
    pub async fn recv(&self) -> crate::Result<TransportEvent> {
        self.rx
            .recv()
            .await
            .map_err(|_| crate::Error::QueueClosed)
    }

    /// Take an event if one is queued
    pub fn try_recv(&self) -> Option<TransportEvent> {
        self.rx.try_recv().ok()
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Create the event channel for one transport
///
/// Returns (EventSender for the transport, EventReceiver for the session)
pub fn create_event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = bounded(EVENT_CHANNEL_CAPACITY);
    (EventSender { tx }, EventReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let (tx, rx) = create_event_channel();

        tx.frame(vec![1]).await.unwrap();
        tx.frame(vec![2]).await.unwrap();
        tx.disconnected("link lost").await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), TransportEvent::Frame(vec![1]));
        assert_eq!(rx.recv().await.unwrap(), TransportEvent::Frame(vec![2]));
        assert!(matches!(
            rx.recv().await.unwrap(),
            TransportEvent::Disconnected { .. }
        ));
        assert!(rx.is_empty());
    }

    #[tokio::test]
    async fn test_recv_fails_after_sender_dropped() {
        let (tx, rx) = create_event_channel();
        drop(tx);
        assert!(rx.recv().await.is_err());
    }

    #[test]
    fn test_try_send_from_sync_code() {
        let (tx, rx) = create_event_channel();
        tx.try_send(TransportEvent::Frame(vec![0x05])).unwrap();
        assert_eq!(rx.try_recv(), Some(TransportEvent::Frame(vec![0x05])));
        assert_eq!(rx.try_recv(), None);
    }
}

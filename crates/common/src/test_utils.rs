//! Test utilities for lego-hub
//!
//! Frame builders for scripting hubs in tests, plus async timeout helpers.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{attach_frame, nxt_reply_frame};
//!
//! let frame = attach_frame(1, 0x30);
//! assert_eq!(frame[0] as usize, frame.len());
//!
//! let reply = nxt_reply_frame(0x0b, 0x00, &[0x70, 0x17]);
//! assert_eq!(reply, vec![0x05, 0x00, 0x02, 0x0b, 0x00, 0x70, 0x17]);
//! ```

use protocol::lwp3::{self, Lwp3Frame};
use protocol::nxt::Reply;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn lwp3_frame(message_type: u8, payload: Vec<u8>) -> Vec<u8> {
    Lwp3Frame::new(message_type, payload)
        .encode()
        .unwrap_or_default()
}

/// HUB_ATTACHED_IO attach frame (hardware/software revisions zeroed)
pub fn attach_frame(port: u8, device_type: u8) -> Vec<u8> {
    let mut payload = vec![port, 0x01, device_type, 0x00];
    payload.extend_from_slice(&[0u8; 8]);
    lwp3_frame(lwp3::message_type::HUB_ATTACHED_IO, payload)
}

/// HUB_ATTACHED_IO detach frame
pub fn detach_frame(port: u8) -> Vec<u8> {
    lwp3_frame(lwp3::message_type::HUB_ATTACHED_IO, vec![port, 0x00])
}

/// PORT_VALUE_SINGLE frame; `value` starts at frame offset 4
pub fn port_value_frame(port: u8, value: &[u8]) -> Vec<u8> {
    let mut payload = vec![port];
    payload.extend_from_slice(value);
    lwp3_frame(lwp3::message_type::PORT_VALUE_SINGLE, payload)
}

/// HUB_PROPERTIES update frame
pub fn property_update_frame(property: u8, value: &[u8]) -> Vec<u8> {
    let mut payload = vec![property, lwp3::property_operation::UPDATE];
    payload.extend_from_slice(value);
    lwp3_frame(lwp3::message_type::HUB_PROPERTIES, payload)
}

/// HUB_ALERTS update frame
pub fn alert_update_frame(alert: u8, active: bool) -> Vec<u8> {
    lwp3_frame(
        lwp3::message_type::HUB_ALERTS,
        vec![alert, lwp3::alert_operation::UPDATE, if active { 0xff } else { 0x00 }],
    )
}

/// PORT_OUTPUT_FEEDBACK frame
pub fn feedback_frame(port: u8, feedback: u8) -> Vec<u8> {
    lwp3_frame(lwp3::message_type::PORT_OUTPUT_FEEDBACK, vec![port, feedback])
}

/// Length-prefixed NXT reply telegram
pub fn nxt_reply_frame(opcode: u8, status: u8, payload: &[u8]) -> Vec<u8> {
    Reply::build(opcode, status, payload).encode()
}

/// Random bytes for upload and framing tests
pub fn random_payload(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::rng().fill(&mut data[..]);
    data
}

/// Run an async test with a timeout
///
/// Returns an error if the future doesn't complete within the specified duration.
///
/// # Example
/// ```no_run
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::lwp3::{IoEvent, Lwp3Message, decode_message};

    #[test]
    fn test_builders_decode() {
        let msg = decode_message(&attach_frame(2, 0x25)).unwrap();
        assert_eq!(
            msg,
            Lwp3Message::AttachedIo {
                port: 2,
                event: IoEvent::Attached,
                device_type: 0x25
            }
        );

        let msg = decode_message(&detach_frame(2)).unwrap();
        assert!(matches!(
            msg,
            Lwp3Message::AttachedIo {
                event: IoEvent::Detached,
                ..
            }
        ));

        let msg = decode_message(&port_value_frame(0, &[7])).unwrap();
        assert_eq!(msg, Lwp3Message::PortValue { port: 0, value: vec![7] });
    }

    #[test]
    fn test_random_payload_length() {
        assert_eq!(random_payload(1000).len(), 1000);
        assert!(random_payload(0).is_empty());
    }

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_failure() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            42
        })
        .await;

        assert!(result.is_err());
    }
}

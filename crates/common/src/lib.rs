//! Common utilities for lego-hub
//!
//! This crate provides functionality shared by the protocol sessions and their
//! transports: error handling, logging setup, the outbound send-rate limiter
//! and the transport event channel.

pub mod channel;
pub mod error;
pub mod logging;
pub mod rate_limiter;
pub mod test_utils;

pub use channel::{EventReceiver, EventSender, TransportEvent, create_event_channel};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use rate_limiter::{RateLimitResult, SendRateLimiter, SendStats};

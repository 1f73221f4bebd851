//! Protocol engine for LEGO programmable hubs
//!
//! Talks LWP3 to Powered Up, BOOST, SPIKE and Control+ hubs and direct
//! commands to NXT bricks, over a pluggable [`TransportAdapter`]:
//!
//! - [`transport`]: relay WebSocket, HTTP bridge, native GATT and an
//!   in-memory mock
//! - [`correlator`]: matching replies to requests by id or in order
//! - [`registry`]: attached devices and their decoded telemetry
//! - [`transfer`]: chunked file upload to NXT flash
//! - [`session`]: the public command and event API

pub mod config;
pub mod correlator;
pub mod error;
pub mod registry;
pub mod session;
pub mod transfer;
pub mod transport;

pub use config::{HubConfig, HubProtocol, TransportKind};
pub use correlator::{CorrelationMode, PendingRequest, RequestCorrelator, ResolveOutcome};
pub use error::{HubError, Result, TransferStage};
pub use registry::{CommandSender, CommandSink, Device, DeviceRegistry, Reading};
pub use session::{HubEvent, HubSession, HubStatus, Lwp3Session, NxtSession, ScreenBuffer};
pub use transfer::{ChunkedTransfer, TelegramSender, TransferProgress, TransferSummary};
pub use transport::{ConnectionState, TransportAdapter};

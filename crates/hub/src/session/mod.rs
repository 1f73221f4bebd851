//! Connected hub sessions
//!
//! A session owns the transport link, the rate limiter and the per-connection
//! state of one hub. Inbound frames are handled by a single reader task;
//! periodic traffic (the LWP3 RSSI ping, the NXT keep-alive) runs in its own
//! task. All of these are bound to a [`TaskSet`] that is cancelled when the
//! link goes away, so nothing fires after teardown.

pub mod display;
mod font;
pub mod lwp3;
pub mod nxt;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use protocol::lwp3::HubPropertyUpdate;
use protocol::nxt::{InputValues, OutputState};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};

use crate::config::{HubConfig, HubProtocol};
use crate::error::Result;
use crate::registry::Reading;
use crate::transport::{ConnectionState, TransportAdapter};

pub use display::{Pattern, ScreenBuffer};
pub use lwp3::{HubStatus, Lwp3Session};
pub use nxt::NxtSession;

/// Capacity of the session event channel
const EVENT_CAPACITY: usize = 64;

/// Something observable happened on the hub
#[derive(Debug, Clone)]
pub enum HubEvent {
    Connected,
    Disconnected {
        reason: String,
    },
    Attached {
        port: u8,
        type_id: u8,
    },
    Detached {
        port: u8,
    },
    Telemetry {
        port: u8,
        quantity: &'static str,
        reading: Reading,
    },
    Property(HubPropertyUpdate),
    Alert {
        alert: u8,
        active: bool,
    },
    /// GENERIC_ERROR reported by the hub
    HubError {
        command: u8,
        code: u8,
    },
    Feedback {
        port: u8,
        feedback: u8,
    },
    MotorState(OutputState),
    SensorValues(InputValues),
}

fn event_channel() -> broadcast::Sender<HubEvent> {
    broadcast::channel(EVENT_CAPACITY).0
}

/// Tasks bound to one connection
pub(crate) struct TaskSet {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl TaskSet {
    pub(crate) fn new() -> Self {
        Self {
            shutdown: watch::channel(false).0,
            handles: Vec::new(),
        }
    }

    /// Receiver that flips to `true` on cancellation
    pub(crate) fn token(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub(crate) fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handles.push(tokio::spawn(task));
    }

    /// Signal every task and abort whatever is still running
    pub(crate) fn cancel(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            handle.abort();
        }
    }
}

/// Resolve once `token` is cancelled or its sender is gone
pub(crate) async fn cancelled(token: &mut watch::Receiver<bool>) {
    let _ = token.wait_for(|stop| *stop).await;
}

/// Run `tick` every `period` until cancelled, starting one period from now
pub(crate) async fn run_periodic<F, Fut>(
    period: Duration,
    mut token: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = cancelled(&mut token) => break,
            _ = ticker.tick() => {
                if !tick().await {
                    break;
                }
            }
        }
    }
}

/// A session for either hub family
pub enum HubSession {
    PoweredUp(Lwp3Session),
    Nxt(NxtSession),
}

impl HubSession {
    /// Build the session matching `config.hub.protocol`
    pub fn new(config: &HubConfig, transport: Arc<dyn TransportAdapter>) -> Self {
        match config.hub.protocol {
            HubProtocol::Poweredup => Self::PoweredUp(Lwp3Session::new(transport, config)),
            HubProtocol::Nxt => Self::Nxt(NxtSession::new(transport, config)),
        }
    }

    pub fn protocol(&self) -> HubProtocol {
        match self {
            Self::PoweredUp(_) => HubProtocol::Poweredup,
            Self::Nxt(_) => HubProtocol::Nxt,
        }
    }

    pub async fn connect(&self) -> Result<()> {
        match self {
            Self::PoweredUp(s) => s.connect().await,
            Self::Nxt(s) => s.connect().await,
        }
    }

    pub async fn disconnect(&self) -> Result<()> {
        match self {
            Self::PoweredUp(s) => s.disconnect().await,
            Self::Nxt(s) => s.disconnect().await,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        match self {
            Self::PoweredUp(s) => s.subscribe(),
            Self::Nxt(s) => s.subscribe(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self {
            Self::PoweredUp(s) => s.state(),
            Self::Nxt(s) => s.state(),
        }
    }

    pub async fn stop_all_motors(&self) -> Result<()> {
        match self {
            Self::PoweredUp(s) => s.stop_all_motors().await,
            Self::Nxt(s) => s.stop_all_motors().await,
        }
    }

    pub fn as_poweredup(&self) -> Option<&Lwp3Session> {
        match self {
            Self::PoweredUp(s) => Some(s),
            Self::Nxt(_) => None,
        }
    }

    pub fn as_nxt(&self) -> Option<&NxtSession> {
        match self {
            Self::Nxt(s) => Some(s),
            Self::PoweredUp(_) => None,
        }
    }
}

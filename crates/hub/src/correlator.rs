//! Matching asynchronous replies to outstanding requests
//!
//! Two correlation schemes are in use:
//!
//! - **Id**: JSON-RPC relay calls carry an explicit numeric id echoed in the
//!   response. Ids come from a counter that starts at 1 and never yields 0.
//! - **Fifo**: NXT bricks answer in order, so a reply belongs to the oldest
//!   outstanding request sent with the same opcode. A reply no entry was sent
//!   with is a late answer to a request that already timed out and is dropped.
//!
//! Every entry is removed exactly once, by a reply, by its deadline, or by
//! [`RequestCorrelator::fail_all`] on disconnect. Entries whose
//! [`PendingRequest`] was dropped unawaited are purged on the next access.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tracing::{debug, trace, warn};

use crate::error::{HubError, Result};

/// Correlation scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationMode {
    Id,
    Fifo,
}

/// What happened to an inbound reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Handed to its waiter
    Delivered,
    /// No outstanding entry was sent with this opcode; dropped
    Stale,
    /// Nothing was waiting for it
    Unmatched,
}

/// Handle returned by [`RequestCorrelator::register`]
#[derive(Debug)]
pub struct PendingRequest<T> {
    pub id: u64,
    rx: oneshot::Receiver<Result<T>>,
}

struct FifoEntry<T> {
    id: u64,
    command: u8,
    tx: oneshot::Sender<Result<T>>,
}

struct Pending<T> {
    by_id: HashMap<u64, oneshot::Sender<Result<T>>>,
    fifo: VecDeque<FifoEntry<T>>,
}

impl<T> Pending<T> {
    fn len(&self) -> usize {
        self.by_id.len() + self.fifo.len()
    }

    /// Forget entries whose waiter went away without resolving them
    fn purge_abandoned(&mut self) -> usize {
        let before = self.len();
        self.by_id.retain(|_, tx| !tx.is_closed());
        self.fifo.retain(|e| !e.tx.is_closed());
        before - self.len()
    }

    fn remove(&mut self, id: u64) -> bool {
        if self.by_id.remove(&id).is_some() {
            return true;
        }
        if let Some(pos) = self.fifo.iter().position(|e| e.id == id) {
            self.fifo.remove(pos);
            return true;
        }
        false
    }
}

/// Outstanding requests of one connection
pub struct RequestCorrelator<T> {
    mode: CorrelationMode,
    timeout: Duration,
    next_id: AtomicU64,
    pending: Mutex<Pending<T>>,
}

impl<T: Send + 'static> RequestCorrelator<T> {
    pub fn new(mode: CorrelationMode, timeout: Duration) -> Self {
        Self {
            mode,
            timeout,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(Pending {
                by_id: HashMap::new(),
                fifo: VecDeque::new(),
            }),
        }
    }

    pub fn mode(&self) -> CorrelationMode {
        self.mode
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn allocate_id(&self) -> u64 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            // Only reachable after wrap-around
            if id != 0 {
                return id;
            }
        }
    }

    /// Register a request before sending it.
    ///
    /// `command` is the opcode the reply must echo in FIFO mode; it is ignored
    /// in id mode.
    pub async fn register(&self, command: u8) -> PendingRequest<T> {
        let id = self.allocate_id();
        let (tx, rx) = oneshot::channel();

        let mut pending = self.pending.lock().await;
        let purged = pending.purge_abandoned();
        if purged > 0 {
            debug!("Purged {} abandoned requests", purged);
        }
        match self.mode {
            CorrelationMode::Id => {
                pending.by_id.insert(id, tx);
            }
            CorrelationMode::Fifo => {
                pending.fifo.push_back(FifoEntry { id, command, tx });
            }
        }
        trace!("Registered request {} (pending: {})", id, pending.len());

        PendingRequest { id, rx }
    }

    /// Resolve the request with an explicit id
    pub async fn resolve_id(&self, id: u64, result: Result<T>) -> ResolveOutcome {
        let tx = self.pending.lock().await.by_id.remove(&id);
        match tx {
            Some(tx) => {
                // The waiter may have given up already
                let _ = tx.send(result);
                ResolveOutcome::Delivered
            }
            None => {
                debug!("Response for unknown request id {}", id);
                ResolveOutcome::Unmatched
            }
        }
    }

    /// Resolve the oldest request that was sent with `command`
    pub async fn resolve_next(&self, command: u8, result: Result<T>) -> ResolveOutcome {
        let mut pending = self.pending.lock().await;
        pending.purge_abandoned();
        if pending.fifo.is_empty() {
            debug!("Reply 0x{:02x} with no request outstanding", command);
            return ResolveOutcome::Unmatched;
        }

        let Some(pos) = pending.fifo.iter().position(|e| e.command == command) else {
            warn!(
                "Dropping stale reply 0x{:02x} ({} requests outstanding)",
                command,
                pending.fifo.len()
            );
            return ResolveOutcome::Stale;
        };

        if let Some(entry) = pending.fifo.remove(pos) {
            let _ = entry.tx.send(result);
        }
        ResolveOutcome::Delivered
    }

    /// Wait for the reply to `request` or its deadline
    pub async fn wait(&self, request: PendingRequest<T>) -> Result<T> {
        let PendingRequest { id, mut rx } = request;

        match tokio::time::timeout(self.timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HubError::ConnectionLost),
            Err(_) => {
                let removed = self.pending.lock().await.remove(id);
                if removed {
                    debug!("Request {} timed out after {:?}", id, self.timeout);
                    return Err(HubError::Timeout(self.timeout));
                }
                // Resolved between the deadline firing and the removal
                match rx.try_recv() {
                    Ok(result) => result,
                    Err(_) => Err(HubError::Timeout(self.timeout)),
                }
            }
        }
    }

    /// Drop a request without waiting, e.g. when its send failed
    pub async fn cancel(&self, request: PendingRequest<T>) {
        self.pending.lock().await.remove(request.id);
    }

    /// Reject every outstanding request with `ConnectionLost`
    pub async fn fail_all(&self) -> usize {
        let mut pending = self.pending.lock().await;
        let count = pending.len();

        for (_, tx) in pending.by_id.drain() {
            let _ = tx.send(Err(HubError::ConnectionLost));
        }
        for entry in pending.fifo.drain(..) {
            let _ = entry.tx.send(Err(HubError::ConnectionLost));
        }

        if count > 0 {
            debug!("Rejected {} pending requests on disconnect", count);
        }
        count
    }

    pub async fn pending_count(&self) -> usize {
        let mut pending = self.pending.lock().await;
        pending.purge_abandoned();
        pending.len()
    }
}

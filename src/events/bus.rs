//! Per-session event bus: sequence allocation and watcher fan-out.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::models::event::WatchItem;

/// One attached watcher endpoint.
struct Watcher {
    id: u64,
    tx: mpsc::Sender<WatchItem>,
}

/// A live-feed subscription returned by [`SessionBus::attach`].
pub struct BusSubscription {
    /// Watcher id, usable with [`SessionBus::detach`].
    pub id: u64,
    /// Item feed. Closes when the session ends or the watcher is dropped
    /// for falling behind.
    pub rx: mpsc::Receiver<WatchItem>,
}

/// Sequence counter plus independent watcher endpoints.
///
/// Watchers never block each other: items are delivered with `try_send`,
/// and a watcher whose buffer is full is dropped — it can reconnect and
/// resume from persisted history via its sequence cursor.
pub struct SessionBus {
    seq: AtomicU64,
    next_watcher: AtomicU64,
    watchers: Mutex<Vec<Watcher>>,
    closed: AtomicBool,
}

impl SessionBus {
    /// Create a bus whose first allocated sequence is `start + 1`.
    #[must_use]
    pub fn new(start: u64) -> Self {
        Self {
            seq: AtomicU64::new(start),
            next_watcher: AtomicU64::new(1),
            watchers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Allocate the next sequence number.
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Highest sequence allocated so far.
    #[must_use]
    pub fn current_sequence(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }

    /// Attach a watcher with the given buffer capacity.
    ///
    /// Attaching after [`SessionBus::close`] yields an already-ended feed:
    /// late watchers read history only.
    pub async fn attach(&self, capacity: usize) -> BusSubscription {
        let id = self.next_watcher.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(capacity.max(1));
        if !self.closed.load(Ordering::SeqCst) {
            self.watchers.lock().await.push(Watcher { id, tx });
            debug!(watcher = id, "bus: watcher attached");
        }
        BusSubscription { id, rx }
    }

    /// Detach a watcher. Idempotent.
    pub async fn detach(&self, id: u64) {
        self.watchers.lock().await.retain(|w| w.id != id);
    }

    /// Deliver one item to every watcher.
    ///
    /// A watcher that has disconnected, or whose buffer is full, is removed;
    /// the rest are unaffected.
    pub async fn publish(&self, item: WatchItem) {
        let mut watchers = self.watchers.lock().await;
        watchers.retain(|watcher| match watcher.tx.try_send(item.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    watcher = watcher.id,
                    "bus: watcher fell behind, dropping subscription"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Drop all watchers, ending their streams. Terminal.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.watchers.lock().await.clear();
    }
}

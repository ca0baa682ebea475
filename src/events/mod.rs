//! Event & state pipeline: sequencing, assembly, persistence, fan-out.
//!
//! Each live session owns one [`SessionPipeline`]. Every ingested payload is
//! stamped from a single per-session sequence counter shared between live
//! events and persisted messages, so the union of both is contiguous and a
//! watcher replaying history then following live traffic never sees a gap
//! or a duplicate.

pub mod assembler;
pub mod bus;
pub mod normalizer;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::models::event::{event_now, SessionEventPayload, WatchItem};
use crate::models::message::{MessagePayload, SessionMessage};
use crate::models::session::SessionStatus;
use crate::persistence::message_repo::MessageRepo;
use crate::Result;

use assembler::MessageAssembler;
use bus::{BusSubscription, SessionBus};

/// Per-session ingest, assembly, persistence, and fan-out.
pub struct SessionPipeline {
    session_id: String,
    bus: SessionBus,
    assembler: Mutex<MessageAssembler>,
    messages: MessageRepo,
    watch_capacity: usize,
}

impl SessionPipeline {
    /// Create a pipeline for `session_id` starting at sequence
    /// `after_sequence` (0 for a fresh session; the highest persisted
    /// sequence when resuming).
    #[must_use]
    pub fn new(
        session_id: String,
        messages: MessageRepo,
        after_sequence: u64,
        watch_capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            session_id,
            bus: SessionBus::new(after_sequence),
            assembler: Mutex::new(MessageAssembler::new()),
            messages,
            watch_capacity,
        })
    }

    /// Session this pipeline belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Highest sequence allocated so far.
    #[must_use]
    pub fn current_sequence(&self) -> u64 {
        self.bus.current_sequence()
    }

    /// Ingest one payload produced by the driver.
    ///
    /// Allocates sequence numbers, publishes the live event, runs the
    /// assembler, and persists any completed messages. Calls are serialized
    /// internally, so concurrent producers (the driver's read loop and
    /// permission tasks) cannot interleave sequence allocation with
    /// publication.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if persisting an assembled message fails.
    pub async fn ingest(&self, payload: SessionEventPayload) -> Result<()> {
        let mut assembler = self.assembler.lock().await;

        if let SessionEventPayload::StatusChange { new_status } = &payload {
            // A turn terminator: anything still buffered is complete and
            // persists ahead of the status event, so a terminal
            // status_change is the last item watchers observe.
            let terminator =
                matches!(new_status, SessionStatus::Idle) || new_status.is_terminal();
            if terminator {
                for completed in assembler.flush() {
                    self.persist_and_publish(completed).await?;
                }
            }
            self.publish_event(payload).await;
            return Ok(());
        }

        let produced = assembler.observe(&payload);
        self.publish_event(payload).await;
        for completed in produced {
            self.persist_and_publish(completed).await?;
        }
        Ok(())
    }

    /// Attach a watcher to the live feed.
    ///
    /// The subscription is independent of other watchers; if its buffer
    /// overflows it is dropped and the watcher must reconnect with an
    /// `after_sequence` cursor.
    pub async fn subscribe(&self) -> BusSubscription {
        self.bus.attach(self.watch_capacity).await
    }

    /// Drop all watchers. Terminal; called once the session ends.
    pub async fn close(&self) {
        self.bus.close().await;
    }

    /// Stamp, persist, and publish one assembled message.
    async fn persist_and_publish(&self, payload: MessagePayload) -> Result<()> {
        let message = SessionMessage {
            session_id: self.session_id.clone(),
            sequence: self.bus.next_sequence(),
            payload,
            created_at: Utc::now(),
        };
        self.messages.append(&message).await?;
        self.bus.publish(WatchItem::Message(message)).await;
        Ok(())
    }

    /// Stamp and publish one live event.
    async fn publish_event(&self, payload: SessionEventPayload) {
        let sequence = self.bus.next_sequence();
        let event = event_now(&self.session_id, sequence, payload);
        self.bus.publish(WatchItem::Event(event)).await;
    }
}

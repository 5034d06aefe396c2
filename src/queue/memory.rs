/// In-process response queue
///
/// Only valid when the stream and every dispatch for a session run in the same
/// process (single worker, or tests). Each session gets its own slot so a push
/// never contends with another session's pop. Only `mark_open` creates a slot.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::domain::{OutboundMessage, SessionId};
use crate::queue::{QueueError, ResponseQueue};

/// Buffered entries and open marker for one session
#[derive(Default)]
struct SessionSlot {
    entries: Mutex<VecDeque<OutboundMessage>>,
    notify: Notify,
    open_until: Mutex<Option<Instant>>,
}

impl SessionSlot {
    fn is_open(&self) -> bool {
        let until = *self.open_until.lock();
        until.map(|until| until > Instant::now()).unwrap_or(false)
    }
}

/// Response queue backed by per-session deques
#[derive(Default)]
pub struct MemoryResponseQueue {
    slots: Mutex<HashMap<SessionId, Arc<SessionSlot>>>,
}

impl MemoryResponseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the slot for a session, creating it if needed
    ///
    /// The map lock is released before the slot is used.
    fn slot(&self, session_id: &SessionId) -> Arc<SessionSlot> {
        let mut slots = self.slots.lock();
        slots.entry(session_id.clone()).or_default().clone()
    }

    fn existing_slot(&self, session_id: &SessionId) -> Option<Arc<SessionSlot>> {
        self.slots.lock().get(session_id).cloned()
    }

    /// Number of entries waiting for a session
    pub fn len(&self, session_id: &SessionId) -> usize {
        self.existing_slot(session_id)
            .map(|slot| {
                let len = slot.entries.lock().len();
                len
            })
            .unwrap_or(0)
    }

    /// Number of sessions holding any storage
    pub fn session_count(&self) -> usize {
        self.slots.lock().len()
    }
}

#[async_trait]
impl ResponseQueue for MemoryResponseQueue {
    async fn push(&self, session_id: &SessionId, message: &OutboundMessage) -> Result<(), QueueError> {
        let slot = match self.existing_slot(session_id) {
            Some(slot) if slot.is_open() => slot,
            _ => return Err(QueueError::SessionClosed(session_id.clone())),
        };
        slot.entries.lock().push_back(message.clone());
        slot.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, session_id: &SessionId, timeout: Duration) -> Result<Option<OutboundMessage>, QueueError> {
        let deadline = Instant::now() + timeout;
        let Some(slot) = self.existing_slot(session_id) else {
            // nothing can be pushed without a slot
            tokio::time::sleep_until(deadline).await;
            return Ok(None);
        };

        loop {
            let head = slot.entries.lock().pop_front();
            if head.is_some() {
                return Ok(head);
            }
            // notify_one leaves a permit behind when nobody is waiting, so a
            // push between the check above and this wait is not lost.
            if tokio::time::timeout_at(deadline, slot.notify.notified()).await.is_err() {
                let head = slot.entries.lock().pop_front();
                return Ok(head);
            }
        }
    }

    async fn expire(&self, session_id: &SessionId) -> Result<(), QueueError> {
        let removed = self.slots.lock().remove(session_id);
        if let Some(slot) = removed {
            let dropped = slot.entries.lock().len();
            if dropped > 0 {
                tracing::debug!("Dropped {} undelivered messages for session {}", dropped, session_id);
            }
        }
        Ok(())
    }

    async fn mark_open(&self, session_id: &SessionId, ttl: Duration) -> Result<(), QueueError> {
        let slot = self.slot(session_id);
        *slot.open_until.lock() = Some(Instant::now() + ttl);
        Ok(())
    }

    async fn is_open(&self, session_id: &SessionId) -> Result<bool, QueueError> {
        Ok(self.existing_slot(session_id).map(|slot| slot.is_open()).unwrap_or(false))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

//! Buffer of envelopes that could not be delivered.

use parking_lot::Mutex;
use savesync_core::OutboundEnvelope;
use std::collections::VecDeque;

/// FIFO of failed sends, replayed one per tick once connected.
///
/// Unbounded unless a capacity is given; a full bounded queue drops its
/// oldest entry. There is no deduplication, so a replayed save may land
/// after a newer one.
#[derive(Debug, Default)]
pub struct RetryQueue {
    entries: Mutex<VecDeque<OutboundEnvelope>>,
    capacity: Option<usize>,
}

impl RetryQueue {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn enqueue(&self, envelope: OutboundEnvelope) {
        let mut entries = self.entries.lock();
        if let Some(capacity) = self.capacity
            && entries.len() >= capacity
            && let Some(dropped) = entries.pop_front()
        {
            tracing::warn!(
                action = dropped.action(),
                capacity,
                "retry queue full, dropping oldest envelope"
            );
        }
        entries.push_back(envelope);
        tracing::debug!(queued = entries.len(), "envelope queued for retry");
    }

    /// Put back an envelope taken by [`try_dequeue_one`](Self::try_dequeue_one)
    /// so it keeps its place ahead of everything queued after it.
    pub fn requeue_front(&self, envelope: OutboundEnvelope) {
        let mut entries = self.entries.lock();
        if let Some(capacity) = self.capacity
            && entries.len() >= capacity
        {
            tracing::warn!(
                action = envelope.action(),
                capacity,
                "retry queue full, dropping oldest envelope"
            );
            return;
        }
        entries.push_front(envelope);
    }

    pub fn try_dequeue_one(&self) -> Option<OutboundEnvelope> {
        self.entries.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

//! Correlation of load responses with the callers awaiting them.
//!
//! Each in-flight load owns one entry keyed by its request id. An entry is
//! completed by whichever of response, error, timeout or disconnect removes
//! it from the map first; removal happens under the lock, so the losers find
//! nothing and do nothing.

use parking_lot::Mutex;
use savesync_core::PlayerSnapshot;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Terminal result of a load.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// The backend returned a record.
    Found(PlayerSnapshot),
    /// The backend has no record (or sent an unusable one).
    NotFound,
    /// The backend answered with an error frame.
    Rejected(String),
    /// No answer before the deadline.
    TimedOut,
    /// The connection dropped while the request was in flight.
    ConnectionLost,
    /// No connection could be established before the deadline.
    Unreachable,
}

impl LoadOutcome {
    /// Collapse to the facade's "snapshot or absent" view.
    pub fn into_snapshot(self) -> Option<PlayerSnapshot> {
        match self {
            LoadOutcome::Found(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, LoadOutcome::Found(_))
    }
}

/// Error registering a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PendingError {
    #[error("request id {0} is already pending")]
    Duplicate(String),
}

struct Entry {
    completion: oneshot::Sender<LoadOutcome>,
    deadline: Instant,
}

/// Thread-safe table of in-flight loads.
pub struct PendingRequests {
    entries: Mutex<HashMap<String, Entry>>,
    runtime: Handle,
}

impl PendingRequests {
    /// A table whose timers run on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime; use
    /// [`with_handle`](Self::with_handle) there.
    pub fn new() -> Self {
        Self::with_handle(Handle::current())
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            runtime,
        }
    }

    /// Insert a fresh entry and arm its timeout on the table's runtime.
    pub fn register(
        self: &Arc<Self>,
        request_id: &str,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<LoadOutcome>, PendingError> {
        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;
        {
            let mut entries = self.entries.lock();
            if entries.contains_key(request_id) {
                return Err(PendingError::Duplicate(request_id.to_string()));
            }
            entries.insert(
                request_id.to_string(),
                Entry {
                    completion: tx,
                    deadline,
                },
            );
        }

        let table = Arc::downgrade(self);
        let request_id = request_id.to_string();
        self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(table) = table.upgrade() {
                table.expire(&request_id);
            }
        });

        Ok(rx)
    }

    /// Remove the entry and complete it with `outcome`.
    ///
    /// Returns false when the id is unknown, which is expected when a late
    /// response loses the race against its timeout.
    pub fn resolve(&self, request_id: &str, outcome: LoadOutcome) -> bool {
        let Some(entry) = self.entries.lock().remove(request_id) else {
            tracing::debug!(request_id, "no pending request for response");
            return false;
        };
        if entry.completion.send(outcome).is_err() {
            tracing::debug!(request_id, "load caller went away before completion");
        }
        true
    }

    /// Complete the entry with [`LoadOutcome::TimedOut`] if it is still
    /// pending and its deadline has passed.
    fn expire(&self, request_id: &str) -> bool {
        let entry = {
            let mut entries = self.entries.lock();
            match entries.get(request_id) {
                Some(entry) if entry.deadline <= Instant::now() => entries.remove(request_id),
                _ => None,
            }
        };
        let Some(entry) = entry else {
            return false;
        };

        tracing::warn!(request_id, "load request timed out");
        let _ = entry.completion.send(LoadOutcome::TimedOut);
        true
    }

    /// Complete every pending entry with `outcome`. Returns how many were
    /// cancelled.
    pub fn cancel_all(&self, outcome: LoadOutcome) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            let _ = entry.completion.send(outcome.clone());
        }
        count
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.entries.lock().contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Arc<PendingRequests> {
        Arc::new(PendingRequests::new())
    }

    #[tokio::test]
    async fn resolve_completes_once() {
        let pending = table();
        let rx = pending.register("a", Duration::from_secs(30)).unwrap();

        assert!(pending.resolve("a", LoadOutcome::NotFound));
        assert!(!pending.resolve("a", LoadOutcome::Rejected("late".into())));
        assert_eq!(rx.await.unwrap(), LoadOutcome::NotFound);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn duplicate_register_is_rejected() {
        let pending = table();
        let _rx = pending.register("a", Duration::from_secs(30)).unwrap();
        assert_eq!(
            pending.register("a", Duration::from_secs(30)).unwrap_err(),
            PendingError::Duplicate("a".into())
        );
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn unknown_id_is_ignored() {
        let pending = table();
        assert!(!pending.resolve("missing", LoadOutcome::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_and_removes_entry() {
        let pending = table();
        let rx = pending.register("a", Duration::from_secs(10)).unwrap();

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(pending.contains("a"));

        assert_eq!(rx.await.unwrap(), LoadOutcome::TimedOut);
        assert!(!pending.contains("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn response_beats_timeout() {
        let pending = table();
        let rx = pending.register("a", Duration::from_secs(10)).unwrap();
        assert!(pending.resolve("a", LoadOutcome::NotFound));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(rx.await.unwrap(), LoadOutcome::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn late_response_after_timeout_is_a_no_op() {
        let pending = table();
        let rx = pending.register("a", Duration::from_secs(1)).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(!pending.resolve("a", LoadOutcome::NotFound));
        assert_eq!(rx.await.unwrap(), LoadOutcome::TimedOut);
    }

    #[tokio::test]
    async fn timers_arm_when_registered_off_runtime() {
        let pending = table();
        let rx = {
            let pending = pending.clone();
            std::thread::spawn(move || pending.register("a", Duration::from_millis(50)).unwrap())
                .join()
                .unwrap()
        };

        assert_eq!(rx.await.unwrap(), LoadOutcome::TimedOut);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn cancel_all_completes_everything() {
        let pending = table();
        let a = pending.register("a", Duration::from_secs(30)).unwrap();
        let b = pending.register("b", Duration::from_secs(30)).unwrap();

        assert_eq!(pending.cancel_all(LoadOutcome::ConnectionLost), 2);
        assert_eq!(a.await.unwrap(), LoadOutcome::ConnectionLost);
        assert_eq!(b.await.unwrap(), LoadOutcome::ConnectionLost);
        assert!(pending.is_empty());
        assert!(!pending.resolve("a", LoadOutcome::NotFound));
    }

    #[tokio::test]
    async fn concurrent_resolvers_complete_exactly_once() {
        let pending = table();
        let rx = pending.register("race", Duration::from_secs(30)).unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let pending = pending.clone();
            handles.push(tokio::spawn(async move {
                pending.resolve("race", LoadOutcome::Rejected(format!("resolver {i}")))
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert!(matches!(rx.await.unwrap(), LoadOutcome::Rejected(_)));
    }
}

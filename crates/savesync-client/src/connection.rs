//! Connection lifecycle for one persistence backend.
//!
//! The manager owns the only socket. Reads and writes run on two tokio tasks
//! spawned per connection on the manager's runtime; everything else (`send`,
//! `tick`, `disconnect`) is synchronous and safe to call from a game loop,
//! including one running on a thread the runtime does not own.
//!
//! ```text
//!                 connect()
//! Disconnected ─────────────► Connecting ──── handshake ok ───► Connected
//!      ▲                          │                                 │
//!      └──── handshake failed ────┘                                 │
//!      └───────────── disconnect() / read or write error ───────────┘
//! ```
//!
//! Every transition bumps an epoch under the state lock. Tasks belonging to
//! an older epoch can no longer tear down a newer connection.

use crate::pending::{LoadOutcome, PendingRequests};
use crate::retry::RetryQueue;
use crate::{ConfigError, SyncConfig, SyncError};
use futures_util::stream::SplitStream;
use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use savesync_core::{OutboundEnvelope, PlayerId, ServerMessage, codec};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Socket open, reader and writer running.
    Connected,
}

struct Inner {
    identity: Option<PlayerId>,
    epoch: u64,
    outbound: Option<mpsc::UnboundedSender<OutboundEnvelope>>,
    reader: Option<JoinHandle<()>>,
    last_attempt: Option<Instant>,
    last_replay: Option<Instant>,
}

/// Owns one logical connection to the backend and keeps it alive.
pub struct ConnectionManager {
    config: SyncConfig,
    inner: Mutex<Inner>,
    state: watch::Sender<ConnectionState>,
    pending: Arc<PendingRequests>,
    retry: RetryQueue,
    runtime: Handle,
}

/// Why [`ConnectionManager::hand_off`] could not pass an envelope on.
enum Unsent {
    NotConnected(OutboundEnvelope),
    WriterStopped(OutboundEnvelope),
}

impl ConnectionManager {
    /// Build a manager whose tasks run on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime; use
    /// [`with_handle`](Self::with_handle) there.
    pub fn new(config: SyncConfig) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        Self::with_handle(config, Handle::current())
    }

    /// Build a manager whose tasks run on `runtime`.
    pub fn with_handle(config: SyncConfig, runtime: Handle) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Arc::new(Self {
            retry: RetryQueue::new(config.retry_queue_capacity),
            config,
            inner: Mutex::new(Inner {
                identity: None,
                epoch: 0,
                outbound: None,
                reader: None,
                last_attempt: None,
                last_replay: None,
            }),
            state,
            pending: Arc::new(PendingRequests::with_handle(runtime.clone())),
            runtime,
        }))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// The identity used for the current (or next) connection.
    pub fn identity(&self) -> Option<PlayerId> {
        self.inner.lock().identity.clone()
    }

    pub fn pending(&self) -> &Arc<PendingRequests> {
        &self.pending
    }

    pub fn retry_queue(&self) -> &RetryQueue {
        &self.retry
    }

    // Callers must hold `inner`, which serializes transitions.
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(?previous, current = ?state, "connection state changed");
        }
    }

    /// Open the socket for `identity`.
    ///
    /// A no-op while already connecting or connected. On failure the state
    /// returns to `Disconnected` and `tick` will try again after the retry
    /// interval.
    pub async fn connect(self: &Arc<Self>, identity: PlayerId) -> Result<(), SyncError> {
        let (epoch, url) = {
            let mut inner = self.inner.lock();
            if self.state() != ConnectionState::Disconnected {
                tracing::debug!(%identity, "connect ignored, connection already in progress");
                return Ok(());
            }
            inner.epoch += 1;
            inner.last_attempt = Some(Instant::now());
            let url = connect_url(&self.config.base_url, &identity);
            inner.identity = Some(identity);
            self.set_state(ConnectionState::Connecting);
            (inner.epoch, url)
        };

        tracing::info!(%url, "connecting to persistence backend");
        let timeout = self.config.connect_timeout();
        let ws = match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url.as_str()))
            .await
        {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "failed to connect to persistence backend");
                self.abandon_attempt(epoch);
                return Err(e.into());
            }
            Err(_) => {
                tracing::warn!(?timeout, "connecting to persistence backend timed out");
                self.abandon_attempt(epoch);
                return Err(SyncError::ConnectTimeout(timeout));
            }
        };

        let (sink, stream) = ws.split();
        let (outbound, rx) = mpsc::unbounded_channel();
        {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch || self.state() != ConnectionState::Connecting {
                tracing::debug!("handshake finished after disconnect, dropping socket");
                return Err(SyncError::ConnectAborted);
            }
            inner.outbound = Some(outbound);
            inner.last_replay = None;
            let reader = read_loop(Arc::downgrade(self), stream, epoch);
            inner.reader = Some(self.runtime.spawn(reader));
            self.runtime.spawn(write_loop(Arc::downgrade(self), sink, rx, epoch));
            self.set_state(ConnectionState::Connected);
        }

        tracing::info!(queued = self.retry.len(), "connected to persistence backend");
        Ok(())
    }

    /// Spawn [`connect`](Self::connect) on the manager's runtime.
    pub fn schedule_connect(self: &Arc<Self>, identity: PlayerId) {
        let this = Arc::clone(self);
        self.runtime.spawn(async move {
            if let Err(e) = this.connect(identity).await {
                tracing::debug!(error = %e, "scheduled connect failed");
            }
        });
    }

    /// Start connecting if nothing is in progress, reusing the stored
    /// identity and falling back to `fallback` when none is stored yet.
    pub fn ensure_connecting(self: &Arc<Self>, fallback: &PlayerId) {
        if self.state() != ConnectionState::Disconnected {
            return;
        }
        let identity = self.identity().unwrap_or_else(|| fallback.clone());
        self.schedule_connect(identity);
    }

    fn abandon_attempt(&self, epoch: u64) {
        let inner = self.inner.lock();
        if inner.epoch == epoch && self.state() == ConnectionState::Connecting {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Tear the connection down and cancel every pending load. Idempotent.
    pub fn disconnect(&self, reason: &str) {
        self.teardown(reason, None);
    }

    // With `expected_epoch`, only tear down if no transition happened since.
    fn teardown(&self, reason: &str, expected_epoch: Option<u64>) {
        let (previous, reader) = {
            let mut inner = self.inner.lock();
            if expected_epoch.is_some_and(|epoch| epoch != inner.epoch) {
                return;
            }
            let previous = self.state();
            inner.epoch += 1;
            inner.outbound = None;
            let reader = inner.reader.take();
            self.set_state(ConnectionState::Disconnected);
            (previous, reader)
        };

        if let Some(reader) = reader {
            reader.abort();
        }
        let cancelled = self.pending.cancel_all(LoadOutcome::ConnectionLost);
        if previous != ConnectionState::Disconnected || cancelled > 0 {
            tracing::info!(reason, ?previous, cancelled, "disconnected from persistence backend");
        }
    }

    /// Hand an envelope to the socket, or queue it for retry.
    ///
    /// Never blocks. A closed writer counts as a lost connection.
    pub fn send(&self, envelope: OutboundEnvelope) {
        match self.hand_off(envelope) {
            Ok(()) => {}
            Err(Unsent::NotConnected(envelope)) => {
                tracing::debug!(action = envelope.action(), "not connected, queueing envelope");
                self.retry.enqueue(envelope);
            }
            Err(Unsent::WriterStopped(envelope)) => {
                tracing::warn!(
                    action = envelope.action(),
                    "socket writer stopped, queueing envelope"
                );
                self.disconnect("socket writer stopped");
                self.retry.enqueue(envelope);
            }
        }
    }

    fn hand_off(&self, envelope: OutboundEnvelope) -> Result<(), Unsent> {
        let inner = self.inner.lock();
        let Some(outbound) = inner.outbound.as_ref().filter(|_| self.is_connected()) else {
            return Err(Unsent::NotConnected(envelope));
        };
        let action = envelope.action();
        match outbound.send(envelope) {
            Ok(()) => {
                tracing::debug!(action, "envelope handed to writer");
                Ok(())
            }
            Err(mpsc::error::SendError(envelope)) => Err(Unsent::WriterStopped(envelope)),
        }
    }

    /// Dispatch one inbound frame.
    pub fn on_receive(&self, raw: &str) {
        let message = match codec::decode_server_message(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "discarding malformed frame");
                return;
            }
        };

        match message {
            ServerMessage::LoadResponse {
                request_id,
                found,
                payload,
            } => {
                let outcome = match (found, payload) {
                    (false, _) => LoadOutcome::NotFound,
                    (true, None) => {
                        tracing::warn!(%request_id, "load response marked found without payload");
                        LoadOutcome::NotFound
                    }
                    (true, Some(payload)) => match codec::decode_snapshot(payload) {
                        Ok(snapshot) => LoadOutcome::Found(snapshot),
                        Err(e) => {
                            tracing::warn!(
                                %request_id,
                                error = %e,
                                "discarding undecodable snapshot"
                            );
                            LoadOutcome::Rejected(e.to_string())
                        }
                    },
                };
                tracing::debug!(%request_id, found = outcome.is_found(), "load response received");
                self.pending.resolve(&request_id, outcome);
            }
            ServerMessage::Error { request_id, error } => {
                tracing::warn!(
                    request_id = request_id.as_deref(),
                    %error,
                    "backend reported an error"
                );
                if let Some(request_id) = request_id {
                    self.pending.resolve(&request_id, LoadOutcome::Rejected(error));
                }
            }
            ServerMessage::Unknown => {
                tracing::warn!("ignoring frame with unrecognized action");
            }
        }
    }

    /// Periodic maintenance, called from the host's fixed-rate loop.
    ///
    /// While disconnected, schedules a reconnect once per retry interval.
    /// While connected, resends at most one queued envelope per retry
    /// interval.
    pub fn tick(self: &Arc<Self>) {
        let now = Instant::now();
        let interval = self.config.retry_interval();

        match self.state() {
            ConnectionState::Connecting => {}
            ConnectionState::Disconnected => {
                let identity = {
                    let mut inner = self.inner.lock();
                    let due = inner
                        .last_attempt
                        .is_none_or(|at| now.duration_since(at) >= interval);
                    if due && inner.identity.is_some() {
                        inner.last_attempt = Some(now);
                        inner.identity.clone()
                    } else {
                        None
                    }
                };
                if let Some(identity) = identity {
                    tracing::debug!(%identity, "scheduling reconnect");
                    self.schedule_connect(identity);
                }
            }
            ConnectionState::Connected => self.replay_one(now, interval),
        }
    }

    fn replay_one(&self, now: Instant, interval: Duration) {
        if self
            .inner
            .lock()
            .last_replay
            .is_some_and(|at| now.duration_since(at) < interval)
        {
            return;
        }

        while let Some(envelope) = self.retry.try_dequeue_one() {
            if let Some(request_id) = envelope.request_id()
                && !self.pending.contains(request_id)
            {
                tracing::debug!(request_id, "dropping load whose caller already gave up");
                continue;
            }
            self.inner.lock().last_replay = Some(now);
            tracing::info!(
                action = envelope.action(),
                remaining = self.retry.len(),
                "replaying queued envelope"
            );
            match self.hand_off(envelope) {
                Ok(()) => {}
                Err(Unsent::NotConnected(envelope)) => self.retry.requeue_front(envelope),
                Err(Unsent::WriterStopped(envelope)) => {
                    self.disconnect("socket writer stopped");
                    self.retry.requeue_front(envelope);
                }
            }
            return;
        }
    }

    /// Drive [`tick`](Self::tick) on the configured interval.
    ///
    /// For hosts without a game loop of their own. The task ends once the
    /// manager is dropped.
    pub fn spawn_ticker(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        let period = self.config.tick_interval();
        self.runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.tick();
            }
        })
    }

    /// Wait until connected or `deadline` passes.
    pub async fn wait_until_connected(&self, deadline: Instant) -> bool {
        let mut state = self.subscribe();
        matches!(
            tokio::time::timeout_at(
                deadline,
                state.wait_for(|s| *s == ConnectionState::Connected)
            )
            .await,
            Ok(Ok(_))
        )
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(reader) = self.inner.get_mut().reader.take() {
            reader.abort();
        }
    }
}

async fn read_loop(
    manager: Weak<ConnectionManager>,
    mut stream: SplitStream<WsStream>,
    epoch: u64,
) {
    let reason = loop {
        let frame = stream.next().await;
        let Some(this) = manager.upgrade() else {
            return;
        };
        match frame {
            Some(Ok(Message::Text(text))) => this.on_receive(&text),
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => this.on_receive(text),
                Err(_) => tracing::warn!(len = bytes.len(), "discarding non-UTF-8 binary frame"),
            },
            Some(Ok(Message::Close(frame))) => {
                break match frame {
                    Some(frame) => format!("closed by backend: {}", frame.reason.as_str()),
                    None => "closed by backend".to_string(),
                };
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => break format!("read failed: {e}"),
            None => break "connection closed".to_string(),
        }
    };

    if let Some(manager) = manager.upgrade() {
        manager.teardown(&reason, Some(epoch));
    }
}

async fn write_loop<S>(
    manager: Weak<ConnectionManager>,
    mut sink: S,
    mut rx: mpsc::UnboundedReceiver<OutboundEnvelope>,
    epoch: u64,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(envelope) = rx.recv().await {
        match sink
            .send(Message::Text(envelope.payload().to_owned().into()))
            .await
        {
            Ok(()) => tracing::debug!(action = envelope.action(), "envelope written"),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    action = envelope.action(),
                    "write failed, queueing for retry"
                );
                rx.close();
                if let Some(manager) = manager.upgrade() {
                    manager.retry.enqueue(envelope);
                    while let Ok(rest) = rx.try_recv() {
                        manager.retry.enqueue(rest);
                    }
                    manager.teardown("write failed", Some(epoch));
                }
                return;
            }
        }
    }

    let _ = sink.close().await;
}

/// `<base-url>?id=<identity>`, or `&id=` when the base already has a query.
pub(crate) fn connect_url(base_url: &str, identity: &PlayerId) -> String {
    let separator = if base_url.contains('?') { '&' } else { '?' };
    format!("{base_url}{separator}id={identity}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use savesync_core::{PlayerSnapshot, ResourceKind};
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite;

    fn player(id: &str) -> PlayerId {
        id.parse().unwrap()
    }

    fn manager() -> Arc<ConnectionManager> {
        ConnectionManager::new(SyncConfig {
            base_url: "ws://127.0.0.1:9/save".to_string(),
            ..SyncConfig::default()
        })
        .unwrap()
    }

    /// Accept clients forever and forward their text frames.
    fn accept_frames(listener: TcpListener) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(msg)) = ws.next().await {
                        if let Message::Text(text) = msg {
                            let _ = tx.send(text.to_string());
                        }
                    }
                });
            }
        });
        rx
    }

    fn save(amount: f64) -> OutboundEnvelope {
        let snapshot = PlayerSnapshot::new(player("123")).with_resource(ResourceKind::Wood, amount);
        codec::save_envelope(&snapshot).unwrap()
    }

    #[test]
    fn url_carries_identity() {
        assert_eq!(
            connect_url("ws://host/save", &player("42")),
            "ws://host/save?id=42"
        );
        assert_eq!(
            connect_url("ws://host/save?v=2", &player("42")),
            "ws://host/save?v=2&id=42"
        );
    }

    #[tokio::test]
    async fn send_while_disconnected_queues_once() {
        let manager = manager();
        manager.send(save(20.0));

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.retry_queue().len(), 1);
        assert_eq!(manager.retry_queue().try_dequeue_one(), Some(save(20.0)));
    }

    #[tokio::test]
    async fn load_response_resolves_pending() {
        let manager = manager();
        let rx = manager
            .pending()
            .register("r1", Duration::from_secs(30))
            .unwrap();

        let payload = codec::encode_snapshot(
            &PlayerSnapshot::new(player("123")).with_resource(ResourceKind::Wood, 3.0),
        )
        .unwrap();
        let frame = json!({
            "action": "loadresponse",
            "requestId": "r1",
            "found": true,
            "payload": payload,
        });
        manager.on_receive(&frame.to_string());

        let snapshot = rx.await.unwrap().into_snapshot().unwrap();
        assert_eq!(snapshot.amount(ResourceKind::Wood), 3.0);
        assert!(manager.pending().is_empty());
    }

    #[tokio::test]
    async fn not_found_and_error_resolve_to_absent() {
        let manager = manager();
        let missing = manager
            .pending()
            .register("r1", Duration::from_secs(30))
            .unwrap();
        let failed = manager
            .pending()
            .register("r2", Duration::from_secs(30))
            .unwrap();

        manager.on_receive(
            r#"{"action":"loadresponse","requestId":"r1","found":false,"payload":null}"#,
        );
        manager.on_receive(r#"{"action":"error","requestId":"r2","error":"db offline"}"#);

        assert_eq!(missing.await.unwrap(), LoadOutcome::NotFound);
        assert_eq!(
            failed.await.unwrap(),
            LoadOutcome::Rejected("db offline".to_string())
        );
    }

    #[tokio::test]
    async fn junk_frames_leave_pending_alone() {
        let manager = manager();
        let _rx = manager
            .pending()
            .register("r1", Duration::from_secs(30))
            .unwrap();

        manager.on_receive("{definitely not json");
        manager.on_receive(r#"{"action":"presence","requestId":"r1"}"#);
        manager.on_receive(r#"{"action":"error","requestId":null,"error":"noise"}"#);
        manager.on_receive(r#"{"action":"loadresponse","requestId":"other","found":false}"#);

        assert!(manager.pending().contains("r1"));
    }

    #[tokio::test]
    async fn disconnect_cancels_pending_and_is_idempotent() {
        let manager = manager();
        let rx = manager
            .pending()
            .register("r1", Duration::from_secs(30))
            .unwrap();

        manager.disconnect("test");
        manager.disconnect("test again");

        assert_eq!(rx.await.unwrap(), LoadOutcome::ConnectionLost);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.pending().is_empty());
    }

    #[tokio::test]
    async fn tick_without_identity_stays_idle() {
        let manager = manager();
        manager.tick();
        tokio::task::yield_now().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.identity(), None);
    }

    #[tokio::test]
    async fn failed_connect_returns_to_disconnected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let manager = ConnectionManager::new(SyncConfig {
            base_url: format!("ws://{addr}/save"),
            connect_timeout_secs: 2.0,
            ..SyncConfig::default()
        })
        .unwrap();
        let result = manager.connect(player("123")).await;

        assert!(result.is_err());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.identity(), Some(player("123")));
    }

    #[tokio::test]
    async fn stale_loads_are_skipped_on_replay() {
        let manager = manager();
        manager.send(codec::load_envelope(&player("123"), "gone").unwrap());
        manager.send(save(1.0));
        assert_eq!(manager.retry_queue().len(), 2);

        // The load's caller is gone, so it is dropped and the save is
        // replayed instead; still disconnected, the save goes back in line.
        manager.replay_one(Instant::now(), Duration::from_secs(5));
        assert_eq!(manager.retry_queue().len(), 1);
        assert_eq!(manager.retry_queue().try_dequeue_one(), Some(save(1.0)));
    }

    #[tokio::test]
    async fn replay_is_rate_limited() {
        let manager = manager();
        manager.send(save(1.0));
        manager.send(save(2.0));

        let now = Instant::now();
        manager.replay_one(now, Duration::from_secs(5));
        manager.replay_one(now, Duration::from_secs(5));

        // One replay happened and, finding no connection, went back to the
        // head of the queue; the second call fell inside the interval.
        assert_eq!(manager.retry_queue().len(), 2);
        assert_eq!(manager.retry_queue().try_dequeue_one(), Some(save(1.0)));
        assert_eq!(manager.retry_queue().try_dequeue_one(), Some(save(2.0)));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let result = ConnectionManager::new(SyncConfig {
            retry_interval_secs: f64::NAN,
            ..SyncConfig::default()
        });
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[tokio::test]
    async fn tick_from_a_plain_thread_schedules_reconnect() {
        let manager = manager();
        manager.inner.lock().identity = Some(player("123"));

        let game_thread = {
            let manager = manager.clone();
            std::thread::spawn(move || manager.tick())
        };
        game_thread.join().unwrap();

        assert!(manager.inner.lock().last_attempt.is_some());
    }

    #[tokio::test]
    async fn failed_write_requeues_then_replays_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut frames = accept_frames(listener);
        let manager = ConnectionManager::new(SyncConfig {
            base_url: format!("ws://{addr}/save"),
            retry_interval_secs: 0.05,
            ..SyncConfig::default()
        })
        .unwrap();

        // A live session whose socket rejects every write.
        let (outbound, rx) = mpsc::unbounded_channel();
        let epoch = {
            let mut inner = manager.inner.lock();
            inner.epoch += 1;
            inner.identity = Some(player("123"));
            inner.outbound = Some(outbound);
            manager.set_state(ConnectionState::Connected);
            inner.epoch
        };
        let lookup = manager.pending().register("r1", Duration::from_secs(30)).unwrap();
        manager.send(save(1.0));
        manager.send(save(2.0));

        let broken = futures_util::sink::unfold((), |(), _: Message| async {
            Err::<(), _>(tungstenite::Error::ConnectionClosed)
        });
        write_loop(Arc::downgrade(&manager), Box::pin(broken), rx, epoch).await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(lookup.await.unwrap(), LoadOutcome::ConnectionLost);
        assert_eq!(manager.retry_queue().len(), 2);

        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            while received.len() < 2 {
                manager.tick();
                tokio::select! {
                    Some(text) = frames.recv() => received.push(text),
                    _ = tokio::time::sleep(Duration::from_millis(20)) => {}
                }
            }
        })
        .await
        .unwrap();

        assert!(manager.is_connected());
        assert_eq!(received, [save(1.0).payload(), save(2.0).payload()]);

        for _ in 0..5 {
            manager.tick();
            tokio::time::sleep(Duration::from_millis(60)).await;
        }
        assert!(frames.try_recv().is_err());
        assert!(manager.retry_queue().is_empty());
    }
}

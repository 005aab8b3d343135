//! The surface the gameplay layer talks to.

use crate::connection::ConnectionManager;
use crate::pending::LoadOutcome;
use crate::{ConfigError, SyncConfig};
use chrono::Utc;
use savesync_core::{PlayerId, PlayerSnapshot, SnapshotSource, codec};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;

/// Saves and loads player snapshots through one backend connection.
///
/// Nothing here returns an error: saves that cannot go out are queued,
/// and loads that cannot complete come back as "not found". A disabled
/// client touches no network at all.
#[derive(Clone)]
pub struct PersistenceClient {
    connection: Option<Arc<ConnectionManager>>,
    load_timeout: Duration,
}

impl PersistenceClient {
    /// Build a client and its connection manager from `config`, with
    /// background tasks on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when `config` is enabled and this is called outside a tokio
    /// runtime; use [`with_handle`](Self::with_handle) there.
    pub fn new(config: SyncConfig) -> Result<Self, ConfigError> {
        if !config.enabled {
            return Self::off(config);
        }
        Ok(Self::with_connection(ConnectionManager::new(config)?))
    }

    /// Like [`new`](Self::new), with background tasks on `runtime`. The
    /// returned client may be driven from any thread.
    pub fn with_handle(config: SyncConfig, runtime: Handle) -> Result<Self, ConfigError> {
        if !config.enabled {
            return Self::off(config);
        }
        Ok(Self::with_connection(ConnectionManager::with_handle(config, runtime)?))
    }

    fn off(config: SyncConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        tracing::info!("persistence disabled, saves will be dropped");
        Ok(Self {
            connection: None,
            load_timeout: config.load_timeout(),
        })
    }

    /// Build a client over an existing connection manager.
    pub fn with_connection(connection: Arc<ConnectionManager>) -> Self {
        let load_timeout = connection.config().load_timeout();
        Self {
            connection: Some(connection),
            load_timeout,
        }
    }

    /// A client that drops saves and never finds anything.
    pub fn disabled() -> Self {
        Self {
            connection: None,
            load_timeout: SyncConfig::disabled().load_timeout(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.connection.is_some()
    }

    pub fn connection(&self) -> Option<&Arc<ConnectionManager>> {
        self.connection.as_ref()
    }

    /// The load bound used by [`load`](Self::load).
    pub fn load_timeout(&self) -> Duration {
        self.load_timeout
    }

    /// Open the backend connection for `identity` in the background.
    pub fn connect(&self, identity: PlayerId) {
        if let Some(connection) = &self.connection {
            connection.schedule_connect(identity);
        }
    }

    /// Forward to [`ConnectionManager::tick`]. Call from the host loop.
    pub fn tick(&self) {
        if let Some(connection) = &self.connection {
            connection.tick();
        }
    }

    /// Fire-and-forget save. Returns immediately.
    pub fn save_snapshot(&self, snapshot: &PlayerSnapshot) {
        let Some(connection) = &self.connection else {
            tracing::debug!(player_id = %snapshot.player_id, "persistence disabled, dropping save");
            return;
        };

        match codec::save_envelope(snapshot) {
            Ok(envelope) => {
                tracing::debug!(
                    player_id = %snapshot.player_id,
                    bytes = envelope.len(),
                    "saving snapshot"
                );
                connection.send(envelope);
            }
            Err(e) => {
                tracing::error!(
                    player_id = %snapshot.player_id,
                    error = %e,
                    "failed to encode snapshot, save dropped"
                );
            }
        }
    }

    /// Build a snapshot from `source`, stamp it, and save it.
    pub fn save_player(&self, source: &impl SnapshotSource) {
        if self.connection.is_none() {
            return;
        }
        let mut snapshot = source.snapshot();
        snapshot.saved_at = Utc::now();
        self.save_snapshot(&snapshot);
    }

    /// Load with the configured timeout.
    pub async fn load(&self, identity: &PlayerId) -> Option<PlayerSnapshot> {
        self.load_snapshot(identity, self.load_timeout).await
    }

    /// Load the snapshot of `identity`, or `None` when there is none or it
    /// could not be fetched within `timeout`.
    pub async fn load_snapshot(
        &self,
        identity: &PlayerId,
        timeout: Duration,
    ) -> Option<PlayerSnapshot> {
        self.load_snapshot_detailed(identity, timeout)
            .await
            .into_snapshot()
    }

    /// Like [`load_snapshot`](Self::load_snapshot), but says why nothing
    /// came back.
    pub async fn load_snapshot_detailed(
        &self,
        identity: &PlayerId,
        timeout: Duration,
    ) -> LoadOutcome {
        let Some(connection) = &self.connection else {
            return LoadOutcome::NotFound;
        };
        let deadline = Instant::now() + timeout;

        if !connection.is_connected() {
            connection.ensure_connecting(identity);
            if !connection.wait_until_connected(deadline).await {
                tracing::warn!(
                    %identity,
                    ?timeout,
                    "backend unreachable, treating load as not found"
                );
                return LoadOutcome::Unreachable;
            }
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let envelope = match codec::load_envelope(identity, &request_id) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(%identity, error = %e, "failed to encode load request");
                return LoadOutcome::Rejected(e.to_string());
            }
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        let completion = match connection.pending().register(&request_id, remaining) {
            Ok(completion) => completion,
            Err(e) => {
                tracing::error!(%identity, error = %e, "failed to register load request");
                return LoadOutcome::Rejected(e.to_string());
            }
        };

        tracing::debug!(%identity, %request_id, "loading snapshot");
        connection.send(envelope);

        let outcome = completion.await.unwrap_or(LoadOutcome::ConnectionLost);
        tracing::debug!(%identity, %request_id, found = outcome.is_found(), "load finished");
        outcome
    }
}

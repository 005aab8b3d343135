use savesync_core::{CodecError, PlayerIdError};
use std::time::Duration;

/// Errors surfaced by the connection manager.
///
/// None of these cross the [`PersistenceClient`](crate::PersistenceClient)
/// boundary; the facade logs them and degrades instead.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("invalid player identity: {0}")]
    InvalidIdentity(#[from] PlayerIdError),

    #[error("failed to connect to persistence backend: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connecting to persistence backend timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("connect attempt was superseded by a disconnect")]
    ConnectAborted,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Errors loading a [`SyncConfig`](crate::SyncConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

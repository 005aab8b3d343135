//! Client-side persistence sync for savesync.
//!
//! Moves player snapshots between a game-server process and a persistence
//! backend over one long-lived WebSocket. Saves are fire-and-forget and
//! survive outages in a retry queue; loads are correlated by request id and
//! always finish, with a snapshot or without one, within their timeout.
//!
//! ```ignore
//! let client = PersistenceClient::new(SyncConfig::load("savesync.toml")?)?;
//! client.connect(steam_id.clone());
//!
//! // in the game loop
//! client.tick();
//! client.save_player(&player);
//!
//! // on join
//! let snapshot = client.load(&steam_id).await;
//! ```

mod config;
mod connection;
mod error;
mod facade;
mod pending;
mod retry;

pub use config::SyncConfig;
pub use connection::{ConnectionManager, ConnectionState};
pub use error::{ConfigError, SyncError};
pub use facade::PersistenceClient;
pub use pending::{LoadOutcome, PendingError, PendingRequests};
pub use retry::RetryQueue;

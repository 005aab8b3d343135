//! Core types for savesync.
//!
//! This crate holds the protocol primitives shared by the game-server client
//! and anything that speaks to it: player identities, the snapshot data
//! model, the wire messages, and the codec between the two. It performs no
//! I/O.

pub mod codec;
mod identity;
mod message;
mod snapshot;

pub use codec::{CodecError, SnapshotPayload};
pub use identity::{PlayerId, PlayerIdError};
pub use message::{ClientMessage, OutboundEnvelope, ServerMessage};
pub use snapshot::{
    BonusKind, CraftingProgressSnapshot, PlayerSnapshot, ResourceKind, SnapshotSource, ToolBonus,
    ToolKind, ToolSnapshot,
};

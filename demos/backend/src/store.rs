//! Save records, keyed by player identity.

use savesync_core::codec;
use serde_json::Value;
use std::collections::HashMap;

/// A stored save.
pub struct Record {
    /// The payload exactly as the client sent it, unknown fields included.
    pub payload: Value,
    pub revision: u64,
}

/// Last-write-wins record store.
#[derive(Default)]
pub struct Store {
    records: HashMap<String, Record>,
    revision: u64,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `payload` under its player id. Returns the id and the new
    /// revision.
    pub fn save(&mut self, payload: Value) -> anyhow::Result<(String, u64)> {
        let snapshot = codec::decode_snapshot(payload.clone())?;
        let player_id = snapshot.player_id.to_string();

        self.revision += 1;
        self.records.insert(
            player_id.clone(),
            Record {
                payload,
                revision: self.revision,
            },
        );
        Ok((player_id, self.revision))
    }

    pub fn load(&self, player_id: &str) -> Option<&Record> {
        self.records.get(player_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

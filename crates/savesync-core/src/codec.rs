//! Mapping between [`PlayerSnapshot`] and its JSON wire payload.
//!
//! Encoding is strict and deterministic. Decoding is tolerant of schema
//! drift: unknown fields are ignored, `null` and out-of-range numbers fall
//! back to defaults, and enum-valued entries this build does not recognize
//! (resource kinds, tool kinds, bonus names) are dropped with a warning while
//! the rest of the snapshot is kept.

use crate::snapshot::clamp_quality;
use crate::{
    BonusKind, ClientMessage, CraftingProgressSnapshot, OutboundEnvelope, PlayerId, PlayerIdError,
    PlayerSnapshot, ResourceKind, ServerMessage, ToolBonus, ToolKind, ToolSnapshot,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Wire form of a [`PlayerSnapshot`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotPayload {
    #[serde(deserialize_with = "lenient::or_default")]
    pub player_id: String,
    #[serde(deserialize_with = "lenient::count")]
    pub level: u32,
    #[serde(deserialize_with = "lenient::number")]
    pub experience: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub money: f64,
    #[serde(deserialize_with = "lenient::count")]
    pub prestige_points: u32,
    #[serde(deserialize_with = "lenient::amounts")]
    pub inventory: BTreeMap<String, f64>,
    pub equipped_tool: Option<ToolPayload>,
    #[serde(deserialize_with = "lenient::or_default")]
    pub crafting_progress: CraftingProgressPayload,
    pub saved_at: Option<DateTime<Utc>>,
}

/// Wire form of a [`ToolSnapshot`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolPayload {
    #[serde(deserialize_with = "lenient::or_default")]
    pub tool_kind: String,
    #[serde(deserialize_with = "lenient::or_default")]
    pub material: String,
    #[serde(deserialize_with = "lenient::count")]
    pub level: u32,
    #[serde(deserialize_with = "lenient::number")]
    pub quality: f64,
    #[serde(deserialize_with = "lenient::or_default")]
    pub bonuses: Vec<BonusPayload>,
}

/// Wire form of a [`ToolBonus`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BonusPayload {
    #[serde(deserialize_with = "lenient::or_default")]
    pub name: String,
    #[serde(deserialize_with = "lenient::number")]
    pub magnitude: f64,
}

/// Wire form of a [`CraftingProgressSnapshot`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CraftingProgressPayload {
    #[serde(deserialize_with = "lenient::or_default")]
    pub unlocked_recipe_names: Vec<String>,
    #[serde(deserialize_with = "lenient::counts")]
    pub craft_count_by_recipe: BTreeMap<String, u32>,
    #[serde(deserialize_with = "lenient::counts")]
    pub material_use_count: BTreeMap<String, u32>,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Field readers that fall back to a default instead of failing the whole
/// snapshot when a value has drifted from its expected shape.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;
    use std::collections::BTreeMap;

    /// `null` reads as the default.
    pub fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Default + Deserialize<'de>,
    {
        Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
    }

    /// Anything but a finite number reads as 0.
    pub fn number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Value::deserialize(deserializer)?.as_f64().unwrap_or(0.0))
    }

    /// Anything but a non-negative integer that fits reads as 0.
    pub fn count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        Ok(as_count(&Value::deserialize(deserializer)?).unwrap_or(0))
    }

    /// Entries whose amount is not a number are dropped.
    pub fn amounts<'de, D>(deserializer: D) -> Result<BTreeMap<String, f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(entries(deserializer)?
            .into_iter()
            .filter_map(|(name, value)| match value.as_f64() {
                Some(amount) => Some((name, amount)),
                None => {
                    tracing::warn!(%name, %value, "dropping non-numeric amount");
                    None
                }
            })
            .collect())
    }

    /// Entries whose count is not a non-negative integer are dropped.
    pub fn counts<'de, D>(deserializer: D) -> Result<BTreeMap<String, u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(entries(deserializer)?
            .into_iter()
            .filter_map(|(name, value)| match as_count(&value) {
                Some(count) => Some((name, count)),
                None => {
                    tracing::warn!(%name, %value, "dropping invalid count");
                    None
                }
            })
            .collect())
    }

    fn entries<'de, D>(deserializer: D) -> Result<BTreeMap<String, Value>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
    }

    fn as_count(value: &Value) -> Option<u32> {
        value.as_u64().and_then(|n| u32::try_from(n).ok())
    }
}

/// Errors produced while encoding or decoding wire data.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot payload is missing")]
    MissingPayload,
    #[error("snapshot payload must be an object, got {0}")]
    NotAnObject(&'static str),
    #[error("snapshot has an invalid player id: {0}")]
    PlayerId(#[from] PlayerIdError),
}

impl From<&PlayerSnapshot> for SnapshotPayload {
    fn from(snapshot: &PlayerSnapshot) -> Self {
        let mut snapshot = snapshot.clone();
        snapshot.normalize();

        Self {
            player_id: snapshot.player_id.to_string(),
            level: snapshot.level,
            experience: snapshot.experience,
            money: snapshot.money,
            prestige_points: snapshot.prestige_points,
            inventory: snapshot
                .inventory
                .iter()
                .map(|(kind, amount)| (kind.to_string(), *amount))
                .collect(),
            equipped_tool: snapshot.equipped_tool.as_ref().map(ToolPayload::from),
            crafting_progress: CraftingProgressPayload::from(&snapshot.crafting_progress),
            saved_at: Some(snapshot.saved_at),
        }
    }
}

impl From<&ToolSnapshot> for ToolPayload {
    fn from(tool: &ToolSnapshot) -> Self {
        Self {
            tool_kind: tool.tool_kind.to_string(),
            material: tool.material.clone(),
            level: tool.level,
            quality: tool.quality,
            bonuses: tool
                .bonuses
                .iter()
                .map(|b| BonusPayload {
                    name: b.name.to_string(),
                    magnitude: b.magnitude,
                })
                .collect(),
        }
    }
}

impl From<&CraftingProgressSnapshot> for CraftingProgressPayload {
    fn from(progress: &CraftingProgressSnapshot) -> Self {
        Self {
            unlocked_recipe_names: progress.unlocked_recipe_names.iter().cloned().collect(),
            craft_count_by_recipe: progress.craft_count_by_recipe.clone(),
            material_use_count: progress.material_use_count.clone(),
            last_activity: Some(progress.last_activity),
        }
    }
}

impl TryFrom<SnapshotPayload> for PlayerSnapshot {
    type Error = CodecError;

    fn try_from(payload: SnapshotPayload) -> Result<Self, Self::Error> {
        let player_id: PlayerId = payload.player_id.parse()?;

        let mut inventory = BTreeMap::new();
        for (name, amount) in payload.inventory {
            match name.parse::<ResourceKind>() {
                Ok(kind) if amount.is_finite() && amount > 0.0 => {
                    inventory.insert(kind, amount);
                }
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!(%player_id, resource = %name, "dropping unknown resource kind");
                }
            }
        }

        let equipped_tool = payload
            .equipped_tool
            .and_then(|tool| decode_tool(&player_id, tool));

        let mut snapshot = PlayerSnapshot {
            level: payload.level,
            experience: payload.experience,
            money: payload.money,
            prestige_points: payload.prestige_points,
            inventory,
            equipped_tool,
            crafting_progress: payload.crafting_progress.into(),
            saved_at: payload.saved_at.unwrap_or_default(),
            player_id,
        };
        snapshot.normalize();
        Ok(snapshot)
    }
}

fn decode_tool(player_id: &PlayerId, tool: ToolPayload) -> Option<ToolSnapshot> {
    let Ok(tool_kind) = tool.tool_kind.parse::<ToolKind>() else {
        tracing::warn!(%player_id, tool_kind = %tool.tool_kind, "dropping tool of unknown kind");
        return None;
    };

    let bonuses = tool
        .bonuses
        .into_iter()
        .filter_map(|bonus| match bonus.name.parse::<BonusKind>() {
            Ok(name) => Some(ToolBonus {
                name,
                magnitude: bonus.magnitude,
            }),
            Err(_) => {
                tracing::warn!(%player_id, bonus = %bonus.name, "dropping unknown tool bonus");
                None
            }
        })
        .collect();

    Some(ToolSnapshot {
        tool_kind,
        material: tool.material,
        level: tool.level,
        quality: clamp_quality(tool.quality),
        bonuses,
    })
}

impl From<CraftingProgressPayload> for CraftingProgressSnapshot {
    fn from(payload: CraftingProgressPayload) -> Self {
        Self {
            unlocked_recipe_names: payload
                .unlocked_recipe_names
                .into_iter()
                .collect::<BTreeSet<_>>(),
            craft_count_by_recipe: payload.craft_count_by_recipe,
            material_use_count: payload.material_use_count,
            last_activity: payload.last_activity.unwrap_or_default(),
        }
    }
}

/// Encode a snapshot into its JSON payload.
pub fn encode_snapshot(snapshot: &PlayerSnapshot) -> Result<serde_json::Value, CodecError> {
    Ok(serde_json::to_value(SnapshotPayload::from(snapshot))?)
}

/// Decode a snapshot from a JSON payload.
///
/// The payload may be the object itself or a string containing it, since
/// some backends store the record as an opaque blob.
pub fn decode_snapshot(payload: serde_json::Value) -> Result<PlayerSnapshot, CodecError> {
    let payload = match payload {
        serde_json::Value::Null => return Err(CodecError::MissingPayload),
        serde_json::Value::String(text) => serde_json::from_str(&text)?,
        value @ serde_json::Value::Object(_) => value,
        other => return Err(CodecError::NotAnObject(json_kind(&other))),
    };
    if !payload.is_object() {
        return Err(CodecError::NotAnObject(json_kind(&payload)));
    }

    let payload: SnapshotPayload = serde_json::from_value(payload)?;
    payload.try_into()
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Build the fire-and-forget save envelope for `snapshot`.
pub fn save_envelope(snapshot: &PlayerSnapshot) -> Result<OutboundEnvelope, CodecError> {
    OutboundEnvelope::encode(&ClientMessage::Save {
        payload: encode_snapshot(snapshot)?,
    })
}

/// Build the load request envelope for `identity`.
pub fn load_envelope(
    identity: &PlayerId,
    request_id: &str,
) -> Result<OutboundEnvelope, CodecError> {
    OutboundEnvelope::encode(&ClientMessage::Load {
        steam_id: identity.to_string(),
        request_id: request_id.to_string(),
    })
}

/// Parse one inbound frame.
pub fn decode_server_message(text: &str) -> Result<ServerMessage, CodecError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_snapshot() -> PlayerSnapshot {
        let mut snapshot = PlayerSnapshot::new("76561198000000001".parse().unwrap())
            .with_resource(ResourceKind::Wood, 20.0)
            .with_resource(ResourceKind::Crystal, 0.125)
            .with_tool(
                ToolSnapshot::new(ToolKind::Pickaxe, "steel", 4, 0.83)
                    .with_bonus(BonusKind::YieldBoost, 0.15)
                    .with_bonus(BonusKind::RareFind, 0.05),
            );
        snapshot.level = 12;
        snapshot.experience = 1530.5;
        snapshot.money = 99.75;
        snapshot.prestige_points = 2;
        snapshot.saved_at = "2026-03-01T12:30:00.123456789Z".parse().unwrap();
        let at = "2026-03-01T12:00:00Z".parse().unwrap();
        snapshot.crafting_progress.record_craft("plank", at);
        snapshot.crafting_progress.record_craft("torch", at);
        snapshot.crafting_progress.record_material_use("wood", 7);
        snapshot
    }

    #[test]
    fn snapshot_survives_the_wire() {
        let snapshot = full_snapshot();
        let text = serde_json::to_string(&encode_snapshot(&snapshot).unwrap()).unwrap();
        let back = decode_snapshot(serde_json::from_str(&text).unwrap()).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn encode_uses_documented_field_names() {
        let value = encode_snapshot(&full_snapshot()).unwrap();
        assert_eq!(value["playerId"], "76561198000000001");
        assert_eq!(value["inventory"]["Wood"], 20.0);
        assert_eq!(value["equippedTool"]["toolKind"], "Pickaxe");
        assert_eq!(value["equippedTool"]["bonuses"][0]["name"], "YieldBoost");
        assert_eq!(
            value["craftingProgress"]["unlockedRecipeNames"],
            json!(["plank", "torch"])
        );
        assert_eq!(value["craftingProgress"]["craftCountByRecipe"]["plank"], 1);
        assert_eq!(value["craftingProgress"]["materialUseCount"]["wood"], 7);
    }

    #[test]
    fn encode_prunes_empty_inventory_entries() {
        let snapshot = PlayerSnapshot::new("1".parse().unwrap())
            .with_resource(ResourceKind::Wood, 20.0)
            .with_resource(ResourceKind::Stone, 0.0)
            .with_resource(ResourceKind::Iron, -1.0);
        let value = encode_snapshot(&snapshot).unwrap();
        assert_eq!(value["inventory"], json!({ "Wood": 20.0 }));
    }

    #[test]
    fn unknown_bonus_is_dropped() {
        let payload = json!({
            "playerId": "123",
            "level": 3,
            "inventory": { "Wood": 5.0 },
            "equippedTool": {
                "toolKind": "Axe",
                "material": "bronze",
                "level": 2,
                "quality": 0.5,
                "bonuses": [
                    { "name": "Mythical", "magnitude": 9.0 },
                    { "name": "GatherSpeed", "magnitude": 0.2 }
                ]
            }
        });
        let snapshot = decode_snapshot(payload).unwrap();
        let tool = snapshot.equipped_tool.as_ref().unwrap();
        assert_eq!(tool.tool_kind, ToolKind::Axe);
        assert_eq!(tool.material, "bronze");
        assert_eq!(tool.level, 2);
        assert_eq!(tool.quality, 0.5);
        assert_eq!(
            tool.bonuses,
            vec![ToolBonus {
                name: BonusKind::GatherSpeed,
                magnitude: 0.2
            }]
        );
        assert_eq!(snapshot.level, 3);
        assert_eq!(snapshot.amount(ResourceKind::Wood), 5.0);
    }

    #[test]
    fn unknown_resource_and_tool_kind_are_dropped() {
        let payload = json!({
            "playerId": "123",
            "inventory": { "wood": 1.5, "Unobtainium": 4.0 },
            "equippedTool": { "toolKind": "Chainsaw", "quality": 1.0 }
        });
        let snapshot = decode_snapshot(payload).unwrap();
        assert_eq!(snapshot.inventory.len(), 1);
        assert_eq!(snapshot.amount(ResourceKind::Wood), 1.5);
        assert!(snapshot.equipped_tool.is_none());
    }

    #[test]
    fn decode_ignores_unknown_fields_and_clamps_quality() {
        let payload = json!({
            "playerId": "123",
            "seasonPass": { "tier": 4 },
            "equippedTool": { "toolKind": "sickle", "quality": 3.5, "glow": true }
        });
        let snapshot = decode_snapshot(payload).unwrap();
        let tool = snapshot.equipped_tool.unwrap();
        assert_eq!(tool.tool_kind, ToolKind::Sickle);
        assert_eq!(tool.quality, 1.0);
    }

    #[test]
    fn decode_tolerates_nulls_and_out_of_range_numbers() {
        let payload = json!({
            "playerId": "123",
            "level": null,
            "experience": null,
            "money": 12.5,
            "prestigePoints": -3,
            "inventory": { "Wood": 2.0, "Stone": null, "Iron": "lots" },
            "equippedTool": {
                "toolKind": "Axe",
                "material": null,
                "level": -1,
                "quality": null,
                "bonuses": null
            },
            "craftingProgress": {
                "unlockedRecipeNames": null,
                "craftCountByRecipe": { "plank": 3, "torch": -1, "rope": 1.5 },
                "materialUseCount": null
            }
        });
        let snapshot = decode_snapshot(payload).unwrap();

        assert_eq!(snapshot.level, 0);
        assert_eq!(snapshot.experience, 0.0);
        assert_eq!(snapshot.money, 12.5);
        assert_eq!(snapshot.prestige_points, 0);
        assert_eq!(snapshot.inventory.len(), 1);
        assert_eq!(snapshot.amount(ResourceKind::Wood), 2.0);

        let tool = snapshot.equipped_tool.unwrap();
        assert_eq!(tool.tool_kind, ToolKind::Axe);
        assert_eq!(tool.material, "");
        assert_eq!(tool.level, 0);
        assert_eq!(tool.quality, 0.0);
        assert!(tool.bonuses.is_empty());

        let progress = snapshot.crafting_progress;
        assert!(progress.unlocked_recipe_names.is_empty());
        assert_eq!(
            progress.craft_count_by_recipe,
            BTreeMap::from([("plank".to_string(), 3)])
        );
        assert!(progress.material_use_count.is_empty());
    }

    #[test]
    fn decode_accepts_string_payload() {
        let inner = serde_json::to_string(&encode_snapshot(&full_snapshot()).unwrap()).unwrap();
        let snapshot = decode_snapshot(serde_json::Value::String(inner)).unwrap();
        assert_eq!(snapshot, full_snapshot());
    }

    #[test]
    fn decode_rejects_bad_payloads() {
        assert!(matches!(
            decode_snapshot(serde_json::Value::Null),
            Err(CodecError::MissingPayload)
        ));
        assert!(matches!(
            decode_snapshot(json!([1, 2])),
            Err(CodecError::NotAnObject("an array"))
        ));
        assert!(matches!(
            decode_snapshot(json!({ "playerId": "0" })),
            Err(CodecError::PlayerId(_))
        ));
    }

    #[test]
    fn load_envelope_carries_identity() {
        let envelope = load_envelope(&"123".parse().unwrap(), "req-1").unwrap();
        let value: serde_json::Value = serde_json::from_str(envelope.payload()).unwrap();
        assert_eq!(
            value,
            json!({ "action": "load", "steamId": "123", "requestId": "req-1" })
        );
    }

    #[test]
    fn malformed_frame_is_an_error() {
        assert!(matches!(
            decode_server_message("{not json"),
            Err(CodecError::Json(_))
        ));
    }
}

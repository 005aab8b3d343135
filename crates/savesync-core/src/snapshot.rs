//! Player save-state as handed over by the gameplay layer.
//!
//! These types carry no behavior beyond normalization. The gameplay layer
//! decides what the numbers mean; this crate only moves them.

use crate::PlayerId;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Gatherable resource types.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum ResourceKind {
    Wood,
    Stone,
    Fiber,
    Clay,
    Copper,
    Iron,
    Gold,
    Crystal,
}

/// Tool types a player can equip.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum ToolKind {
    Axe,
    Pickaxe,
    Sickle,
    Shovel,
    Hammer,
}

/// Bonus effects rolled onto a tool.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum BonusKind {
    YieldBoost,
    GatherSpeed,
    Durability,
    DoubleDrop,
    RareFind,
    CritHarvest,
}

/// A bonus and its strength.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolBonus {
    pub name: BonusKind,
    pub magnitude: f64,
}

/// The equipped tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSnapshot {
    pub tool_kind: ToolKind,
    pub material: String,
    pub level: u32,
    /// Always within `[0, 1]` after [`ToolSnapshot::normalize`].
    pub quality: f64,
    pub bonuses: Vec<ToolBonus>,
}

impl ToolSnapshot {
    pub fn new(tool_kind: ToolKind, material: impl Into<String>, level: u32, quality: f64) -> Self {
        let mut tool = Self {
            tool_kind,
            material: material.into(),
            level,
            quality,
            bonuses: Vec::new(),
        };
        tool.normalize();
        tool
    }

    pub fn with_bonus(mut self, name: BonusKind, magnitude: f64) -> Self {
        self.bonuses.push(ToolBonus { name, magnitude });
        self
    }

    /// Clamp `quality` into `[0, 1]`. NaN becomes 0.
    pub fn normalize(&mut self) {
        self.quality = clamp_quality(self.quality);
    }
}

pub(crate) fn clamp_quality(quality: f64) -> f64 {
    if quality.is_nan() {
        0.0
    } else {
        quality.clamp(0.0, 1.0)
    }
}

/// Crafting unlocks and usage counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CraftingProgressSnapshot {
    pub unlocked_recipe_names: BTreeSet<String>,
    pub craft_count_by_recipe: BTreeMap<String, u32>,
    pub material_use_count: BTreeMap<String, u32>,
    pub last_activity: DateTime<Utc>,
}

impl CraftingProgressSnapshot {
    /// Record one craft of `recipe`, unlocking it if needed.
    pub fn record_craft(&mut self, recipe: &str, at: DateTime<Utc>) {
        self.unlocked_recipe_names.insert(recipe.to_string());
        *self
            .craft_count_by_recipe
            .entry(recipe.to_string())
            .or_default() += 1;
        self.last_activity = at;
    }

    /// Record `count` uses of `material`.
    pub fn record_material_use(&mut self, material: &str, count: u32) {
        let entry = self
            .material_use_count
            .entry(material.to_string())
            .or_default();
        *entry = entry.saturating_add(count);
    }
}

/// The complete save record of one player.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub player_id: PlayerId,
    pub level: u32,
    pub experience: f64,
    pub money: f64,
    pub prestige_points: u32,
    pub inventory: BTreeMap<ResourceKind, f64>,
    pub equipped_tool: Option<ToolSnapshot>,
    pub crafting_progress: CraftingProgressSnapshot,
    pub saved_at: DateTime<Utc>,
}

impl PlayerSnapshot {
    /// A fresh-start snapshot for `player_id`.
    pub fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            level: 1,
            experience: 0.0,
            money: 0.0,
            prestige_points: 0,
            inventory: BTreeMap::new(),
            equipped_tool: None,
            crafting_progress: CraftingProgressSnapshot::default(),
            saved_at: DateTime::<Utc>::default(),
        }
    }

    pub fn with_resource(mut self, kind: ResourceKind, amount: f64) -> Self {
        self.inventory.insert(kind, amount);
        self
    }

    pub fn with_tool(mut self, tool: ToolSnapshot) -> Self {
        self.equipped_tool = Some(tool);
        self
    }

    /// Amount of `kind` held, zero when absent.
    pub fn amount(&self, kind: ResourceKind) -> f64 {
        self.inventory.get(&kind).copied().unwrap_or(0.0)
    }

    /// Enforce the snapshot invariants in place.
    ///
    /// Inventory entries that are not finite and strictly positive are
    /// removed, tool quality is clamped, and non-finite stats become zero.
    pub fn normalize(&mut self) {
        self.inventory
            .retain(|_, amount| amount.is_finite() && *amount > 0.0);
        if let Some(tool) = &mut self.equipped_tool {
            tool.normalize();
        }
        if !self.experience.is_finite() {
            self.experience = 0.0;
        }
        if !self.money.is_finite() {
            self.money = 0.0;
        }
    }
}

/// Something in the gameplay layer that can describe itself as a snapshot.
pub trait SnapshotSource {
    fn snapshot(&self) -> PlayerSnapshot;
}

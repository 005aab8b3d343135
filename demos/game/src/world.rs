//! A tiny gathering game, just enough state to have something to save.

use chrono::Utc;
use savesync_core::{
    BonusKind, CraftingProgressSnapshot, PlayerId, PlayerSnapshot, ResourceKind, SnapshotSource,
    ToolKind, ToolSnapshot,
};
use std::collections::BTreeMap;

const PLANK_RECIPE: &str = "Plank";
const WOOD_PER_PLANK: f64 = 4.0;
const PLANK_PRICE: f64 = 2.5;
const EXPERIENCE_PER_LEVEL: f64 = 100.0;

/// A player in the world.
pub struct Player {
    pub id: PlayerId,
    pub level: u32,
    pub experience: f64,
    pub money: f64,
    pub prestige_points: u32,
    pub inventory: BTreeMap<ResourceKind, f64>,
    pub tool: Option<ToolSnapshot>,
    pub crafting: CraftingProgressSnapshot,
}

impl Player {
    /// A fresh character with a starter axe.
    pub fn new(id: PlayerId) -> Self {
        Self {
            id,
            level: 1,
            experience: 0.0,
            money: 0.0,
            prestige_points: 0,
            inventory: BTreeMap::new(),
            tool: Some(ToolSnapshot::new(ToolKind::Axe, "Stone", 1, 0.5)),
            crafting: CraftingProgressSnapshot::default(),
        }
    }

    pub fn from_snapshot(snapshot: PlayerSnapshot) -> Self {
        Self {
            id: snapshot.player_id,
            level: snapshot.level.max(1),
            experience: snapshot.experience,
            money: snapshot.money,
            prestige_points: snapshot.prestige_points,
            inventory: snapshot.inventory,
            tool: snapshot.equipped_tool,
            crafting: snapshot.crafting_progress,
        }
    }

    pub fn amount(&self, kind: ResourceKind) -> f64 {
        self.inventory.get(&kind).copied().unwrap_or(0.0)
    }

    /// What the equipped tool gathers, and how much per tick.
    fn gather_rate(&self) -> (ResourceKind, f64) {
        let Some(tool) = &self.tool else {
            return (ResourceKind::Fiber, 0.5);
        };
        let kind = match tool.tool_kind {
            ToolKind::Axe => ResourceKind::Wood,
            ToolKind::Pickaxe => ResourceKind::Stone,
            ToolKind::Sickle => ResourceKind::Fiber,
            ToolKind::Shovel => ResourceKind::Clay,
            ToolKind::Hammer => ResourceKind::Copper,
        };
        let boost: f64 = tool
            .bonuses
            .iter()
            .filter(|b| b.name == BonusKind::YieldBoost)
            .map(|b| b.magnitude)
            .sum();
        (kind, (0.5 + tool.quality) * (1.0 + boost))
    }

    fn gain_experience(&mut self, amount: f64) {
        self.experience += amount;
        while self.experience >= EXPERIENCE_PER_LEVEL {
            self.experience -= EXPERIENCE_PER_LEVEL;
            self.level += 1;
            tracing::info!(player_id = %self.id, level = self.level, "level up");
        }
    }

    fn craft_planks(&mut self) {
        let wood = self.amount(ResourceKind::Wood);
        if wood < WOOD_PER_PLANK {
            return;
        }
        self.inventory.insert(ResourceKind::Wood, wood - WOOD_PER_PLANK);
        self.money += PLANK_PRICE;
        self.crafting.record_craft(PLANK_RECIPE, Utc::now());
        self.crafting.record_material_use("Wood", WOOD_PER_PLANK as u32);
        self.gain_experience(10.0);
    }
}

impl SnapshotSource for Player {
    fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            player_id: self.id.clone(),
            level: self.level,
            experience: self.experience,
            money: self.money,
            prestige_points: self.prestige_points,
            inventory: self.inventory.clone(),
            equipped_tool: self.tool.clone(),
            crafting_progress: self.crafting.clone(),
            saved_at: Utc::now(),
        }
    }
}

/// World state.
pub struct World {
    pub tick: u64,
    pub player: Player,
}

impl World {
    pub fn new(player: Player) -> Self {
        Self { tick: 0, player }
    }

    /// Gather once, then turn spare wood into planks.
    pub fn tick(&mut self) {
        self.tick += 1;

        let (kind, amount) = self.player.gather_rate();
        *self.player.inventory.entry(kind).or_default() += amount;
        self.player.gain_experience(1.0);
        self.player.craft_planks();
    }
}

use crate::entities::equipment::Equipment;
use crate::entities::serial::Serial;
use crate::entities::skills::SkillSet;
use crate::entities::stats::{Pools, PrimaryStats};
use crate::world::position::Position;
use crate::world::region::RegionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MobileKind {
    Player,
    Npc,
    Creature,
}

impl MobileKind {
    pub fn code(self) -> u8 {
        match self {
            MobileKind::Player => 0,
            MobileKind::Npc => 1,
            MobileKind::Creature => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(MobileKind::Player),
            1 => Some(MobileKind::Npc),
            2 => Some(MobileKind::Creature),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorKind {
    None,
    Blacksmith,
    Provisioner,
    Fletcher,
}

impl VendorKind {
    pub fn code(self) -> u8 {
        match self {
            VendorKind::None => 0,
            VendorKind::Blacksmith => 1,
            VendorKind::Provisioner => 2,
            VendorKind::Fletcher => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(VendorKind::None),
            1 => Some(VendorKind::Blacksmith),
            2 => Some(VendorKind::Provisioner),
            3 => Some(VendorKind::Fletcher),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            VendorKind::None => "none",
            VendorKind::Blacksmith => "blacksmith",
            VendorKind::Provisioner => "provisioner",
            VendorKind::Fletcher => "fletcher",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerData {
    pub logged_in: bool,
    pub kills: u32,
    /// Bitmask of region ids this player may travel to.
    pub unlocked: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mobile {
    pub serial: Serial,
    pub name: String,
    pub kind: MobileKind,
    pub region: RegionId,
    pub position: Option<Position>,
    pub stats: PrimaryStats,
    pub pools: Pools,
    pub skills: SkillSet,
    pub equipment: Equipment,
    pub inventory: Vec<Serial>,
    /// Weak combat-target reference; `Serial::ZERO` when idle. A stale
    /// serial simply fails registry lookup.
    pub target: Serial,
    pub speed: u32,
    pub vision: u32,
    pub challenge_rating: u16,
    pub vendor: VendorKind,
    /// Spawner tag for creatures placed by a spawner; 0 otherwise.
    pub spawned_by: u32,
    pub player: Option<PlayerData>,
}

pub const DEFAULT_SPEED: u32 = 1;
pub const DEFAULT_VISION: u32 = 12;

impl Mobile {
    pub fn player(serial: Serial, name: &str, region: RegionId, position: Position, now: u64) -> Self {
        let stats = PrimaryStats::new(20, 20, 20);
        Self {
            serial,
            name: name.to_string(),
            kind: MobileKind::Player,
            region,
            position: Some(position),
            pools: Pools::full(&stats, now),
            stats,
            skills: SkillSet::default(),
            equipment: Equipment::default(),
            inventory: Vec::new(),
            target: Serial::ZERO,
            speed: DEFAULT_SPEED,
            vision: DEFAULT_VISION,
            challenge_rating: 0,
            vendor: VendorKind::None,
            spawned_by: 0,
            player: Some(PlayerData {
                logged_in: true,
                kills: 0,
                unlocked: region.0,
            }),
        }
    }

    pub fn npc(serial: Serial, name: &str, region: RegionId, position: Position, vendor: VendorKind, now: u64) -> Self {
        let stats = PrimaryStats::new(15, 15, 15);
        Self {
            serial,
            name: name.to_string(),
            kind: MobileKind::Npc,
            region,
            position: Some(position),
            pools: Pools::full(&stats, now),
            stats,
            skills: SkillSet::default(),
            equipment: Equipment::default(),
            inventory: Vec::new(),
            target: Serial::ZERO,
            speed: DEFAULT_SPEED,
            vision: DEFAULT_VISION,
            challenge_rating: 0,
            vendor,
            spawned_by: 0,
            player: None,
        }
    }

    pub fn creature(
        serial: Serial,
        name: &str,
        region: RegionId,
        position: Position,
        stats: PrimaryStats,
        challenge_rating: u16,
        now: u64,
    ) -> Self {
        Self {
            serial,
            name: name.to_string(),
            kind: MobileKind::Creature,
            region,
            position: Some(position),
            pools: Pools::full(&stats, now),
            stats,
            skills: SkillSet::default(),
            equipment: Equipment::default(),
            inventory: Vec::new(),
            target: Serial::ZERO,
            speed: DEFAULT_SPEED,
            vision: DEFAULT_VISION,
            challenge_rating,
            vendor: VendorKind::None,
            spawned_by: 0,
            player: None,
        }
    }

    pub fn is_player(&self) -> bool {
        matches!(self.kind, MobileKind::Player)
    }

    pub fn is_alive(&self) -> bool {
        !self.pools.is_dead()
    }

    pub fn is_logged_in(&self) -> bool {
        self.player.as_ref().map(|p| p.logged_in).unwrap_or(false)
    }

    pub fn set_logged_in(&mut self, logged_in: bool) {
        if let Some(player) = self.player.as_mut() {
            player.logged_in = logged_in;
        }
    }

    pub fn credit_kill(&mut self) {
        if let Some(player) = self.player.as_mut() {
            player.kills = player.kills.saturating_add(1);
        }
    }

    pub fn unlocked_regions(&self) -> u64 {
        self.player.as_ref().map(|p| p.unlocked).unwrap_or(0)
    }

    pub fn unlock_region(&mut self, region: RegionId) {
        if let Some(player) = self.player.as_mut() {
            player.unlocked |= region.0;
        }
    }

    pub fn has_unlocked(&self, region: RegionId) -> bool {
        self.unlocked_regions() & region.0 != 0
    }

    /// Folds passive regeneration into the pools before they are read.
    pub fn refresh_pools(&mut self, now: u64) {
        self.pools.fold_regen(&self.stats, now);
    }

    pub fn holds(&self, serial: Serial) -> bool {
        self.inventory.contains(&serial)
    }

    pub fn take_from_inventory(&mut self, serial: Serial) -> bool {
        let before = self.inventory.len();
        self.inventory.retain(|held| *held != serial);
        before != self.inventory.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::region::REGION_HAVEN;

    fn haven_player() -> Mobile {
        Mobile::player(Serial(1), "Aldous", REGION_HAVEN, Position::new(5, 5), 0)
    }

    #[test]
    fn player_starts_logged_in_with_home_unlocked() {
        let player = haven_player();
        assert!(player.is_logged_in());
        assert!(player.has_unlocked(REGION_HAVEN));
        assert_eq!(player.unlocked_regions(), REGION_HAVEN.0);
    }

    #[test]
    fn kill_credit_only_counts_for_players() {
        let mut player = haven_player();
        player.credit_kill();
        player.credit_kill();
        assert_eq!(player.player.as_ref().expect("player data").kills, 2);

        let mut wolf = Mobile::creature(
            Serial(2),
            "a moor wolf",
            REGION_HAVEN,
            Position::new(1, 1),
            PrimaryStats::new(12, 14, 4),
            3,
            0,
        );
        wolf.credit_kill();
        assert!(wolf.player.is_none());
    }

    #[test]
    fn inventory_take_removes_exactly_one_serial() {
        let mut player = haven_player();
        player.inventory.push(Serial(0x4000_0001));
        player.inventory.push(Serial(0x4000_0002));
        assert!(player.take_from_inventory(Serial(0x4000_0001)));
        assert!(!player.take_from_inventory(Serial(0x4000_0001)));
        assert!(player.holds(Serial(0x4000_0002)));
    }
}

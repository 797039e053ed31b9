use crate::combat::dice::Dice;
use crate::entities::mobile::Mobile;
use crate::entities::serial::Serial;
use crate::entities::stats::PrimaryStats;
use crate::world::position::Position;
use crate::world::region::RegionId;
use crate::world::registry::World;

pub const SPAWN_INTERVAL_TICKS: u64 = 30;
const PLACEMENT_ATTEMPTS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatureKind {
    MoorWolf,
    BogShambler,
    BarrowWight,
    FenLurker,
}

pub const ALL_CREATURE_KINDS: [CreatureKind; 4] = [
    CreatureKind::MoorWolf,
    CreatureKind::BogShambler,
    CreatureKind::BarrowWight,
    CreatureKind::FenLurker,
];

impl CreatureKind {
    pub fn mask(self) -> u32 {
        match self {
            CreatureKind::MoorWolf => 1,
            CreatureKind::BogShambler => 2,
            CreatureKind::BarrowWight => 4,
            CreatureKind::FenLurker => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CreatureKind::MoorWolf => "a moor wolf",
            CreatureKind::BogShambler => "a bog shambler",
            CreatureKind::BarrowWight => "a barrow wight",
            CreatureKind::FenLurker => "a fen lurker",
        }
    }

    pub fn stats(self) -> PrimaryStats {
        match self {
            CreatureKind::MoorWolf => PrimaryStats::new(18, 22, 4),
            CreatureKind::BogShambler => PrimaryStats::new(34, 8, 6),
            CreatureKind::BarrowWight => PrimaryStats::new(28, 14, 20),
            CreatureKind::FenLurker => PrimaryStats::new(46, 18, 12),
        }
    }

    pub fn challenge_rating(self) -> u16 {
        match self {
            CreatureKind::MoorWolf => 3,
            CreatureKind::BogShambler => 6,
            CreatureKind::BarrowWight => 12,
            CreatureKind::FenLurker => 21,
        }
    }
}

/// Populates one region with creatures up to a capacity. Each tick prunes
/// the tracked set and, while under capacity, adds at most two creatures
/// placed near the home point.
#[derive(Debug)]
pub struct Spawner {
    pub tag: u32,
    pub region: RegionId,
    pub home: Position,
    pub radius: u32,
    pub capacity: usize,
    pub eligible: u32,
    tracked: Vec<Serial>,
}

impl Spawner {
    pub fn new(
        tag: u32,
        region: RegionId,
        home: Position,
        radius: u32,
        capacity: usize,
        eligible: u32,
    ) -> Self {
        Self {
            tag,
            region,
            home,
            radius,
            capacity,
            eligible,
            tracked: Vec::new(),
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    fn eligible_kinds(&self) -> Vec<CreatureKind> {
        ALL_CREATURE_KINDS
            .iter()
            .copied()
            .filter(|kind| self.eligible & kind.mask() != 0)
            .collect()
    }

    /// Rejection-sampled offset from home, clamped to the region bounds
    /// if no in-bounds point turns up.
    fn place(&self, world: &World, dice: &mut Dice) -> Position {
        let region = world.region(self.region);
        let span = self.radius * 2 + 1;
        let mut candidate = self.home;
        for _ in 0..PLACEMENT_ATTEMPTS {
            let dx = dice.roll_range(0, span - 1) as i32 - self.radius as i32;
            let dy = dice.roll_range(0, span - 1) as i32 - self.radius as i32;
            candidate = Position::new(self.home.x + dx, self.home.y + dy);
            if let Some(region) = region.as_ref() {
                if region.contains(candidate) {
                    return candidate;
                }
            }
        }
        match region.as_ref().and_then(|r| r.bounds) {
            Some(bounds) => candidate.clamped(bounds.width, bounds.height),
            None => self.home,
        }
    }

    /// One spawner firing. Returns the serials added this tick.
    pub fn tick(&mut self, world: &World, dice: &mut Dice, now: u64) -> Vec<Serial> {
        self.tracked.retain(|serial| {
            world
                .mobile(*serial)
                .map(|mobile| mobile.is_alive())
                .unwrap_or(false)
        });

        let kinds = self.eligible_kinds();
        if kinds.is_empty() || self.tracked.len() >= self.capacity {
            return Vec::new();
        }

        let room = self.capacity - self.tracked.len();
        let batch = (dice.roll_range(0, 2) as usize).min(room);
        let mut added = Vec::new();
        for _ in 0..batch {
            let kind = kinds[dice.roll_range(0, kinds.len() as u32 - 1) as usize];
            let position = self.place(world, dice);
            let serial = world.allocate_mobile_serial();
            let mut creature = Mobile::creature(
                serial,
                kind.name(),
                self.region,
                position,
                kind.stats(),
                kind.challenge_rating(),
                now,
            );
            creature.spawned_by = self.tag;
            world.insert_mobile(creature);
            self.tracked.push(serial);
            added.push(serial);
        }
        added
    }
}

/// The static spawner set registered at boot.
pub fn bootstrap_spawners() -> Vec<Spawner> {
    use crate::world::region::{REGION_BARROW, REGION_BLACKFEN, REGION_MOORS};

    vec![
        Spawner::new(
            1,
            REGION_MOORS,
            Position::new(64, 64),
            20,
            6,
            CreatureKind::MoorWolf.mask() | CreatureKind::BogShambler.mask(),
        ),
        Spawner::new(
            2,
            REGION_BARROW,
            Position::new(24, 24),
            12,
            4,
            CreatureKind::BarrowWight.mask(),
        ),
        Spawner::new(
            3,
            REGION_BLACKFEN,
            Position::new(48, 48),
            30,
            5,
            CreatureKind::FenLurker.mask() | CreatureKind::BogShambler.mask(),
        ),
    ]
}

use serde::{Deserialize, Serialize};

use crate::world::position::Position;

/// Region identifiers are single-bit values so that a set of regions packs
/// into one `u64` mask (connections, unlocked travel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionId(pub u64);

impl RegionId {
    pub fn is_valid(self) -> bool {
        self.0 != 0 && self.0.is_power_of_two()
    }
}

impl std::fmt::Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "region:{:#x}", self.0)
    }
}

pub const REGION_FLAG_TOWN: u8 = 0x01;
pub const REGION_FLAG_DUNGEON: u8 = 0x02;
pub const REGION_FLAG_OPEN_WORLD: u8 = 0x04;
pub const REGION_FLAG_PVP: u8 = 0x08;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapBounds {
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub id: RegionId,
    pub name: String,
    pub flags: u8,
    /// Directed connectivity; a two-way link appears in both masks.
    pub connections: u64,
    pub navigable: bool,
    pub bounds: Option<MapBounds>,
    pub start: Option<Position>,
}

impl Region {
    pub fn new(id: RegionId, name: &str, flags: u8, connections: u64) -> Self {
        Self {
            id,
            name: name.to_string(),
            flags,
            connections,
            navigable: false,
            bounds: None,
            start: None,
        }
    }

    pub fn navigable(mut self, width: i32, height: i32, start: Position) -> Self {
        self.navigable = true;
        self.bounds = Some(MapBounds { width, height });
        self.start = Some(start.clamped(width, height));
        self
    }

    pub fn connects_to(&self, other: RegionId) -> bool {
        self.connections & other.0 != 0
    }

    pub fn is_town(&self) -> bool {
        self.flags & REGION_FLAG_TOWN != 0
    }

    pub fn is_pvp(&self) -> bool {
        self.flags & REGION_FLAG_PVP != 0
    }

    pub fn contains(&self, position: Position) -> bool {
        match self.bounds {
            Some(bounds) => {
                position.x >= 0
                    && position.y >= 0
                    && position.x < bounds.width
                    && position.y < bounds.height
            }
            None => false,
        }
    }
}

pub const REGION_HAVEN: RegionId = RegionId(0x01);
pub const REGION_MOORS: RegionId = RegionId(0x02);
pub const REGION_BARROW: RegionId = RegionId(0x04);
pub const REGION_BLACKFEN: RegionId = RegionId(0x08);

/// The static world graph. Connections are declared per side; Haven and
/// the Moors mirror each other, the Barrow can only be left the way it is
/// entered, and the Blackfen is a one-way drop with no way back.
pub fn bootstrap_regions() -> Vec<Region> {
    vec![
        Region::new(
            REGION_HAVEN,
            "Haven",
            REGION_FLAG_TOWN,
            REGION_MOORS.0,
        )
        .navigable(64, 64, Position::new(32, 32)),
        Region::new(
            REGION_MOORS,
            "the Greymoors",
            REGION_FLAG_OPEN_WORLD,
            REGION_HAVEN.0 | REGION_BARROW.0 | REGION_BLACKFEN.0,
        )
        .navigable(128, 128, Position::new(8, 64)),
        Region::new(
            REGION_BARROW,
            "the Sunken Barrow",
            REGION_FLAG_DUNGEON,
            REGION_MOORS.0,
        )
        .navigable(48, 48, Position::new(24, 4)),
        Region::new(
            REGION_BLACKFEN,
            "the Blackfen",
            REGION_FLAG_OPEN_WORLD | REGION_FLAG_PVP,
            0,
        )
        .navigable(96, 96, Position::new(48, 48)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_ids_are_single_bits() {
        for region in bootstrap_regions() {
            assert!(region.id.is_valid(), "{} has a multi-bit id", region.name);
        }
        assert!(!RegionId(0).is_valid());
        assert!(!RegionId(0x03).is_valid());
    }

    #[test]
    fn connectivity_is_directed() {
        let regions = bootstrap_regions();
        let moors = regions.iter().find(|r| r.id == REGION_MOORS).expect("moors");
        let blackfen = regions.iter().find(|r| r.id == REGION_BLACKFEN).expect("blackfen");
        assert!(moors.connects_to(REGION_BLACKFEN));
        assert!(!blackfen.connects_to(REGION_MOORS));
    }

    #[test]
    fn navigable_regions_carry_bounds_and_start() {
        for region in bootstrap_regions() {
            assert!(region.navigable);
            let start = region.start.expect("start");
            assert!(region.contains(start));
        }
    }

    #[test]
    fn contains_rejects_out_of_bounds() {
        let region = Region::new(REGION_HAVEN, "test", 0, 0).navigable(10, 10, Position::new(5, 5));
        assert!(region.contains(Position::new(0, 0)));
        assert!(region.contains(Position::new(9, 9)));
        assert!(!region.contains(Position::new(10, 5)));
        assert!(!region.contains(Position::new(-1, 5)));
    }
}

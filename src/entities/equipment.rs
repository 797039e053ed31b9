use serde::{Deserialize, Serialize};

use crate::entities::item::{Hands, Item, ItemKind, WearSlot};
use crate::entities::serial::Serial;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EquipSlot {
    Head,
    Chest,
    Legs,
    Feet,
    MainHand,
    OffHand,
}

pub const EQUIP_SLOTS: [EquipSlot; 6] = [
    EquipSlot::Head,
    EquipSlot::Chest,
    EquipSlot::Legs,
    EquipSlot::Feet,
    EquipSlot::MainHand,
    EquipSlot::OffHand,
];

impl EquipSlot {
    fn index(self) -> usize {
        match self {
            EquipSlot::Head => 0,
            EquipSlot::Chest => 1,
            EquipSlot::Legs => 2,
            EquipSlot::Feet => 3,
            EquipSlot::MainHand => 4,
            EquipSlot::OffHand => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EquipSlot::Head => "head",
            EquipSlot::Chest => "chest",
            EquipSlot::Legs => "legs",
            EquipSlot::Feet => "feet",
            EquipSlot::MainHand => "main hand",
            EquipSlot::OffHand => "off hand",
        }
    }

    pub fn for_wear(slot: WearSlot) -> EquipSlot {
        match slot {
            WearSlot::Head => EquipSlot::Head,
            WearSlot::Chest => EquipSlot::Chest,
            WearSlot::Legs => EquipSlot::Legs,
            WearSlot::Feet => EquipSlot::Feet,
            WearSlot::OffHand => EquipSlot::OffHand,
        }
    }
}

/// One item serial per slot. A two-handed weapon in the main hand claims
/// the off hand as well; the conflicting combination can never be stored.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Equipment {
    slots: [Option<Serial>; 6],
    two_handed: bool,
}

impl Equipment {
    pub fn get(&self, slot: EquipSlot) -> Option<Serial> {
        self.slots[slot.index()]
    }

    pub fn main_hand(&self) -> Option<Serial> {
        self.get(EquipSlot::MainHand)
    }

    pub fn is_two_handed(&self) -> bool {
        self.two_handed
    }

    pub fn equip(&mut self, slot: EquipSlot, item: &Item) -> Result<(), EquipError> {
        if !item.is_equippable() {
            return Err(EquipError::NotEquippable);
        }
        if item.is_broken() {
            return Err(EquipError::Broken);
        }
        match (&item.kind, slot) {
            (ItemKind::Weapon(weapon), EquipSlot::MainHand) => {
                if weapon.hands == Hands::Two && self.get(EquipSlot::OffHand).is_some() {
                    return Err(EquipError::HandsFull);
                }
                if self.get(EquipSlot::MainHand).is_some() {
                    return Err(EquipError::Occupied(slot));
                }
                self.slots[slot.index()] = Some(item.serial);
                self.two_handed = weapon.hands == Hands::Two;
                Ok(())
            }
            (ItemKind::Weapon(_), _) => Err(EquipError::WrongSlot),
            (ItemKind::Armor(armor), slot) if EquipSlot::for_wear(armor.slot) == slot => {
                if slot == EquipSlot::OffHand && self.two_handed {
                    return Err(EquipError::HandsFull);
                }
                if self.get(slot).is_some() {
                    return Err(EquipError::Occupied(slot));
                }
                self.slots[slot.index()] = Some(item.serial);
                Ok(())
            }
            (ItemKind::Armor(_), _) => Err(EquipError::WrongSlot),
            (ItemKind::Consumable(_), _) => Err(EquipError::NotEquippable),
        }
    }

    pub fn unequip(&mut self, slot: EquipSlot) -> Option<Serial> {
        let removed = self.slots[slot.index()].take();
        if slot == EquipSlot::MainHand && removed.is_some() {
            self.two_handed = false;
        }
        removed
    }

    /// Drops the serial wherever it sits, returning the slot it held.
    pub fn unequip_serial(&mut self, serial: Serial) -> Option<EquipSlot> {
        for slot in EQUIP_SLOTS {
            if self.slots[slot.index()] == Some(serial) {
                self.unequip(slot);
                return Some(slot);
            }
        }
        None
    }

    pub fn worn(&self) -> impl Iterator<Item = (EquipSlot, Serial)> + '_ {
        EQUIP_SLOTS
            .iter()
            .filter_map(|slot| self.slots[slot.index()].map(|serial| (*slot, serial)))
    }

    pub fn armor_slots(&self) -> Vec<(EquipSlot, Serial)> {
        self.worn()
            .filter(|(slot, _)| *slot != EquipSlot::MainHand)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquipError {
    NotEquippable,
    Broken,
    WrongSlot,
    HandsFull,
    Occupied(EquipSlot),
}

impl std::fmt::Display for EquipError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EquipError::NotEquippable => write!(f, "that cannot be equipped"),
            EquipError::Broken => write!(f, "that is broken"),
            EquipError::WrongSlot => write!(f, "that does not fit there"),
            EquipError::HandsFull => write!(f, "both hands are already in use"),
            EquipError::Occupied(slot) => write!(f, "the {} slot is occupied", slot.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::damage::DamageMask;
    use crate::entities::item::{Armor, DamageDice, Durability, Weapon, WearSlot};
    use crate::entities::skills::Skill;

    fn sword(serial: u32, hands: Hands) -> Item {
        Item::weapon(
            Serial(serial),
            "test blade",
            Weapon {
                dice: DamageDice::new(1, 8),
                range: 1,
                skill: Skill::Swords,
                damage: DamageMask::NONE,
                durability: Durability::new(50),
                hands,
                uses_arrows: false,
            },
        )
    }

    fn shield(serial: u32) -> Item {
        Item::armor(
            Serial(serial),
            "test shield",
            Armor {
                rating: 2,
                resists: DamageMask::NONE,
                durability: Durability::new(40),
                slot: WearSlot::OffHand,
            },
        )
    }

    #[test]
    fn two_handed_claims_both_hands() {
        let mut equipment = Equipment::default();
        equipment
            .equip(EquipSlot::MainHand, &sword(0x4000_0001, Hands::Two))
            .expect("equip greatsword");
        assert!(equipment.is_two_handed());

        let err = equipment
            .equip(EquipSlot::OffHand, &shield(0x4000_0002))
            .expect_err("shield must not fit");
        assert_eq!(err, EquipError::HandsFull);
    }

    #[test]
    fn shield_blocks_two_handed() {
        let mut equipment = Equipment::default();
        equipment
            .equip(EquipSlot::OffHand, &shield(0x4000_0002))
            .expect("equip shield");
        let err = equipment
            .equip(EquipSlot::MainHand, &sword(0x4000_0001, Hands::Two))
            .expect_err("greatsword must not fit");
        assert_eq!(err, EquipError::HandsFull);

        // A one-hander is fine alongside the shield.
        equipment
            .equip(EquipSlot::MainHand, &sword(0x4000_0003, Hands::One))
            .expect("equip one-hander");
    }

    #[test]
    fn unequip_main_hand_releases_off_hand() {
        let mut equipment = Equipment::default();
        equipment
            .equip(EquipSlot::MainHand, &sword(0x4000_0001, Hands::Two))
            .expect("equip greatsword");
        assert_eq!(equipment.unequip(EquipSlot::MainHand), Some(Serial(0x4000_0001)));
        assert!(!equipment.is_two_handed());
        equipment
            .equip(EquipSlot::OffHand, &shield(0x4000_0002))
            .expect("equip shield after release");
    }

    #[test]
    fn broken_items_refuse_to_equip() {
        let mut equipment = Equipment::default();
        let mut blade = sword(0x4000_0001, Hands::One);
        if let ItemKind::Weapon(weapon) = &mut blade.kind {
            weapon.durability.wear(100);
        }
        assert_eq!(
            equipment.equip(EquipSlot::MainHand, &blade),
            Err(EquipError::Broken)
        );
    }

    #[test]
    fn unequip_serial_finds_the_slot() {
        let mut equipment = Equipment::default();
        equipment
            .equip(EquipSlot::OffHand, &shield(0x4000_0002))
            .expect("equip shield");
        assert_eq!(
            equipment.unequip_serial(Serial(0x4000_0002)),
            Some(EquipSlot::OffHand)
        );
        assert_eq!(equipment.unequip_serial(Serial(0x4000_0002)), None);
    }
}

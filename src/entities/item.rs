use serde::{Deserialize, Serialize};

use crate::combat::damage::DamageMask;
use crate::entities::serial::Serial;
use crate::entities::skills::Skill;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub serial: Serial,
    pub name: String,
    /// Weak back-reference; `Serial::ZERO` means unowned. Resolved through
    /// the registry on demand and reconciled lazily on inventory reads.
    pub owner: Serial,
    pub kind: ItemKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ItemKind {
    Consumable(Consumable),
    Weapon(Weapon),
    Armor(Armor),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumableClass {
    HealPotion,
    Ration,
    Coin,
    Arrow,
    Trinket,
}

impl ConsumableClass {
    pub fn code(self) -> u8 {
        match self {
            ConsumableClass::HealPotion => 0,
            ConsumableClass::Ration => 1,
            ConsumableClass::Coin => 2,
            ConsumableClass::Arrow => 3,
            ConsumableClass::Trinket => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ConsumableClass::HealPotion),
            1 => Some(ConsumableClass::Ration),
            2 => Some(ConsumableClass::Coin),
            3 => Some(ConsumableClass::Arrow),
            4 => Some(ConsumableClass::Trinket),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consumable {
    pub class: ConsumableClass,
    pub amount: u32,
    pub cap: u32,
}

impl Consumable {
    pub fn new(class: ConsumableClass, amount: u32, cap: u32) -> Self {
        let cap = cap.max(1);
        Self {
            class,
            amount: amount.min(cap),
            cap,
        }
    }

    /// Moves as much of `other` into this stack as the cap allows and
    /// returns the amount actually absorbed.
    pub fn absorb(&mut self, other: &mut Consumable) -> u32 {
        if self.class != other.class {
            return 0;
        }
        let room = self.cap.saturating_sub(self.amount);
        let taken = room.min(other.amount);
        self.amount += taken;
        other.amount -= taken;
        taken
    }

    pub fn take(&mut self, count: u32) -> u32 {
        let taken = count.min(self.amount);
        self.amount -= taken;
        taken
    }

    pub fn is_empty(&self) -> bool {
        self.amount == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hands {
    One,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageDice {
    pub count: u32,
    pub sides: u32,
}

impl DamageDice {
    pub fn new(count: u32, sides: u32) -> Self {
        Self {
            count: count.max(1),
            sides: sides.max(1),
        }
    }

    /// Parses the usual "1d6" notation.
    pub fn parse(text: &str) -> Option<Self> {
        let (count, sides) = text.trim().split_once(['d', 'D'])?;
        let count: u32 = count.trim().parse().ok()?;
        let sides: u32 = sides.trim().parse().ok()?;
        if count == 0 || sides == 0 {
            return None;
        }
        Some(Self { count, sides })
    }

    pub fn min_roll(self) -> u32 {
        self.count
    }

    pub fn max_roll(self) -> u32 {
        self.count * self.sides
    }
}

impl std::fmt::Display for DamageDice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}d{}", self.count, self.sides)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Durability {
    pub current: u32,
    pub max: u32,
}

impl Durability {
    pub fn new(max: u32) -> Self {
        Self { current: max, max }
    }

    pub fn wear(&mut self, amount: u32) {
        self.current = self.current.saturating_sub(amount);
    }

    pub fn is_broken(&self) -> bool {
        self.current == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weapon {
    pub dice: DamageDice,
    pub range: u32,
    pub skill: Skill,
    pub damage: DamageMask,
    pub durability: Durability,
    pub hands: Hands,
    pub uses_arrows: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WearSlot {
    Head,
    Chest,
    Legs,
    Feet,
    OffHand,
}

impl WearSlot {
    pub fn code(self) -> u8 {
        match self {
            WearSlot::Head => 0,
            WearSlot::Chest => 1,
            WearSlot::Legs => 2,
            WearSlot::Feet => 3,
            WearSlot::OffHand => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(WearSlot::Head),
            1 => Some(WearSlot::Chest),
            2 => Some(WearSlot::Legs),
            3 => Some(WearSlot::Feet),
            4 => Some(WearSlot::OffHand),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Armor {
    pub rating: u32,
    pub resists: DamageMask,
    pub durability: Durability,
    pub slot: WearSlot,
}

impl Item {
    pub fn consumable(serial: Serial, name: &str, consumable: Consumable) -> Self {
        Self {
            serial,
            name: name.to_string(),
            owner: Serial::ZERO,
            kind: ItemKind::Consumable(consumable),
        }
    }

    pub fn weapon(serial: Serial, name: &str, weapon: Weapon) -> Self {
        Self {
            serial,
            name: name.to_string(),
            owner: Serial::ZERO,
            kind: ItemKind::Weapon(weapon),
        }
    }

    pub fn armor(serial: Serial, name: &str, armor: Armor) -> Self {
        Self {
            serial,
            name: name.to_string(),
            owner: Serial::ZERO,
            kind: ItemKind::Armor(armor),
        }
    }

    pub fn is_equippable(&self) -> bool {
        matches!(self.kind, ItemKind::Weapon(_) | ItemKind::Armor(_))
    }

    pub fn is_lootable(&self) -> bool {
        matches!(self.kind, ItemKind::Consumable(_))
    }

    pub fn as_consumable(&self) -> Option<&Consumable> {
        match &self.kind {
            ItemKind::Consumable(consumable) => Some(consumable),
            _ => None,
        }
    }

    pub fn as_consumable_mut(&mut self) -> Option<&mut Consumable> {
        match &mut self.kind {
            ItemKind::Consumable(consumable) => Some(consumable),
            _ => None,
        }
    }

    pub fn as_weapon(&self) -> Option<&Weapon> {
        match &self.kind {
            ItemKind::Weapon(weapon) => Some(weapon),
            _ => None,
        }
    }

    pub fn as_weapon_mut(&mut self) -> Option<&mut Weapon> {
        match &mut self.kind {
            ItemKind::Weapon(weapon) => Some(weapon),
            _ => None,
        }
    }

    pub fn as_armor(&self) -> Option<&Armor> {
        match &self.kind {
            ItemKind::Armor(armor) => Some(armor),
            _ => None,
        }
    }

    pub fn as_armor_mut(&mut self) -> Option<&mut Armor> {
        match &mut self.kind {
            ItemKind::Armor(armor) => Some(armor),
            _ => None,
        }
    }

    pub fn is_broken(&self) -> bool {
        match &self.kind {
            ItemKind::Weapon(weapon) => weapon.durability.is_broken(),
            ItemKind::Armor(armor) => armor.durability.is_broken(),
            ItemKind::Consumable(_) => false,
        }
    }
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{RwLock, RwLockWriteGuard};

use crate::entities::item::Item;
use crate::entities::mobile::Mobile;
use crate::entities::serial::{
    Serial, ITEM_SERIAL_FIRST, ITEM_SERIAL_LAST, MOBILE_SERIAL_FIRST, MOBILE_SERIAL_LAST,
};
use crate::world::region::{bootstrap_regions, Region, RegionId};
use crate::world::session::Session;

/// The single source of truth for live entities. Four independent maps,
/// each behind its own lock; constructed explicitly and shared by `Arc`.
#[derive(Debug)]
pub struct World {
    mobiles: RwLock<HashMap<Serial, Mobile>>,
    items: RwLock<HashMap<Serial, Item>>,
    regions: RwLock<HashMap<RegionId, Region>>,
    sessions: RwLock<HashMap<u64, Session>>,
    next_mobile: AtomicU32,
    next_item: AtomicU32,
}

impl World {
    pub fn empty() -> Self {
        Self {
            mobiles: RwLock::new(HashMap::new()),
            items: RwLock::new(HashMap::new()),
            regions: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            next_mobile: AtomicU32::new(MOBILE_SERIAL_FIRST),
            next_item: AtomicU32::new(ITEM_SERIAL_FIRST),
        }
    }

    pub fn bootstrap() -> Self {
        let world = Self::empty();
        {
            let mut regions = world.regions.write().expect("region map lock");
            for region in bootstrap_regions() {
                regions.insert(region.id, region);
            }
        }
        world
    }

    /// Stands up the town roster: one vendor of each trade in Haven.
    pub fn populate_npcs(&self, now: u64) {
        use crate::entities::mobile::VendorKind;
        use crate::world::position::Position;
        use crate::world::region::REGION_HAVEN;

        for (name, vendor, position) in [
            ("Maeve the smith", VendorKind::Blacksmith, Position::new(30, 32)),
            ("Osric the provisioner", VendorKind::Provisioner, Position::new(34, 32)),
            ("Wren the fletcher", VendorKind::Fletcher, Position::new(32, 30)),
        ] {
            let serial = self.allocate_mobile_serial();
            self.insert_mobile(Mobile::npc(serial, name, REGION_HAVEN, position, vendor, now));
        }
    }

    // Serial allocation scans upward, skipping values already bound, so a
    // serial is never reissued while its referent lives.

    pub fn allocate_mobile_serial(&self) -> Serial {
        let mobiles = self.mobiles.read().expect("mobile map lock");
        loop {
            let candidate = self.next_mobile.fetch_add(1, Ordering::Relaxed);
            if candidate > MOBILE_SERIAL_LAST {
                panic!("mobile serial range exhausted");
            }
            let serial = Serial(candidate);
            if !mobiles.contains_key(&serial) {
                return serial;
            }
        }
    }

    pub fn allocate_item_serial(&self) -> Serial {
        let items = self.items.read().expect("item map lock");
        loop {
            let candidate = self.next_item.fetch_add(1, Ordering::Relaxed);
            if candidate > ITEM_SERIAL_LAST {
                panic!("item serial range exhausted");
            }
            let serial = Serial(candidate);
            if !items.contains_key(&serial) {
                return serial;
            }
        }
    }

    // Mobiles

    pub fn insert_mobile(&self, mobile: Mobile) {
        self.mobiles
            .write()
            .expect("mobile map lock")
            .insert(mobile.serial, mobile);
    }

    pub fn remove_mobile(&self, serial: Serial) -> Option<Mobile> {
        self.mobiles.write().expect("mobile map lock").remove(&serial)
    }

    pub fn mobile(&self, serial: Serial) -> Option<Mobile> {
        self.mobiles
            .read()
            .expect("mobile map lock")
            .get(&serial)
            .cloned()
    }

    pub fn with_mobile_mut<T>(
        &self,
        serial: Serial,
        f: impl FnOnce(&mut Mobile) -> T,
    ) -> Option<T> {
        self.mobiles
            .write()
            .expect("mobile map lock")
            .get_mut(&serial)
            .map(f)
    }

    pub(crate) fn mobiles_mut(&self) -> RwLockWriteGuard<'_, HashMap<Serial, Mobile>> {
        self.mobiles.write().expect("mobile map lock")
    }

    pub fn mobile_count(&self) -> usize {
        self.mobiles.read().expect("mobile map lock").len()
    }

    /// Derived by scanning; the occupant set is never stored on the region.
    pub fn mobiles_in_region(&self, region: RegionId) -> Vec<Mobile> {
        self.mobiles
            .read()
            .expect("mobile map lock")
            .values()
            .filter(|mobile| mobile.region == region)
            .cloned()
            .collect()
    }

    /// Mobiles in `observer`'s region within its vision radius, observer
    /// excluded.
    pub fn mobiles_near(&self, observer: Serial) -> Vec<Mobile> {
        let mobiles = self.mobiles.read().expect("mobile map lock");
        let Some(viewer) = mobiles.get(&observer) else {
            return Vec::new();
        };
        let Some(here) = viewer.position else {
            return Vec::new();
        };
        mobiles
            .values()
            .filter(|other| other.serial != observer && other.region == viewer.region)
            .filter(|other| match other.position {
                Some(there) => here.distance(there) <= viewer.vision,
                None => false,
            })
            .cloned()
            .collect()
    }

    // Items

    pub fn insert_item(&self, item: Item) {
        self.items
            .write()
            .expect("item map lock")
            .insert(item.serial, item);
    }

    pub fn remove_item(&self, serial: Serial) -> Option<Item> {
        self.items.write().expect("item map lock").remove(&serial)
    }

    pub fn item(&self, serial: Serial) -> Option<Item> {
        self.items
            .read()
            .expect("item map lock")
            .get(&serial)
            .cloned()
    }

    pub fn with_item_mut<T>(&self, serial: Serial, f: impl FnOnce(&mut Item) -> T) -> Option<T> {
        self.items
            .write()
            .expect("item map lock")
            .get_mut(&serial)
            .map(f)
    }

    pub(crate) fn items_mut(&self) -> RwLockWriteGuard<'_, HashMap<Serial, Item>> {
        self.items.write().expect("item map lock")
    }

    pub fn item_count(&self) -> usize {
        self.items.read().expect("item map lock").len()
    }

    /// Drops inventory entries whose item is gone or owned by someone
    /// else, and drops ownerless items from the item map. Runs on every
    /// inventory read rather than on mutation.
    pub fn reconcile_inventory(&self, owner: Serial) -> Vec<Serial> {
        let mut items = self.items.write().expect("item map lock");
        let mut mobiles = self.mobiles.write().expect("mobile map lock");
        let Some(mobile) = mobiles.get_mut(&owner) else {
            return Vec::new();
        };
        mobile.inventory.retain(|serial| {
            items
                .get(serial)
                .map(|item| item.owner == owner)
                .unwrap_or(false)
        });
        let held = mobile.inventory.clone();
        items.retain(|serial, item| {
            if !item.owner.is_assigned() {
                return false;
            }
            if item.owner == owner {
                return held.contains(serial);
            }
            true
        });
        held
    }

    /// Hands an item over, rewriting the owner back-reference. Consumable
    /// stacks merge into an existing stack of the same class where one
    /// exists; a fully merged source stack is removed from the registry.
    pub fn transfer_item(&self, item_serial: Serial, from: Serial, to: Serial) -> bool {
        let mut items = self.items.write().expect("item map lock");
        let mut mobiles = self.mobiles.write().expect("mobile map lock");
        let Some(item) = items.get(&item_serial) else {
            return false;
        };
        if item.owner != from {
            return false;
        }
        if !mobiles.contains_key(&to) {
            return false;
        }

        if let Some(giver) = mobiles.get_mut(&from) {
            giver.inventory.retain(|held| *held != item_serial);
            giver.equipment.unequip_serial(item_serial);
        }

        let class = item.as_consumable().map(|c| c.class);
        if let Some(class) = class {
            let receiver_stack = mobiles.get(&to).and_then(|receiver| {
                receiver.inventory.iter().copied().find(|held| {
                    items
                        .get(held)
                        .and_then(|existing| existing.as_consumable())
                        .map(|existing| existing.class == class)
                        .unwrap_or(false)
                })
            });
            if let Some(stack_serial) = receiver_stack {
                let mut source = match items.remove(&item_serial) {
                    Some(source) => source,
                    None => return false,
                };
                let source_stack = source.as_consumable_mut().expect("consumable source");
                if let Some(stack) = items
                    .get_mut(&stack_serial)
                    .and_then(|item| item.as_consumable_mut())
                {
                    stack.absorb(source_stack);
                }
                if !source_stack.is_empty() {
                    // Cap reached on the receiving stack; the remainder
                    // stays a separate item in the receiver's pack.
                    source.owner = to;
                    items.insert(item_serial, source);
                    if let Some(receiver) = mobiles.get_mut(&to) {
                        receiver.inventory.push(item_serial);
                    }
                }
                return true;
            }
        }

        if let Some(item) = items.get_mut(&item_serial) {
            item.owner = to;
        }
        if let Some(receiver) = mobiles.get_mut(&to) {
            receiver.inventory.push(item_serial);
        }
        true
    }

    /// Creates an item already bound to an owner's inventory.
    pub fn give_item(&self, owner: Serial, mut item: Item) -> Option<Serial> {
        let serial = item.serial;
        item.owner = owner;
        {
            let mut mobiles = self.mobiles.write().expect("mobile map lock");
            let mobile = mobiles.get_mut(&owner)?;
            mobile.inventory.push(serial);
        }
        self.insert_item(item);
        Some(serial)
    }

    // Regions

    pub fn region(&self, id: RegionId) -> Option<Region> {
        self.regions.read().expect("region map lock").get(&id).cloned()
    }

    pub fn region_ids(&self) -> Vec<RegionId> {
        let mut ids: Vec<RegionId> = self
            .regions
            .read()
            .expect("region map lock")
            .keys()
            .copied()
            .collect();
        ids.sort_by_key(|id| id.0);
        ids
    }

    /// Direct bitmask containment against the static graph.
    pub fn regions_connected(&self, from: RegionId, to: RegionId) -> bool {
        self.regions
            .read()
            .expect("region map lock")
            .get(&from)
            .map(|region| region.connects_to(to))
            .unwrap_or(false)
    }

    // Sessions

    pub fn bind_session(&self, session: Session) {
        self.sessions
            .write()
            .expect("session map lock")
            .insert(session.player_id, session);
    }

    pub fn session(&self, player_id: u64) -> Option<Session> {
        self.sessions
            .read()
            .expect("session map lock")
            .get(&player_id)
            .cloned()
    }

    pub fn session_ids(&self) -> Vec<u64> {
        self.sessions
            .read()
            .expect("session map lock")
            .keys()
            .copied()
            .collect()
    }

    pub fn drop_session(&self, player_id: u64) -> Option<Session> {
        self.sessions
            .write()
            .expect("session map lock")
            .remove(&player_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::item::{Consumable, ConsumableClass, Item};
    use crate::entities::mobile::Mobile;
    use crate::entities::serial::SerialKind;
    use crate::world::position::Position;
    use crate::world::region::{REGION_HAVEN, REGION_MOORS};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn spawn_player(world: &World, name: &str) -> Serial {
        let serial = world.allocate_mobile_serial();
        world.insert_mobile(Mobile::player(
            serial,
            name,
            REGION_HAVEN,
            Position::new(5, 5),
            0,
        ));
        serial
    }

    #[test]
    fn serial_allocation_skips_bound_values() {
        let world = World::bootstrap();
        let first = spawn_player(&world, "first");
        // Force the cursor back so the next allocation lands on a bound
        // serial and has to skip past it.
        world.next_mobile.store(first.0, Ordering::Relaxed);
        let second = world.allocate_mobile_serial();
        assert_ne!(first, second);
        assert_eq!(second.0, first.0 + 1);
    }

    #[test]
    fn concurrent_allocation_yields_distinct_serials() {
        let world = Arc::new(World::bootstrap());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let world = Arc::clone(&world);
            handles.push(std::thread::spawn(move || {
                let mut taken = Vec::new();
                for _ in 0..64 {
                    let serial = world.allocate_mobile_serial();
                    taken.push(serial);
                }
                taken
            }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            for serial in handle.join().expect("worker") {
                assert_eq!(serial.kind(), Some(SerialKind::Mobile));
                assert!(seen.insert(serial), "serial {serial} issued twice");
            }
        }
        assert_eq!(seen.len(), 8 * 64);
    }

    #[test]
    fn mobiles_near_filters_region_and_radius() {
        let world = World::bootstrap();
        let observer = spawn_player(&world, "observer");
        let near = world.allocate_mobile_serial();
        world.insert_mobile(Mobile::player(near, "near", REGION_HAVEN, Position::new(8, 5), 0));
        let far = world.allocate_mobile_serial();
        world.insert_mobile(Mobile::player(far, "far", REGION_HAVEN, Position::new(40, 40), 0));
        let elsewhere = world.allocate_mobile_serial();
        world.insert_mobile(Mobile::player(
            elsewhere,
            "elsewhere",
            REGION_MOORS,
            Position::new(5, 5),
            0,
        ));

        let seen: Vec<Serial> = world
            .mobiles_near(observer)
            .into_iter()
            .map(|m| m.serial)
            .collect();
        assert_eq!(seen, vec![near]);
    }

    #[test]
    fn reconcile_drops_stale_and_ownerless_entries() {
        let world = World::bootstrap();
        let owner = spawn_player(&world, "owner");

        let kept = world
            .give_item(
                owner,
                Item::consumable(
                    world.allocate_item_serial(),
                    "a gold coin",
                    Consumable::new(ConsumableClass::Coin, 10, 1000),
                ),
            )
            .expect("give coin");

        // A serial in the inventory with no backing item.
        let phantom = world.allocate_item_serial();
        world
            .with_mobile_mut(owner, |mobile| mobile.inventory.push(phantom))
            .expect("owner exists");

        // An item in the registry with no owner at all.
        let stray = world.allocate_item_serial();
        world.insert_item(Item::consumable(
            stray,
            "a dropped ration",
            Consumable::new(ConsumableClass::Ration, 1, 10),
        ));

        let held = world.reconcile_inventory(owner);
        assert_eq!(held, vec![kept]);
        assert!(world.item(stray).is_none());
        assert!(world.item(kept).is_some());
    }

    #[test]
    fn transfer_merges_consumable_stacks() {
        let world = World::bootstrap();
        let loser = spawn_player(&world, "loser");
        let winner = spawn_player(&world, "winner");

        world
            .give_item(
                winner,
                Item::consumable(
                    world.allocate_item_serial(),
                    "a gold coin",
                    Consumable::new(ConsumableClass::Coin, 30, 1000),
                ),
            )
            .expect("winner coins");
        let loot = world
            .give_item(
                loser,
                Item::consumable(
                    world.allocate_item_serial(),
                    "a gold coin",
                    Consumable::new(ConsumableClass::Coin, 12, 1000),
                ),
            )
            .expect("loser coins");

        assert!(world.transfer_item(loot, loser, winner));
        // Fully merged: the source stack is gone from the registry.
        assert!(world.item(loot).is_none());
        let held = world.reconcile_inventory(winner);
        assert_eq!(held.len(), 1);
        let stack = world.item(held[0]).expect("merged stack");
        assert_eq!(stack.as_consumable().expect("consumable").amount, 42);
    }

    #[test]
    fn transfer_rewrites_owner_for_non_consumables() {
        use crate::combat::damage::DamageMask;
        use crate::entities::item::{DamageDice, Durability, Hands, Weapon};
        use crate::entities::skills::Skill;

        let world = World::bootstrap();
        let from = spawn_player(&world, "from");
        let to = spawn_player(&world, "to");
        let blade = world
            .give_item(
                from,
                Item::weapon(
                    world.allocate_item_serial(),
                    "a worn blade",
                    Weapon {
                        dice: DamageDice::new(1, 6),
                        range: 1,
                        skill: Skill::Swords,
                        damage: DamageMask::NONE,
                        durability: Durability::new(20),
                        hands: Hands::One,
                        uses_arrows: false,
                    },
                ),
            )
            .expect("give blade");

        assert!(world.transfer_item(blade, from, to));
        assert_eq!(world.item(blade).expect("blade").owner, to);
        assert!(!world.mobile(from).expect("from").holds(blade));
        assert!(world.mobile(to).expect("to").holds(blade));
    }
}

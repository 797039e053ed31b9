use crate::combat::damage::{DamageKind, DamageMask};
use crate::combat::dice::Dice;
use crate::combat::engine::resolve_engagement;
use crate::entities::equipment::EquipSlot;
use crate::entities::item::{
    Armor, Consumable, ConsumableClass, DamageDice, Durability, Hands, Item, ItemKind, Weapon,
    WearSlot,
};
use crate::entities::mobile::{Mobile, MobileKind, VendorKind};
use crate::entities::serial::Serial;
use crate::entities::skills::{Skill, ALL_SKILLS};
use crate::net::message::{
    InfoReason, Message, MessageKind, MobileTag, Refusal, RegionDescriptor, SessionSnapshot, Stage,
};
use crate::persistence::store::{PlayerSave, SaveStore};
use crate::telemetry::logging;
use crate::world::position::{Direction, ALL_DIRECTIONS};
use crate::world::region::{RegionId, REGION_FLAG_PVP, REGION_HAVEN};
use crate::world::registry::World;

/// Why a request produced no normal reply. Protocol faults map to an
/// Error message; domain faults map to a typed Refused message and leave
/// the world unmutated.
#[derive(Debug, PartialEq, Eq)]
pub enum Fault {
    Protocol(String),
    Domain(Refusal, String),
}

fn protocol(text: impl Into<String>) -> Fault {
    Fault::Protocol(text.into())
}

fn refused(reason: Refusal, text: impl Into<String>) -> Fault {
    Fault::Domain(reason, text.into())
}

/// Routes one decoded message to its handler and wraps the outcome in a
/// reply carrying the incremented stage.
pub fn dispatch(
    world: &World,
    store: &SaveStore,
    message: &Message,
    dice: &mut Dice,
    now: u64,
) -> Message {
    let reply_stage = message.stage.next();
    let result = route(world, store, message, dice, now);
    let kind = match result {
        Ok(kind) => kind,
        Err(Fault::Protocol(text)) => {
            logging::log_error(&format!("protocol fault for {}: {}", message.player_id, text));
            MessageKind::Error { text }
        }
        Err(Fault::Domain(reason, text)) => MessageKind::Refused { reason, text },
    };
    Message::new(message.player_id, reply_stage, kind)
}

fn route(
    world: &World,
    store: &SaveStore,
    message: &Message,
    dice: &mut Dice,
    now: u64,
) -> Result<MessageKind, Fault> {
    if let MessageKind::Authenticate { player_id, name } = &message.kind {
        return authenticate(world, store, *player_id, name, now);
    }
    if message.player_id == 0 {
        return Err(protocol("a player identifier is required before anything else"));
    }

    let actor = session_mobile(world, message.player_id)?;
    match &message.kind {
        MessageKind::Authenticate { .. } => unreachable!("handled above"),
        MessageKind::GetInfo { reason } => get_info(world, &actor, *reason, now),
        MessageKind::Combat { targets } => {
            combat(world, &actor, message.stage, targets, dice, now)
        }
        MessageKind::Move {
            direction,
            destination,
        } => travel(world, &actor, message.stage, *direction, *destination),
        MessageKind::Resurrect => resurrect(world, &actor, now),
        MessageKind::UseItem { item } => use_item(world, &actor, message.stage, *item, now),
        MessageKind::UseVendor {
            vendor,
            ware,
            confirm,
        } => use_vendor(world, &actor, message.stage, *vendor, *ware, *confirm),
        MessageKind::Ok { .. }
        | MessageKind::Error { .. }
        | MessageKind::Refused { .. }
        | MessageKind::AccountClientState { .. } => {
            Err(protocol("that message kind is only sent by the server"))
        }
        MessageKind::Kill { .. } => Err(protocol("kill is handled by the connection loop")),
    }
}

fn session_mobile(world: &World, player_id: u64) -> Result<Mobile, Fault> {
    let session = world
        .session(player_id)
        .ok_or_else(|| protocol(format!("unknown player identifier {player_id}")))?;
    let mobile = world
        .mobile(session.mobile)
        .ok_or_else(|| refused(Refusal::UnknownMobile, "your body is nowhere to be found"))?;
    if !mobile.is_logged_in() {
        return Err(refused(Refusal::NotLoggedIn, "you are not logged in"));
    }
    Ok(mobile)
}

// Authentication

fn authenticate(
    world: &World,
    store: &SaveStore,
    player_id: u64,
    name: &str,
    now: u64,
) -> Result<MessageKind, Fault> {
    if player_id == 0 {
        return Err(protocol("a player identifier of zero is not valid"));
    }

    let serial = if let Some(session) = world.session(player_id) {
        let known = world
            .with_mobile_mut(session.mobile, |mobile| {
                mobile.set_logged_in(true);
                mobile.serial
            });
        match known {
            Some(serial) => serial,
            None => spawn_player(world, store, player_id, name, now)?,
        }
    } else {
        spawn_player(world, store, player_id, name, now)?
    };

    let mobile = world
        .mobile(serial)
        .ok_or_else(|| refused(Refusal::UnknownMobile, "your body is nowhere to be found"))?;
    let region = world.region(mobile.region).unwrap_or_else(|| {
        // A save can point at a region that no longer exists; the
        // snapshot then describes the starting town instead.
        world.region(REGION_HAVEN).expect("haven exists")
    });
    world.bind_session(crate::world::session::Session::new(
        player_id,
        serial,
        mobile.unlocked_regions(),
    ));
    logging::log_game(&format!("player {player_id} authenticated as {}", mobile.name));

    Ok(MessageKind::AccountClientState {
        snapshot: SessionSnapshot {
            player_id,
            mobile: MobileTag {
                kind: mobile.kind,
                serial: mobile.serial,
                name: mobile.name.clone(),
            },
            region: RegionDescriptor {
                id: region.id,
                connections: region.connections,
                navigable: region.navigable,
            },
            unlocked: mobile.unlocked_regions(),
        },
    })
}

fn spawn_player(
    world: &World,
    store: &SaveStore,
    player_id: u64,
    name: &str,
    now: u64,
) -> Result<Serial, Fault> {
    let serial = world.allocate_mobile_serial();
    let blob = store
        .load_blob(player_id)
        .map_err(|err| protocol(format!("save load failed: {err}")))?;
    let mobile = match blob {
        Some(blob) => {
            let save = PlayerSave::from_blob(&blob)
                .map_err(|err| protocol(format!("save parse failed: {err}")))?;
            let mut restored = save.to_mobile(serial, now);
            if world.region(restored.region).is_none() {
                // Save points into a region that no longer exists.
                relocate_to(world, &mut restored, REGION_HAVEN);
            }
            world.insert_mobile(restored);
            save.restore_items(world, serial);
            return Ok(serial);
        }
        None => {
            let region = world
                .region(REGION_HAVEN)
                .ok_or_else(|| refused(Refusal::UnknownRegion, "the world has no starting town"))?;
            let start = region.start.unwrap_or(crate::world::position::Position::new(0, 0));
            let mut fresh = Mobile::player(serial, name, REGION_HAVEN, start, now);
            outfit_new_player(world, &mut fresh);
            fresh
        }
    };
    world.insert_mobile(mobile);
    Ok(serial)
}

fn relocate_to(world: &World, mobile: &mut Mobile, region_id: RegionId) {
    if let Some(region) = world.region(region_id) {
        mobile.region = region.id;
        mobile.position = region.start;
    }
}

/// Every new character starts with a blade and a few coins.
fn outfit_new_player(world: &World, mobile: &mut Mobile) {
    let blade = Item {
        serial: world.allocate_item_serial(),
        name: "a rusty shortsword".to_string(),
        owner: mobile.serial,
        kind: ItemKind::Weapon(Weapon {
            dice: DamageDice::new(1, 6),
            range: 1,
            skill: Skill::Swords,
            damage: DamageMask::of(&[DamageKind::Physical]),
            durability: Durability::new(40),
            hands: Hands::One,
            uses_arrows: false,
        }),
    };
    let coins = Item {
        serial: world.allocate_item_serial(),
        name: "a pouch of gold".to_string(),
        owner: mobile.serial,
        kind: ItemKind::Consumable(Consumable::new(ConsumableClass::Coin, 50, 10_000)),
    };
    mobile.inventory.push(blade.serial);
    mobile.inventory.push(coins.serial);
    world.insert_item(blade);
    world.insert_item(coins);
}

// Information requests

fn get_info(
    world: &World,
    actor: &Mobile,
    reason: InfoReason,
    now: u64,
) -> Result<MessageKind, Fault> {
    let text = match reason {
        InfoReason::Paperdoll => {
            let mut mobile = actor.clone();
            mobile.refresh_pools(now);
            world.with_mobile_mut(actor.serial, |stored| stored.refresh_pools(now));
            let mut lines = vec![
                format!("{}", mobile.name),
                format!(
                    "strength {} / dexterity {} / intelligence {}",
                    mobile.stats.strength(),
                    mobile.stats.dexterity(),
                    mobile.stats.intelligence()
                ),
                format!(
                    "hits {} / stamina {} / mana {}",
                    mobile.pools.hits(),
                    mobile.pools.stamina(),
                    mobile.pools.mana()
                ),
            ];
            for skill in ALL_SKILLS {
                lines.push(format!("{}: {:.1}", skill.name(), mobile.skills.get(skill)));
            }
            if let Some(data) = mobile.player.as_ref() {
                lines.push(format!("kills: {}", data.kills));
            }
            lines.join("\n")
        }
        InfoReason::Location => {
            let region_name = world
                .region(actor.region)
                .map(|region| region.name)
                .unwrap_or_else(|| "an unknown place".to_string());
            match actor.position {
                Some(position) => {
                    format!("{} at ({}, {})", region_name, position.x, position.y)
                }
                None => region_name,
            }
        }
        InfoReason::Equipment => {
            let lines: Vec<String> = actor
                .equipment
                .worn()
                .filter_map(|(slot, serial)| {
                    world
                        .item(serial)
                        .map(|item| format!("{}: {}", slot.name(), item.name))
                })
                .collect();
            if lines.is_empty() {
                "nothing is equipped".to_string()
            } else {
                lines.join("\n")
            }
        }
        InfoReason::Items => {
            let held = world.reconcile_inventory(actor.serial);
            let lines: Vec<String> = held
                .iter()
                .filter_map(|serial| world.item(*serial))
                .map(|item| match item.as_consumable() {
                    Some(consumable) => format!("{} x{} [{}]", item.name, consumable.amount, item.serial),
                    None => format!("{} [{}]", item.name, item.serial),
                })
                .collect();
            if lines.is_empty() {
                "your pack is empty".to_string()
            } else {
                lines.join("\n")
            }
        }
        InfoReason::Vendors => {
            let lines: Vec<String> = world
                .mobiles_in_region(actor.region)
                .into_iter()
                .filter(|mobile| mobile.vendor != VendorKind::None)
                .map(|mobile| format!("{} ({})", mobile.name, mobile.vendor.name()))
                .collect();
            if lines.is_empty() {
                "nobody here is selling anything".to_string()
            } else {
                lines.join("\n")
            }
        }
        InfoReason::Npcs => {
            let lines: Vec<String> = world
                .mobiles_in_region(actor.region)
                .into_iter()
                .filter(|mobile| mobile.kind != MobileKind::Player)
                .map(|mobile| format!("{} [{}]", mobile.name, mobile.serial))
                .collect();
            if lines.is_empty() {
                "you are alone here".to_string()
            } else {
                lines.join("\n")
            }
        }
    };
    Ok(MessageKind::Ok { text })
}

// Combat

fn attackable(world: &World, actor: &Mobile, candidate: &Mobile) -> bool {
    if !candidate.is_alive() {
        return false;
    }
    match candidate.kind {
        MobileKind::Player => {
            let pvp = world
                .region(actor.region)
                .map(|region| region.flags & REGION_FLAG_PVP != 0)
                .unwrap_or(false);
            pvp && candidate.is_logged_in()
        }
        MobileKind::Npc | MobileKind::Creature => true,
    }
}

fn combat(
    world: &World,
    actor: &Mobile,
    stage: Stage,
    targets: &[Serial],
    dice: &mut Dice,
    now: u64,
) -> Result<MessageKind, Fault> {
    if !actor.is_alive() {
        return Err(refused(Refusal::DeadMobile, "the dead cannot fight"));
    }

    if stage == Stage::One {
        let candidates: Vec<Serial> = world
            .mobiles_near(actor.serial)
            .into_iter()
            .filter(|candidate| attackable(world, actor, candidate))
            .map(|candidate| candidate.serial)
            .collect();
        return Ok(MessageKind::Combat {
            targets: candidates,
        });
    }

    if targets.is_empty() {
        return Err(protocol("no targets chosen"));
    }

    // Full validation before any mutation.
    let self_attack = targets.len() == 1 && targets[0] == actor.serial;
    if !self_attack {
        let position = actor
            .position
            .ok_or_else(|| refused(Refusal::OutOfRange, "you are nowhere"))?;
        for serial in targets {
            let target = world
                .mobile(*serial)
                .ok_or_else(|| refused(Refusal::TargetGone, "your quarry is gone"))?;
            if !target.is_alive() {
                return Err(refused(Refusal::TargetGone, "your quarry is already dead"));
            }
            if target.region != actor.region {
                return Err(refused(Refusal::TargetGone, "your quarry has departed"));
            }
            if target.is_player() && !target.is_logged_in() {
                return Err(refused(Refusal::TargetGone, "your quarry has departed"));
            }
            if !attackable(world, actor, &target) {
                return Err(refused(
                    Refusal::RegionLocked,
                    "fighting other players is not permitted here",
                ));
            }
            let there = target
                .position
                .ok_or_else(|| refused(Refusal::TargetGone, "your quarry is gone"))?;
            if position.distance(there) > actor.vision {
                return Err(refused(Refusal::OutOfRange, "your quarry is out of sight"));
            }
        }
    }

    let log = resolve_engagement(world, actor.serial, targets, dice, now);
    for line in &log {
        logging::log_combat(line);
    }
    Ok(MessageKind::Ok {
        text: log.join("\n"),
    })
}

// Travel

fn travel(
    world: &World,
    actor: &Mobile,
    stage: Stage,
    direction: Option<Direction>,
    destination: Option<RegionId>,
) -> Result<MessageKind, Fault> {
    if !actor.is_alive() {
        return Err(refused(Refusal::DeadMobile, "the dead cannot walk"));
    }
    let region = world
        .region(actor.region)
        .ok_or_else(|| refused(Refusal::UnknownRegion, "you are somewhere unmapped"))?;

    if stage == Stage::One {
        let mut lines = Vec::new();
        if region.navigable {
            let directions: Vec<&str> = ALL_DIRECTIONS
                .iter()
                .map(|direction| direction.name())
                .collect();
            lines.push(format!("you may walk: {}", directions.join(", ")));
        }
        for id in world.region_ids() {
            if region.connects_to(id) {
                let name = world
                    .region(id)
                    .map(|connected| connected.name)
                    .unwrap_or_else(|| id.to_string());
                let locked = if travel_locked(world, actor, id) {
                    " (locked)"
                } else {
                    ""
                };
                lines.push(format!("you may travel to: {}{} [{:#x}]", name, locked, id.0));
            }
        }
        if lines.is_empty() {
            lines.push("there is no way out of here".to_string());
        }
        return Ok(MessageKind::Ok {
            text: lines.join("\n"),
        });
    }

    match (direction, destination) {
        (Some(direction), _) => {
            if !region.navigable {
                return Err(refused(Refusal::OutOfRange, "there is no ground to walk here"));
            }
            let here = actor
                .position
                .ok_or_else(|| refused(Refusal::OutOfRange, "you are nowhere"))?;
            let there = here.step(direction);
            if !region.contains(there) {
                return Err(refused(Refusal::OutOfRange, "you cannot walk any further"));
            }
            world.with_mobile_mut(actor.serial, |mobile| {
                mobile.position = Some(there);
            });
            Ok(MessageKind::Ok {
                text: format!("you walk {} to ({}, {})", direction.name(), there.x, there.y),
            })
        }
        (None, Some(destination)) => {
            let target = world
                .region(destination)
                .ok_or_else(|| refused(Refusal::UnknownRegion, "no such place exists"))?;
            if !region.connects_to(destination) {
                return Err(refused(
                    Refusal::NotConnected,
                    format!("{} does not border {}", region.name, target.name),
                ));
            }
            if travel_locked(world, actor, destination) {
                return Err(refused(
                    Refusal::RegionLocked,
                    format!("{} is closed to you", target.name),
                ));
            }
            world.with_mobile_mut(actor.serial, |mobile| {
                mobile.region = target.id;
                mobile.position = target.start;
                mobile.unlock_region(target.id);
            });
            logging::log_game(&format!("{} travels to {}", actor.name, target.name));
            Ok(MessageKind::Ok {
                text: format!("you arrive in {}", target.name),
            })
        }
        (None, None) => Err(protocol("a direction or a destination is required")),
    }
}

/// PvP grounds stay closed until something has unlocked them for this
/// player; everywhere else only connectivity gates travel.
fn travel_locked(world: &World, actor: &Mobile, destination: RegionId) -> bool {
    let pvp = world
        .region(destination)
        .map(|region| region.flags & REGION_FLAG_PVP != 0)
        .unwrap_or(false);
    pvp && actor.is_player() && !actor.has_unlocked(destination)
}

// Resurrection

fn resurrect(world: &World, actor: &Mobile, now: u64) -> Result<MessageKind, Fault> {
    if actor.is_alive() {
        return Err(refused(Refusal::NotDead, "you are still breathing"));
    }
    let home = world
        .region(actor.region)
        .or_else(|| world.region(REGION_HAVEN))
        .ok_or_else(|| refused(Refusal::UnknownRegion, "there is nowhere to wake up"))?;
    world.with_mobile_mut(actor.serial, |mobile| {
        mobile.region = home.id;
        mobile.position = home.start;
        mobile.pools.fold_regen(&mobile.stats, now);
        mobile.pools.set_fraction(&mobile.stats, 1, 2);
        mobile.target = Serial::ZERO;
    });
    logging::log_game(&format!("{} returns from the dead", actor.name));
    Ok(MessageKind::Ok {
        text: format!("you awaken in {}", home.name),
    })
}

// Item use

fn use_item(
    world: &World,
    actor: &Mobile,
    stage: Stage,
    item: Serial,
    now: u64,
) -> Result<MessageKind, Fault> {
    if !actor.is_alive() {
        return Err(refused(Refusal::DeadMobile, "the dead cannot rummage"));
    }

    let held = world.reconcile_inventory(actor.serial);
    if stage == Stage::One || !item.is_assigned() {
        let lines: Vec<String> = held
            .iter()
            .filter_map(|serial| world.item(*serial))
            .map(|item| format!("{} [{}]", item.name, item.serial))
            .collect();
        let text = if lines.is_empty() {
            "you carry nothing usable".to_string()
        } else {
            format!("choose an item:\n{}", lines.join("\n"))
        };
        return Ok(MessageKind::Ok { text });
    }

    let target = world
        .item(item)
        .ok_or_else(|| refused(Refusal::UnknownItem, "no such item exists"))?;
    if !held.contains(&item) || target.owner != actor.serial {
        return Err(refused(Refusal::NotOwner, "that is not yours to use"));
    }

    match &target.kind {
        ItemKind::Consumable(consumable) => {
            apply_consumable(world, actor, item, consumable.class, now)
        }
        ItemKind::Weapon(_) | ItemKind::Armor(_) => toggle_equip(world, actor, &target),
    }
}

fn apply_consumable(
    world: &World,
    actor: &Mobile,
    item: Serial,
    class: ConsumableClass,
    now: u64,
) -> Result<MessageKind, Fault> {
    let text = match class {
        ConsumableClass::HealPotion => {
            let healed = world
                .with_mobile_mut(actor.serial, |mobile| {
                    mobile.refresh_pools(now);
                    let stats = mobile.stats;
                    mobile.pools.heal(&stats, 10)
                })
                .unwrap_or(0);
            spend_one(world, actor.serial, item);
            format!("the draught restores {healed} hits")
        }
        ConsumableClass::Ration => {
            let restored = world
                .with_mobile_mut(actor.serial, |mobile| {
                    mobile.refresh_pools(now);
                    let stats = mobile.stats;
                    mobile.pools.restore_stamina(&stats, 15)
                })
                .unwrap_or(0);
            spend_one(world, actor.serial, item);
            format!("the meal restores {restored} stamina")
        }
        ConsumableClass::Trinket => {
            world.with_mobile_mut(actor.serial, |mobile| {
                mobile.unlock_region(crate::world::region::REGION_BLACKFEN);
            });
            spend_one(world, actor.serial, item);
            "the charm crumbles; the Blackfen will admit you now".to_string()
        }
        ConsumableClass::Coin | ConsumableClass::Arrow => {
            "nothing obvious happens".to_string()
        }
    };
    Ok(MessageKind::Ok { text })
}

fn spend_one(world: &World, owner: Serial, item: Serial) {
    let emptied = world
        .with_item_mut(item, |stored| {
            if let Some(consumable) = stored.as_consumable_mut() {
                consumable.take(1);
                consumable.is_empty()
            } else {
                false
            }
        })
        .unwrap_or(false);
    if emptied {
        world.remove_item(item);
        world.with_mobile_mut(owner, |mobile| {
            mobile.take_from_inventory(item);
        });
    }
}

fn toggle_equip(world: &World, actor: &Mobile, item: &Item) -> Result<MessageKind, Fault> {
    let slot = match &item.kind {
        ItemKind::Weapon(_) => EquipSlot::MainHand,
        ItemKind::Armor(armor) => EquipSlot::for_wear(armor.slot),
        ItemKind::Consumable(_) => unreachable!("consumables are handled elsewhere"),
    };

    let already_worn = actor
        .equipment
        .worn()
        .any(|(_, serial)| serial == item.serial);
    if already_worn {
        world.with_mobile_mut(actor.serial, |mobile| {
            mobile.equipment.unequip_serial(item.serial);
        });
        return Ok(MessageKind::Ok {
            text: format!("you put away {}", item.name),
        });
    }

    let result = world
        .with_mobile_mut(actor.serial, |mobile| mobile.equipment.equip(slot, item))
        .unwrap_or(Err(crate::entities::equipment::EquipError::NotEquippable));
    match result {
        Ok(()) => Ok(MessageKind::Ok {
            text: format!("you ready {}", item.name),
        }),
        Err(err) => Err(refused(Refusal::UnknownItem, err.to_string())),
    }
}

// Vendors

struct Ware {
    id: u32,
    name: &'static str,
    price: u32,
}

fn vendor_wares(vendor: VendorKind) -> &'static [Ware] {
    match vendor {
        VendorKind::Blacksmith => &[
            Ware { id: 1, name: "a longsword", price: 30 },
            Ware { id: 2, name: "an iron mace", price: 20 },
            Ware { id: 3, name: "a chain tunic", price: 40 },
            Ware { id: 4, name: "a greatsword", price: 60 },
        ],
        VendorKind::Provisioner => &[
            Ware { id: 1, name: "a healing draught", price: 8 },
            Ware { id: 2, name: "a traveller's ration", price: 3 },
            Ware { id: 3, name: "a blackfen charm", price: 50 },
        ],
        VendorKind::Fletcher => &[
            Ware { id: 1, name: "a shortbow", price: 35 },
            Ware { id: 2, name: "a sheaf of arrows", price: 5 },
        ],
        VendorKind::None => &[],
    }
}

fn forge_ware(world: &World, vendor: VendorKind, ware: u32, name: &str) -> Option<Item> {
    let serial = world.allocate_item_serial();
    let kind = match (vendor, ware) {
        (VendorKind::Blacksmith, 1) => ItemKind::Weapon(Weapon {
            dice: DamageDice::new(1, 8),
            range: 1,
            skill: Skill::Swords,
            damage: DamageMask::of(&[DamageKind::Physical]),
            durability: Durability::new(80),
            hands: Hands::One,
            uses_arrows: false,
        }),
        (VendorKind::Blacksmith, 2) => ItemKind::Weapon(Weapon {
            dice: DamageDice::new(1, 6),
            range: 1,
            skill: Skill::Maces,
            damage: DamageMask::of(&[DamageKind::Physical]),
            durability: Durability::new(90),
            hands: Hands::One,
            uses_arrows: false,
        }),
        (VendorKind::Blacksmith, 3) => ItemKind::Armor(Armor {
            rating: 3,
            resists: DamageMask::of(&[DamageKind::Physical]),
            durability: Durability::new(60),
            slot: WearSlot::Chest,
        }),
        (VendorKind::Blacksmith, 4) => ItemKind::Weapon(Weapon {
            dice: DamageDice::new(2, 6),
            range: 1,
            skill: Skill::Swords,
            damage: DamageMask::of(&[DamageKind::Physical]),
            durability: Durability::new(70),
            hands: Hands::Two,
            uses_arrows: false,
        }),
        (VendorKind::Provisioner, 1) => {
            ItemKind::Consumable(Consumable::new(ConsumableClass::HealPotion, 1, 10))
        }
        (VendorKind::Provisioner, 2) => {
            ItemKind::Consumable(Consumable::new(ConsumableClass::Ration, 1, 20))
        }
        (VendorKind::Provisioner, 3) => {
            ItemKind::Consumable(Consumable::new(ConsumableClass::Trinket, 1, 1))
        }
        (VendorKind::Fletcher, 1) => ItemKind::Weapon(Weapon {
            dice: DamageDice::new(1, 6),
            range: 8,
            skill: Skill::Archery,
            damage: DamageMask::of(&[DamageKind::Physical]),
            durability: Durability::new(60),
            hands: Hands::Two,
            uses_arrows: true,
        }),
        (VendorKind::Fletcher, 2) => {
            ItemKind::Consumable(Consumable::new(ConsumableClass::Arrow, 20, 100))
        }
        _ => return None,
    };
    Some(Item {
        serial,
        name: name.to_string(),
        owner: Serial::ZERO,
        kind,
    })
}

fn vendor_present(world: &World, actor: &Mobile, vendor: VendorKind) -> bool {
    world
        .mobiles_in_region(actor.region)
        .iter()
        .any(|mobile| mobile.vendor == vendor && mobile.is_alive())
}

fn count_coins(world: &World, held: &[Serial]) -> u32 {
    held.iter()
        .filter_map(|serial| world.item(*serial))
        .filter_map(|item| item.as_consumable().copied())
        .filter(|consumable| consumable.class == ConsumableClass::Coin)
        .map(|consumable| consumable.amount)
        .sum()
}

fn spend_coins(world: &World, owner: Serial, held: &[Serial], mut price: u32) {
    for serial in held {
        if price == 0 {
            break;
        }
        let taken = world
            .with_item_mut(*serial, |item| match item.as_consumable_mut() {
                Some(consumable) if consumable.class == ConsumableClass::Coin => {
                    let taken = consumable.take(price);
                    (taken, consumable.is_empty())
                }
                _ => (0, false),
            })
            .unwrap_or((0, false));
        price -= taken.0;
        if taken.1 {
            world.remove_item(*serial);
            world.with_mobile_mut(owner, |mobile| {
                mobile.take_from_inventory(*serial);
            });
        }
    }
}

/// The four-round shopping flow: list vendors, list wares, quote a price,
/// confirm the purchase. Funds are verified in full before any coin
/// moves.
fn use_vendor(
    world: &World,
    actor: &Mobile,
    stage: Stage,
    vendor: VendorKind,
    ware: u32,
    confirm: bool,
) -> Result<MessageKind, Fault> {
    if !actor.is_alive() {
        return Err(refused(Refusal::DeadMobile, "the dead cannot barter"));
    }

    if stage == Stage::One || vendor == VendorKind::None {
        let lines: Vec<String> = world
            .mobiles_in_region(actor.region)
            .into_iter()
            .filter(|mobile| mobile.vendor != VendorKind::None && mobile.is_alive())
            .map(|mobile| format!("{} ({})", mobile.name, mobile.vendor.name()))
            .collect();
        let text = if lines.is_empty() {
            "nobody here is selling anything".to_string()
        } else {
            format!("who will you trade with?\n{}", lines.join("\n"))
        };
        return Ok(MessageKind::Ok { text });
    }

    if !vendor_present(world, actor, vendor) {
        return Err(refused(
            Refusal::UnknownVendor,
            format!("there is no {} here", vendor.name()),
        ));
    }

    if ware == 0 {
        let lines: Vec<String> = vendor_wares(vendor)
            .iter()
            .map(|ware| format!("{}. {} - {} gold", ware.id, ware.name, ware.price))
            .collect();
        return Ok(MessageKind::Ok {
            text: format!("the {} offers:\n{}", vendor.name(), lines.join("\n")),
        });
    }

    let listing = vendor_wares(vendor)
        .iter()
        .find(|listing| listing.id == ware)
        .ok_or_else(|| refused(Refusal::UnknownWare, "nothing like that is for sale"))?;

    if !confirm {
        return Ok(MessageKind::Ok {
            text: format!(
                "{} costs {} gold; confirm to buy",
                listing.name, listing.price
            ),
        });
    }

    let held = world.reconcile_inventory(actor.serial);
    let funds = count_coins(world, &held);
    if funds < listing.price {
        return Err(refused(
            Refusal::InsufficientFunds,
            format!("{} costs {} gold and you have {}", listing.name, listing.price, funds),
        ));
    }

    spend_coins(world, actor.serial, &held, listing.price);
    let item = forge_ware(world, vendor, ware, listing.name)
        .ok_or_else(|| refused(Refusal::UnknownWare, "nothing like that is for sale"))?;
    world
        .give_item(actor.serial, item)
        .ok_or_else(|| refused(Refusal::UnknownMobile, "your body is nowhere to be found"))?;
    logging::log_game(&format!(
        "{} buys {} for {} gold",
        actor.name, listing.name, listing.price
    ));
    Ok(MessageKind::Ok {
        text: format!("you hand over {} gold for {}", listing.price, listing.name),
    })
}

/// Logout path shared by the Kill handler and connection teardown: flag
/// the player out and push their save through the blob boundary.
pub fn log_out(world: &World, store: &SaveStore, player_id: u64) {
    let Some(session) = world.session(player_id) else {
        return;
    };
    world.reconcile_inventory(session.mobile);
    let Some(mobile) = world.mobile(session.mobile) else {
        return;
    };
    world.with_mobile_mut(session.mobile, |stored| stored.set_logged_in(false));
    let save = PlayerSave::capture(world, player_id, &mobile);
    match save.to_blob() {
        Ok(blob) => {
            if let Err(err) = store.save_blob(player_id, &blob) {
                logging::log_error(&format!("save on logout failed for {player_id}: {err}"));
            }
        }
        Err(err) => {
            logging::log_error(&format!("serialize on logout failed for {player_id}: {err}"))
        }
    }
    logging::log_game(&format!("player {player_id} logged out"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::region::{REGION_BLACKFEN, REGION_MOORS};
    use std::sync::atomic::{AtomicU32, Ordering};

    static TEST_DIR_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn scratch_store() -> SaveStore {
        let id = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        SaveStore::new(std::env::temp_dir().join(format!(
            "ravenfell_handlers_test_{}_{}",
            std::process::id(),
            id
        )))
    }

    fn world_with_player(player_id: u64) -> (World, SaveStore, Serial) {
        let world = World::bootstrap();
        world.populate_npcs(0);
        let store = scratch_store();
        let mut dice = Dice::from_seed(1);
        let auth = Message::request(
            0,
            MessageKind::Authenticate {
                player_id,
                name: "Aldous".to_string(),
            },
        );
        let reply = dispatch(&world, &store, &auth, &mut dice, 0);
        let serial = match reply.kind {
            MessageKind::AccountClientState { snapshot } => snapshot.mobile.serial,
            other => panic!("expected snapshot, got {other:?}"),
        };
        (world, store, serial)
    }

    #[test]
    fn authentication_replies_with_a_session_snapshot() {
        let world = World::bootstrap();
        let store = scratch_store();
        let mut dice = Dice::from_seed(1);
        let auth = Message::request(
            0,
            MessageKind::Authenticate {
                player_id: 7001,
                name: "Aldous".to_string(),
            },
        );
        let reply = dispatch(&world, &store, &auth, &mut dice, 0);
        assert_eq!(reply.stage, Stage::Two);
        match reply.kind {
            MessageKind::AccountClientState { snapshot } => {
                assert_eq!(snapshot.player_id, 7001);
                assert_eq!(snapshot.region.id, REGION_HAVEN);
                assert!(snapshot.region.navigable);
                assert_eq!(snapshot.unlocked, REGION_HAVEN.0);
                assert_eq!(snapshot.mobile.kind, MobileKind::Player);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
        assert!(world.session(7001).is_some());
    }

    #[test]
    fn unauthenticated_requests_are_protocol_errors() {
        let world = World::bootstrap();
        let store = scratch_store();
        let mut dice = Dice::from_seed(1);
        let request = Message::request(0, MessageKind::Resurrect);
        let reply = dispatch(&world, &store, &request, &mut dice, 0);
        assert!(matches!(reply.kind, MessageKind::Error { .. }));

        let unknown = Message::request(424242, MessageKind::Resurrect);
        let reply = dispatch(&world, &store, &unknown, &mut dice, 0);
        assert!(matches!(reply.kind, MessageKind::Error { .. }));
    }

    #[test]
    fn move_mutates_position_only_at_stage_two() {
        let (world, store, serial) = world_with_player(7001);
        let mut dice = Dice::from_seed(1);
        let before = world.mobile(serial).expect("player").position;

        let menu = Message::request(
            7001,
            MessageKind::Move {
                direction: None,
                destination: None,
            },
        );
        let reply = dispatch(&world, &store, &menu, &mut dice, 0);
        assert_eq!(reply.stage, Stage::Two);
        assert!(matches!(reply.kind, MessageKind::Ok { .. }));
        assert_eq!(world.mobile(serial).expect("player").position, before);

        let step = Message::new(
            7001,
            Stage::Two,
            MessageKind::Move {
                direction: Some(Direction::North),
                destination: None,
            },
        );
        let reply = dispatch(&world, &store, &step, &mut dice, 0);
        assert_eq!(reply.stage, Stage::Three);
        assert!(matches!(reply.kind, MessageKind::Ok { .. }));
        let after = world.mobile(serial).expect("player").position.expect("position");
        assert_eq!(Some(after), before.map(|p| p.step(Direction::North)));
    }

    #[test]
    fn unconnected_region_move_is_refused_and_unmutated() {
        let (world, store, serial) = world_with_player(7001);
        let mut dice = Dice::from_seed(1);
        // The Barrow borders the Moors, not Haven.
        let jump = Message::new(
            7001,
            Stage::Two,
            MessageKind::Move {
                direction: None,
                destination: Some(crate::world::region::REGION_BARROW),
            },
        );
        let reply = dispatch(&world, &store, &jump, &mut dice, 0);
        match reply.kind {
            MessageKind::Refused { reason, .. } => assert_eq!(reason, Refusal::NotConnected),
            other => panic!("expected refusal, got {other:?}"),
        }
        assert_eq!(world.mobile(serial).expect("player").region, REGION_HAVEN);
    }

    #[test]
    fn pvp_region_stays_locked_until_the_charm_is_used() {
        let (world, store, serial) = world_with_player(7001);
        let mut dice = Dice::from_seed(1);

        // Walk over to the Moors first; the Blackfen connects from there.
        let to_moors = Message::new(
            7001,
            Stage::Two,
            MessageKind::Move {
                direction: None,
                destination: Some(REGION_MOORS),
            },
        );
        let reply = dispatch(&world, &store, &to_moors, &mut dice, 0);
        assert!(matches!(reply.kind, MessageKind::Ok { .. }));

        let to_fen = Message::new(
            7001,
            Stage::Two,
            MessageKind::Move {
                direction: None,
                destination: Some(REGION_BLACKFEN),
            },
        );
        let reply = dispatch(&world, &store, &to_fen, &mut dice, 0);
        match reply.kind {
            MessageKind::Refused { reason, .. } => assert_eq!(reason, Refusal::RegionLocked),
            other => panic!("expected lock refusal, got {other:?}"),
        }

        world.with_mobile_mut(serial, |mobile| mobile.unlock_region(REGION_BLACKFEN));
        let reply = dispatch(&world, &store, &to_fen, &mut dice, 0);
        assert!(matches!(reply.kind, MessageKind::Ok { .. }));
        assert_eq!(world.mobile(serial).expect("player").region, REGION_BLACKFEN);
    }

    #[test]
    fn combat_stage_one_lists_nearby_targets_without_mutating() {
        let (world, store, serial) = world_with_player(7001);
        let mut dice = Dice::from_seed(1);
        let player = world.mobile(serial).expect("player");
        let wolf = world.allocate_mobile_serial();
        world.insert_mobile(Mobile::creature(
            wolf,
            "a moor wolf",
            player.region,
            player.position.expect("position").step(Direction::East),
            crate::entities::stats::PrimaryStats::new(18, 22, 4),
            3,
            0,
        ));

        let scout = Message::request(7001, MessageKind::Combat { targets: Vec::new() });
        let reply = dispatch(&world, &store, &scout, &mut dice, 0);
        assert_eq!(reply.stage, Stage::Two);
        match reply.kind {
            MessageKind::Combat { targets } => {
                assert!(targets.contains(&wolf));
                assert!(!targets.contains(&serial));
            }
            other => panic!("expected target menu, got {other:?}"),
        }
        assert_eq!(world.mobile(wolf).expect("wolf").pools.hits(), 18);
    }

    #[test]
    fn combat_stage_two_rejects_departed_targets() {
        let (world, store, _serial) = world_with_player(7001);
        let mut dice = Dice::from_seed(1);
        let strike = Message::new(
            7001,
            Stage::Two,
            MessageKind::Combat {
                targets: vec![Serial(0x3fff_fff0)],
            },
        );
        let reply = dispatch(&world, &store, &strike, &mut dice, 0);
        match reply.kind {
            MessageKind::Refused { reason, .. } => assert_eq!(reason, Refusal::TargetGone),
            other => panic!("expected refusal, got {other:?}"),
        }
    }

    #[test]
    fn vendor_flow_runs_four_stages_and_charges_gold() {
        let (world, store, serial) = world_with_player(7001);
        let mut dice = Dice::from_seed(1);

        let browse = Message::request(
            7001,
            MessageKind::UseVendor {
                vendor: VendorKind::None,
                ware: 0,
                confirm: false,
            },
        );
        let reply = dispatch(&world, &store, &browse, &mut dice, 0);
        match &reply.kind {
            MessageKind::Ok { text } => assert!(text.contains("provisioner")),
            other => panic!("expected vendor list, got {other:?}"),
        }

        let wares = Message::new(
            7001,
            Stage::Two,
            MessageKind::UseVendor {
                vendor: VendorKind::Provisioner,
                ware: 0,
                confirm: false,
            },
        );
        let reply = dispatch(&world, &store, &wares, &mut dice, 0);
        match &reply.kind {
            MessageKind::Ok { text } => assert!(text.contains("healing draught")),
            other => panic!("expected ware list, got {other:?}"),
        }

        let quote = Message::new(
            7001,
            Stage::Three,
            MessageKind::UseVendor {
                vendor: VendorKind::Provisioner,
                ware: 1,
                confirm: false,
            },
        );
        let reply = dispatch(&world, &store, &quote, &mut dice, 0);
        match &reply.kind {
            MessageKind::Ok { text } => assert!(text.contains("8 gold")),
            other => panic!("expected quote, got {other:?}"),
        }

        let buy = Message::new(
            7001,
            Stage::Four,
            MessageKind::UseVendor {
                vendor: VendorKind::Provisioner,
                ware: 1,
                confirm: true,
            },
        );
        let reply = dispatch(&world, &store, &buy, &mut dice, 0);
        assert_eq!(reply.stage, Stage::Four);
        assert!(matches!(reply.kind, MessageKind::Ok { .. }));

        let held = world.reconcile_inventory(serial);
        assert_eq!(count_coins(&world, &held), 42);
        let has_potion = held.iter().filter_map(|s| world.item(*s)).any(|item| {
            item.as_consumable()
                .map(|c| c.class == ConsumableClass::HealPotion)
                .unwrap_or(false)
        });
        assert!(has_potion);
    }

    #[test]
    fn vendor_refuses_a_purchase_beyond_the_purse() {
        let (world, store, serial) = world_with_player(7001);
        let mut dice = Dice::from_seed(1);
        let buy = Message::new(
            7001,
            Stage::Four,
            MessageKind::UseVendor {
                vendor: VendorKind::Blacksmith,
                ware: 4,
                confirm: true,
            },
        );
        let reply = dispatch(&world, &store, &buy, &mut dice, 0);
        match reply.kind {
            MessageKind::Refused { reason, .. } => {
                assert_eq!(reason, Refusal::InsufficientFunds)
            }
            other => panic!("expected refusal, got {other:?}"),
        }
        // The purse was not touched.
        let held = world.reconcile_inventory(serial);
        assert_eq!(count_coins(&world, &held), 50);
    }

    #[test]
    fn using_a_potion_heals_and_consumes_it() {
        let (world, store, serial) = world_with_player(7001);
        let mut dice = Dice::from_seed(1);
        world.with_mobile_mut(serial, |mobile| {
            mobile.pools.damage(15);
        });
        let potion = world
            .give_item(
                serial,
                Item::consumable(
                    world.allocate_item_serial(),
                    "a healing draught",
                    Consumable::new(ConsumableClass::HealPotion, 1, 10),
                ),
            )
            .expect("potion");

        let drink = Message::new(7001, Stage::Two, MessageKind::UseItem { item: potion });
        let reply = dispatch(&world, &store, &drink, &mut dice, 0);
        match &reply.kind {
            MessageKind::Ok { text } => assert!(text.contains("restores 10 hits")),
            other => panic!("expected ok, got {other:?}"),
        }
        assert_eq!(world.mobile(serial).expect("player").pools.hits(), 15);
        assert!(world.item(potion).is_none());
    }

    #[test]
    fn using_someone_elses_item_is_refused() {
        let (world, store, _serial) = world_with_player(7001);
        let other_serial = {
            let mut dice = Dice::from_seed(2);
            let auth = Message::request(
                0,
                MessageKind::Authenticate {
                    player_id: 7002,
                    name: "Berta".to_string(),
                },
            );
            let reply = dispatch(&world, &store, &auth, &mut dice, 0);
            match reply.kind {
                MessageKind::AccountClientState { snapshot } => snapshot.mobile.serial,
                other => panic!("expected snapshot, got {other:?}"),
            }
        };
        let other_item = world
            .give_item(
                other_serial,
                Item::consumable(
                    world.allocate_item_serial(),
                    "a healing draught",
                    Consumable::new(ConsumableClass::HealPotion, 1, 10),
                ),
            )
            .expect("other potion");

        let mut dice = Dice::from_seed(1);
        let steal = Message::new(7001, Stage::Two, MessageKind::UseItem { item: other_item });
        let reply = dispatch(&world, &store, &steal, &mut dice, 0);
        match reply.kind {
            MessageKind::Refused { reason, .. } => assert_eq!(reason, Refusal::NotOwner),
            other => panic!("expected refusal, got {other:?}"),
        }
    }

    #[test]
    fn resurrect_requires_being_dead_then_restores_half_pools() {
        let (world, store, serial) = world_with_player(7001);
        let mut dice = Dice::from_seed(1);

        let early = Message::request(7001, MessageKind::Resurrect);
        let reply = dispatch(&world, &store, &early, &mut dice, 0);
        match reply.kind {
            MessageKind::Refused { reason, .. } => assert_eq!(reason, Refusal::NotDead),
            other => panic!("expected refusal, got {other:?}"),
        }

        world.with_mobile_mut(serial, |mobile| mobile.pools.kill());
        let reply = dispatch(&world, &store, &early, &mut dice, 0);
        assert!(matches!(reply.kind, MessageKind::Ok { .. }));
        let player = world.mobile(serial).expect("player");
        assert!(player.is_alive());
        assert_eq!(player.pools.hits(), 10);
    }

    #[test]
    fn logout_flags_the_player_and_writes_a_save() {
        let (world, store, serial) = world_with_player(7001);
        log_out(&world, &store, 7001);
        assert!(!world.mobile(serial).expect("player").is_logged_in());
        assert!(store.load_blob(7001).expect("load").is_some());

        // A fresh world restores the character from the same blob.
        let world2 = World::bootstrap();
        let mut dice = Dice::from_seed(1);
        let auth = Message::request(
            0,
            MessageKind::Authenticate {
                player_id: 7001,
                name: "Aldous".to_string(),
            },
        );
        let reply = dispatch(&world2, &store, &auth, &mut dice, 0);
        match reply.kind {
            MessageKind::AccountClientState { snapshot } => {
                assert_eq!(snapshot.mobile.name, "Aldous");
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }
}

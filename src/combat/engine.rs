use std::collections::HashMap;

use crate::combat::damage::{mitigate, DamageKind, DamageMask};
use crate::combat::dice::Dice;
use crate::entities::item::{ConsumableClass, DamageDice, Item, ItemKind};
use crate::entities::mobile::Mobile;
use crate::entities::serial::Serial;
use crate::entities::skills::Skill;
use crate::world::registry::World;

const BASE_ARMOR_CLASS: i32 = 10;
const SKILL_GAIN_CHANCE_IN: u32 = 3;
const STAT_GAIN_CHANCE_IN: u32 = 8;
const WEAR_CHANCE_IN: u32 = 4;

/// What a mobile fights with this turn: the equipped main-hand weapon, or
/// bare hands.
struct WeaponProfile {
    display: String,
    dice: DamageDice,
    range: u32,
    skill: Skill,
    damage: DamageMask,
    serial: Option<Serial>,
    uses_arrows: bool,
}

fn weapon_profile(mobile: &Mobile, items: &HashMap<Serial, Item>) -> WeaponProfile {
    if let Some(serial) = mobile.equipment.main_hand() {
        if let Some(item) = items.get(&serial) {
            if let ItemKind::Weapon(weapon) = &item.kind {
                return WeaponProfile {
                    display: item.name.clone(),
                    dice: weapon.dice,
                    range: weapon.range.max(1),
                    skill: weapon.skill,
                    damage: weapon.damage,
                    serial: Some(serial),
                    uses_arrows: weapon.uses_arrows,
                };
            }
        }
    }
    WeaponProfile {
        display: "bare hands".to_string(),
        dice: DamageDice::new(1, 4),
        range: 1,
        skill: Skill::Wrestling,
        damage: DamageMask::of(&[DamageKind::Physical]),
        serial: None,
        uses_arrows: false,
    }
}

fn armor_class(mobile: &Mobile, items: &HashMap<Serial, Item>) -> i32 {
    let mut rating = 0;
    for (_, serial) in mobile.equipment.worn() {
        if let Some(armor) = items.get(&serial).and_then(|item| item.as_armor()) {
            if !armor.durability.is_broken() {
                rating += armor.rating as i32;
            }
        }
    }
    BASE_ARMOR_CLASS + rating
}

fn worn_resists(mobile: &Mobile, items: &HashMap<Serial, Item>) -> DamageMask {
    let mut resists = DamageMask::NONE;
    for (_, serial) in mobile.equipment.worn() {
        if let Some(armor) = items.get(&serial).and_then(|item| item.as_armor()) {
            if !armor.durability.is_broken() {
                resists = resists.union(armor.resists);
            }
        }
    }
    resists
}

/// Extra-attack chances out of 20 for a player pressing a creature of the
/// given challenge rating.
fn bonus_attack_chances(challenge_rating: u16) -> u32 {
    if challenge_rating >= 20 {
        5
    } else if challenge_rating >= 11 {
        3
    } else if challenge_rating >= 5 {
        1
    } else {
        0
    }
}

/// Resolves one combat request against a pre-validated target list and
/// returns the ordered event log, which is both the audit trail and the
/// client payload.
pub fn resolve_engagement(
    world: &World,
    attacker: Serial,
    targets: &[Serial],
    dice: &mut Dice,
    now: u64,
) -> Vec<String> {
    let mut log = Vec::new();
    let mut items = world.items_mut();
    let mut mobiles = world.mobiles_mut();

    if targets.len() == 1 && targets[0] == attacker {
        if let Some(actor) = mobiles.get_mut(&attacker) {
            if actor.is_player() && actor.is_alive() {
                let profile = weapon_profile(actor, &items);
                let roll = dice.roll_weapon(profile.dice);
                actor.refresh_pools(now);
                let dealt = actor.pools.damage(roll);
                log.push(format!(
                    "{} turns their weapon on themselves for {} damage.",
                    actor.name, dealt
                ));
            }
        }
        return log;
    }

    for &target in targets {
        if target == attacker {
            continue;
        }
        resolve_pair(&mut mobiles, &mut items, attacker, target, dice, now, &mut log);
    }
    log
}

#[allow(clippy::too_many_arguments)]
fn resolve_pair(
    mobiles: &mut HashMap<Serial, Mobile>,
    items: &mut HashMap<Serial, Item>,
    attacker_serial: Serial,
    target_serial: Serial,
    dice: &mut Dice,
    now: u64,
    log: &mut Vec<String>,
) {
    let Some(mut attacker) = mobiles.remove(&attacker_serial) else {
        return;
    };
    let Some(mut target) = mobiles.remove(&target_serial) else {
        mobiles.insert(attacker_serial, attacker);
        return;
    };
    if !attacker.is_alive() || !target.is_alive() {
        mobiles.insert(attacker_serial, attacker);
        mobiles.insert(target_serial, target);
        return;
    }

    attacker.refresh_pools(now);
    target.refresh_pools(now);
    attacker.target = target_serial;

    close_distance(&mut attacker, &mut target, items, log);

    // Turn order: attacker, a possible bonus attack, then the counter and
    // its possible bonus.
    let mut turns = Vec::with_capacity(4);
    for attacker_acts in [true, false] {
        turns.push(attacker_acts);
        let (actor, foe) = if attacker_acts {
            (&attacker, &target)
        } else {
            (&target, &attacker)
        };
        if actor.is_player() && !foe.is_player() {
            let chances = bonus_attack_chances(foe.challenge_rating);
            if dice.chance_in(chances, 20) {
                log.push(format!("{} presses the attack!", actor.name));
                turns.push(attacker_acts);
            }
        }
    }

    for attacker_acts in turns {
        if !attacker.is_alive() || !target.is_alive() {
            break;
        }
        let (actor, foe) = if attacker_acts {
            (&mut attacker, &mut target)
        } else {
            (&mut target, &mut attacker)
        };
        let foe_died = take_turn(actor, foe, items, dice, log);
        if foe_died {
            handle_death(actor, foe, items, log);
            break;
        }
    }

    mobiles.insert(attacker_serial, attacker);
    if target.is_alive() || target.is_player() {
        mobiles.insert(target_serial, target);
    }
    // A dead non-player target was already stripped of its loot and its
    // leftovers purged; dropping it here removes it from the registry.
}

fn close_distance(
    attacker: &mut Mobile,
    target: &mut Mobile,
    items: &HashMap<Serial, Item>,
    log: &mut Vec<String>,
) {
    let (Some(mut here), Some(mut there)) = (attacker.position, target.position) else {
        return;
    };
    let attacker_range = weapon_profile(attacker, items).range;
    let target_range = weapon_profile(target, items).range;
    let mut paces = 0u32;
    loop {
        let distance = here.distance(there);
        if distance <= attacker_range || distance <= target_range {
            break;
        }
        here = here.step_toward(there);
        paces += 1;
        let distance = here.distance(there);
        if distance <= attacker_range || distance <= target_range {
            break;
        }
        there = there.step_toward(here);
        paces += 1;
    }
    if paces > 0 {
        attacker.position = Some(here);
        target.position = Some(there);
        log.push(format!(
            "{} and {} close {} paces.",
            attacker.name, target.name, paces
        ));
    }
}

/// One attack turn. Returns whether the foe died of it.
fn take_turn(
    actor: &mut Mobile,
    foe: &mut Mobile,
    items: &mut HashMap<Serial, Item>,
    dice: &mut Dice,
    log: &mut Vec<String>,
) -> bool {
    let profile = weapon_profile(actor, items);
    let (Some(here), Some(there)) = (actor.position, foe.position) else {
        return false;
    };
    if here.distance(there) > profile.range {
        let mut next = here;
        for _ in 0..actor.speed.max(1) {
            if next.distance(there) <= profile.range {
                break;
            }
            next = next.step_toward(there);
        }
        actor.position = Some(next);
        log.push(format!("{} advances toward {}.", actor.name, foe.name));
        return false;
    }

    if profile.uses_arrows && !consume_arrow(actor, items) {
        if let Some(serial) = profile.serial {
            actor.equipment.unequip_serial(serial);
        }
        log.push(format!(
            "{} has no arrows left and lowers {}.",
            actor.name, profile.display
        ));
        return false;
    }

    let attack = dice.roll_die(20);
    if attack == 1 {
        log.push(format!("{} fumbles and misses {}.", actor.name, foe.name));
    } else {
        let total = attack as i32 + actor.stats.modifier(profile.skill.governing_stat());
        if total < armor_class(foe, items) {
            log.push(format!("{} swings at {} but misses.", actor.name, foe.name));
        } else {
            let mut damage = dice.roll_weapon(profile.dice);
            if attack == 20 {
                damage *= 2;
                log.push(format!("{} lands a crushing blow on {}!", actor.name, foe.name));
            }
            let net = mitigate(damage, profile.damage, worn_resists(foe, items));
            if net == 0 {
                log.push(format!("{} absorbs the blow from {}.", foe.name, actor.name));
            } else {
                let dealt = foe.pools.damage(net);
                log.push(format!(
                    "{} performs {} damage upon {}.",
                    actor.name, dealt, foe.name
                ));
            }
            if foe.is_player() {
                wear_random_armor(foe, items, dice, log);
            }
        }
    }

    if dice.chance_in(1, SKILL_GAIN_CHANCE_IN) && actor.skills.gain(profile.skill) {
        log.push(format!(
            "{} grows more practiced with {}.",
            actor.name,
            profile.skill.name()
        ));
    }
    if dice.chance_in(1, STAT_GAIN_CHANCE_IN) {
        let stat = profile.skill.governing_stat();
        actor.stats.raise(stat, 1);
        log.push(format!("{}'s {} increases.", actor.name, stat.name()));
    }
    if let Some(serial) = profile.serial {
        wear_weapon(actor, serial, items, dice, log);
    }

    foe.pools.is_dead()
}

fn consume_arrow(actor: &mut Mobile, items: &mut HashMap<Serial, Item>) -> bool {
    let quiver = actor.inventory.iter().copied().find(|serial| {
        items
            .get(serial)
            .and_then(|item| item.as_consumable())
            .map(|consumable| consumable.class == ConsumableClass::Arrow && consumable.amount > 0)
            .unwrap_or(false)
    });
    let Some(quiver) = quiver else {
        return false;
    };
    let emptied = items
        .get_mut(&quiver)
        .and_then(|item| item.as_consumable_mut())
        .map(|stack| {
            stack.take(1);
            stack.is_empty()
        })
        .unwrap_or(true);
    if emptied {
        items.remove(&quiver);
        actor.take_from_inventory(quiver);
    }
    true
}

fn wear_random_armor(
    foe: &mut Mobile,
    items: &mut HashMap<Serial, Item>,
    dice: &mut Dice,
    log: &mut Vec<String>,
) {
    let pieces: Vec<Serial> = foe
        .equipment
        .armor_slots()
        .into_iter()
        .map(|(_, serial)| serial)
        .filter(|serial| {
            items
                .get(serial)
                .map(|item| item.as_armor().is_some())
                .unwrap_or(false)
        })
        .collect();
    if pieces.is_empty() {
        return;
    }
    let pick = pieces[dice.roll_range(0, pieces.len() as u32 - 1) as usize];
    if !dice.chance_in(1, WEAR_CHANCE_IN) {
        return;
    }
    let broke = items
        .get_mut(&pick)
        .and_then(|item| item.as_armor_mut())
        .map(|armor| {
            armor.durability.wear(1);
            armor.durability.is_broken()
        })
        .unwrap_or(false);
    if broke {
        foe.equipment.unequip_serial(pick);
        let name = items
            .get(&pick)
            .map(|item| item.name.clone())
            .unwrap_or_else(|| "armor".to_string());
        log.push(format!("{}'s {} is destroyed!", foe.name, name));
    }
}

fn wear_weapon(
    actor: &mut Mobile,
    serial: Serial,
    items: &mut HashMap<Serial, Item>,
    dice: &mut Dice,
    log: &mut Vec<String>,
) {
    if !dice.chance_in(1, WEAR_CHANCE_IN) {
        return;
    }
    let broke = items
        .get_mut(&serial)
        .and_then(|item| item.as_weapon_mut())
        .map(|weapon| {
            weapon.durability.wear(1);
            weapon.durability.is_broken()
        })
        .unwrap_or(false);
    if broke {
        actor.equipment.unequip_serial(serial);
        let name = items
            .get(&serial)
            .map(|item| item.name.clone())
            .unwrap_or_else(|| "weapon".to_string());
        log.push(format!("{}'s {} breaks!", actor.name, name));
    }
}

fn handle_death(
    winner: &mut Mobile,
    loser: &mut Mobile,
    items: &mut HashMap<Serial, Item>,
    log: &mut Vec<String>,
) {
    winner.target = Serial::ZERO;
    log.push(format!("{} has slain {}!", winner.name, loser.name));
    winner.credit_kill();

    if loser.is_player() {
        return;
    }

    let spoils: Vec<Serial> = loser
        .inventory
        .iter()
        .copied()
        .filter(|serial| {
            items
                .get(serial)
                .map(|item| item.is_lootable())
                .unwrap_or(false)
        })
        .collect();
    for serial in spoils {
        loser.take_from_inventory(serial);
        let Some(mut item) = items.remove(&serial) else {
            continue;
        };
        log.push(format!(
            "{} loots {} from {}.",
            winner.name, item.name, loser.name
        ));
        let merged = merge_into_inventory(winner, &mut item, items);
        if !merged {
            item.owner = winner.serial;
            winner.inventory.push(serial);
            items.insert(serial, item);
        }
    }
    // Whatever the corpse still carried goes with it.
    for serial in loser.inventory.drain(..) {
        items.remove(&serial);
    }
}

/// Tries to fold a consumable into an existing stack of the same class.
fn merge_into_inventory(
    winner: &mut Mobile,
    item: &mut Item,
    items: &mut HashMap<Serial, Item>,
) -> bool {
    let Some(source) = item.as_consumable_mut() else {
        return false;
    };
    let class = source.class;
    let stack_serial = winner.inventory.iter().copied().find(|held| {
        items
            .get(held)
            .and_then(|existing| existing.as_consumable())
            .map(|existing| existing.class == class)
            .unwrap_or(false)
    });
    let Some(stack_serial) = stack_serial else {
        return false;
    };
    if let Some(stack) = items
        .get_mut(&stack_serial)
        .and_then(|existing| existing.as_consumable_mut())
    {
        stack.absorb(source);
    }
    source.is_empty()
}

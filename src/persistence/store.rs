use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::entities::equipment::EquipSlot;
use crate::entities::item::{Item, ItemKind};
use crate::entities::mobile::{Mobile, PlayerData};
use crate::entities::serial::Serial;
use crate::entities::skills::SkillSet;
use crate::entities::stats::{Pools, PrimaryStats};
use crate::world::position::Position;
use crate::world::region::RegionId;
use crate::world::registry::World;

const BLOB_CACHE_ENTRIES: usize = 64;

/// One carried item inside a save. Serials are not stable across
/// restarts, so an equipped item is remembered by its slot instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSave {
    pub name: String,
    pub kind: ItemKind,
    pub equipped: Option<EquipSlot>,
}

/// Everything about a player that survives a restart. The collaborating
/// store only ever sees the serialized bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSave {
    pub player_id: u64,
    pub name: String,
    pub region: u64,
    pub position: Option<Position>,
    pub stats: PrimaryStats,
    pub pools: Pools,
    pub skills: SkillSet,
    pub kills: u32,
    pub unlocked: u64,
    pub items: Vec<ItemSave>,
}

impl PlayerSave {
    pub fn from_mobile(player_id: u64, mobile: &Mobile) -> Self {
        let data = mobile.player.as_ref();
        Self {
            player_id,
            name: mobile.name.clone(),
            region: mobile.region.0,
            position: mobile.position,
            stats: mobile.stats,
            pools: mobile.pools,
            skills: mobile.skills,
            kills: data.map(|d| d.kills).unwrap_or(0),
            unlocked: data.map(|d| d.unlocked).unwrap_or(mobile.region.0),
            items: Vec::new(),
        }
    }

    /// Snapshot including the reconciled pack contents.
    pub fn capture(world: &World, player_id: u64, mobile: &Mobile) -> Self {
        let mut save = Self::from_mobile(player_id, mobile);
        save.items = mobile
            .inventory
            .iter()
            .filter_map(|serial| world.item(*serial))
            .map(|item| ItemSave {
                equipped: mobile
                    .equipment
                    .worn()
                    .find(|(_, worn)| *worn == item.serial)
                    .map(|(slot, _)| slot),
                name: item.name,
                kind: item.kind,
            })
            .collect();
        save
    }

    /// Recreates the saved pack under fresh serials and re-equips what was
    /// worn. The mobile must already be registered.
    pub fn restore_items(&self, world: &World, owner: Serial) {
        for saved in &self.items {
            let item = Item {
                serial: world.allocate_item_serial(),
                name: saved.name.clone(),
                owner: Serial::ZERO,
                kind: saved.kind.clone(),
            };
            let Some(serial) = world.give_item(owner, item) else {
                continue;
            };
            if let Some(slot) = saved.equipped {
                if let Some(item) = world.item(serial) {
                    world.with_mobile_mut(owner, |mobile| {
                        let _ = mobile.equipment.equip(slot, &item);
                    });
                }
            }
        }
    }

    pub fn to_mobile(&self, serial: Serial, now: u64) -> Mobile {
        let mut mobile = Mobile::player(
            serial,
            &self.name,
            RegionId(self.region),
            self.position.unwrap_or(Position::new(0, 0)),
            now,
        );
        mobile.position = self.position;
        mobile.stats = self.stats;
        mobile.pools = self.pools;
        mobile.skills = self.skills;
        mobile.player = Some(PlayerData {
            logged_in: true,
            kills: self.kills,
            unlocked: self.unlocked | self.region,
        });
        mobile.refresh_pools(now);
        mobile
    }

    pub fn to_blob(&self) -> Result<Vec<u8>, String> {
        serde_yaml::to_string(self)
            .map(String::into_bytes)
            .map_err(|err| format!("player save serialize failed: {}", err))
    }

    pub fn from_blob(blob: &[u8]) -> Result<Self, String> {
        let text = std::str::from_utf8(blob)
            .map_err(|err| format!("player save is not utf-8: {}", err))?;
        serde_yaml::from_str(text).map_err(|err| format!("player save parse failed: {}", err))
    }
}

#[derive(Debug, Default)]
pub struct SaveValidationReport {
    pub player_files: usize,
    pub parsed: usize,
    pub errors: Vec<String>,
    pub missing_dir: bool,
}

/// Opaque blob store keyed by player identifier. Writes keep a backup of
/// the previous blob; recent loads are served from a small cache.
#[derive(Debug)]
pub struct SaveStore {
    root: PathBuf,
    cache: Mutex<LruCache<u64, Vec<u8>>>,
}

impl SaveStore {
    pub fn from_root(root: &Path) -> Self {
        Self::new(root.join("save"))
    }

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(BLOB_CACHE_ENTRIES).expect("cache size"),
            )),
        }
    }

    fn player_path(&self, player_id: u64) -> PathBuf {
        self.root.join(format!("player_{player_id}.yml"))
    }

    fn backup_path(&self, player_id: u64) -> PathBuf {
        self.root.join(format!("player_{player_id}.yml.bak"))
    }

    pub fn save_blob(&self, player_id: u64, blob: &[u8]) -> Result<(), String> {
        fs::create_dir_all(&self.root).map_err(|err| {
            format!("save dir create failed for {}: {}", self.root.display(), err)
        })?;
        let path = self.player_path(player_id);
        if path.exists() {
            let backup = self.backup_path(player_id);
            fs::copy(&path, &backup).map_err(|err| {
                format!("save backup failed for {}: {}", backup.display(), err)
            })?;
        }
        fs::write(&path, blob)
            .map_err(|err| format!("save write failed for {}: {}", path.display(), err))?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(player_id, blob.to_vec());
        }
        Ok(())
    }

    pub fn load_blob(&self, player_id: u64) -> Result<Option<Vec<u8>>, String> {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(blob) = cache.get(&player_id) {
                return Ok(Some(blob.clone()));
            }
        }
        let path = self.player_path(player_id);
        let blob = match fs::read(&path) {
            Ok(blob) => blob,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(format!("save read failed for {}: {}", path.display(), err))
            }
        };
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(player_id, blob.clone());
        }
        Ok(Some(blob))
    }

    /// Boot-time sweep over every player blob on disk.
    pub fn validate_saves(&self) -> SaveValidationReport {
        let mut report = SaveValidationReport::default();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                report.missing_dir = true;
                return report;
            }
            Err(err) => {
                report.errors.push(format!(
                    "save dir read failed for {}: {}",
                    self.root.display(),
                    err
                ));
                return report;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("player_") || !name.ends_with(".yml") {
                continue;
            }
            report.player_files += 1;
            match fs::read(&path) {
                Ok(blob) => match PlayerSave::from_blob(&blob) {
                    Ok(_) => report.parsed += 1,
                    Err(err) => report.errors.push(format!("{}: {}", path.display(), err)),
                },
                Err(err) => report
                    .errors
                    .push(format!("{}: read failed: {}", path.display(), err)),
            }
        }
        report
    }
}

use serde::{Deserialize, Serialize};

pub const STAT_MIN: u16 = 1;
pub const STAT_MAX: u16 = 65000;

/// Regeneration credited per pool per second while the pool is below max.
const REGEN_PER_SECOND: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Strength,
    Dexterity,
    Intelligence,
}

impl StatKind {
    pub fn name(self) -> &'static str {
        match self {
            StatKind::Strength => "strength",
            StatKind::Dexterity => "dexterity",
            StatKind::Intelligence => "intelligence",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryStats {
    strength: u16,
    dexterity: u16,
    intelligence: u16,
}

impl PrimaryStats {
    pub fn new(strength: u16, dexterity: u16, intelligence: u16) -> Self {
        Self {
            strength: clamp_stat(strength),
            dexterity: clamp_stat(dexterity),
            intelligence: clamp_stat(intelligence),
        }
    }

    pub fn strength(&self) -> u16 {
        self.strength
    }

    pub fn dexterity(&self) -> u16 {
        self.dexterity
    }

    pub fn intelligence(&self) -> u16 {
        self.intelligence
    }

    pub fn get(&self, kind: StatKind) -> u16 {
        match kind {
            StatKind::Strength => self.strength,
            StatKind::Dexterity => self.dexterity,
            StatKind::Intelligence => self.intelligence,
        }
    }

    pub fn raise(&mut self, kind: StatKind, amount: u16) {
        let slot = match kind {
            StatKind::Strength => &mut self.strength,
            StatKind::Dexterity => &mut self.dexterity,
            StatKind::Intelligence => &mut self.intelligence,
        };
        *slot = clamp_stat(slot.saturating_add(amount));
    }

    pub fn lower(&mut self, kind: StatKind, amount: u16) {
        let slot = match kind {
            StatKind::Strength => &mut self.strength,
            StatKind::Dexterity => &mut self.dexterity,
            StatKind::Intelligence => &mut self.intelligence,
        };
        *slot = clamp_stat(slot.saturating_sub(amount));
    }

    /// d20-style bonus applied on top of attack rolls.
    pub fn modifier(&self, kind: StatKind) -> i32 {
        (i32::from(self.get(kind)) - 10) / 2
    }
}

impl Default for PrimaryStats {
    fn default() -> Self {
        Self::new(10, 10, 10)
    }
}

fn clamp_stat(value: u16) -> u16 {
    value.clamp(STAT_MIN, STAT_MAX)
}

/// Hits, stamina and mana. Maxima derive from the primary stats; passive
/// regeneration is folded in lazily whenever the pools are read, so no
/// timer ever touches them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pools {
    hits: u32,
    stamina: u32,
    mana: u32,
    regen_anchor: u64,
}

impl Pools {
    pub fn full(stats: &PrimaryStats, now: u64) -> Self {
        Self {
            hits: max_hits(stats),
            stamina: max_stamina(stats),
            mana: max_mana(stats),
            regen_anchor: now,
        }
    }

    pub fn fold_regen(&mut self, stats: &PrimaryStats, now: u64) {
        let elapsed = now.saturating_sub(self.regen_anchor);
        self.regen_anchor = now;
        if elapsed == 0 {
            return;
        }
        let credit = u32::try_from(elapsed).unwrap_or(u32::MAX).saturating_mul(REGEN_PER_SECOND);
        self.hits = self.hits.saturating_add(credit).min(max_hits(stats));
        self.stamina = self.stamina.saturating_add(credit).min(max_stamina(stats));
        self.mana = self.mana.saturating_add(credit).min(max_mana(stats));
    }

    pub fn hits(&self) -> u32 {
        self.hits
    }

    pub fn stamina(&self) -> u32 {
        self.stamina
    }

    pub fn mana(&self) -> u32 {
        self.mana
    }

    pub fn is_dead(&self) -> bool {
        self.hits == 0
    }

    /// Returns the amount actually removed after the [0, max] clamp.
    pub fn damage(&mut self, amount: u32) -> u32 {
        let applied = amount.min(self.hits);
        self.hits -= applied;
        applied
    }

    /// Returns the amount actually restored after the [0, max] clamp.
    pub fn heal(&mut self, stats: &PrimaryStats, amount: u32) -> u32 {
        let max = max_hits(stats);
        let before = self.hits;
        self.hits = self.hits.saturating_add(amount).min(max);
        self.hits - before
    }

    pub fn spend_stamina(&mut self, amount: u32) -> bool {
        if self.stamina < amount {
            return false;
        }
        self.stamina -= amount;
        true
    }

    pub fn restore_stamina(&mut self, stats: &PrimaryStats, amount: u32) -> u32 {
        let max = max_stamina(stats);
        let before = self.stamina;
        self.stamina = self.stamina.saturating_add(amount).min(max);
        self.stamina - before
    }

    pub fn spend_mana(&mut self, amount: u32) -> bool {
        if self.mana < amount {
            return false;
        }
        self.mana -= amount;
        true
    }

    pub fn set_fraction(&mut self, stats: &PrimaryStats, numerator: u32, denominator: u32) {
        let denominator = denominator.max(1);
        self.hits = (max_hits(stats).saturating_mul(numerator) / denominator).max(1);
        self.stamina = max_stamina(stats).saturating_mul(numerator) / denominator;
        self.mana = max_mana(stats).saturating_mul(numerator) / denominator;
    }

    pub fn kill(&mut self) {
        self.hits = 0;
    }
}

pub fn max_hits(stats: &PrimaryStats) -> u32 {
    u32::from(stats.strength())
}

pub fn max_stamina(stats: &PrimaryStats) -> u32 {
    u32::from(stats.dexterity())
}

pub fn max_mana(stats: &PrimaryStats) -> u32 {
    u32::from(stats.intelligence())
}

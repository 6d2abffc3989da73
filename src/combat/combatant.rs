//! A single creature's combat state
//!
//! Tracks hit points, the per-turn action economy, conditions, concentration
//! and the death-save counters that run while the creature is at 0 HP.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::conditions::{Condition, ConditionSet};
use super::damage::{Damage, DamageProfile, DamageType};
use super::error::{CombatError, Resource};

/// Successes or failures needed to end the death-save sequence
pub const DEATH_SAVE_LIMIT: u8 = 3;

/// Lowest death-save total that counts as a success
pub const DEATH_SAVE_DC: i32 = 10;

/// Default walking speed in feet
pub const DEFAULT_SPEED: u32 = 30;

/// Stable combatant identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CombatantId(Uuid);

impl CombatantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CombatantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CombatantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The six abilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ability {
    Strength,
    Dexterity,
    Constitution,
    Intelligence,
    Wisdom,
    Charisma,
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Ability::Strength => "strength",
            Ability::Dexterity => "dexterity",
            Ability::Constitution => "constitution",
            Ability::Intelligence => "intelligence",
            Ability::Wisdom => "wisdom",
            Ability::Charisma => "charisma",
        };
        write!(f, "{}", s)
    }
}

/// Modifier for an ability score: floor((score - 10) / 2)
pub fn ability_modifier(score: i32) -> i32 {
    (score - 10).div_euclid(2)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityScores {
    pub strength: i32,
    pub dexterity: i32,
    pub constitution: i32,
    pub intelligence: i32,
    pub wisdom: i32,
    pub charisma: i32,
}

impl Default for AbilityScores {
    fn default() -> Self {
        Self {
            strength: 10,
            dexterity: 10,
            constitution: 10,
            intelligence: 10,
            wisdom: 10,
            charisma: 10,
        }
    }
}

impl AbilityScores {
    pub fn get(&self, ability: Ability) -> i32 {
        match ability {
            Ability::Strength => self.strength,
            Ability::Dexterity => self.dexterity,
            Ability::Constitution => self.constitution,
            Ability::Intelligence => self.intelligence,
            Ability::Wisdom => self.wisdom,
            Ability::Charisma => self.charisma,
        }
    }

    pub fn modifier(&self, ability: Ability) -> i32 {
        ability_modifier(self.get(ability))
    }
}

/// Remaining per-turn resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEconomy {
    pub actions: u8,
    pub bonus_actions: u8,
    pub reactions: u8,
    /// Feet of movement left this turn
    pub movement: u32,
}

impl ActionEconomy {
    /// A full budget for a creature with the given speed
    pub fn full(speed: u32) -> Self {
        Self {
            actions: 1,
            bonus_actions: 1,
            reactions: 1,
            movement: speed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeathSaves {
    pub successes: u8,
    pub failures: u8,
    pub stable: bool,
    pub dead: bool,
}

impl DeathSaves {
    fn reset_counters(&mut self) {
        self.successes = 0;
        self.failures = 0;
    }
}

/// Where a combatant stands between fighting and dying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifeState {
    /// Above 0 HP
    Active,
    /// At 0 HP and making death saves
    Unstable,
    /// At 0 HP, stabilized
    Stable,
    Dead,
}

/// What a death save changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeathSaveOutcome {
    /// Natural 20: back on 1 HP
    Revived,
    Success,
    Failure,
    Stabilized,
    Died,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combatant {
    pub id: CombatantId,
    pub name: String,
    pub abilities: AbilityScores,
    /// Raw d20 face; pre-set values are kept when combat starts
    pub initiative_roll: Option<u32>,
    pub initiative_total: Option<i32>,
    pub hp: i32,
    pub max_hp: i32,
    pub temp_hp: i32,
    pub armor_class: i32,
    pub speed: u32,
    pub economy: ActionEconomy,
    pub damage_profile: DamageProfile,
    /// Saving-throw bonuses; abilities without an entry use the ability modifier
    pub saving_throws: BTreeMap<Ability, i32>,
    pub conditions: ConditionSet,
    /// Spell or effect being concentrated on
    pub concentration: Option<String>,
    pub death_saves: DeathSaves,
}

impl Combatant {
    pub fn new(name: impl Into<String>, max_hp: i32, armor_class: i32) -> Self {
        let max_hp = max_hp.max(0);
        Self {
            id: CombatantId::new(),
            name: name.into(),
            abilities: AbilityScores::default(),
            initiative_roll: None,
            initiative_total: None,
            hp: max_hp,
            max_hp,
            temp_hp: 0,
            armor_class,
            speed: DEFAULT_SPEED,
            economy: ActionEconomy::full(DEFAULT_SPEED),
            damage_profile: DamageProfile::new(),
            saving_throws: BTreeMap::new(),
            conditions: ConditionSet::new(),
            concentration: None,
            death_saves: DeathSaves::default(),
        }
    }

    pub fn with_abilities(mut self, abilities: AbilityScores) -> Self {
        self.abilities = abilities;
        self
    }

    pub fn with_dexterity(mut self, dexterity: i32) -> Self {
        self.abilities.dexterity = dexterity;
        self
    }

    pub fn with_speed(mut self, speed: u32) -> Self {
        self.speed = speed;
        self.economy.movement = speed;
        self
    }

    /// Use a pre-rolled initiative die instead of rolling at combat start
    pub fn with_initiative_roll(mut self, face: u32) -> Self {
        self.initiative_roll = Some(face);
        self
    }

    pub fn with_saving_throw(mut self, ability: Ability, bonus: i32) -> Self {
        self.saving_throws.insert(ability, bonus);
        self
    }

    pub fn with_hp(mut self, hp: i32) -> Self {
        self.hp = hp.clamp(0, self.max_hp);
        self
    }

    pub fn with_damage_profile(mut self, profile: DamageProfile) -> Self {
        self.damage_profile = profile;
        self
    }

    pub fn with_resistance(mut self, dtype: DamageType) -> Self {
        self.damage_profile.add_resistance(dtype);
        self
    }

    pub fn with_immunity(mut self, dtype: DamageType) -> Self {
        self.damage_profile.add_immunity(dtype);
        self
    }

    pub fn with_vulnerability(mut self, dtype: DamageType) -> Self {
        self.damage_profile.add_vulnerability(dtype);
        self
    }

    pub fn dexterity_modifier(&self) -> i32 {
        self.abilities.modifier(Ability::Dexterity)
    }

    pub fn saving_throw_bonus(&self, ability: Ability) -> i32 {
        self.saving_throws
            .get(&ability)
            .copied()
            .unwrap_or_else(|| self.abilities.modifier(ability))
    }

    pub fn life_state(&self) -> LifeState {
        if self.death_saves.dead {
            LifeState::Dead
        } else if self.hp > 0 {
            LifeState::Active
        } else if self.death_saves.stable {
            LifeState::Stable
        } else {
            LifeState::Unstable
        }
    }

    pub fn is_dead(&self) -> bool {
        self.death_saves.dead
    }

    /// Whether death saves apply: at 0 HP, neither stable nor dead
    pub fn needs_death_saves(&self) -> bool {
        self.life_state() == LifeState::Unstable
    }

    // ---- Action economy ----

    /// Refill actions, bonus actions and movement at the start of a turn
    pub fn reset_turn_resources(&mut self) {
        self.economy.actions = 1;
        self.economy.bonus_actions = 1;
        self.economy.movement = self.speed;
    }

    /// Refill the reaction at the start of a round
    pub fn reset_reaction(&mut self) {
        self.economy.reactions = 1;
    }

    pub fn use_action(&mut self) -> Result<(), CombatError> {
        Self::spend(&mut self.economy.actions, Resource::Action)
    }

    pub fn use_bonus_action(&mut self) -> Result<(), CombatError> {
        Self::spend(&mut self.economy.bonus_actions, Resource::BonusAction)
    }

    pub fn use_reaction(&mut self) -> Result<(), CombatError> {
        Self::spend(&mut self.economy.reactions, Resource::Reaction)
    }

    /// Spend movement in feet
    pub fn use_movement(&mut self, distance: u32) -> Result<(), CombatError> {
        if distance > self.economy.movement {
            return Err(CombatError::InsufficientMovement {
                requested: distance,
                remaining: self.economy.movement,
            });
        }
        self.economy.movement -= distance;
        Ok(())
    }

    fn spend(counter: &mut u8, resource: Resource) -> Result<(), CombatError> {
        if *counter == 0 {
            return Err(CombatError::ResourceExhausted(resource));
        }
        *counter -= 1;
        Ok(())
    }

    // ---- Conditions ----

    pub fn apply_condition(&mut self, condition: Condition) -> bool {
        self.conditions.apply(condition)
    }

    pub fn remove_condition(&mut self, condition: Condition) -> bool {
        self.conditions.remove(condition)
    }

    pub fn has_condition(&self, condition: Condition) -> bool {
        self.conditions.has(condition)
    }

    /// Whether this combatant's attacks roll with disadvantage
    pub fn has_attack_disadvantage(&self) -> bool {
        self.conditions.has_attack_disadvantage()
    }

    /// Whether attacks against this combatant roll with advantage
    pub fn attacks_have_advantage(&self) -> bool {
        self.conditions.attacks_have_advantage()
    }

    // ---- Concentration ----

    pub fn start_concentration(&mut self, subject: impl Into<String>) -> Option<String> {
        self.concentration.replace(subject.into())
    }

    pub fn end_concentration(&mut self) -> Option<String> {
        self.concentration.take()
    }

    pub fn is_concentrating(&self) -> bool {
        self.concentration.is_some()
    }

    // ---- Hit points ----

    /// Apply damage in order after resistances, immunities and vulnerabilities
    ///
    /// Temporary HP soak the total first. Returns real HP lost.
    pub fn apply_damage(&mut self, damage: &[Damage]) -> i32 {
        let total = damage
            .iter()
            .map(|d| self.damage_profile.adjust(*d))
            .fold(0i32, i32::saturating_add);
        if total <= 0 {
            return 0;
        }

        let absorbed = total.min(self.temp_hp);
        self.temp_hp -= absorbed;
        let remainder = total - absorbed;
        if remainder == 0 {
            return 0;
        }

        let was_up = self.hp > 0;
        let lost = remainder.min(self.hp);
        self.hp -= lost;

        if was_up && self.hp == 0 {
            self.conditions.apply(Condition::Unconscious);
            if let Some(subject) = self.concentration.take() {
                debug!("{} drops and loses concentration on {}", self.name, subject);
            }
        } else if !was_up && !self.death_saves.dead {
            // Any damage at 0 HP counts as a failed death save
            self.death_saves.stable = false;
            self.add_death_save_failures(1);
        }
        lost
    }

    /// Restore HP up to the maximum, returning the amount restored
    ///
    /// Healing from 0 HP clears the death-save state. The dead stay dead.
    pub fn heal(&mut self, amount: i32) -> i32 {
        if self.death_saves.dead || amount <= 0 {
            return 0;
        }
        let restored = amount.min(self.max_hp - self.hp).max(0);
        if restored == 0 {
            return 0;
        }
        let was_down = self.hp <= 0;
        self.hp += restored;
        if was_down {
            self.death_saves = DeathSaves::default();
            self.conditions.remove(Condition::Unconscious);
        }
        restored
    }

    /// Temporary HP do not stack; the higher value is kept
    pub fn grant_temp_hp(&mut self, amount: i32) {
        self.temp_hp = self.temp_hp.max(amount);
    }

    // ---- Death saves ----

    /// Record the natural d20 of a death save
    pub fn record_death_save(&mut self, natural: u32) -> DeathSaveOutcome {
        if natural == 20 {
            self.hp = 1;
            self.death_saves = DeathSaves::default();
            self.conditions.remove(Condition::Unconscious);
            return DeathSaveOutcome::Revived;
        }
        if natural == 1 {
            return self.add_death_save_failures(2);
        }
        if natural as i32 >= DEATH_SAVE_DC {
            self.death_saves.successes += 1;
            if self.death_saves.successes >= DEATH_SAVE_LIMIT {
                self.death_saves.reset_counters();
                self.death_saves.stable = true;
                return DeathSaveOutcome::Stabilized;
            }
            return DeathSaveOutcome::Success;
        }
        self.add_death_save_failures(1)
    }

    fn add_death_save_failures(&mut self, count: u8) -> DeathSaveOutcome {
        self.death_saves.failures = self
            .death_saves
            .failures
            .saturating_add(count)
            .min(DEATH_SAVE_LIMIT);
        if self.death_saves.failures >= DEATH_SAVE_LIMIT {
            self.death_saves.dead = true;
            self.concentration = None;
            DeathSaveOutcome::Died
        } else {
            DeathSaveOutcome::Failure
        }
    }
}

//! Combat system module
//!
//! Implements D&D-style turn-based combat with:
//! - Dice rolling (e.g., "2d6+3") over an injectable source
//! - Initiative, turn order and round tracking
//! - Action economy (action, bonus action, reaction, movement)
//! - Attack, damage and saving-throw resolution
//! - Resistance, immunity and vulnerability
//! - Conditions, timed effects and concentration
//! - Death saving throws

mod combatant;
mod conditions;
mod damage;
mod dice;
mod engine;
mod error;
mod manager;
mod roll;
mod state;

pub use combatant::{
    ability_modifier, Ability, AbilityScores, ActionEconomy, Combatant, CombatantId,
    DeathSaveOutcome, DeathSaves, LifeState,
};
pub use conditions::{ActiveEffect, Condition, ConditionSet, UnknownCondition};
pub use damage::{Damage, DamageModifier, DamageProfile, DamageType, UnknownDamageType};
pub use dice::{
    parse_dice, D20Roll, DiceError, DiceExpr, DiceOutcome, DiceRoller, DieSource, RngSource,
    RollMode, ScriptedDice,
};
pub use engine::{concentration_dc, CombatEngine, Turn, TurnKind};
pub use error::{CombatError, Resource};
pub use manager::CombatManager;
pub use roll::{Roll, RollKind};
pub use state::{Combat, CombatId, CombatSnapshot};

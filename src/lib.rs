//! combatd - turn-based combat resolution for tabletop RPG sessions
//!
//! D&D-style initiative, action economy, attack and damage resolution,
//! conditions and death saving throws, with SQLite snapshot persistence.

pub mod combat;
pub mod config;
pub mod db;
pub mod init;
pub mod sim;

pub use combat::{Combat, CombatEngine, CombatError, CombatManager, Combatant, CombatantId};
pub use config::{Config, RulesConfig, UnconsciousTurnPolicy};

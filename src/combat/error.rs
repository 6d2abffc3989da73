//! Errors raised by combat rule resolution

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::combatant::CombatantId;
use super::dice::DiceError;

/// Per-turn resources a combatant spends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Action,
    BonusAction,
    Reaction,
    Movement,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Resource::Action => "action",
            Resource::BonusAction => "bonus action",
            Resource::Reaction => "reaction",
            Resource::Movement => "movement",
        };
        write!(f, "{}", s)
    }
}

/// Errors that can occur while resolving combat rules
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CombatError {
    #[error("dice error: {0}")]
    Dice(#[from] DiceError),

    #[error("no {0} remaining")]
    ResourceExhausted(Resource),

    #[error("not enough movement: requested {requested} ft, {remaining} ft remaining")]
    InsufficientMovement { requested: u32, remaining: u32 },

    #[error("{0} does not need death saves")]
    NoDeathSaveNeeded(String),

    #[error("combat needs at least one combatant")]
    NoCombatants,

    #[error("unknown combatant: {0}")]
    UnknownCombatant(CombatantId),

    #[error("combatant already in combat: {0}")]
    DuplicateCombatant(CombatantId),

    #[error("invalid combat snapshot: {0}")]
    InvalidSnapshot(String),
}

//! Conditions and timed effects
//!
//! Conditions are kept in a set keyed by kind, so applying one twice is a
//! no-op. Exhaustion is the only leveled condition; a creature carries at
//! most one exhaustion level and levels are cumulative.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::combatant::CombatantId;

/// Highest exhaustion level; reaching it is fatal by the rules
pub const MAX_EXHAUSTION: u8 = 6;

/// Exhaustion level at which attack rolls suffer disadvantage
pub const EXHAUSTION_ATTACK_DISADVANTAGE: u8 = 3;

/// Named conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Blinded,
    Charmed,
    Deafened,
    Frightened,
    Grappled,
    Incapacitated,
    Invisible,
    Paralyzed,
    Petrified,
    Poisoned,
    Prone,
    Restrained,
    Stunned,
    Unconscious,
    /// Exhaustion at the given level (1..=6)
    Exhaustion(u8),
}

impl Condition {
    /// Whether this condition stops the creature from taking actions
    pub fn prevents_action(&self) -> bool {
        matches!(
            self,
            Condition::Incapacitated
                | Condition::Paralyzed
                | Condition::Petrified
                | Condition::Stunned
                | Condition::Unconscious
        )
    }

    pub(crate) fn same_kind(&self, other: &Condition) -> bool {
        match (self, other) {
            (Condition::Exhaustion(_), Condition::Exhaustion(_)) => true,
            _ => self == other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown condition: {0}")]
pub struct UnknownCondition(pub String);

impl FromStr for Condition {
    type Err = UnknownCondition;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if let Some(level) = s
            .strip_prefix("exhaustion")
            .map(|rest| rest.trim_start_matches(['-', '_', ' ']))
        {
            let level = if level.is_empty() {
                1
            } else {
                level
                    .trim_start_matches("level")
                    .trim_start_matches(['-', '_', ' '])
                    .parse::<u8>()
                    .map_err(|_| UnknownCondition(s.clone()))?
            };
            if level == 0 || level > MAX_EXHAUSTION {
                return Err(UnknownCondition(s.clone()));
            }
            return Ok(Condition::Exhaustion(level));
        }

        match s.as_str() {
            "blinded" | "blind" => Ok(Condition::Blinded),
            "charmed" => Ok(Condition::Charmed),
            "deafened" | "deaf" => Ok(Condition::Deafened),
            "frightened" => Ok(Condition::Frightened),
            "grappled" => Ok(Condition::Grappled),
            "incapacitated" => Ok(Condition::Incapacitated),
            "invisible" | "invis" => Ok(Condition::Invisible),
            "paralyzed" => Ok(Condition::Paralyzed),
            "petrified" => Ok(Condition::Petrified),
            "poisoned" => Ok(Condition::Poisoned),
            "prone" => Ok(Condition::Prone),
            "restrained" => Ok(Condition::Restrained),
            "stunned" | "stun" => Ok(Condition::Stunned),
            "unconscious" => Ok(Condition::Unconscious),
            other => Err(UnknownCondition(other.to_string())),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Condition::Blinded => "blinded",
            Condition::Charmed => "charmed",
            Condition::Deafened => "deafened",
            Condition::Frightened => "frightened",
            Condition::Grappled => "grappled",
            Condition::Incapacitated => "incapacitated",
            Condition::Invisible => "invisible",
            Condition::Paralyzed => "paralyzed",
            Condition::Petrified => "petrified",
            Condition::Poisoned => "poisoned",
            Condition::Prone => "prone",
            Condition::Restrained => "restrained",
            Condition::Stunned => "stunned",
            Condition::Unconscious => "unconscious",
            Condition::Exhaustion(level) => return write!(f, "exhaustion-{}", level),
        };
        write!(f, "{}", s)
    }
}

/// Set of conditions on a creature
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionSet(BTreeSet<Condition>);

impl ConditionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition, returning whether the set changed
    ///
    /// A new exhaustion level replaces the current one; level 0 clears it.
    pub fn apply(&mut self, condition: Condition) -> bool {
        if let Condition::Exhaustion(level) = condition {
            let current = self.exhaustion_level();
            let level = level.min(MAX_EXHAUSTION);
            if level == current {
                return false;
            }
            self.0.retain(|c| !matches!(c, Condition::Exhaustion(_)));
            if level > 0 {
                self.0.insert(Condition::Exhaustion(level));
            }
            return true;
        }
        self.0.insert(condition)
    }

    /// Remove a condition of the same kind, returning whether one was present
    pub fn remove(&mut self, condition: Condition) -> bool {
        let before = self.0.len();
        self.0.retain(|c| !c.same_kind(&condition));
        self.0.len() != before
    }

    /// Exhaustion matches when the current level is at least the one asked for
    pub fn has(&self, condition: Condition) -> bool {
        match condition {
            Condition::Exhaustion(level) => self.exhaustion_level() >= level.max(1),
            other => self.0.contains(&other),
        }
    }

    pub fn exhaustion_level(&self) -> u8 {
        self.0
            .iter()
            .find_map(|c| match c {
                Condition::Exhaustion(level) => Some(*level),
                _ => None,
            })
            .unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Whether any condition stops the creature from acting
    pub fn prevents_action(&self) -> bool {
        self.0.iter().any(Condition::prevents_action)
    }

    /// Whether the creature's own attack rolls suffer disadvantage
    pub fn has_attack_disadvantage(&self) -> bool {
        self.has(Condition::Blinded)
            || self.has(Condition::Frightened)
            || self.has(Condition::Poisoned)
            || self.has(Condition::Prone)
            || self.has(Condition::Restrained)
            || self.has(Condition::Exhaustion(EXHAUSTION_ATTACK_DISADVANTAGE))
    }

    /// Whether attack rolls against the creature have advantage
    pub fn attacks_have_advantage(&self) -> bool {
        [
            Condition::Blinded,
            Condition::Paralyzed,
            Condition::Petrified,
            Condition::Prone,
            Condition::Restrained,
            Condition::Stunned,
            Condition::Unconscious,
        ]
        .into_iter()
        .any(|c| self.has(c))
    }
}

impl FromIterator<Condition> for ConditionSet {
    fn from_iter<T: IntoIterator<Item = Condition>>(iter: T) -> Self {
        let mut set = ConditionSet::new();
        for condition in iter {
            set.apply(condition);
        }
        set
    }
}

/// An effect that lasts a number of rounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveEffect {
    pub id: Uuid,
    pub name: String,
    /// Combatant that created the effect
    pub source: Option<CombatantId>,
    /// Combatant the effect is on, if any
    pub target: Option<CombatantId>,
    /// Condition imposed on the target while the effect lasts
    pub condition: Option<Condition>,
    /// Rounds left; the effect is dropped once this reaches zero
    pub remaining_rounds: i32,
}

impl ActiveEffect {
    pub fn new(name: impl Into<String>, rounds: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            source: None,
            target: None,
            condition: None,
            remaining_rounds: rounds,
        }
    }

    pub fn with_source(mut self, source: CombatantId) -> Self {
        self.source = Some(source);
        self
    }

    /// Impose a condition on a target for the effect's lifetime
    pub fn imposing(mut self, target: CombatantId, condition: Condition) -> Self {
        self.target = Some(target);
        self.condition = Some(condition);
        self
    }

    /// Count down one round
    pub fn tick(&mut self) {
        self.remaining_rounds = self.remaining_rounds.saturating_sub(1);
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_rounds <= 0
    }
}

//! Combat aggregate
//!
//! A `Combat` owns its combatants and addresses them by [`CombatantId`]
//! through an index map, so reinforcements joining or combatants leaving
//! never invalidate an id held by the caller.
//!
//! The aggregate serializes through [`CombatSnapshot`]; deserializing
//! rebuilds the index and rejects snapshots whose turn order does not match
//! the combatant list.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::combatant::{Combatant, CombatantId, DEATH_SAVE_LIMIT};
use super::conditions::ActiveEffect;
use super::error::CombatError;

/// Stable combat identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CombatId(Uuid);

impl CombatId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CombatId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CombatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CombatId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Initiative ordering: higher total first, then higher dexterity score
pub(crate) fn initiative_order(a: &Combatant, b: &Combatant) -> Ordering {
    b.initiative_total
        .cmp(&a.initiative_total)
        .then_with(|| b.abilities.dexterity.cmp(&a.abilities.dexterity))
}

/// Persisted shape of a combat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatSnapshot {
    pub id: CombatId,
    pub session_id: String,
    pub round: u32,
    pub current_turn: usize,
    pub turn_order: Vec<CombatantId>,
    pub combatants: Vec<Combatant>,
    #[serde(default)]
    pub effects: Vec<ActiveEffect>,
    pub is_active: bool,
    /// Set when the combatant whose turn it was left the fight
    #[serde(default)]
    pub turn_vacated: bool,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "CombatSnapshot", into = "CombatSnapshot")]
pub struct Combat {
    pub(super) id: CombatId,
    pub(super) session_id: String,
    pub(super) round: u32,
    pub(super) current_turn: usize,
    pub(super) turn_order: Vec<CombatantId>,
    pub(super) combatants: Vec<Combatant>,
    pub(super) index: HashMap<CombatantId, usize>,
    pub(super) effects: Vec<ActiveEffect>,
    pub(super) is_active: bool,
    pub(super) turn_vacated: bool,
    pub(super) started_at: DateTime<Utc>,
}

impl Combat {
    /// Assemble an active combat from combatants already in initiative order
    pub(super) fn assemble(
        session_id: impl Into<String>,
        combatants: Vec<Combatant>,
    ) -> Result<Self, CombatError> {
        let mut index = HashMap::with_capacity(combatants.len());
        for (pos, combatant) in combatants.iter().enumerate() {
            if index.insert(combatant.id, pos).is_some() {
                return Err(CombatError::DuplicateCombatant(combatant.id));
            }
        }
        Ok(Self {
            id: CombatId::new(),
            session_id: session_id.into(),
            round: 1,
            current_turn: 0,
            turn_order: combatants.iter().map(|c| c.id).collect(),
            combatants,
            index,
            effects: Vec::new(),
            is_active: true,
            turn_vacated: false,
            started_at: Utc::now(),
        })
    }

    pub fn id(&self) -> CombatId {
        self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn current_turn(&self) -> usize {
        self.current_turn
    }

    pub fn turn_order(&self) -> &[CombatantId] {
        &self.turn_order
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn effects(&self) -> &[ActiveEffect] {
        &self.effects
    }

    pub fn len(&self) -> usize {
        self.turn_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turn_order.is_empty()
    }

    pub fn contains(&self, id: CombatantId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn get(&self, id: CombatantId) -> Option<&Combatant> {
        self.index.get(&id).map(|&pos| &self.combatants[pos])
    }

    pub fn get_mut(&mut self, id: CombatantId) -> Option<&mut Combatant> {
        self.index.get(&id).map(|&pos| &mut self.combatants[pos])
    }

    /// Like [`Combat::get_mut`], as a `Result`
    pub fn combatant_mut(&mut self, id: CombatantId) -> Result<&mut Combatant, CombatError> {
        self.get_mut(id).ok_or(CombatError::UnknownCombatant(id))
    }

    /// Combatants in turn order
    pub fn combatants(&self) -> impl Iterator<Item = &Combatant> {
        self.turn_order.iter().filter_map(|id| self.get(*id))
    }

    pub fn combatants_mut(&mut self) -> impl Iterator<Item = &mut Combatant> {
        self.combatants.iter_mut()
    }

    /// Whose turn it is, if anyone's
    pub fn current_id(&self) -> Option<CombatantId> {
        if !self.is_active || self.turn_vacated {
            return None;
        }
        self.turn_order.get(self.current_turn).copied()
    }

    pub fn current(&self) -> Option<&Combatant> {
        self.current_id().and_then(|id| self.get(id))
    }

    pub fn current_mut(&mut self) -> Option<&mut Combatant> {
        let id = self.current_id()?;
        self.get_mut(id)
    }

    /// Stop the combat; combatants stay in place for the caller to inspect
    pub fn end(&mut self) {
        self.is_active = false;
    }

    /// Insert a combatant into turn order by initiative
    ///
    /// The combatant whose turn it is keeps it. A newcomer tied with existing
    /// entries goes after them. After the current combatant was removed, a
    /// newcomer landing at its successor's slot takes the next turn.
    pub(super) fn insert_in_order(&mut self, combatant: Combatant) -> Result<(), CombatError> {
        if self.index.contains_key(&combatant.id) {
            return Err(CombatError::DuplicateCombatant(combatant.id));
        }
        let pos = self
            .turn_order
            .iter()
            .position(|id| {
                self.get(*id)
                    .is_some_and(|c| initiative_order(&combatant, c) == Ordering::Less)
            })
            .unwrap_or(self.turn_order.len());

        // A vacated turn already points at the successor, which the
        // newcomer now precedes
        let shifts_current =
            pos < self.current_turn || (pos == self.current_turn && !self.turn_vacated);
        if shifts_current && !self.turn_order.is_empty() {
            self.current_turn += 1;
        }
        self.turn_order.insert(pos, combatant.id);
        self.index.insert(combatant.id, self.combatants.len());
        self.combatants.push(combatant);
        Ok(())
    }

    /// Remove a combatant and return it
    ///
    /// If it was that combatant's turn, the next call to `next_turn` lands
    /// on its successor. Removing the last combatant ends the combat.
    pub fn remove_combatant(&mut self, id: CombatantId) -> Result<Combatant, CombatError> {
        let pos = self
            .index
            .remove(&id)
            .ok_or(CombatError::UnknownCombatant(id))?;
        let removed = self.combatants.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }

        if let Some(turn_pos) = self.turn_order.iter().position(|t| *t == id) {
            self.turn_order.remove(turn_pos);
            match turn_pos.cmp(&self.current_turn) {
                Ordering::Less => self.current_turn -= 1,
                Ordering::Equal => self.turn_vacated = true,
                Ordering::Greater => {}
            }
        }
        self.effects.retain(|e| e.target != Some(id));

        if self.turn_order.is_empty() {
            self.current_turn = 0;
            self.turn_vacated = false;
            self.is_active = false;
        }
        Ok(removed)
    }

    pub fn snapshot(&self) -> CombatSnapshot {
        CombatSnapshot::from(self.clone())
    }
}

impl From<Combat> for CombatSnapshot {
    fn from(combat: Combat) -> Self {
        Self {
            id: combat.id,
            session_id: combat.session_id,
            round: combat.round,
            current_turn: combat.current_turn,
            turn_order: combat.turn_order,
            combatants: combat.combatants,
            effects: combat.effects,
            is_active: combat.is_active,
            turn_vacated: combat.turn_vacated,
            started_at: combat.started_at,
        }
    }
}

impl TryFrom<CombatSnapshot> for Combat {
    type Error = CombatError;

    fn try_from(snapshot: CombatSnapshot) -> Result<Self, Self::Error> {
        let invalid = |msg: String| CombatError::InvalidSnapshot(msg);

        if snapshot.round == 0 {
            return Err(invalid("round must be at least 1".into()));
        }

        let mut index = HashMap::with_capacity(snapshot.combatants.len());
        for (pos, combatant) in snapshot.combatants.iter().enumerate() {
            if index.insert(combatant.id, pos).is_some() {
                return Err(invalid(format!("duplicate combatant {}", combatant.id)));
            }
        }

        for combatant in &snapshot.combatants {
            if let Some(problem) = combatant_problem(combatant) {
                return Err(invalid(format!("combatant {}: {}", combatant.id, problem)));
            }
        }

        if snapshot.turn_order.len() != snapshot.combatants.len() {
            return Err(invalid(format!(
                "turn order has {} entries for {} combatants",
                snapshot.turn_order.len(),
                snapshot.combatants.len()
            )));
        }
        let mut seen = HashSet::with_capacity(snapshot.turn_order.len());
        for id in &snapshot.turn_order {
            if !index.contains_key(id) {
                return Err(invalid(format!("turn order names unknown combatant {}", id)));
            }
            if !seen.insert(*id) {
                return Err(invalid(format!("turn order repeats {}", id)));
            }
        }

        if snapshot.is_active {
            let len = snapshot.turn_order.len();
            let limit = if snapshot.turn_vacated { len + 1 } else { len };
            if len == 0 || snapshot.current_turn >= limit {
                return Err(invalid(format!(
                    "current turn {} out of range for {} combatants",
                    snapshot.current_turn, len
                )));
            }
        }

        Ok(Self {
            id: snapshot.id,
            session_id: snapshot.session_id,
            round: snapshot.round,
            current_turn: snapshot.current_turn,
            turn_order: snapshot.turn_order,
            combatants: snapshot.combatants,
            index,
            effects: snapshot.effects,
            is_active: snapshot.is_active,
            turn_vacated: snapshot.turn_vacated,
            started_at: snapshot.started_at,
        })
    }
}

/// First broken invariant of a stored combatant, if any
fn combatant_problem(c: &Combatant) -> Option<String> {
    if c.max_hp < 0 {
        return Some(format!("max hp {} is negative", c.max_hp));
    }
    if c.hp < 0 || c.hp > c.max_hp {
        return Some(format!("hp {} outside 0..={}", c.hp, c.max_hp));
    }
    if c.temp_hp < 0 {
        return Some(format!("temp hp {} is negative", c.temp_hp));
    }
    let saves = &c.death_saves;
    if saves.successes > DEATH_SAVE_LIMIT || saves.failures > DEATH_SAVE_LIMIT {
        return Some(format!(
            "death saves {}/{} above {}",
            saves.successes, saves.failures, DEATH_SAVE_LIMIT
        ));
    }
    let economy = &c.economy;
    if economy.actions > 1 || economy.bonus_actions > 1 || economy.reactions > 1 {
        return Some(format!(
            "action economy {}/{}/{} above 1",
            economy.actions, economy.bonus_actions, economy.reactions
        ));
    }
    None
}

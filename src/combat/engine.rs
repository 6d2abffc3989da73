//! Combat engine
//!
//! Orchestrates the combat lifecycle (initiative, turns, rounds) and resolves
//! rules against a [`Combat`] or a single [`Combatant`]. The engine keeps no
//! state of its own beyond its dice source and rules; every mutation happens
//! in place on the aggregate the caller passes in.

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::combatant::{
    Ability, ActionEconomy, Combatant, CombatantId, DeathSaveOutcome, LifeState,
};
use super::conditions::{ActiveEffect, Condition};
use super::damage::{Damage, DamageType};
use super::dice::{DiceOutcome, DiceRoller, DieSource, RngSource, RollMode};
use super::error::CombatError;
use super::roll::{Roll, RollKind};
use super::state::{initiative_order, Combat};
use crate::config::{RulesConfig, UnconsciousTurnPolicy};

/// Minimum DC of a concentration check
pub const CONCENTRATION_MIN_DC: i32 = 10;

/// What the combatant whose turn it is should do with it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    /// A normal turn with a fresh action economy
    Act,
    /// The combatant is dying and spends the turn on a death save
    DeathSave,
}

/// A turn handed out by [`CombatEngine::next_turn`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub combatant_id: CombatantId,
    pub round: u32,
    pub kind: TurnKind,
}

/// Combat rules engine
#[derive(Debug, Clone)]
pub struct CombatEngine<S = RngSource<StdRng>> {
    roller: DiceRoller<S>,
    rules: RulesConfig,
}

impl CombatEngine<RngSource<StdRng>> {
    /// Engine with deterministic dice
    pub fn seeded(seed: u64) -> Self {
        Self::new(RngSource::seeded(seed))
    }

    /// Engine with dice seeded from the operating system
    pub fn from_os() -> Self {
        Self::new(RngSource::from_os())
    }
}

impl<S: DieSource> CombatEngine<S> {
    pub fn new(source: S) -> Self {
        Self {
            roller: DiceRoller::new(source),
            rules: RulesConfig::default(),
        }
    }

    pub fn with_rules(mut self, rules: RulesConfig) -> Self {
        self.rules = rules;
        self
    }

    pub fn rules(&self) -> &RulesConfig {
        &self.rules
    }

    pub fn roller(&self) -> &DiceRoller<S> {
        &self.roller
    }

    pub fn roller_mut(&mut self) -> &mut DiceRoller<S> {
        &mut self.roller
    }

    // ---- Lifecycle ----

    /// Fill in a combatant's initiative, rolling a d20 if none was pre-rolled
    pub fn roll_initiative(&mut self, combatant: &mut Combatant) -> i32 {
        if let Some(total) = combatant.initiative_total {
            return total;
        }
        let face = match combatant.initiative_roll {
            Some(face) => face,
            None => self.roller.roll_d20(),
        };
        let total = face as i32 + combatant.dexterity_modifier();
        combatant.initiative_roll = Some(face);
        combatant.initiative_total = Some(total);
        debug!(
            "{} rolls initiative: {} + {} = {}",
            combatant.name,
            face,
            combatant.dexterity_modifier(),
            total
        );
        total
    }

    /// Roll initiative, refill resources and build the turn order
    pub fn start_combat(
        &mut self,
        session_id: impl Into<String>,
        mut combatants: Vec<Combatant>,
    ) -> Result<Combat, CombatError> {
        if combatants.is_empty() {
            return Err(CombatError::NoCombatants);
        }

        for combatant in &mut combatants {
            self.roll_initiative(combatant);
            combatant.economy = ActionEconomy::full(combatant.speed);
        }
        // Stable sort: full ties keep the order the caller supplied
        combatants.sort_by(initiative_order);

        let combat = Combat::assemble(session_id, combatants)?;
        info!(
            "Combat {} started for session {} with {} combatants",
            combat.id(),
            combat.session_id(),
            combat.len()
        );
        Ok(combat)
    }

    /// Add a combatant to a running combat at its initiative position
    pub fn add_reinforcement(
        &mut self,
        combat: &mut Combat,
        mut combatant: Combatant,
    ) -> Result<CombatantId, CombatError> {
        let id = combatant.id;
        self.roll_initiative(&mut combatant);
        combatant.economy = ActionEconomy::full(combatant.speed);
        debug!("{} joins combat {}", combatant.name, combat.id());
        combat.insert_in_order(combatant)?;
        Ok(id)
    }

    /// Advance to the next combatant able to take a turn
    ///
    /// Returns `None` when the combat is over or nobody can take a turn.
    /// Each full pass through the turn order starts a new round.
    pub fn next_turn(&mut self, combat: &mut Combat) -> Option<Turn> {
        if !combat.is_active || combat.turn_order.is_empty() {
            return None;
        }

        let len = combat.turn_order.len();
        for step in 0..len {
            if step == 0 && combat.turn_vacated {
                // The successor of a removed combatant already sits at the index
                combat.turn_vacated = false;
                if combat.current_turn >= len {
                    self.wrap_round(combat);
                }
            } else if combat.current_turn + 1 >= len {
                self.wrap_round(combat);
            } else {
                combat.current_turn += 1;
            }

            let id = combat.turn_order[combat.current_turn];
            let round = combat.round;
            let Some(combatant) = combat.get_mut(id) else {
                continue;
            };
            let Some(kind) = self.turn_kind(combatant.life_state()) else {
                debug!("Skipping {} ({:?})", combatant.name, combatant.life_state());
                continue;
            };

            combatant.reset_turn_resources();
            debug!("Round {}: {}'s turn ({:?})", round, combatant.name, kind);
            return Some(Turn {
                combatant_id: id,
                round,
                kind,
            });
        }

        if self.rules.end_when_no_eligible {
            info!("Combat {} ended: no combatant can take a turn", combat.id());
            combat.end();
        }
        None
    }

    /// The turn held by the current combatant, if they can take it
    ///
    /// Used for the opening turn, which `start_combat` hands to the top of
    /// the initiative order without a `next_turn` call.
    pub fn current_turn(&self, combat: &Combat) -> Option<Turn> {
        let combatant = combat.current()?;
        let kind = self.turn_kind(combatant.life_state())?;
        Some(Turn {
            combatant_id: combatant.id,
            round: combat.round(),
            kind,
        })
    }

    /// Whether the next `next_turn` call would start a new round
    ///
    /// True when nobody after the current slot can take a turn this round.
    pub fn is_last_turn_of_round(&self, combat: &Combat) -> bool {
        let start = if combat.turn_vacated {
            combat.current_turn
        } else {
            combat.current_turn + 1
        };
        !combat
            .turn_order
            .iter()
            .skip(start)
            .filter_map(|id| combat.get(*id))
            .any(|c| self.turn_kind(c.life_state()).is_some())
    }

    fn wrap_round(&self, combat: &mut Combat) {
        combat.current_turn = 0;
        combat.round += 1;
        self.start_new_round(combat);
    }

    fn turn_kind(&self, state: LifeState) -> Option<TurnKind> {
        match state {
            LifeState::Active => Some(TurnKind::Act),
            LifeState::Unstable => match self.rules.unconscious_turns {
                UnconsciousTurnPolicy::DeathSave => Some(TurnKind::DeathSave),
                UnconsciousTurnPolicy::Skip => None,
            },
            LifeState::Stable | LifeState::Dead => None,
        }
    }

    /// Count down timed effects and refill everyone's reaction
    pub fn start_new_round(&self, combat: &mut Combat) {
        let mut expired = Vec::new();
        combat.effects.retain_mut(|effect| {
            effect.tick();
            if effect.is_expired() {
                expired.push(effect.clone());
                false
            } else {
                true
            }
        });

        for effect in expired {
            debug!("Effect '{}' expired in round {}", effect.name, combat.round);
            let (Some(target), Some(condition)) = (effect.target, effect.condition) else {
                continue;
            };
            // Another running effect still imposes it
            let still_imposed = combat.effects.iter().any(|other| {
                other.target == Some(target)
                    && other.condition.is_some_and(|c| c.same_kind(&condition))
            });
            if still_imposed {
                continue;
            }
            if let Some(combatant) = combat.get_mut(target) {
                // Unconscious at 0 HP belongs to the dying rules, not the effect
                if condition == Condition::Unconscious
                    && combatant.life_state() != LifeState::Active
                {
                    continue;
                }
                combatant.remove_condition(condition);
            }
        }

        for combatant in combat.combatants_mut() {
            combatant.reset_reaction();
        }
    }

    /// Track a timed effect, imposing its condition on the target
    pub fn apply_effect(
        &self,
        combat: &mut Combat,
        effect: ActiveEffect,
    ) -> Result<Uuid, CombatError> {
        if let Some(target) = effect.target {
            let combatant = combat.combatant_mut(target)?;
            if let Some(condition) = effect.condition {
                combatant.apply_condition(condition);
            }
        }
        let id = effect.id;
        debug!(
            "Effect '{}' applied for {} rounds",
            effect.name, effect.remaining_rounds
        );
        combat.effects.push(effect);
        Ok(id)
    }

    pub fn end_combat(&self, combat: &mut Combat) {
        combat.end();
        info!("Combat {} ended after {} rounds", combat.id(), combat.round());
    }

    // ---- Resolution ----

    /// Roll to hit; a natural 20 is a critical, a natural 1 a critical miss
    pub fn attack_roll(&mut self, attack_bonus: i32, advantage: bool, disadvantage: bool) -> Roll {
        let mode = RollMode::from_flags(advantage, disadvantage);
        let check = self.roller.roll_check(mode);
        let roll = Roll::d20(RollKind::Attack, check, attack_bonus, mode);
        debug!(
            "Attack roll {:?}: {} + {} = {}{}",
            mode,
            roll.natural.unwrap_or_default(),
            attack_bonus,
            roll.total,
            if roll.critical { " (critical)" } else { "" }
        );
        roll
    }

    /// Roll damage; a critical rolls the dice a second time
    pub fn damage_roll(
        &mut self,
        expression: &str,
        modifier: i32,
        damage_type: DamageType,
        is_critical: bool,
    ) -> Result<(Roll, Damage), CombatError> {
        let mut outcome = self.roller.roll(expression)?;
        if is_critical {
            let extra = self.roller.roll(expression)?;
            let extra_sum: u32 = extra.dice.iter().sum();
            outcome = DiceOutcome {
                total: outcome.total.saturating_add_unsigned(extra_sum),
                dice: outcome.dice.into_iter().chain(extra.dice).collect(),
            };
        }
        let roll = Roll::damage(expression, outcome, modifier, is_critical);
        let damage = Damage::new(roll.total, damage_type);
        debug!(
            "Damage roll {} + {}: {} {}{}",
            expression,
            modifier,
            damage.amount,
            damage_type,
            if is_critical { " (critical)" } else { "" }
        );
        Ok((roll, damage))
    }

    /// Apply damage to a combatant, returning HP actually lost
    pub fn apply_damage(&self, combatant: &mut Combatant, damage: &[Damage]) -> i32 {
        let before = combatant.life_state();
        let lost = combatant.apply_damage(damage);
        debug!(
            "{} loses {} HP ({} / {}, temp {})",
            combatant.name, lost, combatant.hp, combatant.max_hp, combatant.temp_hp
        );
        let after = combatant.life_state();
        if before != after {
            info!("{} is now {:?}", combatant.name, after);
        }
        lost
    }

    pub fn heal(&self, combatant: &mut Combatant, amount: i32) -> i32 {
        let restored = combatant.heal(amount);
        debug!("{} regains {} HP", combatant.name, restored);
        restored
    }

    /// Saving throw against a DC; a natural 20 always succeeds
    pub fn saving_throw(
        &mut self,
        combatant: &Combatant,
        ability: Ability,
        dc: i32,
        advantage: bool,
        disadvantage: bool,
    ) -> (Roll, bool) {
        let mode = RollMode::from_flags(advantage, disadvantage);
        let bonus = combatant.saving_throw_bonus(ability);
        let check = self.roller.roll_check(mode);
        let roll = Roll::d20(RollKind::SavingThrow, check, bonus, mode);
        let success = roll.total >= dc || roll.critical;
        debug!(
            "{} {} save DC {}: {} ({})",
            combatant.name,
            ability,
            dc,
            roll.total,
            if success { "success" } else { "failure" }
        );
        (roll, success)
    }

    /// Constitution save to hold concentration after taking damage
    ///
    /// On a failure the combatant stops concentrating.
    pub fn concentration_check(
        &mut self,
        combatant: &mut Combatant,
        damage_taken: i32,
    ) -> (Roll, bool) {
        let dc = concentration_dc(damage_taken);
        let (roll, success) = self.saving_throw(combatant, Ability::Constitution, dc, false, false);
        if !success {
            if let Some(subject) = combatant.end_concentration() {
                info!("{} loses concentration on {}", combatant.name, subject);
            }
        }
        (roll, success)
    }

    /// Roll a death save for a dying combatant
    pub fn death_saving_throw(
        &mut self,
        combatant: &mut Combatant,
    ) -> Result<(Roll, DeathSaveOutcome), CombatError> {
        if !combatant.needs_death_saves() {
            return Err(CombatError::NoDeathSaveNeeded(combatant.name.clone()));
        }
        let check = self.roller.roll_check(RollMode::Normal);
        let roll = Roll::d20(RollKind::DeathSave, check, 0, RollMode::Normal);
        let outcome = combatant.record_death_save(roll.natural.unwrap_or(1));
        debug!(
            "{} death save {}: {:?} ({} successes, {} failures)",
            combatant.name,
            roll.total,
            outcome,
            combatant.death_saves.successes,
            combatant.death_saves.failures
        );
        Ok((roll, outcome))
    }
}

/// DC of a concentration check: half the damage taken, at least 10
pub fn concentration_dc(damage_taken: i32) -> i32 {
    damage_taken.div_euclid(2).max(CONCENTRATION_MIN_DC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::dice::ScriptedDice;

    fn engine(faces: impl IntoIterator<Item = u32>) -> CombatEngine<ScriptedDice> {
        CombatEngine::new(ScriptedDice::new(faces))
    }

    #[test]
    fn test_initiative_total_uses_dex_modifier() {
        let mut engine = engine([12]);
        let mut c = Combatant::new("A", 10, 10).with_dexterity(16);
        assert_eq!(engine.roll_initiative(&mut c), 15);
        assert_eq!(c.initiative_roll, Some(12));
        assert_eq!(c.initiative_total, Some(15));
    }

    #[test]
    fn test_pre_rolled_initiative_is_kept() {
        let mut engine = engine([]);
        let mut c = Combatant::new("A", 10, 10)
            .with_dexterity(8)
            .with_initiative_roll(11);
        assert_eq!(engine.roll_initiative(&mut c), 10);
        assert_eq!(engine.roller().source().underflows(), 0);
    }

    #[test]
    fn test_start_combat_orders_by_initiative() {
        // A: 12 + 3 = 15, B: 15 + 1 = 16
        let mut engine = engine([12, 15]);
        let a = Combatant::new("A", 10, 10).with_dexterity(16);
        let b = Combatant::new("B", 10, 10).with_dexterity(12);
        let (a_id, b_id) = (a.id, b.id);

        let combat = engine.start_combat("s1", vec![a, b]).unwrap();
        assert_eq!(combat.turn_order(), &[b_id, a_id]);
        assert_eq!(combat.round(), 1);
        assert_eq!(combat.current_turn(), 0);
        assert!(combat.is_active());
    }

    #[test]
    fn test_initiative_ties_break_on_dexterity() {
        // Both total 14: A 12 + 2, B 13 + 1
        let mut engine = engine([13, 12]);
        let b = Combatant::new("B", 10, 10).with_dexterity(12);
        let a = Combatant::new("A", 10, 10).with_dexterity(14);
        let a_id = a.id;
        let combat = engine.start_combat("s1", vec![b, a]).unwrap();
        assert_eq!(combat.turn_order()[0], a_id);
    }

    #[test]
    fn test_start_combat_requires_combatants() {
        let mut engine = engine([]);
        assert_eq!(
            engine.start_combat("s1", Vec::new()).unwrap_err(),
            CombatError::NoCombatants
        );
    }

    #[test]
    fn test_attack_roll_critical() {
        let mut engine = engine([20]);
        let roll = engine.attack_roll(5, false, false);
        assert_eq!(roll.total, 25);
        assert!(roll.critical);
        assert!(roll.hits(40));
    }

    #[test]
    fn test_attack_roll_modes() {
        let mut engine = engine([4, 17, 4, 17, 9]);
        assert_eq!(engine.attack_roll(0, true, false).total, 17);
        assert_eq!(engine.attack_roll(0, false, true).total, 4);
        // Both flags cancel: one die only
        let roll = engine.attack_roll(2, true, true);
        assert_eq!(roll.dice, vec![9]);
        assert_eq!(roll.total, 11);
        assert!(!roll.advantage && !roll.disadvantage);
    }

    #[test]
    fn test_critical_damage_rolls_dice_twice() {
        let mut engine = engine([4, 5, 2, 6]);
        let (roll, damage) = engine.damage_roll("2d6", 3, DamageType::Fire, true).unwrap();
        assert_eq!(roll.total, 20);
        assert_eq!(roll.dice, vec![4, 5, 2, 6]);
        assert_eq!(damage, Damage::new(20, DamageType::Fire));
    }

    #[test]
    fn test_damage_roll_parse_error() {
        let mut engine = engine([4]);
        assert!(matches!(
            engine.damage_roll("2q6", 0, DamageType::Fire, false),
            Err(CombatError::Dice(_))
        ));
        assert_eq!(engine.roller().source().remaining(), 1);
    }

    #[test]
    fn test_saving_throw_natural_twenty_always_succeeds() {
        let mut engine = engine([20, 19]);
        let c = Combatant::new("A", 10, 10).with_saving_throw(Ability::Wisdom, -2);
        let (_, success) = engine.saving_throw(&c, Ability::Wisdom, 30, false, false);
        assert!(success);
        let (roll, success) = engine.saving_throw(&c, Ability::Wisdom, 18, false, false);
        assert_eq!(roll.total, 17);
        assert!(!success);
    }

    #[test]
    fn test_concentration_dc() {
        assert_eq!(concentration_dc(14), 10);
        assert_eq!(concentration_dc(30), 15);
        assert_eq!(concentration_dc(21), 10);
        assert_eq!(concentration_dc(23), 11);
    }

    #[test]
    fn test_failed_concentration_ends_it() {
        let mut engine = engine([3]);
        let mut c = Combatant::new("Wizard", 10, 12);
        c.start_concentration("bless");
        let (_, success) = engine.concentration_check(&mut c, 30);
        assert!(!success);
        assert!(!c.is_concentrating());
    }

    #[test]
    fn test_death_save_requires_dying() {
        let mut engine = engine([15]);
        let mut c = Combatant::new("A", 10, 10);
        assert!(matches!(
            engine.death_saving_throw(&mut c),
            Err(CombatError::NoDeathSaveNeeded(_))
        ));
        c.hp = 0;
        c.death_saves.stable = true;
        assert!(engine.death_saving_throw(&mut c).is_err());
    }

    #[test]
    fn test_effect_expiry_removes_condition() {
        let mut engine = engine([15, 10]);
        let a = Combatant::new("A", 10, 10);
        let b = Combatant::new("B", 10, 10);
        let b_id = b.id;
        let mut combat = engine.start_combat("s1", vec![a, b]).unwrap();

        let effect = ActiveEffect::new("hold person", 1).imposing(b_id, Condition::Paralyzed);
        engine.apply_effect(&mut combat, effect).unwrap();
        assert!(combat.get(b_id).unwrap().has_condition(Condition::Paralyzed));

        engine.start_new_round(&mut combat);
        assert!(combat.effects().is_empty());
        assert!(!combat.get(b_id).unwrap().has_condition(Condition::Paralyzed));
    }

    #[test]
    fn test_effect_expiry_keeps_condition_held_by_other_effect() {
        let mut engine = engine([15, 10]);
        let a = Combatant::new("A", 10, 10);
        let b = Combatant::new("B", 10, 10);
        let b_id = b.id;
        let mut combat = engine.start_combat("s1", vec![a, b]).unwrap();

        let short = ActiveEffect::new("hold", 1).imposing(b_id, Condition::Paralyzed);
        let long = ActiveEffect::new("hold", 3).imposing(b_id, Condition::Paralyzed);
        engine.apply_effect(&mut combat, short).unwrap();
        engine.apply_effect(&mut combat, long).unwrap();

        engine.start_new_round(&mut combat);
        assert_eq!(combat.effects().len(), 1);
        assert!(combat.get(b_id).unwrap().has_condition(Condition::Paralyzed));

        engine.start_new_round(&mut combat);
        engine.start_new_round(&mut combat);
        assert!(combat.effects().is_empty());
        assert!(!combat.get(b_id).unwrap().has_condition(Condition::Paralyzed));
    }

    #[test]
    fn test_effect_expiry_keeps_unconscious_at_zero_hp() {
        let mut engine = engine([15, 10]);
        let a = Combatant::new("A", 10, 10);
        let b = Combatant::new("B", 10, 10);
        let b_id = b.id;
        let mut combat = engine.start_combat("s1", vec![a, b]).unwrap();

        let sleep = ActiveEffect::new("sleep", 1).imposing(b_id, Condition::Unconscious);
        engine.apply_effect(&mut combat, sleep).unwrap();
        let target = combat.get_mut(b_id).unwrap();
        engine.apply_damage(target, &[Damage::new(10, DamageType::Fire)]);
        assert_eq!(combat.get(b_id).unwrap().hp, 0);

        engine.start_new_round(&mut combat);
        assert!(combat.effects().is_empty());
        let b = combat.get(b_id).unwrap();
        assert!(b.has_condition(Condition::Unconscious));
        assert!(b.attacks_have_advantage());
    }

    #[test]
    fn test_effect_expiry_wakes_conscious_sleeper() {
        let mut engine = engine([15, 10]);
        let a = Combatant::new("A", 10, 10);
        let b = Combatant::new("B", 10, 10);
        let b_id = b.id;
        let mut combat = engine.start_combat("s1", vec![a, b]).unwrap();

        let sleep = ActiveEffect::new("sleep", 1).imposing(b_id, Condition::Unconscious);
        engine.apply_effect(&mut combat, sleep).unwrap();
        engine.start_new_round(&mut combat);
        assert!(!combat.get(b_id).unwrap().has_condition(Condition::Unconscious));
    }

    #[test]
    fn test_critical_damage_roll_saturates() {
        let mut engine = engine([6, 6]);
        let (roll, damage) = engine
            .damage_roll("1d6+2147483647", 5, DamageType::Fire, true)
            .unwrap();
        assert_eq!(roll.total, i32::MAX);
        assert_eq!(damage.amount, i32::MAX);
    }

    #[test]
    fn test_last_turn_of_round_skips_ineligible() {
        let mut engine = engine([15, 10, 5]);
        let a = Combatant::new("A", 10, 10);
        let b = Combatant::new("B", 10, 10);
        let mut c = Combatant::new("C", 10, 10).with_hp(0);
        c.death_saves.stable = true;
        let mut combat = engine.start_combat("s1", vec![a, b, c]).unwrap();

        assert!(!engine.is_last_turn_of_round(&combat));
        engine.next_turn(&mut combat).unwrap();
        // C is stable and will be skipped, so B closes the round
        assert!(engine.is_last_turn_of_round(&combat));
        let turn = engine.next_turn(&mut combat).unwrap();
        assert_eq!(turn.round, 2);
    }
}

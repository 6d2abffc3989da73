//! Encounter simulator
//!
//! Loads an encounter file and drives a combat to its end with a fixed
//! policy: every combatant able to act attacks the first standing opponent
//! in turn order, and dying combatants roll death saves on their turns.
//!
//! Encounter files are TOML:
//!
//! ```toml
//! session_id = "goblin-ambush"
//!
//! [[combatants]]
//! name = "Aria"
//! side = "party"
//! max_hp = 24
//! armor_class = 16
//! dexterity = 14
//! attack_bonus = 5
//! damage = "1d8+3"
//! damage_type = "slashing"
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use anyhow::{bail, Context, Result};
use figment::providers::{Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::combat::{
    Ability, Combat, CombatEngine, CombatError, Combatant, CombatantId, Condition, DamageType,
    DeathSaveOutcome, DiceExpr, DieSource, LifeState, Turn, TurnKind,
};
use crate::db::SnapshotStore;

fn default_score() -> i32 {
    10
}

/// One combatant entry of an encounter file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatantSpec {
    pub name: String,
    pub side: String,
    pub max_hp: i32,
    /// Starting HP, defaults to `max_hp`
    #[serde(default)]
    pub hp: Option<i32>,
    pub armor_class: i32,
    #[serde(default = "default_score")]
    pub dexterity: i32,
    #[serde(default = "default_score")]
    pub constitution: i32,
    #[serde(default)]
    pub speed: Option<u32>,
    /// Pre-rolled initiative die
    #[serde(default)]
    pub initiative: Option<u32>,
    #[serde(default)]
    pub saving_throws: BTreeMap<Ability, i32>,
    pub attack_bonus: i32,
    /// Damage dice including any flat bonus, e.g. "1d8+3"
    pub damage: String,
    pub damage_type: DamageType,
    #[serde(default)]
    pub resistances: Vec<DamageType>,
    #[serde(default)]
    pub immunities: Vec<DamageType>,
    #[serde(default)]
    pub vulnerabilities: Vec<DamageType>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Spell held at the start of the fight
    #[serde(default)]
    pub concentration: Option<String>,
}

impl CombatantSpec {
    fn to_combatant(&self) -> Combatant {
        let mut combatant = Combatant::new(&self.name, self.max_hp, self.armor_class);
        combatant.abilities.dexterity = self.dexterity;
        combatant.abilities.constitution = self.constitution;
        if let Some(hp) = self.hp {
            combatant = combatant.with_hp(hp);
        }
        if let Some(speed) = self.speed {
            combatant = combatant.with_speed(speed);
        }
        if let Some(face) = self.initiative {
            combatant = combatant.with_initiative_roll(face);
        }
        for (ability, bonus) in &self.saving_throws {
            combatant = combatant.with_saving_throw(*ability, *bonus);
        }
        for dtype in &self.resistances {
            combatant.damage_profile.add_resistance(*dtype);
        }
        for dtype in &self.immunities {
            combatant.damage_profile.add_immunity(*dtype);
        }
        for dtype in &self.vulnerabilities {
            combatant.damage_profile.add_vulnerability(*dtype);
        }
        for condition in &self.conditions {
            combatant.apply_condition(*condition);
        }
        if combatant.hp == 0 {
            combatant.apply_condition(Condition::Unconscious);
        } else if let Some(subject) = &self.concentration {
            combatant.start_concentration(subject.clone());
        }
        combatant
    }
}

/// An encounter file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encounter {
    #[serde(default = "Encounter::default_session")]
    pub session_id: String,
    pub combatants: Vec<CombatantSpec>,
}

impl Encounter {
    fn default_session() -> String {
        "sim".to_string()
    }

    /// Parse and validate an encounter from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let encounter: Encounter = Figment::from(Toml::string(text))
            .extract()
            .context("Invalid encounter file")?;
        encounter.validate()?;
        Ok(encounter)
    }

    /// Read an encounter file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Failed to load {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        if self.combatants.is_empty() {
            bail!("Encounter has no combatants");
        }
        for spec in &self.combatants {
            spec.damage
                .parse::<DiceExpr>()
                .with_context(|| format!("Bad damage dice for {}", spec.name))?;
            if spec.max_hp <= 0 {
                bail!("{} must have positive max_hp", spec.name);
            }
        }
        let sides: BTreeSet<&str> = self.combatants.iter().map(|c| c.side.as_str()).collect();
        if sides.len() < 2 {
            bail!("Encounter needs at least two sides");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct AttackProfile {
    side: String,
    attack_bonus: i32,
    damage: String,
    damage_type: DamageType,
}

/// What happened on a simulated turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    Attack {
        target: CombatantId,
        hit: bool,
        critical: bool,
        /// HP the target actually lost
        damage: i32,
        /// Outcome of the target's concentration check, if one was needed
        kept_concentration: Option<bool>,
    },
    DeathSave(DeathSaveOutcome),
    /// No legal action (incapacitated or no target)
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub turn: Turn,
    pub event: TurnEvent,
}

/// Final state of a simulated fight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BattleOutcome {
    /// The only side left with combatants on their feet
    pub winner: Option<String>,
    pub rounds: u32,
    pub turns: u32,
    pub survivors: Vec<(String, i32, LifeState)>,
}

/// A running simulation
pub struct Simulation<S> {
    engine: CombatEngine<S>,
    combat: Combat,
    profiles: HashMap<CombatantId, AttackProfile>,
    turns: u32,
    opened: bool,
}

impl<S: DieSource> Simulation<S> {
    /// Roll initiative and start the encounter
    pub fn start(mut engine: CombatEngine<S>, encounter: &Encounter) -> Result<Self, CombatError> {
        let mut profiles = HashMap::new();
        let mut combatants = Vec::with_capacity(encounter.combatants.len());
        for spec in &encounter.combatants {
            let combatant = spec.to_combatant();
            profiles.insert(
                combatant.id,
                AttackProfile {
                    side: spec.side.clone(),
                    attack_bonus: spec.attack_bonus,
                    damage: spec.damage.clone(),
                    damage_type: spec.damage_type,
                },
            );
            combatants.push(combatant);
        }
        let combat = engine.start_combat(encounter.session_id.clone(), combatants)?;
        Ok(Self {
            engine,
            combat,
            profiles,
            turns: 0,
            opened: false,
        })
    }

    pub fn combat(&self) -> &Combat {
        &self.combat
    }

    pub fn engine(&self) -> &CombatEngine<S> {
        &self.engine
    }

    fn side_of(&self, id: CombatantId) -> Option<&str> {
        self.profiles.get(&id).map(|p| p.side.as_str())
    }

    /// Sides that still have a combatant above 0 HP
    fn standing_sides(&self) -> BTreeSet<&str> {
        self.combat
            .combatants()
            .filter(|c| c.life_state() == LifeState::Active)
            .filter_map(|c| self.side_of(c.id))
            .collect()
    }

    pub fn is_finished(&self) -> bool {
        !self.combat.is_active() || self.standing_sides().len() < 2
    }

    /// Play one turn, or return `None` once the fight is over
    pub fn step(&mut self) -> Result<Option<TurnReport>, CombatError> {
        if self.is_finished() {
            return Ok(None);
        }
        let turn = if self.opened {
            if let Some(max_round) = self.engine.rules().max_round {
                if self.combat.round() >= max_round
                    && self.engine.is_last_turn_of_round(&self.combat)
                {
                    info!("Round limit {} reached", max_round);
                    self.engine.end_combat(&mut self.combat);
                    return Ok(None);
                }
            }
            self.engine.next_turn(&mut self.combat)
        } else {
            self.opened = true;
            self.engine
                .current_turn(&self.combat)
                .or_else(|| self.engine.next_turn(&mut self.combat))
        };
        let Some(turn) = turn else {
            return Ok(None);
        };
        // Only the opening turn can already sit past the limit
        if let Some(max_round) = self.engine.rules().max_round {
            if turn.round > max_round {
                info!("Round limit {} reached", max_round);
                self.engine.end_combat(&mut self.combat);
                return Ok(None);
            }
        }

        self.turns += 1;
        let event = match turn.kind {
            TurnKind::DeathSave => self.death_save_turn(turn.combatant_id)?,
            TurnKind::Act => self.attack_turn(turn.combatant_id)?,
        };
        Ok(Some(TurnReport { turn, event }))
    }

    fn death_save_turn(&mut self, id: CombatantId) -> Result<TurnEvent, CombatError> {
        let combatant = self.combat.combatant_mut(id)?;
        let (roll, outcome) = self.engine.death_saving_throw(combatant)?;
        info!("{} death save: {} ({:?})", combatant.name, roll.total, outcome);
        Ok(TurnEvent::DeathSave(outcome))
    }

    fn attack_turn(&mut self, id: CombatantId) -> Result<TurnEvent, CombatError> {
        let Some(profile) = self.profiles.get(&id).cloned() else {
            return Ok(TurnEvent::Idle);
        };

        let attacker = self.combat.combatant_mut(id)?;
        if attacker.conditions.prevents_action() || attacker.use_action().is_err() {
            debug!("{} cannot act", attacker.name);
            return Ok(TurnEvent::Idle);
        }
        let disadvantage = attacker.has_attack_disadvantage();
        let attacker_name = attacker.name.clone();

        let target = self
            .combat
            .combatants()
            .find(|c| {
                c.life_state() == LifeState::Active
                    && self.side_of(c.id).is_some_and(|side| side != profile.side)
            })
            .map(|c| (c.id, c.armor_class, c.attacks_have_advantage()));
        let Some((target_id, armor_class, advantage)) = target else {
            return Ok(TurnEvent::Idle);
        };

        let roll = self
            .engine
            .attack_roll(profile.attack_bonus, advantage, disadvantage);
        let target = self.combat.combatant_mut(target_id)?;
        if !roll.hits(armor_class) {
            info!("{} misses {} ({})", attacker_name, target.name, roll.total);
            return Ok(TurnEvent::Attack {
                target: target_id,
                hit: false,
                critical: false,
                damage: 0,
                kept_concentration: None,
            });
        }

        let (_, damage) =
            self.engine
                .damage_roll(&profile.damage, 0, profile.damage_type, roll.critical)?;
        let lost = self.engine.apply_damage(target, &[damage]);
        info!(
            "{} {} {} for {} {} damage ({} HP left)",
            attacker_name,
            if roll.critical { "crits" } else { "hits" },
            target.name,
            lost,
            damage.damage_type,
            target.hp
        );

        let kept_concentration = if lost > 0 && target.is_concentrating() {
            Some(self.engine.concentration_check(target, lost).1)
        } else {
            None
        };

        Ok(TurnEvent::Attack {
            target: target_id,
            hit: true,
            critical: roll.critical,
            damage: lost,
            kept_concentration,
        })
    }

    /// Play turns until the fight is over
    pub fn run(&mut self) -> Result<BattleOutcome, CombatError> {
        while self.step()?.is_some() {}
        Ok(self.outcome())
    }

    /// Play to the end, saving a snapshot whenever a new round starts
    ///
    /// Persistence failures are logged and do not stop the fight.
    pub async fn run_with_store(
        &mut self,
        store: Option<&SnapshotStore>,
    ) -> Result<BattleOutcome, CombatError> {
        let mut saved_round = 0;
        loop {
            let round = self.combat.round();
            if round != saved_round {
                if let Some(store) = store {
                    if let Err(e) = store.save(&self.combat).await {
                        warn!("Failed to save round {} snapshot: {}", round, e);
                    }
                }
                saved_round = round;
            }
            if self.step()?.is_none() {
                break;
            }
        }
        if let Some(store) = store {
            if let Err(e) = store.save(&self.combat).await {
                warn!("Failed to save final snapshot: {}", e);
            }
        }
        Ok(self.outcome())
    }

    pub fn outcome(&self) -> BattleOutcome {
        let standing = self.standing_sides();
        let winner = match standing.len() {
            1 => standing.into_iter().next().map(str::to_string),
            _ => None,
        };
        BattleOutcome {
            winner,
            rounds: self.combat.round(),
            turns: self.turns,
            survivors: self
                .combat
                .combatants()
                .filter(|c| !c.is_dead())
                .map(|c| (c.name.clone(), c.hp, c.life_state()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::ScriptedDice;
    use crate::config::RulesConfig;

    const DUEL: &str = r#"
        session_id = "duel"

        [[combatants]]
        name = "Aria"
        side = "party"
        max_hp = 20
        armor_class = 15
        initiative = 18
        attack_bonus = 5
        damage = "1d8+3"
        damage_type = "slashing"

        [[combatants]]
        name = "Goblin"
        side = "monsters"
        max_hp = 7
        armor_class = 13
        initiative = 4
        attack_bonus = 4
        damage = "1d6+2"
        damage_type = "piercing"
    "#;

    #[test]
    fn test_parse_encounter() {
        let encounter = Encounter::from_toml(DUEL).unwrap();
        assert_eq!(encounter.session_id, "duel");
        assert_eq!(encounter.combatants.len(), 2);
        assert_eq!(encounter.combatants[1].damage_type, DamageType::Piercing);
        assert_eq!(encounter.combatants[0].dexterity, 10);
    }

    #[test]
    fn test_rejects_bad_encounters() {
        let bad_dice = DUEL.replace("1d6+2", "1x6");
        assert!(Encounter::from_toml(&bad_dice).is_err());

        let one_side = DUEL.replace("monsters", "party");
        let err = Encounter::from_toml(&one_side).unwrap_err();
        assert!(err.to_string().contains("two sides"));
    }

    #[test]
    fn test_duel_to_the_finish() {
        let encounter = Encounter::from_toml(DUEL).unwrap();
        // Aria attacks first: 15 + 5 hits AC 13, 1d8 rolls 6 for 9 damage
        let engine = CombatEngine::new(ScriptedDice::new([15, 6]));
        let mut sim = Simulation::start(engine, &encounter).unwrap();

        let report = sim.step().unwrap().unwrap();
        assert_eq!(
            sim.combat().get(report.turn.combatant_id).unwrap().name,
            "Aria"
        );
        assert!(matches!(
            report.event,
            TurnEvent::Attack { hit: true, damage: 7, .. }
        ));
        assert!(sim.is_finished());
        assert!(sim.step().unwrap().is_none());

        let outcome = sim.outcome();
        assert_eq!(outcome.winner.as_deref(), Some("party"));
        assert_eq!(outcome.turns, 1);
        assert!(outcome
            .survivors
            .iter()
            .any(|(name, _, state)| name == "Goblin" && *state == LifeState::Unstable));
    }

    #[test]
    fn test_round_limit_ends_fight() {
        let encounter = Encounter::from_toml(DUEL).unwrap();
        let rules = RulesConfig {
            max_round: Some(2),
            ..RulesConfig::default()
        };
        // Every attack rolls a natural 1
        let engine = CombatEngine::new(ScriptedDice::new([1; 8])).with_rules(rules);
        let mut sim = Simulation::start(engine, &encounter).unwrap();

        let outcome = sim.run().unwrap();
        assert_eq!(outcome.turns, 4);
        assert_eq!(outcome.rounds, 2);
        assert_eq!(outcome.winner, None);
        assert!(!sim.combat().is_active());
        // The limit stops the fight before a third round opens
        assert_eq!(sim.combat().round(), 2);
    }

    #[test]
    fn test_dying_combatant_rolls_death_saves() {
        let text = DUEL
            .replace("max_hp = 7", "max_hp = 7\n        hp = 0")
            .replace("name = \"Aria\"", "name = \"Aria\"\n        hp = 5");
        // Goblin starts at 0 HP: only the party stands, so add a second monster
        let text = format!(
            "{}\n{}",
            text,
            r#"
        [[combatants]]
        name = "Orc"
        side = "monsters"
        max_hp = 15
        armor_class = 13
        initiative = 2
        attack_bonus = 5
        damage = "1d12+3"
        damage_type = "slashing"
        "#
        );
        let encounter = Encounter::from_toml(&text).unwrap();
        // Aria misses (natural 1), Goblin's death save rolls 20, Orc misses
        let engine = CombatEngine::new(ScriptedDice::new([1, 20, 1]));
        let mut sim = Simulation::start(engine, &encounter).unwrap();

        sim.step().unwrap().unwrap();
        let report = sim.step().unwrap().unwrap();
        assert_eq!(report.turn.kind, TurnKind::DeathSave);
        assert_eq!(report.event, TurnEvent::DeathSave(DeathSaveOutcome::Revived));
        let goblin = sim.combat().get(report.turn.combatant_id).unwrap();
        assert_eq!(goblin.hp, 1);
    }

    #[tokio::test]
    async fn test_snapshots_saved_per_round() {
        let store = crate::db::test_utils::test_store().await;
        let encounter = Encounter::from_toml(DUEL).unwrap();
        let rules = RulesConfig {
            max_round: Some(3),
            ..RulesConfig::default()
        };
        let engine = CombatEngine::new(ScriptedDice::new([1; 12])).with_rules(rules);
        let mut sim = Simulation::start(engine, &encounter).unwrap();

        let outcome = sim.run_with_store(Some(&store)).await.unwrap();
        assert_eq!(outcome.rounds, 3);

        let saved = store.load(sim.combat().id()).await.unwrap().unwrap();
        assert!(!saved.is_active());
        assert_eq!(saved.round(), 3);
        let listed = store.list_for_session("duel").await.unwrap();
        assert_eq!(listed[0].round, 3);
        assert_eq!(store.list_for_session("duel").await.unwrap().len(), 1);
    }
}

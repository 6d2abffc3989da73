//! Roll records produced by rule resolution

use serde::{Deserialize, Serialize};

use super::dice::{is_critical, is_fumble, D20Roll, DiceOutcome, RollMode};

/// What a roll was made for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollKind {
    Initiative,
    Attack,
    Damage,
    SavingThrow,
    DeathSave,
}

/// A resolved roll
///
/// Transient: the engine hands these back to the caller and never stores them.
/// `advantage`/`disadvantage` record the mode actually rolled, so a request
/// with both flags set reports neither.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roll {
    pub kind: RollKind,
    pub expression: String,
    pub modifier: i32,
    /// Every die rolled, including the discarded d20 of an advantage roll
    pub dice: Vec<u32>,
    /// The d20 face that counted, for d20 checks
    pub natural: Option<u32>,
    pub total: i32,
    pub advantage: bool,
    pub disadvantage: bool,
    pub critical: bool,
    pub critical_miss: bool,
}

impl Roll {
    /// Build a d20 check from the kept face
    pub fn d20(kind: RollKind, check: D20Roll, modifier: i32, mode: RollMode) -> Self {
        let expression = match mode {
            RollMode::Normal => "1d20",
            RollMode::Advantage | RollMode::Disadvantage => "2d20",
        };
        Self {
            kind,
            expression: expression.to_string(),
            modifier,
            natural: Some(check.kept),
            total: (check.kept as i32).saturating_add(modifier),
            dice: check.dice,
            advantage: mode == RollMode::Advantage,
            disadvantage: mode == RollMode::Disadvantage,
            critical: is_critical(check.kept),
            critical_miss: is_fumble(check.kept),
        }
    }

    /// Build a damage roll; `outcome.total` already includes any flat modifier
    /// written in the expression
    pub fn damage(expression: &str, outcome: DiceOutcome, modifier: i32, critical: bool) -> Self {
        Self {
            kind: RollKind::Damage,
            expression: expression.to_string(),
            modifier,
            natural: None,
            total: outcome.total.saturating_add(modifier),
            dice: outcome.dice,
            advantage: false,
            disadvantage: false,
            critical,
            critical_miss: false,
        }
    }

    /// Whether an attack roll beats the given armor class
    ///
    /// A natural 20 always hits and a natural 1 always misses.
    pub fn hits(&self, armor_class: i32) -> bool {
        self.critical || (!self.critical_miss && self.total >= armor_class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(kept: u32) -> D20Roll {
        D20Roll {
            kept,
            dice: vec![kept],
        }
    }

    #[test]
    fn test_attack_hits() {
        // Critical hit ignores AC
        let roll = Roll::d20(RollKind::Attack, check(20), 0, RollMode::Normal);
        assert!(roll.critical);
        assert!(roll.hits(30));

        // Fumble misses even when the total would beat AC
        let roll = Roll::d20(RollKind::Attack, check(1), 20, RollMode::Normal);
        assert!(roll.critical_miss);
        assert!(!roll.hits(5));

        // 15 + 5 = 20 >= 18
        let roll = Roll::d20(RollKind::Attack, check(15), 5, RollMode::Normal);
        assert!(roll.hits(18));

        // 10 + 3 = 13 < 18
        let roll = Roll::d20(RollKind::Attack, check(10), 3, RollMode::Normal);
        assert!(!roll.hits(18));
    }

    #[test]
    fn test_advantage_roll_records_both_dice() {
        let roll = Roll::d20(
            RollKind::SavingThrow,
            D20Roll {
                kept: 17,
                dice: vec![3, 17],
            },
            2,
            RollMode::Advantage,
        );
        assert_eq!(roll.expression, "2d20");
        assert_eq!(roll.dice, vec![3, 17]);
        assert_eq!(roll.natural, Some(17));
        assert_eq!(roll.total, 19);
        assert!(roll.advantage);
        assert!(!roll.disadvantage);
    }

    #[test]
    fn test_damage_roll_adds_modifier() {
        let outcome = DiceOutcome {
            dice: vec![4, 5],
            total: 9,
        };
        let roll = Roll::damage("2d6", outcome, 3, false);
        assert_eq!(roll.total, 12);
        assert_eq!(roll.natural, None);
    }
}

//! Dice rolling
//!
//! Parses dice notation like "2d6", "1d20+5" or "d8-1" and rolls it against
//! an injectable [`DieSource`], so replays and tests can supply exact faces.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest number of dice accepted in a single expression
pub const MAX_DICE: u32 = 100;

/// Largest die accepted in a single expression
pub const MAX_SIDES: u32 = 1000;

/// Errors raised while parsing dice notation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiceError {
    #[error("empty dice expression")]
    Empty,

    #[error("missing 'd' in dice expression: {0}")]
    MissingSeparator(String),

    #[error("invalid dice count: {0}")]
    InvalidCount(String),

    #[error("invalid die sides: {0}")]
    InvalidSides(String),

    #[error("invalid modifier: {0}")]
    InvalidModifier(String),

    #[error("dice count {0} out of range (1..=100)")]
    CountOutOfRange(u32),

    #[error("die sides {0} out of range (1..=1000)")]
    SidesOutOfRange(u32),
}

/// A parsed dice expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceExpr {
    /// Number of dice to roll
    pub count: u32,
    /// Number of sides per die
    pub sides: u32,
    /// Flat modifier written into the expression ("+3" in "1d8+3")
    pub modifier: i32,
}

impl DiceExpr {
    pub fn new(count: u32, sides: u32, modifier: i32) -> Self {
        Self {
            count,
            sides,
            modifier,
        }
    }

    /// Parse dice notation
    pub fn parse(notation: &str) -> Result<Self, DiceError> {
        parse_dice(notation)
    }

    /// Minimum possible result
    pub fn min(&self) -> i32 {
        (self.count as i32).saturating_add(self.modifier)
    }

    /// Maximum possible result
    pub fn max(&self) -> i32 {
        ((self.count * self.sides) as i32).saturating_add(self.modifier)
    }

    /// Expected average (rounded down)
    pub fn average(&self) -> i32 {
        let avg_per_die = (1.0 + self.sides as f64) / 2.0;
        (self.count as f64 * avg_per_die + self.modifier as f64) as i32
    }
}

impl FromStr for DiceExpr {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_dice(s)
    }
}

impl fmt::Display for DiceExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.modifier > 0 {
            write!(f, "{}d{}+{}", self.count, self.sides, self.modifier)
        } else if self.modifier < 0 {
            write!(f, "{}d{}{}", self.count, self.sides, self.modifier)
        } else {
            write!(f, "{}d{}", self.count, self.sides)
        }
    }
}

/// Parse a dice notation string like "2d6+3"
pub fn parse_dice(notation: &str) -> Result<DiceExpr, DiceError> {
    let notation = notation.trim().to_lowercase();
    if notation.is_empty() {
        return Err(DiceError::Empty);
    }

    let d_pos = notation
        .find('d')
        .ok_or_else(|| DiceError::MissingSeparator(notation.clone()))?;

    // "d6" means "1d6"
    let count_str = &notation[..d_pos];
    let count: u32 = if count_str.is_empty() {
        1
    } else {
        count_str
            .parse()
            .map_err(|_| DiceError::InvalidCount(count_str.to_string()))?
    };
    if count == 0 || count > MAX_DICE {
        return Err(DiceError::CountOutOfRange(count));
    }

    let rest = &notation[d_pos + 1..];
    let (sides_str, modifier) = if let Some(plus_pos) = rest.find('+') {
        let mod_str = &rest[plus_pos + 1..];
        let modifier: i32 = mod_str
            .parse()
            .map_err(|_| DiceError::InvalidModifier(mod_str.to_string()))?;
        (&rest[..plus_pos], modifier)
    } else if let Some(minus_pos) = rest.rfind('-').filter(|&pos| pos > 0) {
        // Keep the sign with the modifier
        let mod_str = &rest[minus_pos..];
        let modifier: i32 = mod_str
            .parse()
            .map_err(|_| DiceError::InvalidModifier(mod_str.to_string()))?;
        (&rest[..minus_pos], modifier)
    } else {
        (rest, 0)
    };

    let sides: u32 = sides_str
        .parse()
        .map_err(|_| DiceError::InvalidSides(sides_str.to_string()))?;
    if sides == 0 || sides > MAX_SIDES {
        return Err(DiceError::SidesOutOfRange(sides));
    }

    Ok(DiceExpr {
        count,
        sides,
        modifier,
    })
}

/// Natural 20 on a d20
pub fn is_critical(face: u32) -> bool {
    face == 20
}

/// Natural 1 on a d20
pub fn is_fumble(face: u32) -> bool {
    face == 1
}

/// Source of individual die faces
pub trait DieSource {
    /// Roll one die, returning a face in `1..=sides`
    fn roll_die(&mut self, sides: u32) -> u32;
}

/// [`DieSource`] backed by any `rand` generator
#[derive(Debug, Clone)]
pub struct RngSource<R>(R);

impl<R: Rng> RngSource<R> {
    pub fn new(rng: R) -> Self {
        Self(rng)
    }
}

impl RngSource<rand::rngs::StdRng> {
    /// Deterministic source for replays and tests
    pub fn seeded(seed: u64) -> Self {
        use rand::SeedableRng;
        Self(rand::rngs::StdRng::seed_from_u64(seed))
    }

    /// Source seeded from the operating system
    pub fn from_os() -> Self {
        use rand::SeedableRng;
        Self(rand::rngs::StdRng::from_os_rng())
    }
}

impl<R: Rng> DieSource for RngSource<R> {
    fn roll_die(&mut self, sides: u32) -> u32 {
        self.0.random_range(1..=sides.max(1))
    }
}

/// Replays a fixed queue of faces
///
/// Faces are clamped into `1..=sides`. Once the queue runs dry every roll
/// returns 1 and is counted in [`ScriptedDice::underflows`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedDice {
    faces: VecDeque<u32>,
    underflows: usize,
}

impl ScriptedDice {
    pub fn new(faces: impl IntoIterator<Item = u32>) -> Self {
        Self {
            faces: faces.into_iter().collect(),
            underflows: 0,
        }
    }

    /// Queue more faces behind the current ones
    pub fn push(&mut self, faces: impl IntoIterator<Item = u32>) {
        self.faces.extend(faces);
    }

    /// Faces not yet consumed
    pub fn remaining(&self) -> usize {
        self.faces.len()
    }

    /// Rolls requested after the queue was empty
    pub fn underflows(&self) -> usize {
        self.underflows
    }
}

impl DieSource for ScriptedDice {
    fn roll_die(&mut self, sides: u32) -> u32 {
        match self.faces.pop_front() {
            Some(face) => face.clamp(1, sides.max(1)),
            None => {
                self.underflows += 1;
                1
            }
        }
    }
}

/// How a d20 check is rolled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollMode {
    #[default]
    Normal,
    Advantage,
    Disadvantage,
}

impl RollMode {
    /// Advantage and disadvantage together cancel to a normal roll
    pub fn from_flags(advantage: bool, disadvantage: bool) -> Self {
        match (advantage, disadvantage) {
            (true, false) => RollMode::Advantage,
            (false, true) => RollMode::Disadvantage,
            _ => RollMode::Normal,
        }
    }
}

/// Faces rolled for a d20 check and the one kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct D20Roll {
    pub kept: u32,
    pub dice: Vec<u32>,
}

/// Individual faces and total of a rolled expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiceOutcome {
    pub dice: Vec<u32>,
    /// Sum of the faces plus the expression's own modifier
    pub total: i32,
}

/// Rolls dice expressions against a [`DieSource`]
#[derive(Debug, Clone)]
pub struct DiceRoller<S> {
    source: S,
}

impl<S: DieSource> DiceRoller<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Parse and roll an expression
    pub fn roll(&mut self, notation: &str) -> Result<DiceOutcome, DiceError> {
        let expr = parse_dice(notation)?;
        Ok(self.roll_expr(&expr))
    }

    /// Roll an already parsed expression
    pub fn roll_expr(&mut self, expr: &DiceExpr) -> DiceOutcome {
        let dice: Vec<u32> = (0..expr.count)
            .map(|_| self.source.roll_die(expr.sides))
            .collect();
        let sum: u32 = dice.iter().sum();
        DiceOutcome {
            total: (sum as i32).saturating_add(expr.modifier),
            dice,
        }
    }

    /// Roll a single d20
    pub fn roll_d20(&mut self) -> u32 {
        self.source.roll_die(20)
    }

    /// Roll two d20 and keep the higher
    pub fn roll_advantage(&mut self) -> D20Roll {
        self.roll_check(RollMode::Advantage)
    }

    /// Roll two d20 and keep the lower
    pub fn roll_disadvantage(&mut self) -> D20Roll {
        self.roll_check(RollMode::Disadvantage)
    }

    /// Roll a d20 check in the given mode
    pub fn roll_check(&mut self, mode: RollMode) -> D20Roll {
        match mode {
            RollMode::Normal => {
                let face = self.roll_d20();
                D20Roll {
                    kept: face,
                    dice: vec![face],
                }
            }
            RollMode::Advantage | RollMode::Disadvantage => {
                let first = self.roll_d20();
                let second = self.roll_d20();
                let kept = if mode == RollMode::Advantage {
                    first.max(second)
                } else {
                    first.min(second)
                };
                D20Roll {
                    kept,
                    dice: vec![first, second],
                }
            }
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let expr = parse_dice("2d6").unwrap();
        assert_eq!(expr, DiceExpr::new(2, 6, 0));
    }

    #[test]
    fn test_parse_with_modifiers() {
        assert_eq!(parse_dice("1d20+5").unwrap(), DiceExpr::new(1, 20, 5));
        assert_eq!(parse_dice("3d8-2").unwrap(), DiceExpr::new(3, 8, -2));
    }

    #[test]
    fn test_parse_implicit_one_and_case() {
        assert_eq!(parse_dice("d6").unwrap(), DiceExpr::new(1, 6, 0));
        assert_eq!(parse_dice("  2D10+3 ").unwrap(), DiceExpr::new(2, 10, 3));
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(parse_dice(""), Err(DiceError::Empty));
        assert!(matches!(
            parse_dice("abc"),
            Err(DiceError::MissingSeparator(_))
        ));
        assert!(matches!(parse_dice("2d"), Err(DiceError::InvalidSides(_))));
        assert!(matches!(parse_dice("xd6"), Err(DiceError::InvalidCount(_))));
        assert!(matches!(
            parse_dice("2d6+"),
            Err(DiceError::InvalidModifier(_))
        ));
        assert_eq!(parse_dice("0d6"), Err(DiceError::CountOutOfRange(0)));
        assert_eq!(parse_dice("2d0"), Err(DiceError::SidesOutOfRange(0)));
        assert_eq!(parse_dice("101d6"), Err(DiceError::CountOutOfRange(101)));
    }

    #[test]
    fn test_display() {
        assert_eq!(DiceExpr::new(2, 6, 0).to_string(), "2d6");
        assert_eq!(DiceExpr::new(1, 20, 5).to_string(), "1d20+5");
        assert_eq!(DiceExpr::new(3, 8, -2).to_string(), "3d8-2");
    }

    #[test]
    fn test_min_max_average() {
        let expr = DiceExpr::new(2, 6, 3);
        assert_eq!(expr.min(), 5);
        assert_eq!(expr.max(), 15);
        assert_eq!(expr.average(), 10);
    }

    #[test]
    fn test_scripted_roll_reports_faces() {
        let mut roller = DiceRoller::new(ScriptedDice::new([4, 5]));
        let outcome = roller.roll("2d6").unwrap();
        assert_eq!(outcome.dice, vec![4, 5]);
        assert_eq!(outcome.total, 9);
    }

    #[test]
    fn test_parse_error_consumes_nothing() {
        let mut roller = DiceRoller::new(ScriptedDice::new([4, 5]));
        assert!(roller.roll("2x6").is_err());
        assert_eq!(roller.source().remaining(), 2);
    }

    #[test]
    fn test_scripted_clamps_and_underflows() {
        let mut dice = ScriptedDice::new([9]);
        assert_eq!(dice.roll_die(6), 6);
        assert_eq!(dice.roll_die(6), 1);
        assert_eq!(dice.underflows(), 1);
    }

    #[test]
    fn test_advantage_keeps_higher() {
        let mut roller = DiceRoller::new(ScriptedDice::new([7, 15, 7, 15]));
        let adv = roller.roll_advantage();
        assert_eq!(adv.kept, 15);
        assert_eq!(adv.dice, vec![7, 15]);

        let dis = roller.roll_disadvantage();
        assert_eq!(dis.kept, 7);
    }

    #[test]
    fn test_roll_mode_cancels() {
        assert_eq!(RollMode::from_flags(true, true), RollMode::Normal);
        assert_eq!(RollMode::from_flags(false, false), RollMode::Normal);
        assert_eq!(RollMode::from_flags(true, false), RollMode::Advantage);
        assert_eq!(RollMode::from_flags(false, true), RollMode::Disadvantage);
    }

    #[test]
    fn test_seeded_roll_bounds() {
        let mut roller = DiceRoller::new(RngSource::seeded(42));
        for _ in 0..100 {
            let outcome = roller.roll("2d6+1").unwrap();
            assert!((3..=13).contains(&outcome.total));
            assert!(outcome.dice.iter().all(|d| (1..=6).contains(d)));
        }
    }

    #[test]
    fn test_seeded_sources_agree() {
        let mut a = DiceRoller::new(RngSource::seeded(7));
        let mut b = DiceRoller::new(RngSource::seeded(7));
        let left: Vec<u32> = (0..20).map(|_| a.roll_d20()).collect();
        let right: Vec<u32> = (0..20).map(|_| b.roll_d20()).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn test_critical_fumble() {
        assert!(is_critical(20));
        assert!(!is_critical(19));
        assert!(is_fumble(1));
        assert!(!is_fumble(2));
    }

    #[test]
    fn test_huge_modifier_saturates() {
        let mut roller = DiceRoller::new(ScriptedDice::new([6]));
        let outcome = roller.roll("1d6+2147483647").unwrap();
        assert_eq!(outcome.total, i32::MAX);

        let expr = parse_dice("2d6+2147483647").unwrap();
        assert_eq!(expr.max(), i32::MAX);
    }
}

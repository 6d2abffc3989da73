//! Damage types and modifiers
//!
//! Handles damage calculation with:
//! - The thirteen damage types (fire, cold, slashing, etc.)
//! - Resistance (50% damage, rounded down)
//! - Immunity (0% damage)
//! - Vulnerability (200% damage)

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Types of damage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageType {
    /// Corrosive liquids, digestive enzymes
    Acid,
    /// Blunt force: hammers, falling, constriction
    Bludgeoning,
    /// Cold/ice damage
    Cold,
    /// Fire damage
    Fire,
    /// Pure magical energy
    Force,
    /// Lightning/electric damage
    Lightning,
    /// Necrotic/death damage
    Necrotic,
    /// Piercing damage (arrows, spears, bites)
    Piercing,
    /// Poison damage
    Poison,
    /// Psychic/mental damage
    Psychic,
    /// Radiant/holy damage
    Radiant,
    /// Slashing damage (swords, axes, claws)
    Slashing,
    /// Thunder/sonic damage
    Thunder,
}

impl DamageType {
    /// Get all damage types
    pub fn all() -> &'static [DamageType] {
        &[
            DamageType::Acid,
            DamageType::Bludgeoning,
            DamageType::Cold,
            DamageType::Fire,
            DamageType::Force,
            DamageType::Lightning,
            DamageType::Necrotic,
            DamageType::Piercing,
            DamageType::Poison,
            DamageType::Psychic,
            DamageType::Radiant,
            DamageType::Slashing,
            DamageType::Thunder,
        ]
    }

    /// Whether this is one of the weapon damage types
    pub fn is_physical(&self) -> bool {
        matches!(
            self,
            DamageType::Bludgeoning | DamageType::Piercing | DamageType::Slashing
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown damage type: {0}")]
pub struct UnknownDamageType(pub String);

impl FromStr for DamageType {
    type Err = UnknownDamageType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "acid" => Ok(DamageType::Acid),
            "bludgeoning" => Ok(DamageType::Bludgeoning),
            "cold" | "ice" => Ok(DamageType::Cold),
            "fire" => Ok(DamageType::Fire),
            "force" => Ok(DamageType::Force),
            "lightning" | "electric" => Ok(DamageType::Lightning),
            "necrotic" => Ok(DamageType::Necrotic),
            "piercing" => Ok(DamageType::Piercing),
            "poison" => Ok(DamageType::Poison),
            "psychic" => Ok(DamageType::Psychic),
            "radiant" => Ok(DamageType::Radiant),
            "slashing" => Ok(DamageType::Slashing),
            "thunder" | "sonic" => Ok(DamageType::Thunder),
            other => Err(UnknownDamageType(other.to_string())),
        }
    }
}

impl fmt::Display for DamageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DamageType::Acid => "acid",
            DamageType::Bludgeoning => "bludgeoning",
            DamageType::Cold => "cold",
            DamageType::Fire => "fire",
            DamageType::Force => "force",
            DamageType::Lightning => "lightning",
            DamageType::Necrotic => "necrotic",
            DamageType::Piercing => "piercing",
            DamageType::Poison => "poison",
            DamageType::Psychic => "psychic",
            DamageType::Radiant => "radiant",
            DamageType::Slashing => "slashing",
            DamageType::Thunder => "thunder",
        };
        write!(f, "{}", s)
    }
}

/// Modifier for damage resistance/immunity/vulnerability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageModifier {
    /// Resistant - takes 50% damage (rounded down)
    Resistant,
    /// Immune - takes 0% damage
    Immune,
    /// Vulnerable - takes 200% damage
    Vulnerable,
    /// Normal - takes 100% damage
    Normal,
}

impl DamageModifier {
    /// Apply this modifier to a damage amount
    pub fn apply(&self, damage: i32) -> i32 {
        match self {
            DamageModifier::Resistant => damage.div_euclid(2),
            DamageModifier::Immune => 0,
            DamageModifier::Vulnerable => damage.saturating_mul(2),
            DamageModifier::Normal => damage,
        }
    }

    /// Get the multiplier as a percentage
    pub fn percentage(&self) -> u32 {
        match self {
            DamageModifier::Resistant => 50,
            DamageModifier::Immune => 0,
            DamageModifier::Vulnerable => 200,
            DamageModifier::Normal => 100,
        }
    }
}

/// An amount of typed damage waiting to be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Damage {
    pub amount: i32,
    pub damage_type: DamageType,
}

impl Damage {
    /// Negative amounts (a 1d4-3 that rolled low) deal no damage
    pub fn new(amount: i32, damage_type: DamageType) -> Self {
        Self {
            amount: amount.max(0),
            damage_type,
        }
    }
}

/// Damage profile for a creature
///
/// The three sets may overlap; lookups resolve resistance first, then
/// immunity, then vulnerability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageProfile {
    #[serde(default)]
    pub resistances: BTreeSet<DamageType>,
    #[serde(default)]
    pub immunities: BTreeSet<DamageType>,
    #[serde(default)]
    pub vulnerabilities: BTreeSet<DamageType>,
}

impl DamageProfile {
    /// Create a new empty damage profile (all normal)
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the modifier for a damage type
    pub fn modifier_for(&self, dtype: DamageType) -> DamageModifier {
        if self.resistances.contains(&dtype) {
            DamageModifier::Resistant
        } else if self.immunities.contains(&dtype) {
            DamageModifier::Immune
        } else if self.vulnerabilities.contains(&dtype) {
            DamageModifier::Vulnerable
        } else {
            DamageModifier::Normal
        }
    }

    /// Damage after applying this profile
    pub fn adjust(&self, damage: Damage) -> i32 {
        self.modifier_for(damage.damage_type).apply(damage.amount)
    }

    pub fn add_resistance(&mut self, dtype: DamageType) {
        self.resistances.insert(dtype);
    }

    pub fn add_immunity(&mut self, dtype: DamageType) {
        self.immunities.insert(dtype);
    }

    pub fn add_vulnerability(&mut self, dtype: DamageType) {
        self.vulnerabilities.insert(dtype);
    }

    /// Drop every modifier for a damage type
    pub fn clear(&mut self, dtype: DamageType) {
        self.resistances.remove(&dtype);
        self.immunities.remove(&dtype);
        self.vulnerabilities.remove(&dtype);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_damage_modifier_apply() {
        assert_eq!(DamageModifier::Immune.apply(10), 0);
        assert_eq!(DamageModifier::Resistant.apply(10), 5);
        assert_eq!(DamageModifier::Resistant.apply(7), 3);
        assert_eq!(DamageModifier::Normal.apply(10), 10);
        assert_eq!(DamageModifier::Vulnerable.apply(10), 20);
    }

    #[test]
    fn test_damage_profile() {
        let mut profile = DamageProfile::new();
        assert_eq!(profile.modifier_for(DamageType::Fire), DamageModifier::Normal);

        profile.add_immunity(DamageType::Fire);
        profile.add_resistance(DamageType::Cold);
        profile.add_vulnerability(DamageType::Poison);

        assert_eq!(profile.modifier_for(DamageType::Fire), DamageModifier::Immune);
        assert_eq!(profile.modifier_for(DamageType::Cold), DamageModifier::Resistant);
        assert_eq!(
            profile.modifier_for(DamageType::Poison),
            DamageModifier::Vulnerable
        );

        profile.clear(DamageType::Fire);
        assert_eq!(profile.modifier_for(DamageType::Fire), DamageModifier::Normal);
    }

    #[test]
    fn test_resistance_wins_over_other_modifiers() {
        let mut profile = DamageProfile::new();
        profile.add_resistance(DamageType::Fire);
        profile.add_immunity(DamageType::Fire);
        profile.add_vulnerability(DamageType::Fire);
        assert_eq!(profile.adjust(Damage::new(9, DamageType::Fire)), 4);

        let mut profile = DamageProfile::new();
        profile.add_immunity(DamageType::Cold);
        profile.add_vulnerability(DamageType::Cold);
        assert_eq!(profile.adjust(Damage::new(9, DamageType::Cold)), 0);
    }

    #[test]
    fn test_negative_damage_is_zero() {
        assert_eq!(Damage::new(-2, DamageType::Acid).amount, 0);
    }

    #[test]
    fn test_damage_type_parsing() {
        assert_eq!("fire".parse::<DamageType>(), Ok(DamageType::Fire));
        assert_eq!("FIRE".parse::<DamageType>(), Ok(DamageType::Fire));
        assert_eq!("ice".parse::<DamageType>(), Ok(DamageType::Cold));
        assert!("invalid".parse::<DamageType>().is_err());
        for dtype in DamageType::all() {
            assert_eq!(dtype.to_string().parse::<DamageType>(), Ok(*dtype));
        }
    }

    #[test]
    fn test_profile_serializes_as_sets() {
        let mut profile = DamageProfile::new();
        profile.add_resistance(DamageType::Slashing);
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["resistances"], serde_json::json!(["slashing"]));
        assert_eq!(json["immunities"], serde_json::json!([]));
    }
}

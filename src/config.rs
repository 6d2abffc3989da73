//! Configuration
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `COMBATD_`-prefixed environment variables (`__` separates nested keys,
//! e.g. `COMBATD_RULES__UNCONSCIOUS_TURNS=skip`).

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Config file read when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "combatd.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "COMBATD_";

/// How `next_turn` treats combatants dying at 0 HP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnconsciousTurnPolicy {
    /// They get a turn, spent on a death saving throw
    #[default]
    DeathSave,
    /// They are passed over; death saves must be driven by the caller
    Skip,
}

/// Rule switches for the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub unconscious_turns: UnconsciousTurnPolicy,
    /// End the combat when `next_turn` finds nobody who can take a turn
    pub end_when_no_eligible: bool,
    /// Round limit for simulated encounters
    pub max_round: Option<u32>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            unconscious_turns: UnconsciousTurnPolicy::DeathSave,
            end_when_no_eligible: true,
            max_round: Some(100),
        }
    }
}

/// Process configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file for combat snapshots; None keeps them in memory
    pub db_path: Option<String>,
    /// tracing filter used when RUST_LOG is unset
    pub log_filter: String,
    /// Fixed dice seed for reproducible runs
    pub seed: Option<u64>,
    pub rules: RulesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            log_filter: "combatd=info".to_string(),
            seed: None,
            rules: RulesConfig::default(),
        }
    }
}

impl Config {
    /// The provider stack, for callers that want to merge more sources
    pub fn figment(path: Option<&Path>) -> Figment {
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load configuration; a missing file is not an error
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }
}

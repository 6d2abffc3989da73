//! combatd - combat resolution daemon and encounter simulator

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use combatd::combat::{CombatEngine, LifeState};
use combatd::db::Database;
use combatd::sim::{Encounter, Simulation};
use combatd::Config;

#[derive(Parser, Debug)]
#[command(name = "combatd", version, about = "Turn-based combat resolution engine")]
struct Cli {
    /// Configuration file (defaults to ./combatd.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Simulate an encounter file to the end
    Run {
        /// Encounter TOML file
        encounter: PathBuf,

        /// Dice seed, overriding the configured one
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn init_tracing(filter: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.to_string().into());
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_tracing(&config.log_filter, cli.json);

    match cli.command {
        Command::Run { encounter, seed } => run(&config, &encounter, seed).await,
    }
}

async fn run(config: &Config, path: &std::path::Path, seed: Option<u64>) -> Result<()> {
    let encounter = Encounter::load(path)?;

    let engine = match seed.or(config.seed) {
        Some(seed) => {
            info!("Using dice seed {}", seed);
            CombatEngine::seeded(seed)
        }
        None => CombatEngine::from_os(),
    }
    .with_rules(config.rules.clone());

    let db = match &config.db_path {
        Some(db_path) => Some(Database::new(Some(db_path.as_str())).await?),
        None => None,
    };
    let store = db.as_ref().map(Database::snapshots);

    let mut sim = Simulation::start(engine, &encounter)?;
    let outcome = sim.run_with_store(store.as_ref()).await?;

    println!("Combat {} ({})", sim.combat().id(), encounter.session_id);
    println!("Rounds: {}  Turns: {}", outcome.rounds, outcome.turns);
    match &outcome.winner {
        Some(side) => println!("Winner: {}", side),
        None => println!("No winner"),
    }
    for combatant in sim.combat().combatants() {
        let state = match combatant.life_state() {
            LifeState::Active => "standing",
            LifeState::Unstable => "dying",
            LifeState::Stable => "stable",
            LifeState::Dead => "dead",
        };
        println!(
            "  {:<20} {:>3}/{:<3} {}",
            combatant.name, combatant.hp, combatant.max_hp, state
        );
    }

    Ok(())
}

//! combatd_init - One-time database initialization tool
//!
//! Creates a fresh combat snapshot database.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// combatd database initialization tool
#[derive(Parser, Debug)]
#[command(
    name = "combatd_init",
    version,
    about = "Initialize a new combatd snapshot database"
)]
struct Args {
    /// Path to SQLite database file to create (must not exist)
    #[arg(short, long)]
    database: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "combatd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    combatd::init::init_database(&args.database).await?;

    Ok(())
}

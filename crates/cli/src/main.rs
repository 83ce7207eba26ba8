//! Tiffin CLI - database migrations, demo data, tokens and ledger audits.
//!
//! # Usage
//!
//! ```bash
//! # Apply dispatch database migrations
//! tiffin-cli migrate
//!
//! # Create a demo shop, user and captains around a point
//! tiffin-cli seed --lat 12.9716 --lng 77.5946 --captains 5
//!
//! # Issue a bearer token
//! tiffin-cli token --role captain --id 3 --ttl-hours 12
//!
//! # Compare a stored balance with its ledger
//! tiffin-cli audit --shop 1
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use tiffin_dispatch::models::Role;

mod commands;

#[derive(Parser)]
#[command(name = "tiffin-cli")]
#[command(author, version, about = "Tiffin CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate {
        /// Directory holding the migration files
        #[arg(long, default_value = "crates/dispatch/migrations")]
        source: String,
    },
    /// Seed a shop, a user and captains for local testing
    Seed {
        /// Latitude of the shop
        #[arg(long, default_value_t = 12.9716)]
        lat: f64,

        /// Longitude of the shop
        #[arg(long, default_value_t = 77.5946)]
        lng: f64,

        /// Captains to place around the shop
        #[arg(short, long, default_value_t = 3)]
        captains: u32,
    },
    /// Issue a signed bearer token
    Token {
        /// Principal role (`user`, `shop`, `captain`)
        #[arg(short, long)]
        role: Role,

        /// Principal ID
        #[arg(short, long)]
        id: i32,

        /// Hours until the token expires
        #[arg(long, default_value_t = 24)]
        ttl_hours: u64,
    },
    /// Audit a ledger account (the platform account unless a shop or
    /// captain is given)
    Audit {
        /// Shop ID to audit
        #[arg(long, conflicts_with = "captain")]
        shop: Option<i32>,

        /// Captain ID to audit
        #[arg(long)]
        captain: Option<i32>,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate { source } => commands::migrate::run(&source).await?,
        Commands::Seed { lat, lng, captains } => commands::seed::run(lat, lng, captains).await?,
        Commands::Token { role, id, ttl_hours } => commands::token::issue(role, id, ttl_hours)?,
        Commands::Audit { shop, captain } => commands::audit::run(shop, captain).await?,
    }
    Ok(())
}

//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! tiffin-cli migrate
//! tiffin-cli migrate --source /srv/tiffin/migrations
//! ```
//!
//! # Environment Variables
//!
//! - `DISPATCH_DATABASE_URL` (or `DATABASE_URL`) - `PostgreSQL` connection string
//!
//! Migrations are read from disk at run time so the CLI can be shipped
//! separately from the source tree.

use std::path::Path;

use sqlx::migrate::Migrator;
use tiffin_dispatch::db;
use tracing::info;

use super::{CommandError, database_url};

/// Apply every pending migration from `source`.
///
/// # Errors
///
/// Returns an error if the URL is missing, the directory cannot be read, or
/// a migration fails.
pub async fn run(source: &str) -> Result<(), CommandError> {
    let database_url = database_url()?;

    info!("Connecting to dispatch database...");
    let pool = db::create_pool(&database_url).await?;

    let migrator = Migrator::new(Path::new(source)).await?;
    info!(source, migrations = migrator.iter().count(), "Running dispatch migrations...");
    migrator.run(&pool).await?;

    info!("Dispatch migrations complete!");
    Ok(())
}

//! Database initialization module
//!
//! Provides one-time database setup for the combatd_init tool.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::db::Database;

/// Initialize a new combat snapshot database
///
/// # Errors
/// * Database file already exists
/// * Path is not valid UTF-8
/// * Database creation fails
pub async fn init_database(path: &Path) -> Result<()> {
    if path.exists() {
        bail!(
            "Database file already exists: {}. Remove it first or use a different path.",
            path.display()
        );
    }

    let path_str = path
        .to_str()
        .with_context(|| format!("Database path is not valid UTF-8: {}", path.display()))?;

    info!("Creating new database at {}", path.display());

    // Create the database (runs migrations)
    let db = Database::new(Some(path_str)).await?;
    db.health_check().await?;

    info!("Database initialization complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_database_creates_new() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        init_database(&db_path).await.unwrap();
        assert!(db_path.exists());

        let db = Database::new(Some(db_path.to_str().unwrap())).await.unwrap();
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM combats")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn test_init_database_fails_if_exists() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        init_database(&db_path).await.unwrap();

        let result = init_database(&db_path).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("already exists"));
    }
}

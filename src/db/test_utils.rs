//! Shared test utilities for database operations

use super::{Database, SnapshotStore};

/// Snapshot store over a fresh in-memory database with the full schema
///
/// Goes through `Database::new(None)` so tests run against the same
/// migrations as production.
pub async fn test_store() -> SnapshotStore {
    let db = Database::new(None)
        .await
        .expect("Failed to create test database");
    db.snapshots()
}

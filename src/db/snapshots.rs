//! Combat snapshot persistence
//!
//! Each combat is stored as one row: a few queryable columns next to the
//! full JSON snapshot. Saving is an upsert keyed by combat id.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::debug;

use crate::combat::{Combat, CombatId};

/// Persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("snapshot encoding error: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("invalid combat id in store: {0}")]
    InvalidId(#[from] uuid::Error),

    #[error("invalid timestamp in store: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("invalid round in store: {0}")]
    InvalidRound(i64),
}

/// Summary row for listing combats without decoding their snapshots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCombat {
    pub id: CombatId,
    pub session_id: String,
    pub round: u32,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

/// Snapshot storage with database backing
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    pool: SqlitePool,
}

impl SnapshotStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a combat's snapshot
    pub async fn save(&self, combat: &Combat) -> Result<(), StoreError> {
        let snapshot = serde_json::to_string(combat)?;
        let updated_at = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO combats (id, session_id, round, is_active, snapshot, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                session_id = excluded.session_id,
                round = excluded.round,
                is_active = excluded.is_active,
                snapshot = excluded.snapshot,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(combat.id().to_string())
        .bind(combat.session_id())
        .bind(i64::from(combat.round()))
        .bind(combat.is_active())
        .bind(&snapshot)
        .bind(&updated_at)
        .execute(&self.pool)
        .await?;

        debug!("Saved combat {} at round {}", combat.id(), combat.round());
        Ok(())
    }

    /// Load a combat by id
    ///
    /// A stored snapshot that fails validation is reported as an encoding
    /// error rather than silently dropped.
    pub async fn load(&self, id: CombatId) -> Result<Option<Combat>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT snapshot FROM combats WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((snapshot,)) => Ok(Some(serde_json::from_str(&snapshot)?)),
            None => Ok(None),
        }
    }

    /// All combats stored for a session, most recently saved first
    pub async fn list_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<StoredCombat>, StoreError> {
        let rows: Vec<CombatRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, round, is_active, updated_at
            FROM combats WHERE session_id = ?
            ORDER BY updated_at DESC, id
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CombatRow::into_stored).collect()
    }

    /// Delete a combat, returning whether it existed
    pub async fn delete(&self, id: CombatId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM combats WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Row type for SQLite queries
#[derive(sqlx::FromRow)]
struct CombatRow {
    id: String,
    session_id: String,
    round: i64,
    is_active: bool,
    updated_at: String,
}

impl CombatRow {
    fn into_stored(self) -> Result<StoredCombat, StoreError> {
        Ok(StoredCombat {
            id: self.id.parse()?,
            session_id: self.session_id,
            round: u32::try_from(self.round).map_err(|_| StoreError::InvalidRound(self.round))?,
            is_active: self.is_active,
            updated_at: DateTime::parse_from_rfc3339(&self.updated_at)?.with_timezone(&Utc),
        })
    }
}

//! # Stage Cursor Repository
//!
//! Persists per-stage progress markers: a pagination position and the queue
//! of not-yet-submitted batch groups. Cursors survive process restarts; the
//! scheduler may re-invoke a stage minutes or hours later.
//!
//! Single-writer discipline: only the currently-executing stage invocation
//! touches its cursor, and the sequencer serializes invocations, so no row
//! locking is needed. What matters is durability: `save` completes before
//! the invocation returns.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use storelink_core::{StageCursor, SyncResource, SyncStage};

use crate::error::DbResult;

/// Repository for stage cursors.
#[derive(Debug, Clone)]
pub struct CursorRepository {
    pool: SqlitePool,
}

impl CursorRepository {
    /// Creates a new CursorRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CursorRepository { pool }
    }

    /// Loads the cursor for a stage, if one was persisted.
    pub async fn load(
        &self,
        resource: SyncResource,
        stage: SyncStage,
    ) -> DbResult<Option<StageCursor>> {
        let row = sqlx::query_as::<_, (u32, String)>(
            "SELECT position, pending FROM stage_cursors WHERE resource = ?1 AND stage = ?2",
        )
        .bind(resource.as_str())
        .bind(stage.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((position, pending_json)) => {
                let pending = serde_json::from_str(&pending_json)?;
                Ok(Some(StageCursor { position, pending }))
            }
            None => Ok(None),
        }
    }

    /// Persists the cursor for a stage (upsert).
    pub async fn save(
        &self,
        resource: SyncResource,
        stage: SyncStage,
        cursor: &StageCursor,
    ) -> DbResult<()> {
        let pending_json = serde_json::to_string(&cursor.pending)?;
        let now = Utc::now();

        debug!(
            resource = %resource,
            stage = %stage,
            position = cursor.position,
            pending = cursor.pending.len(),
            "Saving stage cursor"
        );

        sqlx::query(
            r#"
            INSERT INTO stage_cursors (resource, stage, position, pending, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (resource, stage) DO UPDATE SET
                position = excluded.position,
                pending = excluded.pending,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(resource.as_str())
        .bind(stage.as_str())
        .bind(cursor.position)
        .bind(&pending_json)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Removes the cursor for one stage.
    pub async fn clear(&self, resource: SyncResource, stage: SyncStage) -> DbResult<()> {
        sqlx::query("DELETE FROM stage_cursors WHERE resource = ?1 AND stage = ?2")
            .bind(resource.as_str())
            .bind(stage.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Removes every cursor of one resource (run completion).
    pub async fn clear_resource(&self, resource: SyncResource) -> DbResult<()> {
        sqlx::query("DELETE FROM stage_cursors WHERE resource = ?1")
            .bind(resource.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Removes every cursor (full reset).
    pub async fn clear_all(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM stage_cursors")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Number of persisted cursors, for diagnostics and tests.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stage_cursors")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use storelink_core::{into_batches, ItemRequest};

    #[tokio::test]
    async fn test_cursor_roundtrip_with_pending_queue() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.cursors();

        let items: Vec<ItemRequest> =
            (0..150).map(|i| ItemRequest::new(i, "saveProduct")).collect();
        let cursor = StageCursor::with_pending(into_batches(items));

        repo.save(SyncResource::Products, SyncStage::SendProducts, &cursor)
            .await
            .unwrap();

        let loaded = repo
            .load(SyncResource::Products, SyncStage::SendProducts)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.pending.len(), 2);
        assert_eq!(loaded.pending[0].len(), 100);
        assert_eq!(loaded.pending[1].len(), 50);
        assert_eq!(loaded.pending[0].items[0].request_id, 0);
    }

    #[tokio::test]
    async fn test_missing_cursor_is_absent() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let loaded = db
            .cursors()
            .load(SyncResource::Orders, SyncStage::OrdersPage)
            .await
            .unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_save_overwrites_previous_cursor() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.cursors();

        repo.save(
            SyncResource::Orders,
            SyncStage::OrdersPage,
            &StageCursor::at_position(1),
        )
        .await
        .unwrap();
        repo.save(
            SyncResource::Orders,
            SyncStage::OrdersPage,
            &StageCursor::at_position(2),
        )
        .await
        .unwrap();

        let loaded = repo
            .load(SyncResource::Orders, SyncStage::OrdersPage)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.position, 2);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear_all_removes_cursors() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.cursors();

        repo.save(
            SyncResource::Orders,
            SyncStage::OrdersPage,
            &StageCursor::at_position(3),
        )
        .await
        .unwrap();
        repo.save(
            SyncResource::Products,
            SyncStage::SendProducts,
            &StageCursor::default(),
        )
        .await
        .unwrap();

        assert_eq!(repo.clear_all().await.unwrap(), 2);
        assert_eq!(repo.count().await.unwrap(), 0);
    }
}

//! # Remote Identity Mapping Repository
//!
//! Durable annotations linking local entities to their ERP counterparts.
//!
//! ## Idempotency Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Once a mapping of a given kind exists for a local entity:             │
//! │                                                                         │
//! │  • create-type stages SKIP the entity (no duplicate remote record)     │
//! │  • update-type stages address it by the stored remote id               │
//! │  • only the full reset removes mappings, and it removes all of them    │
//! │                                                                         │
//! │  The mapping write happens in the same invocation that observed the    │
//! │  successful remote creation, before the invocation returns.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use storelink_core::{EntityKind, RemoteMapping};

use crate::error::DbResult;

/// Repository for remote identity mappings.
#[derive(Debug, Clone)]
pub struct MappingRepository {
    pool: SqlitePool,
}

impl MappingRepository {
    /// Creates a new MappingRepository.
    pub fn new(pool: SqlitePool) -> Self {
        MappingRepository { pool }
    }

    /// Remote id mapped to a local entity, if one exists.
    pub async fn get(&self, kind: EntityKind, local_id: i64) -> DbResult<Option<String>> {
        let remote_id = sqlx::query_scalar::<_, String>(
            "SELECT remote_id FROM remote_mappings WHERE kind = ?1 AND local_id = ?2",
        )
        .bind(kind.as_str())
        .bind(local_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(remote_id)
    }

    /// Remote id parsed as an integer, for kinds that map to numeric ERP ids.
    pub async fn get_numeric(&self, kind: EntityKind, local_id: i64) -> DbResult<Option<i64>> {
        Ok(self
            .get(kind, local_id)
            .await?
            .and_then(|id| id.parse::<i64>().ok()))
    }

    /// True when the entity already carries a mapping of the kind.
    pub async fn exists(&self, kind: EntityKind, local_id: i64) -> DbResult<bool> {
        Ok(self.get(kind, local_id).await?.is_some())
    }

    /// Records (or refreshes) a mapping.
    pub async fn set(
        &self,
        kind: EntityKind,
        local_id: i64,
        remote_id: impl std::fmt::Display,
    ) -> DbResult<()> {
        let remote_id = remote_id.to_string();
        let now = Utc::now();

        debug!(
            kind = %kind,
            local_id,
            remote_id = %remote_id,
            "Recording remote mapping"
        );

        sqlx::query(
            r#"
            INSERT INTO remote_mappings (kind, local_id, remote_id, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (kind, local_id) DO UPDATE SET remote_id = excluded.remote_id
            "#,
        )
        .bind(kind.as_str())
        .bind(local_id)
        .bind(&remote_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All mappings of one kind.
    pub async fn all_of_kind(&self, kind: EntityKind) -> DbResult<Vec<RemoteMapping>> {
        let rows = sqlx::query_as::<_, (i64, String, chrono::DateTime<Utc>)>(
            r#"
            SELECT local_id, remote_id, created_at
            FROM remote_mappings
            WHERE kind = ?1
            ORDER BY local_id ASC
            "#,
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(local_id, remote_id, created_at)| RemoteMapping {
                kind,
                local_id,
                remote_id,
                created_at,
            })
            .collect())
    }

    /// Numeric remote ids across several kinds (the archival stage's
    /// "locally mapped" set spans products and variations).
    pub async fn numeric_remote_ids(&self, kinds: &[EntityKind]) -> DbResult<Vec<i64>> {
        let mut ids = Vec::new();
        for kind in kinds {
            let rows = sqlx::query_scalar::<_, String>(
                "SELECT remote_id FROM remote_mappings WHERE kind = ?1",
            )
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;
            ids.extend(rows.into_iter().filter_map(|id| id.parse::<i64>().ok()));
        }
        Ok(ids)
    }

    /// Number of mappings of one kind.
    pub async fn count(&self, kind: EntityKind) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM remote_mappings WHERE kind = ?1")
                .bind(kind.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Removes every mapping of every kind. Part of the full reset, which
    /// must behave as one atomic clear.
    pub async fn clear_all(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM remote_mappings")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.mappings();

        assert!(repo.get(EntityKind::Product, 1).await.unwrap().is_none());

        repo.set(EntityKind::Product, 1, 501).await.unwrap();
        assert_eq!(
            repo.get(EntityKind::Product, 1).await.unwrap().as_deref(),
            Some("501")
        );
        assert_eq!(
            repo.get_numeric(EntityKind::Product, 1).await.unwrap(),
            Some(501)
        );

        // Same entity under another kind is independent
        assert!(repo.get(EntityKind::Coupon, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_twice_keeps_one_mapping() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.mappings();

        repo.set(EntityKind::Attribute, 7, 11).await.unwrap();
        repo.set(EntityKind::Attribute, 7, 11).await.unwrap();

        assert_eq!(repo.count(EntityKind::Attribute).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_numeric_ids_span_kinds() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.mappings();

        repo.set(EntityKind::Product, 1, 100).await.unwrap();
        repo.set(EntityKind::Variation, 2, 200).await.unwrap();
        repo.set(EntityKind::InvoiceLink, 3, "https://erp.example/i/3")
            .await
            .unwrap();

        let mut ids = repo
            .numeric_remote_ids(&[EntityKind::Product, EntityKind::Variation])
            .await
            .unwrap();
        ids.sort_unstable();
        assert_eq!(ids, vec![100, 200]);
    }

    #[tokio::test]
    async fn test_clear_all_removes_every_kind() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.mappings();

        repo.set(EntityKind::Product, 1, 100).await.unwrap();
        repo.set(EntityKind::Order, 9, 900).await.unwrap();

        let removed = repo.clear_all().await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(repo.count(EntityKind::Product).await.unwrap(), 0);
        assert_eq!(repo.count(EntityKind::Order).await.unwrap(), 0);
    }
}

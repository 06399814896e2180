//! # Sync Run Repository
//!
//! Lifecycle of one synchronization pass per resource.
//!
//! ## Run Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   idle ──start──► in_progress ──stages──► completed                     │
//! │                        │                                                │
//! │                        └──terminal error──► failed (operator restarts)  │
//! │                                                                         │
//! │   Every start issues a fresh run_id (UUID v4). Scheduled re-arms carry  │
//! │   the id they were armed with; if the persisted id differs (operator    │
//! │   reset or restart), the re-arm is stale and must no-op.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use storelink_core::{RunStatus, SyncResource, SyncRun, SyncStage};

use crate::error::DbResult;

/// Repository for sync run state.
#[derive(Debug, Clone)]
pub struct RunRepository {
    pool: SqlitePool,
}

impl RunRepository {
    /// Creates a new RunRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RunRepository { pool }
    }

    /// Current run state of a resource. A resource never synced returns the
    /// idle placeholder.
    pub async fn get(&self, resource: SyncResource) -> DbResult<SyncRun> {
        let row = sqlx::query_as::<
            _,
            (
                String,
                String,
                Option<String>,
                Option<DateTime<Utc>>,
                Option<DateTime<Utc>>,
                String,
            ),
        >(
            r#"
            SELECT run_id, status, stage, started_at, completed_at, status_line
            FROM sync_runs WHERE resource = ?1
            "#,
        )
        .bind(resource.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((run_id, status, stage, started_at, completed_at, status_line)) => Ok(SyncRun {
                resource,
                run_id,
                status: status.parse()?,
                stage: stage.map(|s| s.parse()).transpose()?,
                started_at,
                completed_at,
                status_line,
            }),
            None => Ok(SyncRun {
                resource,
                run_id: String::new(),
                status: RunStatus::Idle,
                stage: None,
                started_at: None,
                completed_at: None,
                status_line: String::new(),
            }),
        }
    }

    /// Starts a new run at the resource's first stage and returns it.
    ///
    /// Replaces any previous run row for the resource; the fresh run_id is
    /// what invalidates re-arms scheduled for the old run.
    pub async fn start(&self, resource: SyncResource) -> DbResult<SyncRun> {
        let run_id = Uuid::new_v4().to_string();
        let stage = SyncStage::first(resource);
        let now = Utc::now();
        let status_line = format!("Sync started at {}", now.format("%Y-%m-%d %H:%M:%S"));

        info!(resource = %resource, run_id = %run_id, "Starting sync run");

        sqlx::query(
            r#"
            INSERT INTO sync_runs
                (resource, run_id, status, stage, started_at, completed_at, status_line)
            VALUES (?1, ?2, 'in_progress', ?3, ?4, NULL, ?5)
            ON CONFLICT (resource) DO UPDATE SET
                run_id = excluded.run_id,
                status = excluded.status,
                stage = excluded.stage,
                started_at = excluded.started_at,
                completed_at = NULL,
                status_line = excluded.status_line
            "#,
        )
        .bind(resource.as_str())
        .bind(&run_id)
        .bind(stage.as_str())
        .bind(now)
        .bind(&status_line)
        .execute(&self.pool)
        .await?;

        Ok(SyncRun {
            resource,
            run_id,
            status: RunStatus::InProgress,
            stage: Some(stage),
            started_at: Some(now),
            completed_at: None,
            status_line,
        })
    }

    /// Persists the stage the sequencer will execute next.
    pub async fn set_stage(&self, resource: SyncResource, stage: SyncStage) -> DbResult<()> {
        debug!(resource = %resource, stage = %stage, "Advancing run stage");

        sqlx::query("UPDATE sync_runs SET stage = ?2 WHERE resource = ?1")
            .bind(resource.as_str())
            .bind(stage.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Marks the run failed with a timestamped operator-visible status line.
    pub async fn mark_failed(&self, resource: SyncResource) -> DbResult<()> {
        let now = Utc::now();
        let status_line = format!(
            "Last sync failed at {}. Refer to logs for more info",
            now.format("%d.%m.%Y %H:%M:%S")
        );

        sqlx::query(
            r#"
            UPDATE sync_runs SET status = 'failed', completed_at = ?2, status_line = ?3
            WHERE resource = ?1
            "#,
        )
        .bind(resource.as_str())
        .bind(now)
        .bind(&status_line)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Marks the run completed.
    pub async fn mark_completed(&self, resource: SyncResource) -> DbResult<()> {
        let now = Utc::now();
        let status_line = format!(
            "Last sync completed at {}",
            now.format("%Y-%m-%d %H:%M:%S")
        );

        info!(resource = %resource, "Sync run completed");

        sqlx::query(
            r#"
            UPDATE sync_runs
            SET status = 'completed', stage = NULL, completed_at = ?2, status_line = ?3
            WHERE resource = ?1
            "#,
        )
        .bind(resource.as_str())
        .bind(now)
        .bind(&status_line)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Removes every run row (full reset).
    pub async fn clear_all(&self) -> DbResult<()> {
        sqlx::query("DELETE FROM sync_runs")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

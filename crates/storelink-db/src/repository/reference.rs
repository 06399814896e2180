//! # Reference Cache Repository
//!
//! TTL-cached reference payloads pulled from the ERP: VAT rates, address
//! types, configuration parameters, the accumulated country list and its
//! incremental-pull watermark, payment types, warehouses and product groups.
//!
//! Payloads are opaque JSON strings here; the sync crate owns their shape.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;

// =============================================================================
// Cache Keys
// =============================================================================

/// Well-known cache keys. Kept in one place so purge semantics stay honest.
pub mod keys {
    /// Active VAT rates (TTL-cached).
    pub const VAT_RATES: &str = "vat_rates";
    /// Actively-used address types (TTL-cached).
    pub const ADDRESS_TYPES: &str = "address_types";
    /// ERP configuration parameters (TTL-cached).
    pub const CONF_PARAMETERS: &str = "conf_parameters";
    /// Accumulated country list (merged incrementally, no TTL).
    pub const COUNTRIES: &str = "countries";
    /// Unix timestamp of the last country pull (the `changedSince` value).
    pub const COUNTRIES_UPDATED: &str = "countries_updated";
    /// Invoice payment types (id → type).
    pub const PAYMENT_TYPES: &str = "payment_types";
    /// Allowed warehouses (id → name).
    pub const WAREHOUSES: &str = "warehouses";
    /// Product groups (id → name).
    pub const PRODUCT_GROUPS: &str = "product_groups";
}

/// Keys removed by the operator's purge action. Countries keep their
/// watermark-based freshness and the id→name lists are refreshed explicitly.
pub const PURGEABLE_KEYS: &[&str] = &[keys::VAT_RATES, keys::ADDRESS_TYPES, keys::CONF_PARAMETERS];

// =============================================================================
// Reference Repository
// =============================================================================

/// Repository for cached reference payloads.
#[derive(Debug, Clone)]
pub struct ReferenceRepository {
    pool: SqlitePool,
}

impl ReferenceRepository {
    /// Creates a new ReferenceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ReferenceRepository { pool }
    }

    /// Cached payload regardless of age.
    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let payload =
            sqlx::query_scalar::<_, String>("SELECT payload FROM reference_cache WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(payload)
    }

    /// Cached payload only when younger than `ttl_secs`.
    pub async fn get_fresh(&self, key: &str, ttl_secs: i64) -> DbResult<Option<String>> {
        let row = sqlx::query_as::<_, (String, DateTime<Utc>)>(
            "SELECT payload, fetched_at FROM reference_cache WHERE key = ?1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((payload, fetched_at)) => {
                let age = Utc::now().signed_duration_since(fetched_at).num_seconds();
                if age < ttl_secs {
                    debug!(key, age, "Reference cache hit");
                    Ok(Some(payload))
                } else {
                    debug!(key, age, "Reference cache stale");
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    /// Stores a payload with the current fetch time.
    pub async fn put(&self, key: &str, payload: &str) -> DbResult<()> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO reference_cache (key, payload, fetched_at) VALUES (?1, ?2, ?3)
            ON CONFLICT (key) DO UPDATE SET
                payload = excluded.payload,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(key)
        .bind(payload)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Removes one cached payload.
    pub async fn remove(&self, key: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM reference_cache WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Operator purge: drops the TTL caches so the next use re-fetches.
    pub async fn purge_ttl_caches(&self) -> DbResult<()> {
        for key in PURGEABLE_KEYS {
            self.remove(key).await?;
        }
        Ok(())
    }

    /// Full reset: removes the country cache and its watermark so a fresh
    /// sync pulls the complete list again.
    pub async fn clear_countries(&self) -> DbResult<()> {
        self.remove(keys::COUNTRIES).await?;
        self.remove(keys::COUNTRIES_UPDATED).await?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

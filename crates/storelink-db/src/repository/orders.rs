//! # Order Repository
//!
//! Read access to the storefront's sales snapshot (completed orders with
//! their lines and redeemed coupons, published coupons, shipping methods)
//! plus the pipeline-owned immediate-order queue.
//!
//! Order reads are paginated: the orders stage consumes one fixed-size page
//! per invocation and persists the page number in its cursor, which keeps
//! every invocation short and resumable.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use storelink_core::{Coupon, Order, OrderAddress, OrderLine, ShippingMethod};

use crate::error::DbResult;

// =============================================================================
// Constants
// =============================================================================

/// Orders consumed per page of the orders stage.
pub const ORDERS_PAGE_SIZE: u32 = 20;

// =============================================================================
// Order Repository
// =============================================================================

/// Repository for sales snapshot reads and the immediate-order queue.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Total number of order pages (completed orders / page size, rounded
    /// up). The orders stage re-arms itself while its cursor is below this.
    pub async fn completed_order_pages(&self) -> DbResult<u32> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE status = 'completed'")
                .fetch_one(&self.pool)
                .await?;

        Ok((count as u32).div_ceil(ORDERS_PAGE_SIZE))
    }

    /// One page of completed orders, id-ascending. Pages are 1-based.
    pub async fn completed_orders_page(&self, page: u32) -> DbResult<Vec<Order>> {
        let page = page.max(1);
        let offset = (page - 1) * ORDERS_PAGE_SIZE;

        debug!(page, "Loading completed orders page");

        let rows = sqlx::query(
            r#"
            SELECT * FROM orders
            WHERE status = 'completed'
            ORDER BY id ASC
            LIMIT ?1 OFFSET ?2
            "#,
        )
        .bind(ORDERS_PAGE_SIZE)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let mut order = order_from_row(&row)?;
            order.coupon_codes = self.coupon_codes_for_order(order.id).await?;
            orders.push(order);
        }

        Ok(orders)
    }

    /// Loads one order by id, with its coupon codes.
    pub async fn order_by_id(&self, order_id: i64) -> DbResult<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = ?1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let mut order = order_from_row(&row)?;
                order.coupon_codes = self.coupon_codes_for_order(order.id).await?;
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }

    async fn coupon_codes_for_order(&self, order_id: i64) -> DbResult<Vec<String>> {
        let codes = sqlx::query_scalar::<_, String>(
            "SELECT coupon_code FROM order_coupons WHERE order_id = ?1 ORDER BY coupon_code",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(codes)
    }

    /// Lines of one order, in insertion order.
    pub async fn lines_for_order(&self, order_id: i64) -> DbResult<Vec<OrderLine>> {
        let lines = sqlx::query_as::<_, OrderLine>(
            r#"
            SELECT id, order_id, product_id, variation_id, name, quantity, subtotal
            FROM order_lines
            WHERE order_id = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(lines)
    }

    // =========================================================================
    // Coupons
    // =========================================================================

    /// All published coupons with their product restrictions, id-ascending.
    pub async fn published_coupons(&self) -> DbResult<Vec<Coupon>> {
        let rows = sqlx::query(
            r#"
            SELECT id, code, discount_type, amount, minimum_amount, created_at, expires_at
            FROM coupons
            WHERE published = 1
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut coupons = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let product_ids = sqlx::query_scalar::<_, i64>(
                "SELECT product_id FROM coupon_products WHERE coupon_id = ?1 ORDER BY product_id",
            )
            .bind(id)
            .fetch_all(&self.pool)
            .await?;

            coupons.push(Coupon {
                id,
                code: row.try_get("code")?,
                discount_type: row.try_get("discount_type")?,
                amount: row.try_get("amount")?,
                minimum_amount: row.try_get("minimum_amount")?,
                created_at: row.try_get("created_at")?,
                expires_at: row.try_get("expires_at")?,
                product_ids,
            });
        }

        Ok(coupons)
    }

    /// Coupon id for a redeemed code, if the coupon still exists.
    pub async fn coupon_id_by_code(&self, code: &str) -> DbResult<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM coupons WHERE code = ?1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

        Ok(id)
    }

    // =========================================================================
    // Shipping Methods
    // =========================================================================

    /// Registered storefront shipping methods.
    pub async fn shipping_methods(&self) -> DbResult<Vec<ShippingMethod>> {
        let methods = sqlx::query_as::<_, ShippingMethod>(
            "SELECT code, title FROM shipping_methods ORDER BY code ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(methods)
    }

    // =========================================================================
    // Immediate-order Queue
    // =========================================================================

    /// Enqueues an order for immediate sync. Idempotent.
    pub async fn enqueue_order(&self, order_id: i64) -> DbResult<()> {
        let now = Utc::now();

        debug!(order_id, "Queuing order for immediate sync");

        sqlx::query(
            r#"
            INSERT INTO order_sync_queue (order_id, queued_at) VALUES (?1, ?2)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(order_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Queued order ids, oldest first.
    pub async fn queued_orders(&self) -> DbResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT order_id FROM order_sync_queue ORDER BY queued_at ASC, order_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Removes an order from the queue after a successful sync.
    pub async fn dequeue_order(&self, order_id: i64) -> DbResult<()> {
        sqlx::query("DELETE FROM order_sync_queue WHERE order_id = ?1")
            .bind(order_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

/// Hydrates an [`Order`] from a full `orders` row. Coupon codes are loaded
/// separately.
fn order_from_row(row: &SqliteRow) -> Result<Order, sqlx::Error> {
    let paid_at: Option<DateTime<Utc>> = row.try_get("paid_at")?;

    Ok(Order {
        id: row.try_get("id")?,
        currency: row.try_get("currency")?,
        created_at: row.try_get("created_at")?,
        paid_at,
        total: row.try_get("total")?,
        transaction_id: row.try_get("transaction_id")?,
        customer_user_id: row.try_get("customer_user_id")?,
        billing_first_name: row.try_get("billing_first_name")?,
        billing_last_name: row.try_get("billing_last_name")?,
        billing_email: row.try_get("billing_email")?,
        billing_phone: row.try_get("billing_phone")?,
        billing: OrderAddress {
            address1: row.try_get("billing_address1")?,
            address2: row.try_get("billing_address2")?,
            city: row.try_get("billing_city")?,
            state: row.try_get("billing_state")?,
            postcode: row.try_get("billing_postcode")?,
            country: row.try_get("billing_country")?,
            company: row.try_get("billing_company")?,
        },
        shipping: OrderAddress {
            address1: row.try_get("shipping_address1")?,
            address2: row.try_get("shipping_address2")?,
            city: row.try_get("shipping_city")?,
            state: row.try_get("shipping_state")?,
            postcode: row.try_get("shipping_postcode")?,
            country: row.try_get("shipping_country")?,
            company: row.try_get("shipping_company")?,
        },
        shipping_method_code: row.try_get("shipping_method_code")?,
        shipping_method_title: row.try_get("shipping_method_title")?,
        shipping_total: row.try_get("shipping_total")?,
        coupon_codes: Vec::new(),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    async fn seeded_db() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        // 25 completed orders and one pending one
        for i in 1..=26 {
            let status = if i <= 25 { "completed" } else { "pending" };
            sqlx::query(
                r#"
                INSERT INTO orders
                    (id, status, currency, created_at, total, billing_email)
                VALUES (?1, ?2, 'EUR', '2024-04-01T10:00:00Z', 50.0, 'buyer@example.com')
                "#,
            )
            .bind(i)
            .bind(status)
            .execute(db.pool())
            .await
            .unwrap();
        }

        sqlx::raw_sql(
            r#"
            INSERT INTO order_lines (id, order_id, product_id, name, quantity, subtotal)
            VALUES (1, 1, 11, 'Shirt', 2, 40.0);
            INSERT INTO order_coupons (order_id, coupon_code) VALUES (1, 'SPRING');
            INSERT INTO coupons (id, code, discount_type, amount, created_at)
            VALUES (70, 'SPRING', 'percent', 10.0, '2024-03-01T00:00:00Z');
            INSERT INTO coupon_products (coupon_id, product_id) VALUES (70, 11);
            INSERT INTO shipping_methods (code, title)
            VALUES ('flat_rate', 'Flat rate');
            "#,
        )
        .execute(db.pool())
        .await
        .unwrap();

        db
    }

    #[tokio::test]
    async fn test_page_math() {
        let db = seeded_db().await;
        // 25 completed orders at 20 per page
        assert_eq!(db.orders().completed_order_pages().await.unwrap(), 2);

        let page1 = db.orders().completed_orders_page(1).await.unwrap();
        assert_eq!(page1.len(), 20);
        assert_eq!(page1.first().unwrap().id, 1);

        let page2 = db.orders().completed_orders_page(2).await.unwrap();
        assert_eq!(page2.len(), 5);
        assert_eq!(page2.last().unwrap().id, 25);
    }

    #[tokio::test]
    async fn test_order_hydration() {
        let db = seeded_db().await;
        let order = db.orders().order_by_id(1).await.unwrap().unwrap();

        assert_eq!(order.currency, "EUR");
        assert_eq!(order.billing_email, "buyer@example.com");
        assert_eq!(order.coupon_codes, vec!["SPRING".to_string()]);
        assert!(order.paid_at.is_none());

        let lines = db.orders().lines_for_order(1).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].product_id, Some(11));
    }

    #[tokio::test]
    async fn test_coupons_with_product_restrictions() {
        let db = seeded_db().await;
        let coupons = db.orders().published_coupons().await.unwrap();

        assert_eq!(coupons.len(), 1);
        assert_eq!(coupons[0].code, "SPRING");
        assert_eq!(coupons[0].product_ids, vec![11]);

        assert_eq!(
            db.orders().coupon_id_by_code("SPRING").await.unwrap(),
            Some(70)
        );
        assert_eq!(db.orders().coupon_id_by_code("GONE").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_order_queue_fifo_and_dedup() {
        let db = seeded_db().await;
        let repo = db.orders();

        repo.enqueue_order(3).await.unwrap();
        repo.enqueue_order(1).await.unwrap();
        repo.enqueue_order(3).await.unwrap(); // duplicate ignored

        let queued = repo.queued_orders().await.unwrap();
        assert_eq!(queued.len(), 2);

        repo.dequeue_order(3).await.unwrap();
        assert_eq!(repo.queued_orders().await.unwrap(), vec![1]);
    }
}

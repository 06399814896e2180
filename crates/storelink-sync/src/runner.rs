//! # Stage Sequencer
//!
//! The central state machine: owns the database, the ERP client and the
//! configuration, executes exactly one stage per tick, and applies the
//! uniform transition rule to decide what happens next.
//!
//! ## Tick Anatomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  tick(resource, run_id)                                                 │
//! │       │                                                                 │
//! │       ├── persisted run_id differs, or run not in progress?            │
//! │       │        └─► Stale (a reset/restart superseded this re-arm)      │
//! │       ▼                                                                 │
//! │  execute persisted stage ──► StageOutcome                              │
//! │       │      (an Err never escapes: it becomes Failed here)            │
//! │       ▼                                                                 │
//! │  transition_for(outcome, drain delay)                                  │
//! │       ├── Rearm(d)          → NextTick::After(d)                       │
//! │       ├── RearmAtFullHour   → NextTick::After(secs to next hour)       │
//! │       ├── Fail(reason)      → run marked failed, NextTick::Failed      │
//! │       └── Advance           → next stage persisted (or run completed)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use storelink_core::schedule::{
    seconds_to_full_hour, transition_for, StageOutcome, Transition, REARM_ADVANCE,
    REARM_BEFORE_ARCHIVE, REARM_ORDER_PAGE, REARM_QUEUE_DRAIN,
};
use storelink_core::{EntityKind, RunStatus, SyncResource, SyncRun, SyncStage};
use storelink_db::Database;

use crate::client::ErpClient;
use crate::config::BridgeConfig;
use crate::error::SyncResult;
use crate::stages::{self, StageContext};

// =============================================================================
// Tick Report
// =============================================================================

/// What the scheduler should do after a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum NextTick {
    /// Re-invoke after the given delay.
    After(Duration),
    /// The run completed; stop re-arming.
    Completed,
    /// The run failed terminally; stop re-arming.
    Failed(String),
    /// The persisted run no longer matches this re-arm; do nothing.
    Stale,
}

// =============================================================================
// Sync Pipeline
// =============================================================================

/// The pipeline facade: run lifecycle, per-tick stage execution, full reset,
/// and the immediate-order queue.
pub struct SyncPipeline {
    db: Database,
    client: ErpClient,
    config: BridgeConfig,
}

impl SyncPipeline {
    pub fn new(db: Database, client: ErpClient, config: BridgeConfig) -> Self {
        SyncPipeline { db, client, config }
    }

    /// The underlying database handle (for the operator CLI).
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// The underlying ERP client (for the operator CLI).
    pub fn client(&self) -> &ErpClient {
        &self.client
    }

    // =========================================================================
    // Run Lifecycle
    // =========================================================================

    /// Starts a fresh run for the resource at its first stage. Leftover
    /// cursors of a previous run for this resource are dropped; mappings
    /// are kept (that is what makes restarts idempotent).
    pub async fn start(&self, resource: SyncResource) -> SyncResult<SyncRun> {
        self.db.cursors().clear_resource(resource).await?;
        let run = self.db.runs().start(resource).await?;
        Ok(run)
    }

    /// Current run state of a resource.
    pub async fn status(&self, resource: SyncResource) -> SyncResult<SyncRun> {
        Ok(self.db.runs().get(resource).await?)
    }

    /// Executes one stage invocation for the run identified by `run_id`.
    pub async fn tick(&self, resource: SyncResource, run_id: &str) -> SyncResult<NextTick> {
        let run = self.db.runs().get(resource).await?;

        if run.run_id != run_id || run.status != RunStatus::InProgress {
            debug!(resource = %resource, "Re-arm is stale, ignoring");
            return Ok(NextTick::Stale);
        }

        let Some(stage) = run.stage else {
            return Ok(NextTick::Completed);
        };

        info!(resource = %resource, stage = %stage, "Executing stage");

        let outcome = match self.run_stage(stage).await {
            Ok(outcome) => outcome,
            Err(err) => {
                // No error escapes an invocation; it becomes a terminal
                // failure consumed by the transition rule.
                error!(resource = %resource, stage = %stage, %err, "Stage invocation errored");
                StageOutcome::Failed(err.to_string())
            }
        };

        match transition_for(outcome, Self::drain_delay(stage)) {
            Transition::Rearm(delay) => {
                info!(resource = %resource, stage = %stage, ?delay, "Re-arming same stage");
                Ok(NextTick::After(delay))
            }
            Transition::RearmAtFullHour => {
                let delay = Duration::from_secs(seconds_to_full_hour(Utc::now()));
                info!(resource = %resource, stage = %stage, ?delay, "Re-arming at next full hour");
                Ok(NextTick::After(delay))
            }
            Transition::Fail(reason) => {
                warn!(resource = %resource, stage = %stage, reason = %reason, "Run failed");
                self.db.runs().mark_failed(resource).await?;
                Ok(NextTick::Failed(reason))
            }
            Transition::Advance => match stage.next(resource) {
                Some(next) => {
                    self.db.cursors().clear(resource, stage).await?;
                    self.db.runs().set_stage(resource, next).await?;
                    Ok(NextTick::After(Self::advance_delay(next)))
                }
                None => {
                    self.db.runs().mark_completed(resource).await?;
                    self.db.cursors().clear_resource(resource).await?;
                    Ok(NextTick::Completed)
                }
            },
        }
    }

    /// Dispatches one stage invocation.
    async fn run_stage(&self, stage: SyncStage) -> SyncResult<StageOutcome> {
        let ctx = StageContext {
            db: &self.db,
            client: &self.client,
            options: &self.config.sync,
        };

        match stage {
            SyncStage::Validate => stages::products::validate_products(&ctx).await,
            SyncStage::Attributes => stages::attributes::sync_attributes(&ctx).await,
            SyncStage::AttributeValues => stages::attributes::sync_attribute_values(&ctx).await,
            SyncStage::CollectProducts => stages::products::collect_products(&ctx).await,
            SyncStage::SendProducts => {
                stages::products::send_queue(&ctx, SyncStage::SendProducts, EntityKind::Product)
                    .await
            }
            SyncStage::CollectVariations => stages::products::collect_variations(&ctx).await,
            SyncStage::SendVariations => {
                stages::products::send_queue(&ctx, SyncStage::SendVariations, EntityKind::Variation)
                    .await
            }
            SyncStage::StockUpdate => stages::stock::update_stock(&ctx).await,
            SyncStage::Archive => stages::archive::archive_remote_orphans(&ctx).await,
            SyncStage::Coupons => stages::coupons::sync_coupons(&ctx).await,
            SyncStage::ShippingMethods => stages::shipping::sync_shipping_methods(&ctx).await,
            SyncStage::OrdersPage => stages::orders::sync_orders_page(&ctx).await,
        }
    }

    /// Spacing of `MoreWork` re-arms: order pages come every few minutes,
    /// batch queues one per hour window.
    fn drain_delay(stage: SyncStage) -> Duration {
        match stage {
            SyncStage::OrdersPage => REARM_ORDER_PAGE,
            _ => REARM_QUEUE_DRAIN,
        }
    }

    /// Spacing of stage advances; the archival pass gets extra settling
    /// time after the stock registration.
    fn advance_delay(next: SyncStage) -> Duration {
        match next {
            SyncStage::Archive => REARM_BEFORE_ARCHIVE,
            _ => REARM_ADVANCE,
        }
    }

    // =========================================================================
    // Full Reset
    // =========================================================================

    /// Operator reset: removes every remote mapping, every cursor and every
    /// run, plus the accumulated country list. The next sync recreates every
    /// remote record from scratch, and any in-flight re-arm goes stale.
    pub async fn reset(&self) -> SyncResult<()> {
        info!("Start resetting all synchronization data");

        let mappings = self.db.mappings().clear_all().await?;
        let cursors = self.db.cursors().clear_all().await?;
        self.db.runs().clear_all().await?;
        self.db.reference().clear_countries().await?;

        info!(mappings, cursors, "Finished resetting all synchronization data");
        Ok(())
    }

    // =========================================================================
    // Immediate-order Queue
    // =========================================================================

    /// Queues a payment-completed order for immediate sync, honoring the
    /// configuration flag. Returns whether the order was queued.
    pub async fn enqueue_paid_order(&self, order_id: i64) -> SyncResult<bool> {
        if !self.config.sync.sync_orders_immediately {
            return Ok(false);
        }
        if self.db.mappings().exists(EntityKind::Order, order_id).await? {
            return Ok(false);
        }

        self.db.orders().enqueue_order(order_id).await?;
        Ok(true)
    }

    /// Drains the immediate-order queue, oldest first, stopping at the
    /// first order that does not go through (the remainder stays queued for
    /// the next drain). Returns the number of orders synced.
    pub async fn sync_queued_orders(&self) -> SyncResult<usize> {
        let queued = self.db.orders().queued_orders().await?;
        if queued.is_empty() {
            return Ok(0);
        }

        let ctx = StageContext {
            db: &self.db,
            client: &self.client,
            options: &self.config.sync,
        };

        let env = match stages::orders::build_env(&ctx).await? {
            Ok(env) => env,
            Err(outcome) => {
                warn!(?outcome, "Deferring queued order sync");
                return Ok(0);
            }
        };

        let mut synced = 0;
        for order_id in queued {
            if self.db.mappings().exists(EntityKind::Order, order_id).await? {
                self.db.orders().dequeue_order(order_id).await?;
                continue;
            }

            let Some(order) = self.db.orders().order_by_id(order_id).await? else {
                warn!(order_id, "Queued order no longer exists, dropping");
                self.db.orders().dequeue_order(order_id).await?;
                continue;
            };

            match stages::orders::sync_single_order(&ctx, &order, &env).await? {
                Ok(()) => {
                    self.db.orders().dequeue_order(order_id).await?;
                    synced += 1;
                }
                Err(outcome) => {
                    warn!(order_id, ?outcome, "Stopping queue drain at first failure");
                    break;
                }
            }
        }

        Ok(synced)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use storelink_core::schedule::REARM_RATE_LIMITED;
    use storelink_db::DbConfig;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::ErpConfig;

    async fn pipeline_for(server: &MockServer) -> SyncPipeline {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut config = BridgeConfig::default();
        config.erp = ErpConfig {
            client_code: "123456".into(),
            username: "bridge".into(),
            password: "secret".into(),
            api_url: Some(format!("{}/api/", server.uri())),
        };

        let client = ErpClient::new(config.erp.clone()).unwrap();
        SyncPipeline::new(db, client, config)
    }

    async fn mount_auth(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/"))
            .and(body_string_contains("verifyUser"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"responseStatus": "ok"},
                "records": [{"sessionKey": "sess-1", "sessionLength": 3600}]
            })))
            .mount(server)
            .await;
    }

    async fn seed_attribute(pipeline: &SyncPipeline) {
        sqlx::raw_sql(
            r#"
            INSERT INTO attributes (id, label, slug) VALUES (10, 'Size', 'size');
            "#,
        )
        .execute(pipeline.database().pool())
        .await
        .unwrap();
    }

    fn dimension_batch_response() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "status": {"responseStatus": "ok"},
            "records": [],
            "requests": [{
                "status": {"requestID": 10, "responseStatus": "ok"},
                "records": [{"dimensionID": 77}]
            }]
        }))
    }

    async fn run_attributes_stage(pipeline: &SyncPipeline) -> NextTick {
        let run = pipeline.start(SyncResource::Products).await.unwrap();
        // Validate passes with no products seeded
        let first = pipeline
            .tick(SyncResource::Products, &run.run_id)
            .await
            .unwrap();
        assert_eq!(first, NextTick::After(REARM_ADVANCE));
        pipeline
            .tick(SyncResource::Products, &run.run_id)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_attribute_stage_records_mapping_once() {
        let server = MockServer::start().await;
        mount_auth(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/"))
            .and(body_string_contains("saveMatrixDimension"))
            .respond_with(dimension_batch_response())
            .mount(&server)
            .await;

        let pipeline = pipeline_for(&server).await;
        seed_attribute(&pipeline).await;

        // First pass creates the dimension and records exactly one mapping
        run_attributes_stage(&pipeline).await;
        let mappings = pipeline.database().mappings();
        assert_eq!(mappings.count(EntityKind::Attribute).await.unwrap(), 1);
        assert_eq!(
            mappings.get(EntityKind::Attribute, 10).await.unwrap().as_deref(),
            Some("77")
        );

        // Second pass: mapped attribute is skipped, no create resubmitted
        run_attributes_stage(&pipeline).await;
        assert_eq!(mappings.count(EntityKind::Attribute).await.unwrap(), 1);

        let creates = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| String::from_utf8_lossy(&r.body).contains("saveMatrixDimension"))
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn test_failed_batch_item_fails_the_run() {
        let server = MockServer::start().await;
        mount_auth(&server).await;

        // 5 items, item 3 rejected, the rest ok
        let requests: Vec<_> = (1..=5)
            .map(|i| {
                if i == 3 {
                    json!({
                        "status": {"requestID": i, "responseStatus": "error", "errorCode": 1011},
                        "records": []
                    })
                } else {
                    json!({
                        "status": {"requestID": i, "responseStatus": "ok"},
                        "records": [{"dimensionID": 100 + i}]
                    })
                }
            })
            .collect();

        Mock::given(method("POST"))
            .and(path("/api/"))
            .and(body_string_contains("saveMatrixDimension"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"responseStatus": "ok"},
                "records": [],
                "requests": requests
            })))
            .mount(&server)
            .await;

        let pipeline = pipeline_for(&server).await;
        sqlx::raw_sql(
            r#"
            INSERT INTO attributes (id, label, slug) VALUES
                (1, 'A', 'a'), (2, 'B', 'b'), (3, 'C', 'c'), (4, 'D', 'd'), (5, 'E', 'e');
            "#,
        )
        .execute(pipeline.database().pool())
        .await
        .unwrap();

        let result = run_attributes_stage(&pipeline).await;
        assert!(matches!(result, NextTick::Failed(_)));

        let run = pipeline.status(SyncResource::Products).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.status_line.starts_with("Last sync failed at"));
    }

    #[tokio::test]
    async fn test_rate_limit_rearms_without_consuming_progress() {
        let server = MockServer::start().await;
        mount_auth(&server).await;

        Mock::given(method("POST"))
            .and(path("/api/"))
            .and(body_string_contains("saveMatrixDimension"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let pipeline = pipeline_for(&server).await;
        seed_attribute(&pipeline).await;

        let result = run_attributes_stage(&pipeline).await;
        assert_eq!(result, NextTick::After(REARM_RATE_LIMITED));

        // Still in progress, same stage, nothing mapped
        let run = pipeline.status(SyncResource::Products).await.unwrap();
        assert_eq!(run.status, RunStatus::InProgress);
        assert_eq!(run.stage, Some(SyncStage::Attributes));
        assert_eq!(
            pipeline
                .database()
                .mappings()
                .count(EntityKind::Attribute)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_stale_run_id_noops() {
        let server = MockServer::start().await;
        let pipeline = pipeline_for(&server).await;

        let first = pipeline.start(SyncResource::Products).await.unwrap();
        // A second start (operator restart) supersedes the first run
        pipeline.start(SyncResource::Products).await.unwrap();

        let result = pipeline
            .tick(SyncResource::Products, &first.run_id)
            .await
            .unwrap();
        assert_eq!(result, NextTick::Stale);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_clears_mappings_and_cursors() {
        let server = MockServer::start().await;
        let pipeline = pipeline_for(&server).await;
        let db = pipeline.database();

        db.mappings()
            .set(EntityKind::Product, 1, 100)
            .await
            .unwrap();
        db.mappings().set(EntityKind::Order, 2, 200).await.unwrap();
        db.cursors()
            .save(
                SyncResource::Orders,
                SyncStage::OrdersPage,
                &storelink_core::StageCursor::at_position(4),
            )
            .await
            .unwrap();
        pipeline.start(SyncResource::Orders).await.unwrap();

        pipeline.reset().await.unwrap();

        assert_eq!(db.mappings().count(EntityKind::Product).await.unwrap(), 0);
        assert_eq!(db.mappings().count(EntityKind::Order).await.unwrap(), 0);
        assert_eq!(db.cursors().count().await.unwrap(), 0);
        let run = pipeline.status(SyncResource::Orders).await.unwrap();
        assert_eq!(run.status, RunStatus::Idle);
    }

    #[tokio::test]
    async fn test_stock_stage_submits_signed_deltas() {
        let server = MockServer::start().await;
        mount_auth(&server).await;

        // Remote knows two products: 100 at 8 in stock, 200 at 5
        Mock::given(method("POST"))
            .and(path("/api/"))
            .and(body_string_contains("getProductStock"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"responseStatus": "ok"},
                "records": [
                    {"productID": 100, "amountInStock": 8},
                    {"productID": 200, "amountInStock": 5}
                ]
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/"))
            .and(body_string_contains("saveInventoryRegistration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"responseStatus": "ok"},
                "records": [],
                "requests": [{
                    "status": {"requestID": 1, "responseStatus": "ok"},
                    "records": [{"inventoryRegistrationID": 900}]
                }]
            })))
            .mount(&server)
            .await;

        let pipeline = pipeline_for(&server).await;
        let db = pipeline.database();

        // local 5 vs remote 8 → −3; local 5 vs remote 5 → omitted; third
        // product local 4 vs unknown remote → +4
        sqlx::raw_sql(
            r#"
            INSERT INTO products (id, name, price, stock_quantity, is_variable, published)
            VALUES (1, 'P1', 10.0, 5, 0, 1),
                   (2, 'P2', 20.0, 5, 0, 1),
                   (3, 'P3', 30.0, 4, 0, 1);
            "#,
        )
        .execute(db.pool())
        .await
        .unwrap();
        db.mappings().set(EntityKind::Product, 1, 100).await.unwrap();
        db.mappings().set(EntityKind::Product, 2, 200).await.unwrap();
        db.mappings().set(EntityKind::Product, 3, 300).await.unwrap();

        let run = pipeline.start(SyncResource::Stocks).await.unwrap();
        let result = pipeline
            .tick(SyncResource::Stocks, &run.run_id)
            .await
            .unwrap();
        assert_eq!(result, NextTick::Completed);

        let registration = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .map(|r| String::from_utf8_lossy(&r.body).into_owned())
            .find(|b| b.contains("saveInventoryRegistration"))
            .expect("registration was sent");

        // Two lines: product 100 at −3, product 300 at +4; product 200 omitted
        assert!(registration.contains("-3"));
        assert!(!registration.contains("%22productID2%22%3A200"));

        let run = pipeline.status(SyncResource::Stocks).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.status_line.starts_with("Last sync completed at"));
    }

    #[tokio::test]
    async fn test_validation_rejects_four_attribute_product() {
        let server = MockServer::start().await;
        let pipeline = pipeline_for(&server).await;

        sqlx::raw_sql(
            r#"
            INSERT INTO products (id, name, price, stock_quantity, is_variable, published)
            VALUES (1, 'Overloaded', 10.0, 0, 1, 1);
            INSERT INTO product_attributes (product_id, slug, position)
            VALUES (1, 'size', 0), (1, 'color', 1), (1, 'fit', 2), (1, 'fabric', 3);
            "#,
        )
        .execute(pipeline.database().pool())
        .await
        .unwrap();

        let run = pipeline.start(SyncResource::Products).await.unwrap();
        let result = pipeline
            .tick(SyncResource::Products, &run.run_id)
            .await
            .unwrap();

        assert!(matches!(result, NextTick::Failed(_)));
        // Nothing reached the ERP
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_coupon_stage_excludes_mapped_and_unknown_types() {
        let server = MockServer::start().await;
        mount_auth(&server).await;

        Mock::given(method("POST"))
            .and(path("/api/"))
            .and(body_string_contains("saveCampaign"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"responseStatus": "ok"},
                "records": [],
                "requests": [{
                    "status": {"requestID": 1, "responseStatus": "ok"},
                    "records": [{"campaignID": 31}]
                }]
            })))
            .mount(&server)
            .await;

        let pipeline = pipeline_for(&server).await;
        sqlx::raw_sql(
            r#"
            INSERT INTO coupons (id, code, discount_type, amount, created_at) VALUES
                (1, 'SPRING', 'percent', 10.0, '2024-03-01T00:00:00Z'),
                (2, 'BOGO', 'buy_one_get_one', 0.0, '2024-03-01T00:00:00Z'),
                (3, 'OLD', 'percent', 5.0, '2024-01-01T00:00:00Z');
            "#,
        )
        .execute(pipeline.database().pool())
        .await
        .unwrap();
        // Coupon 3 is already mapped; campaign updates are unsupported
        pipeline
            .database()
            .mappings()
            .set(EntityKind::Coupon, 3, 30)
            .await
            .unwrap();

        let run = pipeline.start(SyncResource::Orders).await.unwrap();
        let result = pipeline
            .tick(SyncResource::Orders, &run.run_id)
            .await
            .unwrap();
        assert_eq!(result, NextTick::After(REARM_ADVANCE));

        // Only SPRING was submitted
        let bodies: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .map(|r| String::from_utf8_lossy(&r.body).into_owned())
            .filter(|b| b.contains("saveCampaign"))
            .collect();
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].contains("SPRING"));
        assert!(!bodies[0].contains("BOGO"));
        assert!(!bodies[0].contains("%22OLD%22"));

        let mappings = pipeline.database().mappings();
        assert_eq!(mappings.count(EntityKind::Coupon).await.unwrap(), 2);
        assert_eq!(
            mappings.get(EntityKind::Coupon, 1).await.unwrap().as_deref(),
            Some("31")
        );
    }

    async fn mount_order_flow(server: &MockServer) {
        let ok = |body: serde_json::Value| ResponseTemplate::new(200).set_body_json(body);

        for (needle, body) in [
            (
                "getVatRates",
                json!({
                    "status": {"responseStatus": "ok"},
                    "records": [{"id": 1, "name": "20%", "rate": 20.0, "active": 1}]
                }),
            ),
            (
                "getCurrencies",
                json!({
                    "status": {"responseStatus": "ok"},
                    "records": [{"code": "EUR"}]
                }),
            ),
            (
                "getDeliveryTypes",
                json!({"status": {"responseStatus": "ok"}, "records": []}),
            ),
            (
                "getConfParameters",
                json!({"status": {"responseStatus": "ok"}, "records": [{}]}),
            ),
            (
                "getCustomers",
                json!({"status": {"responseStatus": "ok"}, "records": []}),
            ),
            (
                "saveCustomer",
                json!({
                    "status": {"responseStatus": "ok"},
                    "records": [{"customerID": 501}]
                }),
            ),
            (
                "logProcessingOfCustomerData",
                json!({"status": {"responseStatus": "ok"}, "records": []}),
            ),
            (
                "saveAddress",
                json!({
                    "status": {"responseStatus": "ok"},
                    "records": [{"addressID": 601}]
                }),
            ),
            (
                "saveSalesDocument",
                json!({
                    "status": {"responseStatus": "ok"},
                    "records": [{"invoiceID": 701, "invoiceLink": "https://erp.example/701"}]
                }),
            ),
            (
                "savePayment",
                json!({"status": {"responseStatus": "ok"}, "records": [{"paymentID": 801}]}),
            ),
        ] {
            Mock::given(method("POST"))
                .and(path("/api/"))
                .and(body_string_contains(needle))
                .respond_with(ok(body))
                .mount(server)
                .await;
        }
    }

    #[tokio::test]
    async fn test_queue_drain_syncs_paid_order_end_to_end() {
        let server = MockServer::start().await;
        mount_auth(&server).await;
        mount_order_flow(&server).await;

        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut config = BridgeConfig::default();
        config.erp = ErpConfig {
            client_code: "123456".into(),
            username: "bridge".into(),
            password: "secret".into(),
            api_url: Some(format!("{}/api/", server.uri())),
        };
        config.sync.sync_orders_immediately = true;
        let client = ErpClient::new(config.erp.clone()).unwrap();
        let pipeline = SyncPipeline::new(db, client, config);

        sqlx::raw_sql(
            r#"
            INSERT INTO orders
                (id, status, currency, created_at, paid_at, total, transaction_id,
                 billing_first_name, billing_last_name, billing_email, billing_phone,
                 billing_address1, billing_city, billing_postcode, billing_country,
                 shipping_address1, shipping_city, shipping_postcode, shipping_country)
            VALUES
                (9, 'completed', 'EUR', '2024-04-01T10:00:00Z', '2024-04-01T10:05:00Z',
                 50.0, 'txn-1', 'Mari', 'Maasikas', 'mari@example.com', '+372000',
                 '1 Main St', 'Tallinn', '10111', 'EE',
                 '1 Main St', 'Tallinn', '10111', 'EE');
            INSERT INTO order_lines (id, order_id, product_id, name, quantity, subtotal)
            VALUES (1, 9, 11, 'Shirt', 2, 40.0);
            "#,
        )
        .execute(pipeline.database().pool())
        .await
        .unwrap();
        pipeline
            .database()
            .mappings()
            .set(EntityKind::Product, 11, 111)
            .await
            .unwrap();

        assert!(pipeline.enqueue_paid_order(9).await.unwrap());
        assert_eq!(pipeline.sync_queued_orders().await.unwrap(), 1);

        // Queue drained, document and link mapped, payment recorded
        assert!(pipeline
            .database()
            .orders()
            .queued_orders()
            .await
            .unwrap()
            .is_empty());
        let mappings = pipeline.database().mappings();
        assert_eq!(
            mappings.get(EntityKind::Order, 9).await.unwrap().as_deref(),
            Some("701")
        );
        assert_eq!(
            mappings
                .get(EntityKind::InvoiceLink, 9)
                .await
                .unwrap()
                .as_deref(),
            Some("https://erp.example/701")
        );

        let bodies: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .map(|r| String::from_utf8_lossy(&r.body).into_owned())
            .collect();
        let document = bodies
            .iter()
            .find(|b| b.contains("saveSalesDocument"))
            .expect("sales document was submitted");
        // Mapped product line went out by its remote id
        assert!(document.contains("productID1=111"));
        assert!(bodies.iter().any(|b| b.contains("savePayment")));

        // A second drain is a no-op: the order is mapped now
        assert_eq!(pipeline.sync_queued_orders().await.unwrap(), 0);
    }
}

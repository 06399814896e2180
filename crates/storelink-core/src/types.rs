//! # Domain Types
//!
//! Core domain types used throughout Storelink.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  Pipeline state                      Local entity snapshot              │
//! │  ──────────────────                  ─────────────────────              │
//! │  SyncResource  products|orders|      Product / Variation                │
//! │                stocks                AttributeTaxonomy / AttributeTerm  │
//! │  SyncStage     ordered phases        Order / OrderLine                  │
//! │  SyncRun       one pass, status      Coupon / ShippingMethod            │
//! │  StageCursor   resumable progress                                       │
//! │  RemoteMapping local id ⇄ ERP id                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual Identity Pattern
//! Local entities keep their storefront integer ids; the ERP-side identity is
//! carried exclusively by a [`RemoteMapping`] annotation. Once a mapping of a
//! given kind exists the pipeline treats the entity as already synchronized:
//! create-type stages skip it, update-type stages address it by its remote id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::batch::BatchRequest;
use crate::error::CoreError;

// =============================================================================
// Sync Resource
// =============================================================================

/// The resource category an operator selects for one synchronization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncResource {
    /// Catalog: attributes, attribute values, products, variations, stock
    /// levels, and remote-side archival.
    Products,

    /// Sales: coupons, shipping methods, then completed orders page by page
    /// (with customers, addresses and payments resolved per order).
    Orders,

    /// Inventory only: one consolidated stock adjustment.
    Stocks,
}

impl SyncResource {
    /// Stable textual form used for persistence and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncResource::Products => "products",
            SyncResource::Orders => "orders",
            SyncResource::Stocks => "stocks",
        }
    }
}

impl std::fmt::Display for SyncResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncResource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "products" => Ok(SyncResource::Products),
            "orders" => Ok(SyncResource::Orders),
            "stocks" => Ok(SyncResource::Stocks),
            other => Err(CoreError::UnknownResource(other.to_string())),
        }
    }
}

// =============================================================================
// Sync Stage
// =============================================================================

/// One phase of a resource's synchronization sequence.
///
/// ## Stage Order
/// ```text
/// products:  Validate → Attributes → AttributeValues
///            → CollectProducts → SendProducts
///            → CollectVariations → SendVariations
///            → StockUpdate → Archive → (completed)
///
/// orders:    Coupons → ShippingMethods → OrdersPage ⟲ → (completed)
///
/// stocks:    StockUpdate → (completed)
/// ```
///
/// `OrdersPage` repeats itself (the sequencer re-arms the same stage) while
/// the persisted page cursor is below the storefront's total page count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    /// Check every published product against the ERP's matrix limits.
    Validate,
    /// Push attribute taxonomies as matrix dimensions.
    Attributes,
    /// Push attribute terms as matrix dimension items.
    AttributeValues,
    /// Build the parent-product request queue.
    CollectProducts,
    /// Drain the parent-product request queue, one batch per invocation.
    SendProducts,
    /// Build the variation request queue.
    CollectVariations,
    /// Drain the variation request queue, one batch per invocation.
    SendVariations,
    /// Reconcile stock levels with one consolidated adjustment.
    StockUpdate,
    /// Archive remote products with no local counterpart.
    Archive,
    /// Push coupons as sales campaigns.
    Coupons,
    /// Register shipping methods as delivery types.
    ShippingMethods,
    /// Sync one page of completed orders.
    OrdersPage,
}

impl SyncStage {
    /// First stage of a resource's sequence.
    pub fn first(resource: SyncResource) -> SyncStage {
        match resource {
            SyncResource::Products => SyncStage::Validate,
            SyncResource::Orders => SyncStage::Coupons,
            SyncResource::Stocks => SyncStage::StockUpdate,
        }
    }

    /// Next stage in the resource's sequence, or `None` when this stage is
    /// the last one (the run completes).
    ///
    /// This is the single transition table of the state machine; stages never
    /// schedule each other directly.
    pub fn next(self, resource: SyncResource) -> Option<SyncStage> {
        match (resource, self) {
            (SyncResource::Products, SyncStage::Validate) => Some(SyncStage::Attributes),
            (SyncResource::Products, SyncStage::Attributes) => Some(SyncStage::AttributeValues),
            (SyncResource::Products, SyncStage::AttributeValues) => {
                Some(SyncStage::CollectProducts)
            }
            (SyncResource::Products, SyncStage::CollectProducts) => Some(SyncStage::SendProducts),
            (SyncResource::Products, SyncStage::SendProducts) => {
                Some(SyncStage::CollectVariations)
            }
            (SyncResource::Products, SyncStage::CollectVariations) => {
                Some(SyncStage::SendVariations)
            }
            (SyncResource::Products, SyncStage::SendVariations) => Some(SyncStage::StockUpdate),
            (SyncResource::Products, SyncStage::StockUpdate) => Some(SyncStage::Archive),
            (SyncResource::Products, SyncStage::Archive) => None,

            (SyncResource::Orders, SyncStage::Coupons) => Some(SyncStage::ShippingMethods),
            (SyncResource::Orders, SyncStage::ShippingMethods) => Some(SyncStage::OrdersPage),
            (SyncResource::Orders, SyncStage::OrdersPage) => None,

            (SyncResource::Stocks, SyncStage::StockUpdate) => None,

            // A persisted stage that does not belong to the resource's
            // sequence terminates the run rather than looping forever.
            _ => None,
        }
    }

    /// Stable textual form used for cursor keys and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStage::Validate => "validate",
            SyncStage::Attributes => "attributes",
            SyncStage::AttributeValues => "attribute_values",
            SyncStage::CollectProducts => "collect_products",
            SyncStage::SendProducts => "send_products",
            SyncStage::CollectVariations => "collect_variations",
            SyncStage::SendVariations => "send_variations",
            SyncStage::StockUpdate => "stock_update",
            SyncStage::Archive => "archive",
            SyncStage::Coupons => "coupons",
            SyncStage::ShippingMethods => "shipping_methods",
            SyncStage::OrdersPage => "orders_page",
        }
    }
}

impl std::fmt::Display for SyncStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncStage {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validate" => Ok(SyncStage::Validate),
            "attributes" => Ok(SyncStage::Attributes),
            "attribute_values" => Ok(SyncStage::AttributeValues),
            "collect_products" => Ok(SyncStage::CollectProducts),
            "send_products" => Ok(SyncStage::SendProducts),
            "collect_variations" => Ok(SyncStage::CollectVariations),
            "send_variations" => Ok(SyncStage::SendVariations),
            "stock_update" => Ok(SyncStage::StockUpdate),
            "archive" => Ok(SyncStage::Archive),
            "coupons" => Ok(SyncStage::Coupons),
            "shipping_methods" => Ok(SyncStage::ShippingMethods),
            "orders_page" => Ok(SyncStage::OrdersPage),
            other => Err(CoreError::UnknownStage(other.to_string())),
        }
    }
}

// =============================================================================
// Sync Run
// =============================================================================

/// Lifecycle status of a [`SyncRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No run has been started for the resource.
    Idle,
    /// The sequencer is advancing through stages.
    InProgress,
    /// A terminal failure; the operator must restart or reset.
    Failed,
    /// All stages drained successfully.
    Completed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::InProgress => "in_progress",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(RunStatus::Idle),
            "in_progress" => Ok(RunStatus::InProgress),
            "failed" => Ok(RunStatus::Failed),
            "completed" => Ok(RunStatus::Completed),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// One end-to-end synchronization pass for one resource.
///
/// The `run_id` is regenerated for every started run; a scheduled re-arm
/// carries the id it was armed with and no-ops if the persisted id has
/// changed in the meantime (an operator reset hard-cancels in-flight work).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    /// Resource category this run covers.
    pub resource: SyncResource,

    /// Random identity of this particular run (UUID v4).
    pub run_id: String,

    /// Lifecycle status.
    pub status: RunStatus,

    /// Stage the sequencer will execute on the next tick.
    pub stage: Option<SyncStage>,

    /// When the run was started.
    pub started_at: Option<DateTime<Utc>>,

    /// When the run reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,

    /// Short human-readable status line polled by the operator UI.
    pub status_line: String,
}

// =============================================================================
// Stage Cursor
// =============================================================================

/// Progress marker for one stage of one resource.
///
/// Invariant: at most one cursor per (resource, stage); cursors only advance,
/// they are never rewound except by the full reset operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageCursor {
    /// Pagination position (orders page number; unused by other stages).
    pub position: u32,

    /// Not-yet-submitted batch groups, drained front to back.
    pub pending: Vec<BatchRequest>,
}

impl StageCursor {
    /// Cursor at the start of a stage with a pre-built request queue.
    pub fn with_pending(pending: Vec<BatchRequest>) -> Self {
        StageCursor {
            position: 0,
            pending,
        }
    }

    /// Cursor holding only a pagination position.
    pub fn at_position(position: u32) -> Self {
        StageCursor {
            position,
            pending: Vec::new(),
        }
    }
}

// =============================================================================
// Remote Identity Mapping
// =============================================================================

/// Kind of local entity a [`RemoteMapping`] annotates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Product ⇄ ERP product id.
    Product,
    /// Variation ⇄ ERP (child) product id.
    Variation,
    /// Attribute taxonomy ⇄ ERP matrix dimension id.
    Attribute,
    /// Attribute term ⇄ ERP matrix dimension item id.
    AttributeTerm,
    /// Coupon ⇄ ERP campaign id.
    Coupon,
    /// Order ⇄ ERP sales document id.
    Order,
    /// Order ⇄ ERP customer id resolved for its billing party.
    OrderCustomer,
    /// Order ⇄ ERP invoice link (operator-facing URL).
    InvoiceLink,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Product => "product",
            EntityKind::Variation => "variation",
            EntityKind::Attribute => "attribute",
            EntityKind::AttributeTerm => "attribute_term",
            EntityKind::Coupon => "coupon",
            EntityKind::Order => "order",
            EntityKind::OrderCustomer => "order_customer",
            EntityKind::InvoiceLink => "invoice_link",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable link between a local entity and its ERP counterpart.
///
/// Created by the owning stage on first successful remote creation; removed
/// only by the full reset operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteMapping {
    pub kind: EntityKind,
    pub local_id: i64,
    pub remote_id: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Local Entity Snapshot
// =============================================================================

/// A published storefront product.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Product {
    pub id: i64,
    pub name: String,
    /// Long description pushed as the ERP's `longdesc`.
    pub description: String,
    /// Short description pushed as the ERP's `description`.
    pub short_description: String,
    pub price: f64,
    pub stock_quantity: i64,
    /// True for variable (matrix) products carrying variations.
    pub is_variable: bool,
}

/// One variation of a variable product.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Variation {
    pub id: i64,
    pub product_id: i64,
    /// Falls back to the parent's price when absent.
    pub price: Option<f64>,
    /// Falls back to the parent's description when absent.
    pub description: Option<String>,
    pub stock_quantity: i64,
}

/// One attribute choice of a variation.
///
/// `term_slug = None` means the variation accepts any value for the
/// attribute; such slots are pushed as a synthesized "Any" dimension value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariationValue {
    pub attribute_slug: String,
    pub term_slug: Option<String>,
}

/// A global attribute taxonomy (e.g. "Size").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct AttributeTaxonomy {
    pub id: i64,
    pub label: String,
    pub slug: String,
}

/// One possible value of a global attribute taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct AttributeTerm {
    pub id: i64,
    pub attribute_id: i64,
    pub name: String,
    pub slug: String,
}

/// Billing or shipping address fields of an order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderAddress {
    pub address1: String,
    pub address2: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub postcode: String,
    pub country: String,
    pub company: Option<String>,
}

impl OrderAddress {
    /// Street value pushed to the ERP: line 1, then line 2 and state when
    /// present, comma-joined.
    pub fn street(&self) -> String {
        let mut street = self.address1.clone();
        if let Some(ref line2) = self.address2 {
            if !line2.is_empty() {
                street.push_str(", ");
                street.push_str(line2);
            }
        }
        if let Some(ref state) = self.state {
            if !state.is_empty() {
                street.push_str(", ");
                street.push_str(state);
            }
        }
        street
    }
}

/// A completed storefront order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    /// Present once payment completed; gates the `savePayment` side effect.
    pub paid_at: Option<DateTime<Utc>>,
    pub total: f64,
    pub transaction_id: Option<String>,
    /// Storefront account id of the buyer, if not a guest checkout.
    pub customer_user_id: Option<i64>,
    pub billing_first_name: String,
    pub billing_last_name: String,
    /// Empty for guest orders; such orders sync without a customer.
    pub billing_email: String,
    pub billing_phone: String,
    pub billing: OrderAddress,
    pub shipping: OrderAddress,
    pub shipping_method_code: Option<String>,
    pub shipping_method_title: Option<String>,
    pub shipping_total: f64,
    /// Codes of coupons redeemed on this order.
    pub coupon_codes: Vec<String>,
}

/// One line of an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderLine {
    pub id: i64,
    pub order_id: i64,
    pub product_id: Option<i64>,
    pub variation_id: Option<i64>,
    pub name: String,
    pub quantity: i64,
    pub subtotal: f64,
}

impl OrderLine {
    /// The local entity whose remote mapping prices this line: the variation
    /// when present, otherwise the product.
    pub fn mapped_entity(&self) -> Option<(EntityKind, i64)> {
        match (self.variation_id, self.product_id) {
            (Some(v), _) => Some((EntityKind::Variation, v)),
            (None, Some(p)) => Some((EntityKind::Product, p)),
            (None, None) => None,
        }
    }

    /// Per-unit price before any promotion recalculation.
    pub fn unit_price(&self) -> f64 {
        if self.quantity == 0 {
            0.0
        } else {
            self.subtotal / self.quantity as f64
        }
    }
}

/// Discount scheme of a storefront coupon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// Percentage off the entire purchase.
    Percent,
    /// Fixed sum off the entire purchase.
    FixedCart,
    /// Fixed sum off each included product.
    FixedProduct,
}

impl DiscountType {
    /// Parses a storefront discount-type string. Returns `None` for types
    /// the ERP campaign model cannot express; such coupons are excluded from
    /// the sync batch.
    pub fn parse(s: &str) -> Option<DiscountType> {
        match s {
            "percent" => Some(DiscountType::Percent),
            "fixed_cart" => Some(DiscountType::FixedCart),
            "fixed_product" => Some(DiscountType::FixedProduct),
            _ => None,
        }
    }
}

/// A published storefront coupon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupon {
    pub id: i64,
    pub code: String,
    /// Raw storefront discount type; parsed via [`DiscountType::parse`].
    pub discount_type: String,
    pub amount: f64,
    pub minimum_amount: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Products the coupon is restricted to (empty = entire purchase).
    pub product_ids: Vec<i64>,
}

/// A storefront shipping method, registered in the ERP as a delivery type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ShippingMethod {
    pub code: String,
    pub title: String,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_products_stage_sequence() {
        let mut stage = SyncStage::first(SyncResource::Products);
        let mut seen = vec![stage];
        while let Some(next) = stage.next(SyncResource::Products) {
            stage = next;
            seen.push(stage);
        }
        assert_eq!(
            seen,
            vec![
                SyncStage::Validate,
                SyncStage::Attributes,
                SyncStage::AttributeValues,
                SyncStage::CollectProducts,
                SyncStage::SendProducts,
                SyncStage::CollectVariations,
                SyncStage::SendVariations,
                SyncStage::StockUpdate,
                SyncStage::Archive,
            ]
        );
    }

    #[test]
    fn test_orders_stage_sequence() {
        assert_eq!(
            SyncStage::first(SyncResource::Orders),
            SyncStage::Coupons
        );
        assert_eq!(
            SyncStage::Coupons.next(SyncResource::Orders),
            Some(SyncStage::ShippingMethods)
        );
        assert_eq!(
            SyncStage::ShippingMethods.next(SyncResource::Orders),
            Some(SyncStage::OrdersPage)
        );
        assert_eq!(SyncStage::OrdersPage.next(SyncResource::Orders), None);
    }

    #[test]
    fn test_stocks_is_single_stage() {
        let stage = SyncStage::first(SyncResource::Stocks);
        assert_eq!(stage, SyncStage::StockUpdate);
        assert_eq!(stage.next(SyncResource::Stocks), None);
    }

    #[test]
    fn test_stage_round_trips_through_str() {
        for stage in [
            SyncStage::Validate,
            SyncStage::AttributeValues,
            SyncStage::SendVariations,
            SyncStage::OrdersPage,
        ] {
            assert_eq!(stage.as_str().parse::<SyncStage>().unwrap(), stage);
        }
        assert!("bogus".parse::<SyncStage>().is_err());
    }

    #[test]
    fn test_street_concatenation() {
        let addr = OrderAddress {
            address1: "1 Main St".into(),
            address2: Some("Apt 4".into()),
            city: "Tallinn".into(),
            state: Some("Harju".into()),
            postcode: "10111".into(),
            country: "EE".into(),
            company: None,
        };
        assert_eq!(addr.street(), "1 Main St, Apt 4, Harju");

        let bare = OrderAddress {
            address1: "1 Main St".into(),
            ..Default::default()
        };
        assert_eq!(bare.street(), "1 Main St");
    }

    #[test]
    fn test_order_line_mapped_entity() {
        let mut line = OrderLine {
            id: 1,
            order_id: 10,
            product_id: Some(5),
            variation_id: None,
            name: "Shirt".into(),
            quantity: 2,
            subtotal: 20.0,
        };
        assert_eq!(line.mapped_entity(), Some((EntityKind::Product, 5)));
        assert!((line.unit_price() - 10.0).abs() < f64::EPSILON);

        line.variation_id = Some(7);
        assert_eq!(line.mapped_entity(), Some((EntityKind::Variation, 7)));

        line.product_id = None;
        line.variation_id = None;
        assert_eq!(line.mapped_entity(), None);
    }

    #[test]
    fn test_discount_type_parse() {
        assert_eq!(DiscountType::parse("percent"), Some(DiscountType::Percent));
        assert_eq!(
            DiscountType::parse("fixed_cart"),
            Some(DiscountType::FixedCart)
        );
        assert_eq!(
            DiscountType::parse("fixed_product"),
            Some(DiscountType::FixedProduct)
        );
        assert_eq!(DiscountType::parse("bogo"), None);
    }
}

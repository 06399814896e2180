//! # Orders Stage
//!
//! Syncs completed orders one fixed-size page per invocation, resolving the
//! billing customer, addresses, promotion pricing and payment for each.
//!
//! ## Page Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  tick N:   refresh countries/VAT/currencies ──► load page P (20)        │
//! │            sync each order (mapped ones skip) ──► cursor P+1            │
//! │            P+1 ≤ total pages? ──► MoreWork (re-arm in 5 min)            │
//! │                               └─► Completed (cursor cleared)            │
//! │                                                                         │
//! │  A rate limit anywhere in the page leaves the cursor untouched; the    │
//! │  retried page re-skips every already-mapped order.                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use storelink_core::request::{DocumentLine, DocumentLineItem, DocumentLines};
use storelink_core::schedule::StageOutcome;
use storelink_core::{EntityKind, Order, RequestParams, StageCursor, SyncResource, SyncStage};

use crate::error::SyncResult;
use crate::protocol::{value_f64, value_i64, RemoteRequest};
use crate::reference::ConfParameters;
use crate::stages::{customers, StageContext};

/// Delivery type used when an order's shipping method has no mapping.
const DEFAULT_DELIVERY_TYPE_ID: i64 = 1;

// =============================================================================
// Per-pass Environment
// =============================================================================

/// Reference data shared by every order of one pass.
pub(crate) struct OrderSyncEnv {
    pub vat_rate: f64,
    pub currencies: HashSet<String>,
    pub delivery_types: HashMap<String, i64>,
    pub conf: ConfParameters,
}

/// Builds the per-pass environment: default VAT rate, currency codes,
/// delivery types and configuration flags.
pub(crate) async fn build_env(
    ctx: &StageContext<'_>,
) -> SyncResult<Result<OrderSyncEnv, StageOutcome>> {
    let reference = ctx.reference();

    let vat_rate = match reference
        .vat_rate_percentage(ctx.options.default_vat_rate_id)
        .await?
    {
        Ok(rate) => rate,
        Err(outcome) => return Ok(Err(outcome)),
    };

    let currencies = match reference.currency_codes().await? {
        Ok(codes) => codes,
        Err(outcome) => return Ok(Err(outcome)),
    };

    let delivery_types = match reference.delivery_types().await? {
        Ok(types) => types,
        Err(outcome) => return Ok(Err(outcome)),
    };

    let conf = match reference.conf_parameters().await? {
        Ok(conf) => conf,
        Err(outcome) => return Ok(Err(outcome)),
    };

    Ok(Ok(OrderSyncEnv {
        vat_rate,
        currencies,
        delivery_types,
        conf,
    }))
}

// =============================================================================
// Page Loop
// =============================================================================

pub(crate) async fn sync_orders_page(ctx: &StageContext<'_>) -> SyncResult<StageOutcome> {
    let reference = ctx.reference();

    if let Err(outcome) = reference.update_countries().await? {
        return Ok(outcome);
    }

    let env = match build_env(ctx).await? {
        Ok(env) => env,
        Err(outcome) => return Ok(outcome),
    };

    let cursors = ctx.db.cursors();
    let page = cursors
        .load(SyncResource::Orders, SyncStage::OrdersPage)
        .await?
        .map(|c| c.position)
        .unwrap_or(1)
        .max(1);

    let total_pages = ctx.db.orders().completed_order_pages().await?;
    let orders = ctx.db.orders().completed_orders_page(page).await?;

    info!(page, total_pages, count = orders.len(), "Syncing orders page");

    for order in &orders {
        if let Err(outcome) = sync_single_order(ctx, order, &env).await? {
            return Ok(outcome);
        }
    }

    let next_page = page + 1;
    if next_page <= total_pages {
        cursors
            .save(
                SyncResource::Orders,
                SyncStage::OrdersPage,
                &StageCursor::at_position(next_page),
            )
            .await?;
        Ok(StageOutcome::MoreWork)
    } else {
        cursors
            .clear(SyncResource::Orders, SyncStage::OrdersPage)
            .await?;
        info!("Finished orders synchronization");
        Ok(StageOutcome::Completed)
    }
}

// =============================================================================
// Single Order
// =============================================================================

/// Syncs one order as a sales document. Orders that already carry a
/// document mapping are skipped, which is what makes page retries and the
/// immediate-sync queue idempotent.
pub(crate) async fn sync_single_order(
    ctx: &StageContext<'_>,
    order: &Order,
    env: &OrderSyncEnv,
) -> SyncResult<Result<(), StageOutcome>> {
    if ctx.db.mappings().exists(EntityKind::Order, order.id).await? {
        debug!(order_id = order.id, "Order already synced");
        return Ok(Ok(()));
    }

    info!(order_id = order.id, "Syncing order");

    if !env.currencies.contains(&order.currency) {
        warn!(order_id = order.id, currency = %order.currency, "Currency not set up in ERP");
        return Ok(Err(StageOutcome::Failed(format!(
            "currency {} not set up in ERP",
            order.currency
        ))));
    }

    let delivery_type_id = order
        .shipping_method_code
        .as_ref()
        .and_then(|code| env.delivery_types.get(code))
        .copied()
        .unwrap_or(DEFAULT_DELIVERY_TYPE_ID);

    let mut params = RequestParams::new();
    params.set("type", ctx.options.order_document_type.as_str());
    params.set("warehouseID", ctx.options.warehouse_id);
    params.set("date", order.created_at.format("%Y-%m-%d").to_string());
    params.set("time", order.created_at.format("%H:%M:%S").to_string());
    params.set("confirmInvoice", 1);
    params.set("allowDuplicateNumbers", 0);
    params.set("paymentTypeID", ctx.options.payment_type_id);
    params.set("sendByEmail", 0);
    params.set("isCashInvoice", 0);
    params.set("deliveryTypeID", delivery_type_id);
    params.set("customNumber", order.id);
    params.set("currencyCode", order.currency.clone());

    // Customer and addresses; guest orders go out without either
    if !order.billing_email.is_empty() {
        let customer_id = match customers::save_customer(ctx, order, env).await? {
            Ok(id) => id,
            Err(outcome) => return Ok(Err(outcome)),
        };

        let address_params =
            match customers::resolve_addresses(ctx, order, customer_id, env).await? {
                Ok(fragment) => fragment,
                Err(outcome) => return Ok(Err(outcome)),
            };
        for (key, value) in address_params.iter() {
            params.set(key, value.clone());
        }
    } else {
        warn!(
            order_id = order.id,
            "Order made as guest/without customer email, saving without associated customer and address"
        );
    }

    // Invoice lines
    let mut lines = DocumentLines::new();
    for line in ctx.db.orders().lines_for_order(order.id).await? {
        let price = net_price(ctx, line.unit_price(), env.vat_rate);

        let item = match line.mapped_entity() {
            None => DocumentLineItem::Named(line.name.clone()),
            Some((kind, local_id)) => match ctx.db.mappings().get_numeric(kind, local_id).await? {
                Some(remote_id) => DocumentLineItem::Product(remote_id),
                None => {
                    if ctx.options.allow_unsynced_products {
                        debug!(
                            order_id = order.id,
                            line_id = line.id,
                            "Allowing unsynchronized product as a named line"
                        );
                        DocumentLineItem::Named(line.name.clone())
                    } else {
                        warn!(
                            order_id = order.id,
                            line_id = line.id,
                            "Order line references an unsynchronized product"
                        );
                        return Ok(Err(StageOutcome::Failed(format!(
                            "order {} references an unsynchronized product",
                            order.id
                        ))));
                    }
                }
            },
        };

        lines.push(DocumentLine {
            item,
            vat_rate_id: ctx.options.default_vat_rate_id,
            amount: line.quantity,
            price,
        });
    }

    // Promotion pricing for redeemed, mapped coupons
    let overrides = match promotion_overrides(ctx, order, &lines).await? {
        Ok(overrides) => overrides,
        Err(outcome) => return Ok(Err(outcome)),
    };

    // Shipping goes out as one more named line
    if let Some(title) = order
        .shipping_method_title
        .clone()
        .or_else(|| order.shipping_method_code.clone())
    {
        lines.push(DocumentLine {
            item: DocumentLineItem::Named(title),
            vat_rate_id: ctx.options.default_vat_rate_id,
            amount: 1,
            price: if order.shipping_total > 0.0 {
                net_price(ctx, order.shipping_total, env.vat_rate)
            } else {
                0.0
            },
        });
    }

    lines.apply(&mut params);
    for (row, price) in overrides {
        params.set_slot("price", row, price);
    }

    let response = match ctx
        .client
        .send(&RemoteRequest::single("saveSalesDocument", params))
        .await?
        .into_response()
    {
        Ok(response) => response,
        Err(outcome) => return Ok(Err(outcome)),
    };

    let record = response.first_record();
    let Some(invoice_id) = record.and_then(|r| value_i64(&r["invoiceID"])) else {
        return Ok(Err(StageOutcome::Failed(format!(
            "order {} sync returned no invoiceID",
            order.id
        ))));
    };

    ctx.db
        .mappings()
        .set(EntityKind::Order, order.id, invoice_id)
        .await?;
    if let Some(link) = record.and_then(|r| r["invoiceLink"].as_str()) {
        ctx.db
            .mappings()
            .set(EntityKind::InvoiceLink, order.id, link)
            .await?;
    }

    info!(order_id = order.id, invoice_id, "Order synchronized");

    customers::record_payment(ctx, order, invoice_id, env).await?;

    Ok(Ok(()))
}

/// Line price with VAT stripped when the storefront prices include tax.
fn net_price(ctx: &StageContext<'_>, price: f64, vat_rate: f64) -> f64 {
    if ctx.options.prices_include_tax {
        price / (1.0 + vat_rate / 100.0)
    } else {
        price
    }
}

/// Runs `calculateShoppingCart` for the order's mapped campaigns and returns
/// per-row price overrides. An order without mapped coupons returns none.
async fn promotion_overrides(
    ctx: &StageContext<'_>,
    order: &Order,
    lines: &DocumentLines,
) -> SyncResult<Result<Vec<(usize, f64)>, StageOutcome>> {
    let mut campaign_ids: Vec<String> = Vec::new();
    for code in &order.coupon_codes {
        let Some(coupon_id) = ctx.db.orders().coupon_id_by_code(code).await? else {
            continue;
        };
        if let Some(campaign_id) = ctx
            .db
            .mappings()
            .get_numeric(EntityKind::Coupon, coupon_id)
            .await?
        {
            campaign_ids.push(campaign_id.to_string());
        }
    }

    if campaign_ids.is_empty() {
        return Ok(Ok(Vec::new()));
    }

    let mut params = RequestParams::new();
    params.set("manualPromotionIDs", campaign_ids.join(","));
    lines.apply(&mut params);

    let response = match ctx
        .client
        .send(&RemoteRequest::single("calculateShoppingCart", params))
        .await?
        .into_response()
    {
        Ok(response) => response,
        Err(outcome) => return Ok(Err(outcome)),
    };

    let Some(rows) = response
        .first_record()
        .and_then(|r| r["rows"].as_array().cloned())
    else {
        warn!(order_id = order.id, "Failed to calculate shopping cart");
        return Ok(Err(StageOutcome::Failed(
            "failed to calculate shopping cart".into(),
        )));
    };

    let overrides = rows
        .iter()
        .filter_map(|row| {
            let number = value_i64(&row["rowNumber"])? as usize;
            let price = value_f64(&row["promotionPrice"])?;
            Some((number, price))
        })
        .collect();

    Ok(Ok(overrides))
}

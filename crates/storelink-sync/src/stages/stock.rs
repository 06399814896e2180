//! # Stock Reconciliation Stage
//!
//! Reads the warehouse's current stock from the ERP, computes a signed
//! delta per mapped product/variation, and submits the nonzero deltas as
//! one consolidated `saveInventoryRegistration`. Zero deltas are omitted
//! entirely; when nothing differs, nothing is sent.

use std::collections::HashMap;

use tracing::{info, warn};

use storelink_core::batch::{correlate, ItemOutcome};
use storelink_core::request::{InventoryLine, InventoryLines};
use storelink_core::schedule::StageOutcome;
use storelink_core::stock::stock_adjustment;
use storelink_core::{BatchRequest, EntityKind, ItemRequest, RequestParams};

use crate::error::SyncResult;
use crate::protocol::{value_f64, value_i64, RemoteRequest};
use crate::stages::StageContext;

/// The registration is a single tagged item; this is its batch tag.
const REGISTRATION_REQUEST_ID: i64 = 1;

pub(crate) async fn update_stock(ctx: &StageContext<'_>) -> SyncResult<StageOutcome> {
    info!("Start products stock synchronization");

    // Last-known remote stock per ERP product id
    let mut params = RequestParams::new();
    params.set("warehouseID", ctx.options.warehouse_id);

    let response = match ctx
        .client
        .send(&RemoteRequest::single("getProductStock", params))
        .await?
        .into_response()
    {
        Ok(response) => response,
        Err(outcome) => return Ok(outcome),
    };

    let mut remote_stock: HashMap<i64, i64> = HashMap::new();
    for record in &response.records {
        if let Some(product_id) = value_i64(&record["productID"]) {
            let amount = value_f64(&record["amountInStock"]).unwrap_or(0.0);
            remote_stock.insert(product_id, amount.round() as i64);
        }
    }

    // Signed deltas for every mapped product and variation
    let catalog = ctx.db.catalog();
    let mappings = ctx.db.mappings();
    let mut lines = InventoryLines::new();

    for product in catalog.published_products().await? {
        let Some(remote_id) = mappings.get_numeric(EntityKind::Product, product.id).await?
        else {
            warn!(product_id = product.id, "Failed to update stock, product is not synchronized");
            return Ok(StageOutcome::Failed(format!(
                "product {} is not synchronized",
                product.id
            )));
        };

        let known = remote_stock.get(&remote_id).copied().unwrap_or(0);
        if let Some(delta) = stock_adjustment(product.stock_quantity, known) {
            lines.push(InventoryLine {
                product_id: remote_id,
                amount: delta,
                price: product.price,
            });
        }

        if product.is_variable {
            for variation in catalog.variations_for_product(product.id).await? {
                let Some(remote_id) = mappings
                    .get_numeric(EntityKind::Variation, variation.id)
                    .await?
                else {
                    warn!(
                        variation_id = variation.id,
                        product_id = product.id,
                        "Failed to update stock, variation is not synchronized"
                    );
                    return Ok(StageOutcome::Failed(format!(
                        "variation {} of product {} is not synchronized",
                        variation.id, product.id
                    )));
                };

                let known = remote_stock.get(&remote_id).copied().unwrap_or(0);
                if let Some(delta) = stock_adjustment(variation.stock_quantity, known) {
                    lines.push(InventoryLine {
                        product_id: remote_id,
                        amount: delta,
                        price: variation.price.unwrap_or(product.price),
                    });
                }
            }
        }
    }

    if lines.is_empty() {
        info!("Stock levels already in sync, nothing to register");
        return Ok(StageOutcome::Completed);
    }

    info!(lines = lines.len(), "Submitting inventory registration");

    let mut item = ItemRequest::new(REGISTRATION_REQUEST_ID, "saveInventoryRegistration");
    item.params.set("warehouseID", ctx.options.warehouse_id);
    lines.apply(&mut item.params);

    let batch = BatchRequest { items: vec![item] };
    let response = match ctx
        .client
        .send(&RemoteRequest::batch(batch.clone()))
        .await?
        .into_response()
    {
        Ok(response) => response,
        Err(outcome) => return Ok(outcome),
    };

    let statuses = response.item_statuses();
    if statuses.is_empty() {
        return Ok(StageOutcome::Failed(
            "inventory registration response carried no per-item results".into(),
        ));
    }

    let report = correlate(&batch, &statuses);
    match report.outcome(REGISTRATION_REQUEST_ID) {
        Some(ItemOutcome::Ok { records })
            if records
                .first()
                .and_then(|r| value_i64(&r["inventoryRegistrationID"]))
                .is_some() =>
        {
            info!("Finished products stock synchronization");
            Ok(StageOutcome::Completed)
        }
        _ => Ok(StageOutcome::Failed(
            "inventory registration was not accepted".into(),
        )),
    }
}

//! # Attribute & Attribute-value Stages
//!
//! Pushes global attribute taxonomies as matrix dimensions and their terms
//! as dimension items.
//!
//! Already-mapped attributes are never re-created (idempotency contract);
//! already-mapped terms are pushed as in-place edits so renames propagate.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use storelink_core::batch::{correlate, into_batches, ItemOutcome};
use storelink_core::schedule::StageOutcome;
use storelink_core::{EntityKind, ItemRequest};

use crate::error::SyncResult;
use crate::protocol::{value_i64, RemoteRequest};
use crate::stages::StageContext;

/// Pushes every unmapped attribute taxonomy as a `saveMatrixDimension`.
pub(crate) async fn sync_attributes(ctx: &StageContext<'_>) -> SyncResult<StageOutcome> {
    info!("Start synchronizing product attributes");

    let taxonomies = ctx.db.catalog().attribute_taxonomies().await?;
    let mappings = ctx.db.mappings();

    let mut labels: HashMap<i64, String> = HashMap::new();
    let mut items = Vec::new();

    for attribute in &taxonomies {
        if let Some(dimension_id) = mappings.get(EntityKind::Attribute, attribute.id).await? {
            debug!(
                attribute = %attribute.label,
                dimension_id = %dimension_id,
                "Attribute already synced"
            );
            continue;
        }

        labels.insert(attribute.id, attribute.label.clone());
        let mut item = ItemRequest::new(attribute.id, "saveMatrixDimension");
        item.params.set("name", attribute.label.clone());
        items.push(item);
    }

    if items.is_empty() {
        info!("No attributes found for synchronizing. Either all attributes were synced before or there are none at all");
        return Ok(StageOutcome::Completed);
    }

    for batch in into_batches(items) {
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
                "attribute batch response carried no per-item results".into(),
            ));
        }

        let report = correlate(&batch, &statuses);
        let mut failed = false;

        for (attribute_id, outcome) in report.iter() {
            match outcome {
                ItemOutcome::Ok { records } => {
                    match records.first().and_then(|r| value_i64(&r["dimensionID"])) {
                        Some(dimension_id) => {
                            mappings
                                .set(EntityKind::Attribute, attribute_id, dimension_id)
                                .await?;
                            info!(
                                attribute_id,
                                attribute = labels.get(&attribute_id).map(String::as_str).unwrap_or(""),
                                dimension_id,
                                "Attribute synchronized"
                            );
                        }
                        None => {
                            failed = true;
                            warn!(attribute_id, "Attribute result carried no dimensionID");
                        }
                    }
                }
                ItemOutcome::Failed { error_code } => {
                    failed = true;
                    warn!(attribute_id, ?error_code, "Attribute failed to synchronize");
                }
            }
        }

        if failed {
            return Ok(StageOutcome::Failed(
                "one or more attributes failed to synchronize".into(),
            ));
        }
    }

    info!("Finished synchronizing product attributes");
    Ok(StageOutcome::Completed)
}

/// Pushes the terms of every mapped attribute: unmapped terms as
/// `addItemToMatrixDimension`, mapped ones as `editItemInMatrixDimension`.
pub(crate) async fn sync_attribute_values(ctx: &StageContext<'_>) -> SyncResult<StageOutcome> {
    info!("Start synchronizing product attribute items");

    let taxonomies = ctx.db.catalog().attribute_taxonomies().await?;
    let mappings = ctx.db.mappings();

    let mut items = Vec::new();

    for attribute in &taxonomies {
        let Some(dimension_id) = mappings
            .get_numeric(EntityKind::Attribute, attribute.id)
            .await?
        else {
            debug!(attribute = %attribute.label, "Attribute has no dimension yet, skipping terms");
            continue;
        };

        for term in ctx.db.catalog().terms_for_attribute(attribute.id).await? {
            let mut item = match mappings
                .get_numeric(EntityKind::AttributeTerm, term.id)
                .await?
            {
                None => {
                    let mut item = ItemRequest::new(term.id, "addItemToMatrixDimension");
                    item.params.set("dimensionID", dimension_id);
                    item
                }
                Some(item_id) => {
                    let mut item = ItemRequest::new(term.id, "editItemInMatrixDimension");
                    item.params.set("itemID", item_id);
                    item
                }
            };
            item.params.set("name", term.name.clone());
            item.params.set("code", term.id);
            items.push(item);
        }
    }

    if items.is_empty() {
        info!("No attribute items to synchronize");
        return Ok(StageOutcome::Completed);
    }

    for batch in into_batches(items) {
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
                "attribute item batch response carried no per-item results".into(),
            ));
        }

        let report = correlate(&batch, &statuses);
        let mut failed = false;

        for (term_id, outcome) in report.iter() {
            match outcome {
                ItemOutcome::Ok { records } => {
                    match records.first().and_then(|r| value_i64(&r["itemID"])) {
                        Some(item_id) => {
                            mappings
                                .set(EntityKind::AttributeTerm, term_id, item_id)
                                .await?;
                            info!(term_id, item_id, "Attribute term synchronized");
                        }
                        None => {
                            failed = true;
                            warn!(term_id, "Attribute term result carried no itemID");
                        }
                    }
                }
                ItemOutcome::Failed { error_code } => {
                    failed = true;
                    warn!(term_id, ?error_code, "Attribute term failed to synchronize");
                    if *error_code == Some(1011) {
                        // 1011 on itemID usually means the parent dimension
                        // is gone on the ERP side
                        warn!(term_id, "Possible reason: matrix dimension not available in ERP");
                    }
                }
            }
        }

        if failed {
            return Ok(StageOutcome::Failed(
                "one or more attribute terms failed to synchronize".into(),
            ));
        }
    }

    info!("Finished synchronizing product attribute items");
    Ok(StageOutcome::Completed)
}

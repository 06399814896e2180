//! # Archival Stage
//!
//! After a full product/variation push, fetches the complete remote product
//! set, diffs it against the locally-mapped remote ids, and marks every
//! remote-only product `ARCHIVED`. Storefront deletions and unpublications
//! therefore propagate as archival, never as hard deletes.

use std::collections::HashSet;

use tracing::info;

use storelink_core::archive::archive_candidates;
use storelink_core::batch::{correlate, into_batches};
use storelink_core::schedule::StageOutcome;
use storelink_core::{EntityKind, ItemRequest, RequestParams};

use crate::error::SyncResult;
use crate::protocol::{value_i64, RemoteRequest};
use crate::stages::StageContext;

pub(crate) async fn archive_remote_orphans(ctx: &StageContext<'_>) -> SyncResult<StageOutcome> {
    // The complete remote product set for the warehouse
    let mut params = RequestParams::new();
    params.set("warehouseID", ctx.options.warehouse_id);

    let response = match ctx
        .client
        .send(&RemoteRequest::single("getProducts", params))
        .await?
        .into_response()
    {
        Ok(response) => response,
        Err(outcome) => return Ok(outcome),
    };

    let remote_ids: Vec<i64> = response
        .records
        .iter()
        .filter_map(|r| value_i64(&r["productID"]))
        .collect();

    // Everything a local product or variation maps to stays active
    let mapped: HashSet<i64> = ctx
        .db
        .mappings()
        .numeric_remote_ids(&[EntityKind::Product, EntityKind::Variation])
        .await?
        .into_iter()
        .collect();

    let candidates = archive_candidates(&remote_ids, &mapped);
    if candidates.is_empty() {
        info!("No remote products to archive");
        return Ok(StageOutcome::Completed);
    }

    info!(count = candidates.len(), "Archiving remote-only products");

    let items: Vec<ItemRequest> = candidates
        .into_iter()
        .map(|product_id| {
            let mut item = ItemRequest::new(product_id, "saveProduct");
            item.params.set("status", "ARCHIVED");
            item.params.set("groupID", ctx.options.product_group_id);
            item.params.set("productID", product_id);
            item
        })
        .collect();

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
                "archival batch response carried no per-item results".into(),
            ));
        }

        let report = correlate(&batch, &statuses);
        if !report.all_ok() {
            return Ok(StageOutcome::Failed(format!(
                "archival rejected for remote products {:?}",
                report.failed_ids()
            )));
        }
    }

    Ok(StageOutcome::Completed)
}

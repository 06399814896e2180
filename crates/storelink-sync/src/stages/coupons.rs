//! # Coupon Stage
//!
//! Pushes published coupons as manual sales campaigns.
//!
//! Two classes of coupon are silently excluded from the batch: coupons that
//! already carry a campaign mapping (campaign updates are unsupported by
//! design) and coupons whose discount type the ERP campaign model cannot
//! express.

use tracing::{debug, info, warn};

use storelink_core::batch::{correlate, into_batches, ItemOutcome};
use storelink_core::schedule::StageOutcome;
use storelink_core::{Coupon, DiscountType, EntityKind, ItemRequest};

use crate::error::SyncResult;
use crate::protocol::{value_i64, RemoteRequest};
use crate::stages::StageContext;

pub(crate) async fn sync_coupons(ctx: &StageContext<'_>) -> SyncResult<StageOutcome> {
    let coupons = ctx.db.orders().published_coupons().await?;
    let mut items = Vec::new();

    for coupon in &coupons {
        if ctx.db.mappings().exists(EntityKind::Coupon, coupon.id).await? {
            // Campaign updates are unsupported; a mapped coupon never goes out again
            debug!(coupon = %coupon.code, "Coupon already mapped, skipping");
            continue;
        }

        let Some(discount) = DiscountType::parse(&coupon.discount_type) else {
            debug!(
                coupon = %coupon.code,
                discount_type = %coupon.discount_type,
                "Discount type has no campaign equivalent, skipping"
            );
            continue;
        };

        items.push(build_campaign_request(ctx, coupon, discount).await?);
    }

    if items.is_empty() {
        info!("No coupons (promotions) to sync or they are already synced");
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
                "coupon batch response carried no per-item results".into(),
            ));
        }

        let report = correlate(&batch, &statuses);
        let mut failed = false;

        for (coupon_id, outcome) in report.iter() {
            match outcome {
                ItemOutcome::Ok { records } => {
                    match records.first().and_then(|r| value_i64(&r["campaignID"])) {
                        Some(campaign_id) => {
                            ctx.db
                                .mappings()
                                .set(EntityKind::Coupon, coupon_id, campaign_id)
                                .await?;
                            info!(coupon_id, campaign_id, "Coupon synchronized");
                        }
                        None => {
                            failed = true;
                            warn!(coupon_id, "Coupon result carried no campaignID");
                        }
                    }
                }
                ItemOutcome::Failed { error_code } => {
                    failed = true;
                    warn!(coupon_id, ?error_code, "Coupon failed to synchronize");
                }
            }
        }

        if failed {
            return Ok(StageOutcome::Failed(
                "one or more coupons failed to synchronize".into(),
            ));
        }
    }

    Ok(StageOutcome::Completed)
}

/// One `saveCampaign` item for a coupon.
async fn build_campaign_request(
    ctx: &StageContext<'_>,
    coupon: &Coupon,
    discount: DiscountType,
) -> SyncResult<ItemRequest> {
    let mut item = ItemRequest::new(coupon.id, "saveCampaign");
    item.params
        .set("startDate", coupon.created_at.format("%Y-%m-%d").to_string());
    if let Some(expires_at) = coupon.expires_at {
        item.params
            .set("endDate", expires_at.format("%Y-%m-%d").to_string());
    }
    item.params.set("name", coupon.code.clone());
    item.params.set("type", "manual");
    item.params.set("warehouseID", ctx.options.warehouse_id);
    item.params
        .set("excludeDiscountedFromPercentageOffEntirePurchase", 0);

    // The ERP rejects a zero purchase threshold
    let minimum = coupon.minimum_amount.filter(|m| *m > 0.0).unwrap_or(1.0);
    item.params.set("purchaseTotalValue", minimum);

    // Remote ids of the products the coupon is restricted to
    let mut remote_ids: Vec<String> = Vec::new();
    for product_id in &coupon.product_ids {
        match ctx
            .db
            .mappings()
            .get_numeric(EntityKind::Product, *product_id)
            .await?
        {
            Some(remote_id) => remote_ids.push(remote_id.to_string()),
            None => warn!(
                product_id,
                coupon = %coupon.code,
                "Product associated with coupon is not synced"
            ),
        }
    }

    match discount {
        DiscountType::Percent => {
            item.params
                .set("percentageOffEntirePurchase", coupon.amount);
            if !remote_ids.is_empty() {
                item.params
                    .set("percentageOffIncludedProducts", remote_ids.join(","));
            }
        }
        DiscountType::FixedCart => {
            item.params.set("sumOffEntirePurchase", coupon.amount);
            if !remote_ids.is_empty() {
                item.params
                    .set("sumOffIncludedProducts", remote_ids.join(","));
            }
        }
        DiscountType::FixedProduct => {
            item.params.set("sumOFF", coupon.amount);
            if !remote_ids.is_empty() {
                item.params.set("awardedProducts", remote_ids.join(","));
            }
        }
    }

    Ok(item)
}

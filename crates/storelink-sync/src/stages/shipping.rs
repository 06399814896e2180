//! # Shipping Method Stage
//!
//! Registers every storefront shipping method the ERP does not yet know as
//! a delivery type, matched by code. Orders later resolve their delivery
//! type id from this list.

use tracing::info;

use storelink_core::schedule::StageOutcome;

use crate::error::SyncResult;
use crate::stages::StageContext;

pub(crate) async fn sync_shipping_methods(ctx: &StageContext<'_>) -> SyncResult<StageOutcome> {
    let reference = ctx.reference();

    let delivery_types = match reference.delivery_types().await? {
        Ok(types) => types,
        Err(outcome) => return Ok(outcome),
    };

    let methods = ctx.db.orders().shipping_methods().await?;
    let mut created = 0;

    for method in methods {
        if delivery_types.contains_key(&method.code) {
            continue;
        }

        match reference
            .save_delivery_type(&method.code, &method.title)
            .await?
        {
            Ok(()) => {
                created += 1;
                info!(code = %method.code, title = %method.title, "Shipping method saved as delivery type");
            }
            Err(outcome) => return Ok(outcome),
        }
    }

    if created == 0 {
        info!("No shipping methods to sync or they are already synced");
    }

    Ok(StageOutcome::Completed)
}

//! # Customer, Address & Payment Resolution
//!
//! Per-order side work of the orders stage: resolve or create the billing
//! customer, reuse or create billing/shipping addresses, and record the
//! payment once the order shows a payment-completed timestamp.
//!
//! ## Matching Rules
//! - Customer: by stored per-order mapping first, else by billing email.
//!   At least one returned record counts as found; none means create.
//! - Address: exact field equality (street, city, postal code, country)
//!   against the customer's existing addresses of the configured type id;
//!   reused on match, created otherwise.
//!
//! Every read/create/update of customer data is reported to the ERP's
//! data-usage log.

use serde_json::Value;
use tracing::{debug, info, warn};

use storelink_core::schedule::StageOutcome;
use storelink_core::{EntityKind, Order, OrderAddress, RequestParams};

use crate::error::SyncResult;
use crate::protocol::{value_i64, RemoteRequest};
use crate::stages::orders::OrderSyncEnv;
use crate::stages::StageContext;

// =============================================================================
// Remote Customer Shapes
// =============================================================================

/// A customer record as returned by `getCustomers`.
#[derive(Debug, Clone)]
pub(crate) struct ErpCustomer {
    pub customer_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub country_id: Option<i64>,
    pub addresses: Vec<ErpAddress>,
}

/// A stored address of a customer.
#[derive(Debug, Clone)]
pub(crate) struct ErpAddress {
    pub address_id: i64,
    pub type_id: i64,
    pub street: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

fn customer_from_record(record: &Value) -> Option<ErpCustomer> {
    let customer_id = value_i64(&record["customerID"])?;

    let addresses = record["addresses"]
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|a| {
                    Some(ErpAddress {
                        address_id: value_i64(&a["addressID"])?,
                        type_id: value_i64(&a["typeID"])?,
                        street: a["street"].as_str().unwrap_or("").to_string(),
                        city: a["city"].as_str().unwrap_or("").to_string(),
                        postal_code: a["postalCode"].as_str().unwrap_or("").to_string(),
                        country: a["country"].as_str().unwrap_or("").to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(ErpCustomer {
        customer_id,
        first_name: record["firstName"].as_str().unwrap_or("").to_string(),
        last_name: record["lastName"].as_str().unwrap_or("").to_string(),
        email: record["email"].as_str().unwrap_or("").to_string(),
        phone: record["phone"].as_str().unwrap_or("").to_string(),
        country_id: value_i64(&record["countryID"]),
        addresses,
    })
}

// =============================================================================
// Lookup
// =============================================================================

/// Finds the order's billing customer in the ERP: by stored mapping when one
/// exists, otherwise by billing email. `Ok(None)` means "not found, create".
async fn lookup_customer(
    ctx: &StageContext<'_>,
    order: &Order,
    include_addresses: bool,
) -> SyncResult<Result<Option<ErpCustomer>, StageOutcome>> {
    let mut params = RequestParams::new();

    match ctx
        .db
        .mappings()
        .get(EntityKind::OrderCustomer, order.id)
        .await?
    {
        Some(customer_id) => {
            params.set("customerID", customer_id);
        }
        None => {
            params.set("searchEmail", order.billing_email.clone());
        }
    }

    if include_addresses {
        params.set("getAddresses", 1);
    }

    let response = match ctx
        .client
        .send(&RemoteRequest::single("getCustomers", params))
        .await?
        .into_response()
    {
        Ok(response) => response,
        Err(outcome) => return Ok(Err(outcome)),
    };

    if response.records.is_empty() {
        return Ok(Ok(None));
    }

    // Report the read to the data-usage log
    let ids: Vec<String> = response
        .records
        .iter()
        .filter_map(|r| value_i64(&r["customerID"]).map(|id| id.to_string()))
        .collect();
    log_customer_data_usage(ctx, &ids.join(","), "read").await;

    Ok(Ok(response.records.first().and_then(customer_from_record)))
}

// =============================================================================
// Save Customer
// =============================================================================

/// Resolves the order's billing customer, updating changed fields in place
/// or creating a new customer, and returns its ERP id.
pub(crate) async fn save_customer(
    ctx: &StageContext<'_>,
    order: &Order,
    env: &OrderSyncEnv,
) -> SyncResult<Result<i64, StageOutcome>> {
    let existing = match lookup_customer(ctx, order, false).await? {
        Ok(existing) => existing,
        Err(outcome) => return Ok(Err(outcome)),
    };

    let country_id = ctx
        .reference()
        .country_id_by_code(&order.billing.country)
        .await?;

    let mut params = RequestParams::new();
    let activity;

    match &existing {
        Some(customer) => {
            activity = "update";

            if customer.first_name != order.billing_first_name {
                params.set("firstName", order.billing_first_name.clone());
            }
            if customer.last_name != order.billing_last_name {
                params.set("lastName", order.billing_last_name.clone());
            }
            if customer.email != order.billing_email {
                params.set("email", order.billing_email.clone());
            }
            if customer.phone != order.billing_phone {
                params.set("phone", order.billing_phone.clone());
            }
            if let Some(country_id) = country_id {
                if customer.country_id != Some(country_id) {
                    params.set("countryID", country_id);
                }
            }

            if params.is_empty() {
                // Nothing changed; reuse as-is
                ctx.db
                    .mappings()
                    .set(EntityKind::OrderCustomer, order.id, customer.customer_id)
                    .await?;
                return Ok(Ok(customer.customer_id));
            }

            params.set("customerID", customer.customer_id);
        }
        None => {
            activity = "create";

            params.set("firstName", order.billing_first_name.clone());
            params.set("lastName", order.billing_last_name.clone());
            params.set("email", order.billing_email.clone());
            params.set("phone", order.billing_phone.clone());

            if env.conf.enable_waybill_customers {
                params.set("shipGoodsWithWaybills", 0);
            }
            if let Some(country_id) = country_id {
                params.set("countryID", country_id);
            }
            if let Some(user_id) = order.customer_user_id {
                params.set("integrationCode", user_id);
            }
        }
    }

    let response = match ctx
        .client
        .send(&RemoteRequest::single("saveCustomer", params))
        .await?
        .into_response()
    {
        Ok(response) => response,
        Err(outcome) => return Ok(Err(outcome)),
    };

    let Some(customer_id) = response
        .first_record()
        .and_then(|r| value_i64(&r["customerID"]))
    else {
        return Ok(Err(StageOutcome::Failed(
            "customer sync returned no customerID".into(),
        )));
    };

    ctx.db
        .mappings()
        .set(EntityKind::OrderCustomer, order.id, customer_id)
        .await?;
    info!(customer_id, order_id = order.id, "Customer assigned to order");
    log_customer_data_usage(ctx, &customer_id.to_string(), activity).await;

    Ok(Ok(customer_id))
}

// =============================================================================
// Addresses
// =============================================================================

/// Resolves billing and shipping addresses for the order, reusing exact
/// matches and creating the rest, and returns the sales-document parameter
/// fragment wiring customer and addresses together.
pub(crate) async fn resolve_addresses(
    ctx: &StageContext<'_>,
    order: &Order,
    customer_id: i64,
    env: &OrderSyncEnv,
) -> SyncResult<Result<RequestParams, StageOutcome>> {
    let customer = match lookup_customer(ctx, order, true).await? {
        Ok(customer) => customer,
        Err(outcome) => return Ok(Err(outcome)),
    };
    let existing: &[ErpAddress] = customer.as_ref().map(|c| c.addresses.as_slice()).unwrap_or(&[]);

    let billing_type = ctx.options.billing_address_type_id;
    let shipping_type = ctx.options.shipping_address_type_id;

    let billing_id = match resolve_single_address(
        ctx,
        customer_id,
        billing_type,
        &order.billing,
        existing,
    )
    .await?
    {
        Ok(id) => id,
        Err(outcome) => return Ok(Err(outcome)),
    };

    let shipping_id = match resolve_single_address(
        ctx,
        customer_id,
        shipping_type,
        &order.shipping,
        existing,
    )
    .await?
    {
        Ok(id) => id,
        Err(outcome) => return Ok(Err(outcome)),
    };

    let mut params = RequestParams::new();
    if env.conf.invoice_client_is_payer {
        params.set("customerID", customer_id);
        params.set("addressID", billing_id);
        params.set("shipToID", customer_id);
        params.set("shipToAddressID", shipping_id);
    } else {
        params.set("payerID", customer_id);
        params.set("addressID", shipping_id);
        params.set("payerAddressID", billing_id);
    }

    Ok(Ok(params))
}

/// Reuses an exactly-matching stored address of the given type, else saves
/// a new one. Returns the address id either way.
async fn resolve_single_address(
    ctx: &StageContext<'_>,
    customer_id: i64,
    type_id: i64,
    address: &OrderAddress,
    existing: &[ErpAddress],
) -> SyncResult<Result<i64, StageOutcome>> {
    let street = address.street();

    let matched = existing.iter().find(|a| {
        a.type_id == type_id
            && a.street == street
            && a.city == address.city
            && a.postal_code == address.postcode
            && a.country == address.country
    });

    if let Some(found) = matched {
        debug!(address_id = found.address_id, type_id, "Reusing stored address");
        return Ok(Ok(found.address_id));
    }

    let mut params = RequestParams::new();
    params.set("ownerID", customer_id);
    params.set("typeID", type_id);
    params.set("street", street);
    params.set("city", address.city.clone());
    params.set("postalCode", address.postcode.clone());
    params.set("country", address.country.clone());
    params.set("attributeName1", "company");
    params.set("attributeType1", "string");
    params.set(
        "attributeValue1",
        address.company.clone().unwrap_or_default(),
    );

    let response = match ctx
        .client
        .send(&RemoteRequest::single("saveAddress", params))
        .await?
        .into_response()
    {
        Ok(response) => response,
        Err(outcome) => return Ok(Err(outcome)),
    };

    match response
        .first_record()
        .and_then(|r| value_i64(&r["addressID"]))
    {
        Some(address_id) => {
            debug!(address_id, type_id, "Address saved");
            Ok(Ok(address_id))
        }
        None => Ok(Err(StageOutcome::Failed("failed to sync address".into()))),
    }
}

// =============================================================================
// Payment
// =============================================================================

/// Records a payment against a saved sales document. Only called for orders
/// that already show a payment-completed timestamp; failures are logged but
/// do not fail the order.
pub(crate) async fn record_payment(
    ctx: &StageContext<'_>,
    order: &Order,
    invoice_id: i64,
    env: &OrderSyncEnv,
) -> SyncResult<()> {
    let Some(paid_at) = order.paid_at else {
        return Ok(());
    };

    let mut params = RequestParams::new();
    params.set("documentID", invoice_id);
    params.set("typeID", ctx.options.payment_type_id);
    params.set("date", paid_at.format("%Y-%m-%d").to_string());
    params.set("sum", order.total);
    if let Some(transaction_id) = &order.transaction_id {
        params.set("info", transaction_id.clone());
    }
    if env.currencies.contains(&order.currency) {
        params.set("currencyCode", order.currency.clone());
    }

    match ctx
        .client
        .send(&RemoteRequest::single("savePayment", params))
        .await
    {
        Ok(outcome) => {
            if let Err(stage_outcome) = outcome.into_response() {
                warn!(
                    order_id = order.id,
                    invoice_id,
                    ?stage_outcome,
                    "Payment was not recorded"
                );
            }
        }
        Err(err) => warn!(order_id = order.id, %err, "Payment call failed"),
    }

    Ok(())
}

// =============================================================================
// Data-usage Log
// =============================================================================

/// Reports processing of customer data to the ERP's audit log. Best-effort:
/// a failure here never affects the order sync.
async fn log_customer_data_usage(ctx: &StageContext<'_>, customer_ids: &str, activity: &str) {
    let mut params = RequestParams::new();
    params.set("customerIDs", customer_ids);
    params.set("activityType", activity);
    params.set("description", "Sync with webstore");
    params.set("fields", if activity == "read" { "email" } else { "all" });

    if let Err(err) = ctx
        .client
        .send(&RemoteRequest::single(
            "logProcessingOfCustomerData",
            params,
        ))
        .await
    {
        debug!(%err, "Customer data-usage log call failed");
    }
}

//! # Reference Data Service
//!
//! Pulls reference data from the ERP and caches it locally: currencies,
//! countries (incremental, watermark-based), VAT rates, address types,
//! configuration parameters, payment types, warehouses and product groups.
//!
//! TTL-cached payloads live for [`REFERENCE_CACHE_TTL_SECS`]; the country
//! list is accumulated forever and refreshed incrementally via the ERP's
//! `changedSince` filter.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info};

use storelink_core::schedule::StageOutcome;
use storelink_core::RequestParams;
use storelink_db::repository::reference::keys;
use storelink_db::Database;

use crate::client::ErpClient;
use crate::error::SyncResult;
use crate::protocol::{value_f64, value_i64, value_truthy, RemoteRequest};

// =============================================================================
// Constants
// =============================================================================

/// Lifetime of the TTL caches (VAT rates, address types, conf parameters).
pub const REFERENCE_CACHE_TTL_SECS: i64 = 3600;

/// Page size of the incremental country pull.
const COUNTRIES_PAGE_SIZE: i64 = 100;

/// A fetch either yields the value or the stage outcome (rate limit, quota,
/// failure) the sequencer should see instead. Infrastructure failures travel
/// separately as `SyncError`.
pub type Fetched<T> = Result<T, StageOutcome>;

// =============================================================================
// Configuration Parameters
// =============================================================================

/// ERP configuration flags consumed by order and customer sync.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfParameters {
    /// When set, the invoice client is the payer: the billing address goes
    /// on the document and the shipping address on the ship-to party.
    pub invoice_client_is_payer: bool,

    /// When set, newly created customers get waybill shipping disabled.
    pub enable_waybill_customers: bool,
}

// =============================================================================
// Reference Service
// =============================================================================

/// Reference-data access shared by the stages and the operator CLI.
pub struct ReferenceService<'a> {
    client: &'a ErpClient,
    db: &'a Database,
}

impl<'a> ReferenceService<'a> {
    pub fn new(client: &'a ErpClient, db: &'a Database) -> Self {
        ReferenceService { client, db }
    }

    // =========================================================================
    // Currencies
    // =========================================================================

    /// Currency codes configured in the ERP. An order in any other currency
    /// cannot be synced.
    pub async fn currency_codes(&self) -> SyncResult<Fetched<HashSet<String>>> {
        let response = match self
            .client
            .send(&RemoteRequest::single("getCurrencies", RequestParams::new()))
            .await?
            .into_response()
        {
            Ok(response) => response,
            Err(outcome) => return Ok(Err(outcome)),
        };

        let codes: HashSet<String> = response
            .records
            .iter()
            .filter_map(|r| r["code"].as_str().map(str::to_string))
            .collect();

        if codes.is_empty() {
            return Ok(Err(StageOutcome::Failed(
                "ERP returned no currencies".into(),
            )));
        }

        Ok(Ok(codes))
    }

    // =========================================================================
    // Countries
    // =========================================================================

    /// Refreshes the local country list. Pages through `getCountries`
    /// (100 per page) and only asks for records changed since the last pull.
    pub async fn update_countries(&self) -> SyncResult<Fetched<()>> {
        let watermark: Option<i64> = self
            .db
            .reference()
            .get(keys::COUNTRIES_UPDATED)
            .await?
            .and_then(|s| s.parse().ok());

        let mut fetched: Map<String, Value> = Map::new();
        let mut page: i64 = 1;
        let mut seen: i64 = 0;
        let mut total: i64 = 1;

        while seen < total {
            let mut params = RequestParams::new();
            params.set("recordsOnPage", COUNTRIES_PAGE_SIZE);
            params.set("pageNo", page);
            if let Some(since) = watermark {
                params.set("changedSince", since);
            }

            let response = match self
                .client
                .send(&RemoteRequest::single("getCountries", params))
                .await?
                .into_response()
            {
                Ok(response) => response,
                Err(outcome) => return Ok(Err(outcome)),
            };

            if response.records.is_empty() {
                break;
            }

            for record in &response.records {
                if let Some(code) = record["countryCode"].as_str() {
                    fetched.insert(code.to_string(), record.clone());
                }
            }

            seen += response
                .status
                .records_in_response
                .unwrap_or(response.records.len() as i64);
            total = response.status.records_total.unwrap_or(seen);
            page += 1;
        }

        if !fetched.is_empty() {
            // Merge on top of the accumulated list; an incremental pull only
            // carries the changed countries.
            let mut merged: Map<String, Value> = self
                .db
                .reference()
                .get(keys::COUNTRIES)
                .await?
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default();
            let count = fetched.len();
            merged.extend(fetched);

            self.db
                .reference()
                .put(keys::COUNTRIES, &Value::Object(merged).to_string())
                .await?;

            info!(updated = count, "Country list refreshed");
        }

        self.db
            .reference()
            .put(keys::COUNTRIES_UPDATED, &Utc::now().timestamp().to_string())
            .await?;

        Ok(Ok(()))
    }

    /// Country id for an ISO code, from the accumulated local list.
    /// Returns `None` for unknown codes; customers then sync without one.
    pub async fn country_id_by_code(&self, code: &str) -> SyncResult<Option<i64>> {
        let countries: Option<Map<String, Value>> = self
            .db
            .reference()
            .get(keys::COUNTRIES)
            .await?
            .and_then(|s| serde_json::from_str(&s).ok());

        Ok(countries
            .as_ref()
            .and_then(|map| map.get(code))
            .and_then(|record| value_i64(&record["countryID"])))
    }

    // =========================================================================
    // VAT Rates
    // =========================================================================

    /// Percentage of one VAT rate, TTL-cached.
    pub async fn vat_rate_percentage(&self, rate_id: i64) -> SyncResult<Fetched<f64>> {
        if let Some(cached) = self
            .db
            .reference()
            .get_fresh(keys::VAT_RATES, REFERENCE_CACHE_TTL_SECS)
            .await?
        {
            if let Ok(rates) = serde_json::from_str::<HashMap<String, f64>>(&cached) {
                if let Some(rate) = rates.get(&rate_id.to_string()) {
                    debug!(rate_id, rate, "VAT rate served from cache");
                    return Ok(Ok(*rate));
                }
            }
        }

        let response = match self
            .client
            .send(&RemoteRequest::single("getVatRates", RequestParams::new()))
            .await?
            .into_response()
        {
            Ok(response) => response,
            Err(outcome) => return Ok(Err(outcome)),
        };

        let mut rates: HashMap<String, f64> = HashMap::new();
        for record in &response.records {
            if let (Some(id), Some(rate)) = (value_i64(&record["id"]), value_f64(&record["rate"]))
            {
                rates.insert(id.to_string(), rate);
            }
        }

        self.db
            .reference()
            .put(keys::VAT_RATES, &serde_json::to_string(&rates)?)
            .await?;

        match rates.get(&rate_id.to_string()) {
            Some(rate) => Ok(Ok(*rate)),
            None => Ok(Err(StageOutcome::Failed(format!(
                "VAT rate {rate_id} is not configured in the ERP"
            )))),
        }
    }

    // =========================================================================
    // Address Types
    // =========================================================================

    /// Actively-used address types (id → name), TTL-cached.
    pub async fn address_types(&self) -> SyncResult<Fetched<HashMap<i64, String>>> {
        if let Some(cached) = self
            .db
            .reference()
            .get_fresh(keys::ADDRESS_TYPES, REFERENCE_CACHE_TTL_SECS)
            .await?
        {
            if let Ok(types) = serde_json::from_str::<HashMap<i64, String>>(&cached) {
                return Ok(Ok(types));
            }
        }

        let response = match self
            .client
            .send(&RemoteRequest::single(
                "getAddressTypes",
                RequestParams::new(),
            ))
            .await?
            .into_response()
        {
            Ok(response) => response,
            Err(outcome) => return Ok(Err(outcome)),
        };

        let mut types = HashMap::new();
        for record in &response.records {
            if value_truthy(&record["activelyUsed"]) {
                if let (Some(id), Some(name)) = (value_i64(&record["id"]), record["name"].as_str())
                {
                    types.insert(id, name.to_string());
                }
            }
        }

        self.db
            .reference()
            .put(keys::ADDRESS_TYPES, &serde_json::to_string(&types)?)
            .await?;

        Ok(Ok(types))
    }

    // =========================================================================
    // Configuration Parameters
    // =========================================================================

    /// ERP configuration flags, TTL-cached.
    pub async fn conf_parameters(&self) -> SyncResult<Fetched<ConfParameters>> {
        if let Some(cached) = self
            .db
            .reference()
            .get_fresh(keys::CONF_PARAMETERS, REFERENCE_CACHE_TTL_SECS)
            .await?
        {
            if let Ok(raw) = serde_json::from_str::<Value>(&cached) {
                return Ok(Ok(conf_from_record(&raw)));
            }
        }

        let response = match self
            .client
            .send(&RemoteRequest::single(
                "getConfParameters",
                RequestParams::new(),
            ))
            .await?
            .into_response()
        {
            Ok(response) => response,
            Err(outcome) => return Ok(Err(outcome)),
        };

        let record = match response.first_record() {
            Some(record) => record.clone(),
            None => {
                return Ok(Err(StageOutcome::Failed(
                    "ERP returned no configuration parameters".into(),
                )))
            }
        };

        self.db
            .reference()
            .put(keys::CONF_PARAMETERS, &record.to_string())
            .await?;

        Ok(Ok(conf_from_record(&record)))
    }

    // =========================================================================
    // Id → Name Lists
    // =========================================================================

    /// Invoice payment types (id → type).
    pub async fn payment_types(&self) -> SyncResult<Fetched<HashMap<String, String>>> {
        self.items_list("getInvoicePaymentTypes", "id", "type", keys::PAYMENT_TYPES)
            .await
    }

    /// Allowed warehouses (id → name).
    pub async fn warehouses(&self) -> SyncResult<Fetched<HashMap<String, String>>> {
        self.items_list("getAllowedWarehouses", "warehouseID", "name", keys::WAREHOUSES)
            .await
    }

    /// Product groups (id → name).
    pub async fn product_groups(&self) -> SyncResult<Fetched<HashMap<String, String>>> {
        self.items_list("getProductGroups", "productGroupID", "name", keys::PRODUCT_GROUPS)
            .await
    }

    /// Shared fetch for simple id → name listings; the result is cached for
    /// the operator UI.
    async fn items_list(
        &self,
        request: &str,
        key_field: &str,
        value_field: &str,
        cache_key: &str,
    ) -> SyncResult<Fetched<HashMap<String, String>>> {
        let response = match self
            .client
            .send(&RemoteRequest::single(request, RequestParams::new()))
            .await?
            .into_response()
        {
            Ok(response) => response,
            Err(outcome) => return Ok(Err(outcome)),
        };

        let mut items = HashMap::new();
        for record in &response.records {
            let key = value_i64(&record[key_field])
                .map(|id| id.to_string())
                .or_else(|| record[key_field].as_str().map(str::to_string));
            let value = record[value_field].as_str().map(str::to_string);
            if let (Some(key), Some(value)) = (key, value) {
                items.insert(key, value);
            }
        }

        self.db
            .reference()
            .put(cache_key, &serde_json::to_string(&items)?)
            .await?;

        Ok(Ok(items))
    }

    // =========================================================================
    // Delivery Types
    // =========================================================================

    /// Registered delivery types (code → id). Not cached: the shipping stage
    /// compares against the live list.
    pub async fn delivery_types(&self) -> SyncResult<Fetched<HashMap<String, i64>>> {
        let response = match self
            .client
            .send(&RemoteRequest::single(
                "getDeliveryTypes",
                RequestParams::new(),
            ))
            .await?
            .into_response()
        {
            Ok(response) => response,
            Err(outcome) => return Ok(Err(outcome)),
        };

        let mut types = HashMap::new();
        for record in &response.records {
            if let (Some(code), Some(id)) = (
                record["code"].as_str(),
                value_i64(&record["deliveryTypeID"]),
            ) {
                types.insert(code.to_string(), id);
            }
        }

        Ok(Ok(types))
    }

    /// Registers one storefront shipping method as a delivery type.
    pub async fn save_delivery_type(&self, code: &str, name: &str) -> SyncResult<Fetched<()>> {
        let mut params = RequestParams::new();
        params.set("code", code);
        params.set("name", name);

        match self
            .client
            .send(&RemoteRequest::single("saveDeliveryType", params))
            .await?
            .into_response()
        {
            Ok(_) => Ok(Ok(())),
            Err(outcome) => Ok(Err(outcome)),
        }
    }
}

/// Interprets the flags of a raw `getConfParameters` record.
fn conf_from_record(record: &Value) -> ConfParameters {
    ConfParameters {
        invoice_client_is_payer: value_truthy(&record["invoice_client_is_payer"]),
        enable_waybill_customers: value_truthy(&record["enable_waybill_customers"]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use storelink_db::DbConfig;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::ErpConfig;

    async fn service_fixture(server: &MockServer) -> (ErpClient, Database) {
        let client = ErpClient::new(ErpConfig {
            client_code: "123456".into(),
            username: "bridge".into(),
            password: "secret".into(),
            api_url: Some(format!("{}/api/", server.uri())),
        })
        .unwrap();
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        (client, db)
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

    #[tokio::test]
    async fn test_countries_accumulate_across_pages() {
        let server = MockServer::start().await;
        mount_auth(&server).await;

        Mock::given(method("POST"))
            .and(path("/api/"))
            .and(body_string_contains("getCountries"))
            .and(body_string_contains("pageNo=1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {
                    "responseStatus": "ok",
                    "recordsTotal": 3,
                    "recordsInResponse": 2
                },
                "records": [
                    {"countryCode": "EE", "countryID": 1},
                    {"countryCode": "FI", "countryID": 2}
                ]
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/"))
            .and(body_string_contains("getCountries"))
            .and(body_string_contains("pageNo=2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {
                    "responseStatus": "ok",
                    "recordsTotal": 3,
                    "recordsInResponse": 1
                },
                "records": [{"countryCode": "SE", "countryID": 3}]
            })))
            .mount(&server)
            .await;

        let (client, db) = service_fixture(&server).await;
        let reference = ReferenceService::new(&client, &db);

        reference.update_countries().await.unwrap().unwrap();

        // All three pages' worth of countries are resolvable locally
        assert_eq!(reference.country_id_by_code("EE").await.unwrap(), Some(1));
        assert_eq!(reference.country_id_by_code("SE").await.unwrap(), Some(3));
        assert_eq!(reference.country_id_by_code("XX").await.unwrap(), None);

        // A second pull is incremental: it carries the stored watermark
        reference.update_countries().await.unwrap().unwrap();
        let incremental = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| {
                let body = String::from_utf8_lossy(&r.body).into_owned();
                body.contains("getCountries") && body.contains("changedSince")
            })
            .count();
        assert!(incremental >= 1);
    }

    #[tokio::test]
    async fn test_vat_rate_cached_after_first_fetch() {
        let server = MockServer::start().await;
        mount_auth(&server).await;

        Mock::given(method("POST"))
            .and(path("/api/"))
            .and(body_string_contains("getVatRates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"responseStatus": "ok"},
                "records": [
                    {"id": 1, "name": "20%", "rate": "20", "active": 1},
                    {"id": 2, "name": "9%", "rate": 9.0, "active": 1}
                ]
            })))
            .mount(&server)
            .await;

        let (client, db) = service_fixture(&server).await;
        let reference = ReferenceService::new(&client, &db);

        assert_eq!(reference.vat_rate_percentage(1).await.unwrap().unwrap(), 20.0);
        assert_eq!(reference.vat_rate_percentage(2).await.unwrap().unwrap(), 9.0);

        let fetches = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| String::from_utf8_lossy(&r.body).contains("getVatRates"))
            .count();
        // The second rate came from the TTL cache
        assert_eq!(fetches, 1);
    }

    #[test]
    fn test_conf_flags_accept_loose_types() {
        let conf = conf_from_record(&json!({
            "invoice_client_is_payer": "1",
            "enable_waybill_customers": 0
        }));
        assert!(conf.invoice_client_is_payer);
        assert!(!conf.enable_waybill_customers);

        let absent = conf_from_record(&json!({}));
        assert!(!absent.invoice_client_is_payer);
    }
}

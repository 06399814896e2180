//! # Structured Request Builder
//!
//! The ERP's bulk API addresses repeated fields by position: a matrix
//! product carries `dimensionID1..N`, an inventory registration carries
//! `productID1/amount1/price1, productID2/…`, a sales document carries one
//! indexed group per invoice line. Building those keys by string
//! concatenation scattered through business logic invites slot collisions
//! and off-by-one numbering, so every positional group here is a typed list
//! that assigns its indexes in one place when the request is rendered.
//!
//! ## Request Shapes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Single operation          Batch item (inside "requests" array)        │
//! │  ─────────────────         ──────────────────────────────────          │
//! │  request  = saveProduct    requestID   = 42   (local entity id)        │
//! │  name     = "Shirt"        requestName = saveProduct                   │
//! │  type     = MATRIX         name        = "Shirt"                       │
//! │  dimensionID1 = 7          type        = MATRIX                        │
//! │  dimensionID2 = 9          dimensionID1 = 7                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// Request Parameters
// =============================================================================

/// Ordered parameter list for one ERP operation.
///
/// Insertion order is preserved so rendered payloads are stable and logs are
/// readable; the wire format itself does not care.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestParams {
    entries: Vec<(String, Value)>,
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a scalar parameter, replacing any previous value for the key.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key.to_string(), value));
        }
        self
    }

    /// Sets `key{index}`, the ERP's positional addressing. All positional
    /// writes go through here so numbering mistakes cannot hide in format
    /// strings scattered across stages.
    pub fn set_slot(&mut self, key: &str, index: usize, value: impl Into<Value>) -> &mut Self {
        self.set(&format!("{key}{index}"), value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Renders parameters as flat form fields (for single operations).
    pub fn to_form_fields(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), render_form_value(v)))
            .collect()
    }

    /// Renders parameters as a JSON object (for batch items).
    pub fn to_json_object(&self) -> Map<String, Value> {
        self.entries.iter().cloned().collect()
    }
}

/// Form fields carry the bare scalar, not its JSON quoting.
fn render_form_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// =============================================================================
// Item Request
// =============================================================================

/// One tagged operation inside a batch.
///
/// `request_id` is the local entity's identifier; the ERP echoes it back in
/// the per-item status block, which is how the batching engine maps results
/// to source records even when the response reorders them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRequest {
    pub request_id: i64,
    pub request_name: String,
    pub params: RequestParams,
}

impl ItemRequest {
    pub fn new(request_id: i64, request_name: impl Into<String>) -> Self {
        ItemRequest {
            request_id,
            request_name: request_name.into(),
            params: RequestParams::new(),
        }
    }

    /// Renders the tagged JSON object submitted inside the `requests` array.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("requestID".to_string(), Value::from(self.request_id));
        object.insert(
            "requestName".to_string(),
            Value::from(self.request_name.clone()),
        );
        for (key, value) in self.params.iter() {
            object.insert(key.to_string(), value.clone());
        }
        Value::Object(object)
    }
}

// =============================================================================
// Positional Slot Groups
// =============================================================================

/// Matrix dimension references of a parent product (`dimensionID1..N`).
#[derive(Debug, Clone, Default)]
pub struct DimensionRefs(Vec<i64>);

impl DimensionRefs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, dimension_id: i64) {
        self.0.push(dimension_id);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Writes `dimensionID1..N` in insertion order.
    pub fn apply(&self, params: &mut RequestParams) {
        for (i, id) in self.0.iter().enumerate() {
            params.set_slot("dimensionID", i + 1, *id);
        }
    }
}

/// Dimension value references of a variation (`dimValueID1..N`).
#[derive(Debug, Clone, Default)]
pub struct DimensionValueRefs(Vec<i64>);

impl DimensionValueRefs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item_id: i64) {
        self.0.push(item_id);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Writes `dimValueID1..N` in insertion order.
    pub fn apply(&self, params: &mut RequestParams) {
        for (i, id) in self.0.iter().enumerate() {
            params.set_slot("dimValueID", i + 1, *id);
        }
    }
}

/// One line of an inventory registration.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryLine {
    pub product_id: i64,
    /// Signed adjustment: positive receives stock, negative writes it off.
    pub amount: i64,
    pub price: f64,
}

/// Inventory registration lines (`productID{i}/amount{i}/price{i}`).
#[derive(Debug, Clone, Default)]
pub struct InventoryLines(Vec<InventoryLine>);

impl InventoryLines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: InventoryLine) {
        self.0.push(line);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Writes one indexed triple per line, starting at slot 1.
    pub fn apply(&self, params: &mut RequestParams) {
        for (i, line) in self.0.iter().enumerate() {
            params.set_slot("productID", i + 1, line.product_id);
            params.set_slot("amount", i + 1, line.amount);
            params.set_slot("price", i + 1, line.price);
        }
    }
}

/// What a sales document line sells.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentLineItem {
    /// A mapped catalog product, referenced by its ERP product id.
    Product(i64),
    /// A free-text line (unmapped product, or the shipping charge).
    Named(String),
}

/// One invoice line of a sales document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentLine {
    pub item: DocumentLineItem,
    pub vat_rate_id: i64,
    pub amount: i64,
    pub price: f64,
}

/// Sales document lines
/// (`productID{i}|itemName{i}` + `vatrateID{i}/amount{i}/price{i}`).
#[derive(Debug, Clone, Default)]
pub struct DocumentLines(Vec<DocumentLine>);

impl DocumentLines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: DocumentLine) {
        self.0.push(line);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Row number (1-based) the next pushed line will occupy. Promotion
    /// price overrides address rows by this numbering.
    pub fn next_row(&self) -> usize {
        self.0.len() + 1
    }

    /// Writes one indexed group per line, starting at slot 1.
    pub fn apply(&self, params: &mut RequestParams) {
        for (i, line) in self.0.iter().enumerate() {
            match &line.item {
                DocumentLineItem::Product(remote_id) => {
                    params.set_slot("productID", i + 1, *remote_id);
                }
                DocumentLineItem::Named(name) => {
                    params.set_slot("itemName", i + 1, name.clone());
                }
            }
            params.set_slot("vatrateID", i + 1, line.vat_rate_id);
            params.set_slot("amount", i + 1, line.amount);
            params.set_slot("price", i + 1, line.price);
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces_existing_key() {
        let mut params = RequestParams::new();
        params.set("name", "first");
        params.set("name", "second");
        assert_eq!(params.get("name"), Some(&Value::from("second")));
        assert_eq!(params.iter().count(), 1);
    }

    #[test]
    fn test_item_request_json_shape() {
        let mut item = ItemRequest::new(42, "saveProduct");
        item.params.set("name", "Shirt").set("type", "MATRIX");

        let json = item.to_json();
        assert_eq!(json["requestID"], 42);
        assert_eq!(json["requestName"], "saveProduct");
        assert_eq!(json["name"], "Shirt");
        assert_eq!(json["type"], "MATRIX");
    }

    #[test]
    fn test_form_fields_render_bare_scalars() {
        let mut params = RequestParams::new();
        params.set("request", "getProducts");
        params.set("warehouseID", 3);

        let fields = params.to_form_fields();
        assert_eq!(
            fields,
            vec![
                ("request".to_string(), "getProducts".to_string()),
                ("warehouseID".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn test_dimension_slots_number_from_one() {
        let mut refs = DimensionRefs::new();
        refs.push(7);
        refs.push(9);

        let mut params = RequestParams::new();
        refs.apply(&mut params);

        assert_eq!(params.get("dimensionID1"), Some(&Value::from(7)));
        assert_eq!(params.get("dimensionID2"), Some(&Value::from(9)));
        assert_eq!(params.get("dimensionID3"), None);
    }

    #[test]
    fn test_inventory_lines_share_one_counter() {
        let mut lines = InventoryLines::new();
        lines.push(InventoryLine {
            product_id: 100,
            amount: -3,
            price: 9.5,
        });
        lines.push(InventoryLine {
            product_id: 200,
            amount: 8,
            price: 4.0,
        });

        let mut params = RequestParams::new();
        lines.apply(&mut params);

        assert_eq!(params.get("productID1"), Some(&Value::from(100)));
        assert_eq!(params.get("amount1"), Some(&Value::from(-3)));
        assert_eq!(params.get("productID2"), Some(&Value::from(200)));
        assert_eq!(params.get("price2"), Some(&Value::from(4.0)));
    }

    #[test]
    fn test_document_lines_product_and_named() {
        let mut lines = DocumentLines::new();
        lines.push(DocumentLine {
            item: DocumentLineItem::Product(555),
            vat_rate_id: 1,
            amount: 2,
            price: 10.0,
        });
        assert_eq!(lines.next_row(), 2);
        lines.push(DocumentLine {
            item: DocumentLineItem::Named("Flat rate".into()),
            vat_rate_id: 1,
            amount: 1,
            price: 5.0,
        });

        let mut params = RequestParams::new();
        lines.apply(&mut params);

        assert_eq!(params.get("productID1"), Some(&Value::from(555)));
        assert_eq!(params.get("itemName1"), None);
        assert_eq!(params.get("itemName2"), Some(&Value::from("Flat rate")));
        assert_eq!(params.get("amount2"), Some(&Value::from(1)));
    }
}

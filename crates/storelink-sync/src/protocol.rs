//! # ERP Wire Protocol
//!
//! Request and response shapes of the ERP's bulk HTTP API.
//!
//! ## Wire Format
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  REQUEST: HTTP POST, form-encoded                                       │
//! │                                                                         │
//! │  clientCode=123456                                                      │
//! │  sessionKey=abcd...            (absent only for verifyUser)             │
//! │  request=getProducts           ── single operation + flat params        │
//! │     ... or ...                                                          │
//! │  requests=[{...},{...}]        ── JSON array of tagged operations,      │
//! │                                   each with requestID + requestName     │
//! │                                                                         │
//! │  RESPONSE: JSON                                                         │
//! │                                                                         │
//! │  { "status":   { "responseStatus": "ok"|"error", "errorCode": …,        │
//! │                  "recordsTotal": …, "recordsInResponse": … },           │
//! │    "records":  [ … ],                                                   │
//! │    "requests": [ { "status": { "requestID": …, … }, "records": […] } ]  │
//! │  }              └── one entry per submitted batch item                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::Deserialize;
use serde_json::Value;

use storelink_core::batch::ItemStatus;
use storelink_core::{BatchRequest, RequestParams};

// =============================================================================
// Constants
// =============================================================================

/// Application error code signalling the hourly request quota is spent.
pub const HOURLY_QUOTA_ERROR_CODE: i64 = 1002;

/// `status.responseStatus` value of a successful call.
pub const RESPONSE_STATUS_OK: &str = "ok";

// =============================================================================
// Outgoing Requests
// =============================================================================

/// One payload posted to the ERP: a single named operation, or a batch of
/// tagged operations.
#[derive(Debug, Clone)]
pub enum RemoteRequest {
    /// `request=<name>` plus flat parameters.
    Single {
        name: String,
        params: RequestParams,
    },
    /// `requests=<JSON array>` of tagged operations.
    Batch(BatchRequest),
}

impl RemoteRequest {
    pub fn single(name: impl Into<String>, params: RequestParams) -> Self {
        RemoteRequest::Single {
            name: name.into(),
            params,
        }
    }

    pub fn batch(batch: BatchRequest) -> Self {
        RemoteRequest::Batch(batch)
    }

    /// Short description for log lines.
    pub fn describe(&self) -> String {
        match self {
            RemoteRequest::Single { name, .. } => format!("request {name}"),
            RemoteRequest::Batch(batch) => format!("bulk request of {} items", batch.len()),
        }
    }

    /// Renders the operation-specific form fields. Credentials are attached
    /// by the client.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        match self {
            RemoteRequest::Single { name, params } => {
                let mut fields = vec![("request".to_string(), name.clone())];
                fields.extend(params.to_form_fields());
                fields
            }
            RemoteRequest::Batch(batch) => {
                vec![("requests".to_string(), batch.to_json_payload().to_string())]
            }
        }
    }
}

// =============================================================================
// Incoming Responses
// =============================================================================

/// The `status` block of a response or of one batch item.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseStatus {
    /// Echoed tag of a batch item. The ERP sometimes renders it as a string,
    /// so it is coerced lazily via [`ResponseStatus::request_id`].
    #[serde(rename = "requestID", default)]
    pub request_id: Option<Value>,

    #[serde(rename = "responseStatus")]
    pub response_status: String,

    #[serde(rename = "errorCode", default)]
    pub error_code: Option<i64>,

    #[serde(rename = "errorField", default)]
    pub error_field: Option<String>,

    #[serde(rename = "errorMessage", default)]
    pub error_message: Option<String>,

    #[serde(rename = "recordsTotal", default)]
    pub records_total: Option<i64>,

    #[serde(rename = "recordsInResponse", default)]
    pub records_in_response: Option<i64>,
}

impl ResponseStatus {
    pub fn is_ok(&self) -> bool {
        self.response_status == RESPONSE_STATUS_OK
    }

    /// Echoed request id as an integer, whether the ERP sent it as a number
    /// or a string.
    pub fn request_id(&self) -> Option<i64> {
        match &self.request_id {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
    }

    /// Human-readable failure summary for logs and status lines.
    pub fn describe_error(&self) -> String {
        let mut message = match self.error_code {
            Some(code) => format!("error code {code}"),
            None => format!("status '{}'", self.response_status),
        };
        if let Some(field) = &self.error_field {
            message.push_str(&format!(" (field {field})"));
        }
        if let Some(text) = &self.error_message {
            message.push_str(": ");
            message.push_str(text);
        }
        message
    }
}

/// One batch item's result inside the envelope's `requests` array.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemResponse {
    pub status: ResponseStatus,

    #[serde(default)]
    pub records: Vec<Value>,
}

/// A full decoded API response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse {
    pub status: ResponseStatus,

    #[serde(default)]
    pub records: Vec<Value>,

    #[serde(default)]
    pub requests: Vec<ItemResponse>,
}

impl ApiResponse {
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// First result row, if any.
    pub fn first_record(&self) -> Option<&Value> {
        self.records.first()
    }

    /// Per-item statuses handed to the batching engine for correlation.
    pub fn item_statuses(&self) -> Vec<ItemStatus> {
        self.requests
            .iter()
            .map(|item| ItemStatus {
                request_id: item.status.request_id(),
                ok: item.status.is_ok(),
                error_code: item.status.error_code,
                records: item.records.clone(),
            })
            .collect()
    }
}

// =============================================================================
// Value Coercion
// =============================================================================
// The ERP is loose about scalar types: numeric ids arrive as numbers or
// strings depending on the operation, and boolean flags as 0/1, "0"/"1" or
// true/false. All record-field reads go through these.

/// Integer field, whether sent as a number or a numeric string.
pub fn value_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Float field, whether sent as a number or a numeric string.
pub fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Truthy flag: 1, "1", true, or any nonzero number.
pub fn value_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "0" && s != "false",
        _ => false,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use storelink_core::ItemRequest;

    #[test]
    fn test_single_request_form_fields() {
        let mut params = RequestParams::new();
        params.set("warehouseID", 3);
        let request = RemoteRequest::single("getProductStock", params);

        let fields = request.form_fields();
        assert_eq!(fields[0], ("request".to_string(), "getProductStock".to_string()));
        assert_eq!(fields[1], ("warehouseID".to_string(), "3".to_string()));
    }

    #[test]
    fn test_batch_request_encodes_json_array() {
        let mut item = ItemRequest::new(7, "saveMatrixDimension");
        item.params.set("name", "Size");
        let request = RemoteRequest::batch(BatchRequest { items: vec![item] });

        let fields = request.form_fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].0, "requests");

        let parsed: Value = serde_json::from_str(&fields[0].1).unwrap();
        assert_eq!(parsed[0]["requestID"], 7);
        assert_eq!(parsed[0]["requestName"], "saveMatrixDimension");
        assert_eq!(parsed[0]["name"], "Size");
    }

    #[test]
    fn test_response_parsing_with_batch_items() {
        let body = json!({
            "status": {"responseStatus": "ok", "errorCode": 0},
            "records": [],
            "requests": [
                {
                    "status": {"requestID": 5, "responseStatus": "ok"},
                    "records": [{"dimensionID": 11}]
                },
                {
                    "status": {"requestID": "6", "responseStatus": "error", "errorCode": 1011},
                    "records": []
                }
            ]
        });

        let response: ApiResponse = serde_json::from_value(body).unwrap();
        assert!(response.is_ok());

        let statuses = response.item_statuses();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].request_id, Some(5));
        assert!(statuses[0].ok);
        // String-typed requestID still correlates
        assert_eq!(statuses[1].request_id, Some(6));
        assert!(!statuses[1].ok);
        assert_eq!(statuses[1].error_code, Some(1011));
    }

    #[test]
    fn test_value_coercion() {
        assert_eq!(value_i64(&json!(42)), Some(42));
        assert_eq!(value_i64(&json!("42")), Some(42));
        assert_eq!(value_i64(&json!(null)), None);

        assert_eq!(value_f64(&json!("20.5")), Some(20.5));

        assert!(value_truthy(&json!(1)));
        assert!(value_truthy(&json!("1")));
        assert!(!value_truthy(&json!(0)));
        assert!(!value_truthy(&json!("")));
        assert!(!value_truthy(&json!(null)));
    }

    #[test]
    fn test_describe_error() {
        let status: ResponseStatus = serde_json::from_value(json!({
            "responseStatus": "error",
            "errorCode": 1011,
            "errorField": "itemID"
        }))
        .unwrap();
        assert_eq!(status.describe_error(), "error code 1011 (field itemID)");
    }
}

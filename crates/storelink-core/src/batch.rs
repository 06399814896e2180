//! # Batching Engine
//!
//! Splits large entity collections into bounded request groups and maps the
//! ERP's per-item results back to their source records.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Batching Engine Flow                              │
//! │                                                                         │
//! │  entities ──map──► [ItemRequest; N] ──chunk──► [BatchRequest ≤100]...  │
//! │                                                                         │
//! │  one BatchRequest ──send──► ERP ──► per-item statuses (any order)      │
//! │                                        │                                │
//! │                                        ▼                                │
//! │                     correlate(batch, statuses) ──► BatchReport          │
//! │                                                                         │
//! │  RULES:                                                                 │
//! │  • input order is preserved across chunks                               │
//! │  • a requestID missing from the response is a FAILURE, never a skip     │
//! │  • one failed item fails the whole batch (no partial commit)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::request::ItemRequest;

// =============================================================================
// Constants
// =============================================================================

/// Maximum number of tagged operations the ERP accepts in one bulk call.
pub const MAX_BATCH_ITEMS: usize = 100;

// =============================================================================
// Batch Request
// =============================================================================

/// A group of up to [`MAX_BATCH_ITEMS`] tagged operations sent together.
///
/// Serializable because unsent groups are persisted in the stage cursor and
/// drained across scheduler invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub items: Vec<ItemRequest>,
}

impl BatchRequest {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Renders the JSON array submitted as the `requests` form field.
    pub fn to_json_payload(&self) -> Value {
        Value::Array(self.items.iter().map(ItemRequest::to_json).collect())
    }
}

/// Cuts an ordered item sequence into order-preserving groups of at most
/// [`MAX_BATCH_ITEMS`]. The concatenation of all produced groups equals the
/// input sequence.
pub fn into_batches(items: Vec<ItemRequest>) -> Vec<BatchRequest> {
    let mut batches = Vec::with_capacity(items.len().div_ceil(MAX_BATCH_ITEMS));
    let mut items = items.into_iter().peekable();

    while items.peek().is_some() {
        let chunk: Vec<ItemRequest> = items.by_ref().take(MAX_BATCH_ITEMS).collect();
        batches.push(BatchRequest { items: chunk });
    }

    batches
}

// =============================================================================
// Response Correlation
// =============================================================================

/// Parsed status of one item inside a batch response, produced by the wire
/// protocol layer. `request_id` is absent when the ERP returned an entry
/// without echoing the tag.
#[derive(Debug, Clone)]
pub struct ItemStatus {
    pub request_id: Option<i64>,
    pub ok: bool,
    pub error_code: Option<i64>,
    pub records: Vec<Value>,
}

/// Outcome of one submitted item after correlation.
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    /// The item succeeded; `records` carries its result rows.
    Ok { records: Vec<Value> },
    /// The item failed, or the response never mentioned it.
    Failed { error_code: Option<i64> },
}

impl ItemOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ItemOutcome::Ok { .. })
    }
}

/// Per-item outcomes of one batch, keyed by request id.
#[derive(Debug, Default)]
pub struct BatchReport {
    outcomes: HashMap<i64, ItemOutcome>,
}

impl BatchReport {
    pub fn outcome(&self, request_id: i64) -> Option<&ItemOutcome> {
        self.outcomes.get(&request_id)
    }

    /// First result row of a successful item, if any.
    pub fn first_record(&self, request_id: i64) -> Option<&Value> {
        match self.outcomes.get(&request_id) {
            Some(ItemOutcome::Ok { records }) => records.first(),
            _ => None,
        }
    }

    /// True when every submitted item succeeded. A single failed item fails
    /// the containing stage invocation; there is no partial commit.
    pub fn all_ok(&self) -> bool {
        self.outcomes.values().all(ItemOutcome::is_ok)
    }

    /// Request ids of failed items, for logging.
    pub fn failed_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .outcomes
            .iter()
            .filter(|(_, outcome)| !outcome.is_ok())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &ItemOutcome)> {
        self.outcomes.iter().map(|(id, outcome)| (*id, outcome))
    }
}

/// Matches a batch response's per-item statuses back to the submitted items.
///
/// Every submitted request id must be answered with an "ok" status to count
/// as successful. An id the response omits, or answers with a non-ok status,
/// is reported as failed. The ERP's per-item granularity is not trusted to
/// correlate cleanly, so nothing is silently skipped.
pub fn correlate(batch: &BatchRequest, statuses: &[ItemStatus]) -> BatchReport {
    let mut by_id: HashMap<i64, &ItemStatus> = HashMap::with_capacity(statuses.len());
    for status in statuses {
        if let Some(id) = status.request_id {
            by_id.insert(id, status);
        }
    }

    let mut outcomes = HashMap::with_capacity(batch.items.len());
    for item in &batch.items {
        let outcome = match by_id.get(&item.request_id) {
            Some(status) if status.ok => ItemOutcome::Ok {
                records: status.records.clone(),
            },
            Some(status) => ItemOutcome::Failed {
                error_code: status.error_code,
            },
            None => ItemOutcome::Failed { error_code: None },
        };
        outcomes.insert(item.request_id, outcome);
    }

    BatchReport { outcomes }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ItemRequest;

    fn items(n: usize) -> Vec<ItemRequest> {
        (0..n)
            .map(|i| ItemRequest::new(i as i64, "saveProduct"))
            .collect()
    }

    #[test]
    fn test_batch_size_bound() {
        for batch in into_batches(items(250)) {
            assert!(batch.len() <= MAX_BATCH_ITEMS);
        }
    }

    #[test]
    fn test_order_preserved_across_batches() {
        let batches = into_batches(items(250));
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 100);
        assert_eq!(batches[1].len(), 100);
        assert_eq!(batches[2].len(), 50);

        let flattened: Vec<i64> = batches
            .iter()
            .flat_map(|b| b.items.iter().map(|i| i.request_id))
            .collect();
        let expected: Vec<i64> = (0..250).collect();
        assert_eq!(flattened, expected);
    }

    #[test]
    fn test_empty_input_produces_no_batches() {
        assert!(into_batches(Vec::new()).is_empty());
    }

    #[test]
    fn test_correlate_matches_reordered_response() {
        let batch = BatchRequest { items: items(3) };
        let statuses = vec![
            ItemStatus {
                request_id: Some(2),
                ok: true,
                error_code: None,
                records: vec![serde_json::json!({"productID": 30})],
            },
            ItemStatus {
                request_id: Some(0),
                ok: true,
                error_code: None,
                records: vec![serde_json::json!({"productID": 10})],
            },
            ItemStatus {
                request_id: Some(1),
                ok: true,
                error_code: None,
                records: vec![serde_json::json!({"productID": 20})],
            },
        ];

        let report = correlate(&batch, &statuses);
        assert!(report.all_ok());
        assert_eq!(report.first_record(1).unwrap()["productID"], 20);
    }

    #[test]
    fn test_single_failed_item_fails_the_batch() {
        let batch = BatchRequest { items: items(5) };
        let statuses: Vec<ItemStatus> = (0..5)
            .map(|i| ItemStatus {
                request_id: Some(i),
                ok: i != 2,
                error_code: (i == 2).then_some(1011),
                records: Vec::new(),
            })
            .collect();

        let report = correlate(&batch, &statuses);
        assert!(!report.all_ok());
        assert_eq!(report.failed_ids(), vec![2]);
    }

    #[test]
    fn test_missing_request_id_is_a_failure() {
        let batch = BatchRequest { items: items(2) };
        let statuses = vec![ItemStatus {
            request_id: Some(0),
            ok: true,
            error_code: None,
            records: Vec::new(),
        }];

        let report = correlate(&batch, &statuses);
        assert!(!report.all_ok());
        assert_eq!(report.failed_ids(), vec![1]);
    }
}

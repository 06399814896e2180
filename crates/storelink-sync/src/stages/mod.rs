//! # Pipeline Stages
//!
//! One module per stage of the synchronization pipeline. Every stage is a
//! short, resumable work unit: it performs a bounded number of remote calls,
//! records outcomes durably, and returns a definite [`StageOutcome`] for the
//! sequencer's transition rule. Stages never schedule anything themselves
//! and never let an error escape as a panic.
//!
//! ## Stage Map
//! ```text
//! products:  validate ─ attributes ─ attribute_values ─ products(collect)
//!            ─ products(send) ─ products(collect variations)
//!            ─ products(send variations) ─ stock ─ archive
//!
//! orders:    coupons ─ shipping ─ orders (page loop, customers per order)
//!
//! stocks:    stock
//! ```
//!
//! [`StageOutcome`]: storelink_core::schedule::StageOutcome

use storelink_db::Database;

use crate::client::ErpClient;
use crate::config::SyncOptions;
use crate::reference::ReferenceService;

pub mod archive;
pub mod attributes;
pub mod coupons;
pub mod customers;
pub mod orders;
pub mod products;
pub mod shipping;
pub mod stock;

// =============================================================================
// Stage Context
// =============================================================================

/// Everything a stage invocation is allowed to touch. Passed explicitly;
/// stages hold no ambient state of their own.
pub struct StageContext<'a> {
    pub db: &'a Database,
    pub client: &'a ErpClient,
    pub options: &'a SyncOptions,
}

impl<'a> StageContext<'a> {
    /// Reference-data access bound to this context.
    pub fn reference(&self) -> ReferenceService<'a> {
        ReferenceService::new(self.client, self.db)
    }
}

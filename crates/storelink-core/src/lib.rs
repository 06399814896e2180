//! # storelink-core: Pure Pipeline Logic for Storelink
//!
//! This crate is the **heart** of the sync bridge. It contains everything the
//! pipeline decides without touching the outside world: how entity
//! collections are cut into bounded batches, how per-item results are matched
//! back to their source records, how stock differences become signed
//! adjustments, which remote records are archival candidates, and how a stage
//! invocation's outcome maps onto the next scheduled re-arm.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Storelink Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 apps/storelink-cli (operator)                   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │          storelink-sync (ERP client, stages, scheduler)         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ storelink-core (THIS CRATE) ★                   │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   batch   │  │  schedule │  │  request  │  │   │
//! │  │   │  SyncRun  │  │  chunking │  │  re-arm   │  │   slot    │  │   │
//! │  │   │  Stages   │  │ correlate │  │  policy   │  │  builders │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 storelink-db (SQLite state)                     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (SyncRun, stages, entity snapshots, mappings)
//! - [`request`] - Structured request builder with position-indexed slots
//! - [`batch`] - Batching engine (chunking + response correlation)
//! - [`stock`] - Stock delta computation
//! - [`archive`] - Archival candidate diffing
//! - [`schedule`] - Re-arm delay policy and the uniform transition rule
//! - [`validation`] - Product validation and slug generation
//! - [`error`] - Domain error types
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every function is deterministic - same input = same output
//! 2. **No I/O**: Database, network, file system access is FORBIDDEN here
//! 3. **Time Is An Input**: The clock is always passed in, never read
//! 4. **Explicit Errors**: All errors are typed, never strings or panics

// =============================================================================
// Module Declarations
// =============================================================================

pub mod archive;
pub mod batch;
pub mod error;
pub mod request;
pub mod schedule;
pub mod stock;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use storelink_core::BatchRequest` instead of
// `use storelink_core::batch::BatchRequest`

pub use batch::{into_batches, BatchReport, BatchRequest, ItemOutcome, ItemStatus, MAX_BATCH_ITEMS};
pub use error::{CoreError, CoreResult};
pub use request::{ItemRequest, RequestParams};
pub use schedule::{StageOutcome, Transition};
pub use types::*;

//! # storelink-sync: Sync Pipeline
//!
//! This crate drives the synchronization between the storefront snapshot and
//! the remote ERP: the HTTP client with transparent session management, the
//! wire protocol types, one module per pipeline stage, the stage sequencer
//! applying the uniform transition rule, and the re-arming scheduler.
//!
//! ## Execution Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Invocation-per-tick Pipeline                         │
//! │                                                                         │
//! │  Scheduler tick                                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SyncPipeline::tick(resource, run_id)                                  │
//! │       │  stale run_id? ──► no-op (operator reset cancelled us)         │
//! │       ▼                                                                 │
//! │  load persisted stage ──► execute ONE short work unit                  │
//! │       │                   (≤ a few remote calls, durable writes)       │
//! │       ▼                                                                 │
//! │  StageOutcome ──transition rule──► next action                         │
//! │       │                                                                 │
//! │       ├── Rearm(60 s)          HTTP 429                                │
//! │       ├── RearmAtFullHour      app code 1002 (hourly quota)            │
//! │       ├── Rearm(61 min/5 min)  queue or pages remaining                │
//! │       ├── Advance              next stage (60 s)                       │
//! │       └── Fail                 terminal, operator restarts             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Long collections are spread across many invocations; no invocation blocks
//! beyond its own bounded remote calls, which keeps every tick inside the
//! ERP's 45-second request budget.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod reference;
pub mod runner;
pub mod scheduler;
pub mod stages;

// =============================================================================
// Re-exports
// =============================================================================

pub use client::{ApiOutcome, ErpClient};
pub use config::{BridgeConfig, ErpConfig, OrderDocumentType, SyncOptions};
pub use error::{SyncError, SyncResult};
pub use runner::{NextTick, SyncPipeline};
pub use scheduler::{run_to_completion, OrderQueueDrain};

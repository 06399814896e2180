//! # storelink-db: Database Layer for Storelink
//!
//! This crate provides database access for the sync bridge. It uses SQLite
//! for local storage with sqlx for async operations.
//!
//! Two kinds of data live here. The **storefront snapshot** (catalog, orders,
//! coupons) is written by the storefront integration; the pipeline treats it
//! as read-only input and annotates entities through `remote_mappings`
//! instead of ever mutating the rows themselves. The **pipeline state**
//! (runs, cursors, mappings, reference cache, order queue) is owned
//! exclusively by the pipeline, and every write the sequencer depends on is
//! flushed before a stage invocation returns.
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use storelink_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/storelink.db")).await?;
//! let products = db.catalog().published_products().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::catalog::CatalogRepository;
pub use repository::cursor::CursorRepository;
pub use repository::mapping::MappingRepository;
pub use repository::orders::OrderRepository;
pub use repository::reference::ReferenceRepository;
pub use repository::run::RunRepository;

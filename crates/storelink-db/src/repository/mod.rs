//! # Repository Implementations
//!
//! Each repository wraps the shared `SqlitePool` and owns the queries for
//! one slice of the schema:
//!
//! - [`catalog`] - storefront products, variations, attributes (read-only)
//! - [`orders`] - storefront orders, coupons, shipping methods, order queue
//! - [`mapping`] - remote identity mappings (the pipeline's annotations)
//! - [`cursor`] - stage cursors with serialized pending-batch queues
//! - [`run`] - sync run lifecycle per resource
//! - [`reference`] - TTL-cached reference payloads pulled from the ERP

pub mod catalog;
pub mod cursor;
pub mod mapping;
pub mod orders;
pub mod reference;
pub mod run;

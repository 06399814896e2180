//! # Error Types
//!
//! Domain-specific error types for storelink-core.
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (entity ids, stage names)
//! 3. Errors are enum variants, never String

use thiserror::Error;

use crate::types::EntityKind;

// =============================================================================
// Core Error
// =============================================================================

/// Core pipeline logic errors.
///
/// These errors represent violations of the pipeline's own invariants.
/// Transport and persistence failures live in the sync and db crates.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A product carries more attribute dimensions than the ERP's matrix
    /// supports.
    #[error("Product {product_id} has {count} attributes, maximum is {max}")]
    TooManyDimensions {
        product_id: i64,
        count: usize,
        max: usize,
    },

    /// A stage required a remote identity mapping that does not exist.
    ///
    /// ## When This Occurs
    /// - Stock update reaches a product that was never pushed
    /// - An order line references an unsynchronized product while
    ///   "allow unsynced products" is disabled
    #[error("No remote mapping of kind {kind:?} for local entity {local_id}")]
    MissingMapping { kind: EntityKind, local_id: i64 },

    /// A persisted stage name could not be interpreted.
    ///
    /// Indicates a corrupted cursor row or a downgrade across incompatible
    /// versions.
    #[error("Unknown stage name: {0}")]
    UnknownStage(String),

    /// A persisted resource name could not be interpreted.
    #[error("Unknown sync resource: {0}")]
    UnknownResource(String),

    /// A persisted run status could not be interpreted.
    #[error("Unknown run status: {0}")]
    UnknownStatus(String),
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::TooManyDimensions {
            product_id: 42,
            count: 4,
            max: 3,
        };
        assert_eq!(
            err.to_string(),
            "Product 42 has 4 attributes, maximum is 3"
        );

        let err = CoreError::MissingMapping {
            kind: EntityKind::Product,
            local_id: 7,
        };
        assert!(err.to_string().contains("local entity 7"));
    }
}

//! # Catalog Validation & Slugs
//!
//! Pre-flight checks for the products pipeline and the slug normalization
//! used when product-level custom attributes are pushed as ad-hoc matrix
//! dimensions.

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Product Validation
// =============================================================================

/// The ERP's matrix model supports at most three dimensions per product.
pub const MAX_PRODUCT_DIMENSIONS: usize = 3;

/// Fails when a product carries more attributes than the matrix supports.
/// One offending product fails the validation stage for the whole run.
pub fn validate_dimension_count(product_id: i64, attribute_count: usize) -> CoreResult<()> {
    if attribute_count > MAX_PRODUCT_DIMENSIONS {
        return Err(CoreError::TooManyDimensions {
            product_id,
            count: attribute_count,
            max: MAX_PRODUCT_DIMENSIONS,
        });
    }
    Ok(())
}

// =============================================================================
// Slug Generation
// =============================================================================

/// Normalizes an attribute name into a slug.
///
/// Estonian vowels are transliterated, every other non-alphanumeric run
/// collapses to a single `-`, and the result is lowercased. An input with
/// no usable characters yields `"n-a"`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for ch in text.chars() {
        let mapped = match ch {
            'ä' | 'Ä' => Some('a'),
            'ö' | 'Ö' | 'õ' | 'Õ' => Some('o'),
            'ü' | 'Ü' => Some('u'),
            c if c.is_ascii_alphanumeric() => Some(c.to_ascii_lowercase()),
            _ => None,
        };

        match mapped {
            Some(c) => {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.push(c);
            }
            None => pending_dash = true,
        }
    }

    if slug.is_empty() {
        "n-a".to_string()
    } else {
        slug
    }
}

//! # Catalog Repository
//!
//! Read access to the storefront's catalog snapshot: published products,
//! their variations, and the global attribute taxonomies with their terms.
//!
//! The pipeline never creates, mutates or deletes catalog rows; local
//! entities are annotated through `remote_mappings` instead.

use sqlx::SqlitePool;

use storelink_core::{AttributeTaxonomy, AttributeTerm, Product, Variation, VariationValue};

use crate::error::DbResult;

/// Repository for catalog snapshot reads.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    /// Creates a new CatalogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    /// All published products, id-ascending.
    ///
    /// Id order matters: batches must be produced in a stable order so a
    /// resumed stage regenerates the same queue it persisted.
    pub async fn published_products(&self) -> DbResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, name, description, short_description,
                   price, stock_quantity, is_variable
            FROM products
            WHERE published = 1
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }

    /// Attribute slugs assigned to a product, in display order.
    pub async fn product_attribute_slugs(&self, product_id: i64) -> DbResult<Vec<String>> {
        let slugs = sqlx::query_scalar::<_, String>(
            r#"
            SELECT slug FROM product_attributes
            WHERE product_id = ?1
            ORDER BY position ASC, slug ASC
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(slugs)
    }

    /// All global attribute taxonomies.
    pub async fn attribute_taxonomies(&self) -> DbResult<Vec<AttributeTaxonomy>> {
        let attributes = sqlx::query_as::<_, AttributeTaxonomy>(
            "SELECT id, label, slug FROM attributes ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(attributes)
    }

    /// Terms of one attribute taxonomy.
    pub async fn terms_for_attribute(&self, attribute_id: i64) -> DbResult<Vec<AttributeTerm>> {
        let terms = sqlx::query_as::<_, AttributeTerm>(
            r#"
            SELECT id, attribute_id, name, slug
            FROM attribute_terms
            WHERE attribute_id = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(attribute_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(terms)
    }

    /// Resolves a term by its taxonomy slug and term slug.
    pub async fn term_by_slugs(
        &self,
        attribute_slug: &str,
        term_slug: &str,
    ) -> DbResult<Option<AttributeTerm>> {
        let term = sqlx::query_as::<_, AttributeTerm>(
            r#"
            SELECT t.id, t.attribute_id, t.name, t.slug
            FROM attribute_terms t
            JOIN attributes a ON a.id = t.attribute_id
            WHERE a.slug = ?1 AND t.slug = ?2
            "#,
        )
        .bind(attribute_slug)
        .bind(term_slug)
        .fetch_optional(&self.pool)
        .await?;

        Ok(term)
    }

    /// Published variations of one product, id-ascending.
    pub async fn variations_for_product(&self, product_id: i64) -> DbResult<Vec<Variation>> {
        let variations = sqlx::query_as::<_, Variation>(
            r#"
            SELECT id, product_id, price, description, stock_quantity
            FROM variations
            WHERE product_id = ?1 AND published = 1
            ORDER BY id ASC
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(variations)
    }

    /// Attribute choices of one variation.
    pub async fn variation_values(&self, variation_id: i64) -> DbResult<Vec<VariationValue>> {
        let rows = sqlx::query_as::<_, (String, Option<String>)>(
            r#"
            SELECT slug, term_slug FROM variation_values
            WHERE variation_id = ?1
            ORDER BY slug ASC
            "#,
        )
        .bind(variation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(attribute_slug, term_slug)| VariationValue {
                attribute_slug,
                term_slug,
            })
            .collect())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    async fn seeded_db() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        sqlx::raw_sql(
            r#"
            INSERT INTO products (id, name, price, stock_quantity, is_variable, published)
            VALUES (1, 'Shirt', 19.5, 4, 1, 1),
                   (2, 'Mug', 7.0, 10, 0, 1),
                   (3, 'Hidden', 1.0, 0, 0, 0);
            INSERT INTO attributes (id, label, slug) VALUES (10, 'Size', 'size');
            INSERT INTO attribute_terms (id, attribute_id, name, slug)
            VALUES (100, 10, 'Small', 'small'), (101, 10, 'Large', 'large');
            INSERT INTO product_attributes (product_id, slug, position)
            VALUES (1, 'size', 0);
            INSERT INTO variations (id, product_id, price, stock_quantity, published)
            VALUES (50, 1, 18.0, 2, 1);
            INSERT INTO variation_values (variation_id, slug, term_slug)
            VALUES (50, 'size', 'small');
            "#,
        )
        .execute(db.pool())
        .await
        .unwrap();

        db
    }

    #[tokio::test]
    async fn test_published_products_skips_unpublished() {
        let db = seeded_db().await;
        let products = db.catalog().published_products().await.unwrap();

        let ids: Vec<i64> = products.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(products[0].is_variable);
    }

    #[tokio::test]
    async fn test_term_lookup_by_slugs() {
        let db = seeded_db().await;
        let term = db
            .catalog()
            .term_by_slugs("size", "small")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(term.id, 100);
        assert_eq!(term.name, "Small");

        assert!(db
            .catalog()
            .term_by_slugs("size", "huge")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_variation_values() {
        let db = seeded_db().await;
        let values = db.catalog().variation_values(50).await.unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].attribute_slug, "size");
        assert_eq!(values[0].term_slug.as_deref(), Some("small"));
    }
}

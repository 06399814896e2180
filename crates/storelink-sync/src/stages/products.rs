//! # Product Stages
//!
//! The four product phases: validation, request collection for parents and
//! variations, and queue draining.
//!
//! ## Collect / Send Split
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  collect_products / collect_variations                                  │
//! │      read snapshot ──► build tagged saveProduct items ──► chunk ≤100    │
//! │      ──► persist the whole queue in the SEND stage's cursor            │
//! │                                                                         │
//! │  send_queue (one invocation = one batch)                                │
//! │      pop front batch ──► submit ──► record mappings ──► persist         │
//! │      shrunken queue ──► MoreWork while queue non-empty (61 min apart)   │
//! │                                                                         │
//! │  A crash between submit and persist re-submits the batch; the stored    │
//! │  mappings turn those re-submissions into updates, never duplicates.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Variable products are pushed as `MATRIX` parents carrying one dimension
//! reference per attribute; variations follow as child `PRODUCT` entities
//! referencing the parent and one dimension value per attribute. Attributes
//! with no global taxonomy are created ad hoc as "custom" dimensions,
//! memoized per collection pass.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use storelink_core::batch::{correlate, into_batches, ItemOutcome};
use storelink_core::request::{DimensionRefs, DimensionValueRefs};
use storelink_core::schedule::StageOutcome;
use storelink_core::validation::{slugify, validate_dimension_count};
use storelink_core::{EntityKind, ItemRequest, RequestParams, StageCursor, SyncResource, SyncStage};

use crate::error::SyncResult;
use crate::protocol::{value_i64, RemoteRequest};
use crate::stages::StageContext;

// =============================================================================
// Validation
// =============================================================================

/// Checks every published product against the ERP's matrix limits. One
/// offending product fails the whole run before anything is sent.
pub(crate) async fn validate_products(ctx: &StageContext<'_>) -> SyncResult<StageOutcome> {
    for product in ctx.db.catalog().published_products().await? {
        let slugs = ctx.db.catalog().product_attribute_slugs(product.id).await?;
        if let Err(err) = validate_dimension_count(product.id, slugs.len()) {
            warn!(product_id = product.id, "Products validation failed");
            return Ok(StageOutcome::Failed(err.to_string()));
        }
    }

    info!("Products validation success");
    Ok(StageOutcome::Completed)
}

// =============================================================================
// Custom Dimension Cache
// =============================================================================

/// Per-pass memo of the ERP's matrix dimensions, used for product-level
/// attributes that have no global taxonomy. Loaded lazily with one
/// `getMatrixDimensions` call; ad-hoc creations are added to the memo so a
/// dimension or value is never created twice within a pass.
pub(crate) struct CustomDimensionCache {
    loaded: bool,
    dimensions: HashMap<String, CustomDimension>,
}

struct CustomDimension {
    dimension_id: i64,
    values: HashMap<String, i64>,
}

impl CustomDimensionCache {
    pub(crate) fn new() -> Self {
        CustomDimensionCache {
            loaded: false,
            dimensions: HashMap::new(),
        }
    }

    async fn ensure_loaded(
        &mut self,
        ctx: &StageContext<'_>,
    ) -> SyncResult<Result<(), StageOutcome>> {
        if self.loaded {
            return Ok(Ok(()));
        }

        let mut params = RequestParams::new();
        params.set("pageSize", 100);

        let response = match ctx
            .client
            .send(&RemoteRequest::single("getMatrixDimensions", params))
            .await?
            .into_response()
        {
            Ok(response) => response,
            Err(outcome) => return Ok(Err(outcome)),
        };

        for record in &response.records {
            let (Some(name), Some(dimension_id)) =
                (record["name"].as_str(), value_i64(&record["dimensionID"]))
            else {
                continue;
            };

            let mut values = HashMap::new();
            if let Some(variations) = record["variations"].as_array() {
                for variation in variations {
                    if let (Some(value_name), Some(value_id)) = (
                        variation["name"].as_str(),
                        value_i64(&variation["variationID"]),
                    ) {
                        values.insert(value_name.to_string(), value_id);
                    }
                }
            }

            self.dimensions.insert(
                name.to_string(),
                CustomDimension {
                    dimension_id,
                    values,
                },
            );
        }

        self.loaded = true;
        Ok(Ok(()))
    }

    /// Dimension id for a custom attribute, creating the dimension remotely
    /// when the memo has never seen it.
    pub(crate) async fn dimension_id(
        &mut self,
        ctx: &StageContext<'_>,
        name: &str,
    ) -> SyncResult<Result<i64, StageOutcome>> {
        if let Err(outcome) = self.ensure_loaded(ctx).await? {
            return Ok(Err(outcome));
        }

        if let Some(dimension) = self.dimensions.get(name) {
            return Ok(Ok(dimension.dimension_id));
        }

        let mut params = RequestParams::new();
        params.set("name", name);

        let response = match ctx
            .client
            .send(&RemoteRequest::single("saveMatrixDimension", params))
            .await?
            .into_response()
        {
            Ok(response) => response,
            Err(outcome) => return Ok(Err(outcome)),
        };

        let Some(dimension_id) = response
            .first_record()
            .and_then(|r| value_i64(&r["dimensionID"]))
        else {
            return Ok(Err(StageOutcome::Failed(format!(
                "custom attribute '{name}' sync returned no dimensionID"
            ))));
        };

        info!(name, dimension_id, "Custom attribute dimension created");
        self.dimensions.insert(
            name.to_string(),
            CustomDimension {
                dimension_id,
                values: HashMap::new(),
            },
        );

        Ok(Ok(dimension_id))
    }

    /// Dimension value id for a custom attribute value, creating dimension
    /// and value remotely as needed.
    pub(crate) async fn value_id(
        &mut self,
        ctx: &StageContext<'_>,
        attribute: &str,
        value: &str,
    ) -> SyncResult<Result<i64, StageOutcome>> {
        let dimension_id = match self.dimension_id(ctx, attribute).await? {
            Ok(id) => id,
            Err(outcome) => return Ok(Err(outcome)),
        };

        if let Some(existing) = self
            .dimensions
            .get(attribute)
            .and_then(|d| d.values.get(value))
        {
            return Ok(Ok(*existing));
        }

        let mut params = RequestParams::new();
        params.set("name", value);
        params.set("dimensionID", dimension_id);

        let response = match ctx
            .client
            .send(&RemoteRequest::single("addItemToMatrixDimension", params))
            .await?
            .into_response()
        {
            Ok(response) => response,
            Err(outcome) => return Ok(Err(outcome)),
        };

        let Some(item_id) = response.first_record().and_then(|r| value_i64(&r["itemID"]))
        else {
            return Ok(Err(StageOutcome::Failed(format!(
                "custom attribute value '{attribute}'/'{value}' sync returned no itemID"
            ))));
        };

        if let Some(dimension) = self.dimensions.get_mut(attribute) {
            dimension.values.insert(value.to_string(), item_id);
        }

        Ok(Ok(item_id))
    }
}

// =============================================================================
// Collection: Parents
// =============================================================================

/// Builds the parent-product request queue and persists it in the send
/// stage's cursor. Simple products go out as `PRODUCT`, variable ones as
/// `MATRIX` with their dimension references.
pub(crate) async fn collect_products(ctx: &StageContext<'_>) -> SyncResult<StageOutcome> {
    let catalog = ctx.db.catalog();
    let mappings = ctx.db.mappings();

    let global: HashMap<String, i64> = catalog
        .attribute_taxonomies()
        .await?
        .into_iter()
        .map(|a| (a.slug, a.id))
        .collect();

    let mut custom = CustomDimensionCache::new();
    let mut items = Vec::new();

    for product in catalog.published_products().await? {
        let kind = if product.is_variable { "MATRIX" } else { "PRODUCT" };

        let mut item = ItemRequest::new(product.id, "saveProduct");
        item.params.set("type", kind);
        item.params.set("groupID", ctx.options.product_group_id);
        item.params.set("code", product.id);
        item.params.set("name", product.name.clone());
        item.params.set("displayedInWebshop", 1);
        item.params.set("priceWithVAT", product.price);
        item.params.set("longdesc", product.description.clone());
        item.params.set("description", product.short_description.clone());

        // An existing mapping turns the create into an in-place update
        if let Some(remote_id) = mappings.get_numeric(EntityKind::Product, product.id).await? {
            item.params.set("productID", remote_id);
        }

        if product.is_variable {
            let mut dims = DimensionRefs::new();

            for slug in catalog.product_attribute_slugs(product.id).await? {
                match global.get(&slug) {
                    Some(attribute_id) => {
                        let Some(dimension_id) = mappings
                            .get_numeric(EntityKind::Attribute, *attribute_id)
                            .await?
                        else {
                            return Ok(StageOutcome::Failed(format!(
                                "attribute '{slug}' has no dimension mapping"
                            )));
                        };
                        dims.push(dimension_id);
                    }
                    None => {
                        warn!(
                            product_id = product.id,
                            attribute = %slug,
                            "Product has custom (product based) attributes, syncing those ad hoc"
                        );
                        match custom.dimension_id(ctx, &slugify(&slug)).await? {
                            Ok(dimension_id) => dims.push(dimension_id),
                            Err(outcome) => return Ok(outcome),
                        }
                    }
                }
            }

            dims.apply(&mut item.params);
        }

        items.push(item);
    }

    let batches = into_batches(items);
    info!(batches = batches.len(), "Product requests prepared");

    ctx.db
        .cursors()
        .save(
            SyncResource::Products,
            SyncStage::SendProducts,
            &StageCursor::with_pending(batches),
        )
        .await?;

    Ok(StageOutcome::Completed)
}

// =============================================================================
// Collection: Variations
// =============================================================================

/// Builds the variation request queue. Every variation references its
/// parent's remote id and one dimension value per attribute; an
/// unconstrained value maps to a synthesized "Any".
pub(crate) async fn collect_variations(ctx: &StageContext<'_>) -> SyncResult<StageOutcome> {
    let catalog = ctx.db.catalog();
    let mappings = ctx.db.mappings();

    let mut custom = CustomDimensionCache::new();
    let mut items = Vec::new();

    for product in catalog.published_products().await? {
        if !product.is_variable {
            continue;
        }

        let Some(parent_remote_id) =
            mappings.get_numeric(EntityKind::Product, product.id).await?
        else {
            return Ok(StageOutcome::Failed(format!(
                "variable product {} has no remote mapping",
                product.id
            )));
        };

        for variation in catalog.variations_for_product(product.id).await? {
            let mut item = ItemRequest::new(variation.id, "saveProduct");
            item.params.set("type", "PRODUCT");
            item.params.set("groupID", ctx.options.product_group_id);
            item.params.set("code", variation.id);
            item.params.set("displayedInWebshop", 1);
            item.params
                .set("priceWithVAT", variation.price.unwrap_or(product.price));
            item.params.set(
                "longdesc",
                variation
                    .description
                    .clone()
                    .unwrap_or_else(|| product.description.clone()),
            );
            item.params
                .set("description", product.short_description.clone());
            item.params.set("parentProductID", parent_remote_id);

            if let Some(remote_id) = mappings
                .get_numeric(EntityKind::Variation, variation.id)
                .await?
            {
                item.params.set("productID", remote_id);
            }

            let mut name_parts: Vec<String> = Vec::new();
            let mut dim_values = DimensionValueRefs::new();

            for value in catalog.variation_values(variation.id).await? {
                match &value.term_slug {
                    Some(term_slug) => {
                        match catalog
                            .term_by_slugs(&value.attribute_slug, term_slug)
                            .await?
                        {
                            Some(term) => {
                                let Some(item_id) = mappings
                                    .get_numeric(EntityKind::AttributeTerm, term.id)
                                    .await?
                                else {
                                    return Ok(StageOutcome::Failed(format!(
                                        "attribute term '{term_slug}' has no dimension item mapping"
                                    )));
                                };
                                name_parts.push(term.name);
                                dim_values.push(item_id);
                            }
                            None => {
                                // No global taxonomy backs this value
                                let attribute = slugify(&value.attribute_slug);
                                match custom.value_id(ctx, &attribute, term_slug).await? {
                                    Ok(item_id) => {
                                        name_parts.push(term_slug.clone());
                                        dim_values.push(item_id);
                                    }
                                    Err(outcome) => return Ok(outcome),
                                }
                            }
                        }
                    }
                    None => {
                        // Unconstrained value: synthesized "Any"
                        let attribute = slugify(&value.attribute_slug);
                        match custom.value_id(ctx, &attribute, "Any").await? {
                            Ok(item_id) => {
                                name_parts.push("Any".to_string());
                                dim_values.push(item_id);
                            }
                            Err(outcome) => return Ok(outcome),
                        }
                    }
                }
            }

            dim_values.apply(&mut item.params);

            let name = if name_parts.is_empty() {
                product.name.clone()
            } else {
                format!("{} - {}", product.name, name_parts.join(" "))
            };
            item.params.set("name", name);

            items.push(item);
        }
    }

    let batches = into_batches(items);
    info!(batches = batches.len(), "Variation requests prepared");

    ctx.db
        .cursors()
        .save(
            SyncResource::Products,
            SyncStage::SendVariations,
            &StageCursor::with_pending(batches),
        )
        .await?;

    Ok(StageOutcome::Completed)
}

// =============================================================================
// Queue Draining
// =============================================================================

/// Submits the front batch of a persisted queue, records the returned ids
/// under `kind`, and persists the shrunken queue before reporting.
///
/// One batch per invocation: a later batch is never submitted before the
/// earlier one's outcome is durably recorded.
pub(crate) async fn send_queue(
    ctx: &StageContext<'_>,
    stage: SyncStage,
    kind: EntityKind,
) -> SyncResult<StageOutcome> {
    let cursors = ctx.db.cursors();

    let Some(mut cursor) = cursors.load(SyncResource::Products, stage).await? else {
        return Ok(StageOutcome::Completed);
    };
    if cursor.pending.is_empty() {
        return Ok(StageOutcome::Completed);
    }

    let batch = cursor.pending[0].clone();
    info!(
        stage = %stage,
        batch_size = batch.len(),
        remaining = cursor.pending.len(),
        "Submitting product batch"
    );

    let response = match ctx
        .client
        .send(&RemoteRequest::batch(batch.clone()))
        .await?
        .into_response()
    {
        Ok(response) => response,
        Err(outcome) => return Ok(outcome),
    };

    let statuses = response.item_statuses();
    if statuses.is_empty() {
        return Ok(StageOutcome::Failed(
            "product batch response carried no per-item results".into(),
        ));
    }

    let report = correlate(&batch, &statuses);
    let mut failed = false;

    for (local_id, outcome) in report.iter() {
        match outcome {
            ItemOutcome::Ok { records } => {
                match records.first().and_then(|r| value_i64(&r["productID"])) {
                    Some(remote_id) => {
                        ctx.db.mappings().set(kind, local_id, remote_id).await?;
                        debug!(local_id, remote_id, "Product synchronized");
                    }
                    None => {
                        failed = true;
                        warn!(local_id, "Product result carried no productID");
                    }
                }
            }
            ItemOutcome::Failed { error_code } => {
                failed = true;
                warn!(local_id, ?error_code, "Product failed to synchronize");
            }
        }
    }

    if failed {
        return Ok(StageOutcome::Failed(
            "one or more products failed to synchronize".into(),
        ));
    }

    cursor.pending.remove(0);
    cursors
        .save(SyncResource::Products, stage, &cursor)
        .await?;

    if cursor.pending.is_empty() {
        Ok(StageOutcome::Completed)
    } else {
        Ok(StageOutcome::MoreWork)
    }
}

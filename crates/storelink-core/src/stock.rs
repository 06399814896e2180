//! # Stock Reconciliation Math
//!
//! The ERP records absolute stock per warehouse but is adjusted through
//! signed inventory registrations, so reconciliation submits the difference
//! between the storefront's quantity and the last-known ERP quantity.
//! Remote stock of exactly 0 is a real level, not "absent".

/// Signed adjustment that brings the ERP's stock level to the local one.
///
/// Returns `None` when the levels already agree; zero-delta items are
/// omitted from the registration entirely.
pub fn stock_adjustment(local: i64, remote: i64) -> Option<i64> {
    let delta = local - remote;
    (delta != 0).then_some(delta)
}

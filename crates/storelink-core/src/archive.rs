//! # Archival Candidate Diffing
//!
//! After a full product/variation push, every ERP product that no local
//! entity maps to is marked `ARCHIVED` in the ERP. Deletions and
//! unpublications on the storefront therefore propagate as archival, never
//! as hard deletes.

use std::collections::HashSet;

/// ERP product ids with no locally-mapped counterpart, in the order the ERP
/// listed them. Duplicate remote ids are reported once.
pub fn archive_candidates(remote_ids: &[i64], mapped_ids: &HashSet<i64>) -> Vec<i64> {
    let mut seen = HashSet::with_capacity(remote_ids.len());
    remote_ids
        .iter()
        .copied()
        .filter(|id| !mapped_ids.contains(id) && seen.insert(*id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmapped_remote_ids_are_candidates() {
        let mapped: HashSet<i64> = [2, 3].into_iter().collect();
        assert_eq!(archive_candidates(&[1, 2, 3, 4], &mapped), vec![1, 4]);
    }

    #[test]
    fn test_fully_mapped_remote_set_archives_nothing() {
        let mapped: HashSet<i64> = [1, 2].into_iter().collect();
        assert!(archive_candidates(&[1, 2], &mapped).is_empty());
    }

    #[test]
    fn test_empty_remote_set_archives_nothing() {
        let mapped: HashSet<i64> = [1].into_iter().collect();
        assert!(archive_candidates(&[], &mapped).is_empty());
    }

    #[test]
    fn test_duplicate_remote_ids_reported_once() {
        let mapped = HashSet::new();
        assert_eq!(archive_candidates(&[5, 5, 6], &mapped), vec![5, 6]);
    }
}

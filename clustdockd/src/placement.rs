//! Computes the next free index range for a named cluster on a host.

use std::collections::BTreeSet;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlacementError {
    #[error("requested node count must be positive, got {0}")]
    InvalidCount(i64),
}

/// Returns `n` distinct non-negative indices disjoint from `existing`, in
/// ascending order. Small gaps in `existing` are reused before the range is
/// extended past its current maximum, so a small cluster tends to fill gaps
/// while a large one grows contiguously.
///
/// The loop terminates because each iteration strictly increases
/// `min(candidate \ existing)`: once a candidate index survives one pass
/// without landing in `existing` it's never touched again.
pub fn place(n: i64, existing: &BTreeSet<u32>) -> Result<Vec<u32>, PlacementError> {
    if n <= 0 {
        return Err(PlacementError::InvalidCount(n));
    }
    let n = n as u32;

    let mut candidate: BTreeSet<u32> = (0..n).collect();
    loop {
        let overlap: BTreeSet<u32> = candidate.intersection(existing).copied().collect();
        if overlap.is_empty() {
            break;
        }
        for v in &overlap {
            candidate.remove(v);
        }
        let high_water = candidate
            .iter()
            .chain(overlap.iter())
            .copied()
            .max()
            .unwrap_or(0);
        let start = high_water + 1;
        let extend_by = overlap.len().max(n as usize - candidate.len()) as u32;
        candidate.extend(start..start + extend_by);
    }

    Ok(candidate.into_iter().take(n as usize).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(xs: &[u32]) -> BTreeSet<u32> {
        xs.iter().copied().collect()
    }

    #[test]
    fn rejects_nonpositive_count() {
        assert_eq!(place(0, &BTreeSet::new()), Err(PlacementError::InvalidCount(0)));
        assert_eq!(place(-3, &BTreeSet::new()), Err(PlacementError::InvalidCount(-3)));
    }

    #[test]
    fn empty_existing_returns_zero_based_run() {
        assert_eq!(place(3, &BTreeSet::new()).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn fills_gaps_before_extending() {
        let existing = set(&[0, 1, 2, 5]);
        assert_eq!(place(2, &existing).unwrap(), vec![3, 4]);
    }

    #[test]
    fn extends_contiguously_past_maximum() {
        let existing = set(&[0, 1, 2, 3, 4]);
        assert_eq!(place(3, &existing).unwrap(), vec![5, 6, 7]);
    }

    #[test]
    fn result_is_disjoint_from_existing() {
        let existing = set(&[0, 2, 4, 6, 8, 10]);
        let placed = place(5, &existing).unwrap();
        let placed_set: BTreeSet<u32> = placed.iter().copied().collect();
        assert_eq!(placed_set.intersection(&existing).count(), 0);
        assert_eq!(placed_set.len(), 5);
    }

    #[test]
    fn result_is_pairwise_distinct_and_sorted() {
        let existing = set(&[1, 2, 3, 10, 11]);
        let placed = place(4, &existing).unwrap();
        let mut sorted = placed.clone();
        sorted.sort_unstable();
        assert_eq!(placed, sorted);
        assert_eq!(placed.iter().collect::<BTreeSet<_>>().len(), placed.len());
    }
}

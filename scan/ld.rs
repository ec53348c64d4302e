// ========================================================================================
//                        Linkage disequilibrium table and pruner
// ========================================================================================

use crate::types::{MarkerIndex, MarkerRange};
use ahash::AHashMap;

/// Pairwise r² between markers, keyed by the unordered pair of marker indices.
///
/// Identifiers are resolved to indices once when the table is built, so lookups
/// inside the pruning loop never hash strings. A pair that was never recorded has
/// r² = 0.
#[derive(Debug, Clone, Default)]
pub struct LdTable {
    pairs: AHashMap<(u32, u32), f64>,
}

#[inline]
fn key(a: usize, b: usize) -> (u32, u32) {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    (lo as u32, hi as u32)
}

impl LdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the table from identifier pairs as stored on disk. Pairs naming a
    /// marker that is not in `markers` cannot affect any window and are skipped.
    /// When a pair is listed twice the first value is kept.
    pub fn from_named_pairs<'a, I>(markers: &MarkerIndex, rows: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str, f64)>,
    {
        let lookup: AHashMap<&str, usize> = markers
            .ids()
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let mut table = Self::new();
        let mut unknown = 0usize;
        for (a, b, r2) in rows {
            match (lookup.get(a), lookup.get(b)) {
                (Some(&ia), Some(&ib)) => table.insert(ia, ib, r2),
                _ => unknown += 1,
            }
        }
        if unknown > 0 {
            log::warn!(
                "{unknown} LD pairs reference markers absent from the marker table and were ignored"
            );
        }
        log::debug!("LD table holds {} marker pairs", table.len());
        table
    }

    pub fn insert(&mut self, a: usize, b: usize, r2: f64) {
        self.pairs.entry(key(a, b)).or_insert(r2);
    }

    /// r² between markers `a` and `b`; zero when the pair was never recorded.
    #[inline]
    pub fn r2(&self, a: usize, b: usize) -> f64 {
        self.pairs.get(&key(a, b)).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Per-window keep/drop flags, one per marker of the window, in marker order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepMask {
    keep: Vec<bool>,
}

impl KeepMask {
    pub fn keep_all(len: usize) -> Self {
        Self {
            keep: vec![true; len],
        }
    }

    #[inline]
    pub fn is_kept(&self, offset: usize) -> bool {
        self.keep[offset]
    }

    pub fn len(&self) -> usize {
        self.keep.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keep.is_empty()
    }

    pub fn kept(&self) -> usize {
        self.keep.iter().filter(|&&k| k).count()
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.keep
    }

    /// The score a marker contributes to the statistic: its own score when kept,
    /// zero when dropped.
    #[inline]
    pub fn masked(&self, offset: usize, score: f64) -> f64 {
        if self.keep[offset] { score } else { 0.0 }
    }
}

/// Greedy left-to-right LD thinning of one window.
///
/// Every pair `q < qq` of the window is visited in index order. Whenever `qq` is
/// still kept and r²(q, qq) exceeds `cutoff`, `qq` is dropped. The left-most marker
/// of an over-threshold cluster therefore always survives, and a marker is never
/// restored once dropped, so the mask depends only on the range, the table and
/// the cutoff.
pub fn prune_window(range: MarkerRange, ld: &LdTable, cutoff: f64) -> KeepMask {
    let mut mask = KeepMask::keep_all(range.len());
    if ld.is_empty() {
        return mask;
    }
    let first = range.first();
    for q in 0..range.len() {
        for qq in q + 1..range.len() {
            if mask.keep[qq] && ld.r2(first + q, first + qq) > cutoff {
                mask.keep[qq] = false;
            }
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers(ids: &[&str]) -> MarkerIndex {
        let n = ids.len();
        MarkerIndex::new(
            ids.iter().map(|s| s.to_string()).collect(),
            vec!["1".to_string(); n],
            (0..n as i32).map(|p| (p + 1) * 100).collect(),
        )
        .unwrap()
    }

    #[test]
    fn lookups_are_symmetric_and_default_to_zero() {
        let index = markers(&["rs1", "rs2", "rs3"]);
        let table = LdTable::from_named_pairs(&index, [("rs1", "rs3", 0.9), ("rs2", "rsX", 0.5)]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.r2(0, 2), 0.9);
        assert_eq!(table.r2(2, 0), 0.9);
        assert_eq!(table.r2(0, 1), 0.0);
    }

    #[test]
    fn first_listed_value_wins_on_duplicates() {
        let mut table = LdTable::new();
        table.insert(1, 4, 0.3);
        table.insert(4, 1, 0.95);
        assert_eq!(table.r2(1, 4), 0.3);
    }

    #[test]
    fn leftmost_marker_of_a_cluster_survives() {
        let mut table = LdTable::new();
        table.insert(0, 1, 0.9);
        table.insert(1, 2, 0.9);
        table.insert(0, 3, 0.85);
        let mask = prune_window(MarkerRange::new(0, 4).unwrap(), &table, 0.8);
        assert_eq!(mask.as_slice(), &[true, false, false, false, true]);
        assert_eq!(mask.kept(), 2);
    }

    #[test]
    fn cutoff_is_strictly_exceeded() {
        let mut table = LdTable::new();
        table.insert(5, 6, 0.8);
        let mask = prune_window(MarkerRange::new(5, 6).unwrap(), &table, 0.8);
        assert_eq!(mask.as_slice(), &[true, true]);
    }

    #[test]
    fn pruning_uses_global_indices_of_the_window() {
        let mut table = LdTable::new();
        table.insert(10, 12, 1.0);
        let mask = prune_window(MarkerRange::new(10, 12).unwrap(), &table, 0.5);
        assert_eq!(mask.as_slice(), &[true, true, false]);
        let shifted = prune_window(MarkerRange::new(11, 13).unwrap(), &table, 0.5);
        assert_eq!(shifted.as_slice(), &[true, true, true]);
    }

    #[test]
    fn pruning_is_deterministic_and_never_restores_markers() {
        let mut table = LdTable::new();
        for a in 0..12 {
            for b in a + 1..12 {
                table.insert(a, b, ((a * 7 + b * 13) % 10) as f64 / 10.0);
            }
        }
        let range = MarkerRange::new(0, 11).unwrap();
        let first = prune_window(range, &table, 0.55);
        let second = prune_window(range, &table, 0.55);
        assert_eq!(first, second);
        assert!(first.is_kept(0));

        let narrower = prune_window(MarkerRange::new(0, 6).unwrap(), &table, 0.55);
        assert_eq!(&first.as_slice()[..7], narrower.as_slice());
    }

    #[test]
    fn masked_scores_are_zeroed() {
        let mut mask = KeepMask::keep_all(3);
        mask.keep[1] = false;
        assert_eq!(mask.masked(0, 2.5), 2.5);
        assert_eq!(mask.masked(1, 2.5), 0.0);
    }
}

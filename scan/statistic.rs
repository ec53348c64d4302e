// ========================================================================================
//
//                       The ESM_k statistic and its permutation test
//
// ========================================================================================
//
// For a window of M markers the statistic is
//
//     ESM_k = sum over rank r = 1..min(K, M) of ( Y_(r) + log10(r / M) )
//
// where Y_(r) is the r-th largest score of the window after LD pruning (a dropped
// marker contributes a score of zero). The denominator is always the number of
// markers in the window, never the number that survived pruning and never K.

use crate::ld::KeepMask;
use ndarray::ArrayView2;
use std::cmp::Ordering;

#[inline]
fn descending(a: &f64, b: &f64) -> Ordering {
    b.total_cmp(a)
}

/// The rank penalties of one window, computed once and reused for the observed
/// statistic and every permutation replicate.
#[derive(Debug, Clone, PartialEq)]
pub struct EsmStatistic {
    penalties: Vec<f64>,
}

impl EsmStatistic {
    /// `window_markers` is M, the number of markers physically in the window.
    pub fn new(window_markers: usize, top_k: usize) -> Self {
        let terms = top_k.min(window_markers);
        let m = window_markers as f64;
        let penalties = (1..=terms).map(|rank| (rank as f64 / m).log10()).collect();
        Self { penalties }
    }

    /// Number of terms in the sum, `min(K, M)`.
    #[inline]
    pub fn terms(&self) -> usize {
        self.penalties.len()
    }

    /// Evaluates the statistic over the scores held in `scores`. The buffer is
    /// reordered in place; its first `terms()` entries end up as the top scores in
    /// descending order.
    pub fn evaluate(&self, scores: &mut [f64]) -> f64 {
        let k = self.terms().min(scores.len());
        if k == 0 {
            return 0.0;
        }
        if k < scores.len() {
            scores.select_nth_unstable_by(k - 1, descending);
        }
        let top = &mut scores[..k];
        top.sort_unstable_by(descending);
        top.iter()
            .zip(&self.penalties)
            .fold(0.0, |esm, (score, penalty)| esm + (score + penalty))
    }

    /// Masks `scores` with `mask` into `scratch` and evaluates the statistic.
    pub fn evaluate_masked<'a, I>(&self, scores: I, mask: &KeepMask, scratch: &mut Vec<f64>) -> f64
    where
        I: IntoIterator<Item = &'a f64>,
    {
        scratch.clear();
        scratch.extend(
            scores
                .into_iter()
                .enumerate()
                .map(|(offset, &score)| mask.masked(offset, score)),
        );
        self.evaluate(scratch)
    }
}

/// Empirical one-sided p-value of `observed` against the permutation replicates of
/// one window.
///
/// `replicates` holds one row per permutation and one column per marker of the
/// window. Every row is masked with the same `mask` as the observed scores. A
/// replicate whose statistic ties the observed value counts as an exceedance, so
/// the result is `#{ESM_perm >= ESM_obs} / P`, an exact multiple of `1/P`.
/// `replicates` must contain at least one row.
pub fn permutation_p_value(
    replicates: ArrayView2<'_, f64>,
    mask: &KeepMask,
    statistic: &EsmStatistic,
    observed: f64,
) -> f64 {
    let permutations = replicates.nrows();
    debug_assert!(permutations > 0, "p-value requested without permutations");
    debug_assert_eq!(replicates.ncols(), mask.len());

    let mut scratch = Vec::with_capacity(replicates.ncols());
    let exceedances = replicates
        .rows()
        .into_iter()
        .filter(|row| statistic.evaluate_masked(row, mask, &mut scratch) >= observed)
        .count();
    exceedances as f64 / permutations as f64
}

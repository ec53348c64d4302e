// ========================================================================================
//                       Fork-join evaluation of one window set
// ========================================================================================
//
// The slab for a set is read by the dispatching thread before any worker exists.
// Each non-empty window then gets its own scoped thread, which only reads the shared
// inputs and the slab and writes exactly one result slot. The scope joins every
// worker before the set's results are handed back, in window order.

use crate::ld::prune_window;
use crate::slab::PermutationSlab;
use crate::statistic::{EsmStatistic, permutation_p_value};
use crate::types::{MarkerRange, ScanInputs, WindowPValue, WindowSet};
use std::thread;

/// The per-window test parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowTest {
    pub top_k: usize,
    pub ld_cutoff: f64,
}

impl WindowTest {
    /// Prunes the window, computes its observed statistic, and returns the
    /// permutation p-value. `slab` must cover `range`.
    pub fn p_value(&self, inputs: &ScanInputs, slab: &PermutationSlab, range: MarkerRange) -> f64 {
        let mask = prune_window(range, &inputs.ld, self.ld_cutoff);
        let statistic = EsmStatistic::new(range.len(), self.top_k);
        let mut scratch = Vec::with_capacity(range.len());
        let observed =
            statistic.evaluate_masked(&inputs.observed[range.columns()], &mask, &mut scratch);
        permutation_p_value(slab.window(range), &mask, &statistic, observed)
    }
}

/// Evaluates every non-empty window of `set` in parallel. Empty windows produce no
/// result; the rest come back ordered by window position regardless of which worker
/// finished first.
pub fn evaluate_window_set(
    set: &WindowSet,
    inputs: &ScanInputs,
    slab: &PermutationSlab,
    test: WindowTest,
) -> Vec<WindowPValue> {
    let mut slots: Vec<Option<f64>> = vec![None; set.windows.len()];

    thread::scope(|scope| {
        for (slot, window) in slots.iter_mut().zip(&set.windows) {
            if let Some(range) = window.markers {
                scope.spawn(move || *slot = Some(test.p_value(inputs, slab, range)));
            }
        }
    });

    set.windows
        .iter()
        .zip(slots)
        .filter_map(|(window, p_value)| {
            p_value.map(|p_value| WindowPValue {
                p_value,
                midpoint: window.midpoint(),
            })
        })
        .collect()
}

// ========================================================================================
//
//                               The window generator
//
// ========================================================================================
//
// Windows are laid out on the coordinate axis starting at position 1. Consecutive
// windows start `jump_size` apart and span `window_size` coordinates (closed on both
// ends). Windows are batched into sets of at most `window_set_size` so that one slab
// read can serve the whole batch; a set is truncated when the next window would run
// past the last marker position.

use crate::types::{Coordinate, MarkerRange, Window, WindowSet};

/// Finds the first and last marker whose position lies in the closed range
/// `[left, right]`, scanning from both ends of `positions`.
///
/// This is a linear scan on purpose: it only relies on the range predicate, so it
/// stays correct on tied positions, and it runs once per window rather than once
/// per permutation.
pub fn marker_range(positions: &[i32], left: Coordinate, right: Coordinate) -> Option<MarkerRange> {
    let within = |p: &i32| {
        let p = Coordinate::from(*p);
        p >= left && p <= right
    };
    let first = positions.iter().position(within)?;
    let last = positions.iter().rposition(within)?;
    MarkerRange::new(first, last)
}

/// The immutable geometry of one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlan {
    window_size: Coordinate,
    jump_size: Coordinate,
    window_set_size: usize,
    last_position: Coordinate,
}

impl WindowPlan {
    /// Left boundary of the very first window.
    pub const FIRST_LEFT: Coordinate = 1;

    /// `window_size` and `jump_size` must be positive and `window_set_size` non-zero;
    /// `ScanConfig` guarantees this before a plan is ever built.
    pub fn new(
        window_size: Coordinate,
        jump_size: Coordinate,
        window_set_size: usize,
        last_position: Coordinate,
    ) -> Self {
        debug_assert!(window_size > 0 && jump_size > 0 && window_set_size > 0);
        Self {
            window_size,
            jump_size,
            window_set_size,
            last_position,
        }
    }

    #[inline]
    fn set_stride(&self) -> Coordinate {
        Coordinate::try_from(self.window_set_size)
            .map_or(Coordinate::MAX, |sets| self.jump_size.saturating_mul(sets))
    }

    /// Whether at least one full window fits when a set starts at `left`.
    #[inline]
    fn fits(&self, left: Coordinate) -> bool {
        self.last_position - left >= self.window_size
    }

    /// Number of windows emitted by the set starting at `left`:
    /// `min(window_set_size, floor((last - left - window_size) / jump_size) + 1)`.
    pub fn windows_in_set(&self, left: Coordinate) -> usize {
        if !self.fits(left) {
            return 0;
        }
        let remaining = (self.last_position - left - self.window_size) / self.jump_size + 1;
        usize::try_from(remaining)
            .unwrap_or(usize::MAX)
            .min(self.window_set_size)
    }

    /// Total number of window sets the scan will visit.
    pub fn set_count(&self) -> usize {
        if !self.fits(Self::FIRST_LEFT) {
            return 0;
        }
        let span = self.last_position - Self::FIRST_LEFT - self.window_size;
        usize::try_from(span / self.set_stride() + 1).unwrap_or(usize::MAX)
    }

    /// Iterates over the window sets of the scan in left-to-right order, resolving
    /// each window's marker range against `positions`.
    pub fn window_sets<'a>(&self, positions: &'a [i32]) -> WindowSets<'a> {
        WindowSets {
            plan: *self,
            positions,
            left: Self::FIRST_LEFT,
            ordinal: 0,
        }
    }
}

/// Iterator returned by [`WindowPlan::window_sets`].
#[derive(Debug, Clone)]
pub struct WindowSets<'a> {
    plan: WindowPlan,
    positions: &'a [i32],
    left: Coordinate,
    ordinal: usize,
}

impl Iterator for WindowSets<'_> {
    type Item = WindowSet;

    fn next(&mut self) -> Option<WindowSet> {
        let count = self.plan.windows_in_set(self.left);
        if count == 0 {
            return None;
        }
        let windows = (0..count)
            .map(|m| {
                let left = self.left + m as Coordinate * self.plan.jump_size;
                let right = left + self.plan.window_size;
                Window {
                    left,
                    right,
                    markers: marker_range(self.positions, left, right),
                }
            })
            .collect();
        let set = WindowSet {
            ordinal: self.ordinal,
            windows,
        };
        self.left = self.left.saturating_add(self.plan.set_stride());
        self.ordinal += 1;
        Some(set)
    }
}

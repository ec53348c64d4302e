// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use crate::ld::LdTable;
use std::fmt;
use std::ops::Range;
use thiserror::Error;

/// Genomic coordinate used for window arithmetic. Marker positions are stored as
/// `i32` on disk but window boundaries are computed in a wider type so that
/// `left + jump * window_set_size` can never overflow.
pub type Coordinate = i64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarkerIndexError {
    #[error(
        "marker arrays are not aligned: {ids} identifiers, {chromosomes} chromosome labels, {positions} positions"
    )]
    LengthMismatch {
        ids: usize,
        chromosomes: usize,
        positions: usize,
    },
    #[error(
        "marker positions must be ascending, but position {next} at index {index} follows {previous}"
    )]
    Unsorted {
        index: usize,
        previous: i32,
        next: i32,
    },
    #[error("observed score array has {scores} entries for {markers} markers")]
    ObservedLength { scores: usize, markers: usize },
}

/// The immutable marker table shared by every stage of the scan.
///
/// The three arrays are aligned 1:1 and positions are non-decreasing. Both
/// invariants are checked once at construction and never re-checked downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerIndex {
    ids: Vec<String>,
    chromosomes: Vec<String>,
    positions: Vec<i32>,
}

impl MarkerIndex {
    pub fn new(
        ids: Vec<String>,
        chromosomes: Vec<String>,
        positions: Vec<i32>,
    ) -> Result<Self, MarkerIndexError> {
        if ids.len() != chromosomes.len() || ids.len() != positions.len() {
            return Err(MarkerIndexError::LengthMismatch {
                ids: ids.len(),
                chromosomes: chromosomes.len(),
                positions: positions.len(),
            });
        }
        if let Some(index) = positions.windows(2).position(|pair| pair[1] < pair[0]) {
            return Err(MarkerIndexError::Unsorted {
                index: index + 1,
                previous: positions[index],
                next: positions[index + 1],
            });
        }
        Ok(Self {
            ids,
            chromosomes,
            positions,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn chromosomes(&self) -> &[String] {
        &self.chromosomes
    }

    pub fn positions(&self) -> &[i32] {
        &self.positions
    }

    /// Position of the right-most marker, which bounds the whole scan.
    pub fn last_position(&self) -> Option<Coordinate> {
        self.positions.last().map(|&p| Coordinate::from(p))
    }
}

/// An inclusive, non-empty range `[first, last]` of marker indices.
///
/// Empty windows are represented by `Option<MarkerRange>::None` rather than a
/// sentinel index pair, so a missing range can never be compared against a real
/// index by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkerRange {
    first: usize,
    last: usize,
}

impl MarkerRange {
    /// Returns `None` when `last < first`.
    pub fn new(first: usize, last: usize) -> Option<Self> {
        (first <= last).then_some(Self { first, last })
    }

    #[inline]
    pub fn first(&self) -> usize {
        self.first
    }

    #[inline]
    pub fn last(&self) -> usize {
        self.last
    }

    /// Number of markers in the range. Always at least one.
    #[inline]
    pub fn len(&self) -> usize {
        self.last - self.first + 1
    }

    /// The same range as a half-open column span.
    #[inline]
    pub fn columns(&self) -> Range<usize> {
        self.first..self.last + 1
    }

    /// The smallest range covering both `self` and `other`.
    pub fn cover(&self, other: &MarkerRange) -> MarkerRange {
        MarkerRange {
            first: self.first.min(other.first),
            last: self.last.max(other.last),
        }
    }
}

impl fmt::Display for MarkerRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.first, self.last)
    }
}

/// One window of the scan. Derived from the window plan and discarded once its
/// window set has been evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub left: Coordinate,
    pub right: Coordinate,
    /// Markers whose position lies in the closed range `[left, right]`.
    pub markers: Option<MarkerRange>,
}

impl Window {
    #[inline]
    pub fn midpoint(&self) -> Coordinate {
        (self.left + self.right) / 2
    }
}

/// A batch of windows that share one permutation slab read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSet {
    /// Zero-based position of this set in the scan.
    pub ordinal: usize,
    pub windows: Vec<Window>,
}

impl WindowSet {
    /// The marker span needed to evaluate every non-empty window in the set, or
    /// `None` when every window in the set is empty.
    pub fn marker_span(&self) -> Option<MarkerRange> {
        self.windows
            .iter()
            .filter_map(|w| w.markers)
            .reduce(|span, range| span.cover(&range))
    }

    pub fn occupied_windows(&self) -> usize {
        self.windows.iter().filter(|w| w.markers.is_some()).count()
    }
}

/// One output row: the permutation p-value of a non-empty window and its midpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowPValue {
    pub p_value: f64,
    pub midpoint: Coordinate,
}

/// The read-only snapshot every worker in a window set borrows.
#[derive(Debug)]
pub struct ScanInputs {
    pub markers: MarkerIndex,
    pub observed: Vec<f64>,
    pub ld: LdTable,
}

impl ScanInputs {
    pub fn new(
        markers: MarkerIndex,
        observed: Vec<f64>,
        ld: LdTable,
    ) -> Result<Self, MarkerIndexError> {
        if observed.len() != markers.len() {
            return Err(MarkerIndexError::ObservedLength {
                scores: observed.len(),
                markers: markers.len(),
            });
        }
        Ok(Self {
            markers,
            observed,
            ld,
        })
    }
}

// ========================================================================================
//
//                          Out-of-core permutation slab access
//
// ========================================================================================
//
// The scan never holds the whole permutation matrix. For each window set it asks a
// `PermutationSource` for the columns spanned by the set, over every available
// permutation row, and receives one dense row-major slab. How the rows are stored
// (compressed chunks, several stores, plain memory) is the source's business.

use crate::store::StoreError;
use crate::types::MarkerRange;
use ndarray::{Array2, ArrayView2, ArrayViewMut2, s};
use std::ops::Range;

/// A range-fetch capability over a permutations × markers matrix.
pub trait PermutationSource {
    fn n_markers(&self) -> usize;

    /// Number of permutation rows this source will hand out.
    fn n_permutations(&self) -> usize;

    /// Writes rows `0..out.nrows()` of the marker `columns` into `out`.
    ///
    /// `out` must have exactly `columns.len()` columns and at most
    /// `n_permutations()` rows.
    fn read_into(
        &self,
        columns: Range<usize>,
        out: ArrayViewMut2<'_, f64>,
    ) -> Result<(), StoreError>;

    /// Fetches every permutation row for the marker `columns`.
    fn fetch(&self, columns: Range<usize>) -> Result<PermutationSlab, StoreError> {
        check_columns(&columns, self.n_markers())?;
        let mut data = Array2::zeros((self.n_permutations(), columns.len()));
        self.read_into(columns.clone(), data.view_mut())?;
        Ok(PermutationSlab {
            first_column: columns.start,
            data,
        })
    }
}

pub(crate) fn check_columns(columns: &Range<usize>, available: usize) -> Result<(), StoreError> {
    if columns.start > columns.end || columns.end > available {
        return Err(StoreError::ColumnsOutOfRange {
            requested: columns.clone(),
            available,
        });
    }
    Ok(())
}

pub(crate) fn check_shape(
    columns: &Range<usize>,
    out: &ArrayViewMut2<'_, f64>,
    n_markers: usize,
    n_permutations: usize,
) -> Result<(), StoreError> {
    check_columns(columns, n_markers)?;
    if out.ncols() != columns.len() {
        return Err(StoreError::RowWidth {
            expected: columns.len(),
            found: out.ncols(),
        });
    }
    if out.nrows() > n_permutations {
        return Err(StoreError::RowsOutOfRange {
            requested: out.nrows(),
            available: n_permutations,
        });
    }
    Ok(())
}

/// A dense block of permutation scores: every permutation row for a contiguous span
/// of marker columns.
#[derive(Debug, Clone, PartialEq)]
pub struct PermutationSlab {
    first_column: usize,
    data: Array2<f64>,
}

impl PermutationSlab {
    pub fn n_permutations(&self) -> usize {
        self.data.nrows()
    }

    /// Global marker indices covered by the slab.
    pub fn columns(&self) -> Range<usize> {
        self.first_column..self.first_column + self.data.ncols()
    }

    /// The replicates of one window: all rows, the window's columns only.
    ///
    /// Panics if `range` is not inside the slab; the dispatcher only asks for
    /// windows of the set the slab was fetched for.
    pub fn window(&self, range: MarkerRange) -> ArrayView2<'_, f64> {
        let columns = self.columns();
        assert!(
            columns.start <= range.first() && range.last() < columns.end,
            "window {range} lies outside slab columns {columns:?}"
        );
        let start = range.first() - self.first_column;
        self.data.slice(s![.., start..start + range.len()])
    }
}

/// An in-memory permutation matrix.
#[derive(Debug, Clone)]
pub struct DenseSource {
    data: Array2<f64>,
}

impl DenseSource {
    /// `data` holds one row per permutation and one column per marker.
    pub fn new(data: Array2<f64>) -> Self {
        Self { data }
    }
}

impl PermutationSource for DenseSource {
    fn n_markers(&self) -> usize {
        self.data.ncols()
    }

    fn n_permutations(&self) -> usize {
        self.data.nrows()
    }

    fn read_into(
        &self,
        columns: Range<usize>,
        mut out: ArrayViewMut2<'_, f64>,
    ) -> Result<(), StoreError> {
        check_shape(&columns, &out, self.n_markers(), self.n_permutations())?;
        let rows = out.nrows();
        out.assign(&self.data.slice(s![..rows, columns]));
        Ok(())
    }
}

/// Several sources stacked on top of each other in order, so that their rows read as
/// one logical matrix. An optional row limit truncates the stack.
#[derive(Debug)]
pub struct StackedSource<S> {
    parts: Vec<S>,
    n_markers: usize,
    n_permutations: usize,
}

impl<S: PermutationSource> StackedSource<S> {
    pub fn new(parts: Vec<S>, row_limit: Option<usize>) -> Result<Self, StoreError> {
        let n_markers = parts.first().map_or(0, |p| p.n_markers());
        if let Some(part) = parts.iter().find(|p| p.n_markers() != n_markers) {
            return Err(StoreError::WidthMismatch {
                expected: n_markers,
                found: part.n_markers(),
            });
        }
        let available: usize = parts.iter().map(|p| p.n_permutations()).sum();
        let n_permutations = row_limit.map_or(available, |limit| limit.min(available));
        if let Some(limit) = row_limit.filter(|&limit| limit > available) {
            log::warn!(
                "{limit} permutations requested but only {available} are available; using {available}"
            );
        }
        Ok(Self {
            parts,
            n_markers,
            n_permutations,
        })
    }

    pub fn parts(&self) -> &[S] {
        &self.parts
    }
}

impl<S: PermutationSource> PermutationSource for StackedSource<S> {
    fn n_markers(&self) -> usize {
        self.n_markers
    }

    fn n_permutations(&self) -> usize {
        self.n_permutations
    }

    fn read_into(
        &self,
        columns: Range<usize>,
        mut out: ArrayViewMut2<'_, f64>,
    ) -> Result<(), StoreError> {
        check_shape(&columns, &out, self.n_markers, self.n_permutations)?;
        let wanted = out.nrows();
        let mut row = 0;
        for part in &self.parts {
            if row == wanted {
                break;
            }
            let take = part.n_permutations().min(wanted - row);
            if take == 0 {
                continue;
            }
            part.read_into(columns.clone(), out.slice_mut(s![row..row + take, ..]))?;
            row += take;
        }
        Ok(())
    }
}

// ========================================================================================
//
//                               The permutation store
//
// ========================================================================================
//
// A store is a directory holding one marker table (with the observed scores), one LD
// pair list, and one chunked, compressed permutation matrix whose row dimension can
// grow without bound. The scan only ever reads a store; `convert` and
// `ChunkedMatrixWriter` produce them.

pub mod convert;
pub mod manifest;
pub mod matrix;
pub mod tables;
pub mod validate;

use crate::types::MarkerIndexError;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use manifest::StoreManifest;
pub use matrix::{ChunkedMatrix, ChunkedMatrixWriter};
pub use tables::{LdPairs, StoreTables};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not parse store manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("could not serialize store manifest: {0}")]
    ManifestEncode(#[from] toml::ser::Error),
    #[error("{path} uses store format version {found}, but only version {supported} is supported")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        supported: u32,
    },
    #[error("malformed table {path}: {source}")]
    Table {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("invalid marker table {path}: {source}")]
    Markers {
        path: PathBuf,
        #[source]
        source: MarkerIndexError,
    },
    #[error("chunk index {path} lists {found} chunks, but the manifest describes {expected}")]
    IndexLength {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
    #[error(
        "chunk {chunk} in {path} spans bytes {offset}..{end}, past the end of the {file_len}-byte chunk file"
    )]
    ChunkOutOfBounds {
        path: PathBuf,
        chunk: usize,
        offset: u64,
        end: u64,
        file_len: u64,
    },
    #[error("chunk {chunk} in {path} inflated to {found} bytes, expected {expected}")]
    CorruptChunk {
        path: PathBuf,
        chunk: usize,
        expected: usize,
        found: usize,
    },
    #[error(
        "{path} describes {table_markers} markers but its permutation matrix has {matrix_markers} columns"
    )]
    ShapeMismatch {
        path: PathBuf,
        table_markers: usize,
        matrix_markers: usize,
    },
    #[error("stores disagree on the marker count: {expected} versus {found}")]
    WidthMismatch { expected: usize, found: usize },
    #[error("requested marker columns {requested:?}, but the matrix has {available} columns")]
    ColumnsOutOfRange {
        requested: Range<usize>,
        available: usize,
    },
    #[error("requested {requested} permutation rows, but only {available} are available")]
    RowsOutOfRange { requested: usize, available: usize },
    #[error("permutation row has {found} values, expected {expected}")]
    RowWidth { expected: usize, found: usize },
    #[error("cannot append to {path}: it ends with a partial block of {rows} rows")]
    PartialBlock { path: PathBuf, rows: usize },
    #[error("invalid chunk shape: {0}")]
    InvalidChunkShape(&'static str),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// An opened store: its tables are fully loaded, its permutation matrix is mapped
/// but not read.
#[derive(Debug)]
pub struct PermutationStore {
    path: PathBuf,
    tables: StoreTables,
    matrix: ChunkedMatrix,
}

impl PermutationStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let matrix = ChunkedMatrix::open(path)?;
        let tables = StoreTables::load(path)?;
        if tables.markers.len() != matrix.manifest().n_markers {
            return Err(StoreError::ShapeMismatch {
                path: path.to_path_buf(),
                table_markers: tables.markers.len(),
                matrix_markers: matrix.manifest().n_markers,
            });
        }
        log::info!(
            "Opened store {} ({} markers, {} permutations, {} LD pairs)",
            path.display(),
            tables.markers.len(),
            matrix.manifest().n_permutations,
            tables.ld.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            tables,
            matrix,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tables(&self) -> &StoreTables {
        &self.tables
    }

    pub fn matrix(&self) -> &ChunkedMatrix {
        &self.matrix
    }

    pub fn into_parts(self) -> (StoreTables, ChunkedMatrix) {
        (self.tables, self.matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MarkerIndex;

    fn write_store(dir: &Path, table_markers: usize, matrix_markers: usize) {
        let ids: Vec<String> = (0..table_markers).map(|i| format!("rs{i}")).collect();
        let positions: Vec<i32> = (0..table_markers as i32).map(|i| 100 + i * 10).collect();
        let markers =
            MarkerIndex::new(ids, vec!["4".to_string(); table_markers], positions).unwrap();
        StoreTables::new(markers, vec![0.5; table_markers], LdPairs::default())
            .unwrap()
            .write(dir)
            .unwrap();

        let mut writer = ChunkedMatrixWriter::create(dir, matrix_markers, 2, 2, 6).unwrap();
        for r in 0..3 {
            writer.append_row(&vec![r as f64; matrix_markers]).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn matching_tables_and_matrix_open_as_a_store() {
        let dir = tempfile::tempdir().unwrap();
        write_store(dir.path(), 3, 3);
        let store = PermutationStore::open(dir.path()).unwrap();
        assert_eq!(store.tables().markers.len(), 3);
        assert_eq!(store.matrix().manifest().n_permutations, 3);
    }

    #[test]
    fn marker_table_wider_than_the_matrix_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_store(dir.path(), 4, 3);
        assert!(matches!(
            PermutationStore::open(dir.path()),
            Err(StoreError::ShapeMismatch {
                table_markers: 4,
                matrix_markers: 3,
                ..
            })
        ));
    }
}

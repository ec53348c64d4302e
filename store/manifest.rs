use super::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const MANIFEST_FILE: &str = "manifest.toml";
pub const MARKERS_FILE: &str = "markers.tsv.gz";
pub const LD_FILE: &str = "ld.tsv.gz";
pub const CHUNKS_FILE: &str = "permutations.chunks";
pub const INDEX_FILE: &str = "permutations.index";

pub const FORMAT_VERSION: u32 = 1;

/// Shape and layout of a store's permutation matrix.
///
/// Chunks are `chunk_permutations × chunk_markers` rectangles (truncated at the
/// matrix edge) stored row-block-major, column-chunk-minor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreManifest {
    pub format_version: u32,
    pub n_markers: usize,
    pub n_permutations: usize,
    pub chunk_permutations: usize,
    pub chunk_markers: usize,
    pub compression_level: u32,
}

impl StoreManifest {
    pub fn new(
        n_markers: usize,
        chunk_permutations: usize,
        chunk_markers: usize,
        compression_level: u32,
    ) -> Result<Self, StoreError> {
        if chunk_permutations == 0 {
            return Err(StoreError::InvalidChunkShape(
                "chunks must hold at least one permutation",
            ));
        }
        if chunk_markers == 0 {
            return Err(StoreError::InvalidChunkShape(
                "chunks must hold at least one marker",
            ));
        }
        if compression_level > 9 {
            return Err(StoreError::InvalidChunkShape(
                "compression level must be between 0 and 9",
            ));
        }
        Ok(Self {
            format_version: FORMAT_VERSION,
            n_markers,
            n_permutations: 0,
            chunk_permutations,
            chunk_markers,
            compression_level,
        })
    }

    pub fn load(dir: &Path) -> Result<Self, StoreError> {
        let path = dir.join(MANIFEST_FILE);
        let text = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
        let manifest: Self = toml::from_str(&text).map_err(|source| StoreError::Manifest {
            path: path.clone(),
            source,
        })?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                path,
                found: manifest.format_version,
                supported: FORMAT_VERSION,
            });
        }
        if manifest.chunk_permutations == 0 || manifest.chunk_markers == 0 {
            return Err(StoreError::InvalidChunkShape(
                "manifest declares an empty chunk",
            ));
        }
        Ok(manifest)
    }

    pub fn save(&self, dir: &Path) -> Result<(), StoreError> {
        let path = dir.join(MANIFEST_FILE);
        let text = toml::to_string_pretty(self)?;
        fs::write(&path, text).map_err(|e| StoreError::io(&path, e))
    }

    /// Number of row blocks currently holding data.
    pub fn row_blocks(&self) -> usize {
        self.n_permutations.div_ceil(self.chunk_permutations)
    }

    pub fn column_chunks(&self) -> usize {
        self.n_markers.div_ceil(self.chunk_markers)
    }

    pub fn chunk_count(&self) -> usize {
        self.row_blocks() * self.column_chunks()
    }

    /// Rows actually held by the chunks of `block`.
    pub fn rows_in_block(&self, block: usize) -> usize {
        let start = block * self.chunk_permutations;
        self.chunk_permutations
            .min(self.n_permutations.saturating_sub(start))
    }

    /// Columns actually held by the chunks of column chunk `column_chunk`.
    pub fn columns_in_chunk(&self, column_chunk: usize) -> usize {
        let start = column_chunk * self.chunk_markers;
        self.chunk_markers.min(self.n_markers.saturating_sub(start))
    }

    /// Position of a chunk in the index.
    #[inline]
    pub fn chunk_ordinal(&self, block: usize, column_chunk: usize) -> usize {
        block * self.column_chunks() + column_chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_chunks_are_truncated() {
        let mut manifest = StoreManifest::new(105, 10, 50, 6).unwrap();
        manifest.n_permutations = 23;
        assert_eq!(manifest.row_blocks(), 3);
        assert_eq!(manifest.column_chunks(), 3);
        assert_eq!(manifest.chunk_count(), 9);
        assert_eq!(manifest.rows_in_block(2), 3);
        assert_eq!(manifest.columns_in_chunk(2), 5);
        assert_eq!(manifest.chunk_ordinal(1, 2), 5);
    }

    #[test]
    fn manifest_survives_a_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = StoreManifest::new(12, 4, 5, 1).unwrap();
        manifest.n_permutations = 9;
        manifest.save(dir.path()).unwrap();
        assert_eq!(StoreManifest::load(dir.path()).unwrap(), manifest);
    }

    #[test]
    fn unknown_format_versions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = StoreManifest::new(1, 1, 1, 0).unwrap();
        manifest.format_version = 7;
        manifest.save(dir.path()).unwrap();
        assert!(matches!(
            StoreManifest::load(dir.path()),
            Err(StoreError::UnsupportedVersion { found: 7, .. })
        ));
    }

    #[test]
    fn empty_chunk_shapes_are_rejected() {
        assert!(StoreManifest::new(10, 0, 5, 6).is_err());
        assert!(StoreManifest::new(10, 5, 0, 6).is_err());
        assert!(StoreManifest::new(10, 5, 5, 10).is_err());
    }
}

// ========================================================================================
//
//                         The chunked, compressed permutation matrix
//
// ========================================================================================
//
// The matrix is cut into `chunk_permutations × chunk_markers` rectangles. Each chunk is
// a row-major block of little-endian f64 values compressed with zlib and appended to
// the chunk file; the index file records `(offset, length)` of every chunk. Rows are
// appended one row block at a time, so the row dimension is unbounded.
//
// Reading a column span inflates only the chunks that intersect it, each exactly once
// per fetch, and copies the intersecting rectangle into the caller's buffer.

use super::StoreError;
use super::manifest::{CHUNKS_FILE, INDEX_FILE, StoreManifest};
use crate::slab::{PermutationSource, check_shape};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use memmap2::Mmap;
use ndarray::{ArrayView1, ArrayViewMut2, s};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

const F64_BYTES: usize = std::mem::size_of::<f64>();
const INDEX_ENTRY_BYTES: usize = 2 * std::mem::size_of::<u64>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkLocation {
    offset: u64,
    length: u64,
}

impl ChunkLocation {
    fn from_le_entry(entry: &[u8]) -> Self {
        Self {
            offset: read_u64(&entry[..8]),
            length: read_u64(&entry[8..]),
        }
    }

    /// `None` when a corrupt entry overflows the byte range.
    fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.length)
    }
}

// ========================================================================================
//                                     The writer
// ========================================================================================

/// Streams permutation rows into a store directory.
///
/// Rows are buffered until a full row block is available, then every column chunk
/// of the block is compressed and appended. `finish` flushes the trailing partial
/// block and publishes the manifest.
pub struct ChunkedMatrixWriter {
    dir: PathBuf,
    manifest: StoreManifest,
    chunks: BufWriter<File>,
    index: BufWriter<File>,
    offset: u64,
    pending: Vec<f64>,
    pending_rows: usize,
    inflated: Vec<u8>,
}

impl ChunkedMatrixWriter {
    /// Starts a fresh matrix in `dir`, replacing any matrix already there.
    pub fn create(
        dir: &Path,
        n_markers: usize,
        chunk_permutations: usize,
        chunk_markers: usize,
        compression_level: u32,
    ) -> Result<Self, StoreError> {
        let manifest =
            StoreManifest::new(n_markers, chunk_permutations, chunk_markers, compression_level)?;
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        let chunks = create_file(&dir.join(CHUNKS_FILE))?;
        let index = create_file(&dir.join(INDEX_FILE))?;
        Ok(Self::with_files(dir, manifest, chunks, index, 0))
    }

    /// Reopens the matrix in `dir` to append more permutation rows. The existing
    /// matrix must end on a whole row block.
    pub fn append(dir: &Path) -> Result<Self, StoreError> {
        let manifest = StoreManifest::load(dir)?;
        let trailing = manifest.n_permutations % manifest.chunk_permutations;
        if trailing != 0 {
            return Err(StoreError::PartialBlock {
                path: dir.to_path_buf(),
                rows: trailing,
            });
        }
        let chunks_path = dir.join(CHUNKS_FILE);
        let chunks = append_file(&chunks_path)?;
        let offset = chunks
            .metadata()
            .map_err(|e| StoreError::io(&chunks_path, e))?
            .len();
        let index = append_file(&dir.join(INDEX_FILE))?;
        Ok(Self::with_files(dir, manifest, chunks, index, offset))
    }

    fn with_files(
        dir: &Path,
        manifest: StoreManifest,
        chunks: File,
        index: File,
        offset: u64,
    ) -> Self {
        let block_len = manifest.chunk_permutations * manifest.n_markers;
        Self {
            dir: dir.to_path_buf(),
            manifest,
            chunks: BufWriter::new(chunks),
            index: BufWriter::new(index),
            offset,
            pending: Vec::with_capacity(block_len),
            pending_rows: 0,
            inflated: Vec::new(),
        }
    }

    pub fn n_markers(&self) -> usize {
        self.manifest.n_markers
    }

    /// Permutations written so far, including buffered rows.
    pub fn n_permutations(&self) -> usize {
        self.manifest.n_permutations + self.pending_rows
    }

    pub fn append_row(&mut self, row: &[f64]) -> Result<(), StoreError> {
        if row.len() != self.manifest.n_markers {
            return Err(StoreError::RowWidth {
                expected: self.manifest.n_markers,
                found: row.len(),
            });
        }
        self.pending.extend_from_slice(row);
        self.pending_rows += 1;
        if self.pending_rows == self.manifest.chunk_permutations {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> Result<(), StoreError> {
        if self.pending_rows == 0 {
            return Ok(());
        }
        let width = self.manifest.n_markers;
        let level = Compression::new(self.manifest.compression_level);
        for column_chunk in 0..self.manifest.column_chunks() {
            let start = column_chunk * self.manifest.chunk_markers;
            let cols = self.manifest.columns_in_chunk(column_chunk);

            self.inflated.clear();
            for row in self.pending.chunks_exact(width) {
                for value in &row[start..start + cols] {
                    self.inflated.extend_from_slice(&value.to_le_bytes());
                }
            }

            let compressed = compress(&self.inflated, level)
                .map_err(|e| StoreError::io(&self.dir.join(CHUNKS_FILE), e))?;
            self.chunks
                .write_all(&compressed)
                .map_err(|e| StoreError::io(&self.dir.join(CHUNKS_FILE), e))?;
            let length = compressed.len() as u64;
            self.index
                .write_all(&self.offset.to_le_bytes())
                .and_then(|_| self.index.write_all(&length.to_le_bytes()))
                .map_err(|e| StoreError::io(&self.dir.join(INDEX_FILE), e))?;
            self.offset += length;
        }
        self.manifest.n_permutations += self.pending_rows;
        self.pending.clear();
        self.pending_rows = 0;
        Ok(())
    }

    /// Flushes every buffered row and writes the manifest. Returns the total
    /// number of permutations in the matrix.
    pub fn finish(mut self) -> Result<usize, StoreError> {
        self.flush_block()?;
        self.chunks
            .flush()
            .map_err(|e| StoreError::io(&self.dir.join(CHUNKS_FILE), e))?;
        self.index
            .flush()
            .map_err(|e| StoreError::io(&self.dir.join(INDEX_FILE), e))?;
        self.manifest.save(&self.dir)?;
        log::debug!(
            "Wrote {} permutations x {} markers to {}",
            self.manifest.n_permutations,
            self.manifest.n_markers,
            self.dir.display()
        );
        Ok(self.manifest.n_permutations)
    }
}

fn compress(bytes: &[u8], level: Compression) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(bytes.len() / 2), level);
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn create_file(path: &Path) -> Result<File, StoreError> {
    File::create(path).map_err(|e| StoreError::io(path, e))
}

fn append_file(path: &Path) -> Result<File, StoreError> {
    OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))
}

// ========================================================================================
//                                     The reader
// ========================================================================================

/// A read-only, memory-mapped view of a store's permutation matrix.
#[derive(Debug)]
pub struct ChunkedMatrix {
    dir: PathBuf,
    manifest: StoreManifest,
    // Byte range of every chunk, checked against the chunk file on open.
    index: Vec<Range<usize>>,
    // `None` when the chunk file is empty, which cannot be mapped.
    data: Option<Mmap>,
}

impl ChunkedMatrix {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let manifest = StoreManifest::load(dir)?;

        let index_path = dir.join(INDEX_FILE);
        let raw_index = fs::read(&index_path).map_err(|e| StoreError::io(&index_path, e))?;
        let entries = raw_index.len() / INDEX_ENTRY_BYTES;
        if raw_index.len() % INDEX_ENTRY_BYTES != 0 || entries < manifest.chunk_count() {
            return Err(StoreError::IndexLength {
                path: index_path,
                expected: manifest.chunk_count(),
                found: entries,
            });
        }

        let chunks_path = dir.join(CHUNKS_FILE);
        let file = File::open(&chunks_path).map_err(|e| StoreError::io(&chunks_path, e))?;
        let file_len = file
            .metadata()
            .map_err(|e| StoreError::io(&chunks_path, e))?
            .len();
        // SAFETY: the store is treated as immutable for the lifetime of the scan; the
        // mapping is only ever read.
        let data = if file_len == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(&file) }.map_err(|e| StoreError::io(&chunks_path, e))?)
        };

        let mut index = Vec::with_capacity(manifest.chunk_count());
        for (chunk, entry) in raw_index
            .chunks_exact(INDEX_ENTRY_BYTES)
            .take(manifest.chunk_count())
            .enumerate()
        {
            let location = ChunkLocation::from_le_entry(entry);
            match location.end() {
                Some(end) if end <= file_len => {
                    index.push(location.offset as usize..end as usize);
                }
                end => {
                    return Err(StoreError::ChunkOutOfBounds {
                        path: chunks_path,
                        chunk,
                        offset: location.offset,
                        end: end.unwrap_or(u64::MAX),
                        file_len,
                    });
                }
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            manifest,
            index,
            data,
        })
    }

    pub fn manifest(&self) -> &StoreManifest {
        &self.manifest
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Inflates one chunk into `values` (row-major, `rows_in_block × columns_in_chunk`).
    fn inflate_chunk(
        &self,
        block: usize,
        column_chunk: usize,
        inflated: &mut Vec<u8>,
        values: &mut Vec<f64>,
    ) -> Result<(), StoreError> {
        let ordinal = self.manifest.chunk_ordinal(block, column_chunk);
        let bytes = self.data.as_deref().unwrap_or(&[]);
        let compressed = &bytes[self.index[ordinal].clone()];

        let expected = self.manifest.rows_in_block(block)
            * self.manifest.columns_in_chunk(column_chunk)
            * F64_BYTES;
        inflated.clear();
        ZlibDecoder::new(compressed)
            .read_to_end(inflated)
            .map_err(|e| StoreError::io(&self.dir.join(CHUNKS_FILE), e))?;
        if inflated.len() != expected {
            return Err(StoreError::CorruptChunk {
                path: self.dir.join(CHUNKS_FILE),
                chunk: ordinal,
                expected,
                found: inflated.len(),
            });
        }

        values.clear();
        values.extend(inflated.chunks_exact(F64_BYTES).map(|word| {
            let mut le = [0u8; F64_BYTES];
            le.copy_from_slice(word);
            f64::from_le_bytes(le)
        }));
        Ok(())
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut le = [0u8; 8];
    le.copy_from_slice(bytes);
    u64::from_le_bytes(le)
}

impl PermutationSource for ChunkedMatrix {
    fn n_markers(&self) -> usize {
        self.manifest.n_markers
    }

    fn n_permutations(&self) -> usize {
        self.manifest.n_permutations
    }

    fn read_into(
        &self,
        columns: Range<usize>,
        mut out: ArrayViewMut2<'_, f64>,
    ) -> Result<(), StoreError> {
        check_shape(&columns, &out, self.n_markers(), self.n_permutations())?;
        let rows = out.nrows();
        if rows == 0 || columns.is_empty() {
            return Ok(());
        }

        let chunk_rows = self.manifest.chunk_permutations;
        let chunk_cols = self.manifest.chunk_markers;
        let first_chunk = columns.start / chunk_cols;
        let last_chunk = (columns.end - 1) / chunk_cols;
        let blocks = rows.div_ceil(chunk_rows);

        let mut inflated = Vec::new();
        let mut values = Vec::new();
        for block in 0..blocks {
            let row0 = block * chunk_rows;
            let take = chunk_rows.min(rows - row0);
            for column_chunk in first_chunk..=last_chunk {
                self.inflate_chunk(block, column_chunk, &mut inflated, &mut values)?;

                let col0 = column_chunk * chunk_cols;
                let width = self.manifest.columns_in_chunk(column_chunk);
                let lo = col0.max(columns.start);
                let hi = (col0 + width).min(columns.end);
                for r in 0..take {
                    let src = &values[r * width + (lo - col0)..r * width + (hi - col0)];
                    out.slice_mut(s![row0 + r, lo - columns.start..hi - columns.start])
                        .assign(&ArrayView1::from(src));
                }
            }
        }
        log::debug!(
            "Inflated {} chunks of {} for columns {columns:?}",
            blocks * (last_chunk - first_chunk + 1),
            self.dir.display()
        );
        Ok(())
    }
}

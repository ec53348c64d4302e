// ========================================================================================
//                           Marker and LD tables of a store
// ========================================================================================
//
// Both tables are small next to the permutation matrix, so they are read eagerly.
// They are tab-separated, gzip-compressed, and carry a header row.

use super::StoreError;
use super::manifest::{LD_FILE, MARKERS_FILE};
use crate::ld::LdTable;
use crate::types::{MarkerIndex, MarkerIndexError, ScanInputs};
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub id: String,
    pub chr: String,
    pub pos: i32,
    pub observed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LdRecord {
    pub snp_a: String,
    pub snp_b: String,
    pub r2: f64,
}

/// The LD pair list exactly as stored: three aligned columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LdPairs {
    pub snp_a: Vec<String>,
    pub snp_b: Vec<String>,
    pub r2: Vec<f64>,
}

impl LdPairs {
    pub fn len(&self) -> usize {
        self.r2.len()
    }

    pub fn is_empty(&self) -> bool {
        self.r2.is_empty()
    }

    pub fn push(&mut self, snp_a: String, snp_b: String, r2: f64) {
        self.snp_a.push(snp_a);
        self.snp_b.push(snp_b);
        self.r2.push(r2);
    }

    fn rows(&self) -> impl Iterator<Item = (&str, &str, f64)> {
        self.snp_a
            .iter()
            .zip(&self.snp_b)
            .zip(&self.r2)
            .map(|((a, b), &r2)| (a.as_str(), b.as_str(), r2))
    }
}

/// Everything in a store except the permutation matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreTables {
    pub markers: MarkerIndex,
    pub observed: Vec<f64>,
    pub ld: LdPairs,
}

impl StoreTables {
    pub fn new(
        markers: MarkerIndex,
        observed: Vec<f64>,
        ld: LdPairs,
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

    pub fn load(dir: &Path) -> Result<Self, StoreError> {
        let markers_path = dir.join(MARKERS_FILE);
        let records: Vec<MarkerRecord> = read_table(&markers_path)?;
        let mut ids = Vec::with_capacity(records.len());
        let mut chromosomes = Vec::with_capacity(records.len());
        let mut positions = Vec::with_capacity(records.len());
        let mut observed = Vec::with_capacity(records.len());
        for record in records {
            ids.push(record.id);
            chromosomes.push(record.chr);
            positions.push(record.pos);
            observed.push(record.observed);
        }
        let markers = MarkerIndex::new(ids, chromosomes, positions).map_err(|source| {
            StoreError::Markers {
                path: markers_path.clone(),
                source,
            }
        })?;

        let ld_path = dir.join(LD_FILE);
        let mut ld = LdPairs::default();
        for record in read_table::<LdRecord>(&ld_path)? {
            ld.push(record.snp_a, record.snp_b, record.r2);
        }

        Ok(Self {
            markers,
            observed,
            ld,
        })
    }

    pub fn write(&self, dir: &Path) -> Result<(), StoreError> {
        let markers = self
            .markers
            .ids()
            .iter()
            .zip(self.markers.chromosomes())
            .zip(self.markers.positions())
            .zip(&self.observed)
            .map(|(((id, chr), &pos), &observed)| MarkerRecord {
                id: id.clone(),
                chr: chr.clone(),
                pos,
                observed,
            });
        write_table(&dir.join(MARKERS_FILE), markers)?;

        let ld = self.ld.rows().map(|(a, b, r2)| LdRecord {
            snp_a: a.to_string(),
            snp_b: b.to_string(),
            r2,
        });
        write_table(&dir.join(LD_FILE), ld)
    }

    /// Resolves the LD pair list against the marker table.
    pub fn ld_table(&self) -> LdTable {
        LdTable::from_named_pairs(&self.markers, self.ld.rows())
    }

    /// The snapshot the scan runs on.
    pub fn into_scan_inputs(self) -> Result<ScanInputs, MarkerIndexError> {
        let ld = self.ld_table();
        ScanInputs::new(self.markers, self.observed, ld)
    }
}

fn read_table<T>(path: &Path) -> Result<Vec<T>, StoreError>
where
    T: for<'de> Deserialize<'de>,
{
    let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_reader(BufReader::new(MultiGzDecoder::new(file)));
    reader
        .deserialize()
        .collect::<Result<Vec<T>, csv::Error>>()
        .map_err(|source| StoreError::Table {
            path: path.to_path_buf(),
            source,
        })
}

fn write_table<T, I>(path: &Path, rows: I) -> Result<(), StoreError>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let file = File::create(path).map_err(|e| StoreError::io(path, e))?;
    let table_error = |source| StoreError::Table {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(GzEncoder::new(file, Compression::default()));
    for row in rows {
        writer.serialize(row).map_err(table_error)?;
    }
    let encoder = writer
        .into_inner()
        .map_err(|e| StoreError::io(path, e.into_error()))?;
    encoder.finish().map_err(|e| StoreError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn sample() -> StoreTables {
        let markers = MarkerIndex::new(
            strings(&["rs1", "rs2", "rs3"]),
            strings(&["7", "7", "7"]),
            vec![100, 250, 250],
        )
        .unwrap();
        let mut ld = LdPairs::default();
        ld.push("rs1".into(), "rs2".into(), 0.8);
        ld.push("rs2".into(), "rs3".into(), 0.05);
        StoreTables::new(markers, vec![1.5, 0.25, 3.0], ld).unwrap()
    }

    #[test]
    fn tables_written_to_a_store_load_back_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let tables = sample();
        tables.write(dir.path()).unwrap();
        assert_eq!(StoreTables::load(dir.path()).unwrap(), tables);
    }

    #[test]
    fn ld_pairs_resolve_to_marker_indices() {
        let ld = sample().ld_table();
        assert_eq!(ld.r2(0, 1), 0.8);
        assert_eq!(ld.r2(2, 1), 0.05);
        assert_eq!(ld.r2(0, 2), 0.0);
    }

    #[test]
    fn unsorted_marker_tables_are_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let markers = File::create(dir.path().join(MARKERS_FILE)).unwrap();
        let mut gz = GzEncoder::new(markers, Compression::default());
        gz.write_all(b"id\tchr\tpos\tobserved\nrs1\t1\t500\t0.1\nrs2\t1\t400\t0.2\n")
            .unwrap();
        gz.finish().unwrap();
        let ld = File::create(dir.path().join(LD_FILE)).unwrap();
        let mut gz = GzEncoder::new(ld, Compression::default());
        gz.write_all(b"snp_a\tsnp_b\tr2\n").unwrap();
        gz.finish().unwrap();

        assert!(matches!(
            StoreTables::load(dir.path()),
            Err(StoreError::Markers {
                source: MarkerIndexError::Unsorted { index: 1, .. },
                ..
            })
        ));
    }

    #[test]
    fn malformed_rows_report_the_table() {
        let dir = tempfile::tempdir().unwrap();
        let markers = File::create(dir.path().join(MARKERS_FILE)).unwrap();
        let mut gz = GzEncoder::new(markers, Compression::default());
        gz.write_all(b"id\tchr\tpos\tobserved\nrs1\t1\tnot-a-number\t0.1\n")
            .unwrap();
        gz.finish().unwrap();

        match StoreTables::load(dir.path()) {
            Err(StoreError::Table { path, .. }) => assert!(path.ends_with(MARKERS_FILE)),
            other => panic!("expected a table error, got {other:?}"),
        }
    }

    #[test]
    fn observed_scores_must_cover_every_marker() {
        let tables = sample();
        assert_eq!(
            StoreTables::new(tables.markers, vec![1.0], tables.ld),
            Err(MarkerIndexError::ObservedLength {
                scores: 1,
                markers: 3
            })
        );
    }
}
